mod common;

use tokio::sync::watch;
use wiremock::matchers::{body_partial_json, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{fast_scheduler_config, test_registry};
use deck_director::server::models::{LayoutId, PresentationStrawman, Slide};
use deck_director::server::services::scheduler::{ServiceRouter, SlideStatus};

fn classified_slide(number: u32, variant: &str, slide_type: &str, layout: LayoutId) -> Slide {
    Slide {
        slide_id: Slide::id_for_number(number),
        slide_number: number,
        title: format!("Slide {number}"),
        narrative: "narrative".into(),
        key_points: vec!["one".into(), "two".into(), "three".into()],
        analytics_needed: None,
        visuals_needed: None,
        diagrams_needed: None,
        tables_needed: None,
        structure_preference: "structured".into(),
        layout_id: Some(layout),
        slide_type_classification: Some(slide_type.into()),
        variant_id: Some(variant.into()),
    }
}

fn strawman(slides: Vec<Slide>) -> PresentationStrawman {
    PresentationStrawman {
        main_title: "Ops Review".into(),
        overall_theme: "direct".into(),
        design_suggestions: "minimal".into(),
        target_audience: "engineering team".into(),
        duration_minutes: 15,
        preview_url: None,
        preview_id: Some("pres-1".into()),
        slides,
    }
}

fn five_slide_deck() -> PresentationStrawman {
    strawman(vec![
        classified_slide(1, "title_hero", "title", LayoutId::L29),
        classified_slide(2, "pyramid", "hierarchy", LayoutId::L25),
        classified_slide(3, "bar_chart", "chart", LayoutId::L25),
        classified_slide(4, "single_column", "narrative", LayoutId::L25),
        classified_slide(5, "closing_hero", "closing", LayoutId::L29),
    ])
}

async fn mount_defaults(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::text_response()))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(
            r"^/(pyramid|funnel|concentric_circles|venn)/generate$",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::illustration_response()))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/analytics/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::analytics_response()))
        .mount(server)
        .await;
}

fn router(server: &MockServer) -> ServiceRouter {
    ServiceRouter::new(test_registry(&server.uri()), fast_scheduler_config())
}

fn no_cancel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Property: `generated_slides` is parallel to the input order, whatever
/// order the calls complete in.
#[tokio::test]
async fn generated_slides_preserve_input_order() {
    let server = MockServer::start().await;
    mount_defaults(&server).await;
    let router = router(&server);
    let deck = five_slide_deck();
    let (_tx, cancel) = no_cancel();

    let report = router.generate_all(&deck, None, cancel).await;
    assert_eq!(report.generated_slides.len(), 5);
    for (idx, generated) in report.generated_slides.iter().enumerate() {
        assert_eq!(generated.slide_number, deck.slides[idx].slide_number);
        assert_eq!(generated.slide_id, deck.slides[idx].slide_id);
    }
    assert!(report.failed_slides.is_empty());
    assert!(report.error_summary.is_clean());
}

/// S4: a disabled chart variant is remapped to the fallback, an illustrator
/// that returns 500 twice succeeds on the third attempt, and the summary
/// reflects the absorbed retries.
#[tokio::test]
async fn partial_failure_scenario_with_remap_and_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::text_response()))
        .mount(&server)
        .await;
    // Two 500s, then success.
    Mock::given(method("POST"))
        .and(path("/pyramid/generate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/pyramid/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::illustration_response()))
        .mount(&server)
        .await;
    // The disabled pie chart must arrive as a line chart call.
    Mock::given(method("POST"))
        .and(path("/analytics/L25/line"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::analytics_response()))
        .mount(&server)
        .await;

    let mut config = fast_scheduler_config();
    config.disabled_variants = ["pie_chart".to_string()].into_iter().collect();
    let router = ServiceRouter::new(test_registry(&server.uri()), config);

    let deck = strawman(vec![
        classified_slide(1, "title_hero", "title", LayoutId::L29),
        classified_slide(2, "pyramid", "hierarchy", LayoutId::L25),
        classified_slide(3, "pie_chart", "chart", LayoutId::L25),
        classified_slide(4, "single_column", "narrative", LayoutId::L25),
        classified_slide(5, "closing_hero", "closing", LayoutId::L29),
    ]);
    let (_tx, cancel) = no_cancel();
    let report = router.generate_all(&deck, None, cancel).await;

    assert_eq!(report.generated_slides.len(), 5);
    assert!(report
        .generated_slides
        .iter()
        .all(|s| s.status == SlideStatus::Succeeded));
    assert!(report.failed_slides.is_empty());
    // The remapped slide reports the fallback variant.
    assert_eq!(report.generated_slides[2].variant_id, "line_chart");
    // Two absorbed 500s show up in the summary.
    assert_eq!(report.error_summary.by_category.get("http_5xx"), Some(&2));
    assert_eq!(
        report.error_summary.by_service.get("illustrator"),
        Some(&2)
    );
}

/// 4xx responses are not retried: the service sees exactly one request and
/// the slide fails with category http_4xx, while other slides continue.
#[tokio::test]
async fn client_errors_fail_without_retry() {
    let server = MockServer::start().await;
    mount_defaults(&server).await;
    Mock::given(method("POST"))
        .and(path("/analytics/L25/bar"))
        .respond_with(ResponseTemplate::new(422).set_body_string("bad data shape"))
        .expect(1)
        .mount(&server)
        .await;

    let router = router(&server);
    let deck = five_slide_deck();
    let (_tx, cancel) = no_cancel();
    let report = router.generate_all(&deck, None, cancel).await;

    assert_eq!(report.generated_slides.len(), 5);
    assert_eq!(report.failed_slides.len(), 1);
    let failure = &report.failed_slides[0];
    assert_eq!(failure.slide_number, 3);
    assert_eq!(failure.category.as_str(), "http_4xx");
    assert_eq!(failure.http_status, Some(422));
    assert!(failure.endpoint.contains("/analytics/L25/bar"));
    assert_eq!(report.generated_slides[2].status, SlideStatus::Failed);
    // The rest of the deck still generated.
    assert_eq!(
        report
            .generated_slides
            .iter()
            .filter(|s| s.status == SlideStatus::Succeeded)
            .count(),
        4
    );
    assert_eq!(report.error_summary.by_category.get("http_4xx"), Some(&1));
    assert!(!report.error_summary.recommended_actions.is_empty());
}

/// 5xx past the retry budget marks the slide failed and tags the burst as
/// a high-severity issue when it repeats.
#[tokio::test]
async fn exhausted_5xx_marks_slide_failed() {
    let server = MockServer::start().await;
    mount_defaults(&server).await;
    Mock::given(method("POST"))
        .and(path("/funnel/generate"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let mut config = fast_scheduler_config();
    config.retry_policy.max_retries = 2;
    let router = ServiceRouter::new(test_registry(&server.uri()), config);

    let deck = strawman(vec![
        classified_slide(1, "funnel", "flow", LayoutId::L25),
        classified_slide(2, "single_column", "narrative", LayoutId::L25),
    ]);
    let (_tx, cancel) = no_cancel();
    let report = router.generate_all(&deck, None, cancel).await;

    assert_eq!(report.failed_slides.len(), 1);
    assert_eq!(report.failed_slides[0].category.as_str(), "http_5xx");
    assert_eq!(report.generated_slides[0].status, SlideStatus::Failed);
    assert_eq!(report.generated_slides[1].status, SlideStatus::Succeeded);
}

/// The hard layout constraint is refused before any HTTP call is made.
#[tokio::test]
async fn layout_mismatch_is_a_validation_failure() {
    let server = MockServer::start().await;
    mount_defaults(&server).await;
    let router = router(&server);

    // A hero variant forced onto the content layout.
    let deck = strawman(vec![classified_slide(
        1,
        "title_hero",
        "title",
        LayoutId::L25,
    )]);
    let (_tx, cancel) = no_cancel();
    let report = router.generate_all(&deck, None, cancel).await;

    assert_eq!(report.failed_slides.len(), 1);
    assert_eq!(report.failed_slides[0].category.as_str(), "validation");
}

/// Request envelopes carry the session-tracking fields services echo back.
#[tokio::test]
async fn requests_carry_tracking_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/generate"))
        .and(body_partial_json(serde_json::json!({
            "presentation_id": "pres-1",
            "slide_id": "slide_001",
            "slide_number": 1,
            "variant_id": "single_column"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::text_response()))
        .expect(1)
        .mount(&server)
        .await;

    let router = router(&server);
    let deck = strawman(vec![classified_slide(
        1,
        "single_column",
        "narrative",
        LayoutId::L25,
    )]);
    let (_tx, cancel) = no_cancel();
    let report = router.generate_all(&deck, None, cancel).await;
    assert!(report.failed_slides.is_empty());
}
