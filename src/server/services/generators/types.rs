use serde::{Deserialize, Serialize};

use crate::server::models::{Slide, StructuredBrief};

/// Request envelope shared by all three generator families. Services echo
/// the tracking fields back unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub presentation_id: String,
    pub slide_id: String,
    pub slide_number: u32,
    pub variant_id: String,
    pub title: String,
    pub narrative: String,
    pub key_points: Vec<String>,
    pub structure_preference: String,
    pub topic: String,
    pub tone: String,
    pub audience: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics_brief: Option<StructuredBrief>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visuals_brief: Option<StructuredBrief>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagrams_brief: Option<StructuredBrief>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables_brief: Option<StructuredBrief>,
    /// Element count for illustrations, clamped to the variant's envelope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_count: Option<u32>,
}

impl GenerationRequest {
    pub fn for_slide(
        presentation_id: &str,
        topic: &str,
        tone: &str,
        audience: &str,
        slide: &Slide,
        variant_id: &str,
    ) -> Self {
        Self {
            presentation_id: presentation_id.to_string(),
            slide_id: slide.slide_id.clone(),
            slide_number: slide.slide_number,
            variant_id: variant_id.to_string(),
            title: slide.title.clone(),
            narrative: slide.narrative.clone(),
            key_points: slide.key_points.clone(),
            structure_preference: slide.structure_preference.clone(),
            topic: topic.to_string(),
            tone: tone.to_string(),
            audience: audience.to_string(),
            analytics_brief: slide.analytics_needed.clone(),
            visuals_brief: slide.visuals_needed.clone(),
            diagrams_brief: slide.diagrams_needed.clone(),
            tables_brief: slide.tables_needed.clone(),
            element_count: None,
        }
    }
}

/// Structured content keyed to layout fields, as the text service returns it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TextContent {
    #[serde(default)]
    pub slide_title: Option<String>,
    #[serde(default)]
    pub element_1: Option<String>,
    #[serde(default)]
    pub element_2: Option<String>,
    #[serde(default)]
    pub element_3: Option<String>,
    #[serde(default)]
    pub rich_content: Option<String>,
}

/// Self-contained HTML snippet plus generation metadata from the
/// illustrator service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IllustrationContent {
    pub html: String,
    #[serde(default)]
    pub generated_content: Option<serde_json::Value>,
    #[serde(default)]
    pub validation: Option<serde_json::Value>,
}

/// Chart and observations HTML from the analytics service, embedded into
/// the surrounding layout verbatim by the renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsContent {
    /// Observations panel (~540x720).
    pub element_2: String,
    /// Chart canvas (~1260x720).
    pub element_3: String,
}

/// What one slide's generation produced, tagged by family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum GeneratedSlideContent {
    Text(TextContent),
    Illustration(IllustrationContent),
    Analytics(AnalyticsContent),
}
