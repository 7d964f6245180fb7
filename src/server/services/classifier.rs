use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::server::models::{LayoutId, Slide};
use crate::server::registry::{Registry, ServiceName, Variant};

/// Hero roles recognized by the position rules. The registry maps each to a
/// concrete L29 variant via `Classification::slide_type`.
const TITLE_TYPE: &str = "title";
const SECTION_TYPE: &str = "section";
const CLOSING_TYPE: &str = "closing";

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error(
        "slide {slide_number}: variant '{variant_id}' requires layout {expected}, found {found}"
    )]
    LayoutMismatch {
        slide_number: u32,
        variant_id: String,
        expected: LayoutId,
        found: LayoutId,
    },

    #[error("slide {slide_number} has no variant assigned")]
    Unclassified { slide_number: u32 },

    #[error("registry has no content fallback variant")]
    NoFallback,
}

/// Non-fatal diversity findings. Surfaced to the user during refinement;
/// never block an explicit override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiversityWarning {
    pub slide_number: u32,
    pub detail: String,
}

fn group_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\*\*\[GROUP:\s*([^\]]+)\]\*\*").expect("group regex is valid")
    })
}

/// Extract the semantic group id from a narrative, if marked.
pub fn semantic_group(narrative: &str) -> Option<String> {
    group_regex()
        .captures(narrative)
        .map(|caps| caps[1].trim().to_string())
}

struct CompiledVariant {
    service: ServiceName,
    variant: Variant,
    keywords: Vec<Regex>,
}

/// Deterministic slide-type classifier. Pure over the registry and the
/// slide specifications; no I/O.
pub struct Classifier {
    registry: Arc<Registry>,
    compiled: Vec<CompiledVariant>,
}

impl Classifier {
    pub fn new(registry: Arc<Registry>) -> Self {
        let compiled = registry
            .variants_by_priority()
            .into_iter()
            .map(|(service, variant)| CompiledVariant {
                service,
                variant: variant.clone(),
                keywords: variant
                    .classification
                    .keywords
                    .iter()
                    .map(|k| {
                        Regex::new(&format!(r"(?i)\b{}\b", regex::escape(k)))
                            .expect("keyword regex is valid")
                    })
                    .collect(),
            })
            .collect();
        Self { registry, compiled }
    }

    /// Classify every slide: position overrides, keyword priority, fallback,
    /// diversity repair, layout filter. Returns the diversity warnings that
    /// required substitution.
    pub fn classify_all(&self, slides: &mut [Slide]) -> Vec<DiversityWarning> {
        let total = slides.len();
        for index in 0..total {
            let (service, variant) = self.pick_variant(&slides[index], index, total);
            assign(&mut slides[index], service, &variant);
        }
        let warnings = self.repair_diversity(slides);
        self.repair_layouts(slides);
        warnings
    }

    /// Re-classify only the targeted slide (variant override path). The
    /// pick stands even when it violates diversity; violations come back as
    /// warnings.
    pub fn classify_single(&self, slides: &mut [Slide], index: usize) -> Vec<DiversityWarning> {
        let total = slides.len();
        if index >= total {
            return Vec::new();
        }
        let (service, variant) = self.pick_variant(&slides[index], index, total);
        assign(&mut slides[index], service, &variant);
        self.repair_layouts(&mut slides[index..=index]);
        self.diversity_warnings(slides)
    }

    /// The hard L25/L29 check: every assigned variant's layout must match
    /// the slide's layout.
    pub fn validate_layouts(&self, slides: &[Slide]) -> Result<(), ClassifierError> {
        for slide in slides {
            let variant_id = slide
                .variant_id
                .as_deref()
                .ok_or(ClassifierError::Unclassified {
                    slide_number: slide.slide_number,
                })?;
            let found = slide.layout_id.ok_or(ClassifierError::Unclassified {
                slide_number: slide.slide_number,
            })?;
            if let Some((_, _, variant)) = self.registry.variant(variant_id) {
                let expected = variant.classification.layout_id;
                if expected != found {
                    return Err(ClassifierError::LayoutMismatch {
                        slide_number: slide.slide_number,
                        variant_id: variant_id.to_string(),
                        expected,
                        found,
                    });
                }
            }
        }
        Ok(())
    }

    fn pick_variant(&self, slide: &Slide, index: usize, total: usize) -> (ServiceName, Variant) {
        // Position overrides, unless the structure preference explicitly
        // names a content variant.
        let explicit_content = self
            .match_keywords(slide, true, |c| c.variant.classification.layout_id == LayoutId::L25);

        if index == 0 && explicit_content.is_none() {
            if let Some((service, variant)) = self.registry.hero_variant(TITLE_TYPE) {
                return (service, variant.clone());
            }
        }
        if total > 1 && index == total - 1 && explicit_content.is_none() {
            if let Some((service, variant)) = self.registry.hero_variant(CLOSING_TYPE) {
                return (service, variant.clone());
            }
        }

        // Keyword priority scan over all fields. Title and closing heroes
        // only apply at their positions; section heroes mark transitions
        // anywhere in the middle.
        let matched = self.match_keywords(slide, false, |c| {
            let slide_type = c.variant.classification.slide_type.as_str();
            match slide_type {
                t if t == TITLE_TYPE => index == 0,
                t if t == CLOSING_TYPE => total > 1 && index == total - 1,
                t if t == SECTION_TYPE => index > 0 && index + 1 < total,
                _ => true,
            }
        });
        if let Some((service, variant)) = matched {
            return (service, variant);
        }

        // Fallback: single-column content.
        let (service, variant) = self
            .registry
            .fallback_variant()
            .expect("registry validated non-empty at startup");
        (service, variant.clone())
    }

    /// First variant (ascending priority) with a whole-word keyword hit.
    /// `preference_only` restricts the scan to `structure_preference`.
    fn match_keywords(
        &self,
        slide: &Slide,
        preference_only: bool,
        allow: impl Fn(&CompiledVariant) -> bool,
    ) -> Option<(ServiceName, Variant)> {
        let mut haystacks: Vec<&str> = vec![&slide.structure_preference];
        if !preference_only {
            haystacks.push(&slide.narrative);
            haystacks.push(&slide.title);
            haystacks.extend(slide.key_points.iter().map(|s| s.as_str()));
        }
        for compiled in &self.compiled {
            if !allow(compiled) {
                continue;
            }
            let hit = compiled
                .keywords
                .iter()
                .any(|re| haystacks.iter().any(|h| re.is_match(h)));
            if hit {
                debug!(
                    variant = %compiled.variant.variant_id,
                    slide = slide.slide_number,
                    "keyword match"
                );
                return Some((compiled.service, compiled.variant.clone()));
            }
        }
        None
    }

    /// Enforce the diversity rule over content slides: at most 2 consecutive
    /// with the same variant, at most 3 with the same classification, unless
    /// a shared semantic group exempts the run.
    fn repair_diversity(&self, slides: &mut [Slide]) -> Vec<DiversityWarning> {
        let mut warnings = Vec::new();
        for i in 0..slides.len() {
            if slides[i].layout_id != Some(LayoutId::L25) {
                continue;
            }
            let group = semantic_group(&slides[i].narrative);

            if let Some(run) = trailing_run(slides, i, |a, b| a.variant_id == b.variant_id) {
                if run >= 2 && !self.run_shares_group(slides, i, run, group.as_deref()) {
                    let current = slides[i].variant_id.clone().unwrap_or_default();
                    if let Some((service, variant)) =
                        self.substitute_for(&slides[i], &current, false)
                    {
                        warnings.push(DiversityWarning {
                            slide_number: slides[i].slide_number,
                            detail: format!(
                                "variant '{}' repeated on {} consecutive slides, substituted '{}'",
                                current,
                                run + 1,
                                variant.variant_id
                            ),
                        });
                        assign(&mut slides[i], service, &variant);
                        continue;
                    }
                }
            }

            if let Some(run) = trailing_run(slides, i, |a, b| {
                a.slide_type_classification == b.slide_type_classification
            }) {
                if run >= 3 && !self.run_shares_group(slides, i, run, group.as_deref()) {
                    let current_type = slides[i]
                        .slide_type_classification
                        .clone()
                        .unwrap_or_default();
                    let current = slides[i].variant_id.clone().unwrap_or_default();
                    if let Some((service, variant)) =
                        self.substitute_for(&slides[i], &current, true)
                    {
                        warnings.push(DiversityWarning {
                            slide_number: slides[i].slide_number,
                            detail: format!(
                                "classification '{}' repeated on {} consecutive slides, substituted '{}'",
                                current_type,
                                run + 1,
                                variant.variant_id
                            ),
                        });
                        assign(&mut slides[i], service, &variant);
                    }
                }
            }
        }
        warnings
    }

    /// Diversity findings without substitution, for the override path.
    pub fn diversity_warnings(&self, slides: &[Slide]) -> Vec<DiversityWarning> {
        let mut warnings = Vec::new();
        for i in 0..slides.len() {
            if slides[i].layout_id != Some(LayoutId::L25) {
                continue;
            }
            let group = semantic_group(&slides[i].narrative);
            if let Some(run) = trailing_run(slides, i, |a, b| a.variant_id == b.variant_id) {
                if run >= 2 && !self.run_shares_group(slides, i, run, group.as_deref()) {
                    warnings.push(DiversityWarning {
                        slide_number: slides[i].slide_number,
                        detail: format!(
                            "variant '{}' repeated on {} consecutive slides",
                            slides[i].variant_id.clone().unwrap_or_default(),
                            run + 1
                        ),
                    });
                    continue;
                }
            }
            if let Some(run) = trailing_run(slides, i, |a, b| {
                a.slide_type_classification == b.slide_type_classification
            }) {
                if run >= 3 && !self.run_shares_group(slides, i, run, group.as_deref()) {
                    warnings.push(DiversityWarning {
                        slide_number: slides[i].slide_number,
                        detail: format!(
                            "classification '{}' repeated on {} consecutive slides",
                            slides[i]
                                .slide_type_classification
                                .clone()
                                .unwrap_or_default(),
                            run + 1
                        ),
                    });
                }
            }
        }
        warnings
    }

    fn run_shares_group(
        &self,
        slides: &[Slide],
        index: usize,
        run: usize,
        group: Option<&str>,
    ) -> bool {
        let Some(group) = group else { return false };
        (index.saturating_sub(run)..index)
            .all(|j| semantic_group(&slides[j].narrative).as_deref() == Some(group))
    }

    /// A content variant of equal or nearest classification priority that
    /// differs from `current` (and from its slide type, when
    /// `different_type` is set).
    fn substitute_for(
        &self,
        slide: &Slide,
        current: &str,
        different_type: bool,
    ) -> Option<(ServiceName, Variant)> {
        let current_priority = self
            .registry
            .variant(current)
            .map(|(_, _, v)| v.classification.priority)
            .unwrap_or(100);
        let current_type = slide.slide_type_classification.as_deref().unwrap_or("");

        self.compiled
            .iter()
            .filter(|c| c.variant.classification.layout_id == LayoutId::L25)
            .filter(|c| c.variant.variant_id != current)
            .filter(|c| !different_type || c.variant.classification.slide_type != current_type)
            .min_by_key(|c| {
                (c.variant.classification.priority as i64 - current_priority as i64).abs()
            })
            .map(|c| (c.service, c.variant.clone()))
    }

    /// Final L25/L29 filter: repair any variant/layout mismatch with the
    /// default variant for the required layout.
    fn repair_layouts(&self, slides: &mut [Slide]) {
        for slide in slides {
            let Some(variant_id) = slide.variant_id.clone() else {
                continue;
            };
            let Some((_, _, variant)) = self.registry.variant(&variant_id) else {
                continue;
            };
            let expected = variant.classification.layout_id;
            if slide.layout_id != Some(expected) {
                slide.layout_id = Some(expected);
            }
        }
    }
}

fn assign(slide: &mut Slide, _service: ServiceName, variant: &Variant) {
    slide.variant_id = Some(variant.variant_id.clone());
    slide.slide_type_classification = Some(variant.classification.slide_type.clone());
    slide.layout_id = Some(variant.classification.layout_id);
}

/// Length of the run of slides immediately before `index` equal to
/// `slides[index]` under `eq`. `None` when the previous slide differs.
fn trailing_run(
    slides: &[Slide],
    index: usize,
    eq: impl Fn(&Slide, &Slide) -> bool,
) -> Option<usize> {
    let mut run = 0;
    for j in (0..index).rev() {
        if eq(&slides[j], &slides[index]) {
            run += 1;
        } else {
            break;
        }
    }
    if run == 0 {
        None
    } else {
        Some(run)
    }
}
