use serde::Deserialize;
use tracing::debug;

use crate::server::models::{PresentationStrawman, Slide, StructuredBrief};

/// One slide as the model drafts it. Brief fields arrive as loose strings;
/// anything not matching the three-bolded-sections convention is dropped.
#[derive(Debug, Clone, Deserialize)]
pub struct SlideDraft {
    pub title: String,
    #[serde(default)]
    pub narrative: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub structure_preference: String,
    #[serde(default)]
    pub analytics_needed: Option<String>,
    #[serde(default)]
    pub visuals_needed: Option<String>,
    #[serde(default)]
    pub diagrams_needed: Option<String>,
    #[serde(default)]
    pub tables_needed: Option<String>,
}

impl SlideDraft {
    pub fn into_slide(self, number: u32) -> Slide {
        let brief = |text: Option<String>| text.as_deref().and_then(StructuredBrief::parse);
        Slide {
            slide_id: Slide::id_for_number(number),
            slide_number: number,
            title: self.title,
            narrative: self.narrative,
            key_points: self.key_points,
            analytics_needed: brief(self.analytics_needed),
            visuals_needed: brief(self.visuals_needed),
            diagrams_needed: brief(self.diagrams_needed),
            tables_needed: brief(self.tables_needed),
            structure_preference: self.structure_preference,
            layout_id: None,
            slide_type_classification: None,
            variant_id: None,
        }
    }
}

/// The whole outline as the model drafts it.
#[derive(Debug, Clone, Deserialize)]
pub struct StrawmanDraft {
    pub main_title: String,
    #[serde(default)]
    pub overall_theme: String,
    #[serde(default)]
    pub design_suggestions: String,
    #[serde(default)]
    pub target_audience: String,
    #[serde(default = "default_duration")]
    pub duration_minutes: u32,
    pub slides: Vec<SlideDraft>,
}

fn default_duration() -> u32 {
    15
}

impl StrawmanDraft {
    pub fn into_strawman(self) -> PresentationStrawman {
        let slides = self
            .slides
            .into_iter()
            .enumerate()
            .map(|(idx, draft)| draft.into_slide(idx as u32 + 1))
            .collect();
        PresentationStrawman {
            main_title: self.main_title,
            overall_theme: self.overall_theme,
            design_suggestions: self.design_suggestions,
            target_audience: self.target_audience,
            duration_minutes: self.duration_minutes,
            preview_url: None,
            preview_id: None,
            slides,
        }
    }
}

/// The operations the refinement model may emit.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefinementOp {
    Update {
        slide_number: u32,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        narrative: Option<String>,
        #[serde(default)]
        key_points: Option<Vec<String>>,
        #[serde(default)]
        structure_preference: Option<String>,
    },
    Create {
        #[serde(default)]
        position: Option<u32>,
        slide: SlideDraft,
    },
    Delete {
        slide_number: u32,
    },
    VariantOverride {
        slide_number: u32,
        #[serde(default)]
        variant_id: Option<String>,
        #[serde(default)]
        structure_preference: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefinementPlan {
    #[serde(default)]
    pub summary: Option<String>,
    pub operations: Vec<RefinementOp>,
}

/// An override to re-classify, resolved to the renumbered deck.
#[derive(Debug, Clone)]
pub struct OverrideTarget {
    pub index: usize,
    pub variant_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct AppliedRefinement {
    pub structural_change: bool,
    pub overrides: Vec<OverrideTarget>,
    pub summary: Option<String>,
}

/// Strip optional markdown fences around a JSON body.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// Apply a refinement plan. Structural operations run first in the order
/// given, the deck is renumbered gap-free, then overrides are resolved
/// against the renumbered deck and left for the caller to re-classify.
pub fn apply_operations(
    strawman: &mut PresentationStrawman,
    plan: RefinementPlan,
) -> AppliedRefinement {
    let mut applied = AppliedRefinement {
        summary: plan.summary,
        ..AppliedRefinement::default()
    };
    let mut overrides: Vec<RefinementOp> = Vec::new();

    for op in plan.operations {
        match op {
            RefinementOp::Delete { slide_number } => {
                let before = strawman.slides.len();
                strawman.slides.retain(|s| s.slide_number != slide_number);
                if strawman.slides.len() != before {
                    debug!(slide_number, "slide deleted");
                    applied.structural_change = true;
                }
                strawman.renumber_slides();
            }
            RefinementOp::Update {
                slide_number,
                title,
                narrative,
                key_points,
                structure_preference,
            } => {
                if let Some(slide) = strawman
                    .slides
                    .iter_mut()
                    .find(|s| s.slide_number == slide_number)
                {
                    if let Some(title) = title {
                        slide.title = title;
                    }
                    if let Some(narrative) = narrative {
                        slide.narrative = narrative;
                    }
                    if let Some(key_points) = key_points {
                        slide.key_points = key_points;
                    }
                    if let Some(preference) = structure_preference {
                        slide.structure_preference = preference;
                    }
                    applied.structural_change = true;
                }
            }
            RefinementOp::Create { position, slide } => {
                let index = position
                    .map(|p| (p.saturating_sub(1) as usize).min(strawman.slides.len()))
                    .unwrap_or(strawman.slides.len());
                strawman.slides.insert(index, slide.into_slide(0));
                strawman.renumber_slides();
                applied.structural_change = true;
            }
            RefinementOp::VariantOverride { .. } => overrides.push(op),
        }
    }

    strawman.renumber_slides();

    for op in overrides {
        if let RefinementOp::VariantOverride {
            slide_number,
            variant_id,
            structure_preference,
        } = op
        {
            if let Some(index) = strawman
                .slides
                .iter()
                .position(|s| s.slide_number == slide_number)
            {
                if let Some(preference) = structure_preference {
                    strawman.slides[index].structure_preference = preference;
                }
                applied.overrides.push(OverrideTarget { index, variant_id });
            }
        }
    }

    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strawman(count: u32) -> PresentationStrawman {
        PresentationStrawman {
            main_title: "Deck".into(),
            overall_theme: String::new(),
            design_suggestions: String::new(),
            target_audience: "general".into(),
            duration_minutes: 15,
            preview_url: None,
            preview_id: None,
            slides: (1..=count)
                .map(|n| SlideDraft {
                    title: format!("Slide {n}"),
                    narrative: String::new(),
                    key_points: vec![],
                    structure_preference: "prose".into(),
                    analytics_needed: None,
                    visuals_needed: None,
                    diagrams_needed: None,
                    tables_needed: None,
                }
                .into_slide(n))
                .collect(),
        }
    }

    #[test]
    fn delete_renumbers_gap_free() {
        let mut deck = strawman(7);
        let plan = RefinementPlan {
            summary: None,
            operations: vec![RefinementOp::Delete { slide_number: 3 }],
        };
        let applied = apply_operations(&mut deck, plan);
        assert!(applied.structural_change);
        assert_eq!(deck.slides.len(), 6);
        let numbers: Vec<u32> = deck.slides.iter().map(|s| s.slide_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);
        // Former slide 4 moved up and its id follows.
        assert_eq!(deck.slides[2].title, "Slide 4");
        assert_eq!(deck.slides[2].slide_id, "slide_003");
    }

    #[test]
    fn create_inserts_at_position() {
        let mut deck = strawman(3);
        let plan = RefinementPlan {
            summary: None,
            operations: vec![RefinementOp::Create {
                position: Some(2),
                slide: SlideDraft {
                    title: "Inserted".into(),
                    narrative: String::new(),
                    key_points: vec![],
                    structure_preference: "timeline".into(),
                    analytics_needed: None,
                    visuals_needed: None,
                    diagrams_needed: None,
                    tables_needed: None,
                },
            }],
        };
        apply_operations(&mut deck, plan);
        assert_eq!(deck.slides.len(), 4);
        assert_eq!(deck.slides[1].title, "Inserted");
        assert_eq!(deck.slides[1].slide_number, 2);
        assert_eq!(deck.slides[3].slide_number, 4);
    }

    #[test]
    fn override_targets_resolve_after_renumber() {
        let mut deck = strawman(5);
        let plan = RefinementPlan {
            summary: None,
            operations: vec![
                RefinementOp::Delete { slide_number: 1 },
                RefinementOp::VariantOverride {
                    slide_number: 3,
                    variant_id: Some("matrix_2x2".into()),
                    structure_preference: Some("a matrix of pros and cons".into()),
                },
            ],
        };
        let applied = apply_operations(&mut deck, plan);
        assert_eq!(applied.overrides.len(), 1);
        let target = &applied.overrides[0];
        assert_eq!(target.index, 2);
        assert_eq!(target.variant_id.as_deref(), Some("matrix_2x2"));
        // Renumbered slide 3 is the original slide 4.
        assert_eq!(deck.slides[2].title, "Slide 4");
        assert_eq!(
            deck.slides[2].structure_preference,
            "a matrix of pros and cons"
        );
    }

    #[test]
    fn update_touches_only_named_fields() {
        let mut deck = strawman(2);
        let plan = RefinementPlan {
            summary: None,
            operations: vec![RefinementOp::Update {
                slide_number: 2,
                title: Some("New title".into()),
                narrative: None,
                key_points: None,
                structure_preference: None,
            }],
        };
        apply_operations(&mut deck, plan);
        assert_eq!(deck.slides[1].title, "New title");
        assert_eq!(deck.slides[1].structure_preference, "prose");
    }

    #[test]
    fn extract_json_strips_fences() {
        assert_eq!(extract_json("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(extract_json("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(extract_json("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn plan_parses_screaming_snake_ops() {
        let plan: RefinementPlan = serde_json::from_str(
            r#"{
                "summary": "delete slide 3",
                "operations": [{"op": "DELETE", "slide_number": 3}]
            }"#,
        )
        .unwrap();
        assert!(matches!(
            plan.operations[0],
            RefinementOp::Delete { slide_number: 3 }
        ));
    }
}
