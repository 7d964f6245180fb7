use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The two layout families a slide can render into. `L25` is the standard
/// content layout, `L29` the full-bleed hero layout. A hero variant may only
/// be paired with `L29` and a content variant with `L25`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayoutId {
    L25,
    L29,
}

impl fmt::Display for LayoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutId::L25 => write!(f, "L25"),
            LayoutId::L29 => write!(f, "L29"),
        }
    }
}

/// A generation brief in the three-bolded-sections convention. On the wire
/// this is a single string of the form:
///
/// ```text
/// **Goal:** ... **Content:** ... **Style:** ...
/// ```
///
/// Fields that do not follow that shape are rejected at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredBrief {
    pub goal: String,
    pub content: String,
    pub style: String,
}

fn brief_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?s)\*\*Goal:?\*\*:?\s*(.*?)\s*\*\*Content:?\*\*:?\s*(.*?)\s*\*\*Style:?\*\*:?\s*(.*)\s*$",
        )
        .expect("brief regex is valid")
    })
}

impl StructuredBrief {
    /// Parse the three-bolded-sections string. Returns `None` when the text
    /// does not carry all three sections in order.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = brief_regex().captures(text.trim())?;
        Some(Self {
            goal: caps[1].trim().to_string(),
            content: caps[2].trim().to_string(),
            style: caps[3].trim().to_string(),
        })
    }
}

impl fmt::Display for StructuredBrief {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "**Goal:** {} **Content:** {} **Style:** {}",
            self.goal, self.content, self.style
        )
    }
}

impl Serialize for StructuredBrief {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for StructuredBrief {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        StructuredBrief::parse(&text).ok_or_else(|| {
            serde::de::Error::custom(
                "brief must contain **Goal**, **Content** and **Style** sections",
            )
        })
    }
}

/// One slide of the draft presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slide {
    pub slide_id: String,
    pub slide_number: u32,
    pub title: String,
    pub narrative: String,
    pub key_points: Vec<String>,
    #[serde(default)]
    pub analytics_needed: Option<StructuredBrief>,
    #[serde(default)]
    pub visuals_needed: Option<StructuredBrief>,
    #[serde(default)]
    pub diagrams_needed: Option<StructuredBrief>,
    #[serde(default)]
    pub tables_needed: Option<StructuredBrief>,
    pub structure_preference: String,
    #[serde(default)]
    pub layout_id: Option<LayoutId>,
    #[serde(default)]
    pub slide_type_classification: Option<String>,
    #[serde(default)]
    pub variant_id: Option<String>,
}

impl Slide {
    /// Canonical id for a 1-based slide number: `slide_001`, `slide_002`, ...
    pub fn id_for_number(number: u32) -> String {
        format!("slide_{:03}", number)
    }

    /// Reassign number and id together, keeping them aligned.
    pub fn renumber(&mut self, number: u32) {
        self.slide_number = number;
        self.slide_id = Slide::id_for_number(number);
    }
}

/// The draft presentation held by a session between the strawman and
/// content-generation stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentationStrawman {
    pub main_title: String,
    pub overall_theme: String,
    pub design_suggestions: String,
    pub target_audience: String,
    pub duration_minutes: u32,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub preview_id: Option<String>,
    pub slides: Vec<Slide>,
}

impl PresentationStrawman {
    /// Audiences whose decks lead with an executive-summary grid on slide 2.
    pub fn has_executive_audience(&self) -> bool {
        let audience = self.target_audience.to_lowercase();
        ["executive", "board", "investor"]
            .iter()
            .any(|tag| audience.contains(tag))
    }

    /// Renumber all slides 1-based and gap-free, ids included.
    pub fn renumber_slides(&mut self) {
        for (idx, slide) in self.slides.iter_mut().enumerate() {
            slide.renumber(idx as u32 + 1);
        }
    }
}
