use crate::server::registry::Registry;

/// Persona shared by every dialog prompt.
const PERSONA: &str = "You are Director, an assistant that builds slide decks \
through a short structured conversation.";

pub fn greeting_system() -> String {
    format!(
        "{PERSONA}\nGreet the user warmly in two sentences and ask what \
         presentation they would like to build. Do not list capabilities."
    )
}

pub fn clarifying_system() -> String {
    format!(
        "{PERSONA}\nThe user has named a topic. Ask 3 to 5 short clarifying \
         questions about audience, duration, tone and emphasis. Number the \
         questions. Ask nothing else."
    )
}

pub fn plan_system() -> String {
    format!(
        "{PERSONA}\nSummarize what you will build as a short confirmation \
         plan: the deck's goal, audience, approximate slide count and the \
         main sections. Keep it under 120 words. Do not produce slides yet."
    )
}

/// System prompt for strawman generation. The structure vocabulary comes
/// from the registry so every slide's `structure_preference` lands on a
/// classifiable keyword.
pub fn strawman_system(registry: &Registry) -> String {
    let vocabulary: Vec<String> = registry
        .variants_by_priority()
        .iter()
        .map(|(_, v)| {
            format!(
                "- {} (keywords: {})",
                v.variant_id,
                v.classification.keywords.join(", ")
            )
        })
        .collect();

    format!(
        "{PERSONA}\nProduce the full outline of the deck as strict JSON, no \
         markdown fences, matching:\n\
         {{\"main_title\": str, \"overall_theme\": str, \"design_suggestions\": str, \
         \"target_audience\": str, \"duration_minutes\": int, \"slides\": [{{\
         \"title\": str, \"narrative\": str, \"key_points\": [str], \
         \"structure_preference\": str, \"analytics_needed\": str|null, \
         \"visuals_needed\": str|null, \"diagrams_needed\": str|null, \
         \"tables_needed\": str|null}}]}}\n\
         Rules:\n\
         - key_points: 3 to 6 entries, each a short topical phrase.\n\
         - structure_preference MUST contain at least one keyword from the \
           structure vocabulary below.\n\
         - The four *_needed fields are null, or a string with exactly three \
           bolded sections: **Goal:** ... **Content:** ... **Style:** ...\n\
         - Slides that belong to one section may mark it with \
           **[GROUP: name]** inside the narrative.\n\
         Structure vocabulary:\n{}",
        vocabulary.join("\n")
    )
}

/// System prompt for refinement. The model returns operations, not a new
/// deck.
pub fn refinement_system() -> String {
    format!(
        "{PERSONA}\nThe user wants changes to the outline below. Respond with \
         strict JSON, no markdown fences, matching:\n\
         {{\"summary\": str, \"operations\": [op]}}\n\
         where each op is one of:\n\
         {{\"op\": \"UPDATE\", \"slide_number\": int, \"title\"?: str, \
         \"narrative\"?: str, \"key_points\"?: [str], \
         \"structure_preference\"?: str}}\n\
         {{\"op\": \"CREATE\", \"position\"?: int, \"slide\": {{slide fields as \
         in the outline}}}}\n\
         {{\"op\": \"DELETE\", \"slide_number\": int}}\n\
         {{\"op\": \"VARIANT_OVERRIDE\", \"slide_number\": int, \
         \"variant_id\"?: str, \"structure_preference\"?: str}}\n\
         Use VARIANT_OVERRIDE when the user asks for a specific visual form \
         on a specific slide. Touch only the slides the user mentioned."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strawman_system_lists_registry_vocabulary() {
        let registry =
            Registry::from_str(include_str!("../../../../config/taxonomy.json")).unwrap();
        let system = strawman_system(&registry);
        assert!(system.contains("matrix_2x2"));
        assert!(system.contains("single_column"));
        assert!(system.contains("**Goal:**"));
    }
}
