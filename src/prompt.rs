use crate::models::{Language, ProductDraft, Style};

/// Sent as its own part on every image edit so the product itself is never redrawn.
pub const IDENTITY_PRESERVATION: &str = "KEEP THE MAIN OBJECT EXACTLY AS IT IS. Do not change the product's shape, colors, logo, text or details. Only replace the background, surface and lighting around it.";

pub const VIDEO_PROMPT: &str = "Cinematic slow pan of the product, luxury showcase, 4k, highly detailed, commercial style.";

const CUSTOM_FALLBACK_SCENE: &str = "professional product photography";
const BRANDING_CLAUSE: &str = "Keep all branding, logos and printed text on the product sharp and legible.";

pub fn style_narrative(style: Style) -> Option<&'static str> {
    match style {
        Style::Studio => Some("a professional white studio podium with soft studio lighting and a subtle reflection. Clean, commercial product photography."),
        Style::Lifestyle => Some("a real-world lifestyle setting appropriate for the product (e.g., on a wooden table, in a living room, or being used). Natural lighting, depth of field."),
        Style::Outdoor => Some("an outdoor setting with natural sunlight, perhaps a garden, street, or nature background depending on the item."),
        Style::Luxury => Some("a high-end luxury setting with dark marble textures, gold accents, and dramatic cinematic lighting."),
        Style::Custom => None,
    }
}

/// Builds the image-edit instruction. Pure: identical inputs always give the identical string.
pub fn construct_gen_prompt(description: &str, style: Style, modifier: &str) -> String {
    let description = description.trim();
    let modifier = modifier.trim();
    let subject = if description.is_empty() { "the product" } else { description };

    match style_narrative(style) {
        None => {
            let scene = if modifier.is_empty() { CUSTOM_FALLBACK_SCENE } else { modifier };
            format!(
                "Create a professional product image of {subject}. KEEP THE MAIN OBJECT EXACTLY AS IT IS. Place the object in {scene}. Seamless composite, photorealistic, 8k. {BRANDING_CLAUSE}"
            )
        }
        Some(narrative) => {
            let effects = if modifier.is_empty() {
                String::new()
            } else {
                format!(" Additional effects: {modifier}.")
            };
            format!(
                "Create a professional product image of {subject}. KEEP THE MAIN OBJECT EXACTLY AS IT IS. Do not change the product's shape, logo, or details. Seamless composite, photorealistic, 8k. Place the object in {narrative}{effects} {BRANDING_CLAUSE}"
            )
        }
    }
}

pub fn build_refine_prompt(draft: &ProductDraft, lang: Language) -> String {
    format!(
        "You are an expert e-commerce copywriter.\n\
        I have a product image and some basic details provided by the user.\n\n\
        User's Title: \"{}\"\n\
        User's Description: \"{}\"\n\
        User's Category: \"{}\"\n\n\
        Your task:\n\
        1. Improve the 'title' to be more catchy and SEO friendly.\n\
        2. Improve the 'description' to be persuasive, highlighting features visible in the image that the user might have missed. Keep it concise.\n\
        3. Generate exactly 5 relevant 'tags' for search.\n\
        4. Confirm or correct the 'category'.\n\n\
        Output {}.\n\
        IMPORTANT: Return strictly pure JSON. Do not wrap in markdown code blocks.",
        draft.title,
        draft.description,
        draft.category,
        lang.instruction()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn studio_prompt_has_narrative_and_no_effects() {
        let prompt = construct_gen_prompt("red leather wallet", Style::Studio, "");
        assert!(prompt.contains("red leather wallet"));
        assert!(prompt.contains(style_narrative(Style::Studio).unwrap()));
        assert!(!prompt.to_lowercase().contains("additional effects"));
        assert!(prompt.ends_with(BRANDING_CLAUSE));
    }

    #[test]
    fn modifier_becomes_effects_clause_for_presets() {
        let prompt = construct_gen_prompt("desk lamp", Style::Outdoor, "  light rain ");
        assert!(prompt.contains("Additional effects: light rain."));
        assert!(prompt.contains(style_narrative(Style::Outdoor).unwrap()));
    }

    #[test]
    fn custom_prompt_embeds_modifier_without_presets() {
        let prompt = construct_gen_prompt("sneakers", Style::Custom, "floating in space");
        assert!(prompt.contains("floating in space"));
        for style in [Style::Studio, Style::Lifestyle, Style::Outdoor, Style::Luxury] {
            assert!(!prompt.contains(style_narrative(style).unwrap()));
        }
        assert!(!prompt.contains("Additional effects"));
    }

    #[test]
    fn custom_without_modifier_falls_back() {
        let prompt = construct_gen_prompt("sneakers", Style::Custom, "   ");
        assert!(prompt.contains(CUSTOM_FALLBACK_SCENE));
    }

    #[test]
    fn deterministic() {
        for style in Style::ALL {
            assert_eq!(
                construct_gen_prompt("vintage camera", style, "warm tones"),
                construct_gen_prompt("vintage camera", style, "warm tones")
            );
        }
    }

    #[test]
    fn refine_prompt_carries_draft_and_language() {
        let draft = ProductDraft {
            title: "Lamp".into(),
            description: "brass desk lamp".into(),
            price: 50.0,
            category: "Home".into(),
            tags: vec![],
        };
        let prompt = build_refine_prompt(&draft, Language::Ar);
        assert!(prompt.contains("User's Title: \"Lamp\""));
        assert!(prompt.contains("brass desk lamp"));
        assert!(prompt.contains("Tunisian Arabic"));
    }
}
