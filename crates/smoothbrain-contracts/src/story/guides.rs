use crate::models::CAP_AUDIO_INTENT;

/// Sentence marker the audio-intent family reads its soundtrack from.
pub const AUDIO_MARKER: &str = "Audio:";

/// Style rules injected into the generation-server system prompt for one model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptGuide {
    pub family: &'static str,
    pub syntax: &'static str,
    pub keywords: &'static str,
    pub negative: &'static str,
    pub mistakes: &'static str,
    pub examples: &'static str,
    pub audio: Option<&'static str>,
}

impl PromptGuide {
    /// Capability flags implied by the guide.
    pub fn capabilities(&self) -> Vec<String> {
        let mut caps = Vec::new();
        if self.audio.is_some() {
            caps.push(CAP_AUDIO_INTENT.to_string());
        }
        caps
    }
}

pub const WAN_GUIDE: PromptGuide = PromptGuide {
    family: "Wan 2.1 / 2.2",
    syntax: "Write descriptive prose, not keyword lists. Lead with camera motion, then subject \
action, then environment. Close on lighting and atmosphere. Separate clauses with commas.",
    keywords: "Camera: 'smooth tracking shot', 'slow dolly in', 'aerial wide', 'handheld close-up'\n\
Motion: 'fluid', 'dynamic', 'subtle sway', 'crisp motion'\n\
Quality: 'cinematic', 'photorealistic', 'film grain', 'shallow DOF'\n\
Lighting: 'golden hour', 'volumetric light', 'soft diffused light', 'dramatic backlighting'",
    negative: "low quality, blurry, static, watermark, text overlay, deformed limbs, cartoon",
    mistakes: "Keyword dumps: write sentences instead.\n\
Post-processing terms such as 'color graded': describe the scene itself.\n\
'ultra-realistic' or 'masterpiece': these lower quality on this family.",
    examples: "BASIC: 'a woman walks in a park'\n\
ENHANCED: 'A smooth tracking shot follows a woman strolling through a sunlit park, autumn leaves \
drifting around her feet, golden afternoon light filtering through the trees.'",
    audio: None,
};

pub const LTX2_GUIDE: PromptGuide = PromptGuide {
    family: "LTX-2",
    syntax: "Use long flowing sentences that describe the whole scene in one breath: subject, \
action, camera motion, environment and light. Finish every prompt with 'Audio: ...' because this \
model renders sound from the text.",
    keywords: "Camera: 'steadycam', 'slow push in', 'arc shot', 'overhead crane'\n\
Motion: 'graceful', 'measured pace', 'deliberate movement'\n\
Environment: texture, depth, distance\n\
Light: 'dappled', 'low-key', 'high-contrast rim light', 'soft ambient'",
    negative: "abrupt cuts, fast motion, pixel artifacts, unnatural movement, static",
    mistakes: "Leaving out the closing 'Audio: ...' sentence yields random music.\n\
Clips shorter than 17 frames; lengths must be 8n+1 frames.\n\
Very rapid motion; this family prefers smooth cinematic pacing.",
    examples: "BASIC: 'make the woman walk down the street'\n\
ENHANCED: 'The camera follows the subject from behind in a smooth steadycam move as she walks \
away from the lens at a measured pace, shadows stretching across the pavement while leaves rustle \
in the wind. Audio: steady footsteps on pavement, distant city hum, soft ambient score.'",
    audio: Some(
        "This model renders a full soundtrack from the prompt. The final sentence of every video \
prompt must be 'Audio: <description>'.\n\
Rules:\n\
- Diegetic sounds first: footsteps, wind, crowd, machinery, rain.\n\
- Then the music mood: 'soft ambient score', 'tense strings', 'no music, silence'.\n\
- Under 20 words.\n\
- Quiet scenes: 'Audio: near silence, distant traffic hum, no music.'\n\
Examples:\n\
  Action: 'Audio: rapid footsteps on concrete, engine roar, tense orchestral strings.'\n\
  Nature: 'Audio: birdsong, rustling leaves, gentle stream, peaceful ambient score.'\n\
  Horror: 'Audio: near silence, slow heartbeat, distant creak, no music.'",
    ),
};

pub const HUNYUAN_GUIDE: PromptGuide = PromptGuide {
    family: "HunyuanVideo",
    syntax: "Detailed descriptive prose. Subject first, then action, then environment, with \
lighting, mood and camera motion. Stay under 200 words.",
    keywords: "Camera: 'cinematic pan', 'close-up reveal', 'wide establishing'\n\
Quality: 'high detail', 'photorealistic', 'professional photography'\n\
Lighting: 'natural light', 'studio lighting', 'cinematic mood'",
    negative: "low quality, deformed, blurry, watermark, text, oversaturated",
    mistakes: "Over-specifying; the model has strong defaults.\n\
Conflicting lighting descriptions.",
    examples: "BASIC: 'a man in a suit'\n\
ENHANCED: 'A man in a tailored charcoal suit stands in a softly lit office, light through \
venetian blinds laying parallel shadows across his face.'",
    audio: None,
};

pub const FLUX2_GUIDE: PromptGuide = PromptGuide {
    family: "FLUX.2",
    syntax: "Natural, novelist-style prose rather than comma-separated tags. Weight syntax such as \
(keyword:1.2) is not supported. Front-load what matters: subject, action, style, setting, \
lighting, atmosphere. HEX colour codes work for exact colours. This is a still-image model, so \
leave out anything temporal.",
    keywords: "Photo style: 'shot on Sony A7IV', 'clean sharp', 'high dynamic range'\n\
Vintage: '80s vintage photo', '2000s digicam', 'Kodak Portra 400'\n\
Art: 'isometric 3D cartoon', 'flat illustration', 'art deco'\n\
Lighting: golden hour, volumetric lighting, studio softbox, rim light, chiaroscuro\n\
Composition: rule of thirds, centered, shallow DOF, bokeh, macro lens, wide angle, telephoto",
    negative: "Negative prompts are not supported. Describe what should be there: 'sharp focus \
throughout' instead of 'no blur'.",
    mistakes: "Tag lists instead of sentences.\n\
Mixing conflicting styles such as photorealistic and watercolor.\n\
Skipping the light source.\n\
Weight syntax like (keyword:1.2).",
    examples: "BASIC: 'portrait of an old man'\n\
ENHANCED: 'A weathered fisherman in his late sixties stands at the bow of a small wooden boat in a \
salt-stained wool sweater, hands gripping frayed rope, golden hour sun filtering through morning \
mist, documentary style, shot on 35mm film.'",
    audio: None,
};

pub const FLUX1_GUIDE: PromptGuide = PromptGuide {
    family: "Flux.1",
    syntax: "Natural descriptive sentences, no tag soup and no weight syntax. Structure as subject, \
action, style, context; layering foreground, middle ground and background works well. No \
politeness markers. This is a still-image model, so leave out anything temporal.",
    keywords: "Style: photorealistic, cinematic, 3D render, anime, film grain\n\
Lighting: golden hour, window light, studio lighting, rim light, volumetric\n\
Motion in stills: motion blur, dynamic pose, frozen in time\n\
Composition: close-up, wide angle, low angle, shallow DOF, bokeh, rule of thirds",
    negative: "Negative prompts are ignored. Say 'clear sky' rather than 'no clouds'.",
    mistakes: "Quality tag stuffing such as 'masterpiece, best quality, 8k'.\n\
'white background', which blurs results; use 'studio background'.\n\
No texture words ('pores', 'grain'), which looks plastic.",
    examples: "BASIC: 'a cat walking through a garden'\n\
ENHANCED: 'A black cat stalking through tall grass in a lush garden, low angle, shallow depth of \
field, golden hour light, cinematic wildlife photography.'",
    audio: None,
};

/// Guide lookup table in match order; prefix matching walks it top to bottom.
pub const GUIDE_REGISTRY: &[(&str, &PromptGuide)] = &[
    ("t2v", &WAN_GUIDE),
    ("i2v", &WAN_GUIDE),
    ("t2v_1.3B", &WAN_GUIDE),
    ("i2v_2_2", &WAN_GUIDE),
    ("ti2v_2_2", &WAN_GUIDE),
    ("t2v_2_2", &WAN_GUIDE),
    ("ltx2", &LTX2_GUIDE),
    ("ltx2_distilled", &LTX2_GUIDE),
    ("ltx2_19B", &LTX2_GUIDE),
    ("ltxv_13B", &LTX2_GUIDE),
    ("hunyuan_1_5_t2v", &HUNYUAN_GUIDE),
    ("hunyuan_1_5_i2v", &HUNYUAN_GUIDE),
    ("hunyuan", &HUNYUAN_GUIDE),
    ("hunyuan_i2v", &HUNYUAN_GUIDE),
    ("flux2_dev", &FLUX2_GUIDE),
    ("flux2_klein_4b", &FLUX2_GUIDE),
    ("flux2_klein_9b", &FLUX2_GUIDE),
    ("flux", &FLUX1_GUIDE),
    ("flux_schnell", &FLUX1_GUIDE),
    ("flux_dev_kontext", &FLUX1_GUIDE),
];

pub fn guide_for(model_id: &str) -> Option<&'static PromptGuide> {
    let model_id = model_id.trim();
    if model_id.is_empty() {
        return None;
    }
    GUIDE_REGISTRY
        .iter()
        .find(|(id, _)| *id == model_id)
        .or_else(|| GUIDE_REGISTRY.iter().find(|(id, _)| model_id.starts_with(id)))
        .map(|(_, guide)| *guide)
}

/// System-prompt section for `model_id`, or an empty string when no guide applies.
pub fn format_guide_for_system_prompt(model_id: &str) -> String {
    let Some(guide) = guide_for(model_id) else {
        return String::new();
    };
    let mut out = format!(
        "=== MODEL-SPECIFIC PROMPTING GUIDE ({}) ===\n\
Follow these rules when enhancing prompts for this model:\n\n\
SYNTAX:\n{}\n\n\
HIGH-IMPACT KEYWORDS (use these when appropriate):\n{}\n\n\
NEGATIVE PROMPT GUIDANCE:\n{}\n\n\
MISTAKES TO AVOID:\n{}\n\n\
EXAMPLE TRANSFORMATIONS (mimic this style):\n{}",
        guide.family, guide.syntax, guide.keywords, guide.negative, guide.mistakes, guide.examples
    );
    if let Some(audio) = guide.audio {
        out.push_str("\n\nAUDIO GENERATION (MANDATORY for this model):\n");
        out.push_str(audio);
    }
    out.push_str("\n=== END MODEL GUIDE ===");
    if guide.audio.is_some() {
        out.push_str(&format!(
            "\nCRITICAL: This model generates audio from the text prompt. \
Every videoPrompt MUST end with '{AUDIO_MARKER} ...' describing the soundscape."
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_prefers_exact_then_prefix() {
        assert_eq!(guide_for("hunyuan_i2v").map(|g| g.family), Some("HunyuanVideo"));
        assert_eq!(guide_for("ltx2_custom_build").map(|g| g.family), Some("LTX-2"));
        assert_eq!(guide_for("flux2_klein_9b").map(|g| g.family), Some("FLUX.2"));
        assert_eq!(guide_for("flux_krea").map(|g| g.family), Some("Flux.1"));
        assert!(guide_for("").is_none());
        assert!(guide_for("k5_pro_i2v").is_none());
    }

    #[test]
    fn audio_family_section_carries_marker() {
        let section = format_guide_for_system_prompt("ltx2_distilled");
        assert!(section.starts_with("=== MODEL-SPECIFIC PROMPTING GUIDE (LTX-2) ==="));
        assert!(section.contains("AUDIO GENERATION"));
        assert!(section.ends_with("describing the soundscape."));
        assert_eq!(LTX2_GUIDE.capabilities(), vec![CAP_AUDIO_INTENT.to_string()]);

        let wan = format_guide_for_system_prompt("i2v_2_2");
        assert!(!wan.contains("AUDIO GENERATION"));
        assert!(wan.ends_with("=== END MODEL GUIDE ==="));
        assert_eq!(format_guide_for_system_prompt("unknown"), "");
    }
}
