mod guides;
mod templates;

use serde::{Deserialize, Serialize};

pub use guides::{
    format_guide_for_system_prompt, guide_for, PromptGuide, AUDIO_MARKER, GUIDE_REGISTRY,
};
pub use templates::{
    fallback_records, fill_beat, pick_template, template_for, StoryTemplate, ALL_GENRES,
    DEFAULT_SUBJECT, TEMPLATES,
};

/// One packed beat as exchanged with the host UI and the generation server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShotRecord {
    pub prompt: String,
    pub shot_label: String,
    #[serde(rename = "imagePrompt")]
    pub image_prompt: String,
    #[serde(rename = "videoPrompt")]
    pub video_prompt: String,
}

impl ShotRecord {
    /// Record whose per-model prompts are the base prompt, pending refinement.
    pub fn uniform(prompt: impl Into<String>, shot_label: impl Into<String>) -> Self {
        let prompt = prompt.into();
        Self {
            image_prompt: prompt.clone(),
            video_prompt: prompt.clone(),
            prompt,
            shot_label: shot_label.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn record_uses_host_field_names() -> anyhow::Result<()> {
        let record = ShotRecord::uniform("wide shot", "Shot 1");
        let value = serde_json::to_value(&record)?;
        assert_eq!(
            value,
            json!({
                "prompt": "wide shot",
                "shot_label": "Shot 1",
                "imagePrompt": "wide shot",
                "videoPrompt": "wide shot",
            })
        );
        Ok(())
    }
}
