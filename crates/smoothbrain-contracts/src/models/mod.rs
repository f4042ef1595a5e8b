mod overrides;
mod profile;
mod registry;
mod resolution;
mod selectors;

pub use overrides::{has_speed_overrides, image_model_overrides, image_reference_overrides};
pub use profile::{
    is_ltx_family, requires_audio_intent, ModelKind, ModelProfile, ModelSource,
    RenderConstraints, SpeedProfile, SpeedTier, CAP_AUDIO_INTENT, CAP_IMAGE_TO_VIDEO,
    CAP_REFERENCE_IMAGES, DEFAULT_FPS,
};
pub use registry::{ModelRegistry, VIDEO_PRIORITY};
pub use resolution::{parse_dims, ResolutionTier, Vibe};
pub use selectors::{ModelSelection, ModelSelector};

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str, name: &str, kind: ModelKind) -> ModelProfile {
        ModelProfile {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            architecture: id.to_string(),
            source: ModelSource::Default,
            description: String::new(),
            speed_tier: SpeedTier::Standard,
            speed_profiles: Vec::new(),
            constraints: RenderConstraints::for_family(id, id),
            capabilities: Vec::new(),
        }
    }

    #[test]
    fn model_selector_falls_back_when_requested_model_unavailable() {
        let registry = ModelRegistry::from_profiles([model("i2v", "Wan i2v", ModelKind::Video)]);
        let selection = ModelSelector::new(Some(registry))
            .select(Some("missing"), ModelKind::Video)
            .unwrap();
        assert_eq!(selection.model.id, "i2v");
        assert_eq!(selection.requested.as_deref(), Some("missing"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Requested model 'missing' is not an installed video model.")
        );
    }

    #[test]
    fn model_selector_rejects_model_of_wrong_kind() {
        let registry = ModelRegistry::from_profiles([
            model("flux2_klein_4b", "FLUX.2 Klein", ModelKind::Image),
            model("i2v", "Wan i2v", ModelKind::Video),
        ]);
        let selection = ModelSelector::new(Some(registry))
            .select(Some("flux2_klein_4b"), ModelKind::Video)
            .unwrap();
        assert_eq!(selection.model.id, "i2v");
        assert!(selection.fallback_reason.is_some());
    }

    #[test]
    fn model_selector_errors_when_nothing_installed() {
        let registry = ModelRegistry::from_profiles([model("i2v", "Wan", ModelKind::Video)]);
        let err = ModelSelector::new(Some(registry))
            .select(None, ModelKind::Image)
            .err()
            .unwrap_or_default();
        assert_eq!(err, "No installed image models.");
    }

    #[test]
    fn best_video_follows_priority_list() {
        let registry = ModelRegistry::from_profiles([
            model("hunyuan_i2v", "Hunyuan", ModelKind::Video),
            model("i2v_2_2", "Wan 2.2", ModelKind::Video),
            model("ltx2_distilled", "LTX-2 Distilled", ModelKind::Video),
        ]);
        assert_eq!(
            registry.best(ModelKind::Video).map(|m| m.id),
            Some("ltx2_distilled".to_string())
        );
    }

    #[test]
    fn best_image_prefers_klein_then_qwen_then_first() {
        let registry = ModelRegistry::from_profiles([
            model("flux_dev", "Flux Dev", ModelKind::Image),
            model("qwen_image_20B", "Qwen Image", ModelKind::Image),
            model("flux2_klein_4b", "FLUX.2 [klein] 4B", ModelKind::Image),
        ]);
        assert_eq!(
            registry.best(ModelKind::Image).map(|m| m.id),
            Some("flux2_klein_4b".to_string())
        );

        let registry = ModelRegistry::from_profiles([
            model("flux_dev", "Flux Dev", ModelKind::Image),
            model("qwen_image_20B", "Qwen Image", ModelKind::Image),
        ]);
        assert_eq!(
            registry.best(ModelKind::Image).map(|m| m.id),
            Some("qwen_image_20B".to_string())
        );

        let registry = ModelRegistry::from_profiles([model("flux_dev", "Flux", ModelKind::Image)]);
        assert_eq!(
            registry.best(ModelKind::Image).map(|m| m.id),
            Some("flux_dev".to_string())
        );
    }

    #[test]
    fn unknown_model_constraints_are_permissive() {
        let registry = ModelRegistry::default();
        assert_eq!(
            registry.constraints_for("who_knows"),
            RenderConstraints::permissive()
        );
        assert_eq!(
            registry.constraints_for("ltx2_custom"),
            RenderConstraints::ltx()
        );
    }
}
