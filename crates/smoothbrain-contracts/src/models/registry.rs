use indexmap::IndexMap;

use super::profile::{ModelKind, ModelProfile, RenderConstraints};

/// Video models in auto-selection order, best first.
pub const VIDEO_PRIORITY: &[&str] = &[
    "ltx2_distilled",
    "i2v_2_2",
    "ti2v_2_2",
    "i2v",
    "hunyuan_i2v",
    "hunyuan_1_5_i2v",
    "k5_pro_i2v",
];

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelProfile>,
}

impl ModelRegistry {
    pub fn from_profiles(profiles: impl IntoIterator<Item = ModelProfile>) -> Self {
        let mut registry = Self::default();
        for profile in profiles {
            registry.insert(profile);
        }
        registry
    }

    /// Later entries with the same id replace earlier ones but keep their position.
    pub fn insert(&mut self, profile: ModelProfile) {
        self.models.insert(profile.id.clone(), profile);
    }

    pub fn get(&self, id: &str) -> Option<&ModelProfile> {
        self.models.get(id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn by_kind(&self, kind: ModelKind) -> Vec<ModelProfile> {
        self.models
            .values()
            .filter(|model| model.kind == kind)
            .cloned()
            .collect()
    }

    pub fn ensure(&self, id: &str, kind: ModelKind) -> Option<ModelProfile> {
        let model = self.get(id)?;
        if model.kind == kind {
            return Some(model.clone());
        }
        None
    }

    /// Auto-selection: video follows [`VIDEO_PRIORITY`]; image prefers Klein, then Qwen.
    /// Falls back to the first discovered model of the kind.
    pub fn best(&self, kind: ModelKind) -> Option<ModelProfile> {
        let candidates = self.by_kind(kind);
        let picked = match kind {
            ModelKind::Video => VIDEO_PRIORITY
                .iter()
                .find_map(|id| candidates.iter().find(|model| model.id == *id)),
            ModelKind::Image => ["klein", "qwen"].iter().find_map(|needle| {
                candidates.iter().find(|model| {
                    model.id.to_ascii_lowercase().contains(needle)
                        || model.name.to_ascii_lowercase().contains(needle)
                })
            }),
        };
        picked.or_else(|| candidates.first()).cloned()
    }

    /// Constraints for a model id. Unknown ids get family defaults, which are
    /// permissive for anything not recognised, so callers always have something to compute with.
    pub fn constraints_for(&self, id: &str) -> RenderConstraints {
        match self.get(id) {
            Some(profile) => profile.constraints.clone(),
            None => RenderConstraints::for_family(id, ""),
        }
    }
}
