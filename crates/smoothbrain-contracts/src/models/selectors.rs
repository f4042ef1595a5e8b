use super::profile::{ModelKind, ModelProfile};
use super::registry::ModelRegistry;

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSelection {
    pub model: ModelProfile,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        kind: ModelKind,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            if let Some(model) = self.registry.ensure(requested_value, kind) {
                return Ok(ModelSelection {
                    model,
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            }
            (
                Some(format!(
                    "Requested model '{requested_value}' is not an installed {kind} model."
                )),
                Some(requested_value.to_string()),
            )
        } else {
            (Some(format!("No {kind} model specified; using best installed.")), None)
        };

        let Some(model) = self.registry.best(kind) else {
            return Err(format!("No installed {kind} models."));
        };
        Ok(ModelSelection {
            model,
            requested: requested_text,
            fallback_reason,
        })
    }
}
