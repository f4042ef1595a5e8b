use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_TIMEOUT_S: f64 = 120.0;

/// Paths and endpoints the engine works against.
///
/// Built from `SMOOTHBRAIN_*` environment variables, then adjusted with the `with_*` methods.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Host application root holding `defaults/`, `finetunes/`, `ckpts/` and `profiles/`.
    pub app_root: PathBuf,
    pub ollama_url: String,
    /// `None` means detect from the server's installed models.
    pub ollama_model: Option<String>,
    pub ollama_timeout: Duration,
    pub output_root: PathBuf,
    pub projects_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_app_root(".")
    }
}

impl EngineConfig {
    pub fn for_app_root(app_root: impl Into<PathBuf>) -> Self {
        let app_root = app_root.into();
        Self {
            output_root: app_root.join("outputs"),
            projects_root: app_root.join("smooth_brain_projects"),
            app_root,
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            ollama_model: None,
            ollama_timeout: Duration::from_secs_f64(DEFAULT_OLLAMA_TIMEOUT_S),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    /// Same as [`EngineConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let app_root = lookup("SMOOTHBRAIN_APP_ROOT").unwrap_or_else(|| ".".to_string());
        let mut config = Self::for_app_root(app_root);
        if let Some(url) = lookup("SMOOTHBRAIN_OLLAMA_URL") {
            config.ollama_url = url.trim_end_matches('/').to_string();
        }
        config.ollama_model = lookup("SMOOTHBRAIN_OLLAMA_MODEL");
        if let Some(timeout) = lookup("SMOOTHBRAIN_OLLAMA_TIMEOUT_S")
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        {
            config.ollama_timeout = timeout;
        }
        if let Some(root) = lookup("SMOOTHBRAIN_OUTPUT_ROOT") {
            config.output_root = PathBuf::from(root);
        }
        if let Some(root) = lookup("SMOOTHBRAIN_PROJECTS_ROOT") {
            config.projects_root = PathBuf::from(root);
        }
        config
    }

    /// Moves the app root. Output and project roots follow unless they were set explicitly.
    pub fn with_app_root(mut self, app_root: impl Into<PathBuf>) -> Self {
        let moved = Self::for_app_root(app_root);
        if self.output_root == self.app_root.join("outputs") {
            self.output_root = moved.output_root;
        }
        if self.projects_root == self.app_root.join("smooth_brain_projects") {
            self.projects_root = moved.projects_root;
        }
        self.app_root = moved.app_root;
        self
    }

    pub fn with_ollama_url(mut self, url: impl Into<String>) -> Self {
        self.ollama_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_ollama_model(mut self, model: Option<String>) -> Self {
        self.ollama_model = model.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn with_ollama_timeout(mut self, timeout: Duration) -> Self {
        self.ollama_timeout = timeout;
        self
    }

    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    pub fn with_projects_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.projects_root = root.into();
        self
    }

    pub fn defaults_dir(&self) -> PathBuf {
        self.app_root.join("defaults")
    }

    pub fn finetunes_dir(&self) -> PathBuf {
        self.app_root.join("finetunes")
    }

    pub fn ckpts_dir(&self) -> PathBuf {
        self.app_root.join("ckpts")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.app_root.join("profiles")
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_hang_off_app_root() {
        let config = EngineConfig::from_lookup(lookup(&[("SMOOTHBRAIN_APP_ROOT", "/opt/wan")]));
        assert_eq!(config.output_root, PathBuf::from("/opt/wan/outputs"));
        assert_eq!(
            config.projects_root,
            PathBuf::from("/opt/wan/smooth_brain_projects")
        );
        assert_eq!(config.defaults_dir(), PathBuf::from("/opt/wan/defaults"));
        assert_eq!(config.ollama_url, DEFAULT_OLLAMA_URL);
        assert_eq!(config.ollama_timeout, Duration::from_secs(120));
        assert!(config.ollama_model.is_none());
    }

    #[test]
    fn overrides_are_applied_and_bad_timeouts_ignored() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("SMOOTHBRAIN_OLLAMA_URL", "http://gpu-box:11434/"),
            ("SMOOTHBRAIN_OLLAMA_MODEL", "llama3.2:3b"),
            ("SMOOTHBRAIN_OLLAMA_TIMEOUT_S", "-4"),
            ("SMOOTHBRAIN_OUTPUT_ROOT", "/scratch/out"),
        ]));
        assert_eq!(config.ollama_url, "http://gpu-box:11434");
        assert_eq!(config.ollama_model.as_deref(), Some("llama3.2:3b"));
        assert_eq!(config.ollama_timeout, Duration::from_secs(120));
        assert_eq!(config.output_root, PathBuf::from("/scratch/out"));

        let config = EngineConfig::from_lookup(lookup(&[("SMOOTHBRAIN_OLLAMA_TIMEOUT_S", "2.5")]));
        assert_eq!(config.ollama_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn huge_timeout_keeps_the_default() {
        for raw in ["1e30", "inf", "NaN"] {
            let config = EngineConfig::from_lookup(lookup(&[("SMOOTHBRAIN_OLLAMA_TIMEOUT_S", raw)]));
            assert_eq!(config.ollama_timeout, Duration::from_secs(120), "{raw}");
        }
    }

    #[test]
    fn moving_the_app_root_keeps_explicit_roots() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("SMOOTHBRAIN_APP_ROOT", "/opt/wan"),
            ("SMOOTHBRAIN_OUTPUT_ROOT", "/scratch/out"),
        ]))
        .with_app_root("/srv/wan");
        assert_eq!(config.output_root, PathBuf::from("/scratch/out"));
        assert_eq!(config.projects_root, PathBuf::from("/srv/wan/smooth_brain_projects"));
        assert_eq!(config.ckpts_dir(), PathBuf::from("/srv/wan/ckpts"));
    }
}
