use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::truncate_text;

pub const DEFAULT_MODEL: &str = "qwen2.5:3b";
/// Small instruction-tuned models that storyboard well, best first.
pub const PREFERRED_MODELS: &[&str] = &[
    "qwen2.5:3b",
    "qwen2.5:7b",
    "qwen2.5:1.5b",
    "qwen2.5:14b",
    "llama3.2:3b",
    "llama3.2:1b",
    "llama3.1:8b",
    "gemma2:2b",
    "gemma2:9b",
    "gemma3:4b",
    "phi3:3.8b",
    "mistral:7b",
];
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// The generation-server seam. One call, one answer; callers own any fallback.
pub trait TextGenerator: Send {
    fn name(&self) -> &str;
    fn is_online(&self) -> bool;
    fn generate(&self, request: &GenerateRequest) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OllamaStatus {
    pub online: bool,
    pub model_ready: bool,
    pub active_model: Option<String>,
    pub models: Vec<String>,
    pub error: Option<String>,
}

/// Blocking client for a local Ollama server.
pub struct OllamaClient {
    base_url: String,
    http: HttpClient,
    probe: HttpClient,
    configured_model: Option<String>,
    detected_model: Mutex<Option<String>>,
}

impl OllamaClient {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.ollama_timeout)
            .build()
            .context("failed to build generation-server HTTP client")?;
        let probe = HttpClient::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .context("failed to build generation-server probe client")?;
        Ok(Self {
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            http,
            probe,
            configured_model: config.ollama_model.clone(),
            detected_model: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .probe
            .get(self.endpoint("/api/tags"))
            .send()
            .context("generation server unreachable")?;
        let payload = response_json_or_error("ollama", response)?;
        Ok(parse_tag_names(&payload))
    }

    pub fn detect_model(&self) -> Option<String> {
        let models = self.list_models().ok()?;
        pick_preferred_model(&models)
    }

    /// Configured model, else the cached detection, else a fresh detection, else the default.
    pub fn model_name(&self) -> String {
        if let Some(model) = &self.configured_model {
            return model.clone();
        }
        if let Some(model) = self.cached_model() {
            return model;
        }
        match self.detect_model() {
            Some(model) => {
                info!(model = %model, "detected generation model");
                self.store_cached_model(Some(model.clone()));
                model
            }
            None => DEFAULT_MODEL.to_string(),
        }
    }

    fn cached_model(&self) -> Option<String> {
        self.detected_model
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }

    fn store_cached_model(&self, model: Option<String>) {
        if let Ok(mut guard) = self.detected_model.lock() {
            *guard = model;
        }
    }

    /// Reachability, installed models and the model `generate` would use. Refreshes the cache.
    pub fn status(&self) -> OllamaStatus {
        match self.list_models() {
            Ok(models) => {
                let detected = pick_preferred_model(&models);
                self.store_cached_model(detected.clone());
                let active = self
                    .configured_model
                    .clone()
                    .or(detected)
                    .unwrap_or_else(|| DEFAULT_MODEL.to_string());
                OllamaStatus {
                    online: true,
                    model_ready: !models.is_empty(),
                    active_model: Some(active),
                    models,
                    error: None,
                }
            }
            Err(err) => OllamaStatus {
                online: false,
                model_ready: false,
                active_model: None,
                models: Vec::new(),
                error: Some(format!("{err:#}")),
            },
        }
    }
}

impl TextGenerator for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    fn is_online(&self) -> bool {
        match self.probe.get(self.endpoint("/api/tags")).send() {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(error = %err, "generation server probe failed");
                false
            }
        }
    }

    fn generate(&self, request: &GenerateRequest) -> Result<String> {
        let model = self.model_name();
        let payload = json!({
            "model": model,
            "prompt": request.prompt,
            "system": request.system,
            "stream": false,
            "keep_alive": 0,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });
        let response = self
            .http
            .post(self.endpoint("/api/generate"))
            .json(&payload)
            .send()
            .with_context(|| format!("generation request to {model} failed"))?;
        let body = response_json_or_error("ollama", response)?;
        match body.get("response").and_then(Value::as_str) {
            Some(text) => Ok(text.to_string()),
            None => bail!("ollama reply has no `response` text"),
        }
    }
}

pub fn parse_tag_names(payload: &Value) -> Vec<String> {
    payload
        .get("models")
        .and_then(Value::as_array)
        .map(|models| {
            models
                .iter()
                .filter_map(|model| model.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// First preference satisfied by an installed model: exact, `:latest`, or same base name.
pub fn pick_preferred_model(installed: &[String]) -> Option<String> {
    PREFERRED_MODELS.iter().find_map(|preferred| {
        let base = preferred.split(':').next().unwrap_or(*preferred);
        let latest = format!("{preferred}:latest");
        installed
            .iter()
            .find(|name| name.as_str() == *preferred || **name == latest || name.starts_with(base))
            .cloned()
    })
}

fn response_json_or_error(service: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{service} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{service} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{service} returned invalid JSON payload"))?;
    Ok(parsed)
}
