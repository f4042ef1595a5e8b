pub mod config;
pub mod llm;
pub mod pipeline;
pub mod render;
pub mod scanner;
pub mod store;

use smoothbrain_contracts::events::{EventLog, SessionEvent};

pub use config::EngineConfig;
pub use llm::{GenerateRequest, OllamaClient, OllamaStatus, TextGenerator};
pub use pipeline::{PackOutcome, PackRequest, PackSource, StoryPipeline};
pub use render::{
    BatchSummary, CancelToken, DryrunBackend, Orchestrator, RenderBackend, RenderError,
    RenderOutput, RenderProgress, RenderRequest, ShotFailure, ShotOutcome,
};
pub use scanner::{ModelScanner, ScanDiagnostic, ScanReport};
pub use store::{GalleryItem, ProjectStore, ProjectSummary};

/// Event logging is best effort; a full disk must not fail a render.
pub(crate) fn record_event(events: Option<&EventLog>, event: SessionEvent) {
    let Some(log) = events else {
        return;
    };
    if let Err(err) = log.emit(&event) {
        tracing::warn!(error = %err, path = %log.path().display(), "event log write failed");
    }
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
