use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::ModelKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    #[default]
    Pending,
    Approved,
    Rejected,
}

/// One narrative beat. `index` is 1-based and always equals the shot's position in the project.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Shot {
    pub index: u32,
    pub label: String,
    /// The beat as written by the pack step, before any model-specific rewrite.
    pub prompt: String,
    pub image_prompt: String,
    pub video_prompt: String,
    /// Review of the still. Gates the video pass.
    pub approval: ApprovalState,
    pub video_approval: ApprovalState,
    pub image_path: Option<PathBuf>,
    pub video_path: Option<PathBuf>,
    /// Seconds; `None` means the project's export duration.
    pub duration: Option<f64>,
    /// `None` lets the backend pick a random seed.
    pub seed: Option<i64>,
    pub reference_image: Option<PathBuf>,
}

impl Shot {
    pub fn prompt_for(&self, kind: ModelKind) -> &str {
        let specific = match kind {
            ModelKind::Image => self.image_prompt.trim(),
            ModelKind::Video => self.video_prompt.trim(),
        };
        if specific.is_empty() {
            self.prompt.trim()
        } else {
            specific
        }
    }

    pub fn set_artifact(&mut self, kind: ModelKind, path: Option<PathBuf>) {
        match kind {
            ModelKind::Image => self.image_path = path,
            ModelKind::Video => self.video_path = path,
        }
    }

    pub fn review(&self, kind: ModelKind) -> ApprovalState {
        match kind {
            ModelKind::Image => self.approval,
            ModelKind::Video => self.video_approval,
        }
    }

    pub fn set_review(&mut self, kind: ModelKind, state: ApprovalState) {
        match kind {
            ModelKind::Image => self.approval = state,
            ModelKind::Video => self.video_approval = state,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.approval == ApprovalState::Approved
    }
}
