use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use image::{Rgb, RgbImage};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use smoothbrain_contracts::events::{EventLog, SessionEvent};
use smoothbrain_contracts::models::{
    image_model_overrides, image_reference_overrides, parse_dims, ModelKind, ModelRegistry,
    CAP_IMAGE_TO_VIDEO,
};
use smoothbrain_contracts::project::{ApprovalState, Project, Shot};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::ProjectStore;
use crate::{record_event, truncate_text};

const MAX_ERROR_CHARS: usize = 400;
/// Longest edge of a dryrun still. Keeps placeholder files small at 1080p.
const DRYRUN_MAX_EDGE: u32 = 256;

/// Per-batch stop signal. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Everything a backend needs for one shot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderRequest {
    pub batch_id: String,
    pub shot_index: u32,
    pub kind: ModelKind,
    pub model: String,
    pub prompt: String,
    /// `WxH`.
    pub resolution: String,
    /// Video only, already valid for the model's frame rule.
    pub frames: Option<u32>,
    pub fps: Option<u32>,
    /// `None` lets the backend choose.
    pub seed: Option<i64>,
    /// First frame for image-to-video models.
    pub start_image: Option<PathBuf>,
    pub reference_images: Vec<PathBuf>,
    /// Model-specific settings merged over the backend's defaults.
    pub params: Map<String, Value>,
    /// Empty, shot-scoped directory the backend may write into.
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderOutput {
    /// Path of the produced file when the backend knows it. Otherwise the
    /// orchestrator looks in the shot's output directory.
    pub artifact: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("backend failed: {0}")]
    Backend(String),
    #[error("no {kind} artifact produced in {}", dir.display())]
    MissingArtifact { kind: ModelKind, dir: PathBuf },
    #[error("{count} candidate artifacts in {}, cannot tell which belongs to the shot", dir.display())]
    AmbiguousArtifact { count: usize, dir: PathBuf },
    #[error("render cancelled")]
    Cancelled,
}

/// The render seam. One call renders one shot and blocks until it is done.
///
/// Implementations should check `cancel` at their own checkpoints and return
/// [`RenderError::Cancelled`] when it fires.
pub trait RenderBackend {
    fn name(&self) -> &str;
    fn render(
        &mut self,
        request: &RenderRequest,
        cancel: &CancelToken,
    ) -> Result<RenderOutput, RenderError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ShotOutcome {
    Succeeded { artifact: PathBuf },
    Failed { error: String },
    Cancelled,
}

/// Sent once per shot, in batch order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderProgress {
    pub batch_id: String,
    pub index: u32,
    /// 1-based position within the batch.
    pub position: usize,
    pub total: usize,
    pub outcome: ShotOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShotFailure {
    pub index: u32,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub kind: ModelKind,
    pub succeeded: Vec<u32>,
    pub failed: Vec<ShotFailure>,
    pub cancelled_shots: Vec<u32>,
    pub cancelled: bool,
}

impl BatchSummary {
    fn new(batch_id: String, kind: ModelKind) -> Self {
        Self {
            batch_id,
            kind,
            succeeded: Vec::new(),
            failed: Vec::new(),
            cancelled_shots: Vec::new(),
            cancelled: false,
        }
    }

    pub fn failed_indices(&self) -> Vec<u32> {
        self.failed.iter().map(|failure| failure.index).collect()
    }
}

/// Runs shots through a backend one at a time, in order.
pub struct Orchestrator {
    backend: Box<dyn RenderBackend>,
    registry: ModelRegistry,
    output_root: PathBuf,
    store: Option<ProjectStore>,
    auto_approve: bool,
    events: Option<EventLog>,
}

impl Orchestrator {
    pub fn new(
        backend: Box<dyn RenderBackend>,
        registry: ModelRegistry,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            registry,
            output_root: output_root.into(),
            store: None,
            auto_approve: false,
            events: None,
        }
    }

    /// Import artifacts into this project directory and autosave after every shot.
    pub fn with_store(mut self, store: ProjectStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Approve fresh renders without review. Otherwise they wait as pending.
    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }

    pub fn with_events(mut self, events: Option<EventLog>) -> Self {
        self.events = events;
        self
    }

    /// Render `shots` (1-based indices) in the given order.
    ///
    /// A failing shot is recorded and the batch moves on. Once `cancel` fires,
    /// every shot not yet finished is reported cancelled and the backend is not
    /// called again. Only a failed autosave stops the batch early with an error.
    pub fn run_batch(
        &mut self,
        project: &mut Project,
        shots: &[u32],
        kind: ModelKind,
        cancel: &CancelToken,
        mut on_progress: impl FnMut(&RenderProgress),
    ) -> Result<BatchSummary> {
        let model = match kind {
            ModelKind::Image => project.image_model.trim().to_string(),
            ModelKind::Video => project.video_model.trim().to_string(),
        };
        if model.is_empty() {
            bail!("no {kind} model selected for this project");
        }

        let batch_id = new_batch_id();
        let batch_dir = self.output_root.join(&batch_id);
        let mut summary = BatchSummary::new(batch_id.clone(), kind);
        let total = shots.len();
        info!(batch = %batch_id, %kind, model = %model, shots = total, backend = self.backend.name(), "render batch started");
        record_event(
            self.events.as_ref(),
            SessionEvent::BatchStarted {
                batch_id: batch_id.clone(),
                kind,
                shots: shots.to_vec(),
            },
        );

        for (position, &index) in shots.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
            }
            let outcome = if summary.cancelled {
                ShotOutcome::Cancelled
            } else {
                record_event(
                    self.events.as_ref(),
                    SessionEvent::ShotStarted {
                        batch_id: batch_id.clone(),
                        index,
                        model: model.clone(),
                    },
                );
                let slot = ShotSlot {
                    batch_dir: &batch_dir,
                    batch_id: &batch_id,
                    index,
                    position: position + 1,
                };
                match self.render_shot(project, &slot, kind, &model, cancel) {
                    Ok(artifact) => ShotOutcome::Succeeded { artifact },
                    Err(ShotError::Cancelled) => {
                        summary.cancelled = true;
                        ShotOutcome::Cancelled
                    }
                    Err(ShotError::Failed(error)) => ShotOutcome::Failed { error },
                }
            };

            match &outcome {
                ShotOutcome::Succeeded { artifact } => {
                    info!(batch = %batch_id, index, artifact = %artifact.display(), "shot rendered");
                    summary.succeeded.push(index);
                    record_event(
                        self.events.as_ref(),
                        SessionEvent::ShotSucceeded {
                            batch_id: batch_id.clone(),
                            index,
                            artifact: artifact.clone(),
                        },
                    );
                }
                ShotOutcome::Failed { error } => {
                    warn!(batch = %batch_id, index, error = %error, "shot failed");
                    summary.failed.push(ShotFailure {
                        index,
                        error: error.clone(),
                    });
                    record_event(
                        self.events.as_ref(),
                        SessionEvent::ShotFailed {
                            batch_id: batch_id.clone(),
                            index,
                            error: error.clone(),
                        },
                    );
                }
                ShotOutcome::Cancelled => {
                    debug!(batch = %batch_id, index, "shot cancelled");
                    summary.cancelled_shots.push(index);
                    record_event(
                        self.events.as_ref(),
                        SessionEvent::ShotCancelled {
                            batch_id: batch_id.clone(),
                            index,
                        },
                    );
                }
            }

            if !matches!(outcome, ShotOutcome::Cancelled) {
                if let Some(store) = &self.store {
                    store
                        .save(project)
                        .with_context(|| format!("autosave after shot {index} failed"))?;
                }
            }

            on_progress(&RenderProgress {
                batch_id: batch_id.clone(),
                index,
                position: position + 1,
                total,
                outcome,
            });
        }

        info!(
            batch = %batch_id,
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            cancelled = summary.cancelled,
            "render batch finished"
        );
        record_event(
            self.events.as_ref(),
            SessionEvent::BatchFinished {
                batch_id,
                succeeded: summary.succeeded.len(),
                failed: summary.failed.len(),
                cancelled: summary.cancelled,
            },
        );
        Ok(summary)
    }

    fn render_shot(
        &mut self,
        project: &mut Project,
        slot: &ShotSlot<'_>,
        kind: ModelKind,
        model: &str,
        cancel: &CancelToken,
    ) -> Result<PathBuf, ShotError> {
        let index = slot.index;
        let shot = project
            .shot(index)
            .ok_or_else(|| ShotError::Failed(format!("project has no shot {index}")))?;
        let output_dir = slot.create_output_dir(kind)?;
        let request = self
            .build_request(project, shot, slot.batch_id, kind, model, output_dir)
            .map_err(|err| ShotError::Failed(format!("{err:#}")))?;
        debug!(
            index,
            frames = ?request.frames,
            resolution = %request.resolution,
            refs = request.reference_images.len(),
            "render request built"
        );

        let output = self.backend.render(&request, cancel)?;
        let produced = resolve_artifact(output, kind, &request.output_dir)?;

        let stored = match &self.store {
            Some(store) => store
                .copy_asset(&produced, kind.asset_subfolder())
                .map_err(|err| ShotError::Failed(format!("{err:#}")))?,
            None => produced,
        };

        let review = if self.auto_approve {
            ApprovalState::Approved
        } else {
            ApprovalState::Pending
        };
        if let Some(shot) = project.shot_mut(index) {
            shot.set_artifact(kind, Some(stored.clone()));
            shot.set_review(kind, review);
        }
        Ok(stored)
    }

    fn build_request(
        &self,
        project: &Project,
        shot: &Shot,
        batch_id: &str,
        kind: ModelKind,
        model: &str,
        output_dir: PathBuf,
    ) -> Result<RenderRequest> {
        let prompt = shot.prompt_for(kind);
        if prompt.is_empty() {
            bail!("shot {} has no prompt", shot.index);
        }
        let constraints = self.registry.constraints_for(model);
        let tier = if constraints.allows_resolution(project.export.resolution_tier) {
            project.export.resolution_tier
        } else {
            constraints
                .resolution_options
                .first()
                .copied()
                .unwrap_or(project.export.resolution_tier)
        };
        let resolution = project.vibe.resolution(tier).to_string();

        let mut params = Map::new();
        let mut start_image = None;
        let mut reference_images = Vec::new();
        let (frames, fps) = match kind {
            ModelKind::Image => {
                params.extend(image_model_overrides(model));
                let reference = shot
                    .reference_image
                    .as_deref()
                    .filter(|path| path.is_file())
                    .or_else(|| {
                        project
                            .character_images()
                            .into_iter()
                            .find(|path| path.is_file())
                    });
                if let Some(reference) = reference {
                    reference_images.push(reference.to_path_buf());
                    params.extend(image_reference_overrides(model));
                }
                (None, None)
            }
            ModelKind::Video => {
                let takes_start_frame = self
                    .registry
                    .get(model)
                    .map(|profile| profile.supports(CAP_IMAGE_TO_VIDEO))
                    .unwrap_or(true);
                if takes_start_frame {
                    start_image = shot
                        .image_path
                        .as_deref()
                        .filter(|path| path.is_file())
                        .map(Path::to_path_buf);
                }
                let frames = constraints.frames_for_duration(project.shot_duration(shot));
                (Some(frames), Some(constraints.fps))
            }
        };

        if !project.speed_profile.trim().is_empty() {
            let profile = self
                .registry
                .get(model)
                .and_then(|profile| {
                    profile
                        .speed_profiles
                        .iter()
                        .find(|speed| speed.name == project.speed_profile)
                });
            match profile {
                Some(speed) => params.extend(speed.params.clone()),
                None => debug!(model, profile = %project.speed_profile, "speed profile not available for model"),
            }
        }

        Ok(RenderRequest {
            batch_id: batch_id.to_string(),
            shot_index: shot.index,
            kind,
            model: model.to_string(),
            prompt: prompt.to_string(),
            resolution,
            frames,
            fps,
            seed: shot.seed.filter(|seed| *seed >= 0),
            start_image,
            reference_images,
            params,
            output_dir,
        })
    }
}

/// Where one call of a batch writes. `position` keeps repeated indices apart.
struct ShotSlot<'a> {
    batch_dir: &'a Path,
    batch_id: &'a str,
    index: u32,
    position: usize,
}

impl ShotSlot<'_> {
    /// A fresh directory per call. An existing one is never reused.
    fn create_output_dir(&self, kind: ModelKind) -> Result<PathBuf, ShotError> {
        let dir = self
            .batch_dir
            .join(format!("shot-{:02}-{kind}-{:03}", self.index, self.position));
        fs::create_dir_all(self.batch_dir)
            .and_then(|_| fs::create_dir(&dir))
            .map_err(|err| ShotError::Failed(format!("failed to create {}: {err}", dir.display())))?;
        Ok(dir)
    }
}

enum ShotError {
    Failed(String),
    Cancelled,
}

impl From<RenderError> for ShotError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Cancelled => Self::Cancelled,
            other => Self::Failed(truncate_text(&other.to_string(), MAX_ERROR_CHARS)),
        }
    }
}

/// The artifact belongs to this shot only if the backend named it, or it is
/// the single matching file in the shot's own directory.
fn resolve_artifact(
    output: RenderOutput,
    kind: ModelKind,
    output_dir: &Path,
) -> Result<PathBuf, RenderError> {
    if let Some(path) = output.artifact {
        if path.is_file() {
            return Ok(path);
        }
        return Err(RenderError::Backend(format!(
            "reported artifact {} does not exist",
            path.display()
        )));
    }
    let entries = fs::read_dir(output_dir).map_err(|err| {
        RenderError::Backend(format!("cannot list {}: {err}", output_dir.display()))
    })?;
    let mut candidates: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_extension(path, kind.artifact_extensions()))
        .collect();
    match candidates.len() {
        0 => Err(RenderError::MissingArtifact {
            kind,
            dir: output_dir.to_path_buf(),
        }),
        1 => Ok(candidates.remove(0)),
        count => Err(RenderError::AmbiguousArtifact {
            count,
            dir: output_dir.to_path_buf(),
        }),
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .map(|ext| extensions.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn new_batch_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("batch-{}", &id[..12])
}

/// Local backend that needs no GPU: solid-colour stills and placeholder clips.
///
/// Colours are derived from the prompt and seed, so reruns are reproducible.
#[derive(Debug, Default)]
pub struct DryrunBackend {
    rendered: u64,
}

impl DryrunBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn render(
        &mut self,
        request: &RenderRequest,
        cancel: &CancelToken,
    ) -> Result<RenderOutput, RenderError> {
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        let seed = request
            .seed
            .map(|seed| seed as u64)
            .unwrap_or(self.rendered);
        let id = short_id(&request.prompt, seed);
        self.rendered += 1;
        let path = match request.kind {
            ModelKind::Image => {
                let path = request.output_dir.join(format!("dryrun-{id}.png"));
                let (width, height) = parse_dims(&request.resolution).unwrap_or((832, 480));
                let (width, height) = fit_within(width, height, DRYRUN_MAX_EDGE);
                write_dryrun_image(&path, width, height, &request.prompt, seed)
                    .map_err(|err| RenderError::Backend(format!("{err:#}")))?;
                path
            }
            ModelKind::Video => {
                let path = request.output_dir.join(format!("dryrun-{id}.mp4"));
                write_placeholder_clip(&path, request)
                    .map_err(|err| RenderError::Backend(format!("{err:#}")))?;
                path
            }
        };
        Ok(RenderOutput {
            artifact: Some(path),
        })
    }
}

fn fit_within(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let longest = width.max(height).max(1);
    if longest <= max_edge {
        return (width.max(1), height.max(1));
    }
    let scale = |value: u32| ((u64::from(value) * u64::from(max_edge)) / u64::from(longest)).max(1) as u32;
    (scale(width), scale(height))
}

fn write_dryrun_image(path: &Path, width: u32, height: u32, prompt: &str, seed: u64) -> Result<()> {
    let (r, g, b) = color_from_prompt(prompt, seed);
    let mut image = RgbImage::new(width, height);
    for pixel in image.pixels_mut() {
        *pixel = Rgb([r, g, b]);
    }
    image
        .save(path)
        .with_context(|| format!("failed to save {}", path.display()))?;
    Ok(())
}

/// An `ftyp` box followed by the request as JSON. Not playable, but typed as MP4.
fn write_placeholder_clip(path: &Path, request: &RenderRequest) -> Result<()> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&20u32.to_be_bytes());
    bytes.extend_from_slice(b"ftypisom");
    bytes.extend_from_slice(&0u32.to_be_bytes());
    bytes.extend_from_slice(b"isom");
    let meta = serde_json::to_vec(request).context("failed to encode dryrun clip metadata")?;
    bytes.extend_from_slice(&meta);
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn short_id(prompt: &str, seed: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use smoothbrain_contracts::models::{
        ModelProfile, ModelSource, RenderConstraints, SpeedProfile, SpeedTier,
    };
    use smoothbrain_contracts::story::ShotRecord;

    use super::*;

    type Calls = Arc<Mutex<Vec<RenderRequest>>>;

    /// Writes one file into the shot dir and returns no path, except for scripted failures.
    struct ScriptedBackend {
        calls: Calls,
        fail_on: Vec<u32>,
        cancel_after: Option<(u32, CancelToken)>,
    }

    impl ScriptedBackend {
        fn new(calls: Calls) -> Self {
            Self {
                calls,
                fail_on: Vec::new(),
                cancel_after: None,
            }
        }
    }

    impl RenderBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn render(
            &mut self,
            request: &RenderRequest,
            _cancel: &CancelToken,
        ) -> Result<RenderOutput, RenderError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(request.clone());
            }
            if self.fail_on.contains(&request.shot_index) {
                return Err(RenderError::Backend("out of memory".to_string()));
            }
            let ext = request.kind.artifact_extensions()[0];
            let path = request
                .output_dir
                .join(format!("out-{}.{ext}", request.shot_index));
            fs::write(&path, request.prompt.as_bytes())
                .map_err(|err| RenderError::Backend(err.to_string()))?;
            if let Some((after, token)) = &self.cancel_after {
                if request.shot_index == *after {
                    token.cancel();
                }
            }
            Ok(RenderOutput::default())
        }
    }

    fn five_shot_project() -> Project {
        let mut project = Project::new("a courier crosses a flooded city");
        project.image_model = "flux2_klein_4b".to_string();
        project.video_model = "ltx2_distilled".to_string();
        project.apply_pack(
            (1..=5)
                .map(|n| ShotRecord::uniform(format!("beat {n}"), format!("Shot {n}")))
                .collect(),
        );
        project
    }

    fn ltx_registry() -> ModelRegistry {
        ModelRegistry::from_profiles([ModelProfile {
            id: "ltx2_distilled".to_string(),
            name: "LTX-2 Distilled".to_string(),
            kind: ModelKind::Video,
            architecture: "ltx2".to_string(),
            source: ModelSource::Default,
            description: String::new(),
            speed_tier: SpeedTier::Fast,
            speed_profiles: vec![SpeedProfile {
                name: "turbo".to_string(),
                params: serde_json::json!({"num_inference_steps": 8})
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
            }],
            constraints: RenderConstraints::ltx(),
            capabilities: vec![CAP_IMAGE_TO_VIDEO.to_string()],
        }])
    }

    #[test]
    fn failing_shot_is_recorded_and_batch_continues() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let calls = Calls::default();
        let mut backend = ScriptedBackend::new(calls.clone());
        backend.fail_on = vec![3];
        let mut orchestrator =
            Orchestrator::new(Box::new(backend), ModelRegistry::default(), temp.path());
        let mut project = five_shot_project();
        let mut progress = Vec::new();

        let summary = orchestrator.run_batch(
            &mut project,
            &[1, 2, 3, 4, 5],
            ModelKind::Image,
            &CancelToken::new(),
            |update| progress.push(update.clone()),
        )?;

        assert_eq!(summary.succeeded, vec![1, 2, 4, 5]);
        assert_eq!(summary.failed_indices(), vec![3]);
        assert!(summary.failed[0].error.contains("out of memory"));
        assert!(!summary.cancelled);
        assert!(summary.cancelled_shots.is_empty());
        assert!(project.shot(3).and_then(|s| s.image_path.as_ref()).is_none());
        for index in [1, 2, 4, 5] {
            let path = project
                .shot(index)
                .and_then(|s| s.image_path.clone())
                .unwrap_or_default();
            assert_eq!(fs::read_to_string(&path)?, format!("beat {index}"));
        }
        let order: Vec<u32> = progress.iter().map(|p| p.index).collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5]);
        assert!(matches!(progress[2].outcome, ShotOutcome::Failed { .. }));
        assert_eq!(calls.lock().map(|c| c.len()).unwrap_or_default(), 5);
        Ok(())
    }

    #[test]
    fn cancelling_after_second_shot_stops_backend_calls() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let calls = Calls::default();
        let cancel = CancelToken::new();
        let mut backend = ScriptedBackend::new(calls.clone());
        backend.cancel_after = Some((2, cancel.clone()));
        let mut orchestrator =
            Orchestrator::new(Box::new(backend), ModelRegistry::default(), temp.path());
        let mut project = five_shot_project();
        let mut progress = Vec::new();

        let summary = orchestrator.run_batch(
            &mut project,
            &[1, 2, 3, 4, 5],
            ModelKind::Image,
            &cancel,
            |update| progress.push(update.outcome.clone()),
        )?;

        assert_eq!(summary.succeeded, vec![1, 2]);
        assert!(summary.failed.is_empty());
        assert_eq!(summary.cancelled_shots, vec![3, 4, 5]);
        assert!(summary.cancelled);
        assert_eq!(calls.lock().map(|c| c.len()).unwrap_or_default(), 2);
        assert!(project.shot(2).and_then(|s| s.image_path.as_ref()).is_some());
        assert_eq!(progress.len(), 5);
        assert_eq!(progress[4], ShotOutcome::Cancelled);
        Ok(())
    }

    #[test]
    fn backend_observed_cancel_marks_rest_cancelled() -> Result<()> {
        struct Interrupted;
        impl RenderBackend for Interrupted {
            fn name(&self) -> &str {
                "interrupted"
            }
            fn render(
                &mut self,
                _request: &RenderRequest,
                _cancel: &CancelToken,
            ) -> Result<RenderOutput, RenderError> {
                Err(RenderError::Cancelled)
            }
        }
        let temp = tempfile::tempdir()?;
        let mut orchestrator =
            Orchestrator::new(Box::new(Interrupted), ModelRegistry::default(), temp.path());
        let mut project = five_shot_project();
        let summary = orchestrator.run_batch(
            &mut project,
            &[1, 2],
            ModelKind::Image,
            &CancelToken::new(),
            |_| {},
        )?;
        assert!(summary.cancelled);
        assert_eq!(summary.cancelled_shots, vec![1, 2]);
        assert!(summary.failed.is_empty());
        Ok(())
    }

    #[test]
    fn ambiguous_or_missing_output_fails_the_shot() -> Result<()> {
        struct Messy;
        impl RenderBackend for Messy {
            fn name(&self) -> &str {
                "messy"
            }
            fn render(
                &mut self,
                request: &RenderRequest,
                _cancel: &CancelToken,
            ) -> Result<RenderOutput, RenderError> {
                if request.shot_index == 1 {
                    for name in ["a.png", "b.png"] {
                        fs::write(request.output_dir.join(name), b"x")
                            .map_err(|err| RenderError::Backend(err.to_string()))?;
                    }
                }
                Ok(RenderOutput::default())
            }
        }
        let temp = tempfile::tempdir()?;
        let mut orchestrator =
            Orchestrator::new(Box::new(Messy), ModelRegistry::default(), temp.path());
        let mut project = five_shot_project();
        let summary = orchestrator.run_batch(
            &mut project,
            &[1, 2],
            ModelKind::Image,
            &CancelToken::new(),
            |_| {},
        )?;
        assert!(summary.succeeded.is_empty());
        assert!(summary.failed[0].error.contains("cannot tell"));
        assert!(summary.failed[1].error.contains("no image artifact"));
        Ok(())
    }

    #[test]
    fn repeated_index_gets_its_own_output_dir() -> Result<()> {
        struct FirstCallOnly {
            calls: u32,
        }
        impl RenderBackend for FirstCallOnly {
            fn name(&self) -> &str {
                "first-call-only"
            }
            fn render(
                &mut self,
                request: &RenderRequest,
                _cancel: &CancelToken,
            ) -> Result<RenderOutput, RenderError> {
                self.calls += 1;
                if self.calls == 1 {
                    fs::write(request.output_dir.join("first.png"), b"x")
                        .map_err(|err| RenderError::Backend(err.to_string()))?;
                }
                Ok(RenderOutput::default())
            }
        }
        let temp = tempfile::tempdir()?;
        let mut orchestrator = Orchestrator::new(
            Box::new(FirstCallOnly { calls: 0 }),
            ModelRegistry::default(),
            temp.path(),
        );
        let mut project = five_shot_project();
        let summary = orchestrator.run_batch(
            &mut project,
            &[1, 1],
            ModelKind::Image,
            &CancelToken::new(),
            |_| {},
        )?;
        assert_eq!(summary.succeeded, vec![1]);
        assert_eq!(summary.failed_indices(), vec![1]);
        assert!(summary.failed[0].error.contains("no image artifact"));
        Ok(())
    }

    #[test]
    fn video_review_leaves_storyboard_approval_alone() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut project = five_shot_project();
        project.set_approval(1, ApprovalState::Approved);
        assert_eq!(project.video_queue(), vec![1]);

        let mut orchestrator = Orchestrator::new(
            Box::new(ScriptedBackend::new(Calls::default())),
            ltx_registry(),
            temp.path().join("pending"),
        );
        orchestrator.run_batch(&mut project, &[1], ModelKind::Video, &CancelToken::new(), |_| {})?;
        assert_eq!(project.indices_with(ApprovalState::Approved), vec![1]);
        assert_eq!(
            project.shot(1).map(|s| s.review(ModelKind::Video)),
            Some(ApprovalState::Pending)
        );
        assert_eq!(project.video_queue(), vec![1]);

        let mut orchestrator = Orchestrator::new(
            Box::new(ScriptedBackend::new(Calls::default())),
            ltx_registry(),
            temp.path().join("approved"),
        )
        .with_auto_approve(true);
        orchestrator.run_batch(&mut project, &[1], ModelKind::Video, &CancelToken::new(), |_| {})?;
        assert_eq!(project.indices_with(ApprovalState::Approved), vec![1]);
        assert_eq!(
            project.shot(1).map(|s| s.review(ModelKind::Video)),
            Some(ApprovalState::Approved)
        );
        assert!(project.video_queue().is_empty());
        Ok(())
    }

    #[test]
    fn video_requests_carry_snapped_frames_and_start_frame() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let calls = Calls::default();
        let mut orchestrator = Orchestrator::new(
            Box::new(ScriptedBackend::new(calls.clone())),
            ltx_registry(),
            temp.path().join("out"),
        );
        let mut project = five_shot_project();
        project.speed_profile = "turbo".to_string();
        project.export.shot_duration = 3.0;
        let still = temp.path().join("still.png");
        fs::write(&still, b"png")?;
        if let Some(shot) = project.shot_mut(1) {
            shot.image_path = Some(still.clone());
            shot.seed = Some(42);
        }

        orchestrator.run_batch(&mut project, &[1, 2], ModelKind::Video, &CancelToken::new(), |_| {})?;

        let calls = calls.lock().map(|c| c.clone()).unwrap_or_default();
        assert_eq!(calls.len(), 2);
        // 3 s at 24 fps is 72 frames, snapped up to 8n + 1.
        assert_eq!(calls[0].frames, Some(73));
        assert_eq!(calls[0].resolution, "832x480");
        assert_eq!(calls[0].start_image.as_deref(), Some(still.as_path()));
        assert_eq!(calls[0].seed, Some(42));
        assert_eq!(calls[0].params["num_inference_steps"], serde_json::json!(8));
        assert!(calls[1].start_image.is_none());
        assert_ne!(calls[0].output_dir, calls[1].output_dir);
        assert!(project.shot(1).and_then(|s| s.video_path.as_ref()).is_some());
        Ok(())
    }

    #[test]
    fn reference_overrides_only_with_a_reference() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let calls = Calls::default();
        let mut orchestrator = Orchestrator::new(
            Box::new(ScriptedBackend::new(calls.clone())),
            ModelRegistry::default(),
            temp.path().join("out"),
        );
        let mut project = five_shot_project();
        project.image_model = "qwen_image_edit_20B".to_string();
        orchestrator.run_batch(&mut project, &[1], ModelKind::Image, &CancelToken::new(), |_| {})?;

        let face = temp.path().join("face.png");
        fs::write(&face, b"face")?;
        project.add_character("Mara", Some(face.clone()))?;
        orchestrator.run_batch(&mut project, &[2], ModelKind::Image, &CancelToken::new(), |_| {})?;

        let calls = calls.lock().map(|c| c.clone()).unwrap_or_default();
        assert_eq!(calls[0].params["num_inference_steps"], serde_json::json!(4));
        assert!(!calls[0].params.contains_key("image_refs_relative_size"));
        assert!(calls[0].reference_images.is_empty());
        assert_eq!(calls[1].reference_images, vec![face]);
        assert!(calls[1].params.contains_key("image_refs_relative_size"));
        Ok(())
    }

    #[test]
    fn store_imports_autosaves_and_auto_approves() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ProjectStore::open(temp.path().join("project"))?;
        let mut orchestrator = Orchestrator::new(
            Box::new(DryrunBackend::new()),
            ModelRegistry::default(),
            temp.path().join("out"),
        )
        .with_store(store.clone())
        .with_auto_approve(true);
        let mut project = five_shot_project();

        let summary =
            orchestrator.run_batch(&mut project, &[1, 2], ModelKind::Image, &CancelToken::new(), |_| {})?;
        assert_eq!(summary.succeeded, vec![1, 2]);

        let still = project
            .shot(1)
            .and_then(|s| s.image_path.clone())
            .unwrap_or_default();
        assert!(still.starts_with(store.dir().join("images")));
        assert!(image::open(&still).is_ok());
        assert_eq!(project.indices_with(ApprovalState::Approved), vec![1, 2]);

        let saved = store.load()?;
        assert_eq!(
            saved.shot(2).and_then(|s| s.image_path.clone()),
            project.shot(2).and_then(|s| s.image_path.clone())
        );
        assert_eq!(saved.indices_with(ApprovalState::Approved), vec![1, 2]);
        Ok(())
    }

    #[test]
    fn missing_model_is_an_error_before_any_render() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut orchestrator =
            Orchestrator::new(Box::new(DryrunBackend::new()), ModelRegistry::default(), temp.path());
        let mut project = five_shot_project();
        project.video_model.clear();
        let result =
            orchestrator.run_batch(&mut project, &[1], ModelKind::Video, &CancelToken::new(), |_| {});
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn unknown_shot_index_fails_only_that_shot() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut orchestrator =
            Orchestrator::new(Box::new(DryrunBackend::new()), ModelRegistry::default(), temp.path());
        let mut project = five_shot_project();
        let summary =
            orchestrator.run_batch(&mut project, &[9, 1], ModelKind::Video, &CancelToken::new(), |_| {})?;
        assert_eq!(summary.failed_indices(), vec![9]);
        assert_eq!(summary.succeeded, vec![1]);
        Ok(())
    }

    #[test]
    fn dryrun_is_deterministic_for_prompt_and_seed() {
        assert_eq!(color_from_prompt("storm", 7), color_from_prompt("storm", 7));
        assert_ne!(short_id("storm", 7), short_id("storm", 8));
        assert_eq!(fit_within(1920, 1080, 256), (256, 144));
        assert_eq!(fit_within(100, 50, 256), (100, 50));
    }
}
