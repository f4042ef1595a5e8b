use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use smoothbrain_contracts::events::{EventLog, SessionEvent};
use smoothbrain_contracts::models::{
    has_speed_overrides, image_reference_overrides, requires_audio_intent, ModelKind,
    ModelProfile, ModelRegistry, ModelSource, RenderConstraints, SpeedProfile, SpeedTier,
    CAP_AUDIO_INTENT, CAP_IMAGE_TO_VIDEO, CAP_REFERENCE_IMAGES,
};
use smoothbrain_contracts::story::guide_for;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::record_event;

/// Architectures that never produce video.
pub const NON_VIDEO_PREFIXES: &[&str] = &[
    "flux",
    "qwen",
    "z_image",
    "chatterbox",
    "qwen3_tts",
    "heartmula",
    "pi_flux",
    "ace_step",
];
pub const I2V_ARCH_PATTERNS: &[&str] = &["i2v", "ti2v"];
/// Families that start from a still frame without saying so in their name.
pub const I2V_ARCH_FAMILIES: &[&str] = &["ltx2_19B", "ltxv_13B", "ltx2_distilled"];
pub const IMAGE_ARCH_PREFIXES: &[&str] = &["flux", "qwen_image", "pi_flux"];
pub const IMAGE_MODEL_EXCLUDE: &[&str] = &["qwen_image_layered", "flux2_dev", "flux2_dev_nvfp4"];
/// Simple mode offers only these well-known defaults, matched by id or architecture.
pub const SIMPLE_I2V_IDS: &[&str] = &[
    "i2v",
    "i2v_2_2",
    "ti2v_2_2",
    "hunyuan_i2v",
    "hunyuan_1_5_i2v",
    "ltx2_distilled",
    "ltx2_19B",
    "k5_pro_i2v",
    "k5_lite_i2v",
];
/// Upper bound for descriptor `min_frames` and `frame_step`.
pub const MAX_DESCRIPTOR_FRAMES: u32 = 4096;
pub const MAX_DESCRIPTOR_FPS: u32 = 240;
/// Architecture to `profiles/` subdirectory.
pub const ARCH_TO_PROFILE_DIR: &[(&str, &str)] = &[
    ("i2v", "wan_i2v"),
    ("i2v_720p", "wan_i2v"),
    ("i2v_nvfp4", "wan_i2v"),
    ("i2v_2_2", "wan_2_2"),
    ("ti2v_2_2", "wan_2_2"),
    ("ti2v_2_2_fastwan", "wan_2_2"),
    ("t2v", "wan"),
    ("t2v_sf", "wan"),
    ("t2v_2_2", "wan_2_2"),
    ("hunyuan_1_5_i2v", "hunyuan_1_5"),
    ("hunyuan_1_5_t2v", "hunyuan_1_5"),
    ("hunyuan_i2v", "wan_i2v"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanDiagnostic {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub kind: ModelKind,
    pub profiles: Vec<ModelProfile>,
    pub diagnostics: Vec<ScanDiagnostic>,
}

impl ScanReport {
    pub fn into_registry(self) -> ModelRegistry {
        ModelRegistry::from_profiles(self.profiles)
    }
}

#[derive(Debug, Default, Deserialize)]
struct DescriptorFile {
    #[serde(default)]
    model: DescriptorModel,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DescriptorModel {
    name: String,
    architecture: String,
    description: String,
    #[serde(rename = "URLs")]
    urls: Option<UrlSpec>,
    min_frames: Option<u32>,
    frame_step: Option<u32>,
    frame_offset: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UrlSpec {
    List(Vec<Value>),
    /// Name of another descriptor in `defaults/` whose weights are shared.
    Ref(String),
    Other(Value),
}

impl DescriptorModel {
    /// Descriptor values win over family defaults, clamped to sane bounds.
    fn constraints(&self, model_id: &str) -> RenderConstraints {
        let mut constraints = RenderConstraints::for_family(model_id, &self.architecture);
        if let Some(min) = self.min_frames.filter(|value| *value > 0) {
            constraints.min_frames = min.min(MAX_DESCRIPTOR_FRAMES);
        }
        if let Some(step) = self.frame_step.filter(|value| *value > 0) {
            constraints.frame_step = step.min(MAX_DESCRIPTOR_FRAMES);
        }
        if let Some(offset) = self.frame_offset {
            constraints.frame_offset = offset;
        }
        constraints.frame_offset %= constraints.frame_step.max(1);
        if let Some(fps) = self.fps.filter(|value| *value > 0) {
            constraints.fps = fps.min(MAX_DESCRIPTOR_FPS);
        }
        constraints
    }
}

/// Discovers installed backends from the host's per-model JSON descriptors.
///
/// Every descriptor is read on its own: one that cannot be read or parsed becomes a
/// [`ScanDiagnostic`] and the walk carries on.
pub struct ModelScanner {
    defaults_dir: PathBuf,
    finetunes_dir: PathBuf,
    ckpts_dir: PathBuf,
    profiles_dir: PathBuf,
    simple_mode: bool,
    events: Option<EventLog>,
}

impl ModelScanner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            defaults_dir: config.defaults_dir(),
            finetunes_dir: config.finetunes_dir(),
            ckpts_dir: config.ckpts_dir(),
            profiles_dir: config.profiles_dir(),
            simple_mode: false,
            events: None,
        }
    }

    /// Restrict video results to the stock image-to-video defaults.
    pub fn with_simple_mode(mut self, simple: bool) -> Self {
        self.simple_mode = simple;
        self
    }

    pub fn with_events(mut self, events: Option<EventLog>) -> Self {
        self.events = events;
        self
    }

    pub fn scan(&self, kind: ModelKind) -> ScanReport {
        let mut profiles = Vec::new();
        let mut diagnostics = Vec::new();
        for (dir, source) in [
            (&self.defaults_dir, ModelSource::Default),
            (&self.finetunes_dir, ModelSource::Finetune),
        ] {
            self.scan_folder(dir, source, kind, &mut profiles, &mut diagnostics);
        }

        for diagnostic in &diagnostics {
            warn!(
                path = %diagnostic.path.display(),
                reason = %diagnostic.reason,
                "skipping model descriptor"
            );
            record_event(
                self.events.as_ref(),
                SessionEvent::DescriptorSkipped {
                    path: diagnostic.path.clone(),
                    reason: diagnostic.reason.clone(),
                },
            );
        }
        info!(
            kind = %kind,
            count = profiles.len(),
            skipped = diagnostics.len(),
            "model scan finished"
        );
        record_event(
            self.events.as_ref(),
            SessionEvent::ModelsScanned {
                kind,
                count: profiles.len(),
                skipped: diagnostics.len(),
            },
        );

        ScanReport {
            kind,
            profiles,
            diagnostics,
        }
    }

    /// Image and video scans merged into one registry, plus every diagnostic.
    pub fn scan_all(&self) -> (ModelRegistry, Vec<ScanDiagnostic>) {
        let mut registry = ModelRegistry::default();
        let mut diagnostics = Vec::new();
        for kind in [ModelKind::Image, ModelKind::Video] {
            let report = self.scan(kind);
            // A broken file shows up in both walks; report it once.
            for diagnostic in report.diagnostics {
                if !diagnostics.contains(&diagnostic) {
                    diagnostics.push(diagnostic);
                }
            }
            for profile in report.profiles {
                registry.insert(profile);
            }
        }
        (registry, diagnostics)
    }

    fn scan_folder(
        &self,
        dir: &Path,
        source: ModelSource,
        kind: ModelKind,
        profiles: &mut Vec<ModelProfile>,
        diagnostics: &mut Vec<ScanDiagnostic>,
    ) {
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "descriptor folder missing");
            return;
        }
        let paths = match descriptor_paths(dir) {
            Ok(paths) => paths,
            Err(err) => {
                diagnostics.push(ScanDiagnostic {
                    path: dir.to_path_buf(),
                    reason: format!("{err:#}"),
                });
                return;
            }
        };

        for path in paths {
            let Some(model_id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if kind == ModelKind::Image && IMAGE_MODEL_EXCLUDE.contains(&model_id) {
                continue;
            }
            let descriptor = match read_descriptor(&path) {
                Ok(descriptor) => descriptor.model,
                Err(err) => {
                    diagnostics.push(ScanDiagnostic {
                        path: path.clone(),
                        reason: format!("{err:#}"),
                    });
                    continue;
                }
            };
            if descriptor.name.trim().is_empty() || descriptor.architecture.trim().is_empty() {
                diagnostics.push(ScanDiagnostic {
                    path: path.clone(),
                    reason: "descriptor has no model name or architecture".to_string(),
                });
                continue;
            }
            if !matches_kind(kind, model_id, &descriptor.architecture) {
                continue;
            }
            let urls = self.resolve_urls(descriptor.urls.as_ref());
            if !self.is_installed(&urls) {
                debug!(model = model_id, "model weights not installed");
                continue;
            }
            if kind == ModelKind::Video
                && self.simple_mode
                && !(source == ModelSource::Default
                    && (SIMPLE_I2V_IDS.contains(&model_id)
                        || SIMPLE_I2V_IDS.contains(&descriptor.architecture.as_str())))
            {
                continue;
            }
            profiles.push(self.build_profile(model_id, kind, source, &descriptor));
        }
    }

    fn build_profile(
        &self,
        model_id: &str,
        kind: ModelKind,
        source: ModelSource,
        descriptor: &DescriptorModel,
    ) -> ModelProfile {
        let arch = descriptor.architecture.as_str();
        let mut capabilities = Vec::new();
        let speed_profiles = match kind {
            ModelKind::Video => {
                capabilities.push(CAP_IMAGE_TO_VIDEO.to_string());
                let audio = requires_audio_intent(model_id)
                    || requires_audio_intent(arch)
                    || guide_for(model_id).is_some_and(|guide| {
                        guide.capabilities().iter().any(|cap| cap == CAP_AUDIO_INTENT)
                    });
                if audio {
                    capabilities.push(CAP_AUDIO_INTENT.to_string());
                }
                self.profiles_for_architecture(arch)
            }
            ModelKind::Image => {
                if !image_reference_overrides(model_id).is_empty() {
                    capabilities.push(CAP_REFERENCE_IMAGES.to_string());
                }
                Vec::new()
            }
        };
        ModelProfile {
            id: model_id.to_string(),
            name: descriptor.name.trim().to_string(),
            kind,
            architecture: arch.to_string(),
            source,
            description: descriptor.description.clone(),
            speed_tier: speed_tier(model_id, arch),
            speed_profiles,
            constraints: descriptor.constraints(model_id),
            capabilities,
        }
    }

    fn resolve_urls(&self, spec: Option<&UrlSpec>) -> Vec<String> {
        let list = match spec {
            Some(UrlSpec::List(items)) => items.clone(),
            Some(UrlSpec::Ref(reference)) => {
                let ref_path = self.defaults_dir.join(format!("{reference}.json"));
                if !ref_path.is_file() {
                    return Vec::new();
                }
                match read_descriptor(&ref_path) {
                    Ok(DescriptorFile {
                        model:
                            DescriptorModel {
                                urls: Some(UrlSpec::List(items)),
                                ..
                            },
                    }) => items,
                    Ok(_) => Vec::new(),
                    Err(err) => {
                        warn!(reference = %reference, error = %format!("{err:#}"), "model URL reference unreadable");
                        Vec::new()
                    }
                }
            }
            Some(UrlSpec::Other(_)) | None => Vec::new(),
        };
        list.into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .filter(|url| !url.trim().is_empty())
            .collect()
    }

    fn is_installed(&self, urls: &[String]) -> bool {
        urls.iter().any(|url| {
            url.rsplit('/')
                .next()
                .filter(|name| !name.is_empty())
                .is_some_and(|name| self.ckpts_dir.join(name).is_file())
        })
    }

    fn profiles_for_architecture(&self, arch: &str) -> Vec<SpeedProfile> {
        if arch.is_empty() || !self.profiles_dir.is_dir() {
            return Vec::new();
        }
        let dir_name = match ARCH_TO_PROFILE_DIR.iter().find(|(key, _)| *key == arch) {
            Some((_, dir)) => Some(dir.to_string()),
            None => {
                let existing = subdirectory_names(&self.profiles_dir);
                existing
                    .iter()
                    .find(|name| name.as_str() == arch)
                    .or_else(|| {
                        existing
                            .iter()
                            .find(|name| arch.starts_with(name.as_str()) || name.starts_with(arch))
                    })
                    .cloned()
            }
        };
        let Some(dir_name) = dir_name else {
            return Vec::new();
        };
        let dir = self.profiles_dir.join(dir_name);
        let Ok(paths) = descriptor_paths(&dir) else {
            return Vec::new();
        };
        let mut profiles: Vec<SpeedProfile> = paths
            .iter()
            .filter_map(|path| {
                let name = path.file_stem()?.to_str()?.to_string();
                let raw = fs::read_to_string(path).ok()?;
                match serde_json::from_str::<Value>(&raw) {
                    Ok(Value::Object(params)) => Some(SpeedProfile { name, params }),
                    _ => {
                        debug!(path = %path.display(), "ignoring unreadable speed profile");
                        None
                    }
                }
            })
            .collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        profiles
    }
}

fn matches_kind(kind: ModelKind, model_id: &str, arch: &str) -> bool {
    match kind {
        ModelKind::Video => {
            !NON_VIDEO_PREFIXES.iter().any(|prefix| arch.starts_with(prefix))
                && is_image_to_video(arch, model_id)
        }
        ModelKind::Image => IMAGE_ARCH_PREFIXES
            .iter()
            .any(|prefix| arch.starts_with(prefix)),
    }
}

fn is_image_to_video(arch: &str, model_id: &str) -> bool {
    let arch_l = arch.to_ascii_lowercase();
    let id_l = model_id.to_ascii_lowercase();
    I2V_ARCH_PATTERNS
        .iter()
        .any(|pattern| arch_l.contains(pattern) || id_l.contains(pattern))
        || I2V_ARCH_FAMILIES.contains(&arch)
        || I2V_ARCH_FAMILIES.contains(&model_id)
}

fn speed_tier(model_id: &str, arch: &str) -> SpeedTier {
    let fast_marker = ["distilled", "fastwan", "lightning", "schnell", "klein"]
        .iter()
        .any(|marker| {
            model_id.to_ascii_lowercase().contains(marker)
                || arch.to_ascii_lowercase().contains(marker)
        });
    if fast_marker || has_speed_overrides(model_id) {
        SpeedTier::Fast
    } else {
        SpeedTier::Standard
    }
}

fn read_descriptor(path: &Path) -> Result<DescriptorFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("invalid JSON in {}", path.display()))?;
    if !value.is_object() {
        bail!("{} is not a JSON object", path.display());
    }
    serde_json::from_value(value)
        .with_context(|| format!("unexpected descriptor shape in {}", path.display()))
}

/// `*.json` files directly inside `dir`, sorted by name.
fn descriptor_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?
    {
        let path = entry?.path();
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "json");
        if is_json && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn subdirectory_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    names
}
