use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::resolution::ResolutionTier;

/// The model accepts a trailing `Audio: ...` sentence and renders a soundtrack from it.
pub const CAP_AUDIO_INTENT: &str = "audio_intent";
/// The video model can start from a still frame.
pub const CAP_IMAGE_TO_VIDEO: &str = "i2v";
/// The image model can take character reference images.
pub const CAP_REFERENCE_IMAGES: &str = "reference_images";

pub const DEFAULT_FPS: u32 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Image,
    Video,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    /// File extensions a backend may produce for this kind, lowercase, without the dot.
    pub fn artifact_extensions(self) -> &'static [&'static str] {
        match self {
            Self::Image => &["png", "jpg", "jpeg", "webp"],
            Self::Video => &["mp4", "webm", "mkv"],
        }
    }

    /// Project asset subfolder that imported artifacts of this kind land in.
    pub fn asset_subfolder(self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::Video => "videos",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    #[default]
    Default,
    Finetune,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedTier {
    /// Distilled or accelerator-backed (few-step) rendering.
    Fast,
    #[default]
    Standard,
}

/// Structural limits a backend places on render parameters.
///
/// A frame count `n` is valid when `n >= min_frames` and
/// `n % frame_step == frame_offset % frame_step`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderConstraints {
    pub min_frames: u32,
    pub frame_step: u32,
    pub frame_offset: u32,
    pub fps: u32,
    pub resolution_options: Vec<ResolutionTier>,
}

impl Default for RenderConstraints {
    fn default() -> Self {
        Self::permissive()
    }
}

impl RenderConstraints {
    /// Accepts any positive frame count.
    pub fn permissive() -> Self {
        Self {
            min_frames: 1,
            frame_step: 1,
            frame_offset: 0,
            fps: DEFAULT_FPS,
            resolution_options: ResolutionTier::ALL.to_vec(),
        }
    }

    /// LTX family: `8n + 1` frames, never shorter than 17.
    pub fn ltx() -> Self {
        Self {
            min_frames: 17,
            frame_step: 8,
            frame_offset: 1,
            ..Self::permissive()
        }
    }

    /// Best guess from the model id and architecture when no descriptor says otherwise.
    pub fn for_family(model_id: &str, architecture: &str) -> Self {
        if is_ltx_family(model_id) || is_ltx_family(architecture) {
            return Self::ltx();
        }
        Self::permissive()
    }

    pub fn accepts(&self, frames: u32) -> bool {
        let step = self.frame_step.max(1);
        frames >= self.min_frames.max(1) && frames % step == self.frame_offset % step
    }

    /// Smallest valid frame count that is `>= requested`.
    ///
    /// Saturates at the largest valid count that fits in a `u32` when no larger one does.
    pub fn snap_frames(&self, requested: u32) -> u32 {
        let step = u64::from(self.frame_step.max(1));
        let offset = u64::from(self.frame_offset) % step;
        let floor = u64::from(requested.max(self.min_frames).max(1));
        let rem = floor % step;
        let snapped = if rem <= offset {
            floor + (offset - rem)
        } else {
            floor + (step - rem) + offset
        };
        let ceiling = u64::from(u32::MAX);
        let snapped = if snapped > ceiling {
            ceiling - (ceiling % step + step - offset) % step
        } else {
            snapped
        };
        u32::try_from(snapped).unwrap_or(u32::MAX)
    }

    pub fn frames_for_duration(&self, seconds: f64) -> u32 {
        let fps = f64::from(self.fps.max(1));
        let raw = (seconds * fps).round();
        let raw = if raw.is_finite() && raw > 1.0 {
            raw.min(f64::from(u32::MAX / 2)) as u32
        } else {
            1
        };
        self.snap_frames(raw)
    }

    pub fn allows_resolution(&self, tier: ResolutionTier) -> bool {
        self.resolution_options.is_empty() || self.resolution_options.contains(&tier)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedProfile {
    pub name: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// A discovered backend. Rebuilt on every scan; the descriptors on disk stay the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub id: String,
    pub name: String,
    pub kind: ModelKind,
    pub architecture: String,
    #[serde(default)]
    pub source: ModelSource,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub speed_tier: SpeedTier,
    #[serde(default)]
    pub speed_profiles: Vec<SpeedProfile>,
    #[serde(default)]
    pub constraints: RenderConstraints,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ModelProfile {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

pub fn is_ltx_family(id_or_architecture: &str) -> bool {
    id_or_architecture.trim().to_ascii_lowercase().starts_with("ltx")
}

/// True for backends whose video prompts must end in an explicit `Audio:` sentence.
pub fn requires_audio_intent(model_id: &str) -> bool {
    is_ltx_family(model_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snap_frames_moves_up_to_next_valid_count() {
        let ltx = RenderConstraints::ltx();
        assert_eq!(ltx.snap_frames(0), 17);
        assert_eq!(ltx.snap_frames(17), 17);
        assert_eq!(ltx.snap_frames(18), 25);
        assert_eq!(ltx.snap_frames(24), 25);
        assert_eq!(ltx.snap_frames(25), 25);
        assert_eq!(ltx.snap_frames(120), 121);
    }

    #[test]
    fn snap_frames_saturates_near_u32_max() {
        let extreme = RenderConstraints {
            min_frames: u32::MAX,
            frame_step: 8,
            frame_offset: 1,
            ..RenderConstraints::permissive()
        };
        assert_eq!(extreme.snap_frames(0), u32::MAX - 6);
        assert_eq!(extreme.frames_for_duration(1e12) % 8, 1);

        let wide = RenderConstraints {
            min_frames: 1,
            frame_step: u32::MAX,
            frame_offset: u32::MAX - 1,
            ..RenderConstraints::permissive()
        };
        assert_eq!(wide.snap_frames(u32::MAX), u32::MAX - 1);
    }

    #[test]
    fn frames_for_duration_always_satisfies_constraints() {
        let families = [
            RenderConstraints::permissive(),
            RenderConstraints::ltx(),
            RenderConstraints {
                min_frames: 5,
                frame_step: 4,
                frame_offset: 1,
                ..RenderConstraints::permissive()
            },
            RenderConstraints {
                min_frames: 10,
                frame_step: 6,
                frame_offset: 9,
                fps: 16,
                resolution_options: Vec::new(),
            },
        ];
        for constraints in &families {
            for tenths in 0..=200 {
                let seconds = f64::from(tenths) / 10.0;
                let frames = constraints.frames_for_duration(seconds);
                assert!(
                    constraints.accepts(frames),
                    "{frames} frames rejected for {constraints:?} at {seconds}s"
                );
                assert!(frames >= constraints.min_frames);
                let raw = (seconds * f64::from(constraints.fps)).round() as u32;
                assert!(frames >= raw, "snapping must not shorten the shot");
            }
        }
    }

    #[test]
    fn five_seconds_on_ltx_is_121_frames() {
        assert_eq!(RenderConstraints::ltx().frames_for_duration(5.0), 121);
        assert_eq!(RenderConstraints::permissive().frames_for_duration(5.0), 120);
    }

    #[test]
    fn family_detection_uses_id_or_architecture() {
        assert_eq!(
            RenderConstraints::for_family("my_custom", "ltx2_19B"),
            RenderConstraints::ltx()
        );
        assert_eq!(
            RenderConstraints::for_family("i2v_2_2", "i2v_2_2"),
            RenderConstraints::permissive()
        );
        assert!(requires_audio_intent("ltx2_distilled"));
        assert!(!requires_audio_intent("hunyuan_i2v"));
    }
}
