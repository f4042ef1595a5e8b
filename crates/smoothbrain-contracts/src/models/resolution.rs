use serde::{Deserialize, Serialize};

/// Framing of the whole film; shared by storyboard images and video shots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vibe {
    #[default]
    Cinematic,
    Vertical,
    Square,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResolutionTier {
    #[default]
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "540p")]
    P540,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
}

impl ResolutionTier {
    pub const ALL: [ResolutionTier; 4] = [Self::P480, Self::P540, Self::P720, Self::P1080];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::P480 => "480p",
            Self::P540 => "540p",
            Self::P720 => "720p",
            Self::P1080 => "1080p",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str() == normalized)
    }
}

impl Vibe {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cinematic" => Some(Self::Cinematic),
            "vertical" => Some(Self::Vertical),
            "square" => Some(Self::Square),
            _ => None,
        }
    }

    /// `WxH` string the render backend expects.
    pub fn resolution(self, tier: ResolutionTier) -> &'static str {
        use ResolutionTier::*;
        match (self, tier) {
            (Self::Cinematic, P480) => "832x480",
            (Self::Cinematic, P540) => "960x544",
            (Self::Cinematic, P720) => "1280x720",
            (Self::Cinematic, P1080) => "1920x1080",
            (Self::Vertical, P480) => "480x832",
            (Self::Vertical, P540) => "544x960",
            (Self::Vertical, P720) => "720x1280",
            (Self::Vertical, P1080) => "1080x1920",
            (Self::Square, P480) => "512x512",
            (Self::Square, P540) => "768x768",
            (Self::Square, P720) => "1024x1024",
            (Self::Square, P1080) => "1080x1080",
        }
    }
}

pub fn parse_dims(size: &str) -> Option<(u32, u32)> {
    let (w, h) = size.trim().to_ascii_lowercase().split_once('x').map(|(w, h)| {
        (w.trim().parse::<u32>().ok(), h.trim().parse::<u32>().ok())
    })?;
    Some((w?, h?))
}
