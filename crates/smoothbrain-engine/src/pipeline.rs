use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::{Map, Value};
use smoothbrain_contracts::events::{EventLog, SessionEvent};
use smoothbrain_contracts::extract::{clean_text_reply, extract_json_object, extract_object_list};
use smoothbrain_contracts::models::{requires_audio_intent, ModelKind};
use smoothbrain_contracts::project::{default_genre_weights, Project, DEFAULT_SHOT_COUNT};
use smoothbrain_contracts::story::{
    fallback_records, format_guide_for_system_prompt, ShotRecord, AUDIO_MARKER,
};
use tracing::{info, warn};

use crate::llm::{GenerateRequest, TextGenerator};
use crate::scanner::IMAGE_ARCH_PREFIXES;
use crate::{record_event, truncate_text};

pub const MIN_SHOTS: u32 = 2;
pub const MAX_SHOTS: u32 = 20;
const STORY_TEMPERATURE: f64 = 0.9;
const REFINE_TEMPERATURE: f64 = 0.4;
const MAX_TOKENS: u32 = 4096;
const DEFAULT_AUDIO_SENTENCE: &str = "ambient sound matching the scene, subtle score.";

#[derive(Debug, Clone, PartialEq)]
pub struct PackRequest {
    pub concept: String,
    pub shot_count: u32,
    pub genre_weights: IndexMap<String, u32>,
    pub image_model: String,
    pub video_model: String,
}

impl PackRequest {
    pub fn new(concept: impl Into<String>) -> Self {
        Self {
            concept: concept.into(),
            shot_count: DEFAULT_SHOT_COUNT,
            genre_weights: default_genre_weights(),
            image_model: String::new(),
            video_model: String::new(),
        }
    }

    pub fn from_project(project: &Project) -> Self {
        Self {
            concept: project.concept.clone(),
            shot_count: project.shot_count,
            genre_weights: project.genre_weights.clone(),
            image_model: project.image_model.clone(),
            video_model: project.video_model.clone(),
        }
    }

    pub fn clamped_count(&self) -> usize {
        self.shot_count.clamp(MIN_SHOTS, MAX_SHOTS) as usize
    }

    /// Empty mappings mean "no preference", which is action-only.
    fn effective_weights(&self) -> IndexMap<String, u32> {
        if self.genre_weights.is_empty() {
            let mut weights = IndexMap::new();
            weights.insert("action".to_string(), 50);
            return weights;
        }
        self.genre_weights.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PackSource {
    Generated {
        model: String,
        /// Per-model prompts came from the batch rewrite.
        refined: bool,
        /// Records the server did not deliver, filled from templates.
        padded: usize,
    },
    Fallback {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackOutcome {
    pub records: Vec<ShotRecord>,
    pub source: PackSource,
}

/// Concept to storyboard. Never fails: anything the server gets wrong turns into templates.
///
/// There are no retries. One failed attempt commits that call to its fallback.
pub struct StoryPipeline {
    generator: Box<dyn TextGenerator>,
    rng: StdRng,
    events: Option<EventLog>,
}

impl StoryPipeline {
    pub fn new(generator: Box<dyn TextGenerator>) -> Self {
        Self {
            generator,
            rng: StdRng::from_entropy(),
            events: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_events(mut self, events: Option<EventLog>) -> Self {
        self.events = events;
        self
    }

    pub fn pack(&mut self, request: &PackRequest) -> PackOutcome {
        let count = request.clamped_count();
        let weights = request.effective_weights();
        let outcome = match self.generate_story(request, count) {
            Ok(rows) => self.finish_generated(request, &weights, rows, count),
            Err(reason) => {
                warn!(reason = %reason, "story generation unavailable, using templates");
                PackOutcome {
                    records: fallback_records(&request.concept, &weights, count, &mut self.rng),
                    source: PackSource::Fallback { reason },
                }
            }
        };
        let (source, fallback_reason) = match &outcome.source {
            PackSource::Generated { .. } => ("generated", None),
            PackSource::Fallback { reason } => ("fallback", Some(reason.clone())),
        };
        record_event(
            self.events.as_ref(),
            SessionEvent::PackCompleted {
                shot_count: outcome.records.len(),
                source: source.to_string(),
                fallback_reason,
            },
        );
        outcome
    }

    fn generate_story(
        &self,
        request: &PackRequest,
        count: usize,
    ) -> Result<Vec<Map<String, Value>>, String> {
        if !self.generator.is_online() {
            return Err(format!("{} is offline", self.generator.name()));
        }
        let raw = self
            .generator
            .generate(&GenerateRequest {
                system: story_system_prompt(count),
                prompt: format!(
                    "Generate a {count}-shot storyboard:\n\n{}",
                    story_input(&request.concept, &request.effective_weights())
                ),
                temperature: STORY_TEMPERATURE,
                max_tokens: MAX_TOKENS,
            })
            .map_err(|err| format!("generation failed: {}", truncate_text(&format!("{err:#}"), 240)))?;
        extract_object_list(&raw, &["prompt"])
            .ok_or_else(|| "server reply held no usable shot list".to_string())
    }

    fn finish_generated(
        &mut self,
        request: &PackRequest,
        weights: &IndexMap<String, u32>,
        rows: Vec<Map<String, Value>>,
        count: usize,
    ) -> PackOutcome {
        let mut records: Vec<ShotRecord> = rows
            .into_iter()
            .take(count)
            .enumerate()
            .map(|(idx, row)| {
                let prompt = string_field(&row, "prompt").unwrap_or_default();
                let label = string_field(&row, "shot_label")
                    .unwrap_or_else(|| format!("Shot {}", idx + 1));
                ShotRecord::uniform(prompt, label)
            })
            .collect();

        let delivered = records.len();
        let padded = count.saturating_sub(delivered);
        if padded > 0 {
            info!(delivered, wanted = count, "padding storyboard from templates");
            let filler = fallback_records(&request.concept, weights, count, &mut self.rng);
            records.extend(filler.into_iter().skip(delivered));
        }

        let refined = self.refine_batch(&mut records, &request.image_model, &request.video_model);
        PackOutcome {
            records,
            source: PackSource::Generated {
                model: self.generator.name().to_string(),
                refined,
                padded,
            },
        }
    }

    /// One rewrite of every prompt into image/video model style. Leaves `records`
    /// untouched unless the reply covers every shot.
    fn refine_batch(
        &self,
        records: &mut [ShotRecord],
        image_model: &str,
        video_model: &str,
    ) -> bool {
        let image_guide = format_guide_for_system_prompt(image_model);
        let video_guide = format_guide_for_system_prompt(video_model);
        if image_guide.is_empty() && video_guide.is_empty() {
            return false;
        }
        let mut instructions = String::new();
        if !image_guide.is_empty() {
            instructions.push_str("\n\nIMAGE MODEL GUIDE (for 'imagePrompt' field):\n");
            instructions.push_str(&image_guide);
        }
        if !video_guide.is_empty() {
            instructions.push_str("\n\nVIDEO MODEL GUIDE (for 'videoPrompt' field):\n");
            instructions.push_str(&video_guide);
        }
        let system = format!(
            "You are a prompt optimization specialist. Rewrite each prompt to follow the syntax, \
keywords, and rules of each target model.\n{instructions}\n\n\
You MUST respond with ONLY valid JSON: an array of exactly {n} objects:\n\
[{{\"imagePrompt\": \"...\", \"videoPrompt\": \"...\"}}]\n\
Rules:\n\
- Preserve the original creative intent of each shot.\n\
- Apply model-specific syntax rules from the guides above.\n\
- If no image guide, copy the original prompt as imagePrompt.\n\
- If no video guide, copy the original prompt as videoPrompt.\n\
- Do NOT add new scene elements, only optimize the language.\n\
- Keep each refined prompt under 150 words.",
            n = records.len()
        );
        let listing = records
            .iter()
            .enumerate()
            .map(|(idx, record)| format!("{}. \"{}\"", idx + 1, record.prompt))
            .collect::<Vec<_>>()
            .join("\n");
        let reply = self.generator.generate(&GenerateRequest {
            system,
            prompt: format!("Refine these {} shot prompts:\n\n{listing}", records.len()),
            temperature: REFINE_TEMPERATURE,
            max_tokens: MAX_TOKENS,
        });
        let raw = match reply {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "batch refinement failed");
                return false;
            }
        };
        let Some(rows) = extract_object_list(&raw, &[]) else {
            warn!("batch refinement reply unusable");
            return false;
        };
        if rows.len() != records.len() {
            warn!(got = rows.len(), wanted = records.len(), "batch refinement count mismatch, keeping originals");
            return false;
        }
        let audio = requires_audio_intent(video_model);
        for (record, row) in records.iter_mut().zip(rows) {
            if let Some(image) = string_field(&row, "imagePrompt") {
                record.image_prompt = image;
            }
            if let Some(video) = string_field(&row, "videoPrompt") {
                record.video_prompt = video;
            }
            if audio {
                record.video_prompt = ensure_audio_intent(&record.video_prompt);
            }
        }
        true
    }

    /// Rewrite one prompt in `target_model`'s style. Any failure hands back `prompt` unchanged.
    pub fn refine(&self, prompt: &str, target_model: &str) -> String {
        let refined = self.try_refine(prompt, target_model);
        record_event(
            self.events.as_ref(),
            SessionEvent::PromptRefined {
                target_model: target_model.to_string(),
                refined: refined.is_some(),
            },
        );
        refined.unwrap_or_else(|| prompt.to_string())
    }

    fn try_refine(&self, prompt: &str, target_model: &str) -> Option<String> {
        if prompt.trim().is_empty() || !self.generator.is_online() {
            return None;
        }
        let kind = kind_for_model(target_model);
        let guide = format_guide_for_system_prompt(target_model);
        let field = match kind {
            ModelKind::Image => "imagePrompt",
            ModelKind::Video => "videoPrompt",
        };
        let system = format!(
            "You are a prompt optimization specialist for {kind} generation. Rewrite the user's \
prompt so it follows the target model's rules without adding new scene elements. Keep it under \
150 words.\n\n{guide}\n\nRespond with ONLY the rewritten prompt as plain text, or as JSON \
{{\"{field}\": \"...\"}}."
        );
        let raw = match self.generator.generate(&GenerateRequest {
            system,
            prompt: format!("Refine this prompt:\n\n\"{}\"", prompt.trim()),
            temperature: REFINE_TEMPERATURE,
            max_tokens: 1024,
        }) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %format!("{err:#}"), model = target_model, "prompt refinement failed");
                return None;
            }
        };
        let text = match extract_json_object(&raw) {
            Some(object) => [field, "prompt", "imagePrompt", "videoPrompt"]
                .iter()
                .find_map(|key| string_field(&object, key))?,
            None => clean_text_reply(&raw),
        };
        if text.is_empty() {
            return None;
        }
        if kind == ModelKind::Video && requires_audio_intent(target_model) {
            return Some(ensure_audio_intent(&text));
        }
        Some(text)
    }
}

fn kind_for_model(model_id: &str) -> ModelKind {
    if IMAGE_ARCH_PREFIXES
        .iter()
        .any(|prefix| model_id.starts_with(prefix))
    {
        ModelKind::Image
    } else {
        ModelKind::Video
    }
}

fn string_field(row: &Map<String, Value>, key: &str) -> Option<String> {
    row.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn story_system_prompt(count: usize) -> String {
    format!(
        "You are a professional filmmaker's storyboard assistant. Generate exactly {count} diverse, \
cinematic shot prompts that tell the story visually.\n\n\
Each shot should be distinct in: camera angle, action, mood, and pacing.\n\
Include a mix of establishing shots, close-ups, action shots, emotional beats and transitions.\n\n\
You MUST respond with ONLY valid JSON: an array of exactly {count} objects:\n\
[{{\"prompt\": \"detailed cinematic scene description\", \"shot_label\": \"short title (3-6 words)\"}}]\n\n\
RULES:\n\
- Each prompt is self-contained and descriptive enough for AI video generation.\n\
- Maintain visual consistency across all shots (same characters, setting, palette).\n\
- Do NOT include dialogue or text overlays.\n\
- Keep each prompt under 100 words.\n\
- Make it visually compelling: lighting, camera movement, atmosphere."
    )
}

fn story_input(concept: &str, weights: &IndexMap<String, u32>) -> String {
    let mut input = if concept.trim().is_empty() {
        "Invent a completely original, surprising, and visually stunning short story. Be creative \
and unexpected. Break it into shots."
            .to_string()
    } else {
        format!(
            "Subject/theme: \"{}\".\nInvent a compelling short story around this subject, then break it into shots.",
            concept.trim()
        )
    };
    if let Some(mix) = genre_mix(weights) {
        input.push_str(&format!("\nGenre mix (approximate weight): {mix}."));
        input.push_str(" Lean the tone and visual style toward the higher-weighted genres.");
    }
    input
}

/// Active genres as rounded percentages, heaviest first; `None` when nothing is active.
pub fn genre_mix(weights: &IndexMap<String, u32>) -> Option<String> {
    let mut active: Vec<(&str, u32)> = weights
        .iter()
        .filter(|(_, weight)| **weight > 0)
        .map(|(genre, weight)| (genre.as_str(), *weight))
        .collect();
    if active.is_empty() {
        return None;
    }
    let total: u64 = active.iter().map(|(_, weight)| u64::from(*weight)).sum();
    active.sort_by(|a, b| b.1.cmp(&a.1));
    let parts: Vec<String> = active
        .iter()
        .map(|(genre, weight)| {
            let pct = (f64::from(*weight) * 100.0 / total as f64).round();
            format!("{genre} ({pct}%)")
        })
        .collect();
    Some(parts.join(", "))
}

/// Make sure the last sentence of a video prompt is an `Audio:` sentence.
pub fn ensure_audio_intent(prompt: &str) -> String {
    let trimmed = prompt.trim_end();
    let closing = last_sentence(trimmed);
    if let Some(rest) = closing.strip_prefix(AUDIO_MARKER) {
        if !rest.trim().is_empty() {
            return trimmed.to_string();
        }
    }
    let mut out = trimmed.to_string();
    if !out.is_empty() && !out.ends_with(['.', '!', '?']) {
        out.push('.');
    }
    if !out.is_empty() {
        out.push(' ');
    }
    out.push_str(AUDIO_MARKER);
    out.push(' ');
    out.push_str(DEFAULT_AUDIO_SENTENCE);
    out
}

/// The text after the last sentence break, without its closing punctuation.
fn last_sentence(text: &str) -> &str {
    let body = text.trim_end_matches(['.', '!', '?']);
    let mut start = 0;
    let mut after_stop = false;
    for (pos, ch) in body.char_indices() {
        if after_stop && ch.is_whitespace() {
            start = pos;
        }
        after_stop = matches!(ch, '.' | '!' | '?' | '\n');
        if ch == '\n' {
            start = pos + ch.len_utf8();
        }
    }
    body[start..].trim()
}
