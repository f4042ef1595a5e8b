mod shot;

use std::path::{Path, PathBuf};

use anyhow::bail;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ModelKind, ResolutionTier, Vibe};
use crate::story::{ShotRecord, ALL_GENRES};

pub use shot::{ApprovalState, Shot};

pub const PROJECT_SCHEMA_VERSION: u32 = 1;
pub const MAX_CHARACTERS: usize = 4;
pub const DEFAULT_SHOT_COUNT: u32 = 6;
pub const DEFAULT_SHOT_DURATION_S: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterRef {
    pub name: String,
    pub image_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Seconds per shot unless the shot overrides it.
    pub shot_duration: f64,
    pub resolution_tier: ResolutionTier,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            shot_duration: DEFAULT_SHOT_DURATION_S,
            resolution_tier: ResolutionTier::default(),
        }
    }
}

/// Root aggregate persisted as `project.json`.
///
/// Every field has a default so older or newer files load without error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub schema_version: u32,
    pub id: String,
    pub name: String,
    pub concept: String,
    pub shot_count: u32,
    pub genre_weights: IndexMap<String, u32>,
    pub vibe: Vibe,
    pub characters: Vec<CharacterRef>,
    pub shots: Vec<Shot>,
    pub image_model: String,
    pub video_model: String,
    /// Accelerator profile name for the video model, empty for the model's defaults.
    pub speed_profile: String,
    pub export: ExportSettings,
    pub current_step: u32,
    pub saved_at: Option<DateTime<Utc>>,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            schema_version: PROJECT_SCHEMA_VERSION,
            id: String::new(),
            name: String::new(),
            concept: String::new(),
            shot_count: DEFAULT_SHOT_COUNT,
            genre_weights: default_genre_weights(),
            vibe: Vibe::default(),
            characters: Vec::new(),
            shots: Vec::new(),
            image_model: String::new(),
            video_model: String::new(),
            speed_profile: String::new(),
            export: ExportSettings::default(),
            current_step: 1,
            saved_at: None,
        }
    }
}

/// Every catalog genre, action at 50 and the rest switched off.
pub fn default_genre_weights() -> IndexMap<String, u32> {
    ALL_GENRES
        .iter()
        .map(|genre| {
            let weight = if *genre == "action" { 50 } else { 0 };
            (genre.to_string(), weight)
        })
        .collect()
}

impl Project {
    pub fn new(concept: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            concept: concept.into(),
            ..Self::default()
        }
    }

    /// Replace the storyboard with freshly packed records. Artifacts and approvals reset.
    pub fn apply_pack(&mut self, records: Vec<ShotRecord>) {
        self.shots = records
            .into_iter()
            .enumerate()
            .map(|(idx, record)| Shot {
                index: idx as u32 + 1,
                label: record.shot_label,
                prompt: record.prompt,
                image_prompt: record.image_prompt,
                video_prompt: record.video_prompt,
                ..Shot::default()
            })
            .collect();
        self.shot_count = self.shots.len() as u32;
    }

    pub fn shot(&self, index: u32) -> Option<&Shot> {
        self.shots.iter().find(|shot| shot.index == index)
    }

    pub fn shot_mut(&mut self, index: u32) -> Option<&mut Shot> {
        self.shots.iter_mut().find(|shot| shot.index == index)
    }

    pub fn remove_shot(&mut self, index: u32) -> Option<Shot> {
        let position = self.shots.iter().position(|shot| shot.index == index)?;
        let removed = self.shots.remove(position);
        self.reindex();
        self.shot_count = self.shots.len() as u32;
        Some(removed)
    }

    pub fn set_approval(&mut self, index: u32, state: ApprovalState) -> bool {
        match self.shot_mut(index) {
            Some(shot) => {
                shot.approval = state;
                true
            }
            None => false,
        }
    }

    /// Indices of shots in the given state, in story order.
    pub fn indices_with(&self, state: ApprovalState) -> Vec<u32> {
        self.shots
            .iter()
            .filter(|shot| shot.approval == state)
            .map(|shot| shot.index)
            .collect()
    }

    /// Shots that still need a storyboard image: not approved and carrying some prompt.
    pub fn storyboard_queue(&self) -> Vec<u32> {
        self.shots
            .iter()
            .filter(|shot| !shot.is_approved() && !shot.prompt_for(ModelKind::Image).is_empty())
            .map(|shot| shot.index)
            .collect()
    }

    /// Shots ready for motion: storyboard approved, video not yet approved, some prompt.
    pub fn video_queue(&self) -> Vec<u32> {
        self.shots
            .iter()
            .filter(|shot| {
                shot.is_approved()
                    && shot.video_approval != ApprovalState::Approved
                    && !shot.prompt_for(ModelKind::Video).is_empty()
            })
            .map(|shot| shot.index)
            .collect()
    }

    pub fn all_approved(&self) -> bool {
        !self.shots.is_empty() && self.shots.iter().all(Shot::is_approved)
    }

    pub fn shot_duration(&self, shot: &Shot) -> f64 {
        shot.duration
            .filter(|value| value.is_finite() && *value > 0.0)
            .unwrap_or(self.export.shot_duration)
    }

    pub fn add_character(
        &mut self,
        name: impl Into<String>,
        image_path: Option<PathBuf>,
    ) -> anyhow::Result<()> {
        if self.characters.len() >= MAX_CHARACTERS {
            bail!("a project holds at most {MAX_CHARACTERS} characters");
        }
        self.characters.push(CharacterRef {
            name: name.into(),
            image_path,
        });
        Ok(())
    }

    pub fn character_images(&self) -> Vec<&Path> {
        self.characters
            .iter()
            .filter_map(|character| character.image_path.as_deref())
            .collect()
    }

    /// Repair invariants after loading a file written by another version.
    pub fn normalize(&mut self) {
        self.characters.truncate(MAX_CHARACTERS);
        self.reindex();
        if self.shot_count == 0 {
            self.shot_count = self.shots.len().max(1) as u32;
        }
        if !(self.export.shot_duration.is_finite() && self.export.shot_duration > 0.0) {
            self.export.shot_duration = DEFAULT_SHOT_DURATION_S;
        }
    }

    fn reindex(&mut self) {
        for (idx, shot) in self.shots.iter_mut().enumerate() {
            shot.index = idx as u32 + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(prompt: &str) -> ShotRecord {
        ShotRecord {
            prompt: prompt.to_string(),
            shot_label: format!("{prompt} label"),
            image_prompt: format!("{prompt} still"),
            video_prompt: format!("{prompt} motion"),
        }
    }

    #[test]
    fn apply_pack_numbers_shots_in_order() {
        let mut project = Project::new("a fox");
        project.apply_pack(vec![record("one"), record("two"), record("three")]);
        assert_eq!(project.shot_count, 3);
        let indices: Vec<u32> = project.shots.iter().map(|shot| shot.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(project.shots[1].image_prompt, "two still");
        assert_eq!(project.shots[2].approval, ApprovalState::Pending);
    }

    #[test]
    fn removing_a_shot_keeps_order_and_reindexes() {
        let mut project = Project::new("a fox");
        project.apply_pack(vec![record("one"), record("two"), record("three")]);
        let removed = project.remove_shot(2).map(|shot| shot.prompt);
        assert_eq!(removed.as_deref(), Some("two"));
        let prompts: Vec<&str> = project.shots.iter().map(|s| s.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["one", "three"]);
        assert_eq!(project.shots[1].index, 2);
        assert_eq!(project.shot_count, 2);
    }

    #[test]
    fn character_limit_is_enforced() {
        let mut project = Project::new("crew");
        for idx in 0..MAX_CHARACTERS {
            project.add_character(format!("c{idx}"), None).unwrap();
        }
        assert!(project.add_character("extra", None).is_err());
    }

    #[test]
    fn loading_tolerates_missing_and_unknown_fields() -> anyhow::Result<()> {
        let raw = json!({
            "concept": "lighthouse keeper",
            "shots": [
                {"prompt": "waves", "approval": "approved", "camera_rig": "drone"},
                {"prompt": "storm", "index": 9}
            ],
            "export": {"shot_duration": 3.5},
            "future_feature": {"enabled": true}
        });
        let mut project: Project = serde_json::from_value(raw)?;
        project.normalize();
        assert_eq!(project.concept, "lighthouse keeper");
        assert_eq!(project.shots.len(), 2);
        assert_eq!(project.shots[1].index, 2);
        assert!(project.shots[0].is_approved());
        assert_eq!(project.export.shot_duration, 3.5);
        assert_eq!(project.export.resolution_tier, ResolutionTier::P480);
        assert_eq!(project.genre_weights.get("action"), Some(&50));
        Ok(())
    }

    #[test]
    fn video_queue_needs_storyboard_approval_and_open_video_review() {
        let mut project = Project::new("fox");
        project.apply_pack(vec![record("one"), record("two"), record("three"), record("four")]);
        for index in [1, 2, 4] {
            project.set_approval(index, ApprovalState::Approved);
        }
        if let Some(shot) = project.shot_mut(2) {
            shot.set_review(ModelKind::Video, ApprovalState::Approved);
        }
        if let Some(shot) = project.shot_mut(4) {
            shot.set_review(ModelKind::Video, ApprovalState::Rejected);
        }
        assert_eq!(project.video_queue(), vec![1, 4]);
        assert_eq!(project.indices_with(ApprovalState::Approved), vec![1, 2, 4]);
        assert_eq!(project.shots[1].review(ModelKind::Video), ApprovalState::Approved);
    }

    #[test]
    fn storyboard_queue_skips_approved_and_empty_shots() {
        let mut project = Project::new("fox");
        project.apply_pack(vec![record("one"), record("two"), record("three")]);
        project.set_approval(1, ApprovalState::Approved);
        project.set_approval(2, ApprovalState::Rejected);
        if let Some(shot) = project.shot_mut(3) {
            shot.prompt.clear();
            shot.image_prompt.clear();
        }
        assert_eq!(project.storyboard_queue(), vec![2]);
        assert_eq!(project.indices_with(ApprovalState::Approved), vec![1]);
        assert!(!project.all_approved());
    }

    #[test]
    fn shot_duration_prefers_valid_override() {
        let mut project = Project::new("fox");
        project.apply_pack(vec![record("one")]);
        assert_eq!(project.shot_duration(&project.shots[0]), DEFAULT_SHOT_DURATION_S);
        project.shots[0].duration = Some(2.0);
        assert_eq!(project.shot_duration(&project.shots[0]), 2.0);
        project.shots[0].duration = Some(-1.0);
        assert_eq!(project.shot_duration(&project.shots[0]), DEFAULT_SHOT_DURATION_S);
    }
}
