use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use smoothbrain_contracts::events::{EventLog, SessionEvent};
use smoothbrain_contracts::models::ModelKind;
use smoothbrain_contracts::project::{Project, MAX_CHARACTERS};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::record_event;

pub const PROJECT_FILE: &str = "project.json";
pub const CHARACTERS_SUBFOLDER: &str = "characters";
pub const ASSET_SUBFOLDERS: &[&str] = &[CHARACTERS_SUBFOLDER, "images", "videos"];
const TEMP_PREFIX: &str = ".project.";
const TEMP_SUFFIX: &str = ".tmp";
const MAX_NAME_ATTEMPTS: u32 = 64;
const MAX_SLUG_CHARS: usize = 40;

/// Process-wide sequence that keeps same-instant imports apart.
static ASSET_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectSummary {
    pub dir: PathBuf,
    pub id: String,
    pub name: String,
    pub concept: String,
    pub shot_count: u32,
    pub saved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GalleryItem {
    pub path: PathBuf,
    pub kind: ModelKind,
    pub size_bytes: u64,
}

/// One project directory: `project.json` plus the asset subfolders.
///
/// The project file is only ever replaced by rename, and assets are only ever
/// created under fresh names, so readers never see a half-written file.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    dir: PathBuf,
    events: Option<EventLog>,
}

/// A fully written temp file waiting to replace `project.json`.
///
/// Dropping it without [`StagedSave::commit`] deletes the temp file and leaves
/// the committed project untouched.
pub struct StagedSave<'a> {
    store: &'a ProjectStore,
    temp: NamedTempFile,
    shot_count: usize,
}

impl StagedSave<'_> {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    pub fn commit(self) -> Result<PathBuf> {
        let target = self.store.project_file();
        self.temp
            .persist(&target)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to replace {}", target.display()))?;
        debug!(path = %target.display(), "project committed");
        record_event(
            self.store.events.as_ref(),
            SessionEvent::ProjectSaved {
                path: target.clone(),
                shot_count: self.shot_count,
            },
        );
        Ok(target)
    }
}

impl ProjectStore {
    /// Open (creating if needed) a project directory and its asset subfolders.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create project dir {}", dir.display()))?;
        for sub in ASSET_SUBFOLDERS {
            let path = dir.join(sub);
            fs::create_dir_all(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
        }
        Ok(Self { dir, events: None })
    }

    pub fn with_events(mut self, events: Option<EventLog>) -> Self {
        self.events = events;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn project_file(&self) -> PathBuf {
        self.dir.join(PROJECT_FILE)
    }

    /// Stamp `saved_at` and atomically replace `project.json`.
    pub fn save(&self, project: &mut Project) -> Result<PathBuf> {
        self.stage(project)?.commit()
    }

    /// Write the project to a synced temp file in the project dir without committing it.
    pub fn stage(&self, project: &mut Project) -> Result<StagedSave<'_>> {
        project.saved_at = Some(Utc::now());
        let payload =
            serde_json::to_vec_pretty(project).context("failed to serialize project")?;
        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.dir)
            .with_context(|| format!("failed to create temp file in {}", self.dir.display()))?;
        temp.write_all(&payload)
            .and_then(|_| temp.write_all(b"\n"))
            .context("failed to write project temp file")?;
        temp.as_file()
            .sync_all()
            .context("failed to sync project temp file")?;
        Ok(StagedSave {
            store: self,
            temp,
            shot_count: project.shots.len(),
        })
    }

    /// Load `project.json`, sweeping temp files a crashed save left behind.
    pub fn load(&self) -> Result<Project> {
        let removed = self.clean_stale_temps();
        if removed > 0 {
            info!(removed, dir = %self.dir.display(), "removed stale project temp files");
        }
        load(&self.project_file())
    }

    pub fn clean_stale_temps(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(err) => warn!(error = %err, file = %name, "could not remove stale temp file"),
            }
        }
        removed
    }

    /// Copy `source` into `<dir>/<subfolder>/` under a name no other import can take.
    pub fn copy_asset(&self, source: &Path, subfolder: &str) -> Result<PathBuf> {
        if !source.is_file() {
            bail!("asset source {} is not a file", source.display());
        }
        let folder = self.dir.join(subfolder);
        fs::create_dir_all(&folder)
            .with_context(|| format!("failed to create {}", folder.display()))?;

        let stem = source
            .file_stem()
            .map(|stem| sanitize_stem(&stem.to_string_lossy()))
            .unwrap_or_else(|| "asset".to_string());
        let ext = source
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase());

        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = match &ext {
                Some(ext) => format!("{stem}-{}.{ext}", unique_token()),
                None => format!("{stem}-{}", unique_token()),
            };
            let dest = folder.join(name);
            let mut out = match OpenOptions::new().write(true).create_new(true).open(&dest) {
                Ok(file) => file,
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to create {}", dest.display()))
                }
            };
            if let Err(err) = copy_into(source, &mut out) {
                drop(out);
                let _ = fs::remove_file(&dest);
                return Err(err).with_context(|| {
                    format!("failed to copy {} to {}", source.display(), dest.display())
                });
            }
            record_event(
                self.events.as_ref(),
                SessionEvent::AssetImported {
                    source: source.to_path_buf(),
                    stored: dest.clone(),
                },
            );
            return Ok(dest);
        }
        bail!(
            "no free asset name for {} after {MAX_NAME_ATTEMPTS} attempts",
            source.display()
        )
    }

    /// Copy a character image into the project and register it.
    /// A full roster is refused before anything is written.
    pub fn attach_character(&self, project: &mut Project, name: &str, image: &Path) -> Result<PathBuf> {
        if project.characters.len() >= MAX_CHARACTERS {
            bail!("a project holds at most {MAX_CHARACTERS} characters");
        }
        let stored = self.copy_asset(image, CHARACTERS_SUBFOLDER)?;
        project.add_character(name, Some(stored.clone()))?;
        Ok(stored)
    }

    /// Image and video files in one asset subfolder, by file name.
    pub fn scan_gallery(&self, subfolder: &str) -> Result<Vec<GalleryItem>> {
        let folder = self.dir.join(subfolder);
        if !folder.is_dir() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&folder).with_context(|| format!("failed to list {}", folder.display()))?;
        let mut items = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let Some(kind) = kind_for_path(&path) else {
                continue;
            };
            items.push(GalleryItem {
                path,
                kind,
                size_bytes: meta.len(),
            });
        }
        items.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(items)
    }
}

/// Read a project file (or a project directory) tolerating schema drift.
pub fn load(path: &Path) -> Result<Project> {
    let file = if path.is_dir() {
        path.join(PROJECT_FILE)
    } else {
        path.to_path_buf()
    };
    let raw = fs::read_to_string(&file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let mut project: Project = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    project.normalize();
    Ok(project)
}

/// Create `<projects_root>/<slug>-<token>` with its asset subfolders.
pub fn create_project_dir(projects_root: &Path, name: &str) -> Result<ProjectStore> {
    fs::create_dir_all(projects_root)
        .with_context(|| format!("failed to create {}", projects_root.display()))?;
    let slug = slugify(name);
    for _ in 0..MAX_NAME_ATTEMPTS {
        let dir = projects_root.join(format!("{slug}-{}", unique_token()));
        match fs::create_dir(&dir) {
            Ok(()) => return ProjectStore::open(dir),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("failed to create {}", dir.display()))
            }
        }
    }
    bail!("no free project directory name for {name:?}")
}

/// Projects under `projects_root`, most recently saved first.
///
/// Directories without a readable project file are skipped.
pub fn list_recent_projects(projects_root: &Path, limit: usize) -> Vec<ProjectSummary> {
    let Ok(entries) = fs::read_dir(projects_root) else {
        return Vec::new();
    };
    let mut summaries: Vec<ProjectSummary> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|dir| dir.join(PROJECT_FILE).is_file())
        .filter_map(|dir| match load(&dir) {
            Ok(project) => Some(ProjectSummary {
                id: project.id,
                name: project.name,
                concept: project.concept,
                shot_count: project.shot_count,
                saved_at: project.saved_at,
                dir,
            }),
            Err(err) => {
                debug!(error = %format!("{err:#}"), dir = %dir.display(), "skipping unreadable project");
                None
            }
        })
        .collect();
    summaries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
    summaries.truncate(limit);
    summaries
}

fn copy_into(source: &Path, out: &mut File) -> io::Result<()> {
    let mut input = File::open(source)?;
    io::copy(&mut input, out)?;
    out.sync_all()
}

fn unique_token() -> String {
    let seq = ASSET_SEQ.fetch_add(1, Ordering::Relaxed);
    let random = Uuid::new_v4().simple().to_string();
    format!("{seq:04x}{}", &random[..6])
}

fn kind_for_path(path: &Path) -> Option<ModelKind> {
    let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
    [ModelKind::Image, ModelKind::Video]
        .into_iter()
        .find(|kind| kind.artifact_extensions().contains(&ext.as_str()))
}

fn sanitize_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .take(MAX_SLUG_CHARS)
        .collect();
    if cleaned.trim_matches('_').is_empty() {
        "asset".to_string()
    } else {
        cleaned
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::new();
    for ch in name.trim().to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
        if slug.len() >= MAX_SLUG_CHARS {
            break;
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug.to_string()
    }
}
