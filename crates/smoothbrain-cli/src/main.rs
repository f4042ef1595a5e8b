use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indexmap::IndexMap;
use serde_json::json;
use smoothbrain_contracts::events::EventLog;
use smoothbrain_contracts::models::{ModelKind, ModelRegistry, ModelSelector, ResolutionTier, Vibe};
use smoothbrain_contracts::project::Project;
use smoothbrain_engine::store::{create_project_dir, list_recent_projects};
use smoothbrain_engine::{
    CancelToken, DryrunBackend, EngineConfig, ModelScanner, OllamaClient, Orchestrator,
    PackRequest, PackSource, ProjectStore, ShotOutcome, StoryPipeline,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "smoothbrain", version, about = "Story to storyboard to shots")]
struct Cli {
    /// Host application root (defaults/, finetunes/, ckpts/, profiles/).
    #[arg(long, global = true)]
    app_root: Option<PathBuf>,
    #[arg(long, global = true)]
    ollama_url: Option<String>,
    #[arg(long, global = true)]
    ollama_model: Option<String>,
    /// Append session events to this jsonl file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Scan(ScanArgs),
    Pack(PackArgs),
    Refine(RefineArgs),
    Render(RenderArgs),
    Projects(ProjectsArgs),
    Status,
}

#[derive(Debug, Parser)]
struct ScanArgs {
    /// Only the curated video models.
    #[arg(long)]
    simple: bool,
}

#[derive(Debug, Parser)]
struct PackArgs {
    #[arg(long, default_value = "")]
    concept: String,
    #[arg(long, default_value_t = 6)]
    shots: u32,
    /// `genre=weight`, repeatable. Omitted genres weigh zero.
    #[arg(long = "genre", value_parser = parse_genre_weight)]
    genres: Vec<(String, u32)>,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long)]
    video_model: Option<String>,
    #[arg(long)]
    vibe: Option<String>,
    /// Existing project directory to update; a new one is created otherwise.
    #[arg(long)]
    project: Option<PathBuf>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    seed: Option<u64>,
    /// `name=image_path`, repeatable, at most four. The image is copied into the project.
    #[arg(long = "character", value_parser = parse_character)]
    characters: Vec<(String, PathBuf)>,
}

#[derive(Debug, Parser)]
struct RefineArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    model: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Image,
    Video,
}

impl From<KindArg> for ModelKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Image => ModelKind::Image,
            KindArg::Video => ModelKind::Video,
        }
    }
}

#[derive(Debug, Parser)]
struct RenderArgs {
    #[arg(long)]
    project: PathBuf,
    #[arg(long, value_enum, default_value = "image")]
    kind: KindArg,
    /// Comma-separated shot numbers. Defaults to every unapproved shot for images,
    /// and for video to approved storyboard frames whose video is not yet approved.
    #[arg(long, value_delimiter = ',')]
    shots: Vec<u32>,
    #[arg(long)]
    auto_approve: bool,
    #[arg(long)]
    resolution: Option<String>,
}

#[derive(Debug, Parser)]
struct ProjectsArgs {
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("smoothbrain error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = EngineConfig::from_env();
    if let Some(root) = cli.app_root {
        config = config.with_app_root(root);
    }
    if let Some(url) = cli.ollama_url {
        config = config.with_ollama_url(url);
    }
    if cli.ollama_model.is_some() {
        config = config.with_ollama_model(cli.ollama_model);
    }
    let events = cli
        .events
        .map(|path| EventLog::new(path, format!("cli-{}", std::process::id())));

    match cli.command {
        Command::Scan(args) => run_scan(&config, args, events),
        Command::Pack(args) => run_pack(&config, args, events),
        Command::Refine(args) => run_refine(&config, args, events),
        Command::Render(args) => run_render(&config, args, events),
        Command::Projects(args) => run_projects(&config, args),
        Command::Status => run_status(&config),
    }
}

fn scan_registry(config: &EngineConfig, events: Option<EventLog>) -> ModelRegistry {
    let (registry, diagnostics) = ModelScanner::new(config).with_events(events).scan_all();
    for diagnostic in &diagnostics {
        warn!(path = %diagnostic.path.display(), reason = %diagnostic.reason, "descriptor skipped");
    }
    registry
}

fn run_scan(config: &EngineConfig, args: ScanArgs, events: Option<EventLog>) -> Result<()> {
    let scanner = ModelScanner::new(config)
        .with_simple_mode(args.simple)
        .with_events(events);
    let mut output = serde_json::Map::new();
    let mut skipped = Vec::new();
    for kind in [ModelKind::Video, ModelKind::Image] {
        let report = scanner.scan(kind);
        skipped.extend(report.diagnostics.iter().map(|diagnostic| {
            json!({"path": diagnostic.path, "reason": diagnostic.reason})
        }));
        output.insert(kind.to_string(), serde_json::to_value(&report.profiles)?);
    }
    output.insert("skipped".to_string(), json!(skipped));
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run_pack(config: &EngineConfig, args: PackArgs, events: Option<EventLog>) -> Result<()> {
    let store = match &args.project {
        Some(dir) => ProjectStore::open(dir)?,
        None => {
            let name = args.name.clone().unwrap_or_else(|| args.concept.clone());
            create_project_dir(&config.projects_root, &name)?
        }
    }
    .with_events(events.clone());
    let mut project = if store.project_file().is_file() {
        store.load()?
    } else {
        Project::new(args.concept.clone())
    };
    project.concept = args.concept.clone();
    project.shot_count = args.shots;
    if let Some(name) = args.name {
        project.name = name;
    }
    if let Some(raw) = &args.vibe {
        project.vibe = Vibe::parse(raw).with_context(|| format!("unknown vibe {raw:?}"))?;
    }
    if !args.genres.is_empty() {
        project.genre_weights = args.genres.into_iter().collect::<IndexMap<_, _>>();
    }
    for (name, image) in &args.characters {
        store.attach_character(&mut project, name, image)?;
    }

    let selector = ModelSelector::new(Some(scan_registry(config, events.clone())));
    for (kind, requested) in [
        (ModelKind::Image, args.image_model),
        (ModelKind::Video, args.video_model),
    ] {
        let current = match kind {
            ModelKind::Image => &mut project.image_model,
            ModelKind::Video => &mut project.video_model,
        };
        let wanted = requested.or_else(|| Some(current.clone()).filter(|id| !id.is_empty()));
        match selector.select(wanted.as_deref(), kind) {
            Ok(selection) => {
                if let Some(reason) = &selection.fallback_reason {
                    warn!(%kind, reason = %reason, "model fallback");
                }
                *current = selection.model.id;
            }
            Err(reason) => {
                warn!(%kind, reason = %reason, "no installed model to select");
                *current = wanted.unwrap_or_default();
            }
        }
    }

    let generator = OllamaClient::new(config)?;
    let mut pipeline = StoryPipeline::new(Box::new(generator)).with_events(events);
    if let Some(seed) = args.seed {
        pipeline = pipeline.with_seed(seed);
    }
    let outcome = pipeline.pack(&PackRequest::from_project(&project));
    match &outcome.source {
        PackSource::Generated { model, refined, padded } => {
            info!(model = %model, refined, padded, "storyboard generated")
        }
        PackSource::Fallback { reason } => info!(reason = %reason, "storyboard from templates"),
    }
    project.apply_pack(outcome.records);
    project.current_step = project.current_step.max(2);
    let path = store.save(&mut project)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "project": path,
            "source": outcome.source,
            "shots": project.shots,
        }))?
    );
    Ok(())
}

fn run_refine(config: &EngineConfig, args: RefineArgs, events: Option<EventLog>) -> Result<()> {
    let generator = OllamaClient::new(config)?;
    let pipeline = StoryPipeline::new(Box::new(generator)).with_events(events);
    println!("{}", pipeline.refine(&args.prompt, &args.model));
    Ok(())
}

fn run_render(config: &EngineConfig, args: RenderArgs, events: Option<EventLog>) -> Result<()> {
    let store = ProjectStore::open(&args.project)?.with_events(events.clone());
    let mut project = store.load()?;
    if let Some(raw) = &args.resolution {
        project.export.resolution_tier = ResolutionTier::parse(raw)
            .with_context(|| format!("unknown resolution tier {raw:?}"))?;
    }
    let kind = ModelKind::from(args.kind);
    let shots = if args.shots.is_empty() {
        match kind {
            ModelKind::Image => project.storyboard_queue(),
            ModelKind::Video => project.video_queue(),
        }
    } else {
        args.shots
    };
    if shots.is_empty() {
        match kind {
            ModelKind::Image => bail!("nothing to render: every shot is already approved"),
            ModelKind::Video => {
                bail!("nothing to render: no approved storyboard frame awaits a video")
            }
        }
    }

    let registry = scan_registry(config, events.clone());
    let mut orchestrator = Orchestrator::new(
        Box::new(DryrunBackend::new()),
        registry,
        config.output_root.clone(),
    )
    .with_store(store)
    .with_auto_approve(args.auto_approve)
    .with_events(events);
    let summary = orchestrator.run_batch(&mut project, &shots, kind, &CancelToken::new(), |progress| {
        let status = match &progress.outcome {
            ShotOutcome::Succeeded { artifact } => format!("ok {}", artifact.display()),
            ShotOutcome::Failed { error } => format!("failed: {error}"),
            ShotOutcome::Cancelled => "cancelled".to_string(),
        };
        eprintln!(
            "[{}/{}] shot {} {status}",
            progress.position, progress.total, progress.index
        );
    })?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_projects(config: &EngineConfig, args: ProjectsArgs) -> Result<()> {
    let recent = list_recent_projects(&config.projects_root, args.limit);
    if recent.is_empty() {
        info!(root = %config.projects_root.display(), "no saved projects");
    }
    println!("{}", serde_json::to_string_pretty(&recent)?);
    Ok(())
}

fn run_status(config: &EngineConfig) -> Result<()> {
    let client = OllamaClient::new(config)?;
    let status = client.status();
    if !status.online {
        warn!(url = %config.ollama_url, "generation server offline; packs will use templates");
    }
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn parse_genre_weight(raw: &str) -> Result<(String, u32), String> {
    let (genre, weight) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected genre=weight, got {raw:?}"))?;
    let weight = weight
        .trim()
        .parse::<u32>()
        .map_err(|err| format!("bad weight in {raw:?}: {err}"))?;
    Ok((genre.trim().to_ascii_lowercase(), weight))
}

fn parse_character(raw: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=image_path, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("character name missing in {raw:?}"));
    }
    Ok((name.to_string(), PathBuf::from(path.trim())))
}
