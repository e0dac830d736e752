//! Terminal front-end: argument parsing, wiring, and the line-driven
//! scoring loop.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines, Stdin},
    signal,
};

use crate::{
    catalog::{Catalog, ALL_DATASET_ID},
    db::Database,
    export::Exporter,
    log_error,
    models::Participant,
    playback::{ItemLoader, LoggingPlayback, Playback},
    session::{
        commands::HELP, events, Cursor, EventReceiver, ScoringCommand, SessionController,
        SessionError, SessionEvent, SessionStorage,
    },
    settings::SettingsStore,
};

const ENABLE_LOGS: bool = true;

const DB_FILE_NAME: &str = "nonword-scorer.sqlite3";
const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Parser, Debug)]
#[command(name = "nonword-scorer")]
#[command(about = "Score nonword repetition recordings item by item")]
#[command(version)]
pub struct Cli {
    /// Directory holding the session database, settings and exports
    #[arg(long, default_value = ".", env = "NONWORD_SCORER_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Participant manifest; overrides `manifest_path` from settings
    #[arg(long, env = "NONWORD_SCORER_MANIFEST")]
    pub manifest: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start or resume an interactive scoring session
    Score {
        #[arg(short, long)]
        rater: String,
        #[arg(short, long, default_value = ALL_DATASET_ID)]
        dataset: String,
        /// Participant keys (`timing:id`); defaults to the whole dataset
        #[arg(short, long, value_delimiter = ',')]
        participants: Vec<String>,
        /// Reopen the stored session instead of starting over
        #[arg(long)]
        resume: bool,
    },
    /// List stored sessions, most recently saved first
    Sessions,
    /// List datasets in the manifest
    Datasets,
    /// Export every assigned participant of a stored session to one CSV
    Export {
        #[arg(short, long)]
        rater: String,
        #[arg(short, long, default_value = ALL_DATASET_ID)]
        dataset: String,
    },
    /// Show or change persisted settings
    Config {
        #[arg(long)]
        save_debounce_ms: Option<u64>,
        #[arg(long)]
        export_dir: Option<PathBuf>,
        #[arg(long)]
        manifest_path: Option<PathBuf>,
    },
}

pub struct AppContext {
    pub settings: SettingsStore,
    pub catalog: Arc<Catalog>,
    pub storage: SessionStorage,
    pub exporter: Exporter,
}

impl AppContext {
    pub fn open(data_dir: &Path, manifest: Option<PathBuf>) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE_NAME))?;
        let current = settings.current();

        let manifest_path = manifest.unwrap_or_else(|| resolve(data_dir, &current.manifest_path));
        let catalog = Catalog::load(&manifest_path)?;

        let database = Database::new(data_dir.join(DB_FILE_NAME))?;
        let storage = SessionStorage::new(database, &current);
        let exporter = Exporter::new(resolve(data_dir, &current.export_dir));

        Ok(Self {
            settings,
            catalog: Arc::new(catalog),
            storage,
            exporter,
        })
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Command::Config {
        save_debounce_ms,
        export_dir,
        manifest_path,
    } = cli.command
    {
        // Editing settings must work before a manifest exists.
        std::fs::create_dir_all(&cli.data_dir)?;
        let store = SettingsStore::new(cli.data_dir.join(SETTINGS_FILE_NAME))?;
        return configure(&store, save_debounce_ms, export_dir, manifest_path);
    }

    let ctx = AppContext::open(&cli.data_dir, cli.manifest)?;
    match cli.command {
        Command::Score {
            rater,
            dataset,
            participants,
            resume,
        } => score(&ctx, &rater, &dataset, participants, resume).await,
        Command::Sessions => list_sessions(&ctx).await,
        Command::Datasets => {
            for dataset in ctx.catalog.datasets() {
                println!(
                    "{:<12} {:<28} {:>4} participants",
                    dataset.id,
                    dataset.label,
                    dataset.participants.len()
                );
            }
            Ok(())
        }
        Command::Export { rater, dataset } => export_stored(&ctx, &rater, &dataset).await,
        Command::Config { .. } => Ok(()),
    }
}

fn configure(
    store: &SettingsStore,
    save_debounce_ms: Option<u64>,
    export_dir: Option<PathBuf>,
    manifest_path: Option<PathBuf>,
) -> Result<()> {
    let mut settings = store.current();
    let changed = save_debounce_ms.is_some() || export_dir.is_some() || manifest_path.is_some();
    if let Some(ms) = save_debounce_ms {
        settings.save_debounce_ms = ms;
    }
    if let Some(dir) = export_dir {
        settings.export_dir = dir;
    }
    if let Some(path) = manifest_path {
        settings.manifest_path = path;
    }
    if changed {
        store.update(settings.clone())?;
        info!("Settings updated");
    }
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

async fn list_sessions(ctx: &AppContext) -> Result<()> {
    let item_count = ctx.catalog.trial_template().len();
    let sessions = ctx.storage.list_sessions().await?;
    if sessions.is_empty() {
        println!("No stored sessions.");
    }
    for state in sessions {
        let total = state.assigned_participants.len() * item_count;
        println!(
            "{:<16} {:<12} {:>5}/{:<5} exported {:>3}  saved {}",
            state.rater_id,
            state.dataset_id,
            state.assigned_scored_count(item_count),
            total,
            state.exported_participants.len(),
            state.last_saved.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn export_stored(ctx: &AppContext, rater: &str, dataset_id: &str) -> Result<()> {
    let session = ctx
        .storage
        .load(rater, dataset_id)
        .await
        .ok_or_else(|| SessionError::NoSavedSession {
            rater_id: rater.to_string(),
            dataset_id: dataset_id.to_string(),
        })?;
    let dataset = ctx
        .catalog
        .dataset(dataset_id)
        .ok_or_else(|| SessionError::UnknownDataset(dataset_id.to_string()))?;
    let participants: Vec<Participant> = session
        .state()
        .assigned_participants
        .iter()
        .filter_map(|key| ctx.catalog.participant_by_key(key).cloned())
        .collect();

    let path = ctx.exporter.export_selected(
        session.state(),
        &participants,
        dataset,
        ctx.catalog.trial_template(),
        &ctx.catalog,
        Utc::now(),
    )?;
    println!("{}", path.display());
    Ok(())
}

type Input = Lines<BufReader<Stdin>>;

/// Next stdin line, or `None` on EOF or Ctrl-C.
async fn read_line(input: &mut Input) -> Result<Option<String>> {
    tokio::select! {
        line = input.next_line() => Ok(line?),
        _ = signal::ctrl_c() => {
            info!("Interrupted");
            Ok(None)
        }
    }
}

async fn confirm(input: &mut Input, question: &str, default: bool) -> Result<bool> {
    print!("{question} ");
    std::io::stdout().flush()?;
    let answer = read_line(input).await?.unwrap_or_default();
    Ok(match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => true,
        "n" | "no" => false,
        _ => default,
    })
}

async fn score(
    ctx: &AppContext,
    rater: &str,
    dataset_id: &str,
    participants: Vec<String>,
    resume: bool,
) -> Result<()> {
    let (tx, mut rx) = events::channel();
    let mut controller = SessionController::new(ctx.storage.clone(), ctx.catalog.clone(), tx);
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let mut resume = resume;
    if !resume {
        if let Some(saved) = controller.saved_summary(rater, dataset_id).await {
            resume = confirm(
                &mut input,
                &format!(
                    "Saved session for {} / {}: {} items scored across {} participants (saved {}). Resume? [Y/n]",
                    saved.rater_id,
                    saved.dataset_id,
                    saved.scored,
                    saved.assigned,
                    saved.last_saved.format("%Y-%m-%d %H:%M:%S")
                ),
                true,
            )
            .await?;
        }
    }

    if resume {
        controller.resume(rater, dataset_id).await?;
    } else {
        let keys = if participants.is_empty() {
            ctx.catalog
                .dataset(dataset_id)
                .map(|dataset| dataset.participant_keys())
                .unwrap_or_default()
        } else {
            participants
        };
        controller.start(rater, dataset_id, keys).await?;
    }
    println!("Type ? for help.");

    let mut loader = ItemLoader::new(LoggingPlayback::default());
    let result = scoring_loop(ctx, &mut controller, &mut rx, &mut loader, &mut input).await;

    loader.reset();
    controller.return_to_setup().await;
    result
}

async fn scoring_loop(
    ctx: &AppContext,
    controller: &mut SessionController,
    rx: &mut EventReceiver,
    loader: &mut ItemLoader<LoggingPlayback>,
    input: &mut Input,
) -> Result<()> {
    loop {
        handle_events(ctx, controller, rx, loader, input).await?;
        render(controller)?;

        let Some(line) = read_line(input).await? else {
            return Ok(());
        };
        let Some(command) = ScoringCommand::parse(&line) else {
            println!("Unknown command '{}'. Type ? for help.", line.trim());
            continue;
        };

        match command {
            ScoringCommand::Score(accuracy) => {
                controller.set_accuracy(accuracy)?;
            }
            ScoringCommand::Note(text) => {
                controller.edit_note(&text)?;
            }
            ScoringCommand::NextItem => {
                controller.next_item()?;
            }
            ScoringCommand::PrevItem => {
                controller.prev_item()?;
            }
            ScoringCommand::NextParticipant => {
                controller.next_participant()?;
            }
            ScoringCommand::PrevParticipant => {
                controller.prev_participant()?;
            }
            ScoringCommand::JumpToUnscored => {
                if controller.jump_to_unscored()?.is_none() {
                    println!("Every assigned item is scored.");
                }
            }
            ScoringCommand::Play => loader.player_mut().play(),
            ScoringCommand::Stop => loader.player_mut().stop(),
            ScoringCommand::Rate(rate) => loader.player_mut().set_rate(rate),
            ScoringCommand::ZoomIn => {
                println!("zoom {:.1}x", loader.player_mut().zoom_in());
            }
            ScoringCommand::ZoomOut => {
                println!("zoom {:.1}x", loader.player_mut().zoom_out());
            }
            ScoringCommand::ExportParticipant => {
                let key = controller.current_participant()?.key.clone();
                report_export(export_participant(ctx, controller, &key));
            }
            ScoringCommand::ExportAll => {
                report_export(export_assigned(ctx, controller).map(Some));
            }
            ScoringCommand::Back => return Ok(()),
            ScoringCommand::Help => println!("{HELP}"),
        }
    }
}

async fn handle_events(
    ctx: &AppContext,
    controller: &mut SessionController,
    rx: &mut EventReceiver,
    loader: &mut ItemLoader<LoggingPlayback>,
    input: &mut Input,
) -> Result<()> {
    let mut pending = Vec::new();
    while let Ok(event) = rx.try_recv() {
        pending.push(event);
    }

    for event in pending {
        match event {
            SessionEvent::Navigated { cursor, .. } => {
                let (participant, item) = cell(controller, cursor)?;
                loader.show(ctx.catalog.as_ref(), &participant, &item);
            }
            SessionEvent::ScoreChanged { .. } => {}
            SessionEvent::ParticipantCompleted {
                participant, items, ..
            } => {
                let question = format!(
                    "Participant {} ({}) is fully scored ({} items). Export now? [y/N]",
                    participant.id,
                    participant.timing,
                    items.len()
                );
                if confirm(input, &question, false).await? {
                    report_export(export_participant(ctx, controller, &participant.key));
                }
            }
        }
    }
    Ok(())
}

fn cell(
    controller: &SessionController,
    cursor: Cursor,
) -> Result<(Participant, crate::models::Item), SessionError> {
    let participants = controller.participants()?;
    let items = controller.items()?;
    Ok((
        participants[cursor.participant].clone(),
        items[cursor.item].clone(),
    ))
}

/// Prints the outcome of an export started from the loop. A failed write is
/// reported and scoring carries on.
fn report_export(result: Result<Option<PathBuf>>) -> bool {
    match result {
        Ok(Some(path)) => {
            println!("Wrote {}", path.display());
            true
        }
        Ok(None) => false,
        Err(err) => {
            log_error!("Export failed: {err:#}");
            println!("Export failed: {err:#}. Scoring continues; try again with x / a.");
            false
        }
    }
}

/// Writes one participant's file, then sets its export latch. The latch is
/// left alone when the write fails.
fn export_participant(
    ctx: &AppContext,
    controller: &mut SessionController,
    participant_key: &str,
) -> Result<Option<PathBuf>> {
    let Some(participant) = controller
        .participants()?
        .iter()
        .find(|p| p.key == participant_key)
        .cloned()
    else {
        warn!("Participant {participant_key} is not part of this session");
        return Ok(None);
    };

    let path = ctx.exporter.export_participant(
        controller.state()?,
        &participant,
        controller.dataset()?,
        controller.items()?,
        controller.catalog(),
        Utc::now(),
    )?;
    controller.mark_participant_exported(participant_key)?;
    Ok(Some(path))
}

fn export_assigned(ctx: &AppContext, controller: &SessionController) -> Result<PathBuf> {
    ctx.exporter.export_selected(
        controller.state()?,
        controller.participants()?,
        controller.dataset()?,
        controller.items()?,
        controller.catalog(),
        Utc::now(),
    )
}

fn render(controller: &SessionController) -> Result<()> {
    let cursor = controller.cursor()?;
    let participant = controller.current_participant()?;
    let item = controller.current_item()?;
    let progress = controller.progress()?;
    let participant_count = controller.participants()?.len();
    let item_count = controller.items()?.len();

    let (accuracy, note) = match controller.current_score()? {
        Some(record) => (
            record
                .accuracy
                .map(|a| a.as_u8().to_string())
                .unwrap_or_else(|| "-".into()),
            record.note.clone(),
        ),
        None => ("-".into(), String::new()),
    };

    println!(
        "[{}/{}] {} | item {}/{} slide {} trial {} {} \"{}\" | score {}{} | {}/{} ({:.1}%)",
        cursor.participant + 1,
        participant_count,
        participant.key,
        item.index,
        item_count,
        item.slide,
        item.trial,
        item.task,
        item.item,
        accuracy,
        if note.is_empty() {
            String::new()
        } else {
            format!(" note \"{note}\"")
        },
        progress.scored,
        progress.total,
        progress.percent()
    );
    print!("> ");
    std::io::stdout().flush()?;
    Ok(())
}
