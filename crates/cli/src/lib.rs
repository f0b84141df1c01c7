use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use doc_model::{Color, MeasurementId, MeasurementKind, Point, Session, UsageCounters};
use pdf_engine::{default_engine, DocumentRasterizer};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use storage::{FileStore, KeyValueStore};
use takeoff_core::usage::{self, GatingDecision, UsageLimits};
use takeoff_core::{CsvExportConfig, OpenOutcome, SaveOutcome, Workspace, WorkspaceConfig};

#[derive(Debug, Parser)]
#[command(name = "takeoff-cli")]
#[command(about = "Measure areas and lengths on scaled plan PDFs")]
pub struct Cli {
    /// Directory holding sessions and usage counters (defaults to the per-user data dir)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Run with every gated feature unlocked
    #[arg(long, global = true)]
    entitled: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable document metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Apply a JSON list of UI events to a document's session and save it.
    Replay {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, value_name = "JSON")]
        script: PathBuf,
    },
    /// Print the overlay draw list for a page of a document.
    Render {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Also write the page raster as PNG
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Export a document's measurements as CSV.
    ExportCsv {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Only export measurements on this page (1-based, repeatable)
        #[arg(long = "page")]
        pages: Vec<u32>,
    },
    /// Print the usage counters, optionally resetting them first.
    Usage {
        #[arg(long)]
        reset: bool,
    },
    /// List recently opened documents.
    History,
}

/// One scripted UI event. Measurements are addressed by creation index and
/// pages are 1-based, as on the command line.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
enum ScriptEvent {
    StartCalibration {
        #[serde(default)]
        unit: Option<String>,
    },
    ReferencePoint {
        x: f64,
        y: f64,
    },
    RealDistance {
        value: f64,
    },
    CompleteCalibration,
    CancelCalibration,
    BeginDraft {
        kind: MeasurementKind,
    },
    Point {
        x: f64,
        y: f64,
    },
    CompleteDraft {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        color: Option<Color>,
    },
    CancelDraft,
    Rename {
        index: usize,
        name: String,
    },
    Recolor {
        index: usize,
        color: Color,
    },
    MoveLabel {
        index: usize,
        x: f64,
        y: f64,
    },
    Delete {
        index: usize,
    },
    RenamePage {
        page: u32,
        name: String,
    },
    GoToPage {
        page: u32,
    },
    SetDefaultUnit {
        unit: String,
    },
    ClearPage {
        page: u32,
    },
    GrantEntitlement,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    first_page_size_pt: Option<PageSizeOutput>,
    session_key: String,
    raster: RasterSizeOutput,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: f32,
    height: f32,
}

#[derive(Debug, Serialize)]
struct RasterSizeOutput {
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplayOutput {
    session_key: String,
    /// Steps refused by a usage gate
    gated: Vec<StepDecision>,
    /// Steps rejected by validation; the replay carries on after them
    errors: Vec<StepError>,
    save: Option<SaveOutput>,
    session: Session,
}

#[derive(Debug, Serialize)]
struct StepDecision {
    step: usize,
    decision: GatingDecision,
}

#[derive(Debug, Serialize)]
struct StepError {
    step: usize,
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
enum SaveOutput {
    #[serde(rename_all = "camelCase")]
    Saved { saved_count: u32 },
    Gated { decision: GatingDecision },
    Failed { error: String },
}

impl From<SaveOutcome> for SaveOutput {
    fn from(outcome: SaveOutcome) -> Self {
        match outcome {
            SaveOutcome::Saved { saved_count } => SaveOutput::Saved { saved_count },
            SaveOutcome::Gated(decision) => SaveOutput::Gated { decision },
            SaveOutcome::Failed(error) => SaveOutput::Failed { error },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UsageOutput {
    saved_count: u32,
    save_limit: u32,
    remaining_saves: u32,
    entitled: bool,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging();

    let data_dir = cli.data_dir.as_deref();
    let entitled = cli.entitled;

    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::Replay { file, script } => {
            run_replay(open_store(data_dir)?, entitled, &file, &script)
        }
        Commands::Render { file, page, output } => {
            run_render(open_store(data_dir)?, entitled, &file, page, output.as_deref())
        }
        Commands::ExportCsv { file, output, pages } => {
            run_export_csv(open_store(data_dir)?, entitled, &file, output.as_deref(), pages)
        }
        Commands::Usage { reset } => run_usage(open_store(data_dir)?, entitled, reset),
        Commands::History => run_history(open_store(data_dir)?),
    }
}

/// Log to stderr so stdout stays machine readable. `RUST_LOG` overrides the
/// default `warn` level.
fn init_logging() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    // a second initialisation in the same process keeps the first subscriber
    let _ = tracing_subscriber::registry().with(env_filter).with(fmt_layer).try_init();
}

fn open_store(data_dir: Option<&Path>) -> Result<FileStore> {
    match data_dir {
        Some(dir) => Ok(FileStore::with_root(dir)),
        None => FileStore::from_default_project().context("failed to locate data directory"),
    }
}

fn run_info(file: &Path) -> Result<()> {
    let bytes = read_pdf(file)?;

    let engine = default_engine();
    let info = engine.inspect(&bytes).context("failed to open PDF")?;
    let raster = engine.rasterize(&bytes, 0).context("failed to rasterize first page")?;

    let first_page_size_pt = info
        .page_sizes
        .first()
        .map(|size| PageSizeOutput { width: size.width_pt, height: size.height_pt });

    let payload = InfoOutput {
        path: file.display().to_string(),
        page_count: info.page_count(),
        first_page_size_pt,
        session_key: doc_model::SessionKey::for_document(&document_name(file), bytes.len() as u64)
            .to_string(),
        raster: RasterSizeOutput { width: raster.width, height: raster.height },
    };

    print_json(&payload)
}

fn run_replay(store: FileStore, entitled: bool, file: &Path, script: &Path) -> Result<()> {
    let script_json = fs::read_to_string(script)
        .with_context(|| format!("failed to read script {}", script.display()))?;
    let events: Vec<ScriptEvent> =
        serde_json::from_str(&script_json).context("failed to parse replay script")?;

    let mut workspace = open_workspace(store, entitled, file, WorkspaceConfig::default())?;
    let mut gated = Vec::new();
    let mut errors = Vec::new();

    for (step, event) in events.into_iter().enumerate() {
        match apply_event(&mut workspace, event) {
            Ok(Some(decision)) if !decision.allowed => gated.push(StepDecision { step, decision }),
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(step, %err, "replay step rejected");
                errors.push(StepError { step, error: format!("{err:#}") });
            }
        }
    }

    let save = workspace.flush().map(SaveOutput::from);
    let payload = ReplayOutput {
        session_key: workspace
            .document_key()
            .map(ToString::to_string)
            .unwrap_or_default(),
        gated,
        errors,
        save,
        session: workspace.session().clone(),
    };

    print_json(&payload)
}

fn apply_event<S: KeyValueStore>(
    workspace: &mut Workspace<S>,
    event: ScriptEvent,
) -> Result<Option<GatingDecision>> {
    match event {
        ScriptEvent::StartCalibration { unit } => workspace.start_calibration(unit.as_deref())?,
        ScriptEvent::ReferencePoint { x, y } | ScriptEvent::Point { x, y } => {
            workspace.pointer_click(Point::new(x, y))?;
        }
        ScriptEvent::RealDistance { value } => workspace.set_real_distance(value)?,
        ScriptEvent::CompleteCalibration => {
            workspace.complete_calibration()?;
        }
        ScriptEvent::CancelCalibration => workspace.cancel_calibration()?,
        ScriptEvent::BeginDraft { kind } => return Ok(Some(workspace.begin_draft(kind)?)),
        ScriptEvent::CompleteDraft { name, color } => {
            workspace.complete_draft(name, color)?;
        }
        ScriptEvent::CancelDraft => {
            workspace.cancel_draft();
        }
        ScriptEvent::Rename { index, name } => {
            let id = measurement_at(workspace.session(), index)?;
            workspace.rename(id, &name);
        }
        ScriptEvent::Recolor { index, color } => {
            let id = measurement_at(workspace.session(), index)?;
            workspace.recolor(id, color);
        }
        ScriptEvent::MoveLabel { index, x, y } => {
            let id = measurement_at(workspace.session(), index)?;
            workspace.move_label(id, Point::new(x, y));
        }
        ScriptEvent::Delete { index } => {
            let id = measurement_at(workspace.session(), index)?;
            workspace.delete(id);
        }
        ScriptEvent::RenamePage { page, name } => {
            workspace.rename_page(page_index(page)?, &name);
        }
        ScriptEvent::GoToPage { page } => workspace.go_to_page(page_index(page)?)?,
        ScriptEvent::SetDefaultUnit { unit } => {
            workspace.set_default_unit(&unit);
        }
        ScriptEvent::ClearPage { page } => {
            workspace.clear_page(page_index(page)?);
        }
        ScriptEvent::GrantEntitlement => workspace.grant_entitlement(),
    }
    Ok(None)
}

fn run_render(
    store: FileStore,
    entitled: bool,
    file: &Path,
    page: u32,
    output: Option<&Path>,
) -> Result<()> {
    let mut workspace = open_workspace(store, entitled, file, read_only_config())?;
    workspace.go_to_page(page_index(page)?).context("failed to render page")?;

    if let (Some(output), Some(raster)) = (output, workspace.raster()) {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        raster
            .pixels
            .save(output)
            .with_context(|| format!("failed to write image to {}", output.display()))?;
    }

    print_json(&workspace.render())
}

fn run_export_csv(
    store: FileStore,
    entitled: bool,
    file: &Path,
    output: Option<&Path>,
    pages: Vec<u32>,
) -> Result<()> {
    let workspace = open_workspace(store, entitled, file, read_only_config())?;

    let mut config = CsvExportConfig::default();
    if !pages.is_empty() {
        let pages = pages.into_iter().map(page_index).collect::<Result<Vec<_>>>()?;
        config = config.with_page_filter(pages);
    }

    match output {
        Some(path) => {
            let file = fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let rows = takeoff_core::export_measurements_csv(file, workspace.session(), &config)?;
            println!("{rows} rows written to {}", path.display());
        }
        None => {
            takeoff_core::export_measurements_csv(std::io::stdout().lock(), workspace.session(), &config)?;
        }
    }

    Ok(())
}

fn run_usage(mut store: FileStore, entitled: bool, reset: bool) -> Result<()> {
    let counters: UsageCounters = if reset {
        storage::reset_counters(&mut store).context("failed to reset usage counters")?
    } else {
        storage::load_counters(&mut store).context("failed to read usage counters")?
    };

    let limits = UsageLimits::default();
    print_json(&UsageOutput {
        saved_count: counters.saved_count,
        save_limit: limits.max_saved_sessions,
        remaining_saves: usage::remaining_saves(&counters, limits.max_saved_sessions),
        entitled,
    })
}

fn run_history(store: FileStore) -> Result<()> {
    let entries = storage::load_history(&store).context("failed to read document history")?;
    print_json(&entries)
}

/// Commands that only look at a session leave the document history alone.
fn read_only_config() -> WorkspaceConfig {
    WorkspaceConfig::default().without_history()
}

fn open_workspace(
    store: FileStore,
    entitled: bool,
    file: &Path,
    config: WorkspaceConfig,
) -> Result<Workspace<FileStore>> {
    let bytes = read_pdf(file)?;

    let mut workspace = Workspace::new(store, config);
    if entitled {
        workspace.grant_entitlement();
    }

    match workspace.open_document(&document_name(file), bytes).context("failed to open PDF")? {
        OpenOutcome::Opened { .. } => Ok(workspace),
        OpenOutcome::Gated(decision) => anyhow::bail!(
            "document refused ({}); rerun with --entitled",
            decision_reason(&decision)
        ),
    }
}

fn read_pdf(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn document_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_owned())
}

fn measurement_at(session: &Session, index: usize) -> Result<MeasurementId> {
    session
        .measurements
        .get(index)
        .map(|measurement| measurement.id)
        .with_context(|| format!("no measurement at index {index}"))
}

/// Convert a 1-based page number from the command line
fn page_index(page: u32) -> Result<u32> {
    if page == 0 {
        anyhow::bail!("pages are 1-based and must be >= 1");
    }
    Ok(page - 1)
}

fn decision_reason(decision: &GatingDecision) -> &'static str {
    match decision.reason {
        Some(usage::GatingReason::Filesize) => "file exceeds the free size limit",
        Some(usage::GatingReason::Storage) => "free save limit reached",
        Some(usage::GatingReason::Length) => "length measurements need an entitlement",
        Some(usage::GatingReason::Measurements) => "measurement limit reached",
        None => "not allowed",
    }
}

fn print_json<T: Serialize + ?Sized>(payload: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(payload)?;
    println!("{json}");
    Ok(())
}
