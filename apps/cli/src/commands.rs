//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use coursebuilder_core::generator::ContentGenerator;
use coursebuilder_core::narration::narrate_document;
use coursebuilder_core::pipeline::{
    Pipeline, PipelineConfig, PipelineReport, PipelineStage, ProgressReporter, ServiceSet,
    UploadRequest,
};
use coursebuilder_core::queue::{TaskQueue, WorkerId};
use coursebuilder_core::search::StoredEmbeddingSearch;
use coursebuilder_core::worker::{
    BatchReport, ImageExtractionHandler, TaskHandler, TextExtractionHandler, WorkerOptions,
    run_worker,
};
use coursebuilder_planner::{PlanInput, PlannerConfig, plan, validate};
use coursebuilder_services::{HttpAiClient, PdfTextExtractor};
use coursebuilder_shared::{
    AppConfig, Outline, ProcessingStatus, TaskType, config_file_path, init_config, load_config,
    resolve_api_key,
};
use coursebuilder_storage::Storage;
use coursebuilder_text::FrequencyKeywordExtractor;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// CourseBuilder: turn PDF textbooks into e-learning courses.
#[derive(Parser)]
#[command(
    name = "coursebuilder",
    version,
    about = "Turn PDF textbooks into structured, AI-enhanced e-learning courses.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Database path (defaults to the configured data directory).
    #[arg(long, global = true, env = "COURSEBUILDER_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Queue task kinds exposed on the command line.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum TaskKind {
    Text,
    Image,
}

impl From<TaskKind> for TaskType {
    fn from(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Text => TaskType::TextWorker,
            TaskKind::Image => TaskType::ImageWorker,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the whole pipeline for a PDF.
    Run {
        /// Path to the PDF textbook.
        pdf: PathBuf,

        /// Document title (defaults to the file name).
        #[arg(short, long)]
        title: Option<String>,

        /// Owner recorded on the document (defaults to config).
        #[arg(long)]
        owner: Option<String>,

        /// Skip illustration generation.
        #[arg(long)]
        skip_visuals: bool,

        /// Stop after the course structure.
        #[arg(long)]
        skip_content: bool,

        /// Print the full stage report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Plan segments for an outline file without touching the database.
    Plan {
        /// Outline JSON file.
        #[arg(long)]
        outline: PathBuf,

        /// Total page count of the book.
        #[arg(long)]
        pages: u32,
    },

    /// List stored documents.
    Documents {
        /// Only documents of this owner.
        #[arg(long)]
        owner: Option<String>,
    },

    /// Segment task queue operations.
    Tasks {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Drain queued segment tasks.
    Worker {
        /// Task kinds to handle (repeatable). Defaults to text.
        #[arg(long = "type", value_enum)]
        kinds: Vec<TaskKind>,

        /// Stop after this many tasks.
        #[arg(long)]
        max_tasks: Option<usize>,

        /// Pause between tasks, in milliseconds.
        #[arg(long)]
        delay_ms: Option<u64>,
    },

    /// Generate enhanced lesson content for a structured document.
    Generate {
        /// Document ID.
        #[arg(long)]
        document: String,
    },

    /// Narrate generated lessons into WAV files.
    Narrate {
        /// Document ID.
        #[arg(long)]
        document: String,

        /// Output directory for the audio files.
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Task queue subcommands.
#[derive(Subcommand)]
pub(crate) enum TaskAction {
    /// Enqueue one task per segment of a document.
    Create {
        #[arg(long)]
        document: String,

        #[arg(long = "type", value_enum, default_value = "text")]
        kind: TaskKind,
    },
    /// List tasks.
    List {
        #[arg(long)]
        document: Option<String>,

        /// PENDING, PROCESSING, COMPLETED or FAILED.
        #[arg(long)]
        status: Option<String>,
    },
    /// Return expired leases to PENDING.
    Sweep {
        /// Lease age in seconds (defaults to `queue.lease_timeout_secs`).
        #[arg(long)]
        older_than: Option<u64>,
    },
    /// Enqueue a fresh copy of a failed task.
    Retry {
        task_id: String,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

const LOG_TARGETS: [&str; 6] = [
    "coursebuilder",
    "coursebuilder_core",
    "coursebuilder_services",
    "coursebuilder_storage",
    "coursebuilder_planner",
    "coursebuilder_shared",
];

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let db = cli.db;
    match cli.command {
        Command::Run {
            pdf,
            title,
            owner,
            skip_visuals,
            skip_content,
            json,
        } => {
            let options = RunOptions {
                title,
                owner,
                skip_visuals,
                skip_content,
                json,
            };
            cmd_run(db, &pdf, options).await
        }
        Command::Plan { outline, pages } => cmd_plan(&outline, pages),
        Command::Documents { owner } => cmd_documents(db, owner.as_deref()).await,
        Command::Tasks { action } => match action {
            TaskAction::Create { document, kind } => cmd_tasks_create(db, &document, kind).await,
            TaskAction::List { document, status } => {
                cmd_tasks_list(db, document.as_deref(), status.as_deref()).await
            }
            TaskAction::Sweep { older_than } => cmd_tasks_sweep(db, older_than).await,
            TaskAction::Retry { task_id } => cmd_tasks_retry(db, &task_id).await,
        },
        Command::Worker {
            kinds,
            max_tasks,
            delay_ms,
        } => cmd_worker(db, &kinds, max_tasks, delay_ms).await,
        Command::Generate { document } => cmd_generate(db, &document).await,
        Command::Narrate { document, out } => cmd_narrate(db, &document, &out).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// Shared setup
// ---------------------------------------------------------------------------

async fn open_storage(config: &AppConfig, db: Option<PathBuf>) -> Result<Arc<Storage>> {
    let path = db.unwrap_or_else(|| config.defaults.database_path());
    info!(path = %path.display(), "opening database");
    Ok(Arc::new(Storage::open(&path).await?))
}

/// Wire the HTTP provider into every AI seam.
fn build_services(config: &AppConfig, storage: &Arc<Storage>) -> Result<ServiceSet> {
    let api_key = resolve_api_key(config)?;
    let client = Arc::new(HttpAiClient::new(&config.provider, api_key)?);
    let search = Arc::new(StoredEmbeddingSearch::new(storage.clone(), client.clone()));
    Ok(ServiceSet {
        completion: client.clone(),
        extractor: Arc::new(PdfTextExtractor::new()),
        search: Some(search),
        embedder: Some(client.clone()),
        images: Some(client.clone()),
        speech: Some(client),
        keywords: Arc::new(FrequencyKeywordExtractor::default()),
    })
}

fn print_batch(label: &str, report: &BatchReport) {
    println!();
    println!("  {label}");
    println!("  Succeeded: {}", report.succeeded);
    println!("  Failed:    {}", report.failed);
    println!("  Success:   {:.0}%", report.success_rate() * 100.0);
    for item in report.items.iter().filter(|i| !i.success) {
        println!("    ✗ {}: {}", item.id, item.error.as_deref().unwrap_or("unknown error"));
    }
    println!();
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

struct RunOptions {
    title: Option<String>,
    owner: Option<String>,
    skip_visuals: bool,
    skip_content: bool,
    json: bool,
}

async fn cmd_run(db: Option<PathBuf>, pdf: &Path, options: RunOptions) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config, db).await?;
    let services = build_services(&config, &storage)?;

    if !pdf.is_file() {
        return Err(eyre!("'{}' is not a file", pdf.display()));
    }
    let page_count = PdfTextExtractor::page_count(pdf).await?;
    let title = options.title.unwrap_or_else(|| {
        pdf.file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Untitled".to_string())
    });
    let upload = UploadRequest {
        owner: options.owner.unwrap_or_else(|| config.defaults.owner.clone()),
        title,
        file_path: pdf.to_string_lossy().to_string(),
        page_count,
    };

    let pipeline_config = PipelineConfig {
        planner: PlannerConfig::from(&config.segmentation),
        generation: config.generation.clone(),
        skip_visuals: options.skip_visuals,
        skip_content: options.skip_content,
    };
    info!(pdf = %pdf.display(), pages = page_count, "starting pipeline");

    let reporter = CliProgress::new();
    let report = Pipeline::new(storage, services, pipeline_config)
        .run(&upload, &reporter)
        .await;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_pipeline_report(&report);
    }

    match (report.failed_stage, report.error) {
        (Some(stage), Some(error)) => Err(eyre!("{} stage failed: {error}", stage.as_str())),
        _ => Ok(()),
    }
}

fn print_pipeline_report(report: &PipelineReport) {
    println!();
    if report.success {
        println!("  Course generated successfully!");
    } else {
        println!("  Pipeline stopped.");
    }
    if let Some(id) = &report.document_id {
        println!("  Document: {id}");
    }
    println!("  Progress: {}%", report.progress_percent);
    for stage in &report.stages {
        let mark = if stage.success { "✓" } else { "✗" };
        println!("    {mark} {}", stage.stage.as_str());
    }
    if !report.warnings.is_empty() {
        println!("  Warnings:");
        for warning in &report.warnings {
            println!("    - {warning}");
        }
    }
    println!("  Time:     {:.1}s", report.elapsed_ms as f64 / 1000.0);
    println!();
}

fn cmd_plan(outline_path: &Path, pages: u32) -> Result<()> {
    let content = std::fs::read_to_string(outline_path)
        .map_err(|e| eyre!("cannot read '{}': {e}", outline_path.display()))?;
    let outline: Outline = serde_json::from_str(&content)?;

    let config = load_config()?;
    let planner = PlannerConfig::from(&config.segmentation);
    let title = if outline.title.is_empty() {
        "Untitled"
    } else {
        outline.title.as_str()
    };
    let input = PlanInput {
        document_id: "preview",
        title,
        page_count: pages,
    };
    let segments = plan(input, &outline, &planner)?;
    let report = validate(&segments, pages, &planner);

    let output = serde_json::json!({ "segments": segments, "validation": report });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_documents(db: Option<PathBuf>, owner: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config, db).await?;
    let documents = storage.list_documents(owner).await?;

    if documents.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    for doc in documents {
        println!(
            "{}  {:<28} {:>5} pages  {}",
            doc.id,
            doc.status.as_str(),
            doc.page_count,
            doc.title
        );
    }
    Ok(())
}

async fn cmd_tasks_create(db: Option<PathBuf>, document: &str, kind: TaskKind) -> Result<()> {
    let config = load_config()?;
    let queue = TaskQueue::new(open_storage(&config, db).await?);
    let tasks = queue.create_tasks_for_document(document, kind.into()).await?;
    println!("Enqueued {} tasks for {document}.", tasks.len());
    Ok(())
}

async fn cmd_tasks_list(
    db: Option<PathBuf>,
    document: Option<&str>,
    status: Option<&str>,
) -> Result<()> {
    let status = status
        .map(|s| {
            ProcessingStatus::parse(&s.to_ascii_uppercase())
                .ok_or_else(|| eyre!("unknown task status '{s}'"))
        })
        .transpose()?;

    let config = load_config()?;
    let storage = open_storage(&config, db).await?;
    let tasks = storage.list_tasks(document, status).await?;

    for task in &tasks {
        println!(
            "{}  {:<14} {:<10} p={:<3} {}{}",
            task.id,
            task.task_type.as_str(),
            task.status.as_str(),
            task.priority,
            task.segment_id,
            task.error_message
                .as_deref()
                .map(|e| format!("  ({e})"))
                .unwrap_or_default()
        );
    }
    println!("{} tasks", tasks.len());
    Ok(())
}

async fn cmd_tasks_sweep(db: Option<PathBuf>, older_than: Option<u64>) -> Result<()> {
    let config = load_config()?;
    let secs = older_than
        .or(config.queue.lease_timeout_secs)
        .ok_or_else(|| eyre!("no lease age given and queue.lease_timeout_secs is unset"))?;
    let queue = TaskQueue::new(open_storage(&config, db).await?);
    let reclaimed = queue.sweep_expired_leases(Duration::from_secs(secs)).await?;
    println!("Reclaimed {reclaimed} expired leases.");
    Ok(())
}

async fn cmd_tasks_retry(db: Option<PathBuf>, task_id: &str) -> Result<()> {
    let config = load_config()?;
    let queue = TaskQueue::new(open_storage(&config, db).await?);
    let task = queue.retry_task(task_id).await?;
    println!("Re-enqueued {task_id} as {}.", task.id);
    Ok(())
}

async fn cmd_worker(
    db: Option<PathBuf>,
    kinds: &[TaskKind],
    max_tasks: Option<usize>,
    delay_ms: Option<u64>,
) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config, db).await?;
    let queue = TaskQueue::new(storage.clone());
    let extractor = Arc::new(PdfTextExtractor::new());

    let text = TextExtractionHandler::new(storage.clone(), extractor.clone());
    let image = ImageExtractionHandler::new(storage, extractor);
    let kinds = if kinds.is_empty() { &[TaskKind::Text][..] } else { kinds };
    let handlers: Vec<&dyn TaskHandler> = kinds
        .iter()
        .map(|kind| match kind {
            TaskKind::Text => &text as &dyn TaskHandler,
            TaskKind::Image => &image as &dyn TaskHandler,
        })
        .collect();

    let options = WorkerOptions {
        poll_limit: config.queue.poll_limit,
        delay: Duration::from_millis(delay_ms.unwrap_or(config.generation.batch_delay_ms)),
        max_tasks,
    };
    let worker = WorkerId::generate();
    info!(worker_id = %worker, "worker started");

    let report = run_worker(&queue, &worker, &handlers, &options).await?;
    print_batch("Worker finished.", &report);
    Ok(())
}

async fn cmd_generate(db: Option<PathBuf>, document: &str) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config, db).await?;
    let services = build_services(&config, &storage)?;

    let spinner = spinner();
    spinner.set_message(format!("Generating content for {document}"));
    let generator = ContentGenerator::new(storage, &services, &config.generation);
    let result = generator.generate_document(document).await;
    spinner.finish_and_clear();
    let report = result?;

    println!();
    println!("  Chapters: {}", report.content.chapters.len());
    if let Some(quality) = &report.content.quality {
        println!("  Quality:  {:.0}/100", quality.overall_score);
    }
    for failure in &report.failed_chapters {
        println!("    ✗ {}: {}", failure.chapter_id, failure.error);
    }
    for warning in &report.warnings {
        println!("    - {warning}");
    }
    println!();
    Ok(())
}

async fn cmd_narrate(db: Option<PathBuf>, document: &str, out: &Path) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config, db).await?;
    let api_key = resolve_api_key(&config)?;
    let client = HttpAiClient::new(&config.provider, api_key)?;

    let spinner = spinner();
    spinner.set_message(format!("Narrating lessons of {document}"));
    let result = narrate_document(&storage, &client, document, &config.provider.voice, out).await;
    spinner.finish_and_clear();

    print_batch(&format!("Audio written to {}", out.display()), &result?);
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let path = config_file_path()?;
    let config = load_config()?;
    println!("# {}", path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid spinner template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        Self { spinner: spinner() }
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, stage: PipelineStage) {
        let message = match stage {
            PipelineStage::Upload => "Registering document",
            PipelineStage::Understanding => "Reading the table of contents",
            PipelineStage::Segmentation => "Planning segments",
            PipelineStage::Extraction => "Extracting segment text",
            PipelineStage::Structure => "Designing the course structure",
            PipelineStage::Visuals => "Generating illustrations",
            PipelineStage::EnhancedContent => "Writing lesson content",
        };
        self.spinner.set_message(message);
    }

    fn segment_extracted(&self, seg_no: u32, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Extracting [{current}/{total}] segment {seg_no}"));
    }

    fn done(&self, _report: &PipelineReport) {
        self.spinner.finish_and_clear();
    }
}
