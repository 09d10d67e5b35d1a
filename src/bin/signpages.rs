//! CLI binary for pdf-signpages.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` and the store adapters, and prints results.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdf_signpages::store::{
    MemoryObjectStore, MemoryRecordStore, ObjectStore, PostgrestRecordStore, RecordStore,
    WebhookObjectStore,
};
use pdf_signpages::{
    augment, AnchorStyle, ConversionRequest, JobProgressCallback, JobStatus, Orchestrator,
    PipelineConfig, ProgressCallback, ServiceCategory, SignaturePageContent, Stage,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Spinner while the job runs, switching to a bar once page uploads start.
struct CliProgressCallback {
    bar: ProgressBar,
    uploading: AtomicBool,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            uploading: AtomicBool::new(false),
        })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Uploading");
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, _job_id: &str, stage: Stage) {
        self.bar.set_prefix(stage.to_string());
        self.bar.set_message("");
    }

    fn on_stage_complete(&self, _job_id: &str, stage: Stage) {
        if stage != Stage::UploadImages {
            self.bar
                .println(format!("  {} {}", green("✓"), dim(stage.as_str())));
        }
    }

    fn on_page_uploaded(&self, _job_id: &str, page: u32, total: usize, ok: bool) {
        if !self.uploading.swap(true, Ordering::SeqCst) {
            self.activate_bar(total);
        }
        if !ok {
            self.bar
                .println(format!("  {} page {} upload failed", red("✗"), page));
        }
        self.bar.inc(1);
    }

    fn on_job_complete(&self, _job_id: &str, _status: JobStatus) {
        self.bar.finish_and_clear();
    }

    fn on_status_write_failed(&self, job_id: &str, status: JobStatus, error: &str) {
        self.bar.println(format!(
            "  {} could not mark job '{}' as {}: {}",
            red("!"),
            job_id,
            status,
            error
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Full job against the record store and upload webhook
  signpages convert proposal.pdf --job-id 3f2c9a --service window \
      --insert-index 3 --last-page 6 --total 12500 --permit-fee 350

  # Same pipeline with in-memory stores (nothing leaves the machine)
  signpages convert proposal.pdf --job-id test --service solar --dry-run --json

  # Only add the signature pages
  signpages augment proposal.pdf -o signed-ready.pdf --insert-index 3 --total 12500

  # Read a job record
  signpages result --service roofing --job-id 3f2c9a

ENVIRONMENT VARIABLES:
  SIGNPAGES_RECORD_URL     Record store base URL (PostgREST / Supabase project URL)
  SIGNPAGES_RECORD_KEY     Record store API key
  SIGNPAGES_UPLOAD_URL     Upload webhook URL
  SIGNPAGES_PDFTOPPM       Path to pdftoppm (default: pdftoppm on PATH)
  SIGNPAGES_WORK_DIR       Parent directory for per-job working directories
  RUST_LOG                 Overrides --verbose / --quiet log filtering

SETUP:
  Rasterisation needs poppler-utils:  apt install poppler-utils  |  brew install poppler
"#;

/// Add e-signature pages to PDFs and publish page images.
#[derive(Parser, Debug)]
#[command(
    name = "signpages",
    version,
    about = "Add e-signature pages to PDFs, rasterise them, and publish page images",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "SIGNPAGES_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "SIGNPAGES_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a full conversion job.
    Convert(ConvertArgs),
    /// Insert/append signature pages into a local PDF only.
    Augment(AugmentArgs),
    /// Print a job record as JSON.
    Result(ResultArgs),
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// Record store base URL.
    #[arg(long, env = "SIGNPAGES_RECORD_URL")]
    record_url: Option<String>,

    /// Record store API key.
    #[arg(long, env = "SIGNPAGES_RECORD_KEY", hide_env_values = true)]
    record_key: Option<String>,

    /// Upload webhook URL.
    #[arg(long, env = "SIGNPAGES_UPLOAD_URL")]
    upload_url: Option<String>,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, env = "SIGNPAGES_HTTP_TIMEOUT", default_value_t = 60)]
    http_timeout: u64,

    /// Prefix of the per-service record tables.
    #[arg(long, env = "SIGNPAGES_TABLE_PREFIX", default_value = "pdf_conversions")]
    table_prefix: String,
}

#[derive(Args, Debug)]
struct PageArgs {
    /// 1-based position of the inserted signature page.
    #[arg(long)]
    insert_index: Option<i64>,

    /// Total investment amount.
    #[arg(long, default_value_t = 0.0)]
    total: f64,

    /// Permit fee subtracted for the second amount row.
    #[arg(long, default_value_t = 0.0)]
    permit_fee: f64,

    #[arg(long)]
    manufacturer: Option<String>,

    #[arg(long)]
    customer_name: Option<String>,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Source PDF. It is copied first; the original is never modified.
    input: PathBuf,

    #[arg(long)]
    job_id: String,

    /// window, roofing or solar.
    #[arg(long)]
    service: String,

    /// Last page to rasterise (the terms-and-conditions page).
    #[arg(long)]
    last_page: Option<u32>,

    #[arg(long)]
    customer_email: Option<String>,

    #[command(flatten)]
    page: PageArgs,

    #[command(flatten)]
    store: StoreArgs,

    /// Use in-memory stores seeded with a `submitted` record.
    #[arg(long)]
    dry_run: bool,

    /// Path to the pdftoppm executable.
    #[arg(long, env = "SIGNPAGES_PDFTOPPM", default_value = "pdftoppm")]
    pdftoppm: PathBuf,

    /// Rasterisation DPI (72–400).
    #[arg(long, env = "SIGNPAGES_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Parent directory for the per-job working directory.
    #[arg(long, env = "SIGNPAGES_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Pause between uploads in milliseconds.
    #[arg(long, env = "SIGNPAGES_UPLOAD_PACING_MS", default_value_t = 800)]
    upload_pacing_ms: u64,

    /// Whole-job timeout in seconds.
    #[arg(long, env = "SIGNPAGES_JOB_TIMEOUT", default_value_t = 900)]
    job_timeout: u64,

    /// Fail the job if any page image upload fails.
    #[arg(long, env = "SIGNPAGES_REQUIRE_ALL_PAGES")]
    require_all_pages: bool,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "SIGNPAGES_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct AugmentArgs {
    input: PathBuf,

    /// Where to write the merged PDF.
    #[arg(short, long)]
    output: PathBuf,

    /// Service whose label appears in the amount table.
    #[arg(long, default_value = "window")]
    service: String,

    #[command(flatten)]
    page: PageArgs,

    /// Print anchors as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ResultArgs {
    #[arg(long)]
    service: String,

    #[arg(long)]
    job_id: String,

    #[command(flatten)]
    store: StoreArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = matches!(
        &cli.command,
        Command::Convert(a) if !a.no_progress && !a.json && !cli.quiet
    );
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Convert(args) => run_convert(args, show_progress, cli.quiet).await,
        Command::Augment(args) => run_augment(args, cli.quiet).await,
        Command::Result(args) => run_result(args).await,
    }
}

async fn run_convert(args: ConvertArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let service: ServiceCategory = args.service.parse().context("Invalid --service")?;

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn JobProgressCallback>)
    } else {
        None
    };
    let config = build_config(&args, progress)?;

    let (records, objects): (Arc<dyn RecordStore>, Arc<dyn ObjectStore>) = if args.dry_run {
        let records = MemoryRecordStore::new();
        records.insert_submitted(&service.table(&config.table_prefix), &args.job_id);
        (Arc::new(records), Arc::new(MemoryObjectStore::new()))
    } else {
        (
            Arc::new(record_store(&args.store, &config)?),
            Arc::new(object_store(&args.store, &config)?),
        )
    };

    // The orchestrator deletes the source it is given; hand it a copy.
    let staging = tempfile::tempdir().context("Failed to create staging directory")?;
    let staged = staging.path().join("source.pdf");
    tokio::fs::copy(&args.input, &staged)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;

    let request = ConversionRequest {
        job_id: args.job_id.clone(),
        service: Some(args.service.clone()),
        source_path: staged,
        insert_index: args.page.insert_index,
        last_page: args.last_page,
        total_investment_amount: args.page.total,
        permit_fee: args.page.permit_fee,
        manufacturer: args.page.manufacturer.clone(),
        customer_full_name: args.page.customer_name.clone(),
        customer_email: args.customer_email.clone(),
    };

    let orchestrator = Orchestrator::new(config, records, objects);
    let result = orchestrator.convert(request).await.map_err(|e| {
        let detail = e.detail();
        anyhow::Error::new(e).context(format!("Conversion failed: {detail}"))
    })?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialise result")?
        );
    } else if !quiet {
        eprintln!(
            "{} job {}  {} pages  {} images{}",
            green("✔"),
            bold(&result.job_id),
            result.page_count,
            result.image_urls.len(),
            if result.missing_pages.is_empty() {
                String::new()
            } else {
                red(&format!("  (missing pages {:?})", result.missing_pages))
            }
        );
        println!("document: {}", result.modified_pdf_url);
        println!("anchor:   {}", result.anchor_string);
        for url in &result.image_urls {
            println!("{url}");
        }
    }
    Ok(())
}

async fn run_augment(args: AugmentArgs, quiet: bool) -> Result<()> {
    let service: ServiceCategory = args.service.parse().context("Invalid --service")?;
    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;

    let content = SignaturePageContent {
        customer_name: args.page.customer_name.clone(),
        total_amount: args.page.total,
        permit_fee: args.page.permit_fee,
        manufacturer: args.page.manufacturer.clone(),
        service_label: service.service_label().to_string(),
    };
    let insert_at = pdf_signpages::job::checked_insert_index(
        args.page.insert_index,
        PipelineConfig::default().max_insert_index,
    )?;

    let augmented = tokio::task::spawn_blocking(move || {
        augment(&bytes, insert_at, &content, &AnchorStyle::default())
    })
    .await
    .context("Augment task panicked")?
    .context("Failed to augment document")?;

    write_atomic(&args.output, &augmented.bytes).await?;

    if args.json {
        let summary = serde_json::json!({
            "output": args.output,
            "page_count": augmented.page_count,
            "rendered_pages": augmented.rendered_pages,
            "anchor_string": augmented.sign_anchor,
            "date_anchor_string": augmented.date_anchor,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        if !quiet {
            eprintln!(
                "{} {} pages (signature pages at {:?})  →  {}",
                green("✔"),
                augmented.page_count,
                augmented.rendered_pages,
                bold(&args.output.display().to_string())
            );
        }
        println!("{}", augmented.sign_anchor);
    }
    Ok(())
}

async fn run_result(args: ResultArgs) -> Result<()> {
    let config = PipelineConfig::builder()
        .table_prefix(args.store.table_prefix.clone())
        .http_timeout_secs(args.store.http_timeout)
        .build()?;
    let records = record_store(&args.store, &config)?;
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(records),
        Arc::new(MemoryObjectStore::new()),
    );
    let fields = orchestrator
        .fetch_result(&args.service, &args.job_id)
        .await
        .context("Failed to fetch result")?;
    println!("{}", serde_json::to_string_pretty(&fields)?);
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(args: &ConvertArgs, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .pdftoppm_path(args.pdftoppm.clone())
        .dpi(args.dpi)
        .upload_pacing(Duration::from_millis(args.upload_pacing_ms))
        .job_timeout_secs(args.job_timeout)
        .http_timeout_secs(args.store.http_timeout)
        .require_all_pages(args.require_all_pages)
        .table_prefix(args.store.table_prefix.clone());
    if let Some(dir) = &args.work_dir {
        builder = builder.work_root(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

fn record_store(args: &StoreArgs, config: &PipelineConfig) -> Result<PostgrestRecordStore> {
    let (Some(url), Some(key)) = (&args.record_url, &args.record_key) else {
        bail!("--record-url and --record-key (or SIGNPAGES_RECORD_URL / SIGNPAGES_RECORD_KEY) are required");
    };
    PostgrestRecordStore::from_config(url.clone(), key.clone(), config)
        .context("Failed to build record store client")
}

fn object_store(args: &StoreArgs, config: &PipelineConfig) -> Result<WebhookObjectStore> {
    let Some(url) = &args.upload_url else {
        bail!("--upload-url (or SIGNPAGES_UPLOAD_URL) is required");
    };
    WebhookObjectStore::from_config(url.clone(), config)
        .context("Failed to build upload client")
}

/// Write to a temp file next to `path`, then rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move output into {}", path.display()))?;
    Ok(())
}
