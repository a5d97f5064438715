//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use archivist_artifacts::{load_rules, resolve_plan};
use archivist_core::{
    BatchOptions, BatchSummary, IngestOptions, IngestRequest, ProgressReporter,
    generator_from_config, ingest, run_batch,
};
use archivist_fetcher::HttpFetcher;
use archivist_shared::{
    AppConfig, ArchivistError, PlanMode, expand_home, init_config, load_config,
    load_config_from,
};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// archivist: archive articles into a local knowledge base, once.
#[derive(Parser)]
#[command(
    name = "archivist",
    version,
    about = "Archive web articles into a deduplicated, auditable local knowledge base.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.archivist/archivist.toml.
    #[arg(long, global = true, env = "ARCHIVIST_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Overrides shared by `ingest` and `batch`.
#[derive(clap::Args, Debug, Clone)]
pub(crate) struct TargetArgs {
    /// Knowledge-base root (defaults to `defaults.base_dir`).
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Folder for new assets (defaults to `defaults.target_folder`).
    #[arg(short, long)]
    pub folder: Option<String>,

    /// Diagram artifact: on, off, or auto.
    #[arg(long)]
    pub canvas: Option<PlanMode>,

    /// Tabular artifact: on, off, or auto.
    #[arg(long)]
    pub base: Option<PlanMode>,

    /// Regenerate even when the content is unchanged.
    #[arg(long)]
    pub force: bool,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Ingest or refresh a single article.
    Ingest {
        /// Article URL.
        url: String,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Ingest every pending URL listed in a source file.
    Batch {
        /// Inbox file with bare URLs, links, or checklist lines.
        source: PathBuf,

        #[command(flatten)]
        target: TargetArgs,

        /// List what would be processed and stop.
        #[arg(long)]
        dry_run: bool,

        /// Discard the checkpoint and start over.
        #[arg(long)]
        reset_checkpoint: bool,

        /// Also process entries already ticked or marked archived.
        #[arg(long)]
        include_done: bool,

        /// Do not tick or mark entries in the source file.
        #[arg(long)]
        no_mark: bool,

        /// Pause between successful items, in milliseconds.
        #[arg(long)]
        delay_ms: Option<u64>,
    },

    /// Explain which artifacts a document would get.
    Plan {
        /// Markdown document to classify.
        file: PathBuf,

        /// Diagram artifact: on, off, or auto.
        #[arg(long, default_value = "auto")]
        canvas: PlanMode,

        /// Tabular artifact: on, off, or auto.
        #[arg(long, default_value = "auto")]
        base: PlanMode,

        /// Keyword rule file (defaults to `classifier.rules_path`).
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Print the plan as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
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

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "archivist=info",
        1 => "archivist=debug",
        _ => "archivist=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

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

/// Run the CLI command and return the process exit code.
pub(crate) async fn run(cli: Cli) -> Result<i32> {
    let config_path = cli.config;
    match cli.command {
        Command::Ingest { url, target } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_ingest(&config, &url, &target).await
        }
        Command::Batch {
            source,
            target,
            dry_run,
            reset_checkpoint,
            include_done,
            no_mark,
            delay_ms,
        } => {
            let config = resolve_config(config_path.as_deref())?;
            let mut options = BatchOptions::from_config(source, &config);
            options.dry_run = dry_run;
            options.force = target.force;
            options.reset_checkpoint = reset_checkpoint;
            options.include_done = include_done;
            options.mark_done = options.mark_done && !no_mark;
            if let Some(ms) = delay_ms {
                options.delay = Duration::from_millis(ms);
            }
            cmd_batch(&config, &options, &target).await
        }
        Command::Plan {
            file,
            canvas,
            base,
            rules,
            json,
        } => {
            let config = resolve_config(config_path.as_deref())?;
            cmd_plan(&config, &file, canvas, base, rules.as_deref(), json)
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

fn ingest_options(config: &AppConfig, target: &TargetArgs) -> Result<IngestOptions> {
    let mut options = IngestOptions::from_config(config)?;
    if let Some(dir) = &target.base_dir {
        options.base_dir = dir.clone();
    }
    if let Some(folder) = &target.folder {
        options.target_folder = folder.clone();
    }
    if let Some(mode) = target.canvas {
        options.canvas = mode;
    }
    if let Some(mode) = target.base {
        options.base = mode;
    }
    Ok(options)
}

/// Surface the taxonomy reason first, detail second.
fn failure(e: ArchivistError) -> color_eyre::Report {
    eyre!("[{}] {e}", e.reason())
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_ingest(config: &AppConfig, url: &str, target: &TargetArgs) -> Result<i32> {
    let options = ingest_options(config, target)?;
    let fetcher = HttpFetcher::new(&config.fetch)?;
    let generator = generator_from_config(&config.generator);

    info!(
        url,
        base_dir = %options.base_dir.display(),
        folder = %options.target_folder,
        generator = generator.name(),
        "ingesting article"
    );

    let reporter = CliProgress::new();
    let request = IngestRequest {
        locator: url.to_string(),
        force: target.force,
    };
    let result = ingest(&options, &request, &fetcher, generator.as_ref(), &reporter).await;
    reporter.finish();
    let outcome = result.map_err(failure)?;

    println!();
    println!("  Status:   {} ({})", outcome.status.as_str(), outcome.reason);
    println!("  Asset:    {}", outcome.asset_id);
    println!("  Title:    {}", outcome.title);
    println!("  Path:     {}", outcome.asset_dir.display());
    if let Some(plan) = &outcome.plan {
        let kinds: Vec<&str> = plan.kinds.iter().map(|k| k.as_str()).collect();
        println!("  Plan:     {}", kinds.join(", "));
    }
    println!("  Runs:     {}", outcome.run_count);
    println!("  Time:     {:.1}s", outcome.duration.as_secs_f64());
    for warning in &outcome.warnings {
        println!("  Warning:  {warning}");
    }
    if let Some(err) = &outcome.log_error {
        println!("  Warning:  run log not written: {err}");
    }
    println!();

    Ok(0)
}

async fn cmd_batch(config: &AppConfig, options: &BatchOptions, target: &TargetArgs) -> Result<i32> {
    let ingest_opts = ingest_options(config, target)?;
    let fetcher = HttpFetcher::new(&config.fetch)?;
    let generator = generator_from_config(&config.generator);

    info!(
        source = %options.source.display(),
        dry_run = options.dry_run,
        force = options.force,
        "starting batch"
    );

    let reporter = CliProgress::new();
    let result = run_batch(options, &ingest_opts, &fetcher, generator.as_ref(), &reporter).await;
    reporter.finish();
    let summary = result.map_err(failure)?;

    print_batch_summary(&summary);
    if summary.dry_run {
        return Ok(0);
    }
    Ok(summary.status().exit_code())
}

fn print_batch_summary(summary: &BatchSummary) {
    println!();
    if summary.dry_run {
        println!("  Dry run: {} of {} would be processed", summary.queued, summary.found);
        for (i, item) in summary.items.iter().enumerate() {
            let label = item.label.as_deref().unwrap_or("(no title)");
            println!("  {:>3}. {label}", i + 1);
            println!("       {}", item.locator);
        }
        println!();
        return;
    }

    for item in &summary.items {
        let detail = item
            .error
            .as_deref()
            .or(item.reason.as_deref())
            .unwrap_or_default();
        println!("  [{:<9}] {} {detail}", item.status.as_str(), item.locator);
    }
    println!();
    println!("  Batch {}", summary.status().as_str());
    println!("  Found:      {}", summary.found);
    println!("  Queued:     {}", summary.queued);
    println!("  Succeeded:  {} ({} unchanged)", summary.succeeded, summary.unchanged);
    println!("  Skipped:    {}", summary.skipped);
    println!("  Failed:     {}", summary.failed);
    println!("  Checkpoint: {}", summary.checkpoint_path.display());
    for warning in &summary.warnings {
        println!("  Warning:    {warning}");
    }
    println!();
}

fn cmd_plan(
    config: &AppConfig,
    file: &Path,
    canvas: PlanMode,
    base: PlanMode,
    rules: Option<&Path>,
    json: bool,
) -> Result<i32> {
    let text = std::fs::read_to_string(file)
        .map_err(|e| eyre!("cannot read '{}': {e}", file.display()))?;

    let configured = config
        .classifier
        .rules_path
        .as_deref()
        .map(expand_home)
        .transpose()?;
    let rules = load_rules(rules.or(configured.as_deref()))?;
    let plan = resolve_plan(&text, canvas, base, &rules).map_err(failure)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(0);
    }

    let kinds: Vec<&str> = plan.kinds.iter().map(|k| k.as_str()).collect();
    println!();
    println!("  Plan:     {}", kinds.join(", "));
    if let Some(diagram) = plan.diagram_type {
        println!("  Diagram:  {}", diagram.as_str());
    }
    if let Some(mode) = plan.base_mode {
        println!("  Table:    {}", mode.as_str());
    }
    if !plan.comparison_items.is_empty() {
        println!("  Compare:  {}", plan.comparison_items.join(" | "));
    }
    println!();
    for reason in &plan.rationale {
        let mark = if reason.included { "+" } else { "-" };
        println!("  {mark} {:<7} {}", reason.kind.as_str(), reason.detail);
    }
    println!();
    Ok(0)
}

fn cmd_config_init() -> Result<i32> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(0)
}

fn cmd_config_show(path: Option<&Path>) -> Result<i32> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(0)
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item_started(&self, locator: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("[{current}/{total}] {locator}"));
    }

    fn item_finished(&self, locator: &str, ok: bool, detail: &str) {
        let mark = if ok { "✓" } else { "✗" };
        self.spinner.println(format!("  {mark} {locator} ({detail})"));
    }
}
