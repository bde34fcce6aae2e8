//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use newsdesk_cache::{ContentCache, PurgeFilter};
use newsdesk_core::capability::Synthesizer;
use newsdesk_core::report::ReportLabels;
use newsdesk_core::{
    AggregationBatch, CapabilityTable, LlmClient, LlmSynthesizer, PipelineOptions,
    PipelineScheduler, ProgressReporter, RunMode, SourceRecord, Terminal, aggregate, llm_bindings,
    report,
};
use newsdesk_fetch::{FetchOptions, HttpFetcher};
use newsdesk_shared::{
    AppConfig, NewsdeskError, RunModeSetting, StageError, StageKind, init_config, load_config,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Newsdesk: many news sites in, one report out.
#[derive(Parser)]
#[command(
    name = "newsdesk",
    version,
    about = "Fetch news sources, analyse them with an LLM, and write a consolidated report.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ./newsdesk.toml, then ~/.newsdesk/newsdesk.toml).
    #[arg(short, long, global = true, env = "NEWSDESK_CONFIG")]
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

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Process every configured source and write the report.
    Run {
        /// Process sources one at a time.
        #[arg(long, conflicts_with = "concurrent")]
        serial: bool,

        /// Process up to N sources at once.
        #[arg(long, value_name = "N")]
        concurrent: Option<usize>,

        /// Ignore fresh cache entries and fetch everything.
        #[arg(long)]
        force_refresh: bool,

        /// Disable the page cache for this run.
        #[arg(long)]
        no_cache: bool,

        /// Skip synthesis and write the aggregated JSON instead.
        #[arg(long)]
        no_synthesis: bool,

        /// Output directory (overrides settings.output_dir).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List configured sources.
    Sources,

    /// Inspect or purge the page cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// List cache entries.
    List {
        /// Print entries as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Remove cache entries. Without filters, removes everything.
    Purge {
        /// Only entries older than this many hours.
        #[arg(long, value_name = "HOURS")]
        older_than_hours: Option<u64>,

        /// Only entries for this source.
        #[arg(long, value_name = "NAME")]
        source: Option<String>,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Write a config file with defaults and one example source.
    Init {
        /// Where to write it (defaults to ~/.newsdesk/newsdesk.toml).
        path: Option<PathBuf>,
    },
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
        0 => "newsdesk=warn",
        1 => "newsdesk=info",
        2 => "newsdesk=debug",
        _ => "newsdesk=trace",
    };

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
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            serial,
            concurrent,
            force_refresh,
            no_cache,
            no_synthesis,
            out,
        } => {
            let mut config = load_config(config_path)?;
            let overrides = RunOverrides {
                serial,
                concurrent,
                force_refresh,
                no_cache,
                out,
            };
            overrides.apply(&mut config);
            cmd_run(config, no_synthesis).await
        }
        Command::Sources => cmd_sources(config_path),
        Command::Cache { action } => match action {
            CacheAction::List { json } => cmd_cache_list(config_path, json),
            CacheAction::Purge {
                older_than_hours,
                source,
            } => cmd_cache_purge(config_path, older_than_hours, source.as_deref()),
        },
        Command::Config { action } => match action {
            ConfigAction::Init { path } => cmd_config_init(path.as_deref()),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

/// Command-line settings that win over the config file.
struct RunOverrides {
    serial: bool,
    concurrent: Option<usize>,
    force_refresh: bool,
    no_cache: bool,
    out: Option<PathBuf>,
}

impl RunOverrides {
    fn apply(self, config: &mut AppConfig) {
        let settings = &mut config.settings;
        if self.serial {
            settings.run_mode = RunModeSetting::Serial;
        }
        if let Some(n) = self.concurrent {
            settings.run_mode = RunModeSetting::Concurrent;
            settings.max_in_flight = n;
        }
        if self.force_refresh {
            settings.force_refresh = true;
        }
        if self.no_cache {
            settings.cache_enabled = false;
        }
        if let Some(out) = self.out {
            settings.output_dir = out.to_string_lossy().into_owned();
        }
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(config: AppConfig, no_synthesis: bool) -> Result<()> {
    let settings = &config.settings;
    settings.validate()?;
    if config.sources.is_empty() {
        return Err(eyre!(
            "no sources configured. Add [[sources]] entries or run `newsdesk config init`."
        ));
    }

    let client = Arc::new(LlmClient::from_config(&config.llm)?);
    let fetcher = Arc::new(HttpFetcher::new(&FetchOptions::default())?);
    let table = CapabilityTable::new(llm_bindings(
        fetcher,
        client.clone(),
        &config.llm,
        &settings.target_language,
    ));
    let specs = table.bind_all(&config.sources)?;

    let cache = if settings.cache_enabled {
        Some(ContentCache::open(&settings.cache_dir)?)
    } else {
        None
    };

    let progress = Arc::new(CliProgress::new());
    let scheduler = PipelineScheduler::new(specs, PipelineOptions::from_settings(settings))
        .with_cache(cache)
        .with_progress(progress.clone());

    let stop = scheduler.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current stages");
            stop.request_stop();
        }
    });

    let mode = RunMode::from_settings(settings);
    info!(sources = config.sources.len(), ?mode, "starting run");
    let batch = scheduler.run_all(mode).await?;
    progress.finish();

    print_summary(&batch);

    let input = aggregate(&batch);
    let out_dir = PathBuf::from(&settings.output_dir);
    let generated_at = chrono::Local::now().naive_local();

    if no_synthesis {
        let path = report::write_aggregate(&out_dir, &input, generated_at)?;
        println!("  Aggregate: {}", path.display());
        return Ok(());
    }

    let body = if input.has_content() {
        let synthesizer = LlmSynthesizer::new(
            client,
            config.llm.integration_model.clone(),
            settings.target_language.clone(),
        );
        let spinner = spinner("Synthesizing report");
        let result = synthesizer.synthesize(&input).await;
        spinner.finish_and_clear();
        result
    } else {
        Err(StageError::permanent("no source produced any content"))
    };

    let labels = ReportLabels::for_language(&settings.target_language);
    let rendered = match &body {
        Ok(text) => report::render(&input, text, generated_at, &labels),
        Err(e) => {
            warn!(error = %e, "synthesis failed, writing failure report");
            report::render_failure(&input, e, generated_at, &labels)
        }
    };
    let path = report::write_report(&out_dir, &rendered, generated_at)?;
    println!("  Report:    {}", path.display());
    println!();

    body.map_err(NewsdeskError::from)?;
    Ok(())
}

fn print_summary(batch: &AggregationBatch) {
    let stats = batch.stats();
    println!();
    for record in &batch.records {
        println!("  {}", record_line(record));
    }
    println!();
    println!("  Sources:   {}", stats.total);
    println!("  Completed: {}", stats.completed);
    println!("  Degraded:  {} ({} partial)", stats.degraded, stats.partial);
    println!("  Cached:    {}", stats.from_cache);
    println!("  Success:   {:.1}%", stats.success_rate * 100.0);
    println!(
        "  Time:      {:.1}s",
        batch.elapsed().num_milliseconds() as f64 / 1000.0
    );
}

fn record_line(record: &SourceRecord) -> String {
    match &record.terminal {
        Terminal::Completed { .. } => format!("✓ {} ({:.1}s)", record.name, seconds(record)),
        Terminal::Degraded { reason, .. } => {
            format!("✗ {}: {} ({})", record.name, reason.detail(), reason.label())
        }
    }
}

fn seconds(record: &SourceRecord) -> f64 {
    record.elapsed_ms as f64 / 1000.0
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    spinner.set_style(style);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        Self {
            spinner: spinner("Starting"),
        }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn stage_started(&self, source: &str, stage: StageKind) {
        self.spinner.set_message(format!("{source}: {stage}"));
    }

    fn source_finished(&self, record: &SourceRecord) {
        self.spinner.println(format!("  {}", record_line(record)));
    }
}

// ---------------------------------------------------------------------------
// sources / cache / config
// ---------------------------------------------------------------------------

fn cmd_sources(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    if config.sources.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    for (i, source) in config.sources.iter().enumerate() {
        println!(
            "{:>3}. {} [{}] ({})",
            i + 1,
            source.name,
            source.kind,
            source.language
        );
        println!("     {}", source.url);
        if !source.description.is_empty() {
            println!("     {}", source.description);
        }
        if let Some(model) = &source.model {
            println!("     model: {model}");
        }
    }
    Ok(())
}

fn open_cache(config_path: Option<&Path>) -> Result<ContentCache> {
    let config = load_config(config_path)?;
    Ok(ContentCache::open(&config.settings.cache_dir)?)
}

fn cmd_cache_list(config_path: Option<&Path>, json: bool) -> Result<()> {
    let cache = open_cache(config_path)?;
    let entries = cache.entries()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("Cache at {} is empty.", cache.root().display());
        return Ok(());
    }

    for entry in &entries {
        println!(
            "  {:<40} {:>8} B  {:>6.1} h  {}",
            entry.namespace,
            entry.size,
            entry.age.as_secs_f64() / 3600.0,
            entry.file_name
        );
    }
    println!();
    println!("  {} entries in {}", entries.len(), cache.root().display());
    Ok(())
}

fn cmd_cache_purge(
    config_path: Option<&Path>,
    older_than_hours: Option<u64>,
    source: Option<&str>,
) -> Result<()> {
    let cache = open_cache(config_path)?;

    let older = older_than_hours.map(|h| PurgeFilter::older_than(Duration::from_secs(h * 3600)));
    let in_source = source.map(PurgeFilter::namespace);
    let report = cache.purge(|entry| {
        older.as_ref().is_none_or(|f| f(entry)) && in_source.as_ref().is_none_or(|f| f(entry))
    })?;

    println!(
        "  Removed {} entries ({} bytes)",
        report.removed, report.bytes_freed
    );
    for (path, error) in &report.failed {
        println!("  Failed:  {} ({error})", path.display());
    }
    Ok(())
}

fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = init_config(path)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config: AppConfig = load_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
