//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tracing::info;

use pagecast_core::{PipelineError, ProgressReporter, Stage};
use pagecast_server::AppState;
use pagecast_shared::{AppConfig, FetchRequest, init_config, load_config, load_config_from};

use crate::wiring::build_services;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Pagecast: turn web pages into stored documents and learning paths.
#[derive(Parser)]
#[command(
    name = "pagecast",
    version,
    about = "Render a web page, extract its article, publish it as a PDF, and enrich it with an AI assistant.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.pagecast/pagecast.toml.
    #[arg(long, global = true, env = "PAGECAST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Keep artifacts in memory instead of uploading them.
    #[arg(long, global = true)]
    pub dry_run: bool,

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
    /// Run the HTTP service.
    Serve {
        /// Address to bind (overrides `server.listen_addr`).
        #[arg(long)]
        listen: Option<String>,

        /// Per-request deadline in seconds (overrides `server.request_timeout_secs`).
        #[arg(long)]
        request_timeout: Option<u64>,
    },

    /// Extract one page, printing its text or storing it as a PDF.
    Extract {
        /// Page URL.
        url: String,

        /// Build and store a PDF instead of printing the text.
        #[arg(long)]
        pdf: bool,

        /// PDF title (defaults to the extracted title, then `artifact.default_title`).
        #[arg(long, requires = "pdf")]
        title: Option<String>,
    },

    /// Run the full pipeline including AI enrichment.
    Learn {
        /// Page URL.
        url: String,

        /// Context text for the assistant.
        #[arg(short, long)]
        description: Option<String>,
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
        0 => "pagecast=info",
        1 => "pagecast=debug",
        _ => "pagecast=trace",
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
    let Cli {
        config,
        dry_run,
        command,
        ..
    } = cli;

    match command {
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&resolve_config(config)?),
        },
        Command::Serve {
            listen,
            request_timeout,
        } => {
            let mut config = resolve_config(config)?;
            if let Some(listen) = listen {
                config.server.listen_addr = listen;
            }
            if let Some(secs) = request_timeout {
                config.server.request_timeout_secs = secs;
            }
            cmd_serve(&config, dry_run).await
        }
        Command::Extract { url, pdf, title } => {
            let config = resolve_config(config)?;
            cmd_extract(&config, dry_run, url, pdf, title.as_deref()).await
        }
        Command::Learn { url, description } => {
            let config = resolve_config(config)?;
            cmd_learn(&config, dry_run, url, description).await
        }
    }
}

fn resolve_config(path: Option<PathBuf>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(&path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_serve(config: &AppConfig, dry_run: bool) -> Result<()> {
    let services = build_services(config, dry_run)?;
    info!(
        listen = %config.server.listen_addr,
        enrichment = services.pipeline.has_enrichment(),
        pool_size = services.pool.max_sessions(),
        "starting server"
    );

    let state = AppState::new(services.pipeline.clone(), config.server.request_timeout());
    let served = pagecast_server::serve(&config.server.listen_addr, state).await;
    services.shutdown().await;
    served?;
    Ok(())
}

async fn cmd_extract(
    config: &AppConfig,
    dry_run: bool,
    url: String,
    pdf: bool,
    title: Option<&str>,
) -> Result<()> {
    let services = build_services(config, dry_run)?;
    let request = FetchRequest::new(url);
    let reporter = CliProgress::new();

    let output = if pdf {
        services
            .pipeline
            .extract_artifact(&request, title, &reporter)
            .await
            .map(|r| json!({ "title": r.title, "url": r.url }))
    } else {
        services
            .pipeline
            .extract_text(&request, &reporter)
            .await
            .map(|a| json!({ "title": a.title, "text": a.text }))
    };
    services.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&output?)?);
    Ok(())
}

async fn cmd_learn(
    config: &AppConfig,
    dry_run: bool,
    url: String,
    description: Option<String>,
) -> Result<()> {
    let services = build_services(config, dry_run)?;
    if !services.pipeline.has_enrichment() {
        services.shutdown().await;
        return Err(eyre!(
            "enrichment is not configured: set assistant.assistant_id, assistant.vector_store_id, and {}",
            config.assistant.api_key_env
        ));
    }

    let mut request = FetchRequest::new(url);
    request.description = description;
    let reporter = CliProgress::new();

    let result = services
        .pipeline
        .generate_learning_path(&request, &reporter)
        .await;
    services.shutdown().await;
    let response = result?;

    info!(outcome = ?response.outcome, "enrichment finished");
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
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
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Received => "Validating request",
        Stage::Rendering => "Rendering page",
        Stage::Extracting => "Extracting article",
        Stage::BuildingArtifact => "Building PDF",
        Stage::Storing => "Uploading artifact",
        Stage::Enriching => "Waiting for the assistant",
        Stage::Done => "Done",
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, stage: Stage) {
        if stage == Stage::Done {
            self.spinner.finish_and_clear();
        } else {
            self.spinner.set_message(stage_label(stage));
        }
    }

    fn failed(&self, _error: &PipelineError) {
        self.spinner.finish_and_clear();
    }
}
