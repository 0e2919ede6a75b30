//! CLI command definitions, routing, and tracing setup.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use url::Url;

use sitekb_core::{IngestReport, KnowledgeService, ProgressReporter};
use sitekb_shared::{
    AppConfig, KbId, config_dir, init_config, load_config, validate_api_key,
};
use sitekb_storage::StateStore;
use sitekb_vector::{Embedder, HashEmbedder, HttpEmbedder, LocalVectorService};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// sitekb: turn a website into a queryable knowledge base.
#[derive(Parser)]
#[command(
    name = "sitekb",
    version,
    about = "Crawl a website, index its content, and query it by similarity.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

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
    /// Crawl a website and build its knowledge base.
    Add {
        /// Seed URL to crawl.
        url: String,
    },

    /// Query a knowledge base by similarity.
    Query {
        /// Knowledge base identifier (see `sitekb list`).
        kb_id: String,

        /// Query text.
        query: String,

        /// Number of results to return.
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Print an assembled context block instead of individual results.
        #[arg(long)]
        context: bool,
    },

    /// Show the status of a knowledge base.
    Status {
        /// Knowledge base identifier.
        kb_id: String,
    },

    /// List all knowledge bases.
    List,

    /// Delete a knowledge base and its chunks.
    Delete {
        /// Knowledge base identifier.
        kb_id: String,
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
        0 => "sitekb=info",
        1 => "sitekb=debug",
        _ => "sitekb=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Add { url } => cmd_add(&url).await,
        Command::Query {
            kb_id,
            query,
            top_k,
            context,
        } => cmd_query(&kb_id, &query, top_k, context).await,
        Command::Status { kb_id } => cmd_status(&kb_id).await,
        Command::List => cmd_list().await,
        Command::Delete { kb_id } => cmd_delete(&kb_id).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Service wiring
// ---------------------------------------------------------------------------

/// Assemble the service from config: SQLite state under `~/.sitekb/`,
/// the local vector backend, and the configured embedder.
async fn build_service(config: &AppConfig) -> Result<KnowledgeService> {
    let data_dir = config_dir()?;
    let store = Arc::new(StateStore::open(&data_dir.join("sitekb.db")).await?);
    let vector = Arc::new(LocalVectorService::with_persistence(
        data_dir.join("vectors.json"),
    )?);

    let embedder: Arc<dyn Embedder> = match config.embedding.endpoint {
        Some(_) => {
            // The key is optional: local endpoints often run without
            // auth, and HttpEmbedder only sends a bearer token when one
            // is present.
            if let Err(e) = validate_api_key(config) {
                warn!(error = %e, "continuing without an embedding API key");
            }
            Arc::new(HttpEmbedder::from_config(&config.embedding)?)
        }
        None => Arc::new(HashEmbedder::new(config.embedding.dimension)),
    };

    Ok(KnowledgeService::new(store, embedder, vector, config))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_add(url: &str) -> Result<()> {
    let config = load_config()?;

    let parsed_url = Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;
    if parsed_url.host_str().is_none() {
        return Err(eyre!("URL '{url}' has no host"));
    }

    let service = build_service(&config).await?;

    info!(url, "adding website");

    let reporter = CliProgress::new();
    let report = service.submit(&parsed_url, &reporter).await?;

    println!();
    println!("  Knowledge base created successfully!");
    println!("  ID:     {}", report.kb_id);
    println!("  Pages:  {}", report.pages);
    println!("  Chunks: {}", report.chunks);
    println!("  Time:   {:.1}s", report.elapsed.as_secs_f64());
    println!();
    println!("  Query it with: sitekb query {} \"your question\"", report.kb_id);
    println!();

    Ok(())
}

async fn cmd_query(kb_id: &str, query: &str, top_k: Option<usize>, context: bool) -> Result<()> {
    let config = load_config()?;
    let service = build_service(&config).await?;
    let kb_id = KbId(kb_id.to_string());

    if context {
        let context = service.query_context(&kb_id, query).await;
        println!("{context}");
        return Ok(());
    }

    let results = service.query(&kb_id, query, top_k).await;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let title = if result.title.is_empty() {
            "(untitled)"
        } else {
            &result.title
        };
        println!();
        println!("{}. {title} (distance {:.4})", i + 1, result.distance);
        println!("   {}", result.source_url);
        println!("   {}", result.content);
    }
    println!();

    Ok(())
}

async fn cmd_status(kb_id: &str) -> Result<()> {
    let config = load_config()?;
    let service = build_service(&config).await?;

    let entry = service
        .get_status(&KbId(kb_id.to_string()))
        .await?
        .ok_or_else(|| eyre!("no knowledge base with id '{kb_id}'"))?;

    println!();
    println!("  ID:      {}", entry.kb_id);
    println!("  URL:     {}", entry.url);
    println!("  Status:  {}", entry.status);
    println!("  Pages:   {}/{}", entry.indexed_pages, entry.total_pages);
    println!("  Created: {}", entry.created_at.to_rfc3339());
    println!("  Updated: {}", entry.updated_at.to_rfc3339());
    if let Some(message) = &entry.error_message {
        println!("  Error:   {message}");
    }
    println!();

    Ok(())
}

async fn cmd_list() -> Result<()> {
    let config = load_config()?;
    let service = build_service(&config).await?;

    let entries = service.list().await?;
    if entries.is_empty() {
        println!("No knowledge bases yet. Create one with: sitekb add <url>");
        return Ok(());
    }

    println!();
    for entry in &entries {
        println!(
            "  {}  [{}]  {} pages  {}",
            entry.kb_id, entry.status, entry.indexed_pages, entry.url
        );
    }
    println!();

    Ok(())
}

async fn cmd_delete(kb_id: &str) -> Result<()> {
    let config = load_config()?;
    let service = build_service(&config).await?;

    if service.delete(&KbId(kb_id.to_string())).await? {
        println!("Deleted knowledge base '{kb_id}'.");
        Ok(())
    } else {
        Err(eyre!("no knowledge base with id '{kb_id}'"))
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
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
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _report: &IngestReport) {
        self.spinner.finish_and_clear();
    }
}
