//! # docsearch CLI
//!
//! The `docsearch` binary drives the whole pipeline: intake, indexing
//! workers, the consistency sweep, search, and the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! docsearch --config ./config/docsearch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsearch init` | Create the SQLite database, schema, and queue topology |
//! | `docsearch upload <file> --tenant <t>` | Store a file and queue it for indexing |
//! | `docsearch worker [--drain]` | Consume index messages |
//! | `docsearch search "<query>" --tenant <t>` | Hybrid search within one tenant |
//! | `docsearch get <id> --tenant <t>` | Show one indexed document |
//! | `docsearch sweep` | Republish documents whose status and index disagree |
//! | `docsearch serve [--worker]` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! docsearch init
//! docsearch upload ./report.pdf --tenant acme
//! docsearch worker --drain
//! docsearch search "quarterly report" --tenant acme --limit 5
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use docsearch::app::Services;
use docsearch::{config, ingest, logging, search, server, sweep};

/// docsearch: tenant-scoped document ingestion, asynchronous indexing,
/// and hybrid full-text search.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docsearch.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docsearch",
    about = "Tenant-scoped document ingestion, asynchronous indexing, and hybrid search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docsearch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and declare the queue topology.
    ///
    /// Idempotent: running it more than once is safe.
    Init,

    /// Store a local file and queue it for indexing.
    Upload {
        /// File to upload.
        file: PathBuf,

        /// Owning tenant.
        #[arg(long)]
        tenant: String,

        /// Content type; guessed from the extension when omitted.
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Consume index messages.
    ///
    /// Runs `worker.concurrency` consumers until Ctrl-C. With `--drain`,
    /// processes whatever is queued and exits.
    Worker {
        /// Exit once the queue has no visible message.
        #[arg(long)]
        drain: bool,
    },

    /// Hybrid search (file name OR content) within one tenant.
    Search {
        /// Search query text.
        query: String,

        /// Tenant to search in.
        #[arg(long)]
        tenant: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show one indexed document.
    Get {
        /// Index entry id (the document id).
        id: String,

        /// Owning tenant.
        #[arg(long)]
        tenant: String,
    },

    /// Republish documents whose metadata status and index presence disagree.
    Sweep,

    /// Start the HTTP API.
    Serve {
        /// Also run indexing consumers in this process.
        #[arg(long)]
        worker: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let cfg = config::load_config(&cli.config)?;
    let services = Services::open(&cfg).await?;

    match cli.command {
        Commands::Init => {
            println!("Database initialized successfully.");
            println!(
                "  queue: {} (exchange {}, routing key {})",
                services.topology.queue, services.topology.exchange, services.topology.routing_key
            );
        }
        Commands::Upload {
            file,
            tenant,
            content_type,
        } => {
            ingest::run_upload(&services.intake(), &file, &tenant, content_type).await?;
        }
        Commands::Worker { drain: true } => {
            let report = Arc::new(services.consumer()).drain().await?;
            println!(
                "Drained queue: {} indexed, {} rejected, {} requeued.",
                report.acked, report.rejected, report.requeued
            );
        }
        Commands::Worker { drain: false } => {
            let shutdown = shutdown_signal();
            let sweeper = spawn_periodic_sweep(&services, shutdown.clone());
            Arc::new(services.consumer()).run(shutdown).await;
            if let Some(handle) = sweeper {
                let _ = handle.await;
            }
        }
        Commands::Search {
            query,
            tenant,
            limit,
        } => {
            search::run_search(&services.search_engine(), &query, &tenant, limit).await?;
        }
        Commands::Get { id, tenant } => {
            search::run_get(&services.search_engine(), &id, &tenant).await?;
        }
        Commands::Sweep => {
            sweep::run_sweep(&services.sweep()).await?;
        }
        Commands::Serve { worker } => {
            let shutdown = shutdown_signal();
            let consumers = worker.then(|| {
                tokio::spawn(Arc::new(services.consumer()).run(shutdown.clone()))
            });
            let sweeper = spawn_periodic_sweep(&services, shutdown.clone());

            server::run_server(&services, shutdown).await?;

            for handle in consumers.into_iter().chain(sweeper) {
                let _ = handle.await;
            }
        }
    }

    Ok(())
}

/// Flips to `true` on Ctrl-C.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown requested");
                let _ = tx.send(true);
            }
            Err(err) => {
                tracing::error!(error = %err, "cannot listen for Ctrl-C");
                // Receivers must never see a closed channel.
                let _sender = tx;
                std::future::pending::<()>().await;
            }
        }
    });
    rx
}

/// Starts the background sweep when `worker.sweep_interval_secs` is non-zero.
fn spawn_periodic_sweep(
    services: &Services,
    shutdown: watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    let interval = services.config.worker.sweep_interval_secs;
    if interval == 0 {
        return None;
    }
    let sweep = services.sweep();
    Some(tokio::spawn(async move {
        sweep
            .run_periodically(Duration::from_secs(interval), shutdown)
            .await
    }))
}
