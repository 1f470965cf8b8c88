//! # kbvault CLI (`kbv`)
//!
//! The `kbv` binary starts the MCP stdio server and provides operator
//! commands for initialization, statistics, integrity audits, and
//! backup management.
//!
//! ## Usage
//!
//! ```bash
//! QDRANT_URL=http://localhost:6334 KBV_EMBEDDING_DIMS=384 \
//!   KBV_EMBEDDING_PROVIDER=hash kbv serve
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbv serve` | Start the MCP server on stdio |
//! | `kbv init` | Create collections and payload indexes |
//! | `kbv stats` | Print per-collection record counts |
//! | `kbv audit <dir>` | Reconcile stored fingerprints against source files |
//! | `kbv backup` | Write a checksummed backup of a collection |
//! | `kbv restore <path>` | Restore a backup through the import path |
//! | `kbv backups` | List available backups |
//!
//! All configuration comes from the environment; see the `config`
//! module for the variable list. Logs go to stderr; stdout belongs to
//! the MCP protocol.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use kbvault::backup;
use kbvault::bulk::ImportPolicy;
use kbvault::config::Config;
use kbvault::context::{ContentTarget, ServiceContext};
use kbvault::embedding::create_embedder;
use kbvault::query;
use kbvault::server::run_server;
use kbvault::store::qdrant::QdrantStore;
use kbvault::verify;

/// kbvault — versioned document and code storage over a vector store,
/// exposed as MCP tools.
#[derive(Parser)]
#[command(
    name = "kbv",
    about = "kbvault — versioned document and code storage over a vector store",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server on stdio.
    ///
    /// Collections and payload indexes are created on startup if they
    /// do not exist. The process serves until the client disconnects.
    Serve,

    /// Create both collections and their payload indexes. Idempotent.
    Init,

    /// Print per-collection record counts.
    Stats,

    /// Reconcile stored fingerprints against source files on disk.
    Audit {
        /// Directory to walk.
        source_directory: String,

        /// Do not descend into subdirectories.
        #[arg(long)]
        no_recursive: bool,

        /// File extensions to include (e.g. `.md`).
        #[arg(long)]
        extensions: Vec<String>,
    },

    /// Write a checksummed backup of a collection.
    Backup {
        /// Which collection to back up.
        #[arg(long, default_value = "docs")]
        collection: String,

        /// Include embedding vectors in the backup.
        #[arg(long)]
        include_embeddings: bool,
    },

    /// Restore a backup directory through the import path.
    Restore {
        /// Path to the backup directory.
        backup_path: String,

        /// Duplicate policy: skip, update, or error.
        #[arg(long, default_value = "skip")]
        strategy: String,
    },

    /// List available backups.
    Backups,
}

async fn build_context() -> Result<ServiceContext> {
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    let store = QdrantStore::connect(
        &config.backend_url,
        config.backend_api_key.as_deref(),
        std::time::Duration::from_secs(config.timeout_secs),
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;
    let embedder = create_embedder(&config.embedding).map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(ServiceContext::new(
        Arc::new(store),
        Arc::from(embedder),
        config,
    ))
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let ctx = build_context().await?;

    match cli.command {
        Commands::Serve => {
            ctx.bootstrap().await.map_err(|e| anyhow::anyhow!("{e}"))?;
            run_server(ctx).await?;
        }
        Commands::Init => {
            ctx.bootstrap().await.map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("initialized collections and payload indexes");
        }
        Commands::Stats => {
            let stats = query::get_stats(&ctx)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            print_json(&stats);
        }
        Commands::Audit {
            source_directory,
            no_recursive,
            extensions,
        } => {
            let exts = (!extensions.is_empty()).then_some(extensions);
            let report =
                verify::audit_storage_integrity(&ctx, &source_directory, !no_recursive, exts)
                    .await
                    .map_err(|e| anyhow::anyhow!("{e}"))?;
            print_json(&report);
        }
        Commands::Backup {
            collection,
            include_embeddings,
        } => {
            let target = match collection.as_str() {
                "code" => ContentTarget::Code,
                _ => ContentTarget::Docs,
            };
            let result = backup::create_backup(&ctx, target, None, include_embeddings, None)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            print_json(&result);
        }
        Commands::Restore {
            backup_path,
            strategy,
        } => {
            let policy = ImportPolicy::parse(&strategy).map_err(|e| anyhow::anyhow!("{e}"))?;
            let result = backup::restore_backup(&ctx, &backup_path, policy)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            print_json(&result);
        }
        Commands::Backups => {
            let result = backup::list_backups(&ctx, None).map_err(|e| anyhow::anyhow!("{e}"))?;
            print_json(&result);
        }
    }

    Ok(())
}
