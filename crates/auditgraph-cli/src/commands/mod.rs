//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use auditgraph_core::{EventQueue, SyncConfig};
use auditgraph_db::SqliteSource;
use auditgraph_graph::Neo4jGraph;
use auditgraph_redis::RedisQueue;

pub mod graph;
pub mod queue;
pub mod sync;

/// AuditGraph - relational to graph synchronization
#[derive(Parser)]
#[command(name = "auditgraph")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file (defaults to ./auditgraph.toml)
    #[arg(short, long, global = true, env = "AUDITGRAPH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Consume the sync queue and apply events to the graph
    Worker(sync::WorkerArgs),

    /// Rebuild the graph from the relational source
    Backfill(sync::BackfillArgs),

    /// Re-hydrate properties and prune nodes without a relational row
    Reconcile(sync::ReconcileArgs),

    /// Show queue and graph counts
    Status,

    /// Inspect and manage failed jobs
    #[command(subcommand)]
    Queue(queue::QueueCommands),

    /// Create graph constraints
    Schema,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = SyncConfig::load(self.config.as_deref()).context("Failed to load configuration")?;

        match self.command {
            Commands::Worker(args) => sync::cmd_worker(&config, args).await,
            Commands::Backfill(args) => sync::cmd_backfill(&config, args).await,
            Commands::Reconcile(args) => sync::cmd_reconcile(&config, args).await,
            Commands::Status => graph::cmd_status(&config).await,
            Commands::Queue(cmd) => queue::execute(cmd, &config).await,
            Commands::Schema => graph::cmd_schema(&config).await,
        }
    }
}

pub(crate) async fn connect_queue(config: &SyncConfig) -> Result<Arc<dyn EventQueue>> {
    let queue = RedisQueue::connect(&config.queue)
        .await
    .with_context(|| format!("Failed to connect to Redis at {}", config.queue.redis_url))?;
    Ok(Arc::new(queue))
}

pub(crate) async fn connect_graph(config: &SyncConfig) -> Result<Arc<Neo4jGraph>> {
    let graph = Neo4jGraph::connect(&config.graph).await?;
    Ok(Arc::new(graph))
}

pub(crate) fn open_source(config: &SyncConfig) -> Result<SqliteSource> {
    let path = &config.source.sqlite_path;
    SqliteSource::open(path).with_context(|| format!("Failed to open relational source {}", path.display()))
}

/// Shutdown flag flipped by Ctrl-C.
pub(crate) fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, finishing in-flight work");
            let _ = tx.send(true);
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_reconcile_flags() {
        let cli = Cli::try_parse_from(["auditgraph", "reconcile", "--dry-run", "--interval", "60"]).unwrap();
        match cli.command {
            Commands::Reconcile(args) => {
                assert!(args.dry_run);
                assert_eq!(args.interval, Some(60));
                assert!(!args.watch);
            }
            _ => panic!("expected reconcile"),
        }
    }

    #[test]
    fn test_backfill_wait_conflicts_with_direct() {
        assert!(Cli::try_parse_from(["auditgraph", "backfill", "--direct", "--wait"]).is_err());
    }

    #[test]
    fn test_parse_queue_retry() {
        let cli = Cli::try_parse_from(["auditgraph", "--config", "x.toml", "queue", "retry", "job-1"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(cli.command, Commands::Queue(queue::QueueCommands::Retry { ref job_id }) if job_id == "job-1"));
    }
}
