//! Graph schema and status commands.

use anyhow::Result;
use colored::Colorize;
use tracing::warn;

use auditgraph_core::SyncConfig;
use auditgraph_graph::schema::initialize_schema;
use auditgraph_graph::GraphStore;

use super::{connect_graph, connect_queue};

/// Create the uniqueness constraints.
pub async fn cmd_schema(config: &SyncConfig) -> Result<()> {
    let graph = connect_graph(config).await?;
    let applied = initialize_schema(&graph).await?;
    println!("{} ({} constraints)", "Schema initialized".green().bold(), applied);
    Ok(())
}

/// Show queue and graph counts. Either side may be down.
pub async fn cmd_status(config: &SyncConfig) -> Result<()> {
    println!("{}", "Sync Queue".bold());
    println!("{}", "─".repeat(40));
    match connect_queue(config).await {
        Ok(queue) => {
            let counts = queue.counts().await?;
            println!("  Queue:    {}", config.queue.name.cyan());
            println!("  Waiting:  {}", counts.waiting);
            println!("  Active:   {}", counts.active);
            println!("  Delayed:  {}", counts.delayed);
            let failed = counts.failed.to_string();
            if counts.failed > 0 {
                println!("  Failed:   {}", failed.red());
            } else {
                println!("  Failed:   {}", failed);
            }
        }
        Err(e) => {
            warn!(error = %e, "Queue unavailable");
            println!("  {} {}", "Unavailable:".red(), config.queue.redis_url);
        }
    }

    println!("\n{}", "Knowledge Graph".bold());
    println!("{}", "─".repeat(40));
    match connect_graph(config).await {
        Ok(graph) => {
            let counts = graph.counts().await?;
            println!("  Nodes:         {}", counts.nodes);
            println!("  Relationships: {}", counts.relationships);
        }
        Err(e) => {
            warn!(error = %e, "Graph unavailable");
            println!("  {} {}", "Unavailable:".red(), config.graph.uri);
        }
    }

    Ok(())
}
