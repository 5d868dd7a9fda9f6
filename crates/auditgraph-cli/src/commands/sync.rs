//! Worker, backfill and reconcile commands.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tokio::sync::watch;

use auditgraph_core::{EventQueue, EventSink, GraphEventProducer, SyncConfig};
use auditgraph_graph::schema::initialize_schema;
use auditgraph_graph::{
    run_backfill, run_reconcile, BackfillReport, PoolConfig, ReconcileOptions, ReconcileReport,
    SyncWorker, WorkerPool,
};

use super::{connect_graph, connect_queue, open_source, shutdown_on_ctrl_c};

#[derive(Args)]
pub struct WorkerArgs {
    /// Number of concurrent consumer loops (overrides config)
    #[arg(long)]
    pub concurrency: Option<usize>,
}

#[derive(Args)]
pub struct BackfillArgs {
    /// Apply to the graph directly instead of going through the queue
    #[arg(long)]
    pub direct: bool,

    /// After enqueueing, wait until the queue is idle
    #[arg(long, conflicts_with = "direct")]
    pub wait: bool,
}

#[derive(Args)]
pub struct ReconcileArgs {
    /// Report stale nodes without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Apply hydration directly instead of going through the queue
    #[arg(long)]
    pub direct: bool,

    /// Re-run every N seconds until Ctrl-C
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// Re-run on the configured interval until Ctrl-C
    #[arg(long, conflicts_with = "interval")]
    pub watch: bool,
}

pub async fn cmd_worker(config: &SyncConfig, args: WorkerArgs) -> Result<()> {
    let queue = connect_queue(config).await?;
    let graph = connect_graph(config).await?;
    initialize_schema(&graph).await?;

    let mut pool_config = PoolConfig::from_config(&config.worker, &config.queue);
    if let Some(concurrency) = args.concurrency {
        pool_config.concurrency = concurrency.max(1);
    }

    println!(
        "{} queue {} with {} workers",
        "Consuming".bold(),
        config.queue.name.cyan(),
        pool_config.concurrency
    );

    let pool = WorkerPool::new(queue, SyncWorker::new(graph), pool_config);
    pool.run(shutdown_on_ctrl_c()).await?;

    let stats = pool.stats();
    println!("\n{}", "Worker stopped:".green().bold());
    println!("  Completed: {}", stats.completed());
    println!("  Retried:   {}", stats.retried());
    println!("  Failed:    {}", stats.dead());
    Ok(())
}

pub async fn cmd_backfill(config: &SyncConfig, args: BackfillArgs) -> Result<()> {
    let source = open_source(config)?;
    let cancel = shutdown_on_ctrl_c();

    println!("{}", "Backfilling graph...".bold());

    let report = if args.direct {
        let graph = connect_graph(config).await?;
        initialize_schema(&graph).await?;
        let worker = SyncWorker::new(graph);
        run_backfill(&source, &worker, &cancel).await?
    } else {
        let queue = connect_queue(config).await?;
        let producer = GraphEventProducer::new(queue.clone()).with_timeout(config.queue.enqueue_timeout());
        let report = run_backfill(&source, &producer, &cancel).await?;
        if args.wait && !report.cancelled {
            wait_for_idle(queue.as_ref(), &cancel).await?;
        }
        report
    };

    print_backfill_report(&report, args.direct);
    Ok(())
}

pub async fn cmd_reconcile(config: &SyncConfig, args: ReconcileArgs) -> Result<()> {
    let source = open_source(config)?;
    let graph = connect_graph(config).await?;
    let cancel = shutdown_on_ctrl_c();
    let options = ReconcileOptions { dry_run: args.dry_run };

    let sink: Box<dyn EventSink> = if args.direct || args.dry_run {
        Box::new(SyncWorker::new(graph.clone()))
    } else {
        let queue = connect_queue(config).await?;
        Box::new(GraphEventProducer::new(queue).with_timeout(config.queue.enqueue_timeout()))
    };

    let interval = match (args.interval, args.watch) {
        (Some(secs), _) => Some(Duration::from_secs(secs.max(1))),
        (None, true) => Some(Duration::from_secs(config.reconcile.interval_secs.max(1))),
        (None, false) => None,
    };

    loop {
        let report = run_reconcile(&source, graph.as_ref(), sink.as_ref(), options, &cancel).await?;
        print_reconcile_report(&report);

        let Some(interval) = interval else {
            return Ok(());
        };
        if report.cancelled || !sleep_or_cancel(interval, cancel.clone()).await {
            return Ok(());
        }
        println!("\n{} (every {}s)", "Next reconciliation".dimmed(), interval.as_secs());
    }
}

/// Returns false when cancelled before `period` elapsed.
async fn sleep_or_cancel(period: Duration, mut cancel: watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(period) => true,
        _ = cancel.changed() => false,
    }
}

async fn wait_for_idle(queue: &dyn EventQueue, cancel: &watch::Receiver<bool>) -> Result<()> {
    println!("{}", "Waiting for the worker to drain the queue...".dimmed());
    loop {
        let counts = queue.counts().await?;
        if counts.is_idle() {
            return Ok(());
        }
        println!(
            "  waiting {} / active {} / delayed {}",
            counts.waiting, counts.active, counts.delayed
        );
        if !sleep_or_cancel(Duration::from_secs(2), cancel.clone()).await {
            return Ok(());
        }
    }
}

fn print_backfill_report(report: &BackfillReport, direct: bool) {
    let verb = if direct { "applied" } else { "enqueued" };
    if report.cancelled {
        println!("\n{}", "Backfill cancelled:".yellow().bold());
    } else {
        println!("\n{}", "Backfill complete:".green().bold());
    }
    println!("  {:<10} {:>6} {:>8}", "Table", "Rows", "Events");
    println!("  {}", "-".repeat(26));
    for (table, stats) in report.tables() {
        println!("  {:<10} {:>6} {:>8}", table, stats.rows, stats.events);
    }
    println!("  Events {}: {}", verb, report.events().to_string().bold());
    if report.skipped_keywords > 0 {
        println!("  {} free-text keywords skipped", report.skipped_keywords.to_string().dimmed());
    }
    if report.skipped_uploaders > 0 {
        println!("  {} evidence uploaders missing", report.skipped_uploaders.to_string().yellow());
    }
    if report.skipped_issues > 0 {
        println!("  {} issues without a manager", report.skipped_issues.to_string().yellow());
    }
}

fn print_reconcile_report(report: &ReconcileReport) {
    let title = match (report.cancelled, report.dry_run) {
        (true, _) => "Reconciliation cancelled:".yellow().bold(),
        (false, true) => "Reconciliation dry run:".cyan().bold(),
        (false, false) => "Reconciliation complete:".green().bold(),
    };
    println!("\n{}", title);

    if !report.dry_run {
        let h = &report.hydrated;
        println!(
            "  Hydrated: {} evidence, {} control, {} tag, {} project events",
            h.evidence, h.controls, h.tags, h.projects
        );
    }

    if report.pruned.is_empty() {
        println!("  {}", "No stale nodes.".dimmed());
        return;
    }
    let action = if report.dry_run { "Stale" } else { "Pruned" };
    for (label, ids) in &report.pruned {
        println!("  {} {} ({}):", action, label.to_string().cyan(), ids.len());
        for id in ids {
            println!("    {} {}", "→".dimmed(), id);
        }
    }
}

