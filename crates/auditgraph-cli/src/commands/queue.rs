//! Failed-job management.

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use auditgraph_core::{EventEnvelope, SyncConfig};

use super::connect_queue;

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List jobs that exhausted their attempts
    Failed {
        /// Maximum number of jobs to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Move a failed job back to the waiting list
    Retry {
        /// Job id (the event id)
        job_id: String,
    },

    /// Drop a failed job
    Remove {
        /// Job id (the event id)
        job_id: String,
    },
}

pub async fn execute(cmd: QueueCommands, config: &SyncConfig) -> Result<()> {
    let queue = connect_queue(config).await?;

    match cmd {
        QueueCommands::Failed { limit } => {
            let jobs = queue.failed(limit).await?;
            if jobs.is_empty() {
                println!("{}", "No failed jobs.".dimmed());
                return Ok(());
            }
            println!("{:<36} {:<32} {:>8}  {}", "ID", "Event", "Attempts", "Last error");
            println!("{}", "-".repeat(100));
            for job in &jobs {
                // Name falls back to the raw job name when the payload no longer decodes.
                let event = EventEnvelope::from_job(job)
                    .map(|e| e.event_type().to_string())
                    .unwrap_or_else(|_| job.name.clone());
                println!(
                    "{:<36} {:<32} {:>8}  {}",
                    job.id,
                    event.cyan(),
                    job.attempts_made,
                    job.last_error.as_deref().unwrap_or("-").red()
                );
            }
            Ok(())
        }
        QueueCommands::Retry { job_id } => {
            if queue.retry_failed(&job_id).await? {
                println!("{} {}", "Requeued".green(), job_id);
            } else {
                println!("{} {}", "No failed job".yellow(), job_id);
            }
            Ok(())
        }
        QueueCommands::Remove { job_id } => {
            if queue.remove_failed(&job_id).await? {
                println!("{} {}", "Removed".green(), job_id);
            } else {
                println!("{} {}", "No failed job".yellow(), job_id);
            }
            Ok(())
        }
    }
}
