mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use judge_common::config::RedisConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "judge-cli")]
#[command(about = "Judge CLI - Submit jobs and inspect verdicts", long_about = None)]
struct Cli {
    /// Redis URL (defaults to REDIS_URL or redis://127.0.0.1:6379)
    #[arg(long, global = true)]
    redis_url: Option<String>,

    /// Queue name (defaults to QUEUE_NAME or codeQueue)
    #[arg(long, global = true)]
    queue: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a pending submission and enqueue the job
    Submit {
        /// Job JSON file ({"jobId", "language", "code", "testCases"})
        file: PathBuf,

        /// Override (or supply) the job id
        #[arg(short, long)]
        job_id: Option<String>,
    },

    /// Print the cached verdict of a job
    Result {
        job_id: String,
    },

    /// Print the durable submission record of a job
    Submission {
        job_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut redis = RedisConfig::from_env();
    if let Some(url) = cli.redis_url {
        redis.url = url;
    }
    if let Some(queue) = cli.queue {
        redis.queue = queue;
    }

    match cli.command {
        Commands::Submit { file, job_id } => {
            commands::submit(&redis, &file, job_id.as_deref()).await?;
        }
        Commands::Result { job_id } => {
            commands::show_result(&redis, &job_id).await?;
        }
        Commands::Submission { job_id } => {
            commands::show_submission(&redis, &job_id).await?;
        }
    }

    Ok(())
}
