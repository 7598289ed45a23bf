mod config;
mod dispatcher;
mod evaluator;
mod executor;
mod launcher;
mod publisher;
mod sandbox;
mod verdict;
mod workspace;

#[cfg(test)]
mod pipeline_tests;
#[cfg(test)]
mod test_support;

use anyhow::Context;
use config::{LanguageConfigManager, LogFormat, WorkerConfig};
use dispatcher::{Dispatcher, RedisJobQueue};
use evaluator::Evaluator;
use executor::JobExecutor;
use launcher::DockerLauncher;
use publisher::{RedisResultCache, RedisSubmissionStore, ResultPublisher};
use sandbox::SandboxRunner;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use workspace::WorkspaceManager;

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;
    init_tracing(config.log_format);

    info!("Judge worker booting...");

    let languages = LanguageConfigManager::load_or_builtin(&config.languages_config)?;
    info!("Loaded language configurations for: {:?}", languages.list_languages());

    let workspaces = WorkspaceManager::new(&config.workspace_root)
        .context("Failed to prepare workspace root")?;
    info!(root = %workspaces.root().display(), "Workspace root ready");

    let launcher = Arc::new(DockerLauncher::connect()?);
    let runner = SandboxRunner::new(launcher, Arc::new(languages));
    let evaluator = Evaluator::new(runner, config.limits.clone());
    let executor = Arc::new(JobExecutor::new(workspaces, evaluator, config.empty_test_policy));

    info!(
        memory_mb = config.limits.memory_mb,
        cpus = config.limits.cpus,
        run_timeout_secs = config.limits.run_timeout.as_secs(),
        wall_clock_ms = config.limits.wall_clock.as_millis() as u64,
        "Sandbox limits"
    );

    let client = redis::Client::open(config.redis.url.as_str())
        .with_context(|| format!("Invalid Redis URL: {}", config.redis.url))?;
    let shared_conn = redis::aio::ConnectionManager::new(client.clone())
        .await
        .context("Failed to connect to Redis")?;
    info!("Connected to Redis: {}", config.redis.url);

    let publisher = Arc::new(ResultPublisher::new(
        Arc::new(RedisResultCache::new(shared_conn.clone())),
        Arc::new(RedisSubmissionStore::new(shared_conn)),
    ));

    let shutdown = CancellationToken::new();
    let mut dispatchers = JoinSet::new();

    for worker_id in 0..config.concurrency {
        let queue_conn = redis::aio::ConnectionManager::new(client.clone())
            .await
            .context("Failed to open queue connection")?;
        let dispatcher = Dispatcher::new(
            worker_id,
            Box::new(RedisJobQueue::new(queue_conn, config.redis.queue.clone())),
            executor.clone(),
            publisher.clone(),
            config.retry_backoff,
        );
        dispatchers.spawn(dispatcher.run(shutdown.child_token()));
    }

    info!(
        queue = %config.redis.queue,
        concurrency = config.concurrency,
        "Listening for jobs"
    );

    tokio::select! {
        _ = shutdown_signal() => {
            warn!("Received shutdown signal, finishing in-flight jobs...");
        }
        Some(joined) = dispatchers.join_next() => {
            error!(result = ?joined, "Dispatcher exited unexpectedly, shutting down");
        }
    }
    shutdown.cancel();

    while let Some(joined) = dispatchers.join_next().await {
        match joined {
            Ok(stats) => info!(
                processed = stats.processed,
                malformed = stats.malformed,
                transport_errors = stats.transport_errors,
                "Dispatcher drained"
            ),
            Err(e) => error!(error = %e, "Dispatcher task failed"),
        }
    }

    info!("Worker shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
