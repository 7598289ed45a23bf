/// Job Dispatcher (queue consumer)
///
/// `Idle → Fetching → Processing → Publishing → Idle`, forever. The only
/// place the loop waits indefinitely is the queue pop, and that is also the
/// only place shutdown is honored: a job that has been popped is always run
/// to completion and published.

use async_trait::async_trait;
use judge_common::types::{JobRequest, Verdict};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::executor::JobExecutor;
use crate::publisher::ResultPublisher;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue transport failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Block until a payload arrives. `Ok(None)` means nothing was delivered.
    async fn pop(&self) -> Result<Option<String>, QueueError>;
}

/// Redis list consumer. Owns its connection: a blocking pop would stall
/// every other command multiplexed onto a shared one.
pub struct RedisJobQueue {
    conn: redis::aio::ConnectionManager,
    queue: String,
}

impl RedisJobQueue {
    pub fn new(conn: redis::aio::ConnectionManager, queue: impl Into<String>) -> Self {
        Self {
            conn,
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn pop(&self) -> Result<Option<String>, QueueError> {
        let mut conn = self.conn.clone();
        judge_common::redis::pop_payload(&mut conn, &self.queue)
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Fetching,
    Processing,
    Publishing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub processed: u64,
    pub malformed: u64,
    pub transport_errors: u64,
}

pub struct Dispatcher {
    worker_id: usize,
    queue: Box<dyn JobQueue>,
    executor: Arc<JobExecutor>,
    publisher: Arc<ResultPublisher>,
    retry_backoff: Duration,
    state: DispatcherState,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(
        worker_id: usize,
        queue: Box<dyn JobQueue>,
        executor: Arc<JobExecutor>,
        publisher: Arc<ResultPublisher>,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            worker_id,
            queue,
            executor,
            publisher,
            retry_backoff,
            state: DispatcherState::Idle,
            stats: DispatchStats::default(),
        }
    }

    fn transition(&mut self, next: DispatcherState) {
        if self.state != next {
            debug!(worker_id = self.worker_id, from = ?self.state, to = ?next, "Dispatcher state");
            self.state = next;
        }
    }

    /// Consume jobs until `shutdown` is cancelled.
    #[instrument(skip_all, fields(worker_id = self.worker_id))]
    pub async fn run(mut self, shutdown: CancellationToken) -> DispatchStats {
        info!("Dispatcher started, waiting for jobs");

        loop {
            self.transition(DispatcherState::Idle);
            if shutdown.is_cancelled() {
                break;
            }

            self.transition(DispatcherState::Fetching);
            let popped = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                popped = self.queue.pop() => popped,
            };

            match popped {
                Ok(Some(payload)) => {
                    self.handle_payload(&payload).await;
                }
                Ok(None) => continue,
                Err(e) => {
                    self.stats.transport_errors += 1;
                    error!(
                        error = %e,
                        backoff_ms = self.retry_backoff.as_millis() as u64,
                        "Queue error, retrying"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
            }
        }

        self.transition(DispatcherState::Idle);
        info!(
            processed = self.stats.processed,
            malformed = self.stats.malformed,
            transport_errors = self.stats.transport_errors,
            "Dispatcher stopped"
        );
        self.stats
    }

    /// Parse, execute and publish one payload. Malformed payloads are logged
    /// and dropped.
    pub async fn handle_payload(&mut self, payload: &str) -> Option<Verdict> {
        let job: JobRequest = match serde_json::from_str(payload) {
            Ok(job) => job,
            Err(e) => {
                self.stats.malformed += 1;
                warn!(
                    error = %e,
                    payload_preview = %preview(payload),
                    "Skipping malformed job payload"
                );
                return None;
            }
        };

        info!(
            job_id = %job.job_id,
            language = %job.language,
            test_cases = job.test_cases.len(),
            source_lines = job.code.len(),
            "Received job"
        );

        self.transition(DispatcherState::Processing);
        let verdict = self.executor.execute(&job).await;

        self.transition(DispatcherState::Publishing);
        let report = self.publisher.publish(&verdict).await;
        if !report.cached && !report.stored {
            error!(job_id = %job.job_id, "Verdict could not be published anywhere");
        }

        self.stats.processed += 1;
        self.transition(DispatcherState::Idle);
        Some(verdict)
    }
}

fn preview(payload: &str) -> String {
    const MAX_PREVIEW_CHARS: usize = 200;
    payload.chars().take(MAX_PREVIEW_CHARS).collect()
}
