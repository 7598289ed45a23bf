/// Result Publisher
///
/// Writes a finished verdict twice: a short-lived polling copy in the cache
/// and an in-place update of the durable submission record. Neither failure
/// is fatal; both are logged and the job counts as finished.

use async_trait::async_trait;
use judge_common::redis::{self as keys, RESULT_TTL_SECS};
use judge_common::types::{CachedResult, SubmissionUpdate, Verdict};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("cache write failed: {0}")]
    Cache(String),
    #[error("submission record {0} does not exist")]
    NotFound(String),
    #[error("submission update failed: {0}")]
    Store(String),
}

#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn put(&self, job_id: &str, result: &CachedResult) -> Result<(), PublishError>;
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Update an existing record; never creates one.
    async fn update(&self, job_id: &str, update: &SubmissionUpdate) -> Result<(), PublishError>;
}

pub struct RedisResultCache {
    conn: redis::aio::ConnectionManager,
    ttl_secs: u64,
}

impl RedisResultCache {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self {
            conn,
            ttl_secs: RESULT_TTL_SECS,
        }
    }
}

#[async_trait]
impl ResultCache for RedisResultCache {
    async fn put(&self, job_id: &str, result: &CachedResult) -> Result<(), PublishError> {
        let mut conn = self.conn.clone();
        keys::store_cached_result(&mut conn, job_id, result, self.ttl_secs)
            .await
            .map_err(|e| PublishError::Cache(e.to_string()))
    }
}

pub struct RedisSubmissionStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisSubmissionStore {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SubmissionStore for RedisSubmissionStore {
    async fn update(&self, job_id: &str, update: &SubmissionUpdate) -> Result<(), PublishError> {
        let mut conn = self.conn.clone();
        let updated = keys::update_submission(&mut conn, job_id, update)
            .await
            .map_err(|e| PublishError::Store(e.to_string()))?;

        if updated {
            Ok(())
        } else {
            Err(PublishError::NotFound(job_id.to_string()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub cached: bool,
    pub stored: bool,
}

#[derive(Clone)]
pub struct ResultPublisher {
    cache: Arc<dyn ResultCache>,
    store: Arc<dyn SubmissionStore>,
}

impl ResultPublisher {
    pub fn new(cache: Arc<dyn ResultCache>, store: Arc<dyn SubmissionStore>) -> Self {
        Self { cache, store }
    }

    pub async fn publish(&self, verdict: &Verdict) -> PublishReport {
        let job_id = verdict.job_id.as_str();

        let cached = match self.cache.put(job_id, &CachedResult::from(verdict)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to cache result");
                false
            }
        };

        let stored = match self.store.update(job_id, &SubmissionUpdate::from(verdict)).await {
            Ok(()) => true,
            Err(e) => {
                // Cache copy stays authoritative for polling
                error!(job_id = %job_id, error = %e, "Failed to update submission");
                false
            }
        };

        info!(job_id = %job_id, status = %verdict.status, cached, stored, "Result published");
        PublishReport { cached, stored }
    }
}
