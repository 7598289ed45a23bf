// In-memory stand-ins for the launcher, queue, cache and store

use async_trait::async_trait;
use judge_common::types::{CachedResult, SubmissionUpdate};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{JobQueue, QueueError};
use crate::launcher::{LaunchError, LaunchOutput, LaunchRequest, Launcher};
use crate::publisher::{PublishError, ResultCache, SubmissionStore};

type LaunchFn = dyn Fn(&LaunchRequest) -> Result<LaunchOutput, LaunchError> + Send + Sync;

/// Launcher that answers from a closure and records every request.
pub struct FakeLauncher {
    respond: Box<LaunchFn>,
    requests: Mutex<Vec<LaunchRequest>>,
}

impl FakeLauncher {
    pub fn new(
        respond: impl Fn(&LaunchRequest) -> Result<LaunchOutput, LaunchError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<LaunchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchOutput, LaunchError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.respond)(request)
    }
}

/// Exit-0 output carrying `stdout`.
pub fn stdout_of(stdout: &str) -> LaunchOutput {
    LaunchOutput {
        stdout: stdout.to_string(),
        exit_code: Some(0),
        ..Default::default()
    }
}

/// Staged source of the request, read back from the workspace.
pub fn staged_source(request: &LaunchRequest, file: &str) -> String {
    std::fs::read_to_string(request.mount.host_path.join(file)).unwrap_or_default()
}

/// Queue serving scripted pops. Once drained it cancels `shutdown` and
/// blocks forever, like an idle BRPOP.
pub struct FakeQueue {
    items: Mutex<VecDeque<Result<Option<String>, QueueError>>>,
    shutdown: CancellationToken,
}

impl FakeQueue {
    pub fn new(
        items: Vec<Result<Option<String>, QueueError>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            items: Mutex::new(items.into()),
            shutdown,
        }
    }
}

#[async_trait]
impl JobQueue for FakeQueue {
    async fn pop(&self) -> Result<Option<String>, QueueError> {
        let next = self.items.lock().unwrap().pop_front();
        match next {
            Some(item) => item,
            None => {
                self.shutdown.cancel();
                std::future::pending().await
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryCache {
    pub entries: Mutex<HashMap<String, CachedResult>>,
    pub fail: bool,
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn put(&self, job_id: &str, result: &CachedResult) -> Result<(), PublishError> {
        if self.fail {
            return Err(PublishError::Cache("connection refused".to_string()));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(job_id.to_string(), result.clone());
        Ok(())
    }
}

/// Store that only updates records created up front.
#[derive(Default)]
pub struct MemoryStore {
    pub records: Mutex<HashMap<String, Option<SubmissionUpdate>>>,
}

impl MemoryStore {
    pub fn with_records(ids: &[&str]) -> Self {
        let records = ids.iter().map(|id| (id.to_string(), None)).collect();
        Self {
            records: Mutex::new(records),
        }
    }

    pub fn get(&self, id: &str) -> Option<SubmissionUpdate> {
        self.records.lock().unwrap().get(id).cloned().flatten()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn update(&self, job_id: &str, update: &SubmissionUpdate) -> Result<(), PublishError> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(job_id) {
            Some(record) => {
                *record = Some(update.clone());
                Ok(())
            }
            None => Err(PublishError::NotFound(job_id.to_string())),
        }
    }
}
