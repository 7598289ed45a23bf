/// Per-job workspaces
///
/// Every job gets its own directory under the worker's root, named from the
/// job id. The name encoding is injective, so distinct ids never share a path,
/// and a live set refuses a second acquire for an id that is still running.
/// This is the only thing standing between concurrent jobs on one filesystem.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("workspace for job {0} is already in use")]
    Busy(String),
    #[error("workspace I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl WorkspaceError {
    fn io(path: &Path, source: io::Error) -> Self {
        WorkspaceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Exclusive handle on one job's directory.
#[derive(Debug)]
pub struct WorkspaceHandle {
    job_id: String,
    path: PathBuf,
}

impl WorkspaceHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    live: Arc<Mutex<HashSet<String>>>,
}

impl WorkspaceManager {
    /// Create the root (if needed) and resolve it to an absolute path.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| WorkspaceError::io(root, e))?;
        let root = root.canonicalize().map_err(|e| WorkspaceError::io(root, e))?;

        Ok(Self {
            root,
            live: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a job's workspace lives at. Pure function of the id.
    pub fn path_for(&self, job_id: &str) -> PathBuf {
        self.root.join(dir_name(job_id))
    }

    pub async fn acquire(&self, job_id: &str) -> Result<WorkspaceHandle, WorkspaceError> {
        if !self.mark_live(job_id) {
            return Err(WorkspaceError::Busy(job_id.to_string()));
        }

        let path = self.path_for(job_id);
        match self.prepare(&path).await {
            Ok(()) => {
                debug!(job_id = %job_id, path = %path.display(), "Workspace acquired");
                Ok(WorkspaceHandle {
                    job_id: job_id.to_string(),
                    path,
                })
            }
            Err(e) => {
                self.unmark_live(job_id);
                Err(e)
            }
        }
    }

    /// Remove the workspace and everything in it. Calling it again is a no-op.
    pub async fn release(&self, handle: &WorkspaceHandle) -> Result<(), WorkspaceError> {
        let result = match tokio::fs::remove_dir_all(&handle.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkspaceError::io(&handle.path, e)),
        };

        self.unmark_live(&handle.job_id);
        debug!(job_id = %handle.job_id, "Workspace released");
        result
    }

    async fn prepare(&self, path: &Path) -> Result<(), WorkspaceError> {
        // Not live, so anything here is left over from a crashed run
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            warn!(path = %path.display(), "Reclaiming stale workspace");
            tokio::fs::remove_dir_all(path)
                .await
                .map_err(|e| WorkspaceError::io(path, e))?;
        }

        tokio::fs::create_dir(path)
            .await
            .map_err(|e| WorkspaceError::io(path, e))
    }

    fn mark_live(&self, job_id: &str) -> bool {
        let mut live = self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        live.insert(job_id.to_string())
    }

    fn unmark_live(&self, job_id: &str) {
        let mut live = self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        live.remove(job_id);
    }
}

/// `job-` followed by the id with every byte outside `[A-Za-z0-9-]` written
/// as `_XX`. Injective, and never contains a path separator or `..`.
fn dir_name(job_id: &str) -> String {
    let mut name = String::with_capacity(job_id.len() + 4);
    name.push_str("job-");
    for byte in job_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            name.push(byte as char);
        } else {
            name.push_str(&format!("_{:02x}", byte));
        }
    }
    name
}
