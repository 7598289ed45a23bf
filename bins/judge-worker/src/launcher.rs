/// Isolated process launcher
///
/// **Core Responsibility:**
/// Run one command inside an isolated process with a single bind-mounted
/// directory, no network, capped memory and CPU, and a hard wall clock.
///
/// The launcher knows nothing about languages, test cases or scoring. It
/// reports raw output, the exit code, and whether it had to kill the process
/// at the wall-clock boundary. Production uses Docker through bollard; tests
/// plug in a scripted launcher.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ExecutionLimits;

/// Cap on captured bytes per output stream
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Host directory exposed to the isolated process.
#[derive(Debug, Clone, PartialEq)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: String,
}

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub image: String,
    pub command: Vec<String>,
    pub mount: Mount,
    pub limits: ExecutionLimits,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    /// The launcher killed the process at the wall-clock boundary.
    pub killed_by_timeout: bool,
    /// A stream hit `MAX_OUTPUT_BYTES`; the process was killed.
    pub output_truncated: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("image {image} is unavailable: {source}")]
    Image {
        image: String,
        #[source]
        source: bollard::errors::Error,
    },
    #[error("failed to {stage} container: {source}")]
    Container {
        stage: &'static str,
        #[source]
        source: bollard::errors::Error,
    },
    #[error("launcher unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchOutput, LaunchError>;
}

/// Bounded capture of one output stream. Raw bytes are kept and decoded
/// once, so a character split across log chunks survives.
struct OutputBuffer {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append a chunk, keeping at most `limit` bytes. Returns false once the
    /// limit has been exceeded.
    fn push(&mut self, chunk: &[u8]) -> bool {
        let room = self.limit.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.bytes.extend_from_slice(&chunk[..room]);
            self.truncated = true;
            return false;
        }
        self.bytes.extend_from_slice(chunk);
        true
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Container cleanup guard - guarantees container removal on drop,
/// including when the launch future is cancelled mid-flight
struct ContainerGuard {
    docker: Docker,
    container_id: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        // Drop cannot be async; hand removal to the runtime
        let container_id = std::mem::take(&mut self.container_id);
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(e) = docker.remove_container(&container_id, Some(options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to remove container");
            }
        });
    }
}

/// Docker-backed launcher
///
/// **Container Rules:**
/// 1. Pulls the image on a cache miss
/// 2. Network disabled (`network_mode=none`)
/// 3. Memory capped with swap equal to memory, CPU capped via nano_cpus,
///    process count capped
/// 4. Exactly one bind mount: the job workspace
/// 5. Killed at the wall-clock limit, always force-removed afterwards
pub struct DockerLauncher {
    docker: Docker,
}

impl DockerLauncher {
    pub fn connect() -> anyhow::Result<Self> {
        use anyhow::Context;

        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;
        Ok(Self { docker })
    }

    /// Make sure an image is present locally, pulling it on a miss
    async fn ensure_image(&self, image: &str) -> Result<(), LaunchError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|source| LaunchError::Image {
                image: image.to_string(),
                source,
            })?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    fn container_config(request: &LaunchRequest) -> Config<String> {
        let memory_bytes = i64::try_from(request.limits.memory_mb.saturating_mul(1024 * 1024))
            .unwrap_or(i64::MAX);
        let nano_cpus = (request.limits.cpus * 1_000_000_000.0) as i64;
        let bind = format!(
            "{}:{}:rw",
            request.mount.host_path.display(),
            request.mount.container_path
        );

        Config {
            image: Some(request.image.clone()),
            cmd: Some(request.command.clone()),
            working_dir: Some(request.mount.container_path.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(memory_bytes),
                memory_swap: Some(memory_bytes),
                nano_cpus: Some(nano_cpus),
                pids_limit: Some(request.limits.pids_limit),
                network_mode: Some("none".to_string()),
                binds: Some(vec![bind]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Stream logs until the container stops (or a stream overflows, in which
    /// case it is killed), then read its exit code
    async fn collect(&self, container_id: &str) -> LaunchOutput {
        let mut stdout = OutputBuffer::new(MAX_OUTPUT_BYTES);
        let mut stderr = OutputBuffer::new(MAX_OUTPUT_BYTES);

        let logs_options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        });
        let mut logs = self.docker.logs(container_id, logs_options);

        while let Some(chunk) = logs.next().await {
            let within_limit = match chunk {
                Ok(LogOutput::StdOut { message }) => stdout.push(&message),
                Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                Ok(_) => true,
                Err(e) => {
                    warn!(container_id = %container_id, error = %e, "Error reading container logs");
                    break;
                }
            };

            if !within_limit {
                warn!(
                    container_id = %container_id,
                    limit_bytes = MAX_OUTPUT_BYTES,
                    "Output limit exceeded, killing container"
                );
                if let Err(e) = self
                    .docker
                    .kill_container(container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container_id = %container_id, error = %e, "Failed to kill container");
                }
                break;
            }
        }

        let wait_options = Some(WaitContainerOptions {
            condition: "not-running",
        });
        let mut wait = self.docker.wait_container(container_id, wait_options);

        // bollard reports a non-zero exit as an error carrying the code
        let exit_code = match wait.next().await {
            Some(Ok(response)) => Some(response.status_code),
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
            Some(Err(e)) => {
                warn!(container_id = %container_id, error = %e, "Failed to read exit code");
                None
            }
            None => None,
        };

        let output_truncated = stdout.truncated || stderr.truncated;
        LaunchOutput {
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            exit_code,
            killed_by_timeout: false,
            output_truncated,
            duration_ms: 0,
        }
    }
}

#[async_trait]
impl Launcher for DockerLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchOutput, LaunchError> {
        self.ensure_image(&request.image).await?;

        let container_name = format!("judge-{}", uuid::Uuid::new_v4());
        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), Self::container_config(request))
            .await
            .map_err(|source| LaunchError::Container {
                stage: "create",
                source,
            })?;

        // Set up cleanup immediately after creation
        let _guard = ContainerGuard {
            docker: self.docker.clone(),
            container_id: container.id.clone(),
        };

        let start = Instant::now();
        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|source| LaunchError::Container {
                stage: "start",
                source,
            })?;

        let outcome =
            tokio::time::timeout(request.limits.wall_clock, self.collect(&container.id)).await;

        let output = match outcome {
            Ok(collected) => LaunchOutput {
                duration_ms: start.elapsed().as_millis() as u64,
                ..collected
            },
            Err(_) => {
                warn!(
                    container_id = %container.id,
                    wall_clock_ms = request.limits.wall_clock.as_millis() as u64,
                    "Wall clock exceeded, killing container"
                );
                if let Err(e) = self
                    .docker
                    .kill_container(&container.id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container_id = %container.id, error = %e, "Failed to kill container");
                }
                LaunchOutput {
                    killed_by_timeout: true,
                    duration_ms: start.elapsed().as_millis() as u64,
                    ..Default::default()
                }
            }
        };

        debug!(
            container_id = %container.id,
            exit_code = ?output.exit_code,
            killed_by_timeout = output.killed_by_timeout,
            output_truncated = output.output_truncated,
            duration_ms = output.duration_ms,
            "Container finished"
        );

        Ok(output)
    }
}
