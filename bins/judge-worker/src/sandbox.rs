/// Sandbox Runner
///
/// Stages a program (and optional stdin) into the job workspace, builds the
/// language's compile/run script, hands it to the launcher and classifies
/// what came back. Staged files are removed before returning on every path.

use judge_common::types::{ErrorKind, Language, UnknownLanguage};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ExecutionLimits, LanguageConfig, LanguageConfigManager};
use crate::launcher::{LaunchError, LaunchOutput, LaunchRequest, Launcher, Mount};
use crate::workspace::WorkspaceHandle;

/// Safety limits to keep pathological payloads off the sandbox
const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024;
const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024;

pub const CONTAINER_WORKDIR: &str = "/workspace";
pub const INPUT_FILE: &str = "input.txt";

/// Exit status of coreutils `timeout` when it had to stop the program
const TIMEOUT_EXIT_CODE: i64 = 124;
/// Line `timeout --verbose` writes to stderr before signalling the program
const TIMEOUT_MARKER: &str = "timeout: sending signal";
const OUTPUT_LIMIT_MESSAGE: &str = "Output limit exceeded";

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(transparent)]
    UnsupportedLanguage(#[from] UnknownLanguage),
    #[error("no command configured for language {0}")]
    NotConfigured(Language),
    #[error("{what} exceeds maximum size of {limit} bytes")]
    TooLarge { what: &'static str, limit: usize },
    #[error("failed to stage {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

impl SandboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::UnsupportedLanguage(_) => ErrorKind::UnsupportedLanguage,
            _ => ErrorKind::InfrastructureError,
        }
    }
}

/// What one sandboxed run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Set when the program (or its build) exited unsuccessfully.
    pub exit_error: Option<String>,
}

/// Files written for one run; removed when dropped.
struct StagedFiles {
    paths: Vec<PathBuf>,
}

impl StagedFiles {
    fn new() -> Self {
        Self { paths: Vec::new() }
    }

    async fn write(&mut self, path: PathBuf, contents: &str) -> Result<(), SandboxError> {
        // Track before writing so a partial write is still cleaned up
        self.paths.push(path.clone());
        tokio::fs::write(&path, contents)
            .await
            .map_err(|source| SandboxError::Stage { path, source })
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staged file"),
            }
        }
    }
}

#[derive(Clone)]
pub struct SandboxRunner {
    launcher: Arc<dyn Launcher>,
    languages: Arc<LanguageConfigManager>,
}

impl SandboxRunner {
    pub fn new(launcher: Arc<dyn Launcher>, languages: Arc<LanguageConfigManager>) -> Self {
        Self { launcher, languages }
    }

    pub async fn run(
        &self,
        workspace: &WorkspaceHandle,
        language: &str,
        source_lines: &[String],
        input: Option<&str>,
        limits: &ExecutionLimits,
    ) -> Result<RunOutput, SandboxError> {
        let language: Language = language.parse()?;
        let config = self
            .languages
            .get_config(&language)
            .map_err(|_| SandboxError::NotConfigured(language))?;

        let source = source_lines.join("\n");
        if source.len() > MAX_SOURCE_CODE_BYTES {
            return Err(SandboxError::TooLarge {
                what: "source code",
                limit: MAX_SOURCE_CODE_BYTES,
            });
        }
        let input = input.filter(|s| !s.is_empty());
        if input.map_or(0, str::len) > MAX_TEST_INPUT_BYTES {
            return Err(SandboxError::TooLarge {
                what: "test input",
                limit: MAX_TEST_INPUT_BYTES,
            });
        }

        let mut staged = StagedFiles::new();
        staged
            .write(workspace.path().join(&config.source_file), &source)
            .await?;
        if let Some(input) = input {
            staged.write(workspace.path().join(INPUT_FILE), input).await?;
        }

        let request = LaunchRequest {
            image: config.image.clone(),
            command: vec![
                "bash".to_string(),
                "-c".to_string(),
                build_script(config, input.is_some(), limits),
            ],
            mount: Mount {
                host_path: workspace.path().to_path_buf(),
                container_path: CONTAINER_WORKDIR.to_string(),
            },
            limits: limits.clone(),
        };

        debug!(
            job_id = %workspace.job_id(),
            language = %language,
            image = %request.image,
            has_input = input.is_some(),
            "Launching sandbox"
        );

        let output = self.launcher.launch(&request).await?;
        Ok(classify(output))
    }
}

/// `cd <workdir> && [<compile> && ]timeout --verbose <n>s <run> < <stdin>`
pub fn build_script(config: &LanguageConfig, has_input: bool, limits: &ExecutionLimits) -> String {
    let stdin = if has_input { INPUT_FILE } else { "/dev/null" };
    let run_secs = limits.run_timeout.as_secs().max(1);

    let mut script = format!("cd {}", CONTAINER_WORKDIR);
    if let Some(compile) = &config.compile {
        script.push_str(" && ");
        script.push_str(compile);
    }
    script.push_str(&format!(" && timeout --verbose {}s {} < {}", run_secs, config.run, stdin));
    script
}

/// A program can exit 124 on its own; only `timeout`'s own notice counts.
fn stopped_by_timeout(exit_code: Option<i64>, stderr: &str) -> bool {
    exit_code == Some(TIMEOUT_EXIT_CODE) && stderr.contains(TIMEOUT_MARKER)
}

pub fn classify(output: LaunchOutput) -> RunOutput {
    let LaunchOutput {
        stdout,
        mut stderr,
        exit_code,
        killed_by_timeout,
        output_truncated,
        ..
    } = output;

    if killed_by_timeout || stopped_by_timeout(exit_code, &stderr) {
        return RunOutput {
            stdout,
            stderr,
            timed_out: true,
            exit_error: None,
        };
    }

    // The launcher killed it; the exit code says nothing about the program
    if output_truncated {
        return RunOutput {
            stdout,
            stderr,
            timed_out: false,
            exit_error: Some(OUTPUT_LIMIT_MESSAGE.to_string()),
        };
    }

    let exit_error = match exit_code {
        Some(0) => None,
        Some(code) => {
            if code == 137 {
                stderr.push_str("\n[Process killed: likely exceeded memory limit]");
            } else if code == 139 {
                stderr.push_str("\n[Process killed: segmentation fault]");
            }
            Some(format!("Process exited with code {}", code))
        }
        None => Some("Process exit status unavailable".to_string()),
    };

    RunOutput {
        stdout,
        stderr,
        timed_out: false,
        exit_error,
    }
}
