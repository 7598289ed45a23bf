// Worker configuration: environment settings and the language command table
use anyhow::{bail, Context, Result};
use judge_common::config::RedisConfig;
use judge_common::types::Language;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::verdict::EmptyTestPolicy;

/// How one language is staged and run inside the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub image: String,
    /// File the source is written to, relative to the workspace.
    pub source_file: String,
    /// Build step, skipped for interpreted languages.
    #[serde(default)]
    pub compile: Option<String>,
    pub run: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// Language command table keyed by language
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<Language, LanguageConfig>,
}

impl LanguageConfigManager {
    /// Table used when no languages.json is present.
    pub fn builtin() -> Self {
        let entries = [
            LanguageConfig {
                name: "py".to_string(),
                image: "python:3.11".to_string(),
                source_file: "main.py".to_string(),
                compile: None,
                run: "python3 main.py".to_string(),
            },
            LanguageConfig {
                name: "cpp".to_string(),
                image: "gcc:latest".to_string(),
                source_file: "main.cpp".to_string(),
                compile: Some("g++ -O2 -o main main.cpp".to_string()),
                run: "./main".to_string(),
            },
            LanguageConfig {
                name: "java".to_string(),
                image: "openjdk:latest".to_string(),
                source_file: "Main.java".to_string(),
                compile: Some("javac Main.java".to_string()),
                run: "java Main".to_string(),
            },
        ];

        let configs = entries
            .into_iter()
            .filter_map(|config| {
                let language = config.name.parse::<Language>().ok()?;
                Some((language, config))
            })
            .collect();

        Self { configs }
    }

    /// Load language configurations from a languages.json file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        Self::from_json(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson = serde_json::from_str(content)?;

        let mut configs = HashMap::new();
        for config in languages_json.languages {
            let language = config
                .name
                .parse::<Language>()
                .with_context(|| format!("Unknown language entry '{}'", config.name))?;
            if !is_plain_file_name(&config.source_file) {
                bail!(
                    "Source file for '{}' must be a plain file name, got '{}'",
                    config.name,
                    config.source_file
                );
            }
            configs.insert(language, config);
        }

        Ok(Self { configs })
    }

    /// Load from `path` when it exists, otherwise use the built-in table.
    pub fn load_or_builtin(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            warn!(path = %path.display(), "Language config not found, using built-in table");
            Ok(Self::builtin())
        }
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: &Language) -> Result<&LanguageConfig> {
        self.configs
            .get(language)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for language: {}", language))
    }

    /// List all configured languages
    pub fn list_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().map(|l| l.to_string()).collect();
        names.sort();
        names
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

/// Largest accepted `SANDBOX_MEMORY_MB` (64 GiB).
pub const MAX_SANDBOX_MEMORY_MB: u64 = 64 * 1024;

/// Resource ceiling applied to every sandboxed run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionLimits {
    pub memory_mb: u64,
    pub cpus: f64,
    pub pids_limit: i64,
    /// Budget for the program itself, enforced inside the sandbox.
    pub run_timeout: Duration,
    /// Hard bound on the whole launch (compile + run), enforced by the launcher.
    pub wall_clock: Duration,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            memory_mb: 128,
            cpus: 0.5,
            pids_limit: 64,
            run_timeout: Duration::from_secs(5),
            wall_clock: Duration::from_millis(10_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => bail!("expected 'text' or 'json', got '{}'", other),
        }
    }
}

/// Everything the worker reads from the environment at startup.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis: RedisConfig,
    pub workspace_root: PathBuf,
    pub languages_config: PathBuf,
    pub limits: ExecutionLimits,
    pub concurrency: usize,
    pub retry_backoff: Duration,
    pub empty_test_policy: EmptyTestPolicy,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = ExecutionLimits::default();

        let limits = ExecutionLimits {
            memory_mb: parse_var(&lookup, "SANDBOX_MEMORY_MB", defaults.memory_mb)?,
            cpus: parse_var(&lookup, "SANDBOX_CPUS", defaults.cpus)?,
            pids_limit: parse_var(&lookup, "SANDBOX_PIDS_LIMIT", defaults.pids_limit)?,
            run_timeout: Duration::from_secs(parse_var(
                &lookup,
                "SANDBOX_RUN_TIMEOUT_SECS",
                defaults.run_timeout.as_secs(),
            )?),
            wall_clock: Duration::from_millis(parse_var(
                &lookup,
                "SANDBOX_WALL_CLOCK_MS",
                defaults.wall_clock.as_millis() as u64,
            )?),
        };

        if limits.memory_mb == 0 || limits.memory_mb > MAX_SANDBOX_MEMORY_MB {
            bail!(
                "SANDBOX_MEMORY_MB must be between 1 and {}, got {}",
                MAX_SANDBOX_MEMORY_MB,
                limits.memory_mb
            );
        }
        if !(limits.cpus > 0.0) {
            bail!("SANDBOX_CPUS must be greater than zero");
        }
        if limits.run_timeout.is_zero() || limits.wall_clock.is_zero() {
            bail!("Sandbox timeouts must be greater than zero");
        }

        let concurrency: usize = parse_var(&lookup, "WORKER_CONCURRENCY", 1)?;
        if concurrency == 0 {
            bail!("WORKER_CONCURRENCY must be at least 1");
        }

        Ok(Self {
            redis: RedisConfig::from_lookup(&lookup),
            workspace_root: lookup("WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("judge-workspaces")),
            languages_config: lookup("LANGUAGES_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config/languages.json")),
            limits,
            concurrency,
            retry_backoff: Duration::from_millis(parse_var(
                &lookup,
                "QUEUE_RETRY_BACKOFF_MS",
                1000,
            )?),
            empty_test_policy: parse_var(&lookup, "EMPTY_TEST_POLICY", EmptyTestPolicy::Accept)?,
            log_format: parse_var(&lookup, "LOG_FORMAT", LogFormat::Text)?,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", key, e)),
        None => Ok(default),
    }
}
