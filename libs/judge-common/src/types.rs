use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Languages the worker knows how to build and run.
///
/// The wire carries the short tag (`py`, `cpp`, `java`); parsing happens at
/// execution time so an unknown tag still yields a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "py")]
    Python,
    #[serde(rename = "cpp")]
    Cpp,
    #[serde(rename = "java")]
    Java,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Python, Language::Cpp, Language::Java];

    pub fn tag(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::Cpp => "cpp",
            Language::Java => "java",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLanguage(pub String);

impl fmt::Display for UnknownLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unsupported language: {}", self.0)
    }
}

impl std::error::Error for UnknownLanguage {}

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|lang| lang.tag() == s)
            .ok_or_else(|| UnknownLanguage(s.to_string()))
    }
}

/// A submission pulled off the queue. Immutable once dequeued.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub job_id: String,
    /// Raw language tag as submitted.
    pub language: String,
    /// Source code, one entry per line.
    pub code: Vec<String>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

impl JobRequest {
    pub fn source(&self) -> String {
        self.code.join("\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    #[serde(default)]
    pub input: Option<String>,
    pub expected_output: String,
}

impl TestCase {
    /// Input to feed on stdin, `None` when absent or empty.
    pub fn stdin(&self) -> Option<&str> {
        self.input.as_deref().filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    UnsupportedLanguage,
    ExecutionTimeout,
    RuntimeOrCompileError,
    InfrastructureError,
}

/// Result of running one test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub passed: bool,
    /// Trimmed stdout of the program.
    pub output: String,
    pub expected: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionOutcome {
    /// Failed outcome that never produced program output.
    pub fn failure(kind: ErrorKind, expected: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            passed: false,
            output: String::new(),
            expected: expected.trim().to_string(),
            stderr: message.clone(),
            error_kind: Some(kind),
            error: Some(message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Accepted,
    Rejected,
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictStatus::Accepted => f.write_str("accepted"),
            VerdictStatus::Rejected => f.write_str("rejected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub job_id: String,
    pub status: VerdictStatus,
    pub outcomes: Vec<ExecutionOutcome>,
    pub finished_at: DateTime<Utc>,
}

/// Body stored under `result:<jobId>` for short-term polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    pub status: VerdictStatus,
    pub results: Vec<ExecutionOutcome>,
}

impl From<&Verdict> for CachedResult {
    fn from(verdict: &Verdict) -> Self {
        Self {
            status: verdict.status,
            results: verdict.outcomes.clone(),
        }
    }
}

/// Fields the worker rewrites on an existing submission record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionUpdate {
    pub status: VerdictStatus,
    pub submission_time: DateTime<Utc>,
    pub results: Vec<ExecutionOutcome>,
}

impl From<&Verdict> for SubmissionUpdate {
    fn from(verdict: &Verdict) -> Self {
        Self {
            status: verdict.status,
            submission_time: verdict.finished_at,
            results: verdict.outcomes.clone(),
        }
    }
}
