/// Test Case Evaluator
///
/// **Core Responsibility:**
/// Run every test case of a job, in order, and turn each run into an
/// `ExecutionOutcome`.
///
/// **Comparison Rules (all languages):**
/// - Trim leading whitespace: YES
/// - Trim trailing whitespace: YES
/// - Internal whitespace: compared exactly
/// - Case sensitivity: YES
/// - Floating-point tolerance: NO
///
/// A failing test case never stops the batch; errors become outcome data.

use judge_common::types::{ErrorKind, ExecutionOutcome, JobRequest, Language, TestCase};
use tracing::{debug, warn};

use crate::config::ExecutionLimits;
use crate::sandbox::{RunOutput, SandboxError, SandboxRunner};
use crate::workspace::WorkspaceHandle;

const TIMEOUT_MESSAGE: &str = "Execution timed out";

/// Normalize output string for comparison
fn normalize_output(output: &str) -> &str {
    output.trim()
}

/// Judge one test case from the result of its sandboxed run.
///
/// Priority: infrastructure/language errors, then timeout, then non-zero
/// exit, then output comparison.
pub fn judge_test_case(
    test_case: &TestCase,
    result: Result<RunOutput, SandboxError>,
) -> ExecutionOutcome {
    let expected = normalize_output(&test_case.expected_output);

    let run = match result {
        Ok(run) => run,
        Err(e) => return ExecutionOutcome::failure(e.kind(), expected, e.to_string()),
    };

    if run.timed_out {
        return ExecutionOutcome::failure(ErrorKind::ExecutionTimeout, expected, TIMEOUT_MESSAGE);
    }

    let actual = normalize_output(&run.stdout);
    let stderr = run.stderr.trim().to_string();

    match run.exit_error {
        Some(message) => ExecutionOutcome {
            passed: false,
            output: actual.to_string(),
            expected: expected.to_string(),
            stderr,
            error_kind: Some(ErrorKind::RuntimeOrCompileError),
            error: Some(message),
        },
        None => ExecutionOutcome {
            passed: actual == expected,
            output: actual.to_string(),
            expected: expected.to_string(),
            stderr,
            error_kind: None,
            error: None,
        },
    }
}

/// One failed outcome per test case, or a single one for a job without any.
pub fn failure_outcomes(job: &JobRequest, kind: ErrorKind, message: &str) -> Vec<ExecutionOutcome> {
    if job.test_cases.is_empty() {
        return vec![ExecutionOutcome::failure(kind, "", message)];
    }

    job.test_cases
        .iter()
        .map(|tc| ExecutionOutcome::failure(kind, &tc.expected_output, message))
        .collect()
}

pub struct Evaluator {
    runner: SandboxRunner,
    limits: ExecutionLimits,
}

impl Evaluator {
    pub fn new(runner: SandboxRunner, limits: ExecutionLimits) -> Self {
        Self { runner, limits }
    }

    /// Evaluate every test case of `job` inside `workspace`, preserving order.
    pub async fn evaluate(
        &self,
        job: &JobRequest,
        workspace: &WorkspaceHandle,
    ) -> Vec<ExecutionOutcome> {
        if let Err(e) = job.language.parse::<Language>() {
            warn!(job_id = %job.job_id, language = %job.language, "Unsupported language");
            return failure_outcomes(job, ErrorKind::UnsupportedLanguage, &e.to_string());
        }

        let mut outcomes = Vec::with_capacity(job.test_cases.len());

        for (idx, test_case) in job.test_cases.iter().enumerate() {
            let result = self
                .runner
                .run(workspace, &job.language, &job.code, test_case.stdin(), &self.limits)
                .await;

            if let Err(e) = &result {
                warn!(
                    job_id = %job.job_id,
                    test_num = idx + 1,
                    error = %e,
                    "Sandbox run failed"
                );
            }

            let outcome = judge_test_case(test_case, result);
            debug!(
                job_id = %job.job_id,
                test_num = idx + 1,
                passed = outcome.passed,
                error_kind = ?outcome.error_kind,
                "Test case evaluated"
            );
            outcomes.push(outcome);
        }

        outcomes
    }
}
