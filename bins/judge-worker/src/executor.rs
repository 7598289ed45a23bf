/// Job Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Take one job through workspace acquire → evaluate → aggregate → release
/// and hand back its verdict.
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (sandbox/launcher)
/// - How outputs are compared (evaluator)
/// - Where verdicts go (publisher)

use judge_common::types::{ErrorKind, JobRequest, Verdict};
use std::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::evaluator::{failure_outcomes, Evaluator};
use crate::verdict::{aggregate, EmptyTestPolicy};
use crate::workspace::WorkspaceManager;

pub struct JobExecutor {
    workspaces: WorkspaceManager,
    evaluator: Evaluator,
    empty_test_policy: EmptyTestPolicy,
}

impl JobExecutor {
    pub fn new(
        workspaces: WorkspaceManager,
        evaluator: Evaluator,
        empty_test_policy: EmptyTestPolicy,
    ) -> Self {
        Self {
            workspaces,
            evaluator,
            empty_test_policy,
        }
    }

    /// Run a job to completion. Never fails: every problem ends up in the
    /// verdict's outcomes.
    #[instrument(
        skip(self, job),
        fields(job_id = %job.job_id, language = %job.language, test_count = job.test_cases.len())
    )]
    pub async fn execute(&self, job: &JobRequest) -> Verdict {
        let start = Instant::now();
        info!("Starting job execution");

        let outcomes = match self.workspaces.acquire(&job.job_id).await {
            Ok(workspace) => {
                let outcomes = self.evaluator.evaluate(job, &workspace).await;
                if let Err(e) = self.workspaces.release(&workspace).await {
                    warn!(error = %e, "Failed to release workspace");
                }
                outcomes
            }
            Err(e) => {
                error!(error = %e, "Failed to acquire workspace");
                failure_outcomes(
                    job,
                    ErrorKind::InfrastructureError,
                    &format!("Workspace unavailable: {}", e),
                )
            }
        };

        if outcomes.is_empty() {
            warn!(policy = ?self.empty_test_policy, "Job has no test cases");
        }

        let verdict = aggregate(&job.job_id, outcomes, self.empty_test_policy);

        info!(
            status = %verdict.status,
            passed = verdict.outcomes.iter().filter(|o| o.passed).count(),
            total = verdict.outcomes.len(),
            execution_ms = start.elapsed().as_millis() as u64,
            "Job finished"
        );

        verdict
    }
}
