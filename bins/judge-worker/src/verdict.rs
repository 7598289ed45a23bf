/// Verdict Aggregator
///
/// All-or-nothing: a job is accepted only when every outcome passed. There is
/// no partial credit. What an empty outcome list means is a policy choice.

use chrono::Utc;
use judge_common::types::{ExecutionOutcome, Verdict, VerdictStatus};
use std::str::FromStr;

/// Status given to a job that produced no outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyTestPolicy {
    /// "Every outcome passed" holds vacuously.
    #[default]
    Accept,
    Reject,
}

impl FromStr for EmptyTestPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "accept" => Ok(EmptyTestPolicy::Accept),
            "reject" => Ok(EmptyTestPolicy::Reject),
            other => Err(format!("expected 'accept' or 'reject', got '{}'", other)),
        }
    }
}

pub fn aggregate(
    job_id: &str,
    outcomes: Vec<ExecutionOutcome>,
    empty_policy: EmptyTestPolicy,
) -> Verdict {
    let accepted = if outcomes.is_empty() {
        empty_policy == EmptyTestPolicy::Accept
    } else {
        outcomes.iter().all(|o| o.passed)
    };

    Verdict {
        job_id: job_id.to_string(),
        status: if accepted {
            VerdictStatus::Accepted
        } else {
            VerdictStatus::Rejected
        },
        outcomes,
        finished_at: Utc::now(),
    }
}
