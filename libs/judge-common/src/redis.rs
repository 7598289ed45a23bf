use crate::types::{CachedResult, JobRequest, SubmissionUpdate};
use redis::{AsyncCommands, RedisResult};
use std::collections::HashMap;

/// Redis key scheme shared by producers, the worker and the CLI.
/// Keeping it in one place stops the three from drifting apart.

pub const DEFAULT_QUEUE: &str = "codeQueue";
pub const RESULT_PREFIX: &str = "result";
pub const SUBMISSION_PREFIX: &str = "submission";

/// Seconds a cached verdict stays pollable.
pub const RESULT_TTL_SECS: u64 = 300;

/// Updates an existing submission hash in one round trip.
/// Returns 0 without writing when the record does not exist.
const UPDATE_SUBMISSION_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    redis.call('HSET', KEYS[1], 'status', ARGV[1], 'submissionTime', ARGV[2], 'results', ARGV[3])
    return 1
end
return 0
"#;

pub fn result_key(job_id: &str) -> String {
    format!("{}:{}", RESULT_PREFIX, job_id)
}

pub fn submission_key(job_id: &str) -> String {
    format!("{}:{}", SUBMISSION_PREFIX, job_id)
}

fn serialization_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
}

/// Push a job onto the queue.
/// LPUSH here pairs with the worker's BRPOP for FIFO order.
pub async fn push_job(
    conn: &mut redis::aio::ConnectionManager,
    queue: &str,
    job: &JobRequest,
) -> RedisResult<()> {
    let payload = serde_json::to_string(job).map_err(serialization_error)?;
    conn.lpush(queue, payload).await
}

/// Block until a payload is available and return it unparsed.
///
/// Parsing is left to the caller so a malformed payload can be logged and
/// skipped without being mistaken for a transport failure.
pub async fn pop_payload(
    conn: &mut redis::aio::ConnectionManager,
    queue: &str,
) -> RedisResult<Option<String>> {
    let popped: Option<(String, String)> = redis::cmd("BRPOP")
        .arg(queue)
        .arg(0)
        .query_async(conn)
        .await?;
    Ok(popped.map(|(_queue, payload)| payload))
}

/// Store the polling copy of a verdict with a fixed expiry.
pub async fn store_cached_result(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &str,
    result: &CachedResult,
    ttl_secs: u64,
) -> RedisResult<()> {
    let payload = serde_json::to_string(result).map_err(serialization_error)?;
    redis::cmd("SET")
        .arg(result_key(job_id))
        .arg(payload)
        .arg("EX")
        .arg(ttl_secs)
        .query_async(conn)
        .await
}

pub async fn get_cached_result(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &str,
) -> RedisResult<Option<CachedResult>> {
    let payload: Option<String> = conn.get(result_key(job_id)).await?;

    match payload {
        Some(data) => {
            let result: CachedResult = serde_json::from_str(&data).map_err(|e| {
                redis::RedisError::from((
                    redis::ErrorKind::TypeError,
                    "deserialization error",
                    e.to_string(),
                ))
            })?;
            Ok(Some(result))
        }
        None => Ok(None),
    }
}

/// Create the pending submission record, as the intake side does before
/// enqueueing.
pub async fn create_submission(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &str,
    submitted_at: &str,
) -> RedisResult<()> {
    redis::cmd("HSET")
        .arg(submission_key(job_id))
        .arg("status")
        .arg("pending")
        .arg("submissionTime")
        .arg(submitted_at)
        .arg("results")
        .arg("[]")
        .query_async(conn)
        .await
}

/// Update status, time and results of an existing submission record.
/// Returns `false` when no record exists; nothing is written in that case.
pub async fn update_submission(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &str,
    update: &SubmissionUpdate,
) -> RedisResult<bool> {
    let results = serde_json::to_string(&update.results).map_err(serialization_error)?;
    let updated: i64 = redis::Script::new(UPDATE_SUBMISSION_SCRIPT)
        .key(submission_key(job_id))
        .arg(update.status.to_string())
        .arg(update.submission_time.to_rfc3339())
        .arg(results)
        .invoke_async(conn)
        .await?;
    Ok(updated == 1)
}

pub async fn get_submission(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &str,
) -> RedisResult<HashMap<String, String>> {
    conn.hgetall(submission_key(job_id)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_key_format() {
        assert_eq!(result_key("65f0c1"), "result:65f0c1");
        assert_eq!(result_key("65f0c1"), result_key("65f0c1"));
    }

    #[test]
    fn test_submission_key_format() {
        let key = submission_key("abc");
        assert!(key.starts_with("submission:"));
        assert!(key.ends_with("abc"));
    }

    #[test]
    fn test_update_script_guards_existence() {
        assert!(UPDATE_SUBMISSION_SCRIPT.contains("EXISTS"));
        assert!(UPDATE_SUBMISSION_SCRIPT.contains("'submissionTime'"));
    }
}
