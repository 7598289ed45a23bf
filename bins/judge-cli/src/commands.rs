// CLI commands for talking to a running judge
use anyhow::{bail, Context, Result};
use chrono::Utc;
use judge_common::config::RedisConfig;
use judge_common::redis as store;
use judge_common::types::JobRequest;
use std::fs;
use std::path::Path;

async fn connect(config: &RedisConfig) -> Result<redis::aio::ConnectionManager> {
    let client = redis::Client::open(config.url.as_str())
        .with_context(|| format!("Invalid Redis URL: {}", config.url))?;
    redis::aio::ConnectionManager::new(client)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.url))
}

/// Parse a job file, letting `job_id` fill in or replace its id.
/// A job without any id gets a generated one.
pub fn load_job(content: &str, job_id: Option<&str>) -> Result<JobRequest> {
    let mut value: serde_json::Value =
        serde_json::from_str(content).context("Job file is not valid JSON")?;

    let Some(fields) = value.as_object_mut() else {
        bail!("Job file must contain a JSON object");
    };

    match job_id {
        Some(id) => {
            fields.insert("jobId".to_string(), id.into());
        }
        None if !fields.contains_key("jobId") => {
            fields.insert("jobId".to_string(), uuid::Uuid::new_v4().to_string().into());
        }
        None => {}
    }

    let job: JobRequest = serde_json::from_value(value).context("Job file is not a valid job")?;
    if job.job_id.is_empty() {
        bail!("Job id must not be empty");
    }
    Ok(job)
}

pub async fn submit(config: &RedisConfig, file: &Path, job_id: Option<&str>) -> Result<()> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let job = load_job(&content, job_id)?;

    let mut conn = connect(config).await?;

    // Record first: the worker only ever updates existing submissions
    store::create_submission(&mut conn, &job.job_id, &Utc::now().to_rfc3339())
        .await
        .context("Failed to create submission record")?;
    store::push_job(&mut conn, &config.queue, &job)
        .await
        .context("Failed to enqueue job")?;

    println!("✅ Submitted job {}", job.job_id);
    println!("   Language:   {}", job.language);
    println!("   Test cases: {}", job.test_cases.len());
    println!("   Queue:      {}", config.queue);
    println!();
    println!("Poll with: judge-cli result {}", job.job_id);

    Ok(())
}

pub async fn show_result(config: &RedisConfig, job_id: &str) -> Result<()> {
    let mut conn = connect(config).await?;

    match store::get_cached_result(&mut conn, job_id).await? {
        Some(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        None => {
            println!("No cached result for {} (still running, or expired)", job_id);
        }
    }

    Ok(())
}

pub async fn show_submission(config: &RedisConfig, job_id: &str) -> Result<()> {
    let mut conn = connect(config).await?;
    let record = store::get_submission(&mut conn, job_id).await?;

    if record.is_empty() {
        bail!("Submission {} not found", job_id);
    }

    let mut fields: Vec<_> = record.into_iter().collect();
    fields.sort();

    for (field, value) in fields {
        if field == "results" {
            // Stored as a JSON string; pretty-print when possible
            match serde_json::from_str::<serde_json::Value>(&value) {
                Ok(parsed) => println!("{}:\n{}", field, serde_json::to_string_pretty(&parsed)?),
                Err(_) => println!("{}: {}", field, value),
            }
        } else {
            println!("{}: {}", field, value);
        }
    }

    Ok(())
}
