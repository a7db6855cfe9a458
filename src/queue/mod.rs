//! At-least-once FIFO of deployment jobs over Valkey, plus a per-job
//! diagnostic record used both for the `GET` diagnostics path and for the
//! claimed-jobs reservation that drives redelivery.

use chrono::Utc;
use fred::interfaces::{KeysInterface, ListInterface};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::store::models::Job;

const QUEUE_KEY: &str = "deployknot:queue:deployments";
const JOB_KEY_TTL_SECS: i64 = 60 * 60 * 24; // >= 24h, per spec
const CLAIM_STALE_SECS: i64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub deployment_id: Uuid,
    pub status: JobStatus,
    pub enqueued_at: chrono::DateTime<Utc>,
    pub started_at: Option<chrono::DateTime<Utc>>,
    pub claimed_at: Option<chrono::DateTime<Utc>>,
    pub completed_at: Option<chrono::DateTime<Utc>>,
    pub error: Option<String>,
}

fn job_key(job_id: Uuid) -> String {
    format!("deployknot:job:{job_id}")
}

#[tracing::instrument(skip(valkey, job), fields(job_id = %job.job_id, deployment_id = %job.deployment_id), err)]
pub async fn enqueue(valkey: &fred::clients::Pool, job: &Job) -> Result<(), ApiError> {
    let envelope = serde_json::to_string(job).map_err(|e| ApiError::Internal(e.into()))?;
    valkey
        .lpush::<(), _, _>(QUEUE_KEY, envelope)
        .await
        .map_err(ApiError::from)?;

    let record = JobRecord {
        job_id: job.job_id,
        deployment_id: job.deployment_id,
        status: JobStatus::Queued,
        enqueued_at: Utc::now(),
        started_at: None,
        claimed_at: None,
        completed_at: None,
        error: None,
    };
    write_record(valkey, &record).await
}

async fn write_record(valkey: &fred::clients::Pool, record: &JobRecord) -> Result<(), ApiError> {
    let json = serde_json::to_string(record).map_err(|e| ApiError::Internal(e.into()))?;
    valkey
        .set::<(), _, _>(
            job_key(record.job_id),
            json,
            Some(fred::types::Expiration::EX(JOB_KEY_TTL_SECS)),
            None,
            false,
        )
        .await
        .map_err(ApiError::from)?;
    Ok(())
}

/// Block-pop the next job, waiting up to `timeout_secs`. Returns `None` on
/// timeout so the caller can loop and re-check shutdown signals.
#[tracing::instrument(skip(valkey), err)]
pub async fn dequeue(valkey: &fred::clients::Pool, timeout_secs: f64) -> Result<Option<Job>, ApiError> {
    let popped: Option<(String, String)> = valkey
        .blpop(QUEUE_KEY, timeout_secs)
        .await
        .map_err(ApiError::from)?;

    let Some((_key, envelope)) = popped else {
        return Ok(None);
    };

    let job: Job = serde_json::from_str(&envelope).map_err(|e| ApiError::Internal(e.into()))?;

    if let Some(mut record) = read_record(valkey, job.job_id).await? {
        record.status = JobStatus::Running;
        record.started_at = Some(Utc::now());
        record.claimed_at = Some(Utc::now());
        write_record(valkey, &record).await?;
    }

    Ok(Some(job))
}

pub async fn read_record(valkey: &fred::clients::Pool, job_id: Uuid) -> Result<Option<JobRecord>, ApiError> {
    let raw: Option<String> = valkey.get(job_key(job_id)).await.map_err(ApiError::from)?;
    raw.map(|s| serde_json::from_str(&s).map_err(|e| ApiError::Internal(e.into())))
        .transpose()
}

/// Refresh `claimed_at` on the in-flight job record; called periodically by
/// a worker still processing the job so a reconciler doesn't reclaim it.
pub async fn heartbeat(valkey: &fred::clients::Pool, job_id: Uuid) -> Result<(), ApiError> {
    if let Some(mut record) = read_record(valkey, job_id).await? {
        record.claimed_at = Some(Utc::now());
        write_record(valkey, &record).await?;
    }
    Ok(())
}

pub async fn update_status(
    valkey: &fred::clients::Pool,
    job_id: Uuid,
    status: JobStatus,
    error: Option<String>,
) -> Result<(), ApiError> {
    if let Some(mut record) = read_record(valkey, job_id).await? {
        record.status = status;
        record.error = error;
        if matches!(status, JobStatus::Completed | JobStatus::Failed) {
            record.completed_at = Some(Utc::now());
        }
        write_record(valkey, &record).await?;
    }
    Ok(())
}

/// A claimed job whose `claimed_at` is older than the staleness threshold
/// and whose record is not terminal — a worker likely crashed mid-job.
pub fn is_claim_stale(record: &JobRecord) -> bool {
    matches!(record.status, JobStatus::Running)
        && record
            .claimed_at
            .is_some_and(|at| Utc::now().signed_duration_since(at).num_seconds() > CLAIM_STALE_SECS)
}

/// Re-push a job envelope for redelivery after a stale claim is detected.
pub async fn requeue(valkey: &fred::clients::Pool, job: &Job) -> Result<(), ApiError> {
    let envelope = serde_json::to_string(job).map_err(|e| ApiError::Internal(e.into()))?;
    valkey
        .lpush::<(), _, _>(QUEUE_KEY, envelope)
        .await
        .map_err(ApiError::from)?;
    if let Some(mut record) = read_record(valkey, job.job_id).await? {
        record.status = JobStatus::Queued;
        record.claimed_at = None;
        write_record(valkey, &record).await?;
    }
    Ok(())
}
