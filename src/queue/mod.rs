//! PostgreSQL-backed crawl job queue.
//!
//! Jobs live in `crawl_jobs` next to the links they reference, so the API can
//! insert a link and its job in one transaction. Workers claim due jobs with
//! `FOR UPDATE SKIP LOCKED` and hold them under a lease; a lease that expires
//! (worker crash) makes the job claimable again, giving at-least-once
//! delivery.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor, PgPool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppResult;

pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;
pub const DEFAULT_LEASE: Duration = Duration::from_secs(300);

const BACKOFF_BASE_SECS: i64 = 30;
const BACKOFF_CAP_SECS: i64 = 3_600;

const JOB_COLUMNS: &str = "id, link_id, url, status, attempts, max_attempts, run_at, \
     lease_expires_at, worker_id, last_error, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Dead,
}

/// Payload handed from the ingestion endpoint to the crawler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlRequest {
    pub link_id: Uuid,
    pub url: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct CrawlJob {
    pub id: Uuid,
    pub link_id: Uuid,
    pub url: String,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CrawlJob {
    /// True once the attempt that just ran was the last one allowed.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Delay before retrying after the `attempt`-th failure: 30s, 60s, 120s, ...
/// capped at one hour.
pub fn backoff(attempt: i32) -> chrono::Duration {
    let exponent = attempt.saturating_sub(1).clamp(0, 16) as u32;
    let secs = BACKOFF_BASE_SECS
        .saturating_mul(1_i64 << exponent)
        .min(BACKOFF_CAP_SECS);
    chrono::Duration::seconds(secs)
}

/// Insert a pending job that is due immediately.
///
/// Accepts any executor so callers can enqueue inside the transaction that
/// created the link; the job is durable once that transaction commits.
pub async fn enqueue<'e, E>(executor: E, request: &CrawlRequest, max_attempts: i32) -> AppResult<Uuid>
where
    E: PgExecutor<'e>,
{
    let job_id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO crawl_jobs (link_id, url, max_attempts)
         VALUES ($1, $2, $3)
         RETURNING id",
    )
    .bind(request.link_id)
    .bind(&request.url)
    .bind(max_attempts)
    .fetch_one(executor)
    .await?;

    debug!(job_id = %job_id, link_id = %request.link_id, "Crawl job enqueued");
    Ok(job_id)
}

/// Claim up to `limit` due jobs for `worker_id`.
///
/// Due means pending with `run_at` in the past, or running with an expired
/// lease and attempts left. Running jobs whose lease expired on their final
/// attempt are dead-lettered first so they cannot loop forever.
pub async fn claim(
    pool: &PgPool,
    worker_id: &str,
    limit: i64,
    lease: Duration,
) -> AppResult<Vec<CrawlJob>> {
    let reaped = sqlx::query(
        "UPDATE crawl_jobs
         SET status = 'dead',
             last_error = COALESCE(last_error, 'lease expired on final attempt'),
             lease_expires_at = NULL,
             updated_at = NOW()
         WHERE status = 'running'
           AND lease_expires_at < NOW()
           AND attempts >= max_attempts",
    )
    .execute(pool)
    .await?;

    if reaped.rows_affected() > 0 {
        warn!(count = reaped.rows_affected(), "Dead-lettered crawl jobs with expired leases");
    }

    let jobs = sqlx::query_as::<_, CrawlJob>(&format!(
        "WITH next_jobs AS (
             SELECT id
             FROM crawl_jobs
             WHERE (status = 'pending' AND run_at <= NOW())
                OR (status = 'running' AND lease_expires_at < NOW() AND attempts < max_attempts)
             ORDER BY run_at
             LIMIT $1
             FOR UPDATE SKIP LOCKED
         )
         UPDATE crawl_jobs
         SET status = 'running',
             attempts = attempts + 1,
             lease_expires_at = NOW() + make_interval(secs => $2),
             worker_id = $3,
             updated_at = NOW()
         WHERE id IN (SELECT id FROM next_jobs)
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(limit)
    .bind(lease.as_secs_f64())
    .bind(worker_id)
    .fetch_all(pool)
    .await?;

    Ok(jobs)
}

/// Outcome of acknowledging a claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The job moved to this status.
    Recorded(JobStatus),
    /// The job is no longer held by this worker: its lease passed to another
    /// worker, or the job was deleted. Nothing was written.
    Stale,
}

/// Acks only apply while the caller still holds the job; a worker whose
/// lease was reclaimed must not overwrite the new holder's attempt.
const HELD_BY_CALLER: &str = "id = $1 AND status = 'running' AND worker_id = $2";

fn ack_outcome(job: &CrawlJob, rows_affected: u64, status: JobStatus) -> Ack {
    if rows_affected == 0 {
        warn!(
            job_id = %job.id,
            worker_id = ?job.worker_id,
            "Crawl job no longer held by this worker; ack ignored"
        );
        return Ack::Stale;
    }
    Ack::Recorded(status)
}

pub async fn mark_succeeded(pool: &PgPool, job: &CrawlJob) -> AppResult<Ack> {
    let result = sqlx::query(&format!(
        "UPDATE crawl_jobs
         SET status = 'succeeded',
             lease_expires_at = NULL,
             last_error = NULL,
             updated_at = NOW()
         WHERE {HELD_BY_CALLER}"
    ))
    .bind(job.id)
    .bind(&job.worker_id)
    .execute(pool)
    .await?;

    Ok(ack_outcome(job, result.rows_affected(), JobStatus::Succeeded))
}

/// Record a failed attempt. Reschedules with backoff while attempts remain,
/// otherwise dead-letters the job.
pub async fn mark_failed(pool: &PgPool, job: &CrawlJob, error: &str) -> AppResult<Ack> {
    if job.is_exhausted() {
        return mark_dead(pool, job, error).await;
    }

    let run_at = Utc::now() + backoff(job.attempts);
    let result = sqlx::query(&format!(
        "UPDATE crawl_jobs
         SET status = 'pending',
             last_error = $3,
             run_at = $4,
             lease_expires_at = NULL,
             worker_id = NULL,
             updated_at = NOW()
         WHERE {HELD_BY_CALLER}"
    ))
    .bind(job.id)
    .bind(&job.worker_id)
    .bind(error)
    .bind(run_at)
    .execute(pool)
    .await?;

    let ack = ack_outcome(job, result.rows_affected(), JobStatus::Pending);
    if ack == Ack::Recorded(JobStatus::Pending) {
        debug!(job_id = %job.id, attempts = job.attempts, %run_at, "Crawl job rescheduled");
    }
    Ok(ack)
}

/// Dead-letter a job immediately, regardless of attempts left.
pub async fn mark_dead(pool: &PgPool, job: &CrawlJob, error: &str) -> AppResult<Ack> {
    let result = sqlx::query(&format!(
        "UPDATE crawl_jobs
         SET status = 'dead',
             last_error = $3,
             lease_expires_at = NULL,
             updated_at = NOW()
         WHERE {HELD_BY_CALLER}"
    ))
    .bind(job.id)
    .bind(&job.worker_id)
    .bind(error)
    .execute(pool)
    .await?;

    let ack = ack_outcome(job, result.rows_affected(), JobStatus::Dead);
    if ack == Ack::Recorded(JobStatus::Dead) {
        warn!(job_id = %job.id, link_id = %job.link_id, attempts = job.attempts, error, "Crawl job dead-lettered");
    }
    Ok(ack)
}

/// Most recent job for a link, if any was ever enqueued.
pub async fn latest_for_link<'e, E>(executor: E, link_id: Uuid) -> AppResult<Option<CrawlJob>>
where
    E: PgExecutor<'e>,
{
    let job = sqlx::query_as::<_, CrawlJob>(&format!(
        "SELECT {JOB_COLUMNS}
         FROM crawl_jobs
         WHERE link_id = $1
         ORDER BY created_at DESC
         LIMIT 1"
    ))
    .bind(link_id)
    .fetch_optional(executor)
    .await?;

    Ok(job)
}

/// Enqueue a job for every link that has neither details nor any job.
///
/// Reconciles links written without a job (e.g. before enqueueing became
/// transactional, or after jobs were purged). Returns the number enqueued.
pub async fn enqueue_orphans(pool: &PgPool, max_attempts: i32) -> AppResult<u64> {
    let result = sqlx::query(
        "INSERT INTO crawl_jobs (link_id, url, max_attempts)
         SELECT l.id, l.url, $1
         FROM links l
         WHERE NOT EXISTS (SELECT 1 FROM link_details d WHERE d.link_id = l.id)
           AND NOT EXISTS (SELECT 1 FROM crawl_jobs j WHERE j.link_id = l.id)",
    )
    .bind(max_attempts)
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        info!(count = result.rows_affected(), "Enqueued crawl jobs for orphaned links");
    }
    Ok(result.rows_affected())
}
