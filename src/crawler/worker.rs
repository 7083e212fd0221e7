use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{extract_metadata, CrawlError, PageFetcher, PageMetadata};
use crate::config::CrawlerConfig;
use crate::error::AppResult;
use crate::queue::{self, Ack, CrawlJob};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs claimed per poll.
    pub batch_size: i64,
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    pub lease: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            batch_size: 5,
            poll_interval: Duration::from_secs(2),
            lease: queue::DEFAULT_LEASE,
        }
    }
}

impl From<&CrawlerConfig> for WorkerConfig {
    fn from(config: &CrawlerConfig) -> Self {
        WorkerConfig {
            poll_interval: config.poll_interval,
            ..WorkerConfig::default()
        }
    }
}

/// Processes crawl jobs: fetch, extract, upsert `link_details`.
pub struct CrawlWorker<F> {
    pool: PgPool,
    fetcher: F,
    config: WorkerConfig,
}

impl<F: PageFetcher> CrawlWorker<F> {
    pub fn new(pool: PgPool, fetcher: F, config: WorkerConfig) -> Self {
        CrawlWorker {
            pool,
            fetcher,
            config,
        }
    }

    /// Claim one batch and process every job in it. Returns how many jobs
    /// were claimed.
    ///
    /// A job whose outcome cannot be recorded does not stop the batch; the
    /// rest are still processed and the first such error is returned last.
    pub async fn run_once(&self, worker_id: &str) -> AppResult<usize> {
        let jobs = queue::claim(
            &self.pool,
            worker_id,
            self.config.batch_size,
            self.config.lease,
        )
        .await?;

        let mut first_error = None;
        for job in &jobs {
            if let Err(e) = self.process(job).await {
                error!(job_id = %job.id, worker_id = %worker_id, error = ?e, "Failed to record crawl outcome");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(jobs.len()),
        }
    }

    /// Run one claimed job to completion and record the outcome.
    pub async fn process(&self, job: &CrawlJob) -> AppResult<Ack> {
        debug!(job_id = %job.id, link_id = %job.link_id, attempt = job.attempts, "Crawling");

        match self.crawl(job).await {
            Ok(()) => queue::mark_succeeded(&self.pool, job).await,
            Err(e) if e.is_permanent() => queue::mark_dead(&self.pool, job, &e.to_string()).await,
            Err(e) => {
                warn!(job_id = %job.id, url = %job.url, error = %e, "Crawl attempt failed");
                queue::mark_failed(&self.pool, job, &e.to_string()).await
            }
        }
    }

    async fn crawl(&self, job: &CrawlJob) -> Result<(), CrawlError> {
        // Deleting a link cascades to its jobs, but a claim can race the delete.
        if !link_exists(&self.pool, job.link_id).await? {
            debug!(link_id = %job.link_id, "Link deleted before crawl; skipping");
            return Ok(());
        }

        let page = self.fetcher.fetch(&job.url).await?;
        let metadata = extract_metadata(&page.html, &page.final_url);
        store_details(&self.pool, job.link_id, &metadata).await?;

        info!(link_id = %job.link_id, title = ?metadata.title, "Link details stored");
        Ok(())
    }

    /// Poll until `cancel` fires. Errors are logged and the loop keeps going.
    pub async fn run(&self, worker_id: String, cancel: CancellationToken) {
        info!(worker_id = %worker_id, "🕷️ Crawl worker started");

        while !cancel.is_cancelled() {
            let claimed = match self.run_once(&worker_id).await {
                Ok(n) => n,
                Err(e) => {
                    error!(worker_id = %worker_id, error = ?e, "Crawl worker poll failed");
                    0
                }
            };

            if claimed > 0 {
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(worker_id = %worker_id, "Crawl worker stopped");
    }
}

async fn link_exists(pool: &PgPool, link_id: Uuid) -> AppResult<bool> {
    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM links WHERE id = $1)")
        .bind(link_id)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

/// Insert or replace the details row for a link. Idempotent, so a job
/// delivered twice just rewrites the same values.
pub async fn store_details(pool: &PgPool, link_id: Uuid, metadata: &PageMetadata) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO link_details (link_id, title, description, image_url, favicon)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (link_id) DO UPDATE
         SET title = EXCLUDED.title,
             description = EXCLUDED.description,
             image_url = EXCLUDED.image_url,
             favicon = EXCLUDED.favicon,
             crawled_at = NOW()",
    )
    .bind(link_id)
    .bind(&metadata.title)
    .bind(&metadata.description)
    .bind(&metadata.image_url)
    .bind(&metadata.favicon)
    .execute(pool)
    .await?;

    Ok(())
}

/// Start `count` workers sharing one `CrawlWorker`. Each stops when
/// `cancel` fires.
pub fn spawn_workers<F>(
    worker: Arc<CrawlWorker<F>>,
    count: usize,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>>
where
    F: PageFetcher + 'static,
{
    let instance = Uuid::new_v4().simple().to_string();

    (0..count)
        .map(|n| {
            let worker = Arc::clone(&worker);
            let cancel = cancel.clone();
            let worker_id = format!("crawler-{}-{n}", &instance[..8]);
            tokio::spawn(async move { worker.run(worker_id, cancel).await })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_config_takes_poll_interval_from_crawler_config() {
        let crawler = CrawlerConfig {
            poll_interval: Duration::from_millis(250),
            ..CrawlerConfig::default()
        };
        let config = WorkerConfig::from(&crawler);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.lease, queue::DEFAULT_LEASE);
    }
}
