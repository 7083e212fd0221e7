//! End-to-end: POST a link, run a worker pass with a stub fetcher, then see
//! the details through the listing endpoint.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{async_trait, http::StatusCode};
use serial_test::serial;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use hoarder_server::crawler::{
    spawn_workers, CrawlError, CrawlWorker, FetchedPage, PageFetcher, WorkerConfig,
};
use hoarder_server::queue::{Ack, JobStatus};

const PAGE: &str = r#"<html><head>
    <title>Fallback Title</title>
    <meta property="og:title" content="Stub Article"/>
    <meta property="og:description" content="Served by the stub fetcher"/>
    <meta property="og:image" content="/cover.png"/>
</head><body></body></html>"#;

/// Serves `PAGE` for every URL and counts calls.
#[derive(Default, Clone)]
struct StubFetcher {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl PageFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, CrawlError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FetchedPage {
            final_url: Url::parse(url).map_err(|_| CrawlError::InvalidUrl(url.into()))?,
            html: PAGE.to_string(),
        })
    }
}

/// Always fails with the configured error.
struct FailingFetcher {
    permanent: bool,
}

#[async_trait]
impl PageFetcher for FailingFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, CrawlError> {
        if self.permanent {
            Err(CrawlError::PrivateAddress(url.into()))
        } else {
            Err(CrawlError::Status(503))
        }
    }
}

fn worker<F: PageFetcher>(pool: &PgPool, fetcher: F) -> CrawlWorker<F> {
    CrawlWorker::new(
        pool.clone(),
        fetcher,
        WorkerConfig {
            batch_size: 10,
            poll_interval: Duration::from_millis(20),
            ..WorkerConfig::default()
        },
    )
}

async fn latest_job(pool: &PgPool, link_id: Uuid) -> (JobStatus, Option<String>) {
    sqlx::query_as(
        "SELECT status, last_error FROM crawl_jobs
         WHERE link_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(link_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[tokio::test]
#[serial]
async fn worker_stores_details_visible_in_listing() {
    let pool = common::test_pool().await;
    common::quiesce_queue(&pool).await;
    let app = common::create_test_app(pool.clone());
    let (_, token) = common::new_user(app.clone()).await;
    let created = common::create_link(app.clone(), &token, "https://example.com/posts/1").await;
    let link_id = common::id_of(&created);

    let fetcher = StubFetcher::default();
    let w = worker(&pool, fetcher.clone());
    assert_eq!(w.run_once("test-worker").await.unwrap(), 1);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

    let (status, _) = latest_job(&pool, link_id).await;
    assert_eq!(status, JobStatus::Succeeded);

    let (status, body) = common::get_authed(app, "/api/v1/links", &token).await;
    assert_eq!(status, StatusCode::OK);
    let details = &body["links"][0]["details"];
    assert_eq!(details["title"], "Stub Article");
    assert_eq!(details["description"], "Served by the stub fetcher");
    assert_eq!(details["imageUrl"], "https://example.com/cover.png");
    assert_eq!(details["favicon"], "https://example.com/favicon.ico");
}

#[tokio::test]
#[serial]
async fn redelivered_job_rewrites_same_details() {
    let pool = common::test_pool().await;
    common::quiesce_queue(&pool).await;
    let app = common::create_test_app(pool.clone());
    let (_, token) = common::new_user(app.clone()).await;
    let created = common::create_link(app, &token, "https://example.com/twice").await;
    let link_id = common::id_of(&created);

    let w = worker(&pool, StubFetcher::default());
    w.run_once("test-worker").await.unwrap();

    // Put the job back as if the ack had been lost.
    sqlx::query("UPDATE crawl_jobs SET status = 'pending', run_at = NOW() WHERE link_id = $1")
        .bind(link_id)
        .execute(&pool)
        .await
        .unwrap();
    w.run_once("test-worker").await.unwrap();

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM link_details WHERE link_id = $1")
        .bind(link_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test]
#[serial]
async fn transient_failure_is_rescheduled_without_details() {
    let pool = common::test_pool().await;
    common::quiesce_queue(&pool).await;
    let app = common::create_test_app(pool.clone());
    let (_, token) = common::new_user(app.clone()).await;
    let created = common::create_link(app.clone(), &token, "https://example.com/down").await;
    let link_id = common::id_of(&created);

    let w = worker(&pool, FailingFetcher { permanent: false });
    assert_eq!(w.run_once("test-worker").await.unwrap(), 1);

    let (status, error) = latest_job(&pool, link_id).await;
    assert_eq!(status, JobStatus::Pending);
    assert_eq!(error.as_deref(), Some("upstream responded with HTTP 503"));

    let (_, body) = common::get_authed(app, "/api/v1/links", &token).await;
    assert!(body["links"][0].get("details").is_none());
}

#[tokio::test]
#[serial]
async fn permanent_failure_is_dead_lettered_immediately() {
    let pool = common::test_pool().await;
    common::quiesce_queue(&pool).await;
    let app = common::create_test_app(pool.clone());
    let (_, token) = common::new_user(app.clone()).await;
    let created = common::create_link(app.clone(), &token, "https://internal.example/").await;
    let link_id = common::id_of(&created);

    let w = worker(&pool, FailingFetcher { permanent: true });
    w.run_once("test-worker").await.unwrap();

    let (status, error) = latest_job(&pool, link_id).await;
    assert_eq!(status, JobStatus::Dead);
    assert!(error.unwrap().contains("private"));

    let uri = format!("/api/v1/links/{link_id}");
    let (_, body) = common::get_authed(app, &uri, &token).await;
    assert_eq!(body["crawlStatus"], "dead");
}

#[tokio::test]
#[serial]
async fn job_for_deleted_link_is_skipped_without_fetching() {
    let pool = common::test_pool().await;
    common::quiesce_queue(&pool).await;
    let app = common::create_test_app(pool.clone());
    let (_, token) = common::new_user(app.clone()).await;
    let created = common::create_link(app, &token, "https://example.com/race").await;
    let link_id = common::id_of(&created);

    let fetcher = StubFetcher::default();
    let w = worker(&pool, fetcher.clone());
    let job = hoarder_server::queue::claim(&pool, "test-worker", 1, Duration::from_secs(60))
        .await
        .unwrap()
        .remove(0);

    // Delete the link out from under the claimed job. The cascade removes
    // the job row too, so there is nothing left to ack.
    sqlx::query("DELETE FROM links WHERE id = $1")
        .bind(link_id)
        .execute(&pool)
        .await
        .unwrap();

    let ack = w.process(&job).await.unwrap();
    assert_eq!(ack, Ack::Stale);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
#[serial]
async fn spawned_workers_drain_queue_and_stop_on_cancel() {
    let pool = common::test_pool().await;
    common::quiesce_queue(&pool).await;
    let app = common::create_test_app(pool.clone());
    let (_, token) = common::new_user(app.clone()).await;

    let mut link_ids = Vec::new();
    for n in 0..3 {
        let created =
            common::create_link(app.clone(), &token, &format!("https://example.com/bg/{n}")).await;
        link_ids.push(common::id_of(&created));
    }

    let w = Arc::new(worker(&pool, StubFetcher::default()));
    let cancel = CancellationToken::new();
    let handles = spawn_workers(Arc::clone(&w), 2, cancel.clone());

    let mut done = false;
    for _ in 0..100 {
        let crawled: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM link_details WHERE link_id = ANY($1)")
                .bind(&link_ids)
                .fetch_one(&pool)
                .await
                .unwrap();
        if crawled == 3 {
            done = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    cancel.cancel();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop after cancel")
            .unwrap();
    }

    assert!(done, "workers did not crawl all links in time");
}

/// Fails for URLs containing "unrecordable" with an error text Postgres
/// refuses to store (a NUL byte), so recording that job's outcome errors.
#[derive(Default, Clone)]
struct UnrecordableFetcher {
    inner: StubFetcher,
}

#[async_trait]
impl PageFetcher for UnrecordableFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, CrawlError> {
        if url.contains("unrecordable") {
            return Err(CrawlError::Resolve("bad\0host".into()));
        }
        self.inner.fetch(url).await
    }
}

#[tokio::test]
#[serial]
async fn failed_ack_does_not_abandon_rest_of_batch() {
    let pool = common::test_pool().await;
    common::quiesce_queue(&pool).await;
    let app = common::create_test_app(pool.clone());
    let (_, token) = common::new_user(app.clone()).await;

    let bad = common::create_link(app.clone(), &token, "https://example.com/unrecordable").await;
    let mut good = Vec::new();
    for n in 0..3 {
        let created =
            common::create_link(app.clone(), &token, &format!("https://example.com/ok/{n}")).await;
        good.push(common::id_of(&created));
    }

    let fetcher = UnrecordableFetcher::default();
    let w = worker(&pool, fetcher.clone());
    assert!(w.run_once("test-worker").await.is_err());

    // Every other job in the batch was still crawled and acked.
    assert_eq!(fetcher.inner.calls.load(Ordering::SeqCst), 3);
    for link_id in good {
        let (status, _) = latest_job(&pool, link_id).await;
        assert_eq!(status, JobStatus::Succeeded);
    }
    let (status, _) = latest_job(&pool, common::id_of(&bad)).await;
    assert_eq!(status, JobStatus::Running);
}
