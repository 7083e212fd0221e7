use std::sync::Arc;

use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hoarder_server::config::Config;
use hoarder_server::crawler::{spawn_workers, CrawlWorker, HttpFetcher, WorkerConfig};
use hoarder_server::state::AppState;
use hoarder_server::{db, queue, router};

#[tokio::main]
async fn main() {
    // Initialize tracing: JSON in production, human-readable in dev.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "hoarder_server=info,tower_http=info,sqlx=warn"
            .parse()
            .unwrap()
    });

    if std::env::var("APP_ENV").as_deref() == Ok("production") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("🚀 Hoarder Server starting...");

    // Fatal if DATABASE_URL is missing or JWT_SECRET is too short in production.
    let config = Config::from_env().expect("Failed to load configuration");
    info!("📝 Configuration loaded");

    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    db::health_check(&pool)
        .await
        .expect("Database health check failed");
    info!("✅ Database health check passed");

    // CORS: permissive in dev, restrictive in production.
    let cors = if config.is_dev {
        info!("🔓 CORS: permissive (dev mode)");
        CorsLayer::permissive()
    } else {
        tracing::warn!("🔒 CORS: restrictive (production mode). Cross-origin requests will be denied.");
        CorsLayer::new()
    };

    let shutdown = CancellationToken::new();

    // Crawl workers share the API's pool.
    let workers = if config.crawler.enabled {
        queue::enqueue_orphans(&pool, config.crawler.max_attempts)
            .await
            .expect("Failed to reconcile orphaned links");

        let fetcher = HttpFetcher::new().expect("Failed to build HTTP client");
        let worker = Arc::new(CrawlWorker::new(
            pool.clone(),
            fetcher,
            WorkerConfig::from(&config.crawler),
        ));
        info!("🕷️ Starting {} crawl worker(s)", config.crawler.concurrency);
        spawn_workers(worker, config.crawler.concurrency, shutdown.clone())
    } else {
        info!("Crawler disabled (CRAWLER_ENABLED=false)");
        Vec::new()
    };

    let app_state = AppState {
        pool,
        jwt_secret: Arc::from(config.jwt_secret.as_str()),
        crawl_max_attempts: config.crawler.max_attempts,
    };

    // Prometheus metrics layer
    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = router::build_router(app_state)
        .route(
            "/metrics",
            get(move || async move { metric_handle.render() }),
        )
        .layer(prometheus_layer)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = config.server_addr();
    info!("🎧 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_token.cancel();
        })
        .await
        .expect("Server failed to start");

    // The server has drained; make sure workers stop even if it exited early.
    shutdown.cancel();
    futures::future::join_all(workers).await;
    info!("👋 Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
