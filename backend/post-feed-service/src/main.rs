use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use post_feed_service::config::{Config, DatabaseConfig};
use post_feed_service::logging::init_tracing;
use post_feed_service::metrics::serve_metrics;
use post_feed_service::repository::{MemoryStore, PgStore};
use post_feed_service::{PostService, PostStore};

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn connect_store(db: &DatabaseConfig) -> Result<PgStore> {
    // Prepared statement caching disabled for PgBouncer transaction mode
    let connect_options = PgConnectOptions::from_str(&db.url)
        .context("Failed to parse DATABASE_URL")?
        .statement_cache_capacity(0);

    let pg_pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .min_connections(db.min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect_with(connect_options)
        .await
        .context("Failed to connect to database")?;

    sqlx::query("SELECT 1")
        .execute(&pg_pool)
        .await
        .context("Failed to verify database connection")?;
    info!("Database pool created and verified");

    let store = PgStore::new(pg_pool);
    store
        .migrate()
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.app.json_logs);

    info!(
        env = %config.app.env,
        http_port = config.app.http_port,
        max_depth = config.feed.max_depth,
        "Starting post-feed-service"
    );

    let store = match &config.database {
        Some(db) => {
            let backend = Arc::new(connect_store(db).await?);
            PostStore::with_backend(backend, config.feed.clone())
        }
        None => {
            warn!("DATABASE_URL not set, serving from the in-memory store");
            PostStore::with_backend(Arc::new(MemoryStore::new()), config.feed.clone())
        }
    };
    let service = web::Data::new(PostService::new(store));
    info!("Post service initialized");

    let http_addr = format!("{}:{}", config.app.host, config.app.http_port);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(service.clone())
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/ready", web::get().to(|| async { "READY" }))
            .route("/metrics", web::get().to(serve_metrics))
    })
    .bind(&http_addr)
    .context("Failed to bind HTTP server")?
    .disable_signals()
    .run();

    let handle = server.handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        handle.stop(true).await;
    });

    info!("HTTP server listening on http://{}", http_addr);
    server
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    info!("post-feed-service shut down");
    Ok(())
}
