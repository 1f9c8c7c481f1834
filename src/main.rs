use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;

use lumen_photos::app_context::AppContext;
use lumen_photos::controllers::build_router;
use lumen_photos::repositories::ensure_schema;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let bind_address = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    log::info!("connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&database_url)
        .await
        .context("connect to postgres")?;
    ensure_schema(&pool).await.context("apply schema")?;

    log::info!("building application context...");
    let context = AppContext::build(pool).await?;
    context.start_workers().await?;

    let router = build_router(context.clone())?;
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("bind {bind_address}"))?;
    log::info!("listening on {bind_address}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    log::info!("draining workers...");
    let _ = tokio::time::timeout(SHUTDOWN_DEADLINE, context.shutdown()).await;
    log::info!("bye");
    Ok(())
}

fn init_logging() {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(log::LevelFilter::Info);
    let _ = builder.try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    log::info!("shutdown signal received");
}
