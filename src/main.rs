use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::EnvFilter;
use webhook_intake::{
    billing::LogOnlyBilling, config::IntakeConfig, dispatch, router, state::AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:intake.db".to_string());
    let bind_addr =
        std::env::var("INTAKE_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3002".to_string());

    let config = IntakeConfig::from_env();
    if config.webhook_secret.is_empty() {
        return Err("INTAKE_WEBHOOK_SECRET must be set".into());
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(&pool)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let (queue, worker) =
        dispatch::channel(config.queue_capacity, pool.clone(), Arc::new(LogOnlyBilling));
    let worker_handle = tokio::spawn(worker.run());

    let state = AppState {
        pool,
        config,
        queue,
    };
    let app = router(state);

    let addr: SocketAddr = bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // serve() has dropped the router state by now, so every queue handle is
    // gone; the worker drains buffered jobs and exits.
    worker_handle.await?;

    Ok(())
}
