// ABOUTME: Corral server binary
// ABOUTME: Boots tracing, the database, the recovery sweep, and the HTTP listener

mod config;
mod providers;

use anyhow::Context;
use corral_api::{create_router, AppState};
use corral_budget::BudgetGuard;
use corral_executions::{CoordinatorConfig, EventBus, ExecutionCoordinator, ExecutionStorage};
use corral_sandbox::SandboxPool;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = config::Config::from_env().context("invalid configuration")?;

    let db = corral_storage::init_pool(&config.database_path)
        .await
        .context("failed to initialize database")?;

    let sandboxes = Arc::new(SandboxPool::new(
        Arc::new(providers::ProcessSandboxProvider),
        config.max_sandboxes,
        config.sandbox_create_timeout,
    ));
    let budget = Arc::new(BudgetGuard::new(db.clone(), config.default_budget_limit));
    let coordinator = Arc::new(ExecutionCoordinator::new(
        ExecutionStorage::new(db),
        Arc::new(EventBus::new()),
        budget.clone(),
        sandboxes.clone(),
        Arc::new(providers::DevModelClient),
        Arc::new(providers::PermissiveClassifier),
        CoordinatorConfig {
            model_timeout: config.model_timeout,
            command_timeout: config.command_timeout,
        },
    ));

    // Executions left in flight by a previous process are marked failed
    // before the server accepts traffic
    let recovered = coordinator
        .recover()
        .await
        .context("recovery sweep failed")?;
    if recovered > 0 {
        info!("Recovery marked {} execution(s) failed", recovered);
    }

    let state = AppState {
        coordinator,
        sandboxes: sandboxes.clone(),
        budget,
        heartbeat_interval: config.heartbeat_interval,
    };
    let app = create_router(state).layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Corral listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let drained = sandboxes.close_all().await;
    info!("Shutdown complete, {} sandbox(es) closed", drained);
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
