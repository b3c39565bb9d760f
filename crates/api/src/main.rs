use std::sync::Arc;

use anyhow::Context;

use liftride_api::app::{build_app, services};
use liftride_infra::{PipelineConfig, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    liftride_observability::init();

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        bind_addr = %config.bind_addr,
        queue = %config.queue.queue_name,
        channels = config.queue.channels,
        persistent = config.use_persistent_stores,
        season = %config.season_id,
        "starting lift ride API"
    );

    let services = Arc::new(services::build_services(&config).await?);
    let app = build_app(Arc::clone(&services));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = shutdown_signal().await {
                tracing::error!(error = %e, "failed to listen for shutdown signals");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    let report = tokio::task::spawn_blocking(move || services.shutdown()).await?;
    if let Some(report) = report {
        tracing::info!(
            committed = report.committed_total,
            workers_stopped = report.workers_stopped,
            "API stopped"
        );
    }
    Ok(())
}
