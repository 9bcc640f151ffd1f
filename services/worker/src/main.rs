use std::time::Duration;

use anyhow::Result;
use tracing::info;

use shared::Settings;

/// Grace window for in-flight jobs on shutdown.
const DRAIN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let settings = Settings::from_env()?;
    shared::init_tracing(&settings.log_level);

    info!(job_version = %settings.job_version, "starting lifecycle worker");

    let runtime = engine::bootstrap(&settings).await?;
    runtime.service.register_workers();
    info!("queue processors registered");

    // Run until SIGTERM/SIGINT, then drain.
    wait_for_shutdown().await;
    info!("shutdown signal received, draining queues");
    runtime.queues.close(DRAIN_GRACE).await;
    info!("worker drained cleanly");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("sigterm handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
