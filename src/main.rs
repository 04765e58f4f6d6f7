use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use runner_service::config::Config;
use runner_service::nats::{NatsPublisher, Subscriber};
use runner_service::runner::{ResultPublisher, Runner};
use runner_service::sandbox;
use runner_service::worker::JobHandler;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("runner_service=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("starting runner service");
    let config = Config::load(&[])?;

    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("failed to connect to NATS at {}", config.nats.url))?;
    info!(url = %config.nats.url, "connected to NATS");

    let executor = sandbox::new_executor(&config.runner)?;
    info!(backend = executor.id(), "sandbox backend ready");

    let publisher: Arc<dyn ResultPublisher> = Arc::new(NatsPublisher::new(
        client.clone(),
        config.nats.submission_result_subject.clone(),
    ));
    let runner = Runner::new(executor, publisher, config.runner.clone());
    let handler = Arc::new(JobHandler::new(runner, &config.runner));

    let subscriber = Subscriber::new(
        client.clone(),
        config.nats.submission_created_subject.clone(),
        config.nats.queue_group.clone(),
    );
    subscriber.run(handler, shutdown_signal()).await?;

    if let Err(e) = client.flush().await {
        warn!(error = %e, "failed to flush NATS connection");
    }
    info!("runner service stopped");
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler; relying on SIGINT");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received interrupt");
    }
}
