use std::sync::Arc;

use anyhow::Context;

use geotrack_infra::{EventService, PipelineConfig, RedisStreamLog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    geotrack_observability::init();

    let config = PipelineConfig::from_env().context("invalid pipeline configuration")?;
    if std::env::var("REDIS_URL").is_err() {
        tracing::warn!(redis_url = %config.redis_url, "REDIS_URL not set; using REDIS_HOST/REDIS_PORT");
    }

    let log = RedisStreamLog::connect(&config.redis_url)
        .await
        .with_context(|| format!("failed to connect to {}", config.redis_url))?;
    log.ping().await.context("redis did not answer PING")?;

    let stats_interval = config.stats_interval;
    let mut service = EventService::new(Arc::new(log), config);
    service.start().await.context("failed to start event service")?;

    let mut ticker = tokio::time::interval(stats_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    tracing::error!(error = %err, "failed to listen for shutdown signal");
                }
                break;
            }
            _ = ticker.tick() => match service.stats().await {
                Ok(stats) => tracing::info!(
                    stats = %serde_json::to_string(&stats).unwrap_or_default(),
                    "event pipeline stats"
                ),
                Err(err) => tracing::warn!(error = %err, "failed to read event pipeline stats"),
            },
        }
    }

    tracing::info!("shutdown requested");
    service.stop().await;
    Ok(())
}
