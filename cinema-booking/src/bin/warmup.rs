use anyhow::Context;
use cinema_booking::{Backends, BookingService};
use cinema_store::app_config::Config;
use cinema_store::{DbClient, RedisClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cinema_booking=debug,cinema_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;

    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let redis = RedisClient::new(&config.redis.url, &config.redis.key_prefix)
        .await
        .context("Failed to connect to Redis")?;

    let service = BookingService::new(Backends::redis_postgres(redis, &db), config.booking.clone());

    let report = service
        .warm_upcoming(
            chrono::Utc::now(),
            chrono::Duration::hours(config.warmup.horizon_hours),
        )
        .await
        .map_err(|e| anyhow::anyhow!("{:?}", e))?;

    tracing::info!(
        warmed = report.warmed,
        skipped = report.skipped,
        failed = report.failed,
        "Seat map warm-up finished"
    );
    Ok(())
}
