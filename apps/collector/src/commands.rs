use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use collector::config::Config;
use market::{
    BackfillTrigger, Instrument, PriceClient, PriceFeed, PriceStore, TimeSeriesStore,
    run_collector,
};
use tokio::sync::mpsc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

fn price_client(config: &Config) -> Result<PriceClient> {
    PriceClient::new(config.feed_base_url.clone(), config.feed_timeout)
        .context("init price client failed")
}

async fn price_store(config: &Config) -> Result<PriceStore> {
    PriceStore::new(config.redis_url()?, config.key_prefix.clone())
        .await
        .context("init price store failed")
}

/// Long-running service: sampling, retention and twice-daily backfill.
pub async fn run(config: &Config) -> Result<()> {
    let store = Arc::new(price_store(config).await?);
    let feed = Arc::new(price_client(config)?);

    let (tx, rx) = mpsc::channel(4);
    tx.send(BackfillTrigger::Startup).await?;

    let mut sched = JobScheduler::new()
        .await
        .context("failed to create job scheduler")?;

    let job_tx = tx.clone();
    sched
        .add(Job::new_async_tz(
            config.backfill_cron.as_str(),
            config.backfill_tz,
            move |_uuid, _l| {
                let tx = job_tx.clone();

                Box::pin(async move {
                    if let Err(e) = tx.try_send(BackfillTrigger::Scheduled) {
                        warn!(error = %e, "backfill trigger dropped");
                    }
                })
            },
        )?)
        .await?;

    sched.start().await?;
    info!(
        cron = %config.backfill_cron,
        tz = %config.backfill_tz,
        "backfill scheduled"
    );

    run_collector(
        feed,
        store.clone(),
        config.collector_settings(),
        rx,
        shutdown_signal(),
    )
    .await;

    if let Err(e) = sched.shutdown().await {
        warn!(error = ?e, "job scheduler shutdown failed");
    }
    store.close().await?;

    info!("Shutdown complete.");
    Ok(())
}

/// One backfill pass, then exit.
pub async fn backfill(config: &Config) -> Result<()> {
    let store = price_store(config).await?;
    let feed = price_client(config)?;
    let today = Utc::now().date_naive();

    let reports = config
        .backfill_scheduler()
        .run(&feed, &store, today)
        .await;

    for report in &reports {
        match (&report.gap, &report.error) {
            (_, Some(e)) => println!("{}: failed: {e}", report.instrument),
            (None, None) => println!("{}: already current", report.instrument),
            (Some(gap), None) => println!(
                "{}: {gap} fetched {} inserted {} skipped {}",
                report.instrument, report.fetched, report.inserted, report.skipped
            ),
        }
    }

    store.close().await?;

    if reports.iter().any(|r| r.error.is_some()) {
        anyhow::bail!("backfill incomplete");
    }
    Ok(())
}

/// Current feed prices next to the most recent stored state.
pub async fn probe(config: &Config) -> Result<()> {
    let feed = price_client(config)?;

    for instrument in Instrument::ALL {
        match feed.current_bar(instrument).await {
            Ok(quote) => println!(
                "{instrument} ({}): {:.2} at {}",
                instrument.symbol(),
                quote.close,
                quote.timestamp
            ),
            Err(e) => println!("{instrument} ({}): {e}", instrument.symbol()),
        }
    }

    if config.redis_url().is_err() {
        info!("REDIS_URL not set, skipping stored state");
        return Ok(());
    }

    let store = price_store(config).await?;
    let since = Utc::now() - TimeDelta::hours(1);

    for instrument in Instrument::ALL {
        let samples = store.recent_samples(instrument, since).await?;
        let (min, max) = store.date_range(instrument).await?;

        match samples.last() {
            Some(last) => println!(
                "{instrument}: {} samples in the last hour, latest {:.2} at {}",
                samples.len(),
                last.price,
                last.timestamp
            ),
            None => println!("{instrument}: no samples in the last hour"),
        }
        match (min, max) {
            (Some(min), Some(max)) => println!("{instrument}: history {min} .. {max}"),
            _ => println!("{instrument}: no history"),
        }
    }

    if let Err(e) = store.close().await {
        error!(error = %e, "closing store failed");
    }
    Ok(())
}

/// Oldest daily bar the feed has.
pub async fn earliest(config: &Config, instrument: Instrument) -> Result<()> {
    let feed = price_client(config)?;

    match feed.earliest_bar(instrument).await? {
        Some(bar) => println!(
            "{instrument} earliest {}: open {} high {} low {} close {}",
            bar.date, bar.open, bar.high, bar.low, bar.close
        ),
        None => println!("{instrument}: no historical data available"),
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::{
            select,
            signal::unix::{SignalKind, signal},
        };

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                select! {
                    _ = sigterm.recv() => {},
                    _ = sigint.recv()  => {},
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "signal handlers unavailable, falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
