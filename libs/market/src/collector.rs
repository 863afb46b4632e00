use std::{collections::VecDeque, future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{
    BackfillPlan, BackfillScheduler, Error, PriceFeed, RetentionPruner, TimeSeriesStore,
    sample_tick,
};

/// Why a backfill pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillTrigger {
    Startup,
    Scheduled,
}

#[derive(Debug, Clone, Copy)]
pub struct CollectorSettings {
    pub sample_interval: Duration,
    pub pruner: RetentionPruner,
    pub backfill: BackfillScheduler,
}

/// Drive sampling and backfill from one task until `shutdown` resolves.
///
/// Priority on each turn is: stop, sampling tick, backfill trigger, then one
/// batch of pending backfill writes. The turn after a tick never ticks, so a
/// feed slower than the interval still lets triggers and batches through.
/// Work already started always runs to completion before the stop is
/// observed, so no write is left half-done.
pub async fn run_collector(
    feed: Arc<dyn PriceFeed>,
    store: Arc<dyn TimeSeriesStore>,
    settings: CollectorSettings,
    mut triggers: mpsc::Receiver<BackfillTrigger>,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);

    let mut tick = tokio::time::interval(settings.sample_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut pending: VecDeque<BackfillPlan> = VecDeque::new();
    let mut ticked = false;
    let mut ticks: u64 = 0;
    let mut failed_ticks: u64 = 0;

    info!(
        interval_ms = settings.sample_interval.as_millis() as u64,
        retention_hours = settings.pruner.window().num_hours(),
        "collector started"
    );

    loop {
        let yield_turn = std::mem::take(&mut ticked);

        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("stop requested");
                break;
            }

            _ = tick.tick(), if !yield_turn => {
                ticks += 1;
                ticked = true;
                let started = Utc::now();

                match sample_tick(feed.as_ref(), store.as_ref(), &settings.pruner, started).await {
                    Ok(outcome) => {
                        debug!(timestamp = %outcome.timestamp, pruned = outcome.pruned, "tick stored");
                    }
                    Err(e) => {
                        failed_ticks += 1;
                        log_tick_failure(&e, started);
                    }
                }
            }

            Some(trigger) = triggers.recv() => {
                if !pending.is_empty() {
                    debug!(?trigger, "backfill already in progress, trigger ignored");
                    continue;
                }

                let today = Utc::now().date_naive();
                info!(?trigger, %today, "backfill started");

                let (plans, reports) = settings
                    .backfill
                    .prepare(feed.as_ref(), store.as_ref(), today)
                    .await;

                for report in reports.iter().filter(|r| r.error.is_none()) {
                    info!(instrument = %report.instrument, "history is current");
                }
                pending.extend(plans);
            }

            _ = std::future::ready(()), if !pending.is_empty() => {
                apply_next_batch(&mut pending, store.as_ref(), settings.backfill.batch_size()).await;
            }

            // nothing but the tick was ready
            _ = std::future::ready(()), if yield_turn => {}
        }
    }

    if !pending.is_empty() {
        info!(
            instruments = pending.len(),
            "unfinished backfill dropped, it resumes on next start"
        );
    }
    info!(ticks, failed_ticks, "collector stopped");
}

/// Write one batch of the oldest pending plan, retiring it once it is done
/// or a write fails.
async fn apply_next_batch(
    pending: &mut VecDeque<BackfillPlan>,
    store: &dyn TimeSeriesStore,
    batch_size: usize,
) {
    let Some(plan) = pending.front_mut() else {
        return;
    };

    let error = match plan.apply_batch(store, batch_size).await {
        Ok(_) if !plan.is_done() => return,
        Ok(_) => None,
        Err(e) => {
            warn!(
                instrument = %plan.asset(),
                operation = "upsert_bar",
                gap = %plan.gap(),
                remaining = plan.remaining(),
                error = %e,
                "backfill aborted until next cadence"
            );
            Some(e.to_string())
        }
    };

    let report = plan.report(error);
    info!(
        instrument = %report.instrument,
        fetched = report.fetched,
        inserted = report.inserted,
        skipped = report.skipped,
        "backfill finished"
    );
    pending.pop_front();
}

fn log_tick_failure(e: &Error, started: chrono::DateTime<Utc>) {
    match e {
        Error::FeedUnavailable {
            instrument,
            operation,
            reason,
        } => warn!(%instrument, operation, %reason, %started, "tick skipped"),
        Error::StoreUnavailable { operation, reason } => {
            error!(operation, %reason, %started, "tick not stored")
        }
        other => warn!(error = %other, %started, "tick skipped"),
    }
}
