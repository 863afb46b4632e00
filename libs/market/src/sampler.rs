use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, instrument, warn};

use crate::{Instrument, PriceFeed, Result, RetentionPruner, TimeSeriesStore};

#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub timestamp: DateTime<Utc>,
    pub prices: Vec<(Instrument, f64)>,
    pub pruned: u64,
}

/// Fetch every instrument, append the pair under one timestamp, then prune.
///
/// `started` is when the tick began; all samples of the tick carry it,
/// truncated to whole seconds. If any fetch fails nothing is appended, but
/// the prune still runs so the window holds through a feed outage. The
/// fetch or append error wins over a prune error.
#[instrument(name = "sample_tick", skip_all, fields(timestamp = %started.trunc_subsecs(0)))]
pub async fn sample_tick(
    feed: &dyn PriceFeed,
    store: &dyn TimeSeriesStore,
    pruner: &RetentionPruner,
    started: DateTime<Utc>,
) -> Result<TickOutcome> {
    let timestamp = started.trunc_subsecs(0);

    let (btc, gold) = tokio::join!(
        feed.current_bar(Instrument::Btc),
        feed.current_bar(Instrument::Gold)
    );
    let appended = match (btc, gold) {
        (Ok(btc), Ok(gold)) => {
            let prices = vec![(Instrument::Btc, btc.close), (Instrument::Gold, gold.close)];
            store
                .append_samples(timestamp, &prices)
                .await
                .map(|()| prices)
        }
        (Err(e), _) | (_, Err(e)) => Err(e),
    };

    let pruned = pruner.prune(store, started).await;

    let prices = match appended {
        Ok(prices) => prices,
        Err(e) => {
            if let Err(prune) = &pruned {
                warn!(operation = "delete_older_than", error = %prune, "prune failed");
            }
            return Err(e);
        }
    };
    debug!(?prices, "appended samples");

    Ok(TickOutcome {
        timestamp,
        prices,
        pruned: pruned?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::Error;
    use crate::testing::{MemoryStore, ScriptedFeed, at};

    #[tokio::test]
    async fn both_samples_share_the_tick_timestamp() {
        let feed = ScriptedFeed::with_prices(42_000.0, 2_030.5);
        let store = MemoryStore::default();
        let started = at("2024-01-11T12:00:00.734Z");

        let outcome = sample_tick(&feed, &store, &RetentionPruner::default(), started)
            .await
            .unwrap();

        let samples = store.samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].timestamp, samples[1].timestamp);
        assert_eq!(samples[0].timestamp, at("2024-01-11T12:00:00Z"));
        assert_eq!(outcome.timestamp, samples[0].timestamp);
        assert_eq!(samples[0].instrument, Instrument::Btc);
        assert_eq!(samples[1].price, 2_030.5);
    }

    #[tokio::test]
    async fn one_failed_fetch_writes_nothing_and_next_tick_recovers() {
        let feed = ScriptedFeed::with_prices(42_000.0, 2_030.5);
        let store = MemoryStore::default();
        let pruner = RetentionPruner::default();
        let first = at("2024-01-11T12:00:00Z");

        feed.fail(Instrument::Gold, true);
        let err = sample_tick(&feed, &store, &pruner, first).await.unwrap_err();
        assert!(matches!(
            err,
            Error::FeedUnavailable {
                instrument: Instrument::Gold,
                ..
            }
        ));
        assert!(store.samples().is_empty());

        feed.fail(Instrument::Gold, false);
        sample_tick(&feed, &store, &pruner, first + TimeDelta::seconds(1))
            .await
            .unwrap();
        assert_eq!(store.samples().len(), 2);
    }

    #[tokio::test]
    async fn store_failure_is_reported_not_fatal() {
        let feed = ScriptedFeed::with_prices(1.0, 2.0);
        let store = MemoryStore::default();
        store.fail_writes(true);

        let err = sample_tick(&feed, &store, &RetentionPruner::default(), Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StoreUnavailable { .. }));
    }

    #[tokio::test]
    async fn prunes_after_appending() {
        let feed = ScriptedFeed::with_prices(1.0, 2.0);
        let store = MemoryStore::default();
        let now = at("2024-01-11T12:00:00Z");
        store
            .append_samples(now - TimeDelta::hours(26), &[(Instrument::Btc, 0.5)])
            .await
            .unwrap();

        let outcome = sample_tick(&feed, &store, &RetentionPruner::default(), now)
            .await
            .unwrap();

        assert_eq!(outcome.pruned, 1);
        assert_eq!(store.samples().len(), 2);
    }

    #[tokio::test]
    async fn failed_fetch_still_prunes_stale_samples() {
        let feed = ScriptedFeed::with_prices(1.0, 2.0);
        feed.fail(Instrument::Gold, true);
        let store = MemoryStore::default();
        let pruner = RetentionPruner::default();
        let now = at("2024-01-11T12:00:00Z");
        store
            .append_samples(
                now - TimeDelta::hours(72),
                &[(Instrument::Btc, 0.5), (Instrument::Gold, 0.7)],
            )
            .await
            .unwrap();
        store
            .append_samples(now - TimeDelta::hours(1), &[(Instrument::Btc, 0.9)])
            .await
            .unwrap();

        for secs in 0..3 {
            let err = sample_tick(&feed, &store, &pruner, now + TimeDelta::seconds(secs))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::FeedUnavailable { .. }));
        }

        let samples = store.samples();
        assert_eq!(samples.len(), 1);
        assert!(samples.iter().all(|s| s.timestamp >= pruner.cutoff(now)));
    }
}
