use std::collections::VecDeque;

use chrono::NaiveDate;
use tracing::{debug, info, instrument, warn};
use tracing_futures::Instrument as _;

use crate::{Gap, GapResolver, HistoryBar, Instrument, PriceFeed, Result, TimeSeriesStore};

/// Bars fetched for one instrument and not yet written.
#[derive(Debug)]
pub struct BackfillPlan {
    instrument: Instrument,
    gap: Gap,
    pending: VecDeque<HistoryBar>,
    fetched: usize,
    inserted: usize,
    skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub skipped: usize,
}

/// How a backfill went for one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentReport {
    pub instrument: Instrument,
    /// `None` when history was already current.
    pub gap: Option<Gap>,
    pub fetched: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub error: Option<String>,
}

impl BackfillPlan {
    pub fn asset(&self) -> Instrument {
        self.instrument
    }

    pub fn gap(&self) -> Gap {
        self.gap
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_empty()
    }

    /// Upsert up to `limit` bars, oldest first. Each upsert commits on its own,
    /// so a failure leaves every earlier bar stored and the failed one queued.
    pub async fn apply_batch(
        &mut self,
        store: &dyn TimeSeriesStore,
        limit: usize,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        for _ in 0..limit.max(1) {
            let Some(bar) = self.pending.pop_front() else {
                break;
            };

            match store.upsert_bar(&bar).await {
                Ok(true) => outcome.inserted += 1,
                Ok(false) => outcome.skipped += 1,
                Err(e) => {
                    self.pending.push_front(bar);
                    self.inserted += outcome.inserted;
                    self.skipped += outcome.skipped;
                    return Err(e);
                }
            }
        }

        self.inserted += outcome.inserted;
        self.skipped += outcome.skipped;
        Ok(outcome)
    }

    pub fn report(&self, error: Option<String>) -> InstrumentReport {
        InstrumentReport {
            instrument: self.instrument,
            gap: Some(self.gap),
            fetched: self.fetched,
            inserted: self.inserted,
            skipped: self.skipped,
            error,
        }
    }
}

/// Closes history gaps for every instrument.
#[derive(Debug, Clone, Copy)]
pub struct BackfillScheduler {
    resolver: GapResolver,
    batch_size: usize,
}

impl BackfillScheduler {
    pub fn new(resolver: GapResolver, batch_size: usize) -> Self {
        Self {
            resolver,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Resolve the gap for one instrument and fetch the bars covering it.
    /// `None` means history is already current.
    pub async fn plan(
        &self,
        feed: &dyn PriceFeed,
        store: &dyn TimeSeriesStore,
        instrument: Instrument,
        today: NaiveDate,
    ) -> Result<Option<BackfillPlan>> {
        let gap = self.resolver.resolve_for(store, instrument, today).await?;

        if gap.is_empty() {
            debug!(%gap, "history is current");
            return Ok(None);
        }

        let bars = feed.daily_series(instrument, gap.start, gap.end).await?;

        if bars.is_empty() {
            info!(%gap, days = gap.days(), "feed returned no daily bars");
        } else {
            info!(%gap, days = gap.days(), bars = bars.len(), "fetched daily bars");
        }

        Ok(Some(BackfillPlan {
            instrument,
            gap,
            fetched: bars.len(),
            pending: bars.into(),
            inserted: 0,
            skipped: 0,
        }))
    }

    /// Plan every instrument. A failure for one instrument is reported and
    /// does not stop the others.
    #[instrument(name = "backfill_prepare", skip_all, fields(%today))]
    pub async fn prepare(
        &self,
        feed: &dyn PriceFeed,
        store: &dyn TimeSeriesStore,
        today: NaiveDate,
    ) -> (Vec<BackfillPlan>, Vec<InstrumentReport>) {
        let mut plans = Vec::new();
        let mut reports = Vec::new();

        for instrument in Instrument::ALL {
            let span = tracing::info_span!("backfill", instrument = %instrument);

            match self
                .plan(feed, store, instrument, today)
                .instrument(span)
                .await
            {
                Ok(Some(plan)) => plans.push(plan),
                Ok(None) => reports.push(InstrumentReport {
                    instrument,
                    gap: None,
                    fetched: 0,
                    inserted: 0,
                    skipped: 0,
                    error: None,
                }),
                Err(e) => {
                    warn!(%instrument, operation = "plan", error = %e, "backfill skipped");
                    reports.push(InstrumentReport {
                        instrument,
                        gap: None,
                        fetched: 0,
                        inserted: 0,
                        skipped: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        (plans, reports)
    }

    /// Plan and write everything in one go.
    pub async fn run(
        &self,
        feed: &dyn PriceFeed,
        store: &dyn TimeSeriesStore,
        today: NaiveDate,
    ) -> Vec<InstrumentReport> {
        let (plans, mut reports) = self.prepare(feed, store, today).await;

        for mut plan in plans {
            let error = loop {
                if plan.is_done() {
                    break None;
                }
                if let Err(e) = plan.apply_batch(store, self.batch_size).await {
                    warn!(
                        instrument = %plan.asset(),
                        operation = "upsert_bar",
                        gap = %plan.gap(),
                        remaining = plan.remaining(),
                        error = %e,
                        "backfill aborted"
                    );
                    break Some(e.to_string());
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
            reports.push(report);
        }

        reports.sort_by_key(|r| r.instrument);
        reports
    }
}
