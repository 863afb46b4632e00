use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};

use crate::{Error, HistoryBar, Instrument, PriceFeed, Quote, Result, Sample, TimeSeriesStore};

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
}

pub fn bar(instrument: Instrument, date: NaiveDate, close: f64) -> HistoryBar {
    HistoryBar {
        instrument,
        date,
        open: close - 1.0,
        high: close + 2.0,
        low: close - 2.0,
        close,
    }
}

#[derive(Default)]
pub struct MemoryStore {
    samples: Mutex<Vec<Sample>>,
    bars: Mutex<BTreeMap<(Instrument, NaiveDate), HistoryBar>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn samples(&self) -> Vec<Sample> {
        self.samples.lock().unwrap().clone()
    }

    pub fn bars(&self, instrument: Instrument) -> Vec<HistoryBar> {
        self.bars
            .lock()
            .unwrap()
            .values()
            .filter(|b| b.instrument == instrument)
            .copied()
            .collect()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writes(&self, operation: &'static str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(Error::store(operation, "connection reset"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryStore {
    async fn append_samples(
        &self,
        timestamp: DateTime<Utc>,
        prices: &[(Instrument, f64)],
    ) -> Result<()> {
        self.check_writes("append_samples")?;
        let mut samples = self.samples.lock().unwrap();
        samples.extend(prices.iter().map(|(instrument, price)| Sample {
            instrument: *instrument,
            timestamp,
            price: *price,
        }));
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.check_writes("delete_older_than")?;
        let mut samples = self.samples.lock().unwrap();
        let before = samples.len();
        samples.retain(|s| s.timestamp >= cutoff);
        Ok((before - samples.len()) as u64)
    }

    async fn date_range(
        &self,
        instrument: Instrument,
    ) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let bars = self.bars(instrument);
        Ok((bars.first().map(|b| b.date), bars.last().map(|b| b.date)))
    }

    async fn upsert_bar(&self, bar: &HistoryBar) -> Result<bool> {
        self.check_writes("upsert_bar")?;
        let mut bars = self.bars.lock().unwrap();
        let key = (bar.instrument, bar.date);
        if bars.contains_key(&key) {
            return Ok(false);
        }
        bars.insert(key, *bar);
        Ok(true)
    }

    async fn recent_samples(
        &self,
        instrument: Instrument,
        since: DateTime<Utc>,
    ) -> Result<Vec<Sample>> {
        Ok(self
            .samples()
            .into_iter()
            .filter(|s| s.instrument == instrument && s.timestamp >= since)
            .collect())
    }
}

/// Feed whose answers are scripted per instrument. Daily series are
/// synthesised, one bar per calendar day in the requested range.
#[derive(Default)]
pub struct ScriptedFeed {
    prices: Mutex<HashMap<Instrument, f64>>,
    failing: Mutex<HashSet<Instrument>>,
    absent: Mutex<HashSet<Instrument>>,
    latency: Mutex<Option<Duration>>,
    series_calls: Mutex<Vec<(Instrument, NaiveDate, NaiveDate)>>,
}

impl ScriptedFeed {
    pub fn with_prices(btc: f64, gold: f64) -> Self {
        let feed = Self::default();
        feed.set_price(Instrument::Btc, btc);
        feed.set_price(Instrument::Gold, gold);
        feed
    }

    pub fn set_price(&self, instrument: Instrument, price: f64) {
        self.prices.lock().unwrap().insert(instrument, price);
    }

    pub fn fail(&self, instrument: Instrument, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(instrument);
        } else {
            set.remove(&instrument);
        }
    }

    pub fn no_history(&self, instrument: Instrument) {
        self.absent.lock().unwrap().insert(instrument);
    }

    /// Delay every current-bar fetch by `latency` of tokio time.
    pub fn slow(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn series_calls(&self) -> Vec<(Instrument, NaiveDate, NaiveDate)> {
        self.series_calls.lock().unwrap().clone()
    }

    fn check(&self, instrument: Instrument, operation: &'static str) -> Result<()> {
        if self.failing.lock().unwrap().contains(&instrument) {
            Err(Error::feed(instrument, operation, "operation timed out"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PriceFeed for ScriptedFeed {
    async fn current_bar(&self, instrument: Instrument) -> Result<Quote> {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.check(instrument, "current_bar")?;
        let close = self
            .prices
            .lock()
            .unwrap()
            .get(&instrument)
            .copied()
            .ok_or_else(|| Error::feed(instrument, "current_bar", "no intraday data points"))?;

        Ok(Quote {
            instrument,
            timestamp: Utc::now(),
            close,
        })
    }

    async fn daily_series(
        &self,
        instrument: Instrument,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HistoryBar>> {
        if start >= end {
            return Err(Error::InvalidRange { start, end });
        }
        self.series_calls
            .lock()
            .unwrap()
            .push((instrument, start, end));
        self.check(instrument, "daily_series")?;

        if self.absent.lock().unwrap().contains(&instrument) {
            return Ok(Vec::new());
        }

        let mut bars = Vec::new();
        let mut date = start;
        while date < end {
            bars.push(bar(instrument, date, 100.0 + bars.len() as f64));
            date = date + Days::new(1);
        }
        Ok(bars)
    }

    async fn earliest_bar(&self, instrument: Instrument) -> Result<Option<HistoryBar>> {
        self.check(instrument, "earliest_bar")?;
        Ok(Some(bar(instrument, day(2014, 9, 17), 457.33)))
    }
}
