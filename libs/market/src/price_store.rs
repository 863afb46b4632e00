use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use fred::prelude::*;
use fred::types::Value;
use tracing::error;

use crate::{Error, HistoryBar, Instrument, Result, Sample};

#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Append one sample per instrument under a shared timestamp.
    /// Either every sample is written or none is.
    async fn append_samples(
        &self,
        timestamp: DateTime<Utc>,
        prices: &[(Instrument, f64)],
    ) -> Result<()>;

    /// Delete samples of every instrument strictly older than `cutoff`.
    /// Returns how many were removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Oldest and newest stored history date.
    async fn date_range(
        &self,
        instrument: Instrument,
    ) -> Result<(Option<NaiveDate>, Option<NaiveDate>)>;

    /// Insert a daily bar unless its date is already stored.
    /// Returns true if it was newly added
    async fn upsert_bar(&self, bar: &HistoryBar) -> Result<bool>;

    /// Samples at or after `since`, oldest first.
    async fn recent_samples(
        &self,
        instrument: Instrument,
        since: DateTime<Utc>,
    ) -> Result<Vec<Sample>>;
}

/// Redis-backed store.
///
/// Live samples sit in one sorted set per instrument scored by unix seconds,
/// so retention is a single score-range delete. Daily bars are a hash keyed
/// by date plus a sorted date index for min/max lookups.
#[derive(Clone)]
pub struct PriceStore {
    client: Client,
    key_prefix: String,
}

impl PriceStore {
    pub async fn new(redis_url: &str, key: impl Into<String>) -> Result<Self> {
        let config = Config::from_url(redis_url).map_err(|e| Error::store("connect", e))?;

        let client = Builder::from_config(config)
            .with_connection_config(|config| {
                config.connection_timeout = Duration::from_secs(5);
                config.tcp = TcpConfig {
                    nodelay: Some(true),
                    ..Default::default()
                };
            })
            .build()
            .map_err(|e| Error::store("connect", e))?;

        client.on_error(|(error, server)| async move {
            error!(?server, ?error, "redis connection error");
            Ok(())
        });

        client.connect();
        client
            .wait_for_connect()
            .await
            .map_err(|e| Error::store("connect", e))?;

        Ok(Self {
            client,
            key_prefix: key.into(),
        })
    }

    /// Close the connection once in-flight commands have completed.
    pub async fn close(&self) -> Result<()> {
        self.client
            .quit()
            .await
            .map_err(|e| Error::store("quit", e))
    }

    fn samples_key(&self, instrument: Instrument) -> String {
        format!("{}:samples:{}", self.key_prefix, instrument.as_str())
    }

    fn history_key(&self, instrument: Instrument) -> String {
        format!("{}:history:{}", self.key_prefix, instrument.as_str())
    }

    fn history_dates_key(&self, instrument: Instrument) -> String {
        format!("{}:history:{}:dates", self.key_prefix, instrument.as_str())
    }

    async fn first_date(&self, key: &str, index: i64) -> Result<Option<NaiveDate>> {
        let members: Vec<String> = self
            .client
            .zrange(key, index, index, None, false, None, false)
            .await
            .map_err(|e| Error::store("date_range", e))?;

        members
            .first()
            .map(|m| {
                m.parse::<NaiveDate>()
                    .map_err(|e| Error::store("date_range", format!("bad date `{m}`: {e}")))
            })
            .transpose()
    }
}

fn sample_member(timestamp: i64, price: f64) -> String {
    format!("{timestamp}:{price}")
}

/// Highest sample score strictly older than `cutoff`. Scores are whole
/// seconds, so a cutoff on an exact second excludes that second.
fn score_bound(cutoff: DateTime<Utc>) -> i64 {
    if cutoff.timestamp_subsec_nanos() == 0 {
        cutoff.timestamp() - 1
    } else {
        cutoff.timestamp()
    }
}

fn parse_sample_member(instrument: Instrument, member: &str) -> Option<Sample> {
    let (ts, price) = member.split_once(':')?;
    Some(Sample {
        instrument,
        timestamp: DateTime::from_timestamp(ts.parse().ok()?, 0)?,
        price: price.parse().ok()?,
    })
}

#[async_trait]
impl TimeSeriesStore for PriceStore {
    async fn append_samples(
        &self,
        timestamp: DateTime<Utc>,
        prices: &[(Instrument, f64)],
    ) -> Result<()> {
        let ts = timestamp.timestamp();
        let trx = self.client.multi();

        for (instrument, price) in prices {
            let _: () = trx
                .zadd(
                    self.samples_key(*instrument),
                    None,
                    None,
                    false,
                    false,
                    (ts as f64, sample_member(ts, *price)),
                )
                .await
                .map_err(|e| Error::store("append_samples", e))?;
        }

        let _: Value = trx
            .exec(true)
            .await
            .map_err(|e| Error::store("append_samples", e))?;

        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let max = score_bound(cutoff);
        let trx = self.client.multi();

        for instrument in Instrument::ALL {
            let _: () = trx
                .zremrangebyscore(self.samples_key(instrument), "-inf", max)
                .await
                .map_err(|e| Error::store("delete_older_than", e))?;
        }

        let removed: Vec<i64> = trx
            .exec(true)
            .await
            .map_err(|e| Error::store("delete_older_than", e))?;

        Ok(removed.into_iter().map(|n| n.max(0) as u64).sum())
    }

    async fn date_range(
        &self,
        instrument: Instrument,
    ) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        let key = self.history_dates_key(instrument);
        let min = self.first_date(&key, 0).await?;
        let max = self.first_date(&key, -1).await?;
        Ok((min, max))
    }

    async fn upsert_bar(&self, bar: &HistoryBar) -> Result<bool> {
        let field = bar.date.format("%Y-%m-%d").to_string();
        let value = serde_json::to_string(bar).map_err(|e| Error::store("upsert_bar", e))?;

        let trx = self.client.multi();
        let _: () = trx
            .hsetnx(self.history_key(bar.instrument), field.as_str(), value)
            .await
            .map_err(|e| Error::store("upsert_bar", e))?;
        // re-adding an existing member with the same score is a no-op
        let _: () = trx
            .zadd(
                self.history_dates_key(bar.instrument),
                None,
                None,
                false,
                false,
                (f64::from(bar.date.num_days_from_ce()), field.as_str()),
            )
            .await
            .map_err(|e| Error::store("upsert_bar", e))?;

        let (added, _): (i64, i64) = trx
            .exec(true)
            .await
            .map_err(|e| Error::store("upsert_bar", e))?;

        Ok(added == 1)
    }

    async fn recent_samples(
        &self,
        instrument: Instrument,
        since: DateTime<Utc>,
    ) -> Result<Vec<Sample>> {
        let members: Vec<String> = self
            .client
            .zrangebyscore(
                self.samples_key(instrument),
                since.timestamp(),
                "+inf",
                false,
                None,
            )
            .await
            .map_err(|e| Error::store("recent_samples", e))?;

        Ok(members
            .iter()
            .filter_map(|m| parse_sample_member(instrument, m))
            .collect())
    }
}
