use std::{env::var, fmt::Display, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{NaiveDate, TimeDelta};
use chrono_tz::Tz;
use market::{BackfillScheduler, CollectorSettings, GapResolver, RetentionPruner};

#[derive(Clone, Debug)]
pub struct Config {
    redis_url: Option<String>,
    pub key_prefix: String,
    pub feed_base_url: String,
    pub feed_timeout: Duration,
    pub sample_interval: Duration,
    pub retention: TimeDelta,
    pub backfill_cron: String,
    pub backfill_tz: Tz,
    pub backfill_batch: usize,
    pub earliest_date: NaiveDate,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let sample_secs: f64 = parse_or(get("SAMPLE_INTERVAL_SECS"), "SAMPLE_INTERVAL_SECS", 1.0)?;
        if !sample_secs.is_finite() || sample_secs <= 0.0 {
            bail!("SAMPLE_INTERVAL_SECS must be positive, got {sample_secs}");
        }

        let timeout_secs: u64 = parse_or(get("FEED_TIMEOUT_SECS"), "FEED_TIMEOUT_SECS", 10)?;
        if timeout_secs == 0 {
            bail!("FEED_TIMEOUT_SECS must be positive, got 0");
        }

        let retention_hours: i64 = parse_or(get("RETENTION_HOURS"), "RETENTION_HOURS", 25)?;
        if retention_hours < 0 {
            bail!("RETENTION_HOURS must not be negative, got {retention_hours}");
        }

        Ok(Self {
            redis_url: get("REDIS_URL"),
            key_prefix: get("REDIS_KEY_PREFIX").unwrap_or_else(|| "prices".to_string()),
            feed_base_url: get("FEED_BASE_URL")
                .unwrap_or_else(|| "https://query1.finance.yahoo.com".to_string()),
            feed_timeout: Duration::from_secs(timeout_secs),
            sample_interval: Duration::from_secs_f64(sample_secs),
            retention: TimeDelta::hours(retention_hours),
            backfill_cron: get("BACKFILL_CRON").unwrap_or_else(|| "0 0 0,12 * * *".to_string()),
            backfill_tz: get("BACKFILL_TZ")
                .map(|tz| {
                    tz.parse::<Tz>()
                        .map_err(|e| anyhow!("BACKFILL_TZ `{tz}` is not a timezone: {e}"))
                })
                .transpose()?
                .unwrap_or(Tz::UTC),
            backfill_batch: parse_or(get("BACKFILL_BATCH"), "BACKFILL_BATCH", 250)?,
            earliest_date: parse_or(
                get("EARLIEST_DATE"),
                "EARLIEST_DATE",
                NaiveDate::from_ymd_opt(2015, 1, 1).unwrap_or(NaiveDate::MIN),
            )?,
        })
    }

    pub fn redis_url(&self) -> Result<&str> {
        self.redis_url
            .as_deref()
            .context("REDIS_URL environment variable not set")
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            sample_interval: self.sample_interval,
            pruner: RetentionPruner::new(self.retention),
            backfill: self.backfill_scheduler(),
        }
    }

    pub fn backfill_scheduler(&self) -> BackfillScheduler {
        BackfillScheduler::new(GapResolver::new(self.earliest_date), self.backfill_batch)
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{key} has invalid value `{raw}`: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_service_contract() {
        let config = config(&[]).unwrap();

        assert_eq!(config.sample_interval, Duration::from_secs(1));
        assert_eq!(config.retention, TimeDelta::hours(25));
        assert_eq!(config.backfill_cron, "0 0 0,12 * * *");
        assert_eq!(config.backfill_tz, Tz::UTC);
        assert_eq!(config.earliest_date, NaiveDate::from_ymd_opt(2015, 1, 1).unwrap());
        assert!(config.redis_url().is_err());
    }

    #[test]
    fn reads_overrides() {
        let config = config(&[
            ("REDIS_URL", "redis://localhost:6379"),
            ("SAMPLE_INTERVAL_SECS", "0.5"),
            ("RETENTION_HOURS", "48"),
            ("BACKFILL_TZ", "America/New_York"),
            ("EARLIEST_DATE", "2014-09-17"),
        ])
        .unwrap();

        assert_eq!(config.redis_url().unwrap(), "redis://localhost:6379");
        assert_eq!(config.sample_interval, Duration::from_millis(500));
        assert_eq!(config.collector_settings().pruner.window(), TimeDelta::hours(48));
        assert_eq!(config.backfill_tz, chrono_tz::America::New_York);
        assert_eq!(config.earliest_date, NaiveDate::from_ymd_opt(2014, 9, 17).unwrap());
    }

    #[test]
    fn rejects_bad_values_with_the_variable_name() {
        let err = config(&[("SAMPLE_INTERVAL_SECS", "0")]).unwrap_err();
        assert!(err.to_string().contains("SAMPLE_INTERVAL_SECS"));

        let err = config(&[("FEED_TIMEOUT_SECS", "0")]).unwrap_err();
        assert!(err.to_string().contains("FEED_TIMEOUT_SECS"));

        let err = config(&[("EARLIEST_DATE", "yesterday")]).unwrap_err();
        assert!(err.to_string().contains("EARLIEST_DATE"));

        let err = config(&[("BACKFILL_TZ", "Mars/Olympus")]).unwrap_err();
        assert!(err.to_string().contains("BACKFILL_TZ"));
    }
}
