use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, USER_AGENT},
};
use serde::Deserialize;

use crate::{Error, HistoryBar, Instrument, Quote, Result};

#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Close of the most recent intraday bar.
    async fn current_bar(&self, instrument: Instrument) -> Result<Quote>;

    /// Daily bars for `[start, end)`, ordered by date. An empty vec means the
    /// feed has nothing for that range.
    async fn daily_series(
        &self,
        instrument: Instrument,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HistoryBar>>;

    /// Oldest daily bar the feed knows about.
    async fn earliest_bar(&self, instrument: Instrument) -> Result<Option<HistoryBar>>;
}

#[derive(Clone)]
pub struct PriceClient {
    client: Client,
    base_api: String,
}

impl PriceClient {
    pub fn new(base_api: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        // the chart endpoint rejects requests without a browser-like agent
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0 (X11; Linux x86_64) price-collector"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self { client, base_api })
    }

    async fn fetch_chart(
        &self,
        instrument: Instrument,
        operation: &'static str,
        query: &[(&str, String)],
    ) -> Result<ChartResult> {
        let url = format!(
            "{}/v8/finance/chart/{}",
            self.base_api.trim_end_matches('/'),
            instrument.symbol()
        );

        let res: ChartResponse = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::feed(instrument, operation, e))?
            .json()
            .await
            .map_err(|e| Error::feed(instrument, operation, e))?;

        res.into_result()
            .map_err(|reason| Error::feed(instrument, operation, reason))
    }
}

#[async_trait]
impl PriceFeed for PriceClient {
    async fn current_bar(&self, instrument: Instrument) -> Result<Quote> {
        let chart = self
            .fetch_chart(
                instrument,
                "current_bar",
                &[("interval", "1m".into()), ("range", "1d".into())],
            )
            .await?;

        chart
            .last_quote(instrument)
            .ok_or_else(|| Error::feed(instrument, "current_bar", "no intraday data points"))
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

        let chart = self
            .fetch_chart(
                instrument,
                "daily_series",
                &[
                    ("interval", "1d".into()),
                    ("period1", midnight_ts(start).to_string()),
                    ("period2", midnight_ts(end).to_string()),
                ],
            )
            .await?;

        Ok(chart
            .daily_bars(instrument)
            .into_iter()
            .filter(|bar| bar.date >= start && bar.date < end)
            .collect())
    }

    async fn earliest_bar(&self, instrument: Instrument) -> Result<Option<HistoryBar>> {
        // range=max silently widens the interval, so ask for daily bars from the epoch
        let chart = self
            .fetch_chart(
                instrument,
                "earliest_bar",
                &[
                    ("interval", "1d".into()),
                    ("period1", "0".into()),
                    ("period2", Utc::now().timestamp().to_string()),
                ],
            )
            .await?;

        Ok(chart.daily_bars(instrument).into_iter().next())
    }
}

fn midnight_ts(date: NaiveDate) -> i64 {
    date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp()
}

//
// Match Yahoo chart API JSON
// /v8/finance/chart/{symbol}
//
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,

    #[serde(default)]
    timestamp: Vec<i64>,

    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,

    exchange_timezone_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,

    #[serde(default)]
    high: Vec<Option<f64>>,

    #[serde(default)]
    low: Vec<Option<f64>>,

    #[serde(default)]
    close: Vec<Option<f64>>,
}

impl ChartResponse {
    fn into_result(self) -> Result<ChartResult, String> {
        if let Some(err) = self.chart.error {
            return Err(format!("{}: {}", err.code, err.description));
        }

        self.chart
            .result
            .and_then(|mut r| if r.is_empty() { None } else { Some(r.swap_remove(0)) })
            .ok_or_else(|| "empty chart result".to_string())
    }
}

impl ChartResult {
    fn series(&self) -> Option<&QuoteSeries> {
        self.indicators.quote.first()
    }

    fn last_quote(&self, instrument: Instrument) -> Option<Quote> {
        let series = self.series()?;

        self.timestamp
            .iter()
            .zip(series.close.iter())
            .rev()
            .find_map(|(ts, close)| {
                let close = (*close)?;
                let timestamp = DateTime::from_timestamp(*ts, 0)?;
                Some(Quote {
                    instrument,
                    timestamp,
                    close,
                })
            })
    }

    /// Trading date of a bar timestamp, in the exchange's own calendar.
    fn trading_date(&self, ts: i64) -> Option<NaiveDate> {
        let utc = DateTime::from_timestamp(ts, 0)?;

        match self
            .meta
            .exchange_timezone_name
            .as_deref()
            .and_then(|name| name.parse::<Tz>().ok())
        {
            Some(tz) => Some(utc.with_timezone(&tz).date_naive()),
            None => DateTime::from_timestamp(ts + self.meta.gmtoffset, 0).map(|t| t.date_naive()),
        }
    }

    fn daily_bars(&self, instrument: Instrument) -> Vec<HistoryBar> {
        let Some(series) = self.series() else {
            return Vec::new();
        };

        let mut bars: Vec<HistoryBar> = Vec::with_capacity(self.timestamp.len());

        for (i, ts) in self.timestamp.iter().enumerate() {
            let value = |v: &Vec<Option<f64>>| v.get(i).copied().flatten();

            let (Some(open), Some(high), Some(low), Some(close)) = (
                value(&series.open),
                value(&series.high),
                value(&series.low),
                value(&series.close),
            ) else {
                continue;
            };

            let Some(date) = self.trading_date(*ts) else {
                continue;
            };

            // the live session can show up as a second row for the same date
            if bars.last().is_some_and(|b| b.date == date) {
                continue;
            }

            bars.push(HistoryBar {
                instrument,
                date,
                open,
                high,
                low,
                close,
            });
        }

        bars
    }
}
