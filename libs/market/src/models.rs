use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::Instrument;

/// Latest close reported by the feed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub instrument: Instrument,
    pub timestamp: DateTime<Utc>,
    pub close: f64,
}

/// One live price observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub instrument: Instrument,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

/// One day of OHLC in the long-horizon history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryBar {
    pub instrument: Instrument,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}
