use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// One of the two tracked assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    Btc,
    Gold,
}

impl Instrument {
    pub const ALL: [Instrument; 2] = [Instrument::Btc, Instrument::Gold];

    /// Ticker understood by the chart API.
    pub fn symbol(&self) -> &'static str {
        match self {
            Instrument::Btc => "BTC-USD",
            Instrument::Gold => "GC=F",
        }
    }

    /// Lowercase name used in store keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Instrument::Btc => "btc",
            Instrument::Gold => "gold",
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instrument::Btc => f.write_str("BTC"),
            Instrument::Gold => f.write_str("GOLD"),
        }
    }
}

impl FromStr for Instrument {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "btc" | "bitcoin" | "btc-usd" => Ok(Instrument::Btc),
            "gold" | "gc=f" => Ok(Instrument::Gold),
            other => Err(format!("unknown instrument `{other}` (expected btc or gold)")),
        }
    }
}
