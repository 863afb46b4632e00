use chrono::NaiveDate;
use thiserror::Error as ThisError;

use crate::Instrument;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Network failure, timeout, bad status or malformed payload from the feed.
    #[error("{instrument} feed unavailable during {operation}: {reason}")]
    FeedUnavailable {
        instrument: Instrument,
        operation: &'static str,
        reason: String,
    },

    #[error("store unavailable during {operation}: {reason}")]
    StoreUnavailable {
        operation: &'static str,
        reason: String,
    },

    #[error("invalid date range [{start}, {end})")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
}

impl Error {
    pub(crate) fn feed(
        instrument: Instrument,
        operation: &'static str,
        reason: impl ToString,
    ) -> Self {
        Error::FeedUnavailable {
            instrument,
            operation,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn store(operation: &'static str, reason: impl ToString) -> Self {
        Error::StoreUnavailable {
            operation,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
