use std::fmt;

use chrono::{Days, NaiveDate};

use crate::{Instrument, Result, TimeSeriesStore};

/// Stored history coverage for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Coverage {
    pub min: Option<NaiveDate>,
    pub max: Option<NaiveDate>,
}

/// Half-open date range `[start, end)` still missing from history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Gap {
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn days(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            (self.end - self.start).num_days() as u64
        }
    }
}

impl fmt::Display for Gap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GapResolver {
    earliest: NaiveDate,
}

impl GapResolver {
    pub fn new(earliest: NaiveDate) -> Self {
        Self { earliest }
    }

    /// Range to backfill given what is stored and today's UTC date.
    ///
    /// Resumes the day after the newest stored date, never before the
    /// earliest supported date, and stops before today.
    pub fn resolve(&self, coverage: Coverage, today: NaiveDate) -> Gap {
        let start = match coverage.max {
            None => self.earliest,
            Some(max) => max
                .checked_add_days(Days::new(1))
                .unwrap_or(NaiveDate::MAX)
                .max(self.earliest),
        };

        Gap { start, end: today }
    }

    pub async fn resolve_for(
        &self,
        store: &dyn TimeSeriesStore,
        instrument: Instrument,
        today: NaiveDate,
    ) -> Result<Gap> {
        let (min, max) = store.date_range(instrument).await?;
        Ok(self.resolve(Coverage { min, max }, today))
    }
}
