mod backfill;
mod collector;
mod error;
mod gap;
mod instrument;
mod models;
mod price_client;
mod price_store;
mod retention;
mod sampler;

#[cfg(test)]
mod testing;

pub use backfill::{BackfillPlan, BackfillScheduler, BatchOutcome, InstrumentReport};
pub use collector::{BackfillTrigger, CollectorSettings, run_collector};
pub use error::{Error, Result};
pub use gap::{Coverage, Gap, GapResolver};
pub use instrument::Instrument;
pub use models::{HistoryBar, Quote, Sample};
pub use price_client::{PriceClient, PriceFeed};
pub use price_store::{PriceStore, TimeSeriesStore};
pub use retention::RetentionPruner;
pub use sampler::{TickOutcome, sample_tick};
