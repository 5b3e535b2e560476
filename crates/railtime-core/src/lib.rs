pub mod error;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod throttle;
pub mod traits;
pub mod util;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use error::{AppError, ErrorKind};
pub use models::{FetchResponse, LimitedExpress, ListingEntry, Station, TravelTime};
pub use pipeline::{IngestConfig, IngestService, RunSummary, StationState};
pub use traits::{DetailParser, Fetcher, ListingParser, StationStore};
