use std::future::Future;

use crate::error::AppError;
use crate::models::{FetchResponse, LimitedExpress, ListingEntry, Station, TravelTime};

/// Fetches raw HTML from a URL with optional query parameters.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> impl Future<Output = Result<FetchResponse, AppError>> + Send;
}

/// Extracts the ordered station list from listing HTML.
pub trait ListingParser: Send + Sync + Clone {
    fn parse_listing(&self, html: &str) -> Result<Vec<ListingEntry>, AppError>;
}

/// Extracts a travel time in minutes from a detail page.
pub trait DetailParser: Send + Sync + Clone {
    fn parse_detail(&self, html: &str) -> Result<u32, AppError>;
}

/// Persists stations and their travel-time measurements.
pub trait StationStore: Send + Sync + Clone {
    /// Create the Station and TravelTime tables if absent. Idempotent.
    fn ensure_schema(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Insert or reuse the station by name, then append one measurement.
    /// Returns `(station_id, time_id)`. Both writes commit together.
    fn upsert_station_with_measurement(
        &self,
        name: &str,
        limited_express: LimitedExpress,
        minutes: u32,
    ) -> impl Future<Output = Result<(i64, i64), AppError>> + Send;

    /// Most recent measurement for a station, if any.
    fn latest_measurement(
        &self,
        station_id: i64,
    ) -> impl Future<Output = Result<Option<TravelTime>, AppError>> + Send;

    fn all_stations(&self) -> impl Future<Output = Result<Vec<Station>, AppError>> + Send;
}

