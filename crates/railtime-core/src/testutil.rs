//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests. All mocks use
//! `Arc<Mutex<_>>` for interior mutability, allowing assertions on recorded
//! calls. Other crates enable them through the `testutil` feature.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::error::AppError;
use crate::models::{FetchResponse, LimitedExpress, ListingEntry, Station, TravelTime};
use crate::pipeline::{PipelineEvent, PipelineReporter};
use crate::traits::{DetailParser, Fetcher, ListingParser, StationStore};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// One recorded `fetch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub url: String,
    pub params: Vec<(String, String)>,
}

impl RecordedCall {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

type Responses = VecDeque<Result<FetchResponse, AppError>>;

/// Mock fetcher with a response queue and optional per-station routes.
///
/// A call whose `from` parameter (or, without one, whose URL) matches a
/// route pops that route's next response. Otherwise the shared queue is
/// popped; once it is empty a default HTML page is returned.
#[derive(Clone)]
pub struct MockFetcher {
    responses: Arc<Mutex<Responses>>,
    routes: Arc<Mutex<HashMap<String, Responses>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockFetcher {
    pub fn new(html: &str) -> Self {
        Self::with_responses(vec![Ok(FetchResponse::ok(html))])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<FetchResponse, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            routes: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fetcher with no queued responses; add routes with [`route`](Self::route).
    pub fn routed() -> Self {
        Self::with_responses(vec![])
    }

    pub fn route(
        self,
        key: impl Into<String>,
        responses: Vec<Result<FetchResponse, AppError>>,
    ) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(key.into(), responses.into());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, params: &[(&str, &str)]) -> Result<FetchResponse, AppError> {
        let call = RecordedCall {
            url: url.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        let key = call.param("from").unwrap_or(url).to_string();
        self.calls.lock().unwrap().push(call);

        if let Some(response) = self
            .routes
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            return response;
        }

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(FetchResponse::ok("<html><body>default</body></html>")))
    }
}

// ---------------------------------------------------------------------------
// MockListingParser / MockDetailParser
// ---------------------------------------------------------------------------

/// Listing parser that returns a fixed set of entries.
#[derive(Clone)]
pub struct MockListingParser {
    entries: Vec<ListingEntry>,
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockListingParser {
    pub fn new(entries: Vec<ListingEntry>) -> Self {
        Self {
            entries,
            error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_error(error: AppError) -> Self {
        Self {
            entries: vec![],
            error: Arc::new(Mutex::new(Some(error))),
        }
    }
}

impl ListingParser for MockListingParser {
    fn parse_listing(&self, _html: &str) -> Result<Vec<ListingEntry>, AppError> {
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        Ok(self.entries.clone())
    }
}

/// Detail parser that reads the whole body as a number of minutes.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockDetailParser;

impl DetailParser for MockDetailParser {
    fn parse_detail(&self, html: &str) -> Result<u32, AppError> {
        html.trim()
            .parse()
            .map_err(|_| AppError::Parse(format!("not a number: {html}")))
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// In-memory store with the same upsert semantics as the SQL repository.
#[derive(Clone, Default)]
pub struct MockStore {
    stations: Arc<Mutex<Vec<Station>>>,
    travel_times: Arc<Mutex<Vec<TravelTime>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl MockStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fail every upsert for `name` with a persistence error.
    pub fn failing_for(self, name: &str) -> Self {
        self.failing.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn stations(&self) -> Vec<Station> {
        self.stations.lock().unwrap().clone()
    }

    pub fn travel_times(&self) -> Vec<TravelTime> {
        self.travel_times.lock().unwrap().clone()
    }
}

impl StationStore for MockStore {
    async fn ensure_schema(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn upsert_station_with_measurement(
        &self,
        name: &str,
        limited_express: LimitedExpress,
        minutes: u32,
    ) -> Result<(i64, i64), AppError> {
        if self.failing.lock().unwrap().contains(name) {
            return Err(AppError::Persistence(format!("write refused for {name}")));
        }
        if minutes == 0 {
            return Err(AppError::Persistence("minutes must be positive".into()));
        }

        let mut stations = self.stations.lock().unwrap();
        let station_id = match stations.iter_mut().find(|s| s.name == name) {
            Some(station) => {
                station.limited_express = station.limited_express.merge(limited_express);
                station.station_id
            }
            None => {
                let station_id = stations.len() as i64 + 1;
                stations.push(Station {
                    station_id,
                    name: name.to_string(),
                    limited_express,
                });
                station_id
            }
        };

        let mut travel_times = self.travel_times.lock().unwrap();
        let time_id = travel_times.len() as i64 + 1;
        travel_times.push(TravelTime {
            time_id,
            station_id,
            minutes,
            measured_at: Utc::now(),
        });

        Ok((station_id, time_id))
    }

    async fn latest_measurement(&self, station_id: i64) -> Result<Option<TravelTime>, AppError> {
        Ok(self
            .travel_times
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.station_id == station_id)
            .max_by_key(|t| (t.measured_at, t.time_id))
            .cloned())
    }

    async fn all_stations(&self) -> Result<Vec<Station>, AppError> {
        Ok(self.stations())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock pipeline reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl PipelineReporter for MockReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        let label = match &event {
            PipelineEvent::RunStarted { .. } => "RunStarted",
            PipelineEvent::ListingParsed { .. } => "ListingParsed",
            PipelineEvent::StationMissing { .. } => "StationMissing",
            PipelineEvent::StationTransition { .. } => "StationTransition",
            PipelineEvent::StationPersisted { .. } => "StationPersisted",
            PipelineEvent::StationFailed { .. } => "StationFailed",
            PipelineEvent::RunFinished { .. } => "RunFinished",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}
