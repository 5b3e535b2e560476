//! End-to-end ingestion: listing fetch, per-station detail fetch, persistence.
//!
//! ```text
//! listing ──fetch+parse──▶ [entries] ──worker pool──▶ fetch detail ─▶ parse ─▶ upsert
//!                                                        │
//!                       PENDING ─▶ FETCHING_DETAIL ─▶ PERSISTED | FAILED
//! ```
//!
//! A listing-stage failure aborts the run with [`AppError::Fatal`]. Every
//! per-station failure is isolated and recorded in the [`RunSummary`].

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AppError, ErrorKind};
use crate::models::{LimitedExpress, ListingEntry};
use crate::traits::{DetailParser, Fetcher, ListingParser, StationStore};
use crate::util::{DEFAULT_NAME_SUFFIXES, dedup_entries, normalize_station_name};

pub const DEFAULT_LISTING_URL: &str = "https://www.keio.co.jp/train/station/";
pub const DEFAULT_SEARCH_URL: &str = "https://transit.yahoo.co.jp/search/result";
pub const DEFAULT_DESTINATION: &str = "新宿";

/// Configuration for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub listing_url: String,
    pub search_url: String,
    /// Fixed destination passed as `to=` on every detail request.
    pub destination: String,
    /// Size of the detail-fetch worker pool.
    pub workers: usize,
    /// Restrict the detail stage to these station names.
    pub only: Option<Vec<String>>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            listing_url: DEFAULT_LISTING_URL.to_string(),
            search_url: DEFAULT_SEARCH_URL.to_string(),
            destination: DEFAULT_DESTINATION.to_string(),
            workers: 3,
            only: None,
        }
    }
}

impl IngestConfig {
    pub fn with_listing_url(mut self, url: impl Into<String>) -> Self {
        self.listing_url = url.into();
        self
    }

    pub fn with_search_url(mut self, url: impl Into<String>) -> Self {
        self.search_url = url.into();
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_only(mut self, names: Vec<String>) -> Self {
        self.only = if names.is_empty() { None } else { Some(names) };
        self
    }
}

/// Lifecycle of a single station within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StationState {
    Pending,
    FetchingDetail,
    Persisted,
    Failed,
}

impl StationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StationState::Pending => "PENDING",
            StationState::FetchingDetail => "FETCHING_DETAIL",
            StationState::Persisted => "PERSISTED",
            StationState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StationState::Persisted | StationState::Failed)
    }

    /// Forward-only transitions. A station that never started (cancelled
    /// run) may go straight from `Pending` to `Failed`.
    pub fn can_transition_to(&self, next: StationState) -> bool {
        matches!(
            (self, next),
            (StationState::Pending, StationState::FetchingDetail)
                | (StationState::Pending, StationState::Failed)
                | (StationState::FetchingDetail, StationState::Persisted)
                | (StationState::FetchingDetail, StationState::Failed)
        )
    }
}

impl fmt::Display for StationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistedStation {
    pub name: String,
    pub limited_express: LimitedExpress,
    pub station_id: i64,
    pub time_id: i64,
    pub minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedStation {
    pub name: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone)]
enum StationOutcome {
    Persisted(PersistedStation),
    Failed(FailedStation),
}

/// Result of a run whose listing stage succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Stations persisted, in listing order.
    pub persisted: Vec<PersistedStation>,
    /// Stations that failed, in listing order.
    pub failed: Vec<FailedStation>,
}

impl RunSummary {
    pub fn persisted_count(&self) -> usize {
        self.persisted.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Names to pass back as a station filter to retry just the failures.
    pub fn failed_names(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.name.clone()).collect()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Run {} finished: PERSISTED={} FAILED={}",
            self.run_id,
            self.persisted_count(),
            self.failed_count()
        )?;
        for station in &self.persisted {
            writeln!(
                f,
                "  [PERSISTED] {}: {} min (limited express: {}, station_id={}, time_id={})",
                station.name,
                station.minutes,
                station.limited_express,
                station.station_id,
                station.time_id
            )?;
        }
        for station in &self.failed {
            writeln!(
                f,
                "  [FAILED]    {}: {} - {}",
                station.name, station.kind, station.message
            )?;
        }
        Ok(())
    }
}

/// Events emitted while a run progresses.
#[derive(Debug, Clone)]
pub enum PipelineEvent<'a> {
    RunStarted {
        run_id: Uuid,
        listing_url: &'a str,
    },
    ListingParsed {
        entries: usize,
    },
    StationMissing {
        name: &'a str,
    },
    StationTransition {
        name: &'a str,
        from: StationState,
        to: StationState,
    },
    StationPersisted {
        station: &'a PersistedStation,
    },
    StationFailed {
        name: &'a str,
        error: &'a AppError,
    },
    RunFinished {
        summary: &'a RunSummary,
    },
}

/// Receives pipeline events (decoupled logging).
pub trait PipelineReporter: Send + Sync {
    fn report(&self, event: PipelineEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPipelineReporter;

impl PipelineReporter for TracingPipelineReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        match event {
            PipelineEvent::RunStarted {
                run_id,
                listing_url,
            } => {
                tracing::info!(%run_id, %listing_url, "Ingestion run started");
            }
            PipelineEvent::ListingParsed { entries } => {
                tracing::info!(%entries, "Listing parsed");
            }
            PipelineEvent::StationMissing { name } => {
                tracing::warn!(%name, "Requested station not present in listing");
            }
            PipelineEvent::StationTransition { name, from, to } => {
                tracing::debug!(%name, %from, %to, "Station state changed");
            }
            PipelineEvent::StationPersisted { station } => {
                tracing::info!(
                    name = %station.name,
                    minutes = station.minutes,
                    station_id = station.station_id,
                    time_id = station.time_id,
                    "Station persisted"
                );
            }
            PipelineEvent::StationFailed { name, error } => {
                tracing::warn!(%name, kind = %error.kind(), %error, "Station failed");
            }
            PipelineEvent::RunFinished { summary } => {
                tracing::info!(
                    run_id = %summary.run_id,
                    persisted = summary.persisted_count(),
                    failed = summary.failed_count(),
                    "Ingestion run finished"
                );
            }
        }
    }
}

/// Orchestrates listing fetch, per-station detail fetch, and persistence.
///
/// Generic over all external dependencies via traits, so tests can inject
/// mocks for HTTP, parsing, and storage.
pub struct IngestService<F, L, D, S>
where
    F: Fetcher,
    L: ListingParser,
    D: DetailParser,
    S: StationStore,
{
    fetcher: F,
    listing_parser: L,
    detail_parser: D,
    store: S,
    config: IngestConfig,
}

impl<F, L, D, S> IngestService<F, L, D, S>
where
    F: Fetcher,
    L: ListingParser,
    D: DetailParser,
    S: StationStore,
{
    pub fn new(
        fetcher: F,
        listing_parser: L,
        detail_parser: D,
        store: S,
        config: IngestConfig,
    ) -> Self {
        Self {
            fetcher,
            listing_parser,
            detail_parser,
            store,
            config,
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Fetch and parse the listing page. Any failure here is fatal.
    pub async fn fetch_listing(&self) -> Result<Vec<ListingEntry>, AppError> {
        let response = self
            .fetcher
            .fetch(&self.config.listing_url, &[])
            .await
            .map_err(AppError::fatal)?;
        tracing::debug!(bytes = response.body.len(), "Fetched listing page");

        let entries = self
            .listing_parser
            .parse_listing(&response.body)
            .map_err(AppError::fatal)?;

        Ok(dedup_entries(entries))
    }

    /// Run the full pipeline.
    ///
    /// 1. Fetch and parse the listing (fatal on failure)
    /// 2. Fetch, parse and persist each station through the worker pool
    /// 3. Summarize persisted and failed stations
    pub async fn run<R: PipelineReporter>(
        &self,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> Result<RunSummary, AppError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        reporter.report(PipelineEvent::RunStarted {
            run_id,
            listing_url: &self.config.listing_url,
        });

        let entries = self.fetch_listing().await?;
        reporter.report(PipelineEvent::ListingParsed {
            entries: entries.len(),
        });
        let entries = self.apply_filter(entries, reporter);

        let total = entries.len();
        let queue = Mutex::new(entries.into_iter().enumerate().collect::<VecDeque<_>>());
        let workers = self.config.workers.clamp(1, total.max(1));

        let mut outcomes: Vec<(usize, StationOutcome)> = futures::future::join_all(
            (0..workers).map(|worker| self.worker_loop(worker, &queue, cancel, reporter)),
        )
        .await
        .into_iter()
        .flatten()
        .collect();

        // Whatever was still queued when the run was cancelled.
        let abandoned: Vec<_> = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for (index, entry) in abandoned {
            let outcome = self.fail(&entry, StationState::Pending, AppError::Cancelled, reporter);
            outcomes.push((index, outcome));
        }

        outcomes.sort_by_key(|(index, _)| *index);

        let mut persisted = Vec::new();
        let mut failed = Vec::new();
        for (_, outcome) in outcomes {
            match outcome {
                StationOutcome::Persisted(station) => persisted.push(station),
                StationOutcome::Failed(station) => failed.push(station),
            }
        }

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            persisted,
            failed,
        };
        reporter.report(PipelineEvent::RunFinished { summary: &summary });
        Ok(summary)
    }

    fn apply_filter<R: PipelineReporter>(
        &self,
        entries: Vec<ListingEntry>,
        reporter: &R,
    ) -> Vec<ListingEntry> {
        let Some(only) = &self.config.only else {
            return entries;
        };

        // Requested names go through the same normalization as listing names.
        let wanted: Vec<(&str, Option<String>)> = only
            .iter()
            .map(|name| (name.as_str(), normalize_station_name(name, DEFAULT_NAME_SUFFIXES)))
            .collect();
        let present: HashSet<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        for (raw, normalized) in &wanted {
            if !normalized.as_deref().is_some_and(|n| present.contains(n)) {
                reporter.report(PipelineEvent::StationMissing { name: raw });
            }
        }
        let wanted: HashSet<&str> = wanted
            .iter()
            .filter_map(|(_, normalized)| normalized.as_deref())
            .collect();

        entries
            .into_iter()
            .filter(|entry| wanted.contains(entry.name.as_str()))
            .collect()
    }

    async fn worker_loop<R: PipelineReporter>(
        &self,
        worker: usize,
        queue: &Mutex<VecDeque<(usize, ListingEntry)>>,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> Vec<(usize, StationOutcome)> {
        let mut done = Vec::new();
        loop {
            if cancel.is_cancelled() {
                tracing::debug!(worker, "Worker stopping on cancellation");
                break;
            }

            let next = queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some((index, entry)) = next else {
                break;
            };

            let outcome = self.process_station(&entry, cancel, reporter).await;
            done.push((index, outcome));
        }
        done
    }

    async fn process_station<R: PipelineReporter>(
        &self,
        entry: &ListingEntry,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> StationOutcome {
        reporter.report(PipelineEvent::StationTransition {
            name: &entry.name,
            from: StationState::Pending,
            to: StationState::FetchingDetail,
        });

        match self.ingest_station(entry, cancel).await {
            Ok(station) => {
                reporter.report(PipelineEvent::StationTransition {
                    name: &entry.name,
                    from: StationState::FetchingDetail,
                    to: StationState::Persisted,
                });
                reporter.report(PipelineEvent::StationPersisted { station: &station });
                StationOutcome::Persisted(station)
            }
            Err(e) => self.fail(entry, StationState::FetchingDetail, e, reporter),
        }
    }

    fn fail<R: PipelineReporter>(
        &self,
        entry: &ListingEntry,
        from: StationState,
        error: AppError,
        reporter: &R,
    ) -> StationOutcome {
        debug_assert!(from.can_transition_to(StationState::Failed));
        reporter.report(PipelineEvent::StationTransition {
            name: &entry.name,
            from,
            to: StationState::Failed,
        });
        reporter.report(PipelineEvent::StationFailed {
            name: &entry.name,
            error: &error,
        });
        StationOutcome::Failed(FailedStation {
            name: entry.name.clone(),
            kind: error.kind(),
            message: error.to_string(),
        })
    }

    /// Detail fetch, parse and upsert for one station.
    ///
    /// Cancellation only interrupts the fetch. Once a page is in hand the
    /// upsert runs to completion, so the summary never reports a station as
    /// failed whose rows were committed.
    async fn ingest_station(
        &self,
        entry: &ListingEntry,
        cancel: &CancellationToken,
    ) -> Result<PersistedStation, AppError> {
        let params = [
            ("from", entry.name.as_str()),
            ("to", self.config.destination.as_str()),
        ];
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AppError::Cancelled),
            response = self.fetcher.fetch(&self.config.search_url, &params) => response?,
        };
        let minutes = self.detail_parser.parse_detail(&response.body)?;
        let (station_id, time_id) = self
            .store
            .upsert_station_with_measurement(&entry.name, entry.limited_express, minutes)
            .await?;

        Ok(PersistedStation {
            name: entry.name.clone(),
            limited_express: entry.limited_express,
            station_id,
            time_id,
            minutes,
        })
    }
}
