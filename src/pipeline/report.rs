// src/pipeline/report.rs

//! Per-destination and per-run outcome records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Destination, PostingSummary};

/// Lifecycle of one destination within a run.
///
/// `Pending → Fetching → (FetchFailed | Fetched) → Filtering → Delivering → Done`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationState {
    Pending,
    Fetching,
    FetchFailed,
    Fetched,
    Filtering,
    Delivering,
    Done,
}

impl fmt::Display for DestinationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Fetching => "FETCHING",
            Self::FetchFailed => "FETCH_FAILED",
            Self::Fetched => "FETCHED",
            Self::Filtering => "FILTERING",
            Self::Delivering => "DELIVERING",
            Self::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// What happened to one destination.
#[derive(Debug, Clone, Serialize)]
pub struct DestinationReport {
    pub destination_id: String,
    pub label: String,
    pub state: DestinationState,

    /// Raw listing items returned by the source
    pub fetched: usize,
    /// Items with a title and a usable link
    pub valid: usize,
    pub recent: usize,
    /// Recent postings that passed the keyword filter
    pub matched: usize,
    /// Already delivered, or repeated within this fetch
    pub duplicates: usize,
    pub delivered: usize,
    pub delivery_failures: usize,
    /// Delivered but not recorded; may be delivered again next run
    pub record_failures: usize,
    pub parse_failures: usize,

    /// Delivered postings (in preview mode: the ones that would be)
    pub postings: Vec<PostingSummary>,

    /// Why the destination stopped early; `state` keeps the stage it
    /// stopped in
    pub error: Option<String>,
}

impl DestinationReport {
    pub fn new(destination: &Destination) -> Self {
        Self {
            destination_id: destination.id.clone(),
            label: destination.label.clone(),
            state: DestinationState::Pending,
            fetched: 0,
            valid: 0,
            recent: 0,
            matched: 0,
            duplicates: 0,
            delivered: 0,
            delivery_failures: 0,
            record_failures: 0,
            parse_failures: 0,
            postings: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn transition(&mut self, next: DestinationState) {
        log::debug!("[{}] {} -> {}", self.label, self.state, next);
        self.state = next;
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub reports: Vec<DestinationReport>,
    /// The run was interrupted before every destination finished
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn delivered(&self) -> usize {
        self.reports.iter().map(|r| r.delivered).sum()
    }

    /// Ids of destinations that stopped with an error.
    pub fn failed_destinations(&self) -> Vec<String> {
        self.reports
            .iter()
            .filter(|r| r.is_failed())
            .map(|r| r.destination_id.clone())
            .collect()
    }

    pub fn report(&self, destination_id: &str) -> Option<&DestinationReport> {
        self.reports
            .iter()
            .find(|r| r.destination_id == destination_id)
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Log a compact per-destination table.
    pub fn log(&self) {
        for r in &self.reports {
            log::info!(
                "[{}] {}: fetched={} valid={} recent={} matched={} duplicates={} delivered={} failed={}{}",
                r.label,
                r.state,
                r.fetched,
                r.valid,
                r.recent,
                r.matched,
                r.duplicates,
                r.delivered,
                r.delivery_failures,
                r.error
                    .as_deref()
                    .map(|e| format!(" error={e}"))
                    .unwrap_or_default()
            );
        }
        log::info!(
            "Run finished in {} ms: {} delivered, {} failed destinations{}",
            self.elapsed_ms(),
            self.delivered(),
            self.failed_destinations().len(),
            if self.cancelled { " (cancelled)" } else { "" }
        );
    }
}
