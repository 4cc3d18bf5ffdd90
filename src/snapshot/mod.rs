//! Versioned metrics snapshots.
//!
//! A [`Snapshot`] bundles one result of every metrics query with provenance
//! and row counts. [`assemble`] runs the queries in a fixed order and either
//! returns a complete snapshot or the first failing section's error; no
//! partial snapshot ever escapes.

pub mod writer;

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::metrics::validate::{self, Sections, ValidateConfig, ValidationReport};
use crate::metrics::query::limit_param;
use crate::metrics::{
    AggregatedMetrics, DailyRecord, DateRange, MetricsError, MetricsResult, MetricsSource,
    TrendPoint, TrendWindow, UserMetricsSummary, UserRankings,
};

pub use writer::{OutputMode, SnapshotWriter, WrittenFiles, read_snapshot};

/// Stamped into every snapshot's `export_info`.
pub const EXPORTER_VERSION: &str = "1.0.0";

/// Default leaderboard length.
pub const DEFAULT_TOP_N: usize = 10;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The request was rejected before any query ran.
    #[error("invalid export request: {0}")]
    Request(#[source] MetricsError),
    #[error("failed to assemble section '{section}': {source}")]
    Assembly {
        section: Section,
        #[source]
        source: MetricsError,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl SnapshotError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(source) => source.kind(),
            Self::Assembly { .. } => "snapshot_assembly_error",
            Self::Write { .. } => "write_error",
            Self::Read { .. } => "read_error",
            Self::Serialize(_) => "serialize_error",
        }
    }

    /// The failing section, for assembly errors.
    pub fn section(&self) -> Option<Section> {
        match self {
            Self::Assembly { section, .. } => Some(*section),
            _ => None,
        }
    }
}

pub type SnapshotResult<T> = std::result::Result<T, SnapshotError>;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Named snapshot sections, in assembly order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    UserMetricsSummary,
    UserDailyData,
    AggregatedMetrics,
    DailyTrends,
    UserRankings,
}

impl Section {
    pub const ALL: [Section; 5] = [
        Section::UserMetricsSummary,
        Section::UserDailyData,
        Section::AggregatedMetrics,
        Section::DailyTrends,
        Section::UserRankings,
    ];

    /// Top-level JSON key.
    pub fn key(&self) -> &'static str {
        match self {
            Self::UserMetricsSummary => "user_metrics_summary",
            Self::UserDailyData => "user_daily_data",
            Self::AggregatedMetrics => "aggregated_metrics",
            Self::DailyTrends => "daily_trends",
            Self::UserRankings => "user_rankings",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.key() == key)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Provenance block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportInfo {
    pub timestamp: DateTime<Utc>,
    pub connection_id: i64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub exporter_version: String,
}

impl ExportInfo {
    /// Token shared by every file written for this snapshot.
    pub fn file_token(&self) -> String {
        self.timestamp.format("%Y%m%d_%H%M%S").to_string()
    }
}

/// Row counts of the collections actually included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_users: usize,
    pub total_daily_records: usize,
    /// Number of dates in the trend series.
    pub date_range_days: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub export_info: ExportInfo,
    pub user_metrics_summary: Vec<UserMetricsSummary>,
    pub user_daily_data: Vec<DailyRecord>,
    pub aggregated_metrics: AggregatedMetrics,
    pub daily_trends: Vec<TrendPoint>,
    pub user_rankings: UserRankings,
    pub statistics: Statistics,
}

impl Snapshot {
    /// JSON value of one section.
    pub fn section_value(&self, section: Section) -> SnapshotResult<serde_json::Value> {
        let value = match section {
            Section::UserMetricsSummary => serde_json::to_value(&self.user_metrics_summary)?,
            Section::UserDailyData => serde_json::to_value(&self.user_daily_data)?,
            Section::AggregatedMetrics => serde_json::to_value(&self.aggregated_metrics)?,
            Section::DailyTrends => serde_json::to_value(&self.daily_trends)?,
            Section::UserRankings => serde_json::to_value(&self.user_rankings)?,
        };
        Ok(value)
    }

    /// Check the exported rows against the metrics invariants.
    pub fn validate(&self, config: &ValidateConfig) -> ValidationReport {
        validate::run_validation(
            Sections {
                summaries: &self.user_metrics_summary,
                daily: &self.user_daily_data,
                aggregate: &self.aggregated_metrics,
                trends: &self.daily_trends,
                rankings: &self.user_rankings,
            },
            config,
        )
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Parameters for one export.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub connection_id: i64,
    pub date_range: DateRange,
    pub top_n: usize,
    pub trend_window: TrendWindow,
}

impl ExportRequest {
    /// Unbounded dates, top 10, trailing 30-day trend from today (UTC).
    pub fn new(connection_id: i64) -> Self {
        Self {
            connection_id,
            date_range: DateRange::unbounded(),
            top_n: DEFAULT_TOP_N,
            trend_window: TrendWindow::trailing_default(),
        }
    }

    pub fn date_range(mut self, range: DateRange) -> Self {
        self.date_range = range;
        self
    }

    pub fn top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn trend_window(mut self, window: TrendWindow) -> Self {
        self.trend_window = window;
        self
    }

    /// Reject parameters no query could honour.
    pub fn validate(&self) -> MetricsResult<()> {
        limit_param(self.top_n).map(|_| ())
    }
}

/// Run every query and assemble a snapshot stamped with the current time.
pub fn assemble<S>(source: &S, request: &ExportRequest) -> SnapshotResult<Snapshot>
where
    S: MetricsSource + ?Sized,
{
    assemble_at(source, request, Utc::now())
}

/// Same as [`assemble`] with an explicit timestamp.
pub fn assemble_at<S>(
    source: &S,
    request: &ExportRequest,
    timestamp: DateTime<Utc>,
) -> SnapshotResult<Snapshot>
where
    S: MetricsSource + ?Sized,
{
    request.validate().map_err(SnapshotError::Request)?;

    let id = request.connection_id;
    let fail = |section: Section| {
        move |source: MetricsError| SnapshotError::Assembly { section, source }
    };

    let user_metrics_summary = source
        .user_summaries(id)
        .map_err(fail(Section::UserMetricsSummary))?;
    debug!(rows = user_metrics_summary.len(), "fetched user_metrics_summary");

    let user_daily_data = source
        .daily_records(id, &request.date_range)
        .map_err(fail(Section::UserDailyData))?;
    debug!(rows = user_daily_data.len(), "fetched user_daily_data");

    let aggregated_metrics = source
        .aggregate(id)
        .map_err(fail(Section::AggregatedMetrics))?;
    debug!(users = aggregated_metrics.total_users, "fetched aggregated_metrics");

    let daily_trends = source
        .daily_trends(id, &request.trend_window)
        .map_err(fail(Section::DailyTrends))?;
    debug!(points = daily_trends.len(), "fetched daily_trends");

    let user_rankings = source
        .rankings(id, request.top_n)
        .map_err(fail(Section::UserRankings))?;
    debug!(top_n = request.top_n, "fetched user_rankings");

    // Counted from the rows above, never re-queried.
    let statistics = Statistics {
        total_users: user_metrics_summary.len(),
        total_daily_records: user_daily_data.len(),
        date_range_days: daily_trends.len(),
    };

    info!(
        connection_id = id,
        users = statistics.total_users,
        daily_records = statistics.total_daily_records,
        trend_days = statistics.date_range_days,
        "snapshot assembled"
    );

    Ok(Snapshot {
        export_info: ExportInfo {
            timestamp,
            connection_id: id,
            start_date: request.date_range.start(),
            end_date: request.date_range.end(),
            exporter_version: EXPORTER_VERSION.to_string(),
        },
        user_metrics_summary,
        user_daily_data,
        aggregated_metrics,
        daily_trends,
        user_rankings,
        statistics,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
