//! Record types for the Q Dev metrics tables.
//!
//! Row shapes mirror the columns of `_tool_q_dev_user_metrics` and
//! `_tool_q_dev_user_data`, so the JSON produced from them keeps the lake's
//! column names.

use chrono::{Days, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Metrics-store error.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Parameters were rejected before any SQL was dispatched.
    #[error("invalid query parameters: {0}")]
    Query(String),
    /// The store could not be opened or a statement failed.
    #[error("metrics store unavailable: {0}")]
    StoreUnavailable(String),
}

impl MetricsError {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Query(_) => "query_error",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }

    /// Whether re-running the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<rusqlite::Error> for MetricsError {
    fn from(err: rusqlite::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

/// Convenience alias.
pub type MetricsResult<T> = std::result::Result<T, MetricsError>;

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

/// Inclusive `[start, end]` date filter; either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

impl DateRange {
    /// Unbounded on both sides.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Build a range, rejecting `end < start`.
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> MetricsResult<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if e < s {
                return Err(MetricsError::Query(format!(
                    "end_date {e} is before start_date {s}"
                )));
            }
        }
        Ok(Self { start, end })
    }

    /// Parse `YYYY-MM-DD` bounds.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> MetricsResult<Self> {
        let start = start.map(parse_date).transpose()?;
        let end = end.map(parse_date).transpose()?;
        Self::new(start, end)
    }

    pub fn start(&self) -> Option<NaiveDate> {
        self.start
    }

    pub fn end(&self) -> Option<NaiveDate> {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|s| date >= s) && self.end.is_none_or(|e| date <= e)
    }
}

fn parse_date(raw: &str) -> MetricsResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| MetricsError::Query(format!("invalid date '{raw}': {e}")))
}

/// Trailing window for the daily trend query: dates from `as_of - days` on.
///
/// A window pinned with [`TrendWindow::new`] also stops at `as_of`. A
/// trailing window has no upper bound, so rows the platform stamps ahead of
/// today's UTC date still count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrendWindow {
    days: u32,
    as_of: NaiveDate,
    pinned: bool,
}

impl TrendWindow {
    pub const DEFAULT_DAYS: u32 = 30;

    /// Window `[as_of - days, as_of]`.
    pub fn new(days: u32, as_of: NaiveDate) -> MetricsResult<Self> {
        Self::check_days(days)?;
        Ok(Self {
            days,
            as_of,
            pinned: true,
        })
    }

    /// Open-ended window starting `days` before today (UTC).
    pub fn trailing(days: u32) -> MetricsResult<Self> {
        Self::check_days(days)?;
        Ok(Self {
            days,
            as_of: Utc::now().date_naive(),
            pinned: false,
        })
    }

    /// [`TrendWindow::trailing`] over [`TrendWindow::DEFAULT_DAYS`].
    pub fn trailing_default() -> Self {
        Self {
            days: Self::DEFAULT_DAYS,
            as_of: Utc::now().date_naive(),
            pinned: false,
        }
    }

    fn check_days(days: u32) -> MetricsResult<()> {
        if days == 0 {
            return Err(MetricsError::Query(
                "trend window must cover at least one day".into(),
            ));
        }
        Ok(())
    }

    pub fn days(&self) -> u32 {
        self.days
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    /// First date included in the window.
    pub fn since(&self) -> NaiveDate {
        self.as_of
            .checked_sub_days(Days::new(u64::from(self.days)))
            .unwrap_or(NaiveDate::MIN)
    }

    /// Last date included, if the window is pinned.
    pub fn until(&self) -> Option<NaiveDate> {
        self.pinned.then_some(self.as_of)
    }
}

/// Direction for date-keyed series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateOrder {
    Ascending,
    #[default]
    Descending,
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One row of `_tool_q_dev_user_metrics`: cumulative per-user figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMetricsSummary {
    pub user_id: String,
    pub display_name: Option<String>,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub total_days: i64,
    pub total_inline_suggestions_count: i64,
    pub total_inline_acceptance_count: i64,
    /// Precomputed upstream as acceptances / suggestions.
    pub acceptance_rate: f64,
    pub total_inline_ai_code_lines: i64,
    pub avg_inline_suggestions_count: f64,
    pub avg_inline_acceptance_count: f64,
    pub total_code_review_findings_count: i64,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

/// One row of `_tool_q_dev_user_data`: a user's activity on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub user_id: String,
    pub display_name: Option<String>,
    pub date: NaiveDate,
    pub inline_suggestions_count: i64,
    pub inline_acceptance_count: i64,
    pub inline_ai_code_lines: i64,
    pub chat_messages_sent: i64,
    pub chat_messages_interacted: i64,
    pub code_fix_generation_event_count: i64,
    pub test_generation_event_count: i64,
    pub doc_generation_event_count: i64,
    pub transformation_event_count: i64,
    pub created_at: Option<NaiveDateTime>,
}

/// Connection-wide rollup over the summary table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub total_users: i64,
    pub total_suggestions: i64,
    pub total_acceptances: i64,
    /// Mean of per-user acceptance rates, 2 decimals.
    pub avg_acceptance_rate: f64,
    pub total_ai_code_lines: i64,
    pub earliest_date: Option<NaiveDate>,
    pub latest_date: Option<NaiveDate>,
    /// Mean active days per user, 2 decimals.
    pub avg_active_days: f64,
}

/// Per-date totals over the daily table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub active_users: i64,
    pub daily_suggestions: i64,
    pub daily_acceptances: i64,
    pub daily_ai_lines: i64,
    pub daily_chat_messages: i64,
    /// Mean of the day's per-user ratios, 4 decimals; 0 on days without suggestions.
    pub daily_acceptance_rate: f64,
}

/// Reorder trend points by date.
pub fn sort_trends(points: &mut [TrendPoint], order: DateOrder) {
    match order {
        DateOrder::Ascending => points.sort_by(|a, b| a.date.cmp(&b.date)),
        DateOrder::Descending => points.sort_by(|a, b| b.date.cmp(&a.date)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionRank {
    pub user_id: String,
    pub display_name: Option<String>,
    pub total_inline_suggestions_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptanceRank {
    pub user_id: String,
    pub display_name: Option<String>,
    pub acceptance_rate: f64,
    pub total_inline_acceptance_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiLinesRank {
    pub user_id: String,
    pub display_name: Option<String>,
    pub total_inline_ai_code_lines: i64,
}

/// The three leaderboards exported with every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRankings {
    pub top_suggestions: Vec<SuggestionRank>,
    /// Users without suggestions are never ranked here.
    pub top_acceptance_rate: Vec<AcceptanceRank>,
    pub top_ai_code_lines: Vec<AiLinesRank>,
}

/// Everything the store holds about one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDetail {
    pub user_summary: Option<UserMetricsSummary>,
    pub daily_data: Vec<DailyRecord>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
