//! SQL queries over the Q Dev lake tables.
//!
//! Every query is a [`Statement`] with `?` placeholders that runs unchanged
//! on MySQL (the lake's own database) and SQLite (local mirrors and
//! fixtures). Backends implement [`SqlExecutor`] and hand rows back as
//! [`SqlValue`]s; mapping them into records happens once, here.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use super::derive::mean_or_zero;
use super::types::*;

/// Per-user cumulative table.
pub const SUMMARY_TABLE: &str = "_tool_q_dev_user_metrics";
/// Per-user-per-date table.
pub const DAILY_TABLE: &str = "_tool_q_dev_user_data";

/// DDL for the two lake tables. Used to stand up local mirrors and fixtures.
pub const LAKE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS _tool_q_dev_user_metrics (
    connection_id INTEGER NOT NULL,
    user_id TEXT NOT NULL,
    display_name TEXT,
    first_date TEXT,
    last_date TEXT,
    total_days INTEGER NOT NULL DEFAULT 0,
    total_inline_suggestions_count INTEGER NOT NULL DEFAULT 0,
    total_inline_acceptance_count INTEGER NOT NULL DEFAULT 0,
    acceptance_rate REAL NOT NULL DEFAULT 0,
    total_inline_ai_code_lines INTEGER NOT NULL DEFAULT 0,
    avg_inline_suggestions_count REAL NOT NULL DEFAULT 0,
    avg_inline_acceptance_count REAL NOT NULL DEFAULT 0,
    total_code_review_findings_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT,
    updated_at TEXT,
    PRIMARY KEY (connection_id, user_id)
);
CREATE TABLE IF NOT EXISTS _tool_q_dev_user_data (
    connection_id INTEGER NOT NULL,
    user_id TEXT NOT NULL,
    display_name TEXT,
    date TEXT NOT NULL,
    inline_suggestions_count INTEGER NOT NULL DEFAULT 0,
    inline_acceptance_count INTEGER NOT NULL DEFAULT 0,
    inline_ai_code_lines INTEGER NOT NULL DEFAULT 0,
    chat_messages_sent INTEGER NOT NULL DEFAULT 0,
    chat_messages_interacted INTEGER NOT NULL DEFAULT 0,
    code_fix_generation_event_count INTEGER NOT NULL DEFAULT 0,
    test_generation_event_count INTEGER NOT NULL DEFAULT 0,
    doc_generation_event_count INTEGER NOT NULL DEFAULT 0,
    transformation_event_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT,
    PRIMARY KEY (connection_id, user_id, date)
);
"#;

/// Create the lake tables if they are missing.
pub fn create_schema(conn: &rusqlite::Connection) -> MetricsResult<()> {
    conn.execute_batch(LAKE_SCHEMA)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Source trait
// ---------------------------------------------------------------------------

/// The five read-only queries a snapshot is built from.
///
/// Each call is independent; implementations must not share state between
/// them.
pub trait MetricsSource {
    fn user_summaries(&self, connection_id: i64) -> MetricsResult<Vec<UserMetricsSummary>>;

    fn daily_records(&self, connection_id: i64, range: &DateRange)
    -> MetricsResult<Vec<DailyRecord>>;

    fn aggregate(&self, connection_id: i64) -> MetricsResult<AggregatedMetrics>;

    fn daily_trends(&self, connection_id: i64, window: &TrendWindow)
    -> MetricsResult<Vec<TrendPoint>>;

    fn rankings(&self, connection_id: i64, top_n: usize) -> MetricsResult<UserRankings>;
}

// ---------------------------------------------------------------------------
// Backend seam
// ---------------------------------------------------------------------------

/// Positional statement parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Int(i64),
    Text(String),
}

/// SQL text with `?` placeholders and its parameters in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    fn new(sql: String, params: Vec<SqlParam>) -> Self {
        Self { sql, params }
    }
}

/// One column as a backend decoded it.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    /// Strings, and anything the backend only exposes as text (MySQL DECIMAL).
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

/// Runs statements for the query functions below.
pub trait SqlExecutor {
    fn fetch_rows(&mut self, stmt: &Statement) -> MetricsResult<Vec<Vec<SqlValue>>>;
}

fn mismatch(value: &SqlValue, wanted: &str) -> MetricsError {
    MetricsError::StoreUnavailable(format!("cannot read {value:?} as {wanted}"))
}

impl SqlValue {
    pub fn to_i64(&self) -> MetricsResult<Option<i64>> {
        match self {
            Self::Null => Ok(None),
            Self::Int(v) => Ok(Some(*v)),
            Self::Real(f) if f.fract() == 0.0 && f.is_finite() => Ok(Some(*f as i64)),
            Self::Text(s) => {
                let s = s.trim();
                if let Ok(v) = s.parse::<i64>() {
                    return Ok(Some(v));
                }
                match s.parse::<f64>() {
                    Ok(f) if f.fract() == 0.0 && f.is_finite() => Ok(Some(f as i64)),
                    _ => Err(mismatch(self, "integer")),
                }
            }
            _ => Err(mismatch(self, "integer")),
        }
    }

    pub fn to_f64(&self) -> MetricsResult<Option<f64>> {
        match self {
            Self::Null => Ok(None),
            Self::Int(v) => Ok(Some(*v as f64)),
            Self::Real(f) => Ok(Some(*f)),
            Self::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| mismatch(self, "number")),
            _ => Err(mismatch(self, "number")),
        }
    }

    pub fn to_text(&self) -> MetricsResult<Option<String>> {
        match self {
            Self::Null => Ok(None),
            Self::Text(s) => Ok(Some(s.clone())),
            Self::Int(v) => Ok(Some(v.to_string())),
            Self::Real(f) => Ok(Some(f.to_string())),
            Self::Date(d) => Ok(Some(d.to_string())),
            Self::DateTime(dt) => Ok(Some(dt.to_string())),
        }
    }

    pub fn to_date(&self) -> MetricsResult<Option<NaiveDate>> {
        match self {
            Self::Null => Ok(None),
            Self::Date(d) => Ok(Some(*d)),
            Self::DateTime(dt) => Ok(Some(dt.date())),
            Self::Text(s) => s
                .trim()
                .get(..10)
                .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
                .map(Some)
                .ok_or_else(|| mismatch(self, "date")),
            _ => Err(mismatch(self, "date")),
        }
    }

    pub fn to_datetime(&self) -> MetricsResult<Option<NaiveDateTime>> {
        match self {
            Self::Null => Ok(None),
            Self::DateTime(dt) => Ok(Some(*dt)),
            Self::Date(d) => Ok(Some(d.and_time(NaiveTime::MIN))),
            Self::Text(s) => {
                let s = s.trim();
                ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                    .or_else(|| {
                        NaiveDate::parse_from_str(s, "%Y-%m-%d")
                            .ok()
                            .map(|d| d.and_time(NaiveTime::MIN))
                    })
                    .map(Some)
                    .ok_or_else(|| mismatch(self, "timestamp"))
            }
            _ => Err(mismatch(self, "timestamp")),
        }
    }
}

static MISSING: SqlValue = SqlValue::Null;

/// Positional view of one fetched row. Columns past the end read as NULL.
struct Columns<'a>(&'a [SqlValue]);

impl Columns<'_> {
    fn at(&self, idx: usize) -> &SqlValue {
        self.0.get(idx).unwrap_or(&MISSING)
    }

    fn required<T>(&self, idx: usize, value: Option<T>) -> MetricsResult<T> {
        value.ok_or_else(|| MetricsError::StoreUnavailable(format!("column {idx} is NULL")))
    }

    /// Counters read NULL as zero.
    fn count(&self, idx: usize) -> MetricsResult<i64> {
        Ok(self.at(idx).to_i64()?.unwrap_or(0))
    }

    fn float(&self, idx: usize) -> MetricsResult<f64> {
        Ok(self.at(idx).to_f64()?.unwrap_or(0.0))
    }

    fn float_opt(&self, idx: usize) -> MetricsResult<Option<f64>> {
        self.at(idx).to_f64()
    }

    fn text(&self, idx: usize) -> MetricsResult<String> {
        let value = self.at(idx).to_text()?;
        self.required(idx, value)
    }

    fn text_opt(&self, idx: usize) -> MetricsResult<Option<String>> {
        self.at(idx).to_text()
    }

    fn date(&self, idx: usize) -> MetricsResult<NaiveDate> {
        let value = self.at(idx).to_date()?;
        self.required(idx, value)
    }

    fn date_opt(&self, idx: usize) -> MetricsResult<Option<NaiveDate>> {
        self.at(idx).to_date()
    }

    fn datetime_opt(&self, idx: usize) -> MetricsResult<Option<NaiveDateTime>> {
        self.at(idx).to_datetime()
    }
}

fn fetch_mapped<E, T>(
    db: &mut E,
    stmt: &Statement,
    map: impl Fn(&Columns<'_>) -> MetricsResult<T>,
) -> MetricsResult<Vec<T>>
where
    E: SqlExecutor + ?Sized,
{
    db.fetch_rows(stmt)?
        .iter()
        .map(|row| map(&Columns(row)))
        .collect()
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

const SUMMARY_COLUMNS: &str = "user_id, display_name, first_date, last_date, total_days, \
     total_inline_suggestions_count, total_inline_acceptance_count, acceptance_rate, \
     total_inline_ai_code_lines, avg_inline_suggestions_count, avg_inline_acceptance_count, \
     total_code_review_findings_count, created_at, updated_at";

const DAILY_COLUMNS: &str = "user_id, display_name, date, inline_suggestions_count, \
     inline_acceptance_count, inline_ai_code_lines, chat_messages_sent, \
     chat_messages_interacted, code_fix_generation_event_count, test_generation_event_count, \
     doc_generation_event_count, transformation_event_count, created_at";

fn summary_from_row(row: &Columns<'_>) -> MetricsResult<UserMetricsSummary> {
    Ok(UserMetricsSummary {
        user_id: row.text(0)?,
        display_name: row.text_opt(1)?,
        first_date: row.date_opt(2)?,
        last_date: row.date_opt(3)?,
        total_days: row.count(4)?,
        total_inline_suggestions_count: row.count(5)?,
        total_inline_acceptance_count: row.count(6)?,
        acceptance_rate: row.float(7)?,
        total_inline_ai_code_lines: row.count(8)?,
        avg_inline_suggestions_count: row.float(9)?,
        avg_inline_acceptance_count: row.float(10)?,
        total_code_review_findings_count: row.count(11)?,
        created_at: row.datetime_opt(12)?,
        updated_at: row.datetime_opt(13)?,
    })
}

fn daily_from_row(row: &Columns<'_>) -> MetricsResult<DailyRecord> {
    Ok(DailyRecord {
        user_id: row.text(0)?,
        display_name: row.text_opt(1)?,
        date: row.date(2)?,
        inline_suggestions_count: row.count(3)?,
        inline_acceptance_count: row.count(4)?,
        inline_ai_code_lines: row.count(5)?,
        chat_messages_sent: row.count(6)?,
        chat_messages_interacted: row.count(7)?,
        code_fix_generation_event_count: row.count(8)?,
        test_generation_event_count: row.count(9)?,
        doc_generation_event_count: row.count(10)?,
        transformation_event_count: row.count(11)?,
        created_at: row.datetime_opt(12)?,
    })
}

fn iso(date: NaiveDate) -> SqlParam {
    SqlParam::Text(date.format("%Y-%m-%d").to_string())
}

/// Reject a leaderboard length no query could honour.
pub fn limit_param(top_n: usize) -> MetricsResult<i64> {
    if top_n == 0 {
        return Err(MetricsError::Query("top_n must be at least 1".into()));
    }
    i64::try_from(top_n).map_err(|_| MetricsError::Query(format!("top_n {top_n} is too large")))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// All summary rows for a connection, highest suggestion volume first.
pub fn query_user_summaries<E: SqlExecutor + ?Sized>(
    db: &mut E,
    connection_id: i64,
) -> MetricsResult<Vec<UserMetricsSummary>> {
    let stmt = Statement::new(
        format!(
            "SELECT {SUMMARY_COLUMNS} FROM {SUMMARY_TABLE}
             WHERE connection_id = ?
             ORDER BY total_inline_suggestions_count DESC, user_id"
        ),
        vec![SqlParam::Int(connection_id)],
    );
    fetch_mapped(db, &stmt, summary_from_row)
}

/// Daily rows within `range`, newest date first then by user.
pub fn query_daily_records<E: SqlExecutor + ?Sized>(
    db: &mut E,
    connection_id: i64,
    range: &DateRange,
) -> MetricsResult<Vec<DailyRecord>> {
    let mut sql = format!("SELECT {DAILY_COLUMNS} FROM {DAILY_TABLE} WHERE connection_id = ?");
    let mut params = vec![SqlParam::Int(connection_id)];

    if let Some(start) = range.start() {
        sql.push_str(" AND date >= ?");
        params.push(iso(start));
    }
    if let Some(end) = range.end() {
        sql.push_str(" AND date <= ?");
        params.push(iso(end));
    }
    sql.push_str(" ORDER BY date DESC, user_id");

    fetch_mapped(db, &Statement::new(sql, params), daily_from_row)
}

/// Single-row rollup of the summary table.
pub fn query_aggregate<E: SqlExecutor + ?Sized>(
    db: &mut E,
    connection_id: i64,
) -> MetricsResult<AggregatedMetrics> {
    let stmt = Statement::new(
        format!(
            "SELECT COUNT(*),
                    COALESCE(SUM(total_inline_suggestions_count), 0),
                    COALESCE(SUM(total_inline_acceptance_count), 0),
                    AVG(acceptance_rate),
                    COALESCE(SUM(total_inline_ai_code_lines), 0),
                    MIN(first_date),
                    MAX(last_date),
                    AVG(total_days)
             FROM {SUMMARY_TABLE}
             WHERE connection_id = ?"
        ),
        vec![SqlParam::Int(connection_id)],
    );
    let rows = fetch_mapped(db, &stmt, |row| {
        Ok(AggregatedMetrics {
            total_users: row.count(0)?,
            total_suggestions: row.count(1)?,
            total_acceptances: row.count(2)?,
            avg_acceptance_rate: mean_or_zero(row.float_opt(3)?, 2),
            total_ai_code_lines: row.count(4)?,
            earliest_date: row.date_opt(5)?,
            latest_date: row.date_opt(6)?,
            avg_active_days: mean_or_zero(row.float_opt(7)?, 2),
        })
    })?;
    Ok(rows.into_iter().next().unwrap_or_default())
}

/// One point per date inside `window`, newest first.
pub fn query_daily_trends<E: SqlExecutor + ?Sized>(
    db: &mut E,
    connection_id: i64,
    window: &TrendWindow,
) -> MetricsResult<Vec<TrendPoint>> {
    let mut sql = format!(
        "SELECT date,
                COUNT(DISTINCT user_id),
                COALESCE(SUM(inline_suggestions_count), 0),
                COALESCE(SUM(inline_acceptance_count), 0),
                COALESCE(SUM(inline_ai_code_lines), 0),
                COALESCE(SUM(chat_messages_sent), 0),
                AVG(CASE WHEN inline_suggestions_count > 0
                         THEN inline_acceptance_count * 1.0 / inline_suggestions_count
                         ELSE 0 END)
         FROM {DAILY_TABLE}
         WHERE connection_id = ? AND date >= ?"
    );
    let mut params = vec![SqlParam::Int(connection_id), iso(window.since())];
    if let Some(until) = window.until() {
        sql.push_str(" AND date <= ?");
        params.push(iso(until));
    }
    sql.push_str(" GROUP BY date ORDER BY date DESC");

    fetch_mapped(db, &Statement::new(sql, params), |row| {
        let daily_suggestions = row.count(2)?;
        // A day with no suggestions has no defined rate.
        let daily_acceptance_rate = if daily_suggestions == 0 {
            0.0
        } else {
            mean_or_zero(row.float_opt(6)?, 4)
        };
        Ok(TrendPoint {
            date: row.date(0)?,
            active_users: row.count(1)?,
            daily_suggestions,
            daily_acceptances: row.count(3)?,
            daily_ai_lines: row.count(4)?,
            daily_chat_messages: row.count(5)?,
            daily_acceptance_rate,
        })
    })
}

/// The three top-N leaderboards.
pub fn query_rankings<E: SqlExecutor + ?Sized>(
    db: &mut E,
    connection_id: i64,
    top_n: usize,
) -> MetricsResult<UserRankings> {
    let limit = limit_param(top_n)?;
    let params = || vec![SqlParam::Int(connection_id), SqlParam::Int(limit)];

    let top_suggestions = fetch_mapped(
        db,
        &Statement::new(
            format!(
                "SELECT user_id, display_name, total_inline_suggestions_count
                 FROM {SUMMARY_TABLE}
                 WHERE connection_id = ?
                 ORDER BY total_inline_suggestions_count DESC, user_id
                 LIMIT ?"
            ),
            params(),
        ),
        |row| {
            Ok(SuggestionRank {
                user_id: row.text(0)?,
                display_name: row.text_opt(1)?,
                total_inline_suggestions_count: row.count(2)?,
            })
        },
    )?;

    let top_acceptance_rate = fetch_mapped(
        db,
        &Statement::new(
            format!(
                "SELECT user_id, display_name, acceptance_rate, total_inline_acceptance_count
                 FROM {SUMMARY_TABLE}
                 WHERE connection_id = ? AND total_inline_suggestions_count > 0
                 ORDER BY acceptance_rate DESC, total_inline_acceptance_count DESC, user_id
                 LIMIT ?"
            ),
            params(),
        ),
        |row| {
            Ok(AcceptanceRank {
                user_id: row.text(0)?,
                display_name: row.text_opt(1)?,
                acceptance_rate: row.float(2)?,
                total_inline_acceptance_count: row.count(3)?,
            })
        },
    )?;

    let top_ai_code_lines = fetch_mapped(
        db,
        &Statement::new(
            format!(
                "SELECT user_id, display_name, total_inline_ai_code_lines
                 FROM {SUMMARY_TABLE}
                 WHERE connection_id = ?
                 ORDER BY total_inline_ai_code_lines DESC, user_id
                 LIMIT ?"
            ),
            params(),
        ),
        |row| {
            Ok(AiLinesRank {
                user_id: row.text(0)?,
                display_name: row.text_opt(1)?,
                total_inline_ai_code_lines: row.count(2)?,
            })
        },
    )?;

    Ok(UserRankings {
        top_suggestions,
        top_acceptance_rate,
        top_ai_code_lines,
    })
}

/// Summary and full daily history for one user.
pub fn query_user_detail<E: SqlExecutor + ?Sized>(
    db: &mut E,
    connection_id: i64,
    user_id: &str,
) -> MetricsResult<UserDetail> {
    if user_id.trim().is_empty() {
        return Err(MetricsError::Query("user_id must not be empty".into()));
    }
    let params = || vec![SqlParam::Int(connection_id), SqlParam::Text(user_id.into())];

    let user_summary = fetch_mapped(
        db,
        &Statement::new(
            format!(
                "SELECT {SUMMARY_COLUMNS} FROM {SUMMARY_TABLE}
                 WHERE connection_id = ? AND user_id = ?"
            ),
            params(),
        ),
        summary_from_row,
    )?
    .into_iter()
    .next();

    let daily_data = fetch_mapped(
        db,
        &Statement::new(
            format!(
                "SELECT {DAILY_COLUMNS} FROM {DAILY_TABLE}
                 WHERE connection_id = ? AND user_id = ?
                 ORDER BY date DESC"
            ),
            params(),
        ),
        daily_from_row,
    )?;

    Ok(UserDetail {
        user_summary,
        daily_data,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
