//! MySQL backend: the database DevLake itself writes the Q Dev tables to.
//!
//! Each query opens its own connection on a current-thread tokio runtime and
//! closes it before returning, so callers stay synchronous.

use std::fmt;
use std::time::Duration;

use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Connection, Row, TypeInfo, ValueRef};
use tokio::runtime::Runtime;
use tracing::debug;

use super::query::*;
use super::types::*;

/// Where the lake database lives and how to log in.
#[derive(Clone, PartialEq, Eq)]
pub struct MysqlSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub connect_timeout: Duration,
}

impl Default for MysqlSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 3306,
            user: "merico".into(),
            password: "merico".into(),
            database: "lake".into(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for MysqlSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MysqlSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl MysqlSettings {
    fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }

    fn target(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

fn store_error(err: sqlx::Error) -> MetricsError {
    MetricsError::StoreUnavailable(err.to_string())
}

/// MySQL-backed store.
pub struct MysqlStore {
    settings: MysqlSettings,
    runtime: Runtime,
}

impl fmt::Debug for MysqlStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MysqlStore")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl MysqlStore {
    pub fn new(settings: MysqlSettings) -> MetricsResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| MetricsError::StoreUnavailable(format!("start runtime: {e}")))?;
        Ok(Self { settings, runtime })
    }

    pub fn settings(&self) -> &MysqlSettings {
        &self.settings
    }

    fn with_conn<T>(
        &self,
        run: impl FnOnce(&mut MysqlSession<'_>) -> MetricsResult<T>,
    ) -> MetricsResult<T> {
        let opts = self.settings.connect_options();
        let timeout = self.settings.connect_timeout;
        let conn = self
            .runtime
            .block_on(async {
                tokio::time::timeout(timeout, MySqlConnection::connect_with(&opts)).await
            })
            .map_err(|_| {
                MetricsError::StoreUnavailable(format!(
                    "connect {}: timed out after {timeout:?}",
                    self.settings.target()
                ))
            })?
            .map_err(|e| {
                MetricsError::StoreUnavailable(format!("connect {}: {e}", self.settings.target()))
            })?;

        let mut session = MysqlSession {
            runtime: &self.runtime,
            conn,
        };
        let result = run(&mut session);
        if let Err(err) = self.runtime.block_on(session.conn.close()) {
            debug!(error = %err, "closing lake connection failed");
        }
        result
    }

    /// Summary row plus daily rows for one user.
    pub fn user_detail(&self, connection_id: i64, user_id: &str) -> MetricsResult<UserDetail> {
        self.with_conn(|db| query_user_detail(db, connection_id, user_id))
    }
}

impl MetricsSource for MysqlStore {
    fn user_summaries(&self, connection_id: i64) -> MetricsResult<Vec<UserMetricsSummary>> {
        self.with_conn(|db| query_user_summaries(db, connection_id))
    }

    fn daily_records(
        &self,
        connection_id: i64,
        range: &DateRange,
    ) -> MetricsResult<Vec<DailyRecord>> {
        self.with_conn(|db| query_daily_records(db, connection_id, range))
    }

    fn aggregate(&self, connection_id: i64) -> MetricsResult<AggregatedMetrics> {
        self.with_conn(|db| query_aggregate(db, connection_id))
    }

    fn daily_trends(
        &self,
        connection_id: i64,
        window: &TrendWindow,
    ) -> MetricsResult<Vec<TrendPoint>> {
        self.with_conn(|db| query_daily_trends(db, connection_id, window))
    }

    fn rankings(&self, connection_id: i64, top_n: usize) -> MetricsResult<UserRankings> {
        self.with_conn(|db| query_rankings(db, connection_id, top_n))
    }
}

/// One open connection plus the runtime that drives it.
struct MysqlSession<'a> {
    runtime: &'a Runtime,
    conn: MySqlConnection,
}

impl SqlExecutor for MysqlSession<'_> {
    fn fetch_rows(&mut self, stmt: &Statement) -> MetricsResult<Vec<Vec<SqlValue>>> {
        let rows = self.runtime.block_on(fetch(&mut self.conn, stmt))?;
        rows.iter().map(row_values).collect()
    }
}

async fn fetch(conn: &mut MySqlConnection, stmt: &Statement) -> MetricsResult<Vec<MySqlRow>> {
    let mut query = sqlx::query(&stmt.sql);
    for param in &stmt.params {
        query = match param {
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Text(s) => query.bind(s.as_str()),
        };
    }
    query.fetch_all(&mut *conn).await.map_err(store_error)
}

fn row_values(row: &MySqlRow) -> MetricsResult<Vec<SqlValue>> {
    (0..row.len()).map(|idx| column_value(row, idx)).collect()
}

/// Decode by declared column type. DECIMAL (what SUM and AVG return) comes
/// back as text and is parsed by the row mappers.
fn column_value(row: &MySqlRow, idx: usize) -> MetricsResult<SqlValue> {
    let raw = row.try_get_raw(idx).map_err(store_error)?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();
    let value = match type_name.as_str() {
        "BOOLEAN" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            SqlValue::Int(row.try_get_unchecked::<i64, _>(idx).map_err(store_error)?)
        }
        name if name.ends_with(" UNSIGNED") => {
            let v = row.try_get_unchecked::<u64, _>(idx).map_err(store_error)?;
            SqlValue::Int(i64::try_from(v).map_err(|_| {
                MetricsError::StoreUnavailable(format!("column {idx} value {v} overflows i64"))
            })?)
        }
        "FLOAT" => SqlValue::Real(f64::from(
            row.try_get_unchecked::<f32, _>(idx).map_err(store_error)?,
        )),
        "DOUBLE" => SqlValue::Real(row.try_get_unchecked::<f64, _>(idx).map_err(store_error)?),
        "DATE" => SqlValue::Date(
            row.try_get_unchecked::<chrono::NaiveDate, _>(idx)
                .map_err(store_error)?,
        ),
        "DATETIME" | "TIMESTAMP" => SqlValue::DateTime(
            row.try_get_unchecked::<chrono::NaiveDateTime, _>(idx)
                .map_err(store_error)?,
        ),
        _ => SqlValue::Text(row.try_get_unchecked::<String, _>(idx).map_err(store_error)?),
    };
    Ok(value)
}
