//! SQLite backend for local lake mirrors and fixtures.

use std::path::{Path, PathBuf};

use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, OpenFlags, params_from_iter};

use super::query::*;
use super::types::*;

impl SqlExecutor for Connection {
    fn fetch_rows(&mut self, stmt: &Statement) -> MetricsResult<Vec<Vec<SqlValue>>> {
        let mut prepared = self.prepare(&stmt.sql)?;
        let width = prepared.column_count();
        let params = stmt.params.iter().map(|p| match p {
            SqlParam::Int(v) => Value::Integer(*v),
            SqlParam::Text(s) => Value::Text(s.clone()),
        });
        let mut rows = prepared.query(params_from_iter(params))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(match row.get_ref(idx)? {
                    ValueRef::Null => SqlValue::Null,
                    ValueRef::Integer(v) => SqlValue::Int(v),
                    ValueRef::Real(f) => SqlValue::Real(f),
                    ValueRef::Text(t) | ValueRef::Blob(t) => {
                        SqlValue::Text(String::from_utf8_lossy(t).into_owned())
                    }
                });
            }
            out.push(values);
        }
        Ok(out)
    }
}

/// SQLite-backed store. Holds only the path; no connection outlives a call.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> MetricsResult<Connection> {
        if !self.path.exists() {
            return Err(MetricsError::StoreUnavailable(format!(
                "database {} does not exist",
                self.path.display()
            )));
        }
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            MetricsError::StoreUnavailable(format!("open {}: {e}", self.path.display()))
        })
    }

    /// Summary row plus daily rows for one user.
    pub fn user_detail(&self, connection_id: i64, user_id: &str) -> MetricsResult<UserDetail> {
        query_user_detail(&mut self.open()?, connection_id, user_id)
    }
}

impl MetricsSource for SqliteStore {
    fn user_summaries(&self, connection_id: i64) -> MetricsResult<Vec<UserMetricsSummary>> {
        query_user_summaries(&mut self.open()?, connection_id)
    }

    fn daily_records(
        &self,
        connection_id: i64,
        range: &DateRange,
    ) -> MetricsResult<Vec<DailyRecord>> {
        query_daily_records(&mut self.open()?, connection_id, range)
    }

    fn aggregate(&self, connection_id: i64) -> MetricsResult<AggregatedMetrics> {
        query_aggregate(&mut self.open()?, connection_id)
    }

    fn daily_trends(
        &self,
        connection_id: i64,
        window: &TrendWindow,
    ) -> MetricsResult<Vec<TrendPoint>> {
        query_daily_trends(&mut self.open()?, connection_id, window)
    }

    fn rankings(&self, connection_id: i64, top_n: usize) -> MetricsResult<UserRankings> {
        query_rankings(&mut self.open()?, connection_id, top_n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_store_unavailable() {
        let store = SqliteStore::new("/definitely/not/here/lake.db");
        let err = store.aggregate(1).unwrap_err();
        assert_eq!(err.kind(), "store_unavailable");
    }

    #[test]
    fn executor_binds_params_in_order() {
        let mut conn = Connection::open_in_memory().unwrap();
        let stmt = Statement {
            sql: "SELECT ? + 1, ?, NULL, 0.5".into(),
            params: vec![SqlParam::Int(41), SqlParam::Text("ana".into())],
        };
        let rows = conn.fetch_rows(&stmt).unwrap();
        assert_eq!(
            rows,
            vec![vec![
                SqlValue::Int(42),
                SqlValue::Text("ana".into()),
                SqlValue::Null,
                SqlValue::Real(0.5),
            ]]
        );
    }

    #[test]
    fn store_reads_seeded_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lake.db");
        {
            let conn = Connection::open(&path).unwrap();
            create_schema(&conn).unwrap();
            conn.execute_batch(
                "INSERT INTO _tool_q_dev_user_metrics
                    (connection_id, user_id, total_inline_suggestions_count,
                     total_inline_acceptance_count, acceptance_rate)
                 VALUES (1, 'ana', 11, 1, 0.09090909090909091);",
            )
            .unwrap();
        }
        let store = SqliteStore::new(&path);
        let rows = store.user_summaries(1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].acceptance_rate, 1.0 / 11.0);
        assert!(store.user_detail(1, "ana").unwrap().user_summary.is_some());
    }
}
