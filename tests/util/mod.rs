use std::path::{Path, PathBuf};

use qdev_exporter::metrics::query::create_schema;
use rusqlite::{Connection, params};
use tempfile::TempDir;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }

    pub fn assert_not_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            !out.contains(needle),
            "expected logs not to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// One daily row: (user, date, suggestions, acceptances, ai_lines).
pub type DailyRow<'a> = (&'a str, &'a str, i64, i64, i64);

/// Scratch lake database on disk.
#[allow(dead_code)]
pub struct SeedStore {
    pub dir: TempDir,
    pub path: PathBuf,
}

#[allow(dead_code)]
impl SeedStore {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("lake.db");
        let conn = Connection::open(&path).expect("open store");
        create_schema(&conn).expect("schema");
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn conn(&self) -> Connection {
        Connection::open(&self.path).expect("open store")
    }

    /// Insert daily rows and derive the matching summary rows from them,
    /// the way the collector maintains both tables.
    pub fn seed(&self, connection_id: i64, rows: &[DailyRow<'_>]) {
        let conn = self.conn();
        for (user, date, sugg, acc, lines) in rows {
            conn.execute(
                "INSERT INTO _tool_q_dev_user_data
                    (connection_id, user_id, display_name, date, inline_suggestions_count,
                     inline_acceptance_count, inline_ai_code_lines)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![connection_id, user, user.to_uppercase(), date, sugg, acc, lines],
            )
            .expect("insert daily row");
        }
        conn.execute(
            "INSERT OR REPLACE INTO _tool_q_dev_user_metrics
                (connection_id, user_id, display_name, first_date, last_date, total_days,
                 total_inline_suggestions_count, total_inline_acceptance_count, acceptance_rate,
                 total_inline_ai_code_lines, avg_inline_suggestions_count,
                 avg_inline_acceptance_count, updated_at)
             SELECT connection_id, user_id, MAX(display_name), MIN(date), MAX(date), COUNT(*),
                    SUM(inline_suggestions_count), SUM(inline_acceptance_count),
                    CASE WHEN SUM(inline_suggestions_count) = 0 THEN 0
                         ELSE CAST(SUM(inline_acceptance_count) AS REAL)
                              / SUM(inline_suggestions_count) END,
                    SUM(inline_ai_code_lines),
                    AVG(inline_suggestions_count), AVG(inline_acceptance_count),
                    '2024-01-08 00:00:00'
             FROM _tool_q_dev_user_data
             WHERE connection_id = ?1
             GROUP BY connection_id, user_id",
            params![connection_id],
        )
        .expect("derive summaries");
    }
}
