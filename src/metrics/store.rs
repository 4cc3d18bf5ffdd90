//! Backend selection for the lake tables.

use super::mysql::MysqlStore;
use super::query::MetricsSource;
use super::sqlite::SqliteStore;
use super::types::*;

/// The store a command reads from: the lake's MySQL database, or a local
/// SQLite mirror.
#[derive(Debug)]
pub enum LakeStore {
    Mysql(MysqlStore),
    Sqlite(SqliteStore),
}

impl LakeStore {
    /// Short description for logs; never includes credentials.
    pub fn describe(&self) -> String {
        match self {
            Self::Mysql(store) => {
                let s = store.settings();
                format!("mysql://{}:{}/{}", s.host, s.port, s.database)
            }
            Self::Sqlite(store) => format!("sqlite:{}", store.path().display()),
        }
    }

    pub fn user_detail(&self, connection_id: i64, user_id: &str) -> MetricsResult<UserDetail> {
        match self {
            Self::Mysql(store) => store.user_detail(connection_id, user_id),
            Self::Sqlite(store) => store.user_detail(connection_id, user_id),
        }
    }

    fn source(&self) -> &dyn MetricsSource {
        match self {
            Self::Mysql(store) => store,
            Self::Sqlite(store) => store,
        }
    }
}

impl MetricsSource for LakeStore {
    fn user_summaries(&self, connection_id: i64) -> MetricsResult<Vec<UserMetricsSummary>> {
        self.source().user_summaries(connection_id)
    }

    fn daily_records(
        &self,
        connection_id: i64,
        range: &DateRange,
    ) -> MetricsResult<Vec<DailyRecord>> {
        self.source().daily_records(connection_id, range)
    }

    fn aggregate(&self, connection_id: i64) -> MetricsResult<AggregatedMetrics> {
        self.source().aggregate(connection_id)
    }

    fn daily_trends(
        &self,
        connection_id: i64,
        window: &TrendWindow,
    ) -> MetricsResult<Vec<TrendPoint>> {
        self.source().daily_trends(connection_id, window)
    }

    fn rankings(&self, connection_id: i64, top_n: usize) -> MetricsResult<UserRankings> {
        self.source().rankings(connection_id, top_n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::mysql::MysqlSettings;

    #[test]
    fn describe_omits_credentials() {
        let store = LakeStore::Mysql(
            MysqlStore::new(MysqlSettings {
                password: "hunter2".into(),
                ..MysqlSettings::default()
            })
            .unwrap(),
        );
        let shown = store.describe();
        assert_eq!(shown, "mysql://localhost:3306/lake");
        assert!(!format!("{store:?}").contains("hunter2"));
    }

    #[test]
    fn sqlite_variant_dispatches() {
        let store = LakeStore::Sqlite(SqliteStore::new("/definitely/not/here/lake.db"));
        assert_eq!(store.describe(), "sqlite:/definitely/not/here/lake.db");
        let err = store.rankings(1, 5).unwrap_err();
        assert_eq!(err.kind(), "store_unavailable");
    }
}
