//! Q Dev usage-metrics queries.
//!
//! # Module structure
//!
//! - [`types`]: row structs, query parameters, error type
//! - [`derive`]: safe rate and rounding helpers
//! - [`query`]: SQL against the lake tables, [`MetricsSource`] seam
//! - [`mysql`]: the lake's MySQL database
//! - [`sqlite`]: local mirrors and fixtures
//! - [`store`]: backend selection
//! - [`validate`]: invariant checks on fetched rows

pub mod derive;
pub mod mysql;
pub mod query;
pub mod sqlite;
pub mod store;
pub mod types;
pub mod validate;

pub use mysql::{MysqlSettings, MysqlStore};
pub use query::MetricsSource;
pub use sqlite::SqliteStore;
pub use store::LakeStore;
pub use types::{
    AcceptanceRank, AggregatedMetrics, AiLinesRank, DailyRecord, DateOrder, DateRange,
    MetricsError, MetricsResult, SuggestionRank, TrendPoint, TrendWindow, UserDetail,
    UserMetricsSummary, UserRankings,
};
pub use validate::{Sections, ValidateConfig, ValidationReport};
