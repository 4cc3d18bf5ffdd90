//! Exporter configuration.
//!
//! Stored as TOML at `$XDG_CONFIG_HOME/qdev-exporter/config.toml` (or the
//! platform config dir). Every key is optional; a missing file yields the
//! defaults below. Credentials are usually supplied through the environment
//! instead of the file.
//!
//! # Example Configuration
//!
//! ```toml
//! [lake]
//! base_url = "http://lake.internal:8080"
//! timeout_secs = 30
//!
//! [store]
//! backend = "mysql"
//! host = "lake-db.internal"
//! port = 3306
//! user = "merico"
//! database = "lake"
//! connect_timeout_secs = 10
//!
//! [connection]
//! region = "us-east-1"
//! bucket = "q-dev-metrics"
//! match_by = "name"
//!
//! [pipeline]
//! poll_interval_secs = 30
//! max_wait_secs = 1800
//! on_transport_error = "abort"
//!
//! [export]
//! output_dir = "qdev_exports"
//! top_n = 10
//! trend_days = 30
//! pretty = true
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lake::types::{
    DEFAULT_CONNECTION_NAME, DEFAULT_PIPELINE_NAME, DEFAULT_RATE_LIMIT_PER_HOUR,
};
use crate::lake::{ConnectionSettings, MatchPolicy, TransportErrorPolicy, WaitPolicy};
use crate::metrics::MysqlSettings;

pub const ENV_ACCESS_KEY_ID: &str = "QDEV_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "QDEV_SECRET_ACCESS_KEY";
pub const ENV_LAKE_BASE_URL: &str = "LAKE_BASE_URL";
pub const ENV_DB_HOST: &str = "QDEV_DB_HOST";
pub const ENV_DB_PASSWORD: &str = "QDEV_DB_PASSWORD";

const APP_DIR: &str = "qdev-exporter";
const CONFIG_FILE: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Validation error: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Read(_) => "config_read_error",
            Self::Parse(_) => "config_parse_error",
            Self::NoConfigDir => "config_dir_missing",
            Self::Validation(_) => "config_invalid",
        }
    }

    pub fn is_retryable(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LakeSection {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for LakeSection {
    fn default() -> Self {
        Self {
            base_url: crate::lake::client::DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

/// Which database the Q Dev tables are read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// The lake's own MySQL database.
    #[default]
    Mysql,
    /// A local SQLite mirror at `path`.
    Sqlite,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub backend: StoreBackend,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub connect_timeout_secs: u64,
    /// SQLite mirror; only read when `backend = "sqlite"`.
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        let mysql = MysqlSettings::default();
        Self {
            backend: StoreBackend::Mysql,
            host: mysql.host,
            port: mysql.port,
            user: mysql.user,
            password: mysql.password,
            database: mysql.database,
            connect_timeout_secs: mysql.connect_timeout.as_secs(),
            path: PathBuf::from("lake.db"),
        }
    }
}

impl fmt::Debug for StoreSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSection")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("path", &self.path)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    pub name: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
    pub identity_store_id: String,
    /// Empty means "same as region".
    pub identity_store_region: String,
    pub rate_limit_per_hour: u32,
    pub match_by: MatchPolicy,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            name: DEFAULT_CONNECTION_NAME.to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            region: "us-east-1".to_string(),
            bucket: String::new(),
            identity_store_id: String::new(),
            identity_store_region: String::new(),
            rate_limit_per_hour: DEFAULT_RATE_LIMIT_PER_HOUR,
            match_by: MatchPolicy::Name,
        }
    }
}

impl fmt::Debug for ConnectionSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret = if self.secret_access_key.is_empty() {
            "<unset>"
        } else {
            "<redacted>"
        };
        f.debug_struct("ConnectionSection")
            .field("name", &self.name)
            .field("access_key_id_set", &!self.access_key_id.is_empty())
            .field("secret_access_key", &secret)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("identity_store_id", &self.identity_store_id)
            .field("identity_store_region", &self.identity_store_region)
            .field("rate_limit_per_hour", &self.rate_limit_per_hour)
            .field("match_by", &self.match_by)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub name: String,
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
    pub on_transport_error: TransportErrorPolicy,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            name: DEFAULT_PIPELINE_NAME.to_string(),
            poll_interval_secs: 30,
            max_wait_secs: 1800,
            on_transport_error: TransportErrorPolicy::Abort,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSection {
    pub output_dir: PathBuf,
    pub top_n: usize,
    pub trend_days: u32,
    pub pretty: bool,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("qdev_exports"),
            top_n: 10,
            trend_days: 30,
            pretty: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub lake: LakeSection,
    pub store: StoreSection,
    pub connection: ConnectionSection,
    pub pipeline: PipelineSection,
    pub export: ExportSection,
}

impl Config {
    /// Load from `explicit` or the default location, apply environment
    /// overrides, and validate.
    ///
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::parse_file(path)?,
            None => {
                let path = Self::config_path()?;
                if path.exists() {
                    Self::parse_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Default configuration file path.
    ///
    /// - Primary: `$XDG_CONFIG_HOME/qdev-exporter/config.toml`
    /// - Fallback: platform config dir
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            if !xdg_config.is_empty() {
                return Ok(PathBuf::from(xdg_config).join(APP_DIR).join(CONFIG_FILE));
            }
        }

        dirs::config_dir()
            .map(|p| p.join(APP_DIR).join(CONFIG_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Apply the `QDEV_*` and `LAKE_BASE_URL` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| dotenvy::var(key).ok());
    }

    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get(ENV_ACCESS_KEY_ID) {
            self.connection.access_key_id = v;
        }
        if let Some(v) = get(ENV_SECRET_ACCESS_KEY) {
            self.connection.secret_access_key = v;
        }
        if let Some(v) = get(ENV_LAKE_BASE_URL) {
            self.lake.base_url = v;
        }
        if let Some(v) = get(ENV_DB_HOST) {
            self.store.host = v;
        }
        if let Some(v) = get(ENV_DB_PASSWORD) {
            self.store.password = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Validation(msg.to_string()));

        if self.lake.base_url.trim().is_empty() {
            return invalid("lake.base_url cannot be empty");
        }
        let url = &self.lake.base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "lake.base_url must start with http:// or https://, got '{url}'"
            )));
        }
        if self.lake.timeout_secs == 0 {
            return invalid("lake.timeout_secs must be greater than zero");
        }
        match self.store.backend {
            StoreBackend::Mysql => {
                if self.store.host.trim().is_empty() {
                    return invalid("store.host cannot be empty");
                }
                if self.store.port == 0 {
                    return invalid("store.port must be greater than zero");
                }
                if self.store.database.trim().is_empty() {
                    return invalid("store.database cannot be empty");
                }
                if self.store.connect_timeout_secs == 0 {
                    return invalid("store.connect_timeout_secs must be greater than zero");
                }
            }
            StoreBackend::Sqlite => {
                if self.store.path.as_os_str().is_empty() {
                    return invalid("store.path cannot be empty");
                }
            }
        }
        if self.pipeline.poll_interval_secs == 0 {
            return invalid("pipeline.poll_interval_secs must be greater than zero");
        }
        if self.pipeline.max_wait_secs == 0 {
            return invalid("pipeline.max_wait_secs must be greater than zero");
        }
        if self.pipeline.poll_interval_secs > self.pipeline.max_wait_secs {
            return invalid("pipeline.poll_interval_secs cannot exceed pipeline.max_wait_secs");
        }
        if self.export.top_n == 0 {
            return invalid("export.top_n must be greater than zero");
        }
        if self.export.trend_days == 0 {
            return invalid("export.trend_days must be greater than zero");
        }
        if self.connection.rate_limit_per_hour == 0 {
            return invalid("connection.rate_limit_per_hour must be greater than zero");
        }
        Ok(())
    }

    pub fn lake_timeout(&self) -> Duration {
        Duration::from_secs(self.lake.timeout_secs)
    }

    pub fn mysql_settings(&self) -> MysqlSettings {
        let s = &self.store;
        MysqlSettings {
            host: s.host.clone(),
            port: s.port,
            user: s.user.clone(),
            password: s.password.clone(),
            database: s.database.clone(),
            connect_timeout: Duration::from_secs(s.connect_timeout_secs),
        }
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            interval: Duration::from_secs(self.pipeline.poll_interval_secs),
            deadline: Duration::from_secs(self.pipeline.max_wait_secs),
            on_transport_error: self.pipeline.on_transport_error,
        }
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        let c = &self.connection;
        let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.to_string());
        ConnectionSettings {
            name: non_empty(&c.name),
            access_key_id: c.access_key_id.clone(),
            secret_access_key: c.secret_access_key.clone(),
            region: c.region.clone(),
            bucket: c.bucket.clone(),
            identity_store_id: non_empty(&c.identity_store_id),
            identity_store_region: non_empty(&c.identity_store_region),
            rate_limit_per_hour: Some(c.rate_limit_per_hour),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.lake.base_url, "http://localhost:8080");
        assert_eq!(config.wait_policy(), WaitPolicy::default());
        assert_eq!(config.connection.match_by, MatchPolicy::Name);
        assert_eq!(config.export.top_n, 10);
        assert_eq!(config.store.backend, StoreBackend::Mysql);
        assert_eq!(config.mysql_settings(), MysqlSettings::default());
    }

    #[test]
    fn store_section_reads_mysql_fields() {
        let config: Config = toml::from_str(
            r#"
            [store]
            host = "lake-db.internal"
            port = 3307
            user = "reader"
            password = "pw"
            database = "lake_prod"
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        let s = config.mysql_settings();
        assert_eq!(s.host, "lake-db.internal");
        assert_eq!(s.port, 3307);
        assert_eq!(s.user, "reader");
        assert_eq!(s.password, "pw");
        assert_eq!(s.database, "lake_prod");
        assert_eq!(s.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn sqlite_backend_needs_only_a_path() {
        let mut config: Config =
            toml::from_str("[store]\nbackend = \"sqlite\"\npath = \"mirror.db\"\nhost = \"\"\n")
                .unwrap();
        config.validate().unwrap();
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.store.path, PathBuf::from("mirror.db"));

        config.store.backend = StoreBackend::Mysql;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [pipeline]
            max_wait_secs = 600
            on_transport_error = "tolerate"

            [connection]
            match_by = "any"
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.max_wait_secs, 600);
        assert_eq!(config.pipeline.poll_interval_secs, 30);
        assert_eq!(
            config.wait_policy().on_transport_error,
            TransportErrorPolicy::Tolerate
        );
        assert_eq!(config.connection.match_by, MatchPolicy::Any);
        assert_eq!(config.connection.name, "q_dev_connection");
    }

    #[test]
    fn unknown_enum_value_is_parse_error() {
        let err = toml::from_str::<Config>("[pipeline]\non_transport_error = \"retry\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut c = Config::default();
        c.pipeline.poll_interval_secs = 0;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.pipeline.poll_interval_secs = 60;
        c.pipeline.max_wait_secs = 30;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.export.top_n = 0;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.store.port = 0;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.lake.base_url = "lake:8080".into();
        let err = c.validate().unwrap_err();
        assert_eq!(err.kind(), "config_invalid");
    }

    #[test]
    fn env_overrides_apply_when_non_empty() {
        let env: HashMap<&str, &str> = [
            (ENV_ACCESS_KEY_ID, "AKIAENV"),
            (ENV_SECRET_ACCESS_KEY, "   "),
            (ENV_LAKE_BASE_URL, "http://lake:9000"),
            (ENV_DB_HOST, "10.0.0.7"),
            (ENV_DB_PASSWORD, "dbpass"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.connection.secret_access_key = "from-file".into();
        config.apply_env_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.connection.access_key_id, "AKIAENV");
        assert_eq!(config.connection.secret_access_key, "from-file");
        assert_eq!(config.lake.base_url, "http://lake:9000");
        assert_eq!(config.store.host, "10.0.0.7");
        assert_eq!(config.store.password, "dbpass");
    }

    #[test]
    fn connection_settings_map_empty_to_none() {
        let mut config = Config::default();
        config.connection.bucket = "b".into();
        let s = config.connection_settings();
        assert_eq!(s.name(), "q_dev_connection");
        assert_eq!(s.identity_store_id, None);
        assert_eq!(s.identity_store_region, None);
        assert_eq!(s.to_request().identity_store_region, "us-east-1");
    }

    #[test]
    fn debug_hides_secret() {
        let mut config = Config::default();
        config.connection.secret_access_key = "topsecretvalue".into();
        config.store.password = "lakedbpassword".into();
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("topsecretvalue"));
        assert!(!dbg.contains("lakedbpassword"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn explicit_missing_file_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Config::load(Some(tmp.path().join("nope.toml").as_path())).unwrap_err();
        assert_eq!(err.kind(), "config_read_error");
    }

    #[test]
    fn explicit_file_loads_and_validates() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("c.toml");
        std::fs::write(&path, "[export]\ntrend_days = 0\n").unwrap();
        let err = Config::load(Some(path.as_path())).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    #[serial]
    fn config_path_respects_xdg() {
        let tmp = tempfile::tempdir().unwrap();
        let old = std::env::var("XDG_CONFIG_HOME").ok();
        unsafe {
            std::env::set_var("XDG_CONFIG_HOME", tmp.path());
        }
        let path = Config::config_path();
        unsafe {
            match &old {
                Some(v) => std::env::set_var("XDG_CONFIG_HOME", v),
                None => std::env::remove_var("XDG_CONFIG_HOME"),
            }
        }
        assert_eq!(
            path.unwrap(),
            tmp.path().join("qdev-exporter").join("config.toml")
        );
    }
}
