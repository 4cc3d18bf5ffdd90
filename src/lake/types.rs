//! Wire records for the lake platform REST API.
//!
//! The platform speaks camelCase JSON. Records keep only the fields this
//! crate reads; anything else the server returns is ignored on decode.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Plugin every connection and pipeline stage in this crate targets.
pub const PLUGIN: &str = "q_dev";

/// Scope name of the user-metrics collection task.
pub const METRICS_SCOPE: &str = "Q Dev User Metrics";

pub const DEFAULT_CONNECTION_NAME: &str = "q_dev_connection";
pub const DEFAULT_PIPELINE_NAME: &str = "Q Dev Metrics Collection";
pub const DEFAULT_RATE_LIMIT_PER_HOUR: u32 = 20_000;

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// A registered data-source connection as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub identity_store_id: Option<String>,
    #[serde(default)]
    pub identity_store_region: Option<String>,
    #[serde(default)]
    pub rate_limit_per_hour: Option<u32>,
}

/// Settings a connection is provisioned from.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub name: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
    pub identity_store_id: Option<String>,
    pub identity_store_region: Option<String>,
    pub rate_limit_per_hour: Option<u32>,
}

impl ConnectionSettings {
    /// Configured name, or the default.
    pub fn name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_CONNECTION_NAME)
    }

    /// Names of required fields that are empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.access_key_id.trim().is_empty() {
            missing.push("access_key_id");
        }
        if self.secret_access_key.trim().is_empty() {
            missing.push("secret_access_key");
        }
        if self.region.trim().is_empty() {
            missing.push("region");
        }
        if self.bucket.trim().is_empty() {
            missing.push("bucket");
        }
        missing
    }

    /// Build the creation payload, filling defaults.
    pub fn to_request(&self) -> ConnectionRequest {
        let identity_store_region = self
            .identity_store_region
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| self.region.clone());
        ConnectionRequest {
            name: self.name().to_string(),
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            region: self.region.clone(),
            bucket: self.bucket.clone(),
            identity_store_id: self.identity_store_id.clone().filter(|s| !s.is_empty()),
            identity_store_region,
            rate_limit_per_hour: self
                .rate_limit_per_hour
                .unwrap_or(DEFAULT_RATE_LIMIT_PER_HOUR),
        }
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("name", &self.name())
            .field("access_key_id", &redact(&self.access_key_id))
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("identity_store_id", &self.identity_store_id)
            .field("identity_store_region", &self.identity_store_region)
            .field("rate_limit_per_hour", &self.rate_limit_per_hour)
            .finish()
    }
}

/// `POST /plugins/q_dev/connections` body.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    pub name: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
    /// Sent as `null` when unset.
    pub identity_store_id: Option<String>,
    pub identity_store_region: String,
    pub rate_limit_per_hour: u32,
}

impl fmt::Debug for ConnectionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRequest")
            .field("name", &self.name)
            .field("access_key_id", &redact(&self.access_key_id))
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("identity_store_id", &self.identity_store_id)
            .field("identity_store_region", &self.identity_store_region)
            .field("rate_limit_per_hour", &self.rate_limit_per_hour)
            .finish()
    }
}

/// Keep the first four characters of a key id.
fn redact(value: &str) -> String {
    let prefix: String = value.chars().take(4).collect();
    format!("{prefix}****")
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

/// One task of a plan stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanTask {
    pub plugin: String,
    pub connection_id: i64,
    pub scope: Vec<ScopeRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRef {
    pub name: String,
}

/// Ordered stages; tasks within a stage run in parallel on the platform.
pub type PipelinePlan = Vec<Vec<PlanTask>>;

/// One-stage plan collecting user metrics for `connection_id`.
pub fn metrics_plan(connection_id: i64) -> PipelinePlan {
    vec![vec![PlanTask {
        plugin: PLUGIN.to_string(),
        connection_id,
        scope: vec![ScopeRef {
            name: METRICS_SCOPE.to_string(),
        }],
    }]]
}

/// `POST /pipelines` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineRequest {
    pub name: String,
    pub plan: PipelinePlan,
}

/// A pipeline as reported by the platform. `status` is kept raw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    /// Kept opaque; the platform decorates stored plans with extra options.
    #[serde(default)]
    pub plan: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Pipeline {
    pub fn status(&self) -> PipelineStatus {
        PipelineStatus::from_remote(&self.status)
    }
}

/// Collapsed pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl PipelineStatus {
    /// Map a platform status string. Unknown values count as running so the
    /// waiter keeps polling until the deadline decides.
    pub fn from_remote(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TASK_CREATED" | "PENDING" => Self::Pending,
            "TASK_COMPLETED" | "COMPLETED" => Self::Completed,
            "TASK_FAILED" | "TASK_CANCELLED" | "TASK_PARTIAL" | "FAILED" => Self::Failed,
            _ => Self::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `GET /pipelines` is either a bare array or `{ "pipelines": [...], "count": n }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum PipelineList {
    Bare(Vec<Pipeline>),
    Paged {
        #[serde(default)]
        pipelines: Vec<Pipeline>,
    },
}

impl PipelineList {
    pub(crate) fn into_vec(self) -> Vec<Pipeline> {
        match self {
            Self::Bare(v) => v,
            Self::Paged { pipelines } => pipelines,
        }
    }
}

/// Summary returned by the trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggeredPipeline {
    pub id: i64,
    pub name: String,
    pub status: PipelineStatus,
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(default)]
    pub version: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            name: None,
            access_key_id: "AKIAEXAMPLEKEY".into(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG".into(),
            region: "us-west-2".into(),
            bucket: "metrics-bucket".into(),
            ..Default::default()
        }
    }

    #[test]
    fn request_fills_defaults() {
        let req = settings().to_request();
        assert_eq!(req.name, DEFAULT_CONNECTION_NAME);
        assert_eq!(req.identity_store_region, "us-west-2");
        assert_eq!(req.rate_limit_per_hour, 20_000);
        assert_eq!(req.identity_store_id, None);
    }

    #[test]
    fn request_serializes_camel_case_with_null_store_id() {
        let json = serde_json::to_value(settings().to_request()).unwrap();
        assert_eq!(json["accessKeyId"], "AKIAEXAMPLEKEY");
        assert_eq!(json["rateLimitPerHour"], 20_000);
        assert!(json["identityStoreId"].is_null());
        assert_eq!(json["identityStoreRegion"], "us-west-2");
    }

    #[test]
    fn debug_never_prints_secret() {
        let s = settings();
        let dbg = format!("{:?} {:?}", s, s.to_request());
        assert!(!dbg.contains("wJalrXUtnFEMI"));
        assert!(!dbg.contains("AKIAEXAMPLEKEY"));
        assert!(dbg.contains("AKIA****"));
    }

    #[test]
    fn missing_fields_lists_empty_credentials() {
        let s = ConnectionSettings {
            region: "us-east-1".into(),
            ..Default::default()
        };
        assert_eq!(
            s.missing_fields(),
            vec!["access_key_id", "secret_access_key", "bucket"]
        );
        assert!(settings().missing_fields().is_empty());
    }

    #[test]
    fn plan_shape() {
        let json = serde_json::to_value(metrics_plan(7)).unwrap();
        assert_eq!(
            json,
            serde_json::json!([[{
                "plugin": "q_dev",
                "connectionId": 7,
                "scope": [{"name": "Q Dev User Metrics"}]
            }]])
        );
    }

    #[test]
    fn status_mapping() {
        use PipelineStatus::*;
        for (raw, want) in [
            ("TASK_CREATED", Pending),
            ("PENDING", Pending),
            ("TASK_RUNNING", Running),
            ("TASK_RERUN", Running),
            ("RUNNING", Running),
            ("SOMETHING_NEW", Running),
            ("", Running),
            ("TASK_COMPLETED", Completed),
            ("completed", Completed),
            ("TASK_FAILED", Failed),
            ("TASK_CANCELLED", Failed),
            ("TASK_PARTIAL", Failed),
            ("FAILED", Failed),
        ] {
            assert_eq!(PipelineStatus::from_remote(raw), want, "{raw}");
        }
        assert!(Completed.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Pending.is_terminal());
        assert!(!Running.is_terminal());
    }

    #[test]
    fn pipeline_list_accepts_both_shapes() {
        let bare: PipelineList =
            serde_json::from_str(r#"[{"id":1,"name":"a","status":"TASK_RUNNING"}]"#).unwrap();
        assert_eq!(bare.into_vec().len(), 1);
        let paged: PipelineList = serde_json::from_str(
            r#"{"count":2,"pipelines":[{"id":1,"name":"a"},{"id":2,"name":"b"}]}"#,
        )
        .unwrap();
        let v = paged.into_vec();
        assert_eq!(v.len(), 2);
        assert_eq!(v[1].status(), PipelineStatus::Running);
    }

    #[test]
    fn connection_decodes_extra_fields() {
        let c: Connection = serde_json::from_str(
            r#"{"id":3,"name":"q_dev_connection","region":"us-east-1",
                "createdAt":"2024-01-01T00:00:00Z","rateLimitPerHour":20000}"#,
        )
        .unwrap();
        assert_eq!(c.id, 3);
        assert_eq!(c.rate_limit_per_hour, Some(20000));
        assert_eq!(c.bucket, None);
    }
}
