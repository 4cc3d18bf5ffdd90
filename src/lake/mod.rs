//! Lake platform integration: connection provisioning, pipeline trigger and
//! the pipeline completion waiter.
//!
//! # Module structure
//!
//! - [`client`]: blocking REST client
//! - [`types`]: wire records and pipeline status mapping
//! - [`provision`]: create-or-reuse a connection
//! - [`trigger`]: create and start a metrics pipeline
//! - [`waiter`]: cancellable poll loop with a deadline

pub mod client;
pub mod provision;
pub mod trigger;
pub mod types;
pub mod waiter;

use std::time::Duration;

use thiserror::Error;

pub use client::LakeClient;
pub use provision::{MatchPolicy, ProvisionOutcome, ensure_connection};
pub use trigger::trigger_metrics_pipeline;
pub use types::{
    Connection, ConnectionRequest, ConnectionSettings, Pipeline, PipelinePlan, PipelineRequest,
    PipelineStatus, TriggeredPipeline, VersionInfo,
};
pub use waiter::{
    CancelToken, Clock, PipelineStatusSource, PipelineWaiter, SystemClock,
    TransportErrorPolicy, WaitOutcome, WaitPolicy,
};

#[derive(Error, Debug)]
pub enum LakeError {
    /// The platform rejected the request payload (4xx), or local checks did.
    #[error("request rejected (HTTP {status}): {message}")]
    Validation { status: u16, message: String },
    #[error("lake platform unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("pipeline {pipeline_id} did not finish within {}s", deadline.as_secs())]
    PipelineTimeout { pipeline_id: i64, deadline: Duration },
    #[error("wait for pipeline {pipeline_id} cancelled")]
    Cancelled { pipeline_id: i64 },
    #[error("unexpected response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

impl LakeError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::RemoteUnavailable(_) => "remote_unavailable",
            Self::PipelineTimeout { .. } => "pipeline_timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::Decode { .. } => "decode_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_))
    }

    /// Validation failure raised before any request is sent.
    pub(crate) fn local_validation(message: impl Into<String>) -> Self {
        Self::Validation {
            status: 0,
            message: message.into(),
        }
    }
}

pub type LakeResult<T> = std::result::Result<T, LakeError>;
