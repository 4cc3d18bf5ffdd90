//! Submit and start the user-metrics collection pipeline.

use tracing::info;

use super::client::LakeClient;
use super::types::{
    DEFAULT_PIPELINE_NAME, Pipeline, PipelineRequest, PipelineStatus, TriggeredPipeline,
    metrics_plan,
};
use super::{LakeError, LakeResult};

/// The remote surface the trigger needs.
pub trait PipelineLauncher {
    fn create_pipeline(&self, request: &PipelineRequest) -> LakeResult<Pipeline>;
    fn run_pipeline(&self, id: i64) -> LakeResult<serde_json::Value>;
}

impl PipelineLauncher for LakeClient {
    fn create_pipeline(&self, request: &PipelineRequest) -> LakeResult<Pipeline> {
        LakeClient::create_pipeline(self, request)
    }

    fn run_pipeline(&self, id: i64) -> LakeResult<serde_json::Value> {
        LakeClient::run_pipeline(self, id)
    }
}

/// Build a one-stage plan for `connection_id`, create it, then start it.
///
/// Connection validity is left to the platform.
pub fn trigger_metrics_pipeline<L>(
    launcher: &L,
    connection_id: i64,
    name: Option<&str>,
) -> LakeResult<TriggeredPipeline>
where
    L: PipelineLauncher + ?Sized,
{
    if connection_id <= 0 {
        return Err(LakeError::local_validation(format!(
            "connection id must be positive, got {connection_id}"
        )));
    }
    let name = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_PIPELINE_NAME);

    let request = PipelineRequest {
        name: name.to_string(),
        plan: metrics_plan(connection_id),
    };
    let created = launcher.create_pipeline(&request)?;
    info!(pipeline_id = created.id, connection_id, name, "pipeline created");

    let run = launcher.run_pipeline(created.id)?;
    // The run endpoint may echo the pipeline; prefer its status when present.
    let raw_status = run
        .get("status")
        .and_then(|s| s.as_str())
        .unwrap_or(created.status.as_str());
    let status = PipelineStatus::from_remote(raw_status);
    info!(pipeline_id = created.id, %status, "pipeline started");

    Ok(TriggeredPipeline {
        id: created.id,
        name: if created.name.is_empty() {
            name.to_string()
        } else {
            created.name
        },
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<PipelineRequest>>,
        runs: Mutex<Vec<i64>>,
        run_reply: serde_json::Value,
    }

    impl PipelineLauncher for Recorder {
        fn create_pipeline(&self, request: &PipelineRequest) -> LakeResult<Pipeline> {
            self.requests.lock().push(request.clone());
            Ok(Pipeline {
                id: 11,
                name: request.name.clone(),
                status: "TASK_CREATED".into(),
                plan: None,
                message: None,
            })
        }

        fn run_pipeline(&self, id: i64) -> LakeResult<serde_json::Value> {
            self.runs.lock().push(id);
            Ok(self.run_reply.clone())
        }
    }

    #[test]
    fn creates_then_runs_with_default_name() {
        let rec = Recorder::default();
        let out = trigger_metrics_pipeline(&rec, 4, None).unwrap();
        assert_eq!(out.id, 11);
        assert_eq!(out.name, DEFAULT_PIPELINE_NAME);
        assert_eq!(out.status, PipelineStatus::Pending);
        assert_eq!(*rec.runs.lock(), vec![11]);
        let requests = rec.requests.lock();
        let req = &requests[0];
        assert_eq!(req.plan.len(), 1);
        assert_eq!(req.plan[0][0].connection_id, 4);
        assert_eq!(req.plan[0][0].plugin, "q_dev");
    }

    #[test]
    fn run_reply_status_wins() {
        let rec = Recorder {
            run_reply: serde_json::json!({"id": 11, "status": "TASK_RUNNING"}),
            ..Default::default()
        };
        let out = trigger_metrics_pipeline(&rec, 4, Some("nightly")).unwrap();
        assert_eq!(out.status, PipelineStatus::Running);
        assert_eq!(out.name, "nightly");
    }

    #[test]
    fn non_positive_connection_rejected_locally() {
        let rec = Recorder::default();
        let err = trigger_metrics_pipeline(&rec, 0, None).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert!(rec.requests.lock().is_empty());
    }
}
