use ctrl_core::{Delivery, EnvironmentStatus};
use ctrl_model::{EnvironmentId, ExecutionResult, RunId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEnvironmentResponse {
    pub environment_id: EnvironmentId,
    pub run_id: RunId,
    /// `true` if the message started a new run rather than updating a live one.
    pub started: bool,
}

impl UpdateEnvironmentResponse {
    pub fn new(environment_id: impl Into<EnvironmentId>, delivery: &Delivery) -> Self {
        Self {
            environment_id: environment_id.into(),
            run_id: delivery.run_id().to_string(),
            started: delivery.is_started(),
        }
    }
}

/// Wire view of a live or finished environment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentView {
    pub environment_id: EnvironmentId,
    pub run_id: RunId,
    pub phase: String,
    pub finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallelism: Option<u32>,
    pub total_expected: usize,
    pub paused_count: usize,
    pub waiting: usize,
    pub live: usize,
    pub results: Vec<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<EnvironmentStatus> for EnvironmentView {
    fn from(status: EnvironmentStatus) -> Self {
        match status {
            EnvironmentStatus::Running(s) => Self {
                environment_id: s.environment_id,
                run_id: s.run_id,
                phase: s.phase.as_str().to_string(),
                finished: false,
                max_parallelism: Some(s.max_parallelism),
                total_expected: s.total_expected,
                paused_count: s.paused_count,
                waiting: s.waiting,
                live: s.live,
                results: s.results,
                error: None,
            },
            EnvironmentStatus::Finished(summary) => Self {
                environment_id: summary.environment_id.clone(),
                run_id: summary.run_id.clone(),
                phase: if summary.error.is_some() { "ABORTED" } else { "DONE" }.to_string(),
                finished: true,
                max_parallelism: None,
                total_expected: summary.results.len(),
                paused_count: 0,
                waiting: 0,
                live: 0,
                results: summary.results.clone(),
                error: summary.error.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ctrl_core::RunSummary;
    use serde_json::json;

    use super::*;

    #[test]
    fn update_response_is_camel_case() {
        let resp = UpdateEnvironmentResponse::new(
            "e1",
            &Delivery::Started {
                run_id: "r1".into(),
            },
        );
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({ "environmentId": "e1", "runId": "r1", "started": true })
        );
    }

    #[test]
    fn finished_view_reports_done_and_results() {
        let view = EnvironmentView::from(EnvironmentStatus::Finished(Arc::new(RunSummary {
            environment_id: "e1".into(),
            run_id: "r1".into(),
            results: vec![ExecutionResult::skipped("t1")],
            error: None,
        })));

        let v = serde_json::to_value(&view).unwrap();
        assert_eq!(v["phase"], "DONE");
        assert_eq!(v["finished"], true);
        assert_eq!(v["results"][0]["status"], "SKIPPED");
        assert!(v.get("error").is_none());
        assert!(v.get("maxParallelism").is_none());
    }

    #[test]
    fn aborted_view_carries_the_error() {
        let view = EnvironmentView::from(EnvironmentStatus::Finished(Arc::new(RunSummary {
            environment_id: "e1".into(),
            run_id: "r1".into(),
            results: Vec::new(),
            error: Some("scheduler invariant violated: x".into()),
        })));
        assert_eq!(view.phase, "ABORTED");
        assert!(view.error.is_some());
    }
}
