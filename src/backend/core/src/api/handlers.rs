//! API request handlers.
//!
//! The three run handlers share one contract: the response depends only on
//! the awaited task. Detached work keeps running after the response is sent,
//! and whether it completes — queue deliveries included — depends entirely
//! on the hosting environment staying alive long enough. The handlers
//! therefore always answer 200 for work they accepted; background outcomes
//! are visible through logs, metrics, and eventual queue contents only.

use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{AppState, RequestId};
use crate::aggregator::AggregatingExtension;
use crate::error::{AfterglowError, Result};
use crate::observability;
use crate::tasks::{self, DetachedTask, TaskExtension, TaskResult, TaskSpec};

/// Header carrying the aggregation entity id for the tracked route.
pub const ENTITY_ID_HEADER: &str = "x-entity-id";

const TASK_A: &str = "TaskA";
const TASK_B: &str = "TaskB";
const TASK_C: &str = "TaskC";

// ═══════════════════════════════════════════════════════════════════════════════
// Health Check and Metrics
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        observability::render_metrics(),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Run Handlers
// ═══════════════════════════════════════════════════════════════════════════════

/// Response body of the detached and failing routes.
///
/// `result_a` is a completed task result; `result_b`/`result_c` are
/// representations of still-pending work, not eventual results.
#[derive(Serialize)]
pub struct RunResponse {
    #[serde(rename = "resultA")]
    pub result_a: TaskResult,
    #[serde(rename = "resultB")]
    pub result_b: DetachedTask,
    #[serde(rename = "resultC")]
    pub result_c: DetachedTask,
}

/// Stateless variant: one awaited task, two detached ones.
pub async fn run_detached(
    State(state): State<AppState>,
    request_id: RequestId,
) -> Result<impl IntoResponse> {
    let result_a = state
        .runner
        .run_publishing(TaskSpec::new(&request_id.0, TASK_A, state.run.task_a_delay))
        .await?;

    let result_b = detach_publishing(&state, &request_id, TASK_B, state.run.task_b_delay);
    let result_c = detach_publishing(&state, &request_id, TASK_C, state.run.task_c_delay);

    Ok(Json(RunResponse {
        result_a,
        result_b,
        result_c,
    }))
}

/// Failure variant: TaskB's extension runs eagerly at call time and rejects
/// before TaskB's task unit is ever started.
///
/// The rejection happens on the handler's own control flow, but it belongs
/// to detached work: it must not disturb the already-completed TaskA result,
/// it never reaches the HTTP response, and TaskC starts regardless.
pub async fn run_failing(
    State(state): State<AppState>,
    request_id: RequestId,
) -> Result<impl IntoResponse> {
    let result_a = state
        .runner
        .run_publishing(TaskSpec::new(&request_id.0, TASK_A, state.run.task_a_delay))
        .await?;

    let extension = FailingExtension;
    let result_b = match extension.call(TASK_B, &request_id.0, None, None).await {
        Ok(()) => detach_publishing(&state, &request_id, TASK_B, state.run.task_b_delay),
        Err(err) => {
            warn!(
                task = TASK_B,
                request_id = %request_id,
                error = %err,
                "Detached task construction failed"
            );
            observability::metrics::record_detached_failure(TASK_B);
            DetachedTask::pending(TASK_B)
        }
    };

    let result_c = detach_publishing(&state, &request_id, TASK_C, state.run.task_c_delay);

    Ok(Json(RunResponse {
        result_a,
        result_b,
        result_c,
    }))
}

/// Stateful variant: awaited TaskA, then a detached TaskB whose extension
/// records one event for the caller's entity and dispatches the entity's
/// batch once the threshold is crossed.
pub async fn run_tracked(
    State(state): State<AppState>,
    request_id: RequestId,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let entity_id = headers
        .get(ENTITY_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| AfterglowError::missing_entity_id(ENTITY_ID_HEADER))?;

    state
        .runner
        .run_tracking(TaskSpec::new(&request_id.0, TASK_A, Duration::ZERO))
        .await?;

    let extension: Arc<dyn TaskExtension> = Arc::new(AggregatingExtension::new(
        state.aggregator.clone(),
        state.aggregation.settle_delay,
    ));
    let spec = TaskSpec::new(&request_id.0, TASK_B, Duration::ZERO)
        .with_extension(extension)
        .with_entity_id(&entity_id);
    let runner = state.runner.clone();
    tasks::detach(TASK_B, &request_id.0, async move {
        runner.run_tracking(spec).await
    });

    Ok(Json(serde_json::json!({ "message": "OK" })))
}

fn detach_publishing(
    state: &AppState,
    request_id: &RequestId,
    name: &'static str,
    delay: Duration,
) -> DetachedTask {
    let runner = state.runner.clone();
    let spec = TaskSpec::new(&request_id.0, name, delay);
    tasks::detach(name, &request_id.0, async move {
        runner.run_publishing(spec).await
    })
}

/// Extension wired to the failing route: it rejects before doing any work,
/// standing in for a broken downstream integration.
struct FailingExtension;

#[async_trait::async_trait]
impl TaskExtension for FailingExtension {
    async fn call(
        &self,
        name: &str,
        request_id: &str,
        _entity_id: Option<&str>,
        _delay: Option<Duration>,
    ) -> Result<()> {
        warn!(task = %name, request_id = %request_id, "Failing extension invoked");
        Err(AfterglowError::extension_failed(name, "synthetic rejection"))
    }
}
