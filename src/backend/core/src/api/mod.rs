//! API layer for Afterglow Core.
//!
//! Exposes the three run variants plus health and metrics endpoints. Every
//! run route answers 200 once its awaited task has completed; work that was
//! detached is represented in the body as pending and continues after the
//! response — its outcome is observable only out-of-band.

pub mod handlers;
mod request_id;

pub use handlers::ENTITY_ID_HEADER;
pub use request_id::{RequestId, REQUEST_ID_HEADER};

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::aggregator::EventAggregator;
use crate::config::{AggregationConfig, RunConfig};
use crate::tasks::TaskRunner;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub runner: TaskRunner,
    pub aggregator: Arc<EventAggregator>,
    pub run: RunConfig,
    pub aggregation: AggregationConfig,
}

/// Build the API router.
///
/// # Example
///
/// ```rust,ignore
/// let state = AppState { runner, aggregator, run, aggregation };
/// let app = build_router(state);
/// ```
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/api/v1/runs/detached", post(handlers::run_detached))
        .route("/api/v1/runs/failing", post(handlers::run_failing))
        .route("/api/v1/runs/tracked", post(handlers::run_tracked))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueueBackend;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn test_app(queue: Arc<InMemoryQueueBackend>) -> Router {
        let aggregator = Arc::new(EventAggregator::new(queue.clone(), 10));
        build_router(AppState {
            runner: TaskRunner::new(queue),
            aggregator,
            run: RunConfig::default(),
            aggregation: AggregationConfig::default(),
        })
    }

    fn post(uri: &str, request_id: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(REQUEST_ID_HEADER, request_id)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn sent_task_names(queue: &InMemoryQueueBackend) -> Vec<String> {
        queue
            .sent()
            .iter()
            .map(|m| m.body["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app(Arc::new(InMemoryQueueBackend::new()));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_detached_returns_pending_work() {
        let queue = Arc::new(InMemoryQueueBackend::new());
        let app = test_app(queue.clone());

        let response = app
            .oneshot(post("/api/v1/runs/detached", "req-1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let body = body_json(response).await;
        assert_eq!(body["resultA"], serde_json::json!({ "name": "TaskA" }));
        assert_eq!(body["resultB"]["status"], "pending");
        assert_eq!(body["resultC"]["status"], "pending");

        // At response time only the awaited task has published.
        assert_eq!(sent_task_names(&queue), vec!["TaskA"]);

        // The detached tasks keep running past the response.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(sent_task_names(&queue), vec!["TaskA", "TaskB", "TaskC"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_failing_still_answers_200_and_runs_task_c() {
        let queue = Arc::new(InMemoryQueueBackend::new());
        let app = test_app(queue.clone());

        let response = app
            .oneshot(post("/api/v1/runs/failing", "req-1"))
            .await
            .unwrap();

        // The extension's rejection is invisible to the caller: the status
        // and the body shape match the detached route exactly.
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["resultA"], serde_json::json!({ "name": "TaskA" }));
        assert_eq!(body["resultB"]["status"], "pending");
        assert_eq!(body["resultC"]["status"], "pending");

        // TaskB never started; TaskC was unaffected.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(sent_task_names(&queue), vec!["TaskA", "TaskC"]);
    }

    #[tokio::test]
    async fn test_run_tracked_requires_entity_header() {
        let app = test_app(Arc::new(InMemoryQueueBackend::new()));

        let response = app
            .oneshot(post("/api/v1/runs/tracked", "req-1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "MISSING_ENTITY_ID");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_tracked_answers_before_the_event_is_recorded() {
        let queue = Arc::new(InMemoryQueueBackend::new());
        let app = test_app(queue.clone());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/runs/tracked")
                    .header(REQUEST_ID_HEADER, "req-1")
                    .header(ENTITY_ID_HEADER, "X")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body, serde_json::json!({ "message": "OK" }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eleven_tracked_invocations_dispatch_one_batch() {
        let queue = Arc::new(InMemoryQueueBackend::new());
        let app = test_app(queue.clone());

        for i in 1..=11 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/api/v1/runs/tracked")
                        .header(REQUEST_ID_HEADER, format!("req-{}", i))
                        .header(ENTITY_ID_HEADER, "X")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);

            // Let the detached recording settle before the next invocation
            // so arrival order is deterministic.
            tokio::time::sleep(Duration::from_millis(300)).await;

            if i <= 10 {
                assert!(queue.batches().is_empty(), "no dispatch before the 11th");
            }
        }

        let batches = queue.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 11);
        assert_eq!(batches[0][0].id, "req-1");
        assert_eq!(batches[0][10].id, "req-11");
        assert_eq!(batches[0][0].body["name"], "TaskB");
    }
}
