//! Task units and the detachment primitive.
//!
//! A task unit is a named piece of work tied to one request: it logs a start
//! marker, suspends for its configured duration, optionally invokes an
//! extension callback, and (in the publishing variant) delivers one message
//! to the outbound queue. Handlers either await a task unit — the response
//! then depends on its result — or detach it, in which case it keeps running
//! after the response is sent and its outcome is visible only through logs
//! and metrics.
//!
//! The two run variants treat extensions differently on purpose: the
//! publishing task fires its extension without awaiting it, while the
//! tracking task awaits it. Callers rely on both behaviors; do not unify
//! them.

use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::observability;
use crate::queue::{QueueBackend, QueueMessage};

/// Suspend the calling logical task for `duration`.
///
/// Only the caller is suspended; other tasks in the process keep making
/// progress. There is no cancellation surface: once suspended, a task cannot
/// be aborted externally. Stands in for any blocking I/O wait.
pub async fn delay(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Result record produced by a completed task unit.
///
/// Ephemeral: created per invocation, serialized into the response when the
/// task was awaited, dropped otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub name: String,
}

/// Extension callback invoked by a task unit.
///
/// Extensions receive the task name, the originating request id, and — when
/// the caller supplied them — the aggregation entity id and the task's
/// configured delay.
#[async_trait]
pub trait TaskExtension: Send + Sync {
    async fn call(
        &self,
        name: &str,
        request_id: &str,
        entity_id: Option<&str>,
        delay: Option<Duration>,
    ) -> Result<()>;
}

/// Specification of one task unit invocation.
pub struct TaskSpec {
    pub request_id: String,
    pub name: String,
    pub delay: Duration,
    pub extension: Option<Arc<dyn TaskExtension>>,
    pub entity_id: Option<String>,
}

impl TaskSpec {
    pub fn new(request_id: impl Into<String>, name: impl Into<String>, delay: Duration) -> Self {
        Self {
            request_id: request_id.into(),
            name: name.into(),
            delay,
            extension: None,
            entity_id: None,
        }
    }

    pub fn with_extension(mut self, extension: Arc<dyn TaskExtension>) -> Self {
        self.extension = Some(extension);
        self
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }
}

/// Executes task units against the outbound queue.
#[derive(Clone)]
pub struct TaskRunner {
    queue: Arc<dyn QueueBackend>,
}

impl TaskRunner {
    pub fn new(queue: Arc<dyn QueueBackend>) -> Self {
        Self { queue }
    }

    /// Run a publishing task unit: delay, fire the extension without
    /// awaiting it, deliver one `{requestId, name}` message to the queue.
    ///
    /// Extension failures land in the log and the detached-failure counter,
    /// never in the returned result. The queue delivery has no retry.
    pub async fn run_publishing(&self, spec: TaskSpec) -> Result<TaskResult> {
        info!(task = %spec.name, request_id = %spec.request_id, "Task started");
        observability::metrics::record_task_started(&spec.name);

        delay(spec.delay).await;
        debug!(task = %spec.name, request_id = %spec.request_id, "Task awake");

        if let Some(extension) = spec.extension.clone() {
            let name = spec.name.clone();
            let request_id = spec.request_id.clone();
            let entity_id = spec.entity_id.clone();
            let task_delay = spec.delay;
            tokio::spawn(async move {
                if let Err(err) = extension
                    .call(&name, &request_id, entity_id.as_deref(), Some(task_delay))
                    .await
                {
                    warn!(task = %name, request_id = %request_id, error = %err, "Extension failed");
                    observability::metrics::record_detached_failure(&name);
                }
            });
        }

        self.queue
            .send(QueueMessage {
                id: spec.request_id.clone(),
                body: serde_json::json!({
                    "requestId": spec.request_id,
                    "name": spec.name,
                }),
            })
            .await?;

        info!(task = %spec.name, request_id = %spec.request_id, "Task completed");
        observability::metrics::record_task_completed(&spec.name);

        Ok(TaskResult { name: spec.name })
    }

    /// Run a tracking task unit: delay, then await the extension when
    /// present. Publishes nothing itself — delivery, if any, happens inside
    /// the extension. Extension errors propagate to the caller.
    pub async fn run_tracking(&self, spec: TaskSpec) -> Result<TaskResult> {
        info!(task = %spec.name, request_id = %spec.request_id, "Task started");
        observability::metrics::record_task_started(&spec.name);

        delay(spec.delay).await;

        if let Some(extension) = &spec.extension {
            extension
                .call(
                    &spec.name,
                    &spec.request_id,
                    spec.entity_id.as_deref(),
                    Some(spec.delay),
                )
                .await?;
        }

        info!(task = %spec.name, request_id = %spec.request_id, "Task completed");
        observability::metrics::record_task_completed(&spec.name);

        Ok(TaskResult { name: spec.name })
    }
}

/// Representation of work started but not awaited.
///
/// This is what the response body carries for a detached task: a pending
/// marker, not the task's eventual result.
#[derive(Debug, Clone, Serialize)]
pub struct DetachedTask {
    pub name: String,
    pub status: &'static str,
}

impl DetachedTask {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: "pending",
        }
    }
}

/// Spawn `future` with a lifetime decoupled from the response channel.
///
/// The returned handle is only a pending-work representation; the spawned
/// task cannot be awaited or cancelled through it. A failure inside the
/// future is logged and counted, never propagated — and if the process is
/// torn down first, the work is silently lost. Best-effort by design.
pub fn detach<F>(name: impl Into<String>, request_id: impl Into<String>, future: F) -> DetachedTask
where
    F: Future<Output = Result<TaskResult>> + Send + 'static,
{
    let name = name.into();
    let request_id = request_id.into();
    let task = name.clone();

    tokio::spawn(async move {
        if let Err(err) = future.await {
            warn!(task = %task, request_id = %request_id, error = %err, "Detached task failed");
            observability::metrics::record_detached_failure(&task);
        }
    });

    DetachedTask::pending(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AfterglowError;
    use crate::queue::InMemoryQueueBackend;
    use parking_lot::Mutex;
    use tokio_test::assert_ok;

    /// Extension that records its invocations.
    #[derive(Default)]
    struct RecordingExtension {
        calls: Mutex<Vec<(String, String, Option<String>)>>,
    }

    #[async_trait]
    impl TaskExtension for RecordingExtension {
        async fn call(
            &self,
            name: &str,
            request_id: &str,
            entity_id: Option<&str>,
            _delay: Option<Duration>,
        ) -> Result<()> {
            self.calls.lock().push((
                name.to_string(),
                request_id.to_string(),
                entity_id.map(str::to_string),
            ));
            Ok(())
        }
    }

    struct FailingExtension;

    #[async_trait]
    impl TaskExtension for FailingExtension {
        async fn call(
            &self,
            name: &str,
            _request_id: &str,
            _entity_id: Option<&str>,
            _delay: Option<Duration>,
        ) -> Result<()> {
            Err(AfterglowError::extension_failed(name, "synthetic rejection"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishing_task_delivers_one_message() {
        let queue = Arc::new(InMemoryQueueBackend::new());
        let runner = TaskRunner::new(queue.clone());

        let result = runner
            .run_publishing(TaskSpec::new("req-1", "TaskA", Duration::from_millis(1000)))
            .await
            .unwrap();

        assert_eq!(result, TaskResult { name: "TaskA".into() });
        let sent = queue.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, "req-1");
        assert_eq!(sent[0].body["name"], "TaskA");
        assert_eq!(sent[0].body["requestId"], "req-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishing_task_survives_extension_failure() {
        let queue = Arc::new(InMemoryQueueBackend::new());
        let runner = TaskRunner::new(queue.clone());

        let spec = TaskSpec::new("req-1", "TaskB", Duration::from_millis(10))
            .with_extension(Arc::new(FailingExtension));
        let result = runner.run_publishing(spec).await;

        // The extension is fired, not awaited: its rejection never reaches
        // the task's own result.
        assert_ok!(result);
        assert_eq!(queue.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracking_task_awaits_extension() {
        let queue = Arc::new(InMemoryQueueBackend::new());
        let runner = TaskRunner::new(queue.clone());
        let extension = Arc::new(RecordingExtension::default());

        let spec = TaskSpec::new("req-9", "TaskB", Duration::ZERO)
            .with_extension(extension.clone())
            .with_entity_id("X");
        runner.run_tracking(spec).await.unwrap();

        let calls = extension.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            ("TaskB".to_string(), "req-9".to_string(), Some("X".to_string()))
        );
        // Tracking tasks never publish on their own.
        assert!(queue.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracking_task_propagates_extension_error() {
        let runner = TaskRunner::new(Arc::new(InMemoryQueueBackend::new()));

        let spec = TaskSpec::new("req-9", "TaskB", Duration::ZERO)
            .with_extension(Arc::new(FailingExtension));
        let err = runner.run_tracking(spec).await.unwrap_err();
        assert_eq!(err.user_message(), "TaskB Failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_returns_pending_and_runs_in_background() {
        let queue = Arc::new(InMemoryQueueBackend::new());
        let runner = TaskRunner::new(queue.clone());

        let spec = TaskSpec::new("req-2", "TaskC", Duration::from_millis(3000));
        let handle = detach("TaskC", "req-2", {
            let runner = runner.clone();
            async move { runner.run_publishing(spec).await }
        });

        assert_eq!(handle.status, "pending");
        // Nothing has been delivered at detach time.
        assert!(queue.sent().is_empty());

        // Let the background task run to completion.
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(queue.sent().len(), 1);
        assert_eq!(queue.sent()[0].body["name"], "TaskC");
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_failure_is_swallowed() {
        let runner = TaskRunner::new(Arc::new(InMemoryQueueBackend::new()));

        let spec = TaskSpec::new("req-3", "TaskB", Duration::ZERO)
            .with_extension(Arc::new(FailingExtension));
        detach("TaskB", "req-3", {
            let runner = runner.clone();
            async move { runner.run_tracking(spec).await }
        });

        // The failure must not panic or propagate anywhere; yielding long
        // enough for the spawned task to finish is the whole assertion.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
