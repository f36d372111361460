//! Per-entity event buffering with threshold-triggered batch dispatch.
//!
//! The aggregator owns a process-wide mapping from entity id to the ordered
//! events recorded for it. Entries are created on an entity's first event,
//! grown by each qualifying invocation, and deleted only when a batch is
//! successfully delivered. An entity key exists in the mapping if and only
//! if it has at least one buffered, undispatched event.
//!
//! Dispatch policy: an event is appended first, then the length the buffer
//! had *before* that append is compared against the threshold. Dispatch
//! fires only when the pre-append length already met the threshold, and the
//! batch carries every buffered event including the one just appended — so a
//! threshold of 10 produces batches of 11. That off-by-one is part of the
//! observed contract and is pinned by tests; do not "fix" it here.
//!
//! Delivery guarantees: at-least-once, non-idempotent. A failed batch send
//! leaves the entry untouched, so its events are re-delivered (duplicated)
//! alongside newer ones at the next crossing. The buffer itself is
//! process-local and unsynchronized across environments: two concurrently
//! provisioned processes serving the same entity keep independent buffers
//! that each cross the threshold on their own, and recycling a process drops
//! whatever it had buffered. Accepted tradeoffs — see `DESIGN.md`.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{AfterglowError, Result};
use crate::observability;
use crate::queue::{QueueBackend, QueueMessage};
use crate::tasks::{self, TaskExtension};

/// Opaque caller-supplied key grouping events for aggregation.
pub type EntityId = String;

/// One recorded event: which task observed which request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub name: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

/// Buffer lengths around a single `record` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    /// Buffered length before the event was appended
    pub previous_len: usize,
    /// Buffered length after the append
    pub buffered_len: usize,
}

/// What `record_and_dispatch` did with the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Below threshold: the event was buffered and nothing was sent.
    Buffered { buffered_len: usize },
    /// The threshold was met: the entity's full buffer went out as one batch.
    Dispatched { batch_len: usize },
}

/// Process-wide entity event buffer with threshold-triggered dispatch.
///
/// The mapping is private by design; `record`, `drain_if_threshold_met` and
/// `record_and_dispatch` are the only mutation entry points. The mutex
/// restores the single-writer-at-a-time discipline that overlapping
/// invocations would otherwise violate; it is never held across an await.
pub struct EventAggregator {
    buffer: Mutex<HashMap<EntityId, Vec<RecordedEvent>>>,
    queue: Arc<dyn QueueBackend>,
    threshold: usize,
}

impl EventAggregator {
    pub fn new(queue: Arc<dyn QueueBackend>, threshold: usize) -> Self {
        Self {
            buffer: Mutex::new(HashMap::new()),
            queue,
            threshold,
        }
    }

    /// Append `event` to the entity's sequence, creating it if absent.
    ///
    /// Events for one entity stay in invocation arrival order as observed by
    /// this process; no ordering holds across processes.
    pub fn record(&self, entity_id: &str, event: RecordedEvent) -> RecordOutcome {
        let outcome = {
            let mut buffer = self.buffer.lock();
            let events = buffer.entry(entity_id.to_string()).or_default();
            let previous_len = events.len();
            events.push(event);
            RecordOutcome {
                previous_len,
                buffered_len: events.len(),
            }
        };

        debug!(
            entity_id = %entity_id,
            buffered = outcome.buffered_len,
            "Event buffered"
        );
        observability::metrics::record_event_buffered();
        outcome
    }

    /// If the entity's buffered length is at or above the threshold,
    /// atomically remove and return the full sequence; otherwise leave the
    /// buffer untouched and return `None`.
    pub fn drain_if_threshold_met(&self, entity_id: &str) -> Option<Vec<RecordedEvent>> {
        let mut buffer = self.buffer.lock();
        match buffer.get(entity_id) {
            Some(events) if events.len() >= self.threshold => buffer.remove(entity_id),
            _ => None,
        }
    }

    /// Record `event`, then dispatch the entity's buffer if its *pre-append*
    /// length already met the threshold.
    ///
    /// On dispatch failure the entry is retained in full — including the
    /// just-appended event — and the error propagates to the caller (a
    /// detached extension, so it surfaces only in logs and metrics).
    pub async fn record_and_dispatch(
        &self,
        entity_id: &str,
        event: RecordedEvent,
    ) -> Result<DispatchOutcome> {
        let batch = {
            let mut buffer = self.buffer.lock();
            let events = buffer.entry(entity_id.to_string()).or_default();
            let previous_len = events.len();
            events.push(event);
            let buffered_len = events.len();

            if previous_len < self.threshold {
                drop(buffer);
                debug!(entity_id = %entity_id, buffered = buffered_len, "Event buffered");
                observability::metrics::record_event_buffered();
                return Ok(DispatchOutcome::Buffered { buffered_len });
            }

            // Pre-append length met the threshold: ship the whole buffer,
            // the freshly appended event included (threshold + 1 messages).
            events.clone()
        };

        debug!(entity_id = %entity_id, buffered = batch.len(), "Event buffered");
        observability::metrics::record_event_buffered();

        self.dispatch(entity_id, batch).await
    }

    async fn dispatch(
        &self,
        entity_id: &str,
        batch: Vec<RecordedEvent>,
    ) -> Result<DispatchOutcome> {
        let messages = batch
            .iter()
            .map(|event| {
                Ok(QueueMessage {
                    id: event.request_id.clone(),
                    body: serde_json::to_value(event)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let batch_len = messages.len();

        if let Err(err) = self.queue.send_batch(messages).await {
            observability::metrics::record_dispatch_failure();
            return Err(err);
        }

        // Delivery confirmed: the entry is deleted in full. Events recorded
        // while the send was in flight go with it; this mirrors the
        // full-reset semantics of the buffer.
        self.buffer.lock().remove(entity_id);

        info!(entity_id = %entity_id, batch_len, "Batch dispatched");
        observability::metrics::record_batch_dispatched(batch_len);

        Ok(DispatchOutcome::Dispatched { batch_len })
    }
}

/// Task extension that funnels one event per invocation into the aggregator.
///
/// Waits out a fixed propagation lag before recording, then runs the
/// record-and-maybe-dispatch flow for the invocation's entity id.
pub struct AggregatingExtension {
    aggregator: Arc<EventAggregator>,
    settle_delay: Duration,
}

impl AggregatingExtension {
    pub fn new(aggregator: Arc<EventAggregator>, settle_delay: Duration) -> Self {
        Self {
            aggregator,
            settle_delay,
        }
    }
}

#[async_trait]
impl TaskExtension for AggregatingExtension {
    async fn call(
        &self,
        name: &str,
        request_id: &str,
        entity_id: Option<&str>,
        _delay: Option<Duration>,
    ) -> Result<()> {
        let entity_id =
            entity_id.ok_or_else(|| AfterglowError::validation("Extension requires an entity id"))?;

        tasks::delay(self.settle_delay).await;

        let event = RecordedEvent {
            name: name.to_string(),
            request_id: request_id.to_string(),
        };
        self.aggregator.record_and_dispatch(entity_id, event).await?;
        Ok(())
    }
}
