//! Outbound queue client.
//!
//! The queue is an external durable collaborator; this module only knows how
//! to deliver messages to it. A batch send is a single call: the caller
//! cannot observe partial delivery, which is exactly the contract the
//! aggregator's retention-on-failure logic relies on.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{AfterglowError, ErrorCode, Result};

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Message identifier (derived from the originating request id)
    pub id: String,
    /// JSON message body
    pub body: serde_json::Value,
}

/// Trait for outbound queue backends.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Deliver a single message.
    async fn send(&self, message: QueueMessage) -> Result<()>;

    /// Deliver a batch of messages in one call.
    async fn send_batch(&self, messages: Vec<QueueMessage>) -> Result<()>;
}

/// Redis-backed queue for production use.
///
/// Messages are serialized and `RPUSH`ed onto a configured list key; a batch
/// is one variadic `RPUSH`.
pub struct RedisQueueBackend {
    client: redis::Client,
    queue_key: String,
}

impl RedisQueueBackend {
    /// Create a new Redis queue backend.
    ///
    /// # Arguments
    /// * `client` - A connected Redis client
    /// * `queue_key` - The Redis list key to push to (e.g. `"afterglow:outbound"`)
    pub fn new(client: redis::Client, queue_key: impl Into<String>) -> Self {
        Self {
            client,
            queue_key: queue_key.into(),
        }
    }

    /// Obtain an async multiplexed connection from the Redis client.
    async fn get_conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                AfterglowError::with_internal(
                    ErrorCode::QueueConnectionFailed,
                    "Failed to get Redis connection for the outbound queue",
                    e.to_string(),
                )
            })
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn send(&self, message: QueueMessage) -> Result<()> {
        let serialized = serde_json::to_string(&message)?;

        let mut conn = self.get_conn().await?;
        redis::cmd("RPUSH")
            .arg(&self.queue_key)
            .arg(&serialized)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| {
                AfterglowError::with_internal(
                    ErrorCode::QueueSendFailed,
                    "Failed to deliver message to the outbound queue",
                    e.to_string(),
                )
            })?;

        tracing::debug!(queue = %self.queue_key, message_id = %message.id, "Message delivered");
        Ok(())
    }

    async fn send_batch(&self, messages: Vec<QueueMessage>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut cmd = redis::cmd("RPUSH");
        cmd.arg(&self.queue_key);
        for message in &messages {
            cmd.arg(serde_json::to_string(message)?);
        }

        let mut conn = self.get_conn().await?;
        cmd.query_async::<_, i64>(&mut conn).await.map_err(|e| {
            AfterglowError::with_internal(
                ErrorCode::QueueSendFailed,
                "Failed to deliver batch to the outbound queue",
                e.to_string(),
            )
        })?;

        tracing::debug!(queue = %self.queue_key, batch_len = messages.len(), "Batch delivered");
        Ok(())
    }
}

/// In-memory queue backend for testing and development.
///
/// Records every delivery; `fail_next` forces the next call to fail so
/// dispatch-failure handling can be exercised.
#[derive(Default)]
pub struct InMemoryQueueBackend {
    sent: Mutex<Vec<QueueMessage>>,
    batches: Mutex<Vec<Vec<QueueMessage>>>,
    fail_next: AtomicBool,
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages delivered so far, in delivery order.
    pub fn sent(&self) -> Vec<QueueMessage> {
        self.sent.lock().clone()
    }

    /// All batches delivered so far.
    pub fn batches(&self) -> Vec<Vec<QueueMessage>> {
        self.batches.lock().clone()
    }

    /// Force the next `send` or `send_batch` call to fail.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn take_failure(&self) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(AfterglowError::with_internal(
                ErrorCode::QueueSendFailed,
                "Failed to deliver message to the outbound queue",
                "forced failure",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn send(&self, message: QueueMessage) -> Result<()> {
        self.take_failure()?;
        self.sent.lock().push(message);
        Ok(())
    }

    async fn send_batch(&self, messages: Vec<QueueMessage>) -> Result<()> {
        self.take_failure()?;
        self.batches.lock().push(messages.clone());
        self.sent.lock().extend(messages);
        Ok(())
    }
}
