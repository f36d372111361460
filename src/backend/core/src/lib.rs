//! # Afterglow Core
//!
//! A request-triggered task executor in which part of the work each request
//! starts is deliberately **not awaited** before the response goes out: those
//! tasks keep running in the background, against a process whose lifetime is
//! not guaranteed beyond the response.
//!
//! ## Architecture
//!
//! - **Tasks**: named task units with a cooperative delay, optional extension
//!   callbacks, and a detachment primitive that decouples a task's lifetime
//!   from the response channel
//! - **Aggregator**: process-wide per-entity event buffer with
//!   threshold-triggered batch dispatch to the downstream queue
//! - **Queue**: outbound queue client (Redis transport, in-memory backend for
//!   tests and development)
//! - **API**: the HTTP surface exposing the stateless, failing, and tracked
//!   run variants
//! - **Observability**: structured logging and Prometheus metrics
//!
//! Background completion is best-effort by design: if the hosting environment
//! is recycled while detached work is pending, that work and any buffered,
//! undispatched events are lost. See `DESIGN.md` for the tradeoffs.

pub mod aggregator;
pub mod api;
pub mod config;
pub mod error;
pub mod observability;
pub mod queue;
pub mod tasks;

pub use error::{AfterglowError, ErrorCode, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::aggregator::{
        AggregatingExtension, DispatchOutcome, EventAggregator, RecordOutcome, RecordedEvent,
    };
    pub use crate::config::Config;
    pub use crate::error::{AfterglowError, ErrorCode, Result};
    pub use crate::queue::{InMemoryQueueBackend, QueueBackend, QueueMessage, RedisQueueBackend};
    pub use crate::tasks::{DetachedTask, TaskExtension, TaskResult, TaskRunner, TaskSpec};
}
