//! AuditGraph Core
//!
//! Shared vocabulary of the graph synchronization engine: the event schema,
//! the durable queue contract, the non-blocking producer and the read-only
//! relational source contract.

pub mod config;
pub mod error;
pub mod event;
pub mod model;
pub mod producer;
pub mod queue;
pub mod sink;
pub mod source;

pub use config::SyncConfig;
pub use error::{CoreError, CoreResult};
pub use event::{EventEnvelope, EventType, SyncEvent};
pub use model::{NodeLabel, Properties, PropertyValue, RelType};
pub use producer::GraphEventProducer;
pub use queue::{EventQueue, Job, MemoryQueue, NewJob, QueueError, QueueResult, RetryPolicy};
pub use sink::EventSink;
pub use source::{RelationalSource, SourceError, SourceResult};
