//! Application Services
//!
//! The write path (queue → buffer → scheduler → storage) and the read path
//! (conversion engine → storage). Both only see the `StorageBackend` port.

mod buffer;
mod converter;
mod queue;
mod scheduler;

pub use buffer::QuoteBuffer;
pub use converter::{ConversionEngine, EngineConfig};
pub use queue::{BoundedQueue, MIN_QUEUE_CAPACITY};
pub use scheduler::{ConsumerScheduler, FlushReport, SchedulerConfig, SchedulerHandle};
