//! Durable deferred-reply queue: enqueue, inspection, and finalization.

mod ports;
mod service;
#[cfg(test)]
mod tests;
mod types;

pub use ports::QueueStore;
pub use service::{DEFAULT_PRIORITY, EnqueueRequest, QueueService};
pub use types::{
    EnqueueReceipt, FinalizeOutcome, NewQueueItem, QueueItem, QueueItemStatus, QueueStats,
};
