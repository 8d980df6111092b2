//! Application services and ports for admission control and deferred replies.

#![forbid(unsafe_code)]

mod admission_log;
mod clock;
mod executor;
mod global_window;
mod processor;
mod queue;
mod rate_limit;

pub use admission_log::{AccountUsage, AdmissionLogEntry, AdmissionLogStore, AdmissionStatus};
pub use clock::{Clock, SystemClock, hour_floor, window_label_at};
pub use executor::ActionExecutor;
pub use global_window::{GlobalWindow, GlobalWindowService, GlobalWindowStatus, GlobalWindowStore};
pub use processor::{BatchProcessor, ProcessingSummary, ProcessorConfig};
pub use queue::{
    DEFAULT_PRIORITY, EnqueueReceipt, EnqueueRequest, FinalizeOutcome, NewQueueItem, QueueItem,
    QueueItemStatus, QueueService, QueueStats, QueueStore,
};
pub use rate_limit::{
    AccountStatus, AdmissionDecision, AdmitOutcome, RateLimitPolicy, RateLimitRecord,
    RateLimitService, RateLimitStore,
};
