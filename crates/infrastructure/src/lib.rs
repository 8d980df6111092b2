//! Adapter implementations for the Replygate application ports.

#![forbid(unsafe_code)]

mod http_action_dispatcher;
mod in_memory_admission_log;
mod in_memory_global_window_store;
mod in_memory_queue_store;
mod in_memory_rate_limit_store;
mod postgres_admission_log;
mod postgres_global_window_store;
mod postgres_queue_store;
mod postgres_rate_limit_store;
mod redis_rate_limit_store;

pub use http_action_dispatcher::HttpActionDispatcher;
pub use in_memory_admission_log::InMemoryAdmissionLog;
pub use in_memory_global_window_store::InMemoryGlobalWindowStore;
pub use in_memory_queue_store::InMemoryQueueStore;
pub use in_memory_rate_limit_store::InMemoryRateLimitStore;
pub use postgres_admission_log::PostgresAdmissionLog;
pub use postgres_global_window_store::PostgresGlobalWindowStore;
pub use postgres_queue_store::PostgresQueueStore;
pub use postgres_rate_limit_store::PostgresRateLimitStore;
pub use redis_rate_limit_store::RedisRateLimitStore;
