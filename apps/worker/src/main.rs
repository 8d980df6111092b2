//! Replygate queue worker runtime.
//!
//! Owns the invocation cadence the core deliberately does not: a poll loop
//! drives `process_batch`, and a lower-frequency tick runs queue retention
//! cleanup and global-window finalization.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use replygate_application::{
    BatchProcessor, Clock, GlobalWindowService, ProcessorConfig, QueueService, RateLimitPolicy,
    RateLimitService, SystemClock,
};
use replygate_core::{AppError, AppResult};
use replygate_infrastructure::{
    HttpActionDispatcher, PostgresAdmissionLog, PostgresGlobalWindowStore, PostgresQueueStore,
    PostgresRateLimitStore,
};

#[derive(Debug, Clone)]
struct WorkerConfig {
    database_url: String,
    platform_api_base_url: String,
    platform_api_token: String,
    batch_limit: usize,
    max_retries: i32,
    lease_seconds: i64,
    poll_interval_ms: u64,
    cleanup_interval_seconds: u64,
    retention_days: i64,
    policy: RateLimitPolicy,
    app_hourly_limit: Option<i64>,
    dispatch_max_attempts: u8,
    dispatch_retry_backoff_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let pool = connect_pool(config.database_url.as_str()).await?;

    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let admission_log = Arc::new(PostgresAdmissionLog::new(pool.clone()));
    let queue = QueueService::new(
        Arc::new(PostgresQueueStore::new(pool.clone())),
        admission_log.clone(),
        clock.clone(),
    );

    let global_window = config
        .app_hourly_limit
        .map(|app_limit| {
            GlobalWindowService::new(
                Arc::new(PostgresGlobalWindowStore::new(pool.clone())),
                app_limit,
            )
        })
        .transpose()?;

    let mut rate_limiter = RateLimitService::new(
        Arc::new(PostgresRateLimitStore::new(pool.clone())),
        admission_log,
        clock.clone(),
        config.policy,
    )?;
    if let Some(global_window) = global_window.clone() {
        rate_limiter = rate_limiter.with_global_window(global_window);
    }

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;
    let executor = Arc::new(HttpActionDispatcher::new(
        http_client,
        config.platform_api_base_url.clone(),
        config.platform_api_token.clone(),
        config.dispatch_max_attempts,
        config.dispatch_retry_backoff_ms,
    ));

    let mut processor = BatchProcessor::new(
        queue.clone(),
        rate_limiter,
        executor,
        clock.clone(),
        ProcessorConfig {
            batch_limit: config.batch_limit,
            max_retries: config.max_retries,
            lease_seconds: config.lease_seconds,
        },
    )?;
    if let Some(global_window) = global_window.clone() {
        processor = processor.with_global_window(global_window);
    }

    info!(
        batch_limit = config.batch_limit,
        poll_interval_ms = config.poll_interval_ms,
        cleanup_interval_seconds = config.cleanup_interval_seconds,
        retention_days = config.retention_days,
        app_hourly_limit = config.app_hourly_limit,
        "replygate-worker started"
    );

    let cleanup_interval = Duration::from_secs(config.cleanup_interval_seconds);
    let mut last_cleanup = Instant::now();

    loop {
        match processor.process_batch().await {
            Ok(summary) => {
                if summary.processed > 0 || summary.skipped > 0 || summary.retry_capped > 0 {
                    info!(
                        processed = summary.processed,
                        succeeded = summary.succeeded,
                        failed = summary.failed,
                        skipped = summary.skipped,
                        retry_capped = summary.retry_capped,
                        "processed queue batch"
                    );
                }
            }
            Err(error) => {
                warn!(error = %error, "queue batch processing failed");
            }
        }

        if last_cleanup.elapsed() >= cleanup_interval {
            last_cleanup = Instant::now();

            match queue.cleanup(config.retention_days).await {
                Ok(deleted) if deleted > 0 => {
                    info!(deleted, "purged terminal queue items");
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(error = %error, "queue cleanup failed");
                }
            }

            if let Some(global_window) = &global_window {
                match global_window.finalize_expired(clock.now()).await {
                    Ok(finalized) if finalized > 0 => {
                        info!(finalized, "finalized ended global windows");
                    }
                    Ok(_) => {}
                    Err(error) => {
                        warn!(error = %error, "global window finalization failed");
                    }
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
    }
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        let database_url = required_env("DATABASE_URL")?;
        let platform_api_base_url = required_env("PLATFORM_API_BASE_URL")?
            .trim_end_matches('/')
            .to_owned();
        let platform_api_token = required_env("PLATFORM_API_TOKEN")?;

        let batch_limit = parse_env_usize("WORKER_BATCH_LIMIT", 100)?;
        let max_retries = parse_env_i32("WORKER_MAX_RETRIES", 5)?;
        let lease_seconds = parse_env_i64("WORKER_LEASE_SECONDS", 120)?;
        let poll_interval_ms = parse_env_u64("WORKER_POLL_INTERVAL_MS", 5000)?;
        let cleanup_interval_seconds = parse_env_u64("CLEANUP_INTERVAL_SECONDS", 1800)?;
        let retention_days = parse_env_i64("RETENTION_DAYS", 7)?;

        let policy = RateLimitPolicy {
            hard_limit: parse_env_i32("RATE_LIMIT_HARD_LIMIT", 180)?,
            block_threshold: parse_env_i32("RATE_LIMIT_BLOCK_THRESHOLD", 170)?,
            window_seconds: parse_env_i64("RATE_LIMIT_WINDOW_SECONDS", 3600)?,
            block_seconds: parse_env_i64("RATE_LIMIT_BLOCK_SECONDS", 300)?,
        };
        policy.validate()?;

        let app_hourly_limit = match env::var("APP_HOURLY_LIMIT") {
            Ok(value) if !value.trim().is_empty() => {
                Some(value.trim().parse::<i64>().map_err(|error| {
                    AppError::Validation(format!(
                        "invalid APP_HOURLY_LIMIT value '{value}': {error}"
                    ))
                })?)
            }
            _ => None,
        };

        let dispatch_max_attempts = parse_env_u8("DISPATCH_MAX_ATTEMPTS", 3)?;
        let dispatch_retry_backoff_ms = parse_env_u64("DISPATCH_RETRY_BACKOFF_MS", 250)?;

        if batch_limit == 0 {
            return Err(AppError::Validation(
                "WORKER_BATCH_LIMIT must be greater than zero".to_owned(),
            ));
        }

        if poll_interval_ms == 0 {
            return Err(AppError::Validation(
                "WORKER_POLL_INTERVAL_MS must be greater than zero".to_owned(),
            ));
        }

        if retention_days < 1 {
            return Err(AppError::Validation(
                "RETENTION_DAYS must be at least one".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            platform_api_base_url,
            platform_api_token,
            batch_limit,
            max_retries,
            lease_seconds,
            poll_interval_ms,
            cleanup_interval_seconds,
            retention_days,
            policy,
            app_hourly_limit,
            dispatch_max_attempts,
            dispatch_retry_backoff_ms,
        })
    }
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_usize(name: &str, default: usize) -> AppResult<usize> {
    match env::var(name) {
        Ok(value) => value.parse::<usize>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_i32(name: &str, default: i32) -> AppResult<i32> {
    match env::var(name) {
        Ok(value) => value.parse::<i32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_i64(name: &str, default: i64) -> AppResult<i64> {
    match env::var(name) {
        Ok(value) => value.parse::<i64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u8(name: &str, default: u8) -> AppResult<u8> {
    match env::var(name) {
        Ok(value) => value.parse::<u8>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
