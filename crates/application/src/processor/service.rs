use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use replygate_core::{AccountId, AppError, AppResult};

use crate::clock::Clock;
use crate::executor::ActionExecutor;
use crate::global_window::GlobalWindowService;
use crate::queue::{FinalizeOutcome, QueueService};
use crate::rate_limit::RateLimitService;

/// Tunables for one processor instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Maximum items drained per invocation.
    pub batch_limit: usize,
    /// Deferred-admission retries before an item is failed out.
    pub max_retries: i32,
    /// Claim lease length for one execution.
    pub lease_seconds: i64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            max_retries: 5,
            lease_seconds: 120,
        }
    }
}

impl ProcessorConfig {
    /// Validates bounds.
    pub fn validate(&self) -> AppResult<()> {
        if self.batch_limit == 0 {
            return Err(AppError::Validation(
                "batch_limit must be greater than zero".to_owned(),
            ));
        }

        if self.max_retries < 1 {
            return Err(AppError::Validation(
                "max_retries must be at least one".to_owned(),
            ));
        }

        if self.lease_seconds <= 0 {
            return Err(AppError::Validation(
                "lease_seconds must be greater than zero".to_owned(),
            ));
        }

        Ok(())
    }
}

/// Outcome counters for one `process_batch` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProcessingSummary {
    /// Stale items pulled into the current window before draining.
    pub promoted: u64,
    /// Expired-lease items returned to the queue before draining.
    pub reclaimed: u64,
    /// Items claimed and executed this run.
    pub processed: usize,
    /// Executed items that completed.
    pub succeeded: usize,
    /// Executed items that failed.
    pub failed: usize,
    /// Items left queued (still rate limited, or claimed by another run).
    pub skipped: usize,
    /// Items failed out after exhausting deferred-admission retries.
    pub retry_capped: usize,
}

/// The only writer that moves items from QUEUED through PROCESSING to a
/// terminal state.
#[derive(Clone)]
pub struct BatchProcessor {
    queue: QueueService,
    rate_limiter: RateLimitService,
    executor: Arc<dyn ActionExecutor>,
    clock: Arc<dyn Clock>,
    global_window: Option<GlobalWindowService>,
    config: ProcessorConfig,
}

impl BatchProcessor {
    /// Creates a processor with a validated config.
    pub fn new(
        queue: QueueService,
        rate_limiter: RateLimitService,
        executor: Arc<dyn ActionExecutor>,
        clock: Arc<dyn Clock>,
        config: ProcessorConfig,
    ) -> AppResult<Self> {
        config.validate()?;

        Ok(Self {
            queue,
            rate_limiter,
            executor,
            clock,
            global_window: None,
            config,
        })
    }

    /// Reports drained-account counts into the global window tier.
    #[must_use]
    pub fn with_global_window(mut self, global_window: GlobalWindowService) -> Self {
        self.global_window = Some(global_window);
        self
    }

    /// Drains one bounded batch from the current window.
    ///
    /// Store failures abort the run; a failing action only fails its own
    /// item.
    pub async fn process_batch(&self) -> AppResult<ProcessingSummary> {
        let mut summary = ProcessingSummary {
            promoted: self.queue.promote_stale().await?,
            reclaimed: self.queue.reclaim_expired().await?,
            ..ProcessingSummary::default()
        };

        let batch = self.queue.next_batch(self.config.batch_limit).await?;
        let mut drained_accounts: HashSet<AccountId> = HashSet::new();

        for item in batch {
            let decision = self
                .rate_limiter
                .check_admission(&item.account_id, &item.owner_id, item.action.kind())
                .await?;

            if !decision.allowed {
                // Time may free the account later; leave the item queued and
                // let a future run retry it.
                match self.queue.increment_retry(item.id).await? {
                    Some(retries) if retries > self.config.max_retries => {
                        self.queue
                            .update_status(
                                item.id,
                                FinalizeOutcome::Failed {
                                    error: "retry limit exceeded".to_owned(),
                                },
                            )
                            .await?;
                        summary.retry_capped += 1;
                        warn!(
                            queue_id = %item.id,
                            account_id = %item.account_id,
                            retries,
                            "queue item failed out after retry limit"
                        );
                    }
                    _ => summary.skipped += 1,
                }
                continue;
            }

            if !self
                .queue
                .mark_processing(item.id, self.config.lease_seconds)
                .await?
            {
                // Another overlapping run claimed the item first.
                summary.skipped += 1;
                continue;
            }

            summary.processed += 1;
            drained_accounts.insert(item.account_id.clone());

            match self.executor.execute(&item.action).await {
                Ok(result) => {
                    self.queue
                        .update_status(item.id, FinalizeOutcome::Completed { result })
                        .await?;
                    summary.succeeded += 1;
                    info!(
                        queue_id = %item.id,
                        account_id = %item.account_id,
                        action = item.action.kind().as_str(),
                        "queue item executed"
                    );
                }
                Err(error) => {
                    self.queue
                        .update_status(
                            item.id,
                            FinalizeOutcome::Failed {
                                error: error.to_string(),
                            },
                        )
                        .await?;
                    summary.failed += 1;
                    warn!(
                        queue_id = %item.id,
                        account_id = %item.account_id,
                        error = %error,
                        "queue item execution failed"
                    );
                }
            }
        }

        if let Some(global_window) = &self.global_window {
            let drained = i64::try_from(drained_accounts.len()).unwrap_or(i64::MAX);
            global_window
                .record_accounts_processed(self.clock.now(), drained)
                .await?;
        }

        info!(
            promoted = summary.promoted,
            reclaimed = summary.reclaimed,
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            retry_capped = summary.retry_capped,
            "queue batch drained"
        );

        Ok(summary)
    }
}
