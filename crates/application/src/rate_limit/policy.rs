use replygate_core::{AppError, AppResult};

/// Tunable admission-control thresholds.
///
/// These are product policy, not structure: hosts load them from
/// configuration and pass them down unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Absolute per-account ceiling inside one window.
    pub hard_limit: i32,
    /// Soft ceiling that arms a temporary block, leaving headroom below the
    /// hard ceiling.
    pub block_threshold: i32,
    /// Rolling window length in seconds.
    pub window_seconds: i64,
    /// Soft-block duration in seconds.
    pub block_seconds: i64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            hard_limit: 180,
            block_threshold: 170,
            window_seconds: 3600,
            block_seconds: 300,
        }
    }
}

impl RateLimitPolicy {
    /// Validates threshold ordering and durations.
    pub fn validate(&self) -> AppResult<()> {
        if self.hard_limit < 1 {
            return Err(AppError::Validation(
                "hard_limit must be greater than zero".to_owned(),
            ));
        }

        if self.block_threshold < 1 || self.block_threshold > self.hard_limit {
            return Err(AppError::Validation(format!(
                "block_threshold must be between 1 and hard_limit ({})",
                self.hard_limit
            )));
        }

        if self.window_seconds <= 0 {
            return Err(AppError::Validation(
                "window_seconds must be greater than zero".to_owned(),
            ));
        }

        if self.block_seconds <= 0 {
            return Err(AppError::Validation(
                "block_seconds must be greater than zero".to_owned(),
            ));
        }

        Ok(())
    }
}
