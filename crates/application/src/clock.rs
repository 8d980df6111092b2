use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};

/// Time source port.
///
/// Window math is derived from this instead of the wall clock so services
/// stay testable without waiting on real time.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used by production hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Returns the hour-bucket label for queue items, e.g. `"14-15"`.
#[must_use]
pub fn window_label_at(at: DateTime<Utc>) -> String {
    let hour = at.hour();
    format!("{hour}-{}", hour + 1)
}

/// Floors an instant to the start of its clock hour.
#[must_use]
pub fn hour_floor(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(Duration::hours(1)).unwrap_or(at)
}
