use chrono::{DateTime, Utc};

/// Abstracts `Utc::now()` so scheduler cadence and alert-cooldown tests can
/// run against a fake clock instead of real wall time. Named directly by
/// spec.md §9's redesign flags.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
