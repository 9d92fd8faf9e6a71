//! Injectable UTC clock.
//!
//! Cycle selection, day rollover and tail polling all depend on "today";
//! routing every such decision through a [`Clock`] lets tests cross midnight
//! on demand instead of waiting for the wall clock.

use chrono::{DateTime, NaiveDate, Utc};

/// Source of the current UTC time.
pub trait Clock: Send + Sync {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Current UTC calendar date.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
