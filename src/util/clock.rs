//! Clock capability
//!
//! All core code reads time through `Clock` so deterministic tests can
//! drive state machines with a `ManualClock`. Market-calendar helpers
//! convert epoch millis to the America/New_York trading date.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::America::New_York;
use std::sync::atomic::{AtomicI64, Ordering};

/// Monotonic-enough wall clock, injected everywhere.
pub trait Clock: Send + Sync {
    /// Current epoch milliseconds.
    fn now_ms(&self) -> i64;

    /// Current time as a UTC datetime.
    fn now_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_ms())
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Production clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Test clock advanced explicitly.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// The America/New_York calendar date for an epoch-millis instant.
/// Daily rollovers, midnight resets and market-hour checks key off this.
pub fn eastern_date(now_ms: i64) -> NaiveDate {
    eastern_datetime(now_ms).date_naive()
}

/// The America/New_York local datetime for an epoch-millis instant.
pub fn eastern_datetime(now_ms: i64) -> DateTime<chrono_tz::Tz> {
    Utc.timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(Utc::now)
        .with_timezone(&New_York)
}

/// Whether the instant falls on a weekday in New York.
pub fn is_eastern_weekday(now_ms: i64) -> bool {
    !matches!(
        eastern_date(now_ms).weekday(),
        Weekday::Sat | Weekday::Sun
    )
}

/// The New York local hour (0-23) for an instant.
pub fn eastern_hour(now_ms: i64) -> u32 {
    eastern_datetime(now_ms).hour()
}

/// Epoch millis rendered as RFC 3339 for logs and persisted artifacts.
pub fn iso_ms(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}
