//! Network time, measured in seconds since the network epoch.

use chrono::{DateTime, TimeZone, Utc};

/// 2013-11-24T12:00:00Z, in milliseconds since the Unix epoch.
pub const EPOCH_BEGINNING_MS: i64 = 1_385_294_400_000;

/// Seconds elapsed between the network epoch and `now`, rounded to the nearest second.
pub fn epoch_time(now: DateTime<Utc>) -> i32 {
    ((now.timestamp_millis() - EPOCH_BEGINNING_MS + 500) / 1000) as i32
}

/// Converts network time back to wall-clock time.
pub fn to_datetime(epoch_seconds: i32) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(EPOCH_BEGINNING_MS + i64::from(epoch_seconds) * 1000)
        .single()
}

/// Source of the current network time.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> i32;
}

/// Reads the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> i32 {
        epoch_time(Utc::now())
    }
}

/// A clock frozen at a given network time.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i32);

impl TimeSource for FixedClock {
    fn now(&self) -> i32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_start_is_zero() {
        let start = Utc.with_ymd_and_hms(2013, 11, 24, 12, 0, 0).unwrap();
        assert_eq!(epoch_time(start), 0);
    }

    #[test]
    fn rounds_to_nearest_second() {
        let start = Utc.timestamp_millis_opt(EPOCH_BEGINNING_MS + 1_499).unwrap();
        assert_eq!(epoch_time(start), 1);
        let start = Utc.timestamp_millis_opt(EPOCH_BEGINNING_MS + 1_500).unwrap();
        assert_eq!(epoch_time(start), 2);
    }

    #[test]
    fn to_datetime_inverts_epoch_time() {
        let t = to_datetime(86_400).unwrap();
        assert_eq!(epoch_time(t), 86_400);
    }
}
