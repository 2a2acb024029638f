//! Entities store instants as Unix milliseconds so they can double as id
//! key parts; these helpers convert at the edges.

use chrono::{DateTime, Utc};

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Out-of-range values clamp to the epoch.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_trip() {
        let now = now_millis();
        assert_eq!(from_millis(now).timestamp_millis(), now);
    }

    #[test]
    fn out_of_range_clamps_to_epoch() {
        assert_eq!(from_millis(i64::MAX), DateTime::UNIX_EPOCH);
    }
}
