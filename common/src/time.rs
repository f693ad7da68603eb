//! Time utilities for ledger records.

use chrono::{DateTime, SubsecRound, Utc};

/// A timestamp (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp, truncated to microseconds so that it survives a
/// round trip through storage unchanged.
pub fn now() -> Timestamp {
    Utc::now().trunc_subsecs(6)
}

/// Encode a timestamp as microseconds since the Unix epoch.
pub fn to_micros(timestamp: Timestamp) -> i64 {
    timestamp.timestamp_micros()
}

/// Decode microseconds since the Unix epoch.
pub fn from_micros(micros: i64) -> Option<Timestamp> {
    DateTime::<Utc>::from_timestamp_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_micros_roundtrip() {
        let ts = now();
        assert_eq!(from_micros(to_micros(ts)), Some(ts));
    }
}
