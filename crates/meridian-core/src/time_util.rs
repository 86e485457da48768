//! Wall-clock helpers for request signing and timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as **milliseconds** since Unix epoch.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Current time as **microseconds** since Unix epoch.
#[inline]
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_consistent() {
        let ms = now_ms();
        let us = now_us();
        // Sanity: epoch millis after 2020, micros within a second of millis.
        assert!(ms > 1_577_836_800_000);
        assert!(us / 1_000 >= ms);
        assert!(us / 1_000 - ms < 1_000);
    }
}
