//! Monotonic clock source
//!
//! Provides a wall-clock timestamp that never goes backward. Chunk lifecycle
//! stamps and rate-limiter refill arithmetic both read from this source so
//! that an NTP step cannot reorder chunk boundaries or mint free permits.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// A clock source that guarantees monotonically increasing timestamps.
pub struct BoundedClock {
    /// High-water mark: the largest timestamp we've ever returned (nanos)
    high_water_ns: AtomicI64,
}

impl BoundedClock {
    pub fn new() -> Self {
        Self {
            high_water_ns: AtomicI64::new(0),
        }
    }

    /// Returns a monotonically increasing nanosecond timestamp.
    ///
    /// If the wall clock has gone backward (e.g. NTP adjustment),
    /// returns the previous high-water mark + 1ns instead.
    pub fn now_nanos(&self) -> i64 {
        let wall = Utc::now().timestamp_nanos_opt().unwrap_or(0);
        loop {
            let prev = self.high_water_ns.load(Ordering::Acquire);
            let ts = wall.max(prev + 1);
            match self.high_water_ns.compare_exchange_weak(
                prev,
                ts,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return ts,
                Err(_) => continue, // CAS failed, retry
            }
        }
    }

    /// Returns the monotonic timestamp in epoch milliseconds.
    pub fn now_epoch_ms(&self) -> i64 {
        self.now_nanos() / 1_000_000
    }
}

impl Default for BoundedClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_increasing() {
        let clock = BoundedClock::default();
        let mut prev = 0i64;
        for _ in 0..100 {
            let ts = clock.now_nanos();
            assert!(ts > prev, "timestamps must be strictly increasing");
            prev = ts;
        }
    }

    #[test]
    fn test_epoch_ms_is_reasonable() {
        let clock = BoundedClock::default();
        // After 2020
        assert!(clock.now_epoch_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_concurrent_monotonicity() {
        use std::sync::Arc;
        let clock = Arc::new(BoundedClock::default());
        let mut handles = vec![];

        for _ in 0..4 {
            let c = clock.clone();
            handles.push(std::thread::spawn(move || {
                let mut prev = 0i64;
                for _ in 0..1000 {
                    let ts = c.now_nanos();
                    // Each thread's own sequence should be increasing
                    assert!(ts > prev);
                    prev = ts;
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
    }
}
