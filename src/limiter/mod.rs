//! Per-service admission rate limiting
//!
//! Gates the inbound span stream before it reaches the indexing pipeline.
//! Each provisioned service gets an independent token bucket whose rate is
//! the service's configured byte throughput divided by the number of peer
//! preprocessor instances. Decisions are non-blocking: a span is either
//! admitted or dropped with a counted reason, never backpressured.

mod telemetry;

pub use telemetry::{BYTES_DROPPED, MESSAGES_DROPPED};

use crate::clock::BoundedClock;
use crate::span::Span;
use crate::{Error, Result};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// Why a span was dropped instead of admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDropReason {
    /// Span was absent or carried no service name
    MissingServiceName,
    /// Service has no configured throughput
    NotProvisioned,
    /// Service bucket had too few permits
    OverLimit,
}

impl MessageDropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDropReason::MissingServiceName => "missing_service_name",
            MessageDropReason::NotProvisioned => "not_provisioned",
            MessageDropReason::OverLimit => "over_limit",
        }
    }
}

/// Mutable bucket state, serialized behind the bucket's lock.
struct BucketState {
    stored_permits: f64,
    last_refill_nanos: i64,
}

/// A token bucket where one permit is one byte.
///
/// Permits accumulate at `permits_per_second` up to
/// `permits_per_second * max_burst_seconds`. Acquisition never blocks.
pub struct TokenBucket {
    permits_per_second: f64,
    max_permits: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a bucket. A warm bucket starts full; a cold one must earn its
    /// first permits through elapsed time.
    pub fn new(
        permits_per_second: f64,
        max_burst_seconds: f64,
        initialize_warm: bool,
        now_nanos: i64,
    ) -> Self {
        let max_permits = permits_per_second * max_burst_seconds;
        Self {
            permits_per_second,
            max_permits,
            state: Mutex::new(BucketState {
                stored_permits: if initialize_warm { max_permits } else { 0.0 },
                last_refill_nanos: now_nanos,
            }),
        }
    }

    /// Try to take `permits` permits at time `now_nanos`. Returns false if
    /// the bucket holds too few; partial acquisition is not supported.
    fn try_acquire_at(&self, permits: u64, now_nanos: i64) -> bool {
        let mut state = self.state.lock();

        let elapsed_nanos = (now_nanos - state.last_refill_nanos).max(0);
        if elapsed_nanos > 0 {
            let refill = (elapsed_nanos as f64 / NANOS_PER_SECOND) * self.permits_per_second;
            state.stored_permits = (state.stored_permits + refill).min(self.max_permits);
            state.last_refill_nanos = now_nanos;
        }

        let requested = permits as f64;
        if state.stored_permits >= requested {
            state.stored_permits -= requested;
            true
        } else {
            false
        }
    }

    /// Non-blocking acquisition against the shared clock.
    pub fn try_acquire(&self, permits: u64, clock: &BoundedClock) -> bool {
        self.try_acquire_at(permits, clock.now_nanos())
    }

    /// Configured steady-state rate, for logging.
    pub fn permits_per_second(&self) -> f64 {
        self.permits_per_second
    }
}

/// Builds per-service admission filters from provisioned throughput budgets.
pub struct PreprocessorRateLimiter {
    preprocessor_count: u32,
    max_burst_seconds: u32,
    initialize_warm: bool,
    clock: Arc<BoundedClock>,
}

impl PreprocessorRateLimiter {
    pub fn new(
        preprocessor_count: u32,
        max_burst_seconds: u32,
        initialize_warm: bool,
        clock: Arc<BoundedClock>,
    ) -> Result<Self> {
        if preprocessor_count == 0 {
            return Err(Error::Config(
                "preprocessor count must be greater than 0".to_string(),
            ));
        }
        if max_burst_seconds < 1 {
            return Err(Error::Config(
                "max burst seconds must be greater than or equal to 1".to_string(),
            ));
        }
        Ok(Self {
            preprocessor_count,
            max_burst_seconds,
            initialize_warm,
            clock,
        })
    }

    /// Build the admit-or-drop predicate for the given service throughput map.
    ///
    /// Each service's share is its configured byte budget divided by the
    /// number of peer preprocessors, so the fleet-wide admitted rate matches
    /// the budget no matter how partitions are spread across instances.
    pub fn make_filter(&self, service_throughput_bytes: &HashMap<String, u64>) -> AdmissionFilter {
        let now = self.clock.now_nanos();
        let buckets = service_throughput_bytes
            .iter()
            .map(|(service, throughput)| {
                let permits_per_second = (*throughput / self.preprocessor_count as u64) as f64;
                info!(
                    service = %service,
                    permits_per_second,
                    target_throughput = *throughput,
                    preprocessor_count = self.preprocessor_count,
                    "Rate limiter initialized"
                );
                (
                    service.clone(),
                    TokenBucket::new(
                        permits_per_second,
                        self.max_burst_seconds as f64,
                        self.initialize_warm,
                        now,
                    ),
                )
            })
            .collect();

        AdmissionFilter {
            buckets,
            clock: Arc::clone(&self.clock),
        }
    }
}

/// Thread-safe admit-vs-drop predicate over `(key, span)`.
///
/// The bucket map is immutable after construction; provisioning changes are
/// applied by building a new filter. Safe to call from many producer threads
/// concurrently, each bucket's acquire is internally serialized.
pub struct AdmissionFilter {
    buckets: HashMap<String, TokenBucket>,
    clock: Arc<BoundedClock>,
}

impl AdmissionFilter {
    /// Decide whether to admit one record. Exactly one drop reason is charged
    /// per rejected record.
    pub fn admit(&self, _key: &str, span: Option<&Span>) -> bool {
        let Some(span) = span else {
            warn!("Message was dropped, span was absent");
            telemetry::record_dropped("", MessageDropReason::MissingServiceName, 0);
            return false;
        };

        let bytes = span.size_bytes();
        if span.service_name.is_empty() {
            debug!(span_id = %span.id, "Message was dropped due to missing service name");
            telemetry::record_dropped("", MessageDropReason::MissingServiceName, bytes);
            return false;
        }

        let Some(bucket) = self.buckets.get(&span.service_name) else {
            debug!(
                service = %span.service_name,
                "Message was dropped, service is not currently provisioned"
            );
            telemetry::record_dropped(
                &span.service_name,
                MessageDropReason::NotProvisioned,
                bytes,
            );
            return false;
        };

        if bucket.try_acquire(bytes, &self.clock) {
            return true;
        }

        debug!(
            service = %span.service_name,
            permits_per_second = bucket.permits_per_second(),
            wanted_bytes = bytes,
            "Message was dropped due to rate limiting"
        );
        telemetry::record_dropped(&span.service_name, MessageDropReason::OverLimit, bytes);
        false
    }

    /// Provisioned service names, for diagnostics.
    pub fn provisioned_services(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(count: u32, burst: u32, warm: bool) -> PreprocessorRateLimiter {
        PreprocessorRateLimiter::new(count, burst, warm, Arc::new(BoundedClock::default())).unwrap()
    }

    #[test]
    fn test_constructor_rejects_bad_config() {
        let clock = Arc::new(BoundedClock::default());
        assert!(PreprocessorRateLimiter::new(0, 1, true, clock.clone()).is_err());
        assert!(PreprocessorRateLimiter::new(1, 0, true, clock).is_err());
    }

    #[test]
    fn test_cold_bucket_earns_permits_over_time() {
        // 100 B/s, 1s burst, cold start
        let bucket = TokenBucket::new(100.0, 1.0, false, 0);
        assert!(!bucket.try_acquire_at(50, 0), "cold bucket must reject at t=0");
        assert!(
            bucket.try_acquire_at(50, 1_000_000_000),
            "after one second 100 permits have accrued"
        );
    }

    #[test]
    fn test_warm_bucket_allows_full_burst_then_rejects() {
        // 1000 B/s, 3s burst, warm
        let bucket = TokenBucket::new(1000.0, 3.0, true, 0);
        assert!(bucket.try_acquire_at(3000, 0), "full burst is available warm");
        assert!(!bucket.try_acquire_at(1, 0), "bucket is drained at the same instant");
    }

    #[test]
    fn test_bucket_never_exceeds_max_permits() {
        let bucket = TokenBucket::new(10.0, 2.0, true, 0);
        // A long idle period must not accumulate beyond rate * burst
        let much_later = 3600 * 1_000_000_000i64;
        assert!(bucket.try_acquire_at(20, much_later));
        assert!(!bucket.try_acquire_at(1, much_later));
    }

    #[test]
    fn test_rate_is_sharded_by_preprocessor_count() {
        let filter = limiter(2, 1, true)
            .make_filter(&HashMap::from([("svc".to_string(), 1000u64)]));
        let bucket = filter.buckets.get("svc").unwrap();
        assert_eq!(bucket.permits_per_second(), 500.0);
    }

    #[test]
    fn test_admit_drops_absent_span() {
        let filter = limiter(1, 1, true).make_filter(&HashMap::new());
        assert!(!filter.admit("key", None));
    }

    #[test]
    fn test_admit_drops_missing_service_name() {
        let filter = limiter(1, 1, true)
            .make_filter(&HashMap::from([("svc".to_string(), 1000u64)]));
        let span = Span::new("s1", "", 0);
        assert!(!filter.admit("key", Some(&span)));
    }

    #[test]
    fn test_admit_drops_unprovisioned_service() {
        let filter = limiter(1, 1, true)
            .make_filter(&HashMap::from([("svc".to_string(), 1000u64)]));
        let span = Span::new("s1", "other", 0);
        assert!(!filter.admit("key", Some(&span)));
    }

    #[test]
    fn test_admit_charges_bucket_until_drained() {
        // Budget far above span size: admitted. Tiny budget: rejected.
        let filter = limiter(1, 1, true)
            .make_filter(&HashMap::from([("svc".to_string(), 1_000_000u64)]));
        let span = Span::new("s1", "svc", 0);
        assert!(filter.admit("key", Some(&span)));

        let tight = limiter(1, 1, false)
            .make_filter(&HashMap::from([("svc".to_string(), 10u64)]));
        assert!(!tight.admit("key", Some(&span)), "cold tight bucket rejects");
    }

    #[test]
    fn test_concurrent_acquisition_is_sound() {
        use std::sync::atomic::{AtomicU64, Ordering};

        // Warm bucket holding exactly 100 one-byte permits. All acquisitions
        // happen at the same instant, so no refill can occur mid-test.
        let bucket = Arc::new(TokenBucket::new(100.0, 1.0, true, 0));
        let admitted = Arc::new(AtomicU64::new(0));

        let mut handles = vec![];
        for _ in 0..8 {
            let bucket = Arc::clone(&bucket);
            let admitted = Arc::clone(&admitted);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    if bucket.try_acquire_at(1, 0) {
                        admitted.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::Relaxed), 100);
    }
}
