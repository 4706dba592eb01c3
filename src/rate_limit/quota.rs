//! Quota Bucket and Client Quota State
//!
//! This module provides the refillable token bucket that backs every quota
//! dimension, and the per-client pair of buckets built from a [`ClientConfig`].

use std::time::{Duration, Instant};

use super::config::ClientConfig;

/// Seconds per configured rate window (limits are expressed per minute)
const WINDOW_SECS: f64 = 60.0;

/// A single-dimension refillable counter.
///
/// Capacity equals the configured per-minute limit, so a freshly created
/// bucket allows one limit-sized burst. Tokens are refilled lazily on every
/// access from the wall-clock time elapsed since the previous refill.
#[derive(Debug, Clone)]
pub struct QuotaBucket {
    /// Maximum stored units
    capacity: u64,

    /// Current level, always within `0.0..=capacity`
    tokens: f64,

    /// Units added per second
    refill_rate: f64,

    /// Last refill timestamp
    last_refill: Instant,
}

impl QuotaBucket {
    /// Create a full bucket for a per-minute limit
    pub fn per_minute(limit: u64) -> Self {
        Self::per_minute_at(limit, Instant::now())
    }

    /// Create a full bucket whose refill clock starts at `now`
    pub fn per_minute_at(limit: u64, now: Instant) -> Self {
        Self {
            capacity: limit,
            tokens: limit as f64,
            refill_rate: limit as f64 / WINDOW_SECS,
            last_refill: now,
        }
    }

    /// Try to consume `amount` units.
    ///
    /// Either the whole amount is taken or nothing is; the level is left
    /// untouched on failure.
    pub fn try_consume(&mut self, amount: u64) -> bool {
        self.try_consume_at(amount, Instant::now())
    }

    /// [`try_consume`](Self::try_consume) against an explicit clock reading
    pub fn try_consume_at(&mut self, amount: u64, now: Instant) -> bool {
        self.refill(now);

        let amount = amount as f64;
        if self.tokens >= amount {
            self.tokens -= amount;
            true
        } else {
            false
        }
    }

    /// Remaining whole units after refilling
    pub fn remaining(&mut self) -> u64 {
        self.remaining_at(Instant::now())
    }

    /// [`remaining`](Self::remaining) against an explicit clock reading
    pub fn remaining_at(&mut self, now: Instant) -> u64 {
        self.refill(now);
        self.tokens.trunc() as u64
    }

    /// Time until `amount` units would be available, assuming no other
    /// consumption in between.
    ///
    /// Returns `None` when the amount exceeds capacity and can never be
    /// satisfied.
    pub fn time_until_available(&self, amount: u64) -> Option<Duration> {
        if amount > self.capacity {
            return None;
        }

        let needed = amount as f64 - self.tokens;
        if needed <= 0.0 {
            return Some(Duration::ZERO);
        }
        if self.refill_rate <= 0.0 {
            return None;
        }

        Some(Duration::from_secs_f64(needed / self.refill_rate))
    }

    /// Maximum stored units
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Current level without refilling
    pub fn level(&self) -> f64 {
        self.tokens
    }

    /// Refill tokens based on elapsed time.
    ///
    /// A clock reading earlier than the last refill adds nothing and keeps
    /// the later timestamp.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }

        let tokens_to_add = elapsed.as_secs_f64() * self.refill_rate;
        self.tokens = (self.tokens + tokens_to_add).min(self.capacity as f64);
        self.last_refill = now;
    }
}

/// Quota state for one client: its active configuration and one optional
/// bucket per dimension.
///
/// A bucket exists iff the matching limit is set and positive; an absent
/// bucket means the dimension is unlimited.
#[derive(Debug, Clone)]
pub struct ClientQuota {
    config: ClientConfig,
    request_bucket: Option<QuotaBucket>,
    weight_bucket: Option<QuotaBucket>,
}

impl ClientQuota {
    /// Build fresh state from a configuration. Buckets start full.
    pub fn from_config(config: ClientConfig) -> Self {
        let now = Instant::now();
        let bucket = |limit: Option<u64>| {
            limit
                .filter(|limit| *limit > 0)
                .map(|limit| QuotaBucket::per_minute_at(limit, now))
        };

        Self {
            request_bucket: bucket(config.request_limit),
            weight_bucket: bucket(config.weight_limit),
            config,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether rate limiting applies to this client
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Request-rate bucket (`None` means unlimited)
    pub fn request_bucket(&mut self) -> Option<&mut QuotaBucket> {
        self.request_bucket.as_mut()
    }

    /// Weight-rate bucket (`None` means unlimited)
    pub fn weight_bucket(&mut self) -> Option<&mut QuotaBucket> {
        self.weight_bucket.as_mut()
    }

    /// Remaining units per dimension as `(request, weight)`, refilling first
    pub fn remaining(&mut self) -> (Option<u64>, Option<u64>) {
        (
            self.request_bucket.as_mut().map(QuotaBucket::remaining),
            self.weight_bucket.as_mut().map(QuotaBucket::remaining),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_starts_full() {
        let mut bucket = QuotaBucket::per_minute(100);
        assert_eq!(bucket.capacity(), 100);
        assert_eq!(bucket.remaining(), 100);
    }

    #[test]
    fn test_bucket_consume() {
        let start = Instant::now();
        let mut bucket = QuotaBucket::per_minute_at(100, start);

        assert!(bucket.try_consume_at(60, start));
        assert_eq!(bucket.remaining_at(start), 40);
    }

    #[test]
    fn test_bucket_insufficient_leaves_level() {
        let start = Instant::now();
        let mut bucket = QuotaBucket::per_minute_at(100, start);

        assert!(bucket.try_consume_at(60, start));
        assert!(!bucket.try_consume_at(60, start));
        assert_eq!(bucket.remaining_at(start), 40);
    }

    #[test]
    fn test_bucket_zero_amount_always_succeeds() {
        let start = Instant::now();
        let mut bucket = QuotaBucket::per_minute_at(1, start);

        assert!(bucket.try_consume_at(1, start));
        assert!(bucket.try_consume_at(0, start));
        assert_eq!(bucket.remaining_at(start), 0);
    }

    #[test]
    fn test_bucket_refills_per_second() {
        let start = Instant::now();
        let mut bucket = QuotaBucket::per_minute_at(60, start);
        assert!(bucket.try_consume_at(60, start));

        // 60 per minute is one unit per second
        assert_eq!(bucket.remaining_at(start + Duration::from_millis(2500)), 2);
        assert!(bucket.try_consume_at(2, start + Duration::from_millis(2500)));
        assert!(!bucket.try_consume_at(1, start + Duration::from_millis(2600)));
    }

    #[test]
    fn test_bucket_refill_clamps_to_capacity() {
        let start = Instant::now();
        let mut bucket = QuotaBucket::per_minute_at(10, start);
        assert!(bucket.try_consume_at(5, start));

        assert_eq!(bucket.remaining_at(start + Duration::from_secs(3600)), 10);
        assert!(bucket.level() <= 10.0);
    }

    #[test]
    fn test_bucket_clock_going_backwards_adds_nothing() {
        let start = Instant::now() + Duration::from_secs(10);
        let mut bucket = QuotaBucket::per_minute_at(60, start);
        assert!(bucket.try_consume_at(60, start));

        assert_eq!(bucket.remaining_at(start - Duration::from_secs(5)), 0);
    }

    #[test]
    fn test_window_admits_burst_plus_refill() {
        let start = Instant::now();
        let mut bucket = QuotaBucket::per_minute_at(60, start);

        // One request every 500ms for a minute, starting with a full bucket
        let admitted = (0..=120u64)
            .filter(|tick| bucket.try_consume_at(1, start + Duration::from_millis(tick * 500)))
            .count();

        // The initial burst of 60 plus one refilled unit per elapsed second
        assert_eq!(admitted, 120);
    }

    #[test]
    fn test_sustained_rate_converges_to_limit() {
        let start = Instant::now();
        let mut bucket = QuotaBucket::per_minute_at(60, start);
        assert!(bucket.try_consume_at(60, start));

        // Once the burst is spent, each further minute yields exactly the limit
        for minute in 1..=5u64 {
            let admitted = (1..=120u64)
                .filter(|tick| {
                    let at = (minute - 1) * 60_000 + tick * 500;
                    bucket.try_consume_at(1, start + Duration::from_millis(at))
                })
                .count();
            assert_eq!(admitted, 60, "minute {}", minute);
        }
    }

    #[test]
    fn test_time_until_available() {
        let start = Instant::now();
        let mut bucket = QuotaBucket::per_minute_at(60, start);
        assert!(bucket.try_consume_at(60, start));

        let wait = bucket.time_until_available(20).unwrap();
        assert!(wait.as_secs_f64() >= 19.9 && wait.as_secs_f64() <= 20.1);
        assert_eq!(bucket.time_until_available(0), Some(Duration::ZERO));
        assert_eq!(bucket.time_until_available(61), None);
    }

    #[test]
    fn test_client_quota_builds_buckets_only_for_positive_limits() {
        let mut quota = ClientQuota::from_config(ClientConfig {
            client_id: "acme".to_string(),
            enabled: true,
            request_limit: Some(10),
            weight_limit: Some(0),
        });

        assert!(quota.request_bucket().is_some());
        assert!(quota.weight_bucket().is_none());
        assert_eq!(quota.remaining(), (Some(10), None));
    }

    #[test]
    fn test_unlimited_client_quota_has_no_buckets() {
        let mut quota = ClientQuota::from_config(ClientConfig::unlimited("acme"));
        assert!(quota.enabled());
        assert!(quota.request_bucket().is_none());
        assert!(quota.weight_bucket().is_none());
        assert_eq!(quota.config().client_id, "acme");
    }
}
