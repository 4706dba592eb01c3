//! Property-Based Tests for the Admission Engine
//!
//! # Running the Tests
//!
//! ```bash
//! cargo test --lib rate_limit::proptests
//! ```

use proptest::prelude::*;
use std::time::{Duration, Instant};

use super::{AdmissionManager, ClientConfig, QuotaBucket, RejectReason};

#[derive(Debug, Clone)]
enum BucketOp {
    Consume { amount: u64, advance_ms: u64 },
    Read { advance_ms: u64 },
}

fn arb_bucket_op() -> impl Strategy<Value = BucketOp> {
    prop_oneof![
        (0u64..500, 0u64..5_000)
            .prop_map(|(amount, advance_ms)| BucketOp::Consume { amount, advance_ms }),
        (0u64..5_000).prop_map(|advance_ms| BucketOp::Read { advance_ms }),
    ]
}

proptest! {
    #[test]
    fn bucket_level_stays_within_bounds(
        limit in 1u64..1_000,
        ops in prop::collection::vec(arb_bucket_op(), 0..64),
    ) {
        let start = Instant::now();
        let mut now = start;
        let mut bucket = QuotaBucket::per_minute_at(limit, start);

        for op in ops {
            match op {
                BucketOp::Consume { amount, advance_ms } => {
                    now += Duration::from_millis(advance_ms);
                    let before = bucket.remaining_at(now);
                    let level = bucket.level();
                    let ok = bucket.try_consume_at(amount, now);
                    if ok {
                        prop_assert!((level - bucket.level() - amount as f64).abs() < 1e-6);
                    } else {
                        prop_assert!(amount > before);
                        prop_assert_eq!(level, bucket.level());
                    }
                }
                BucketOp::Read { advance_ms } => {
                    now += Duration::from_millis(advance_ms);
                    bucket.remaining_at(now);
                }
            }
            prop_assert!(bucket.level() >= 0.0);
            prop_assert!(bucket.level() <= limit as f64);
        }
    }

    #[test]
    fn unlimited_dimensions_never_reject(
        weights in prop::collection::vec(0u64..1_000_000, 1..50),
    ) {
        let manager = AdmissionManager::new();
        manager.set_config(ClientConfig::new("open", None, None));

        for weight in &weights {
            prop_assert!(manager.decide("open", *weight).is_admitted());
        }

        let stats = manager.get_stats("open").unwrap();
        prop_assert_eq!(stats.success_requests, weights.len() as u64);
    }

    #[test]
    fn request_limit_bounds_burst(limit in 1u64..200, attempts in 0u64..400) {
        let manager = AdmissionManager::new();
        manager.set_config(ClientConfig::new("burst", Some(limit), None));

        let admitted = (0..attempts)
            .filter(|_| manager.decide("burst", 1).is_admitted())
            .count() as u64;

        // A run of a few milliseconds refills far less than one unit
        prop_assert!(admitted <= limit);
        prop_assert_eq!(admitted, attempts.min(limit));
    }

    #[test]
    fn window_admits_at_most_burst_plus_refill(
        limit in 1u64..120,
        steps in prop::collection::vec((1u64..10, 0u64..3_000), 1..200),
    ) {
        let start = Instant::now();
        let mut now = start;
        let mut bucket = QuotaBucket::per_minute_at(limit, start);
        let mut admits: Vec<(Duration, u64)> = Vec::new();

        for (amount, advance_ms) in steps {
            now += Duration::from_millis(advance_ms);
            if bucket.try_consume_at(amount, now) {
                admits.push((now - start, amount));
            }
        }

        // Between any two admits: one full bucket plus what refilled in between
        let rate = limit as f64 / 60.0;
        for (i, (from, _)) in admits.iter().enumerate() {
            let mut consumed = 0u64;
            for (to, amount) in &admits[i..] {
                consumed += amount;
                let bound = limit as f64 + (*to - *from).as_secs_f64() * rate;
                prop_assert!(consumed as f64 <= bound + 1e-6, "{} > {}", consumed, bound);
                if *to - *from <= Duration::from_secs(60) {
                    prop_assert!(consumed <= 2 * limit);
                }
            }
        }
    }

    #[test]
    fn stats_invariants_hold(
        request_limit in prop::option::of(1u64..20),
        weight_limit in prop::option::of(1u64..200),
        weights in prop::collection::vec(0u64..50, 0..60),
    ) {
        let manager = AdmissionManager::new();
        manager.set_config(ClientConfig::new("mixed", request_limit, weight_limit));

        let mut weight_drops = 0;
        for weight in &weights {
            if manager.decide("mixed", *weight).reason() == Some(RejectReason::WeightRateExceeded) {
                weight_drops += 1;
            }
        }

        let stats = manager.get_stats("mixed").unwrap();
        prop_assert_eq!(stats.total_requests, weights.len() as u64);
        prop_assert_eq!(stats.total_requests, stats.success_requests + stats.dropped_requests);
        prop_assert_eq!(stats.dropped_requests, stats.rpm_dropped + stats.tpm_dropped);
        prop_assert_eq!(stats.tpm_dropped, weight_drops);
    }
}
