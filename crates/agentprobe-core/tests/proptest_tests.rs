use agentprobe_core::aggregate::{Distribution, percentile};
use agentprobe_core::config::config_hash;
use agentprobe_core::{ParseMode, RunRecord};
use proptest::prelude::*;
use serde_json::{Map, Value, json};

fn record_with_tokens(prompt: i64, completion: i64, total: i64) -> RunRecord {
    let mut r = RunRecord::new("run-1", "agent", "1", "cfg", "goal");
    r.tokens_prompt = Some(prompt);
    r.tokens_completion = Some(completion);
    r.tokens_total = Some(total);
    r
}

// ---- Record invariants ----

proptest! {
    /// A total that is the exact sum always validates.
    #[test]
    fn token_sum_is_accepted(prompt in 0i64..1_000_000, completion in 0i64..1_000_000) {
        let r = record_with_tokens(prompt, completion, prompt + completion);
        prop_assert!(r.validate().is_ok());
    }

    /// Any other total is rejected and the error names tokens_total.
    #[test]
    fn token_mismatch_is_rejected(
        prompt in 0i64..1_000_000,
        completion in 0i64..1_000_000,
        delta in prop_oneof![-1000i64..0, 1i64..1000],
    ) {
        let total = prompt + completion + delta;
        prop_assume!(total >= 0);
        let r = record_with_tokens(prompt, completion, total);
        let err = r.validate().unwrap_err();
        prop_assert!(err.to_string().contains("tokens_total"));
    }

    /// Whatever survives validation survives a strict parse of its own line.
    #[test]
    fn valid_records_parse_back(
        goal in "\\PC{0,80}",
        time_ms in 0i64..10_000_000,
        success in any::<bool>(),
    ) {
        let mut r = RunRecord::new("run-1", "agent", "1", "cfg", goal);
        r.time_ms = time_ms;
        r.success = success;
        let line = r.to_json_line().unwrap();
        prop_assert!(!line.contains('\n'));
        let back = RunRecord::from_json_line(&line, ParseMode::Strict).unwrap();
        prop_assert_eq!(back, r);
    }
}

// ---- Configuration hash ----

proptest! {
    /// Insertion order never changes the fingerprint.
    #[test]
    fn config_hash_ignores_insertion_order(
        entries in prop::collection::btree_map("[a-z_]{1,12}", any::<i32>(), 0..12)
    ) {
        let forward: Map<String, Value> =
            entries.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
        let backward: Map<String, Value> =
            entries.iter().rev().map(|(k, v)| (k.clone(), json!(v))).collect();
        let a = config_hash(&Value::Object(forward));
        let b = config_hash(&Value::Object(backward));
        prop_assert_eq!(a.len(), 64);
        prop_assert_eq!(a, b);
    }
}

// ---- Statistics ----

proptest! {
    /// Percentiles stay within the observed range and are monotone in q.
    #[test]
    fn percentile_is_bounded_and_monotone(
        mut values in prop::collection::vec(0u32..1_000_000, 1..200),
        q1 in 0.0f64..=1.0,
        q2 in 0.0f64..=1.0,
    ) {
        values.sort_unstable();
        let sorted: Vec<f64> = values.iter().map(|v| f64::from(*v)).collect();
        let (lo, hi) = if q1 <= q2 { (q1, q2) } else { (q2, q1) };
        let a = percentile(&sorted, lo).unwrap();
        let b = percentile(&sorted, hi).unwrap();
        let eps = 1e-6;
        prop_assert!(a >= sorted[0] - eps && a <= sorted[sorted.len() - 1] + eps);
        prop_assert!(a <= b + eps);
    }

    /// Summary statistics are ordered min <= median <= p90 <= max.
    #[test]
    fn distribution_is_ordered(values in prop::collection::vec(0u32..100_000, 1..100)) {
        let d = Distribution::from_values(values.iter().map(|v| f64::from(*v)).collect()).unwrap();
        let eps = 1e-6;
        prop_assert_eq!(d.n, values.len());
        prop_assert!(d.min <= d.median + eps);
        prop_assert!(d.median <= d.p90 + eps);
        prop_assert!(d.p90 <= d.max + eps);
        prop_assert!(d.mean >= d.min - eps && d.mean <= d.max + eps);
    }
}
