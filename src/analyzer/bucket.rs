use std::collections::BTreeMap;

use crate::analyzer::wilson::wilson_interval;
use crate::config::AnalyzerConfig;
use crate::types::{half_open_bucket, Event};

/// Per-bucket statistics, per spec.md 4.4.
#[derive(Clone, Debug)]
pub struct BucketStats {
    pub key: String,
    pub n: u32,
    pub up_response_rate: f64,
    pub down_response_rate: f64,
    pub up_ci95_low: f64,
    pub up_ci95_high: f64,
    pub down_ci95_low: f64,
    pub down_ci95_high: f64,
    pub up_aligned_rate: f64,
    pub up_median_lag_ms: Option<f64>,
    pub down_median_lag_ms: Option<f64>,
    pub up_median_move: Option<f64>,
    pub down_median_move: Option<f64>,
    pub lift_vs_global: f64,
    pub feasible_for_order_latency: Option<bool>,
    pub edge_score: f64,
}

/// `"delta | spike | remaining"`. Events with no Chainlink delta (no
/// oracle sample at-or-before t0) are excluded — there is no delta
/// dimension to bucket them on.
fn bucket_key(ev: &Event, params: &AnalyzerConfig) -> Option<String> {
    let delta = ev.chainlink_delta_from_baseline_usd?;
    let delta_bucket = half_open_bucket(delta, params.delta_bucket_usd);
    let spike_bucket = half_open_bucket(ev.binance_delta_usd.abs(), params.spike_bucket_usd);
    let remaining_bucket = ev.remaining_bucket();
    Some(format!("{} | {} | {}", delta_bucket, spike_bucket, remaining_bucket))
}

/// Shared with the Papertrader, which attributes fills to the same 3D
/// bucket key the Analyzer groups Events into.
pub fn bucket_key_for_papertrade(ev: &Event, params: &AnalyzerConfig) -> Option<String> {
    bucket_key(ev, params)
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Buckets events along the 3D key and computes per-bucket statistics plus
/// the global UP response rate needed for `lift_vs_global`. Buckets with
/// `n = 0` never appear (they simply have no events to group into them).
pub fn compute_buckets(events: &[Event], params: &AnalyzerConfig) -> Vec<BucketStats> {
    let total = events.len().max(1) as f64;
    let global_up_responses = events.iter().filter(|e| e.up_lag_ms.is_some()).count() as f64;
    let global_up_response_rate = global_up_responses / total;

    let mut groups: BTreeMap<String, Vec<&Event>> = BTreeMap::new();
    for ev in events {
        if let Some(key) = bucket_key(ev, params) {
            groups.entry(key).or_default().push(ev);
        }
    }

    groups
        .into_iter()
        .map(|(key, evs)| build_bucket_stats(key, &evs, global_up_response_rate, params))
        .collect()
}

fn build_bucket_stats(key: String, evs: &[&Event], global_up_response_rate: f64, params: &AnalyzerConfig) -> BucketStats {
    let n = evs.len() as u32;
    let up_responses = evs.iter().filter(|e| e.up_lag_ms.is_some()).count();
    let down_responses = evs.iter().filter(|e| e.down_lag_ms.is_some()).count();

    let up_response_rate = up_responses as f64 / n as f64;
    let down_response_rate = down_responses as f64 / n as f64;

    let (up_ci95_low, up_ci95_high) = wilson_interval(up_responses as u32, n);
    let (down_ci95_low, down_ci95_high) = wilson_interval(down_responses as u32, n);

    let up_aligned_count = evs.iter().filter(|e| e.up_lag_ms.is_some() && e.up_aligned).count();
    let up_aligned_rate = if up_responses > 0 {
        up_aligned_count as f64 / up_responses as f64
    } else {
        0.0
    };

    let up_median_lag_ms = median(evs.iter().filter_map(|e| e.up_lag_ms).map(|v| v as f64).collect());
    let down_median_lag_ms = median(evs.iter().filter_map(|e| e.down_lag_ms).map(|v| v as f64).collect());
    let up_median_move = median(
        evs.iter()
            .filter_map(|e| match (e.up_mid0, e.up_mid1) {
                (Some(m0), Some(m1)) => Some(m1 - m0),
                _ => None,
            })
            .collect(),
    );
    let down_median_move = median(
        evs.iter()
            .filter_map(|e| match (e.down_mid0, e.down_mid1) {
                (Some(m0), Some(m1)) => Some(m1 - m0),
                _ => None,
            })
            .collect(),
    );

    let lift_vs_global = up_response_rate - global_up_response_rate;
    let feasible_for_order_latency = params
        .order_p95_ms
        .map(|p95| up_median_lag_ms.is_some_and(|lag| lag > (p95 + params.safety_ms) as f64));

    let edge_score = lift_vs_global * up_response_rate * up_aligned_rate * (1.0 + n as f64).log10();

    BucketStats {
        key,
        n,
        up_response_rate,
        down_response_rate,
        up_ci95_low,
        up_ci95_high,
        down_ci95_low,
        down_ci95_high,
        up_aligned_rate,
        up_median_lag_ms,
        down_median_lag_ms,
        up_median_move,
        down_median_move,
        lift_vs_global,
        feasible_for_order_latency,
        edge_score,
    }
}

/// Strategy candidates: buckets with `n >= min_n` and `up_ci95_low >
/// global_up_response_rate`, sorted descending by `edge_score` then `n`,
/// truncated to 50. The Wilson filter is intentionally UP-only; the
/// source does not symmetrically filter DOWN (preserved as a possibly
/// intentional asymmetry).
pub fn strategy_candidates(buckets: &[BucketStats], global_up_response_rate: f64, params: &AnalyzerConfig) -> Vec<BucketStats> {
    let mut candidates: Vec<BucketStats> = buckets
        .iter()
        .filter(|b| b.n >= params.min_n && b.up_ci95_low > global_up_response_rate)
        .cloned()
        .collect();

    candidates.sort_by(|a, b| {
        b.edge_score
            .partial_cmp(&a.edge_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.n.cmp(&a.n))
    });
    candidates.truncate(50);
    candidates
}

/// The global UP response rate over all in-range events, used both for
/// `lift_vs_global` inside `compute_buckets` and for the candidate filter.
pub fn global_up_response_rate(events: &[Event]) -> f64 {
    if events.is_empty() {
        return 0.0;
    }
    let responses = events.iter().filter(|e| e.up_lag_ms.is_some()).count();
    responses as f64 / events.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(chainlink_delta: f64, binance_delta: f64, remaining_ms: i64, up_lag_ms: Option<i64>, up_aligned: bool) -> Event {
        Event {
            t0: 0,
            binance_delta_usd: binance_delta,
            chainlink_delta_from_baseline_usd: Some(chainlink_delta),
            remaining_ms,
            up_mid0: Some(0.5),
            up_mid1: up_lag_ms.map(|_| 0.52),
            up_lag_ms,
            down_mid0: Some(0.5),
            down_mid1: None,
            down_lag_ms: None,
            up_aligned,
            down_aligned: false,
        }
    }

    /// Invariant from the testable properties: for every bucket row,
    /// `up_ci95_low <= up_response_rate <= up_ci95_high`.
    #[test]
    fn test_bucket_ci_brackets_response_rate() {
        let events: Vec<Event> = (0..10)
            .map(|i| event(5.0, 7.0, 500_000, if i < 4 { Some(100) } else { None }, true))
            .collect();
        let params = AnalyzerConfig::default();
        let buckets = compute_buckets(&events, &params);
        assert_eq!(buckets.len(), 1);
        let b = &buckets[0];
        assert!(b.up_ci95_low <= b.up_response_rate + 1e-9);
        assert!(b.up_response_rate <= b.up_ci95_high + 1e-9);
        assert!((0.0..=1.0).contains(&b.up_response_rate));
    }

    /// Scenario: events missing a Chainlink delta (no oracle sample at-or-before t0).
    /// Expected: excluded from every bucket entirely.
    #[test]
    fn test_events_without_chainlink_delta_excluded() {
        let mut ev = event(5.0, 7.0, 500_000, Some(100), true);
        ev.chainlink_delta_from_baseline_usd = None;
        let params = AnalyzerConfig::default();
        let buckets = compute_buckets(&[ev], &params);
        assert!(buckets.is_empty());
    }

    /// Boundary behavior: a bucket key that would have zero matching events never appears.
    /// Expected: compute_buckets only returns keys with at least one real event.
    #[test]
    fn test_no_zero_n_buckets_emitted() {
        let events = vec![event(5.0, 7.0, 500_000, Some(100), true)];
        let params = AnalyzerConfig::default();
        let buckets = compute_buckets(&events, &params);
        assert!(buckets.iter().all(|b| b.n > 0));
    }
}
