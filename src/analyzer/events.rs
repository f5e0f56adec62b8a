use crate::config::AnalyzerConfig;
use crate::types::{Event, Sample, Window};

/// One qualifying CEX bid-to-bid transition, before it's joined with the
/// oracle and market-book series.
struct Spike {
    t0: i64,
    binance_delta_usd: f64,
}

/// Single-pass delta detector over the CEX bid series. A spike is declared
/// when `|cur.price - prev.price| >= spike_usd` and the cooldown since the
/// last spike has elapsed. With `spike_usd = 0` and `spike_cooldown_ms = 0`
/// every transition qualifies — still O(n), still terminates, at most one
/// Event per CEX sample (see boundary behavior in the spec).
fn detect_spikes(cex_bids: &[Sample], spike_usd: f64, spike_cooldown_ms: i64) -> Vec<Spike> {
    let mut spikes = Vec::new();
    let mut last_spike_time = i64::MIN;

    for pair in cex_bids.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        let delta = cur.price - prev.price;
        if delta.abs() >= spike_usd && cur.observed_at - last_spike_time >= spike_cooldown_ms {
            spikes.push(Spike {
                t0: cur.observed_at,
                binance_delta_usd: delta,
            });
            last_spike_time = cur.observed_at;
        }
    }
    spikes
}

fn mid_of(bid: Option<f64>, ask: Option<f64>) -> Option<f64> {
    match (bid, ask) {
        (Some(b), Some(a)) => Some((b + a) / 2.0),
        (Some(b), None) => Some(b),
        (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}

/// Last value at-or-before `t` in a series sorted ascending by
/// `observed_at`.
pub(crate) fn value_at_or_before(series: &[Sample], t: i64) -> Option<f64> {
    let idx = series.partition_point(|s| s.observed_at <= t);
    if idx == 0 {
        None
    } else {
        Some(series[idx - 1].price)
    }
}

/// Walks the bid and ask series in merged-timestamp order starting strictly
/// after `t0`, looking for the first point at which the running mid has
/// moved by at least `epsilon` from the mid at `t0`. Ties between a bid and
/// an ask update at the same timestamp are applied simultaneously before
/// the mid is re-evaluated.
///
/// Returns `(mid0, mid1, lag_ms)`, or `(mid0, None, None)` if no qualifying
/// move occurs within `[t0, t0+reaction_window_ms]`. Returns `(None, None,
/// None)` if neither side of the book has a value at `t0`.
///
/// When only one side of the book is present, the single-sided price is
/// used as the mid (inflates perceived moves — preserved per the source's
/// behavior, flagged here rather than silently accepted).
pub fn first_mid_move(bid_series: &[Sample], ask_series: &[Sample], t0: i64, reaction_window_ms: i64, epsilon: f64) -> (Option<f64>, Option<f64>, Option<i64>) {
    let mut cur_bid = value_at_or_before(bid_series, t0);
    let mut cur_ask = value_at_or_before(ask_series, t0);

    let mid0 = match mid_of(cur_bid, cur_ask) {
        Some(m) => m,
        None => return (None, None, None),
    };

    let end = t0 + reaction_window_ms;
    let bid_start = bid_series.partition_point(|s| s.observed_at <= t0);
    let ask_start = ask_series.partition_point(|s| s.observed_at <= t0);

    let mut bi = bid_start;
    let mut ai = ask_start;

    loop {
        let next_bid_ts = bid_series.get(bi).map(|s| s.observed_at);
        let next_ask_ts = ask_series.get(ai).map(|s| s.observed_at);

        let next_ts = match (next_bid_ts, next_ask_ts) {
            (None, None) => break,
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (Some(b), Some(a)) => b.min(a),
        };
        if next_ts > end {
            break;
        }

        // Apply every update at `next_ts` simultaneously (tie resolution).
        while bid_series.get(bi).map(|s| s.observed_at) == Some(next_ts) {
            cur_bid = Some(bid_series[bi].price);
            bi += 1;
        }
        while ask_series.get(ai).map(|s| s.observed_at) == Some(next_ts) {
            cur_ask = Some(ask_series[ai].price);
            ai += 1;
        }

        if let Some(mid) = mid_of(cur_bid, cur_ask) {
            if (mid - mid0).abs() >= epsilon {
                return (Some(mid0), Some(mid), Some(next_ts - t0));
            }
        }
    }

    (Some(mid0), None, None)
}

/// Assembles Events for one Window from its six raw series plus the
/// Baseline price. Shared verbatim by the Analyzer and Papertrader (they
/// share steps 1-4).
#[allow(clippy::too_many_arguments)]
pub fn build_events(
    window: &Window,
    baseline_price: f64,
    cex_bids: &[Sample],
    oracle: &[Sample],
    up_bids: &[Sample],
    up_asks: &[Sample],
    down_bids: &[Sample],
    down_asks: &[Sample],
    params: &AnalyzerConfig,
) -> Vec<Event> {
    let spikes = detect_spikes(cex_bids, params.spike_usd, params.spike_cooldown_ms);

    spikes
        .into_iter()
        .map(|spike| {
            let t0 = spike.t0;
            let chainlink_delta_from_baseline_usd = value_at_or_before(oracle, t0).map(|p| p - baseline_price);

            let (up_mid0, up_mid1, up_lag_ms) = first_mid_move(up_bids, up_asks, t0, params.reaction_window_ms, params.epsilon);
            let (down_mid0, down_mid1, down_lag_ms) = first_mid_move(down_bids, down_asks, t0, params.reaction_window_ms, params.epsilon);

            let direction = if spike.binance_delta_usd > 0.0 {
                1
            } else if spike.binance_delta_usd < 0.0 {
                -1
            } else {
                0
            };

            let up_move = match (up_mid0, up_mid1) {
                (Some(m0), Some(m1)) => Some(m1 - m0),
                _ => None,
            };
            let down_move = match (down_mid0, down_mid1) {
                (Some(m0), Some(m1)) => Some(m1 - m0),
                _ => None,
            };

            let up_aligned = matches!(up_move, Some(m) if (direction > 0 && m > 0.0) || (direction < 0 && m < 0.0));
            let down_aligned = matches!(down_move, Some(m) if (direction > 0 && m < 0.0) || (direction < 0 && m > 0.0));

            Event {
                t0,
                binance_delta_usd: spike.binance_delta_usd,
                chainlink_delta_from_baseline_usd,
                remaining_ms: window.remaining_ms(t0),
                up_mid0,
                up_mid1,
                up_lag_ms,
                down_mid0,
                down_mid1,
                down_lag_ms,
                up_aligned,
                down_aligned,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Side, Source};

    fn s(source: Source, side: Side, price: f64, t: i64) -> Sample {
        Sample::new_checked(source, "X", side, price, t).unwrap()
    }

    /// Scenario 1 from the spec: a single clean spike with an aligned UP reaction.
    /// Expected: 1 event; binance_delta=+7.00; chainlink_delta=+2.00; up_lag_ms=50;
    /// up_mid0=0.505, up_mid1=0.525; up_aligned=true.
    #[test]
    fn test_scenario_single_clean_spike_aligned_up() {
        let window = Window {
            condition_id: "c".into(),
            slug: "s".into(),
            up_token_id: "u".into(),
            down_token_id: "d".into(),
            start: 0,
            end: 900_000,
        };
        let cex_bids = vec![s(Source::CexBook, Side::Bid, 60000.00, 100), s(Source::CexBook, Side::Bid, 60007.00, 200)];
        let oracle = vec![s(Source::OracleLog, Side::Oracle, 60002.00, 195)];
        let up_bids = vec![s(Source::MarketBook, Side::Bid, 0.500, 150), s(Source::MarketBook, Side::Bid, 0.520, 250)];
        let up_asks = vec![s(Source::MarketBook, Side::Ask, 0.510, 150), s(Source::MarketBook, Side::Ask, 0.530, 250)];
        let down_bids = vec![s(Source::MarketBook, Side::Bid, 0.480, 150), s(Source::MarketBook, Side::Bid, 0.460, 250)];
        let down_asks = vec![s(Source::MarketBook, Side::Ask, 0.490, 150), s(Source::MarketBook, Side::Ask, 0.470, 250)];

        let params = AnalyzerConfig {
            spike_usd: 6.0,
            epsilon: 0.01,
            reaction_window_ms: 3000,
            ..AnalyzerConfig::default()
        };

        let events = build_events(&window, 60000.00, &cex_bids, &oracle, &up_bids, &up_asks, &down_bids, &down_asks, &params);
        assert_eq!(events.len(), 1);
        let ev = &events[0];
        assert!((ev.binance_delta_usd - 7.00).abs() < 1e-9);
        assert!((ev.chainlink_delta_from_baseline_usd.unwrap() - 2.00).abs() < 1e-9);
        assert_eq!(ev.up_lag_ms, Some(50));
        assert!((ev.up_mid0.unwrap() - 0.505).abs() < 1e-9);
        assert!((ev.up_mid1.unwrap() - 0.525).abs() < 1e-9);
        assert!(ev.up_aligned);
    }

    /// Scenario 2 from the spec: two CEX transitions at t=100 (+7) and t=300 (+7)
    /// with spike_cooldown_ms=250.
    /// Expected: exactly one event; the second transition is suppressed by the cooldown.
    #[test]
    fn test_scenario_cooldown_suppresses_second_spike() {
        let cex_bids = vec![
            s(Source::CexBook, Side::Bid, 60000.0, 0),
            s(Source::CexBook, Side::Bid, 60007.0, 100),
            s(Source::CexBook, Side::Bid, 60014.0, 300),
        ];
        let spikes = detect_spikes(&cex_bids, 6.0, 250);
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].t0, 100);
    }

    /// Boundary behavior: `first_mid_move` with empty bid and ask series.
    /// Expected: returns (None, None, None) — no mid0 can be established.
    #[test]
    fn test_first_mid_move_empty_series() {
        let (mid0, mid1, lag) = first_mid_move(&[], &[], 1000, 3000, 0.01);
        assert_eq!((mid0, mid1, lag), (None, None, None));
    }

    /// Boundary behavior: spike_usd=0 and spike_cooldown_ms=0.
    /// Expected: detection still terminates and emits at most one event per CEX sample transition.
    #[test]
    fn test_detect_spikes_zero_thresholds_terminates() {
        let cex_bids = vec![
            s(Source::CexBook, Side::Bid, 60000.0, 0),
            s(Source::CexBook, Side::Bid, 60000.0, 100),
            s(Source::CexBook, Side::Bid, 60001.0, 200),
        ];
        let spikes = detect_spikes(&cex_bids, 0.0, 0);
        assert_eq!(spikes.len(), 2);
    }

    /// Scenario: a move that arrives exactly at the reaction window boundary.
    /// Expected: the boundary sample is included (the window is `[t0, t0+reaction_window_ms]` inclusive).
    #[test]
    fn test_first_mid_move_inclusive_boundary() {
        let bids = vec![s(Source::MarketBook, Side::Bid, 0.50, 0), s(Source::MarketBook, Side::Bid, 0.60, 3000)];
        let asks = vec![s(Source::MarketBook, Side::Ask, 0.52, 0)];
        let (mid0, mid1, lag) = first_mid_move(&bids, &asks, 0, 3000, 0.01);
        assert_eq!(mid0, Some(0.51));
        assert_eq!(mid1, Some(0.56));
        assert_eq!(lag, Some(3000));
    }
}
