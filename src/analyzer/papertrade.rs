use std::collections::BTreeMap;

use crate::config::{AnalyzerConfig, PapertradeConfig};
use crate::error::AnalysisError;
use crate::store::SampleStore;
use crate::types::{Event, MarketSide, Sample, ScanOrder, Side, Source, Window};

use super::bucket::bucket_key_for_papertrade;
use super::events;
use super::SCAN_LIMIT;

/// Runs the Papertrader over `[from, to]`, sharing steps 1-4 with the
/// Analyzer (Window reconstruction, per-window series fetch, Event
/// assembly) and performing only the entry/exit simulation and
/// aggregation that are specific to papertrading.
pub fn run(store: &SampleStore, cex_symbol: &str, oracle_symbol: &str, from: i64, to: i64, analyzer_params: &AnalyzerConfig, params: &PapertradeConfig) -> Result<PapertradeReport, AnalysisError> {
    let windows = super::reconstruct_windows(store, from, to)?;

    let mut all_fills = Vec::new();
    let mut total_skipped_too_late = 0u32;
    let mut total_skipped_no_quote = 0u32;

    for (window, baseline_price) in &windows {
        let cex_bids = store
            .scan(Source::CexBook, cex_symbol, Side::Bid, window.start, window.end, SCAN_LIMIT, ScanOrder::Asc)
            .map_err(AnalysisError::Store)?;

        let mut oracle = store
            .scan(Source::OracleLog, oracle_symbol, Side::Oracle, window.start, window.end, SCAN_LIMIT, ScanOrder::Asc)
            .map_err(AnalysisError::Store)?;
        oracle.extend(
            store
                .scan(Source::OracleAggregator, oracle_symbol, Side::Oracle, window.start, window.end, SCAN_LIMIT, ScanOrder::Asc)
                .map_err(AnalysisError::Store)?,
        );
        oracle.sort_by_key(|s| s.observed_at);

        let up_bids = store
            .scan(Source::MarketBook, &window.up_token_id, Side::Bid, window.start, window.end, SCAN_LIMIT, ScanOrder::Asc)
            .map_err(AnalysisError::Store)?;
        let up_asks = store
            .scan(Source::MarketBook, &window.up_token_id, Side::Ask, window.start, window.end, SCAN_LIMIT, ScanOrder::Asc)
            .map_err(AnalysisError::Store)?;
        let down_bids = store
            .scan(Source::MarketBook, &window.down_token_id, Side::Bid, window.start, window.end, SCAN_LIMIT, ScanOrder::Asc)
            .map_err(AnalysisError::Store)?;
        let down_asks = store
            .scan(Source::MarketBook, &window.down_token_id, Side::Ask, window.start, window.end, SCAN_LIMIT, ScanOrder::Asc)
            .map_err(AnalysisError::Store)?;

        let events = events::build_events(window, *baseline_price, &cex_bids, &oracle, &up_bids, &up_asks, &down_bids, &down_asks, analyzer_params);

        let (fills, skipped_too_late, skipped_no_quote) = simulate_window(window, &events, &up_asks, &up_bids, &down_asks, &down_bids, analyzer_params, params);
        all_fills.extend(fills);
        total_skipped_too_late += skipped_too_late;
        total_skipped_no_quote += skipped_no_quote;
    }

    Ok(aggregate(all_fills, total_skipped_too_late, total_skipped_no_quote, params))
}

/// One simulated single-share round-trip: enter at `entry_ask` on the
/// spike side's ask series, exit at `exit_bid` on the same side's bid
/// series, `hold_ms` later.
#[derive(Clone, Debug)]
pub struct Fill {
    pub t0: i64,
    pub side: MarketSide,
    pub bucket_key: Option<String>,
    pub entry: f64,
    pub exit: f64,
    pub fee: f64,
    pub pnl_per_share: f64,
    pub roi: f64,
}

#[derive(Clone, Debug, Default)]
pub struct PapertradeSummary {
    pub fills: u32,
    pub skipped_too_late: u32,
    pub skipped_no_quote: u32,
    pub avg_pnl: f64,
    pub median_pnl: f64,
    pub win_rate: f64,
    pub avg_roi: f64,
    pub total_pnl: f64,
}

#[derive(Clone, Debug, Default)]
pub struct PapertradeReport {
    pub global: PapertradeSummary,
    pub per_bucket_side: BTreeMap<(String, MarketSide), PapertradeSummary>,
    pub include_fills: Vec<Fill>,
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn summarize(fills: &[&Fill]) -> PapertradeSummary {
    let pnls: Vec<f64> = fills.iter().map(|f| f.pnl_per_share).collect();
    let rois: Vec<f64> = fills.iter().map(|f| f.roi).collect();
    let wins = fills.iter().filter(|f| f.pnl_per_share > 0.0).count();

    PapertradeSummary {
        fills: fills.len() as u32,
        skipped_too_late: 0,
        skipped_no_quote: 0,
        avg_pnl: if pnls.is_empty() { 0.0 } else { pnls.iter().sum::<f64>() / pnls.len() as f64 },
        median_pnl: median(pnls.clone()),
        win_rate: if fills.is_empty() { 0.0 } else { wins as f64 / fills.len() as f64 },
        avg_roi: if rois.is_empty() { 0.0 } else { rois.iter().sum::<f64>() / rois.len() as f64 },
        total_pnl: pnls.iter().sum(),
    }
}

/// First sample with `observed_at >= t` in a series sorted ascending.
fn first_at_or_after(series: &[Sample], t: i64) -> Option<&Sample> {
    let idx = series.partition_point(|s| s.observed_at < t);
    series.get(idx)
}

/// Simulates every spike-driven Event against one side's ask/bid series.
/// Shares the Event stream the Analyzer already built for the same window
/// (steps 1-4 of the joined algorithm) — this function performs only the
/// papertrade-specific step 5 (entry/exit simulation).
#[allow(clippy::too_many_arguments)]
pub fn simulate_window(
    window: &Window,
    events: &[Event],
    up_asks: &[Sample],
    up_bids: &[Sample],
    down_asks: &[Sample],
    down_bids: &[Sample],
    analyzer_params: &AnalyzerConfig,
    params: &PapertradeConfig,
) -> (Vec<Fill>, u32, u32) {
    let mut fills = Vec::new();
    let mut skipped_too_late = 0u32;
    let mut skipped_no_quote = 0u32;

    let order_p95_ms = analyzer_params.order_p95_ms.unwrap_or(0);
    let latest_exit_allowed = window.end - analyzer_params.safety_ms;

    for ev in events {
        let direction = if ev.binance_delta_usd > 0.0 {
            1
        } else if ev.binance_delta_usd < 0.0 {
            -1
        } else {
            0
        };
        if direction == 0 {
            continue;
        }

        let side = if direction > 0 { MarketSide::Up } else { MarketSide::Down };
        let (ask_series, bid_series) = match side {
            MarketSide::Up => (up_asks, up_bids),
            MarketSide::Down => (down_asks, down_bids),
        };

        let t_entry = ev.t0 + order_p95_ms;
        let t_exit = t_entry + params.hold_ms;

        if t_exit > latest_exit_allowed {
            skipped_too_late += 1;
            continue;
        }

        let entry_ask = first_at_or_after(ask_series, t_entry);
        let exit_bid = first_at_or_after(bid_series, t_exit);

        let (entry_sample, exit_sample) = match (entry_ask, exit_bid) {
            (Some(e), Some(x)) => (e, x),
            _ => {
                skipped_no_quote += 1;
                continue;
            }
        };

        let entry = entry_sample.price;
        let exit = exit_sample.price;
        let fee = params.fee_bps / 10_000.0 * (entry + exit);
        let pnl_per_share = exit - entry - fee;
        let roi = if entry != 0.0 { pnl_per_share / entry } else { 0.0 };

        fills.push(Fill {
            t0: ev.t0,
            side,
            bucket_key: bucket_key_for_papertrade(ev, analyzer_params),
            entry,
            exit,
            fee,
            pnl_per_share,
            roi,
        });
    }

    (fills, skipped_too_late, skipped_no_quote)
}

/// Aggregates fills (already simulated across every window in range) into
/// the global and per-(bucket, side) summaries. `include_fills` keeps the
/// raw fill rows (capped at `max_fills`) only when the caller asked for
/// them.
pub fn aggregate(all_fills: Vec<Fill>, total_skipped_too_late: u32, total_skipped_no_quote: u32, params: &PapertradeConfig) -> PapertradeReport {
    let mut global = summarize(&all_fills.iter().collect::<Vec<_>>());
    global.skipped_too_late = total_skipped_too_late;
    global.skipped_no_quote = total_skipped_no_quote;

    let mut groups: BTreeMap<(String, MarketSide), Vec<&Fill>> = BTreeMap::new();
    for f in &all_fills {
        if let Some(key) = &f.bucket_key {
            groups.entry((key.clone(), f.side)).or_default().push(f);
        }
    }
    let per_bucket_side = groups.into_iter().map(|(k, fs)| (k, summarize(&fs))).collect();

    let include_fills = if params.include_fills {
        all_fills.into_iter().take(params.max_fills as usize).collect()
    } else {
        Vec::new()
    };

    PapertradeReport {
        global,
        per_bucket_side,
        include_fills,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Side, Source};

    fn s(price: f64, t: i64) -> Sample {
        Sample::new_checked(Source::MarketBook, "X", Side::Ask, price, t).unwrap()
    }

    fn window() -> Window {
        Window {
            condition_id: "c".into(),
            slug: "s".into(),
            up_token_id: "u".into(),
            down_token_id: "d".into(),
            start: 0,
            end: 900_000,
        }
    }

    fn event_at(t0: i64, delta: f64) -> Event {
        Event {
            t0,
            binance_delta_usd: delta,
            chainlink_delta_from_baseline_usd: Some(1.0),
            remaining_ms: 900_000 - t0,
            up_mid0: Some(0.5),
            up_mid1: Some(0.52),
            up_lag_ms: Some(50),
            down_mid0: Some(0.5),
            down_mid1: None,
            down_lag_ms: None,
            up_aligned: true,
            down_aligned: false,
        }
    }

    /// Scenario 4 from the spec: spike at `t0 = Window.end - 2100`, order_p95_ms=100,
    /// hold_ms=2000, safety_ms=150 -> t_exit = t0+100+2000 = Window.end-2100+2100 = Window.end,
    /// which exceeds `Window.end - safety_ms`.
    /// Expected: skipped_too_late incremented; no fill produced.
    #[test]
    fn test_scenario_papertrade_skip_too_late() {
        let w = window();
        let t0 = w.end - 2_100;
        let events = vec![event_at(t0, 7.0)];

        let analyzer_params = AnalyzerConfig {
            order_p95_ms: Some(100),
            safety_ms: 150,
            ..AnalyzerConfig::default()
        };
        let params = PapertradeConfig {
            hold_ms: 2000,
            ..PapertradeConfig::default()
        };

        let up_asks = vec![s(0.51, t0 + 100), s(0.52, t0 + 2100)];
        let up_bids = vec![s(0.50, t0 + 100), s(0.53, t0 + 2100)];

        let (fills, skipped_too_late, skipped_no_quote) = simulate_window(&w, &events, &up_asks, &up_bids, &[], &[], &analyzer_params, &params);

        assert!(fills.is_empty());
        assert_eq!(skipped_too_late, 1);
        assert_eq!(skipped_no_quote, 0);
    }

    /// Scenario: a fill with quotes present for both entry and exit.
    /// Expected: one fill; roi and pnl computed from entry/exit/fee exactly.
    #[test]
    fn test_simulate_window_produces_fill() {
        let w = window();
        let events = vec![event_at(0, 7.0)];
        let analyzer_params = AnalyzerConfig {
            order_p95_ms: Some(50),
            safety_ms: 150,
            ..AnalyzerConfig::default()
        };
        let params = PapertradeConfig {
            hold_ms: 1000,
            fee_bps: 10.0,
            ..PapertradeConfig::default()
        };

        let up_asks = vec![s(0.50, 50)];
        let up_bids = vec![s(0.55, 1050)];

        let (fills, skipped_too_late, skipped_no_quote) = simulate_window(&w, &events, &up_asks, &up_bids, &[], &[], &analyzer_params, &params);

        assert_eq!(fills.len(), 1);
        assert_eq!(skipped_too_late, 0);
        assert_eq!(skipped_no_quote, 0);
        let f = &fills[0];
        assert!((f.entry - 0.50).abs() < 1e-9);
        assert!((f.exit - 0.55).abs() < 1e-9);
        let expected_fee = 10.0 / 10_000.0 * (0.50 + 0.55);
        assert!((f.fee - expected_fee).abs() < 1e-9);
        assert!((f.pnl_per_share - (0.55 - 0.50 - expected_fee)).abs() < 1e-9);
    }

    /// Scenario: no ask/bid sample exists at or after the required timestamps.
    /// Expected: skipped_no_quote incremented, no fill.
    #[test]
    fn test_simulate_window_skip_no_quote() {
        let w = window();
        let events = vec![event_at(0, 7.0)];
        let analyzer_params = AnalyzerConfig {
            order_p95_ms: Some(50),
            safety_ms: 150,
            ..AnalyzerConfig::default()
        };
        let params = PapertradeConfig::default();

        let (fills, skipped_too_late, skipped_no_quote) = simulate_window(&w, &events, &[], &[], &[], &[], &analyzer_params, &params);
        assert!(fills.is_empty());
        assert_eq!(skipped_too_late, 0);
        assert_eq!(skipped_no_quote, 1);
    }
}
