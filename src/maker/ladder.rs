use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::MakerConfig;
use crate::types::{Side, Window};

use super::gateway::{OrderGateway, OrderSide, PlaceOrderRequest};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QuoteKey {
    pub asset_id: String,
    pub side: OrderSide,
    pub price_key: String,
}

#[derive(Clone, Copy, Debug)]
pub enum OwnOrderStatus {
    Filled,
    Cancelled,
    Expired,
}

/// Inbound events the ladder reconciles against. Every variant schedules
/// one reconciliation tick (debounced, coalescing multiple events).
pub enum MakerEvent {
    Book { asset_id: String, side: Side, price: f64, ts: i64 },
    Cex { price: f64, ts: i64 },
    WindowChanged(Window),
    OwnOrder { key: QuoteKey, status: OwnOrderStatus },
}

#[derive(Clone, Copy, Debug, Default)]
struct Book {
    best_bid: Option<f64>,
    best_ask: Option<f64>,
    ts: i64,
}

struct LadderState {
    cache: HashMap<QuoteKey, String>,
    books: HashMap<String, Book>,
    window: Option<Window>,
    last_cex: Option<(f64, i64)>,
    spike_until_ts: i64,
}

impl LadderState {
    fn new() -> Self {
        Self {
            cache: HashMap::new(),
            books: HashMap::new(),
            window: None,
            last_cex: None,
            spike_until_ts: i64::MIN,
        }
    }

    fn monitored_assets(&self, config: &MakerConfig) -> Vec<String> {
        let Some(w) = &self.window else { return Vec::new() };
        if config.quote_both_assets {
            vec![w.up_token_id.clone(), w.down_token_id.clone()]
        } else {
            vec![w.up_token_id.clone()]
        }
    }
}

fn round_to_tick(price: f64, tick: f64) -> f64 {
    let steps = (price / tick).round();
    (steps * tick * 10_000.0).round() / 10_000.0
}

fn clamp_price(price: f64) -> f64 {
    price.clamp(0.01, 0.99)
}

fn price_key(price: f64) -> String {
    format!("{price:.4}")
}

/// Whether the startup per-market cleanup is still owed. `cancel_all_on_start`
/// already nukes the whole account, so the narrower per-market call is
/// redundant when both flags are set.
fn cancel_on_start_needed(config: &MakerConfig) -> bool {
    config.cancel_on_start && !config.cancel_all_on_start
}

/// Whether an inbound event should arm the debounce timer. When
/// `event_driven` is false, reconciliation runs only off the `refresh_ms`
/// safety timer; events still update state, they just never shorten the
/// next tick.
fn event_arms_debounce(config: &MakerConfig, pending_since: Option<Instant>) -> bool {
    config.event_driven && pending_since.is_none()
}

/// Computes the desired BUY (and optionally SELL) ladder for one asset's
/// book: `safe_bid = min(best_bid, best_ask - tick)`, `safe_ask =
/// max(best_ask, best_bid + tick)` (never crosses), then `levels` rungs
/// stepping away from the touch by `tick` each, clamped to `[0.01, 0.99]`.
fn desired_for_book(book: &Book, config: &MakerConfig) -> Vec<(OrderSide, f64)> {
    let (Some(best_bid), Some(best_ask)) = (book.best_bid, book.best_ask) else {
        return Vec::new();
    };

    let safe_bid = best_bid.min(best_ask - config.tick);
    let safe_ask = best_ask.max(best_bid + config.tick);

    let mut out = Vec::new();
    for i in 0..config.levels {
        let step = i as f64 * config.tick;
        out.push((OrderSide::Buy, clamp_price(round_to_tick(safe_bid - step, config.tick))));
        if config.quote_both_sides {
            out.push((OrderSide::Sell, clamp_price(round_to_tick(safe_ask + step, config.tick))));
        }
    }
    out
}

fn apply_event(state: &mut LadderState, ev: MakerEvent, config: &MakerConfig) {
    match ev {
        MakerEvent::Book { asset_id, side, price, ts } => {
            let book = state.books.entry(asset_id).or_default();
            match side {
                Side::Bid => book.best_bid = Some(price),
                Side::Ask => book.best_ask = Some(price),
                _ => {}
            }
            book.ts = ts;
        }
        MakerEvent::Cex { price, ts } => {
            if let Some((prev_price, prev_ts)) = state.last_cex {
                if ts - prev_ts <= config.spike_window_ms && (price - prev_price).abs() >= config.spike_usd {
                    state.spike_until_ts = state.spike_until_ts.max(ts + config.spike_cooldown_ms);
                }
            }
            state.last_cex = Some((price, ts));
        }
        MakerEvent::WindowChanged(new_window) => {
            if let Some(old) = state.window.take() {
                state.cache.retain(|k, _| k.asset_id != old.up_token_id && k.asset_id != old.down_token_id);
                state.books.remove(&old.up_token_id);
                state.books.remove(&old.down_token_id);
            }
            state.window = Some(new_window);
        }
        MakerEvent::OwnOrder { key, status } => {
            let _ = status;
            state.cache.remove(&key);
        }
    }
}

async fn reconcile(state: &mut LadderState, gateway: &OrderGateway, config: &MakerConfig) {
    let now_ts = state.last_cex.map(|(_, t)| t).unwrap_or(i64::MIN);
    let assets = state.monitored_assets(config);

    if now_ts < state.spike_until_ts {
        for asset in &assets {
            if let Err(e) = gateway.cancel_by_market(None, Some(asset)).await {
                eprintln!("[MAKER] spike-guard cancel_by_market({asset}) failed: {e}");
            }
            state.cache.retain(|k, _| &k.asset_id != asset);
        }
        return;
    }

    let mut desired: HashMap<QuoteKey, f64> = HashMap::new();
    for asset in &assets {
        let Some(book) = state.books.get(asset) else { continue };
        for (side, price) in desired_for_book(book, config) {
            let key = QuoteKey {
                asset_id: asset.clone(),
                side,
                price_key: price_key(price),
            };
            desired.insert(key, price);
        }
    }

    let to_cancel: Vec<QuoteKey> = state.cache.keys().filter(|k| !desired.contains_key(k)).cloned().collect();
    let to_place: Vec<(QuoteKey, f64)> = desired.into_iter().filter(|(k, _)| !state.cache.contains_key(k)).collect();

    if !to_cancel.is_empty() {
        let batch: Vec<&QuoteKey> = to_cancel.iter().take(config.burst_cancel).collect();
        let order_ids: Vec<String> = batch.iter().filter_map(|k| state.cache.get(*k).cloned()).collect();
        match gateway.batch_cancel(&order_ids).await {
            Ok(()) => {
                for k in &batch {
                    state.cache.remove(*k);
                }
            }
            Err(e) => eprintln!("[MAKER] batch_cancel failed, will retry next tick: {e}"),
        }
    }

    for (key, price) in to_place.into_iter().take(config.burst_place) {
        let req = PlaceOrderRequest {
            asset_id: key.asset_id.clone(),
            side: key.side,
            price,
            size: config.size,
        };
        match gateway.place(&req).await {
            Ok(placed) => {
                state.cache.insert(key, placed.order_id);
            }
            Err(e) => eprintln!("[MAKER] place rejected (non-fatal, retried next tick): {e}"),
        }
    }
}

/// The MakerLadder's single task: owns `LiveOrderCache`, per-asset `Book`,
/// and the spike-guard sentinel. Every inbound event schedules one
/// reconciliation tick at `event_debounce_ms` in the future, coalescing;
/// a safety timer forces a tick every `refresh_ms` if none has run.
pub async fn run(mut event_rx: mpsc::Receiver<MakerEvent>, gateway: OrderGateway, config: MakerConfig, shutdown: CancellationToken) {
    let mut state = LadderState::new();

    if config.cancel_all_on_start {
        if let Err(e) = gateway.cancel_all().await {
            eprintln!("[MAKER] cancel_all_on_start failed: {e}");
        }
    }

    // `cancel_on_start` cleans up a prior session's resting quotes, scoped
    // to the window's two assets rather than the whole account. The assets
    // aren't known until the first WindowChanged event arrives, so the
    // cleanup fires then instead of before the event loop starts.
    // `cancel_all_on_start` already cleared everything — skip the redundant
    // per-market call in that case.
    let mut pending_cancel_on_start = cancel_on_start_needed(&config);

    let mut pending_since: Option<Instant> = None;
    let refresh = Duration::from_millis(config.refresh_ms);
    let mut last_tick = Instant::now();

    loop {
        let safety_deadline = last_tick + refresh;
        let next_deadline = match pending_since {
            Some(t) => (t + Duration::from_millis(config.event_debounce_ms)).min(safety_deadline),
            None => safety_deadline,
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                eprintln!("[MAKER] shutdown: cancelling all live quotes");
                let _ = gateway.cancel_all().await;
                break;
            }
            maybe_ev = event_rx.recv() => {
                match maybe_ev {
                    Some(ev) => {
                        let is_window_changed = matches!(ev, MakerEvent::WindowChanged(_));
                        apply_event(&mut state, ev, &config);

                        if is_window_changed && pending_cancel_on_start {
                            pending_cancel_on_start = false;
                            for asset in state.monitored_assets(&config) {
                                if let Err(e) = gateway.cancel_by_market(None, Some(&asset)).await {
                                    eprintln!("[MAKER] cancel_on_start cancel_by_market({asset}) failed: {e}");
                                }
                            }
                        }

                        if event_arms_debounce(&config, pending_since) {
                            pending_since = Some(Instant::now());
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::time::sleep_until(next_deadline) => {
                reconcile(&mut state, &gateway, &config).await;
                pending_since = None;
                last_tick = Instant::now();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario 5 from the spec: best_bid=0.40, best_ask=0.42, tick=0.01, levels=2.
    /// Expected: BUY at 0.40 and 0.39, SELL at 0.42 and 0.43; never crosses.
    #[test]
    fn test_scenario_desired_never_crosses() {
        let book = Book {
            best_bid: Some(0.40),
            best_ask: Some(0.42),
            ts: 0,
        };
        let config = MakerConfig {
            tick: 0.01,
            levels: 2,
            quote_both_sides: true,
            ..MakerConfig::default()
        };
        let desired = desired_for_book(&book, &config);

        let buys: Vec<f64> = desired.iter().filter(|(s, _)| *s == OrderSide::Buy).map(|(_, p)| *p).collect();
        let sells: Vec<f64> = desired.iter().filter(|(s, _)| *s == OrderSide::Sell).map(|(_, p)| *p).collect();

        assert!(buys.iter().any(|p| (p - 0.40).abs() < 1e-9));
        assert!(buys.iter().any(|p| (p - 0.39).abs() < 1e-9));
        assert!(sells.iter().any(|p| (p - 0.42).abs() < 1e-9));
        assert!(sells.iter().any(|p| (p - 0.43).abs() < 1e-9));
        assert!(buys.iter().all(|p| *p < 0.42));
        assert!(sells.iter().all(|p| *p > 0.40));
    }

    /// Scenario 6 from the spec: CEX (t=0, 60000), (t=200, 60007) with
    /// spike_usd=6, spike_window_ms=250, spike_cooldown_ms=1200.
    /// Expected: spike_until_ts = 200 + 1200 = 1400; guard active in [200, 1400), inactive at 1400+epsilon.
    #[test]
    fn test_scenario_spike_guard_window() {
        let mut state = LadderState::new();
        let config = MakerConfig {
            spike_usd: 6.0,
            spike_window_ms: 250,
            spike_cooldown_ms: 1200,
            ..MakerConfig::default()
        };

        apply_event(&mut state, MakerEvent::Cex { price: 60000.0, ts: 0 }, &config);
        apply_event(&mut state, MakerEvent::Cex { price: 60007.0, ts: 200 }, &config);

        assert_eq!(state.spike_until_ts, 1400);
        assert!(199 < state.spike_until_ts);
        assert!(1400 <= state.spike_until_ts);
        assert!(1401 > state.spike_until_ts);
    }

    /// Window rollover: cache entries keyed to the old window's assets are cleared.
    #[test]
    fn test_window_rollover_clears_old_cache() {
        let mut state = LadderState::new();
        let config = MakerConfig::default();
        let w1 = Window {
            condition_id: "c1".into(),
            slug: "s1".into(),
            up_token_id: "up1".into(),
            down_token_id: "down1".into(),
            start: 0,
            end: 900_000,
        };
        apply_event(&mut state, MakerEvent::WindowChanged(w1.clone()), &config);
        state.cache.insert(
            QuoteKey {
                asset_id: "up1".into(),
                side: OrderSide::Buy,
                price_key: "0.4000".into(),
            },
            "order-1".into(),
        );

        let w2 = Window {
            condition_id: "c2".into(),
            slug: "s2".into(),
            up_token_id: "up2".into(),
            down_token_id: "down2".into(),
            start: 900_000,
            end: 1_800_000,
        };
        apply_event(&mut state, MakerEvent::WindowChanged(w2), &config);

        assert!(state.cache.is_empty());
    }

    /// `cancel_on_start` (default true) must be consulted: with
    /// `cancel_all_on_start=false` it owes a startup per-market cleanup;
    /// with `cancel_all_on_start=true` the cleanup already happened and the
    /// narrower call would be redundant.
    #[test]
    fn test_cancel_on_start_skipped_when_cancel_all_already_ran() {
        let mut config = MakerConfig::default();
        assert!(cancel_on_start_needed(&config));

        config.cancel_all_on_start = true;
        assert!(!cancel_on_start_needed(&config));

        config.cancel_all_on_start = false;
        config.cancel_on_start = false;
        assert!(!cancel_on_start_needed(&config));
    }

    /// `event_driven=false` must make reconciliation refresh-timer-only:
    /// inbound events update state but never arm the debounce timer.
    #[test]
    fn test_event_driven_false_never_arms_debounce() {
        let mut config = MakerConfig::default();
        assert!(event_arms_debounce(&config, None));

        config.event_driven = false;
        assert!(!event_arms_debounce(&config, None));

        config.event_driven = true;
        assert!(!event_arms_debounce(&config, Some(Instant::now())));
    }
}
