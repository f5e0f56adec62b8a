use std::collections::HashSet;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::types::{Sample, Side, Source};

/// Commands adjusting the subscription set, issued by MarketDiscovery on
/// window rollover.
pub enum FeedCommand {
    Subscribe(String),
    Unsubscribe(String),
}

/// Pure producer: connects to the binary-market orderbook channel for a set
/// of asset ids, maintained live via `command_rx`. Owns no shared state
/// besides the remembered subscription set, which it resubscribes in full
/// on every reconnect.
pub async fn run(feed_tx: mpsc::Sender<Sample>, mut command_rx: mpsc::Receiver<FeedCommand>, ws_url: String) {
    let mut assets: HashSet<String> = HashSet::new();
    let mut backoff_ms: u64 = 500;
    const BACKOFF_CAP_MS: u64 = 30_000;
    const MAX_ATTEMPTS: u32 = 50;
    let mut attempts: u32 = 0;

    loop {
        // Drain any pending subscription changes even while disconnected.
        while let Ok(cmd) = command_rx.try_recv() {
            apply_command(&mut assets, cmd);
        }

        if attempts >= MAX_ATTEMPTS {
            eprintln!("[MARKET] reconnect attempts exhausted ({}), giving up", attempts);
            return;
        }
        attempts += 1;

        eprintln!("[MARKET] connecting to {}", ws_url);
        let ws = match connect_async(&ws_url).await {
            Ok((ws, _)) => {
                eprintln!("[MARKET] connected");
                backoff_ms = 500;
                attempts = 0;
                ws
            }
            Err(e) => {
                eprintln!("[MARKET] connect failed: {}, retrying in {}ms", e, backoff_ms);
                tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(BACKOFF_CAP_MS);
                continue;
            }
        };

        let (mut write, mut read) = ws.split();

        if !assets.is_empty() {
            if let Err(e) = send_subscribe(&mut write, &assets).await {
                eprintln!("[MARKET] subscribe failed: {}, reconnecting", e);
                continue;
            }
            eprintln!("[MARKET] subscribed to {} assets", assets.len());
        }

        let mut ping_interval = tokio::time::interval(tokio::time::Duration::from_secs(5));

        'conn: loop {
            tokio::select! {
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            let resub_needed = apply_command(&mut assets, cmd);
                            if resub_needed {
                                if let Err(e) = send_subscribe(&mut write, &assets).await {
                                    eprintln!("[MARKET] resubscribe failed: {}", e);
                                }
                            }
                        }
                        None => {
                            eprintln!("[MARKET] command channel closed, exiting");
                            return;
                        }
                    }
                }

                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            eprintln!("[MARKET] ws error: {}, reconnecting", e);
                            break 'conn;
                        }
                        None => {
                            eprintln!("[MARKET] stream ended, reconnecting");
                            break 'conn;
                        }
                    };

                    match msg {
                        Message::Text(text) => {
                            if text.trim() == "\"INVALID OPERATION\"" || text.trim() == "INVALID OPERATION" {
                                continue;
                            }
                            for sample in parse_frame(&text) {
                                if feed_tx.send(sample).await.is_err() {
                                    eprintln!("[MARKET] channel closed, exiting");
                                    return;
                                }
                            }
                        }
                        Message::Ping(_) | Message::Pong(_) => {}
                        _ => {}
                    }
                }

                _ = ping_interval.tick() => {
                    let _ = write.send(Message::Ping(vec![])).await;
                }
            }
        }

        eprintln!("[MARKET] disconnected, reconnecting in {}ms", backoff_ms);
        tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(BACKOFF_CAP_MS);
    }
}

/// Returns true if the set changed (so the caller should resubscribe).
fn apply_command(assets: &mut HashSet<String>, cmd: FeedCommand) -> bool {
    match cmd {
        FeedCommand::Subscribe(id) => assets.insert(id),
        FeedCommand::Unsubscribe(id) => assets.remove(&id),
    }
}

async fn send_subscribe<S>(write: &mut S, assets: &HashSet<String>) -> Result<(), String>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let ids: Vec<&String> = assets.iter().collect();
    let sub = serde_json::json!({
        "type": "subscribe",
        "channel": "price",
        "assets_ids": ids,
    });
    write
        .send(Message::Text(sub.to_string()))
        .await
        .map_err(|e| e.to_string())
}

/// Symbol label used for market-book samples; synthetic and distinct per
/// outcome side.
fn symbol_for_asset(asset_id: &str) -> String {
    asset_id.to_string()
}

/// Accepts two frame shapes: an initial snapshot array, or an update frame
/// carrying `price_changes`. Rejects anything that doesn't fit rather than
/// coercing defaults.
fn parse_frame(text: &str) -> Vec<Sample> {
    let v: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    let mut out = Vec::new();

    if let Some(arr) = v.as_array() {
        for entry in arr {
            out.extend(parse_snapshot_entry(entry));
        }
        return out;
    }

    if let Some(obj) = v.as_object() {
        if let Some(changes) = obj.get("price_changes").and_then(|c| c.as_array()) {
            for change in changes {
                out.extend(parse_price_change(change));
            }
            return out;
        }
        // A lone snapshot object (not wrapped in an array).
        out.extend(parse_snapshot_entry(&v));
    }

    out
}

fn parse_snapshot_entry(entry: &serde_json::Value) -> Vec<Sample> {
    let Some(asset_id) = entry.get("asset_id").and_then(|a| a.as_str()) else {
        return Vec::new();
    };
    let ts = entry
        .get("timestamp")
        .and_then(coerce_i64)
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    let mut out = Vec::new();
    let symbol = symbol_for_asset(asset_id);

    if let Some(best_bid) = best_price(entry.get("bids"), true) {
        if let Some(s) = Sample::new_checked(Source::MarketBook, &symbol, Side::Bid, best_bid, ts) {
            out.push(s.with_asset_id(asset_id));
        }
    }
    if let Some(best_ask) = best_price(entry.get("asks"), false) {
        if let Some(s) = Sample::new_checked(Source::MarketBook, &symbol, Side::Ask, best_ask, ts) {
            out.push(s.with_asset_id(asset_id));
        }
    }
    out
}

/// `want_max` = true for bids (best = highest), false for asks (best = lowest).
fn best_price(levels: Option<&serde_json::Value>, want_max: bool) -> Option<f64> {
    let arr = levels?.as_array()?;
    let mut best: Option<f64> = None;
    for level in arr {
        let price = level.get("price").and_then(coerce_f64)?;
        best = Some(match best {
            None => price,
            Some(b) if want_max => b.max(price),
            Some(b) => b.min(price),
        });
    }
    best
}

fn parse_price_change(change: &serde_json::Value) -> Vec<Sample> {
    let Some(asset_id) = change.get("asset_id").and_then(|a| a.as_str()) else {
        return Vec::new();
    };
    let ts = change
        .get("timestamp")
        .and_then(coerce_i64)
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
    let symbol = symbol_for_asset(asset_id);

    let mut out = Vec::new();

    // The `size` field's exact semantics (fill vs resting size) are
    // ambiguous in the source; stored verbatim as opaque extra, not used
    // here.
    if let (Some(price), Some(size)) = (
        change.get("price").and_then(coerce_f64),
        change.get("size").and_then(coerce_f64),
    ) {
        if let Some(s) = Sample::new_checked(Source::MarketTrade, &symbol, Side::Trade, price, ts) {
            out.push(
                s.with_asset_id(asset_id)
                    .with_extra(format!("{{\"size\":{}}}", size)),
            );
        }
    }

    if let Some(best_bid) = change.get("best_bid").and_then(coerce_f64) {
        if let Some(s) = Sample::new_checked(Source::MarketBook, &symbol, Side::Bid, best_bid, ts) {
            out.push(s.with_asset_id(asset_id));
        }
    }
    if let Some(best_ask) = change.get("best_ask").and_then(coerce_f64) {
        if let Some(s) = Sample::new_checked(Source::MarketBook, &symbol, Side::Ask, best_ask, ts) {
            out.push(s.with_asset_id(asset_id));
        }
    }

    out
}

fn coerce_f64(v: &serde_json::Value) -> Option<f64> {
    v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_f64())
}

fn coerce_i64(v: &serde_json::Value) -> Option<i64> {
    v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_i64())
}
