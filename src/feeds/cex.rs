use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::types::{Sample, Side, Source};

/// Pure producer: connects to the CEX best-bid/ask stream, emits throttled
/// Bid/Ask samples. Owns no shared state — only holds a channel sender.
///
/// Per-side throttle: at most one write every `sample_interval_ms` unless
/// the price changed, whichever occurs first.
pub async fn run(feed_tx: mpsc::Sender<Sample>, symbol: String, ws_url: String, ws_fallback: String, sample_interval_ms: i64) {
    let mut backoff_ms: u64 = 500;
    const BACKOFF_CAP_MS: u64 = 30_000;
    const MAX_ATTEMPTS: u32 = 50;
    let mut attempts: u32 = 0;

    let mut last_bid_price: Option<f64> = None;
    let mut last_bid_emit_ms: i64 = i64::MIN;
    let mut last_ask_price: Option<f64> = None;
    let mut last_ask_emit_ms: i64 = i64::MIN;

    loop {
        if attempts >= MAX_ATTEMPTS {
            eprintln!("[CEX] reconnect attempts exhausted ({}), giving up", attempts);
            return;
        }
        attempts += 1;

        eprintln!("[CEX] connecting to {}", ws_url);
        let ws = match connect_async(&ws_url).await {
            Ok((ws, _)) => {
                eprintln!("[CEX] connected");
                backoff_ms = 500;
                attempts = 0;
                ws
            }
            Err(e) => {
                eprintln!("[CEX] primary failed: {}, trying fallback", e);
                match connect_async(&ws_fallback).await {
                    Ok((ws, _)) => {
                        eprintln!("[CEX] connected via fallback");
                        backoff_ms = 500;
                        attempts = 0;
                        ws
                    }
                    Err(e2) => {
                        eprintln!("[CEX] fallback failed: {}, retrying in {}ms", e2, backoff_ms);
                        tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
                        backoff_ms = (backoff_ms * 2).min(BACKOFF_CAP_MS);
                        continue;
                    }
                }
            }
        };

        let (_write, mut read) = ws.split();

        while let Some(msg) = read.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    eprintln!("[CEX] ws error: {}, reconnecting", e);
                    break;
                }
            };

            let Message::Text(text) = msg else { continue };
            let Some((bid, ask, event_time)) = parse_book_ticker(&text) else { continue };

            if let Some((price, t)) = bid {
                if should_emit(last_bid_price, last_bid_emit_ms, price, t, sample_interval_ms) {
                    if let Some(s) = Sample::new_checked(Source::CexBook, &symbol, Side::Bid, price, t) {
                        if feed_tx.send(s).await.is_err() {
                            eprintln!("[CEX] channel closed, exiting");
                            return;
                        }
                        last_bid_price = Some(price);
                        last_bid_emit_ms = t;
                    }
                }
            }
            if let Some((price, t)) = ask {
                if should_emit(last_ask_price, last_ask_emit_ms, price, t, sample_interval_ms) {
                    if let Some(s) = Sample::new_checked(Source::CexBook, &symbol, Side::Ask, price, t) {
                        if feed_tx.send(s).await.is_err() {
                            eprintln!("[CEX] channel closed, exiting");
                            return;
                        }
                        last_ask_price = Some(price);
                        last_ask_emit_ms = t;
                    }
                }
            }
            let _ = event_time;
        }

        eprintln!("[CEX] disconnected, reconnecting in {}ms", backoff_ms);
        tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(BACKOFF_CAP_MS);
    }
}

fn should_emit(last_price: Option<f64>, last_emit_ms: i64, price: f64, t: i64, interval_ms: i64) -> bool {
    match last_price {
        None => true,
        Some(p) if p != price => true,
        Some(_) => t - last_emit_ms >= interval_ms,
    }
}

/// Parses a `{u, s, b, B, a, A, E}` bookTicker frame. Returns
/// `((bid_price, ts), (ask_price, ts))`, using `E` (event time) for both
/// sides if present, else local receive time.
fn parse_book_ticker(text: &str) -> Option<(Option<(f64, i64)>, Option<(f64, i64)>, i64)> {
    let v: serde_json::Value = serde_json::from_str(text).ok()?;
    let event_time = v.get("E").and_then(|e| e.as_i64()).unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    let bid = v.get("b").and_then(coerce_f64).map(|p| (p, event_time));
    let ask = v.get("a").and_then(coerce_f64).map(|p| (p, event_time));

    if bid.is_none() && ask.is_none() {
        return None;
    }
    Some((bid, ask, event_time))
}

fn coerce_f64(v: &serde_json::Value) -> Option<f64> {
    v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: a bookTicker frame with string-encoded bid/ask prices.
    /// Expected: both sides parse, and the event time `E` is used as the timestamp for each.
    #[test]
    fn test_parse_book_ticker_basic() {
        let text = r#"{"u":1,"s":"BTCUSDT","b":"60000.10","B":"1.0","a":"60000.50","A":"2.0","E":1000}"#;
        let (bid, ask, t) = parse_book_ticker(text).unwrap();
        assert_eq!(bid, Some((60000.10, 1000)));
        assert_eq!(ask, Some((60000.50, 1000)));
        assert_eq!(t, 1000);
    }

    /// Scenario: throttle gate across repeated prices and a single price change.
    /// Expected: identical prices are suppressed within the interval; any price change emits immediately.
    #[test]
    fn test_should_emit_throttle() {
        assert!(should_emit(None, i64::MIN, 100.0, 0, 100));
        assert!(!should_emit(Some(100.0), 0, 100.0, 50, 100));
        assert!(should_emit(Some(100.0), 0, 100.0, 150, 100));
        assert!(should_emit(Some(100.0), 0, 100.5, 10, 100));
    }

    /// Scenario: a malformed frame with neither `b` nor `a` present.
    /// Expected: parse returns None rather than a sample with garbage prices.
    #[test]
    fn test_parse_book_ticker_missing_sides() {
        let text = r#"{"u":1,"s":"BTCUSDT","E":1000}"#;
        assert!(parse_book_ticker(text).is_none());
    }
}
