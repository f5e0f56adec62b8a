use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::types::{Sample, Side, Source};

/// Pure producer: subscribes to the oracle reference push channel and
/// emits `Sample(Oracle)` for each update frame. Responds to server PING
/// text frames with PONG; also sends its own PING every 5s as keepalive.
pub async fn run(feed_tx: mpsc::Sender<Sample>, symbol: String, ws_url: String, topic: String, oracle_symbol: String) {
    let mut backoff_ms: u64 = 500;
    const BACKOFF_CAP_MS: u64 = 30_000;
    const MAX_ATTEMPTS: u32 = 50;
    let mut attempts: u32 = 0;

    loop {
        if attempts >= MAX_ATTEMPTS {
            eprintln!("[ORACLE_AGG] reconnect attempts exhausted ({}), giving up", attempts);
            return;
        }
        attempts += 1;

        eprintln!("[ORACLE_AGG] connecting to {}", ws_url);
        let ws = match connect_async(&ws_url).await {
            Ok((ws, _)) => {
                eprintln!("[ORACLE_AGG] connected");
                backoff_ms = 500;
                attempts = 0;
                ws
            }
            Err(e) => {
                eprintln!("[ORACLE_AGG] connect failed: {}, retrying in {}ms", e, backoff_ms);
                tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(BACKOFF_CAP_MS);
                continue;
            }
        };

        let (mut write, mut read) = ws.split();

        let filters = format!("{{\"symbol\":\"{}\"}}", oracle_symbol);
        let sub = serde_json::json!({
            "action": "subscribe",
            "subscriptions": [{ "topic": topic, "type": "*", "filters": filters }],
        });
        if let Err(e) = write.send(Message::Text(sub.to_string())).await {
            eprintln!("[ORACLE_AGG] subscribe failed: {}, reconnecting", e);
            continue;
        }
        eprintln!("[ORACLE_AGG] subscribed to topic={} symbol={}", topic, oracle_symbol);

        let mut ping_interval = tokio::time::interval(tokio::time::Duration::from_secs(5));

        'conn: loop {
            tokio::select! {
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => {
                            eprintln!("[ORACLE_AGG] ws error: {}, reconnecting", e);
                            break 'conn;
                        }
                        None => {
                            eprintln!("[ORACLE_AGG] stream ended, reconnecting");
                            break 'conn;
                        }
                    };

                    match msg {
                        Message::Text(text) if text.trim() == "PING" => {
                            let _ = write.send(Message::Text("PONG".to_string())).await;
                        }
                        Message::Text(text) if text.trim() == "PONG" => {}
                        Message::Text(text) => {
                            if let Some(sample) = parse_update(&text, &symbol) {
                                if feed_tx.send(sample).await.is_err() {
                                    eprintln!("[ORACLE_AGG] channel closed, exiting");
                                    return;
                                }
                            }
                        }
                        _ => {}
                    }
                }

                _ = ping_interval.tick() => {
                    let _ = write.send(Message::Text("PING".to_string())).await;
                }
            }
        }

        eprintln!("[ORACLE_AGG] disconnected, reconnecting in {}ms", backoff_ms);
        tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(BACKOFF_CAP_MS);
    }
}

/// Parses `{symbol, value, payload_timestamp, message_timestamp}`. Uses
/// `message_timestamp` as `observed_at`, per the protocol spec.
fn parse_update(text: &str, symbol: &str) -> Option<Sample> {
    let v: serde_json::Value = serde_json::from_str(text).ok()?;
    let value = v.get("value").and_then(coerce_f64)?;
    let ts = v.get("message_timestamp").and_then(coerce_i64)?;
    Sample::new_checked(Source::OracleAggregator, symbol, Side::Oracle, value, ts)
}

fn coerce_f64(v: &serde_json::Value) -> Option<f64> {
    v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_f64())
}

fn coerce_i64(v: &serde_json::Value) -> Option<i64> {
    v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_i64())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: a well-formed update frame with numeric value and message timestamp.
    /// Expected: parses into an Oracle sample using message_timestamp as observed_at.
    #[test]
    fn test_parse_update_basic() {
        let text = r#"{"symbol":"btcusd","value":60123.45,"payload_timestamp":999,"message_timestamp":1005}"#;
        let sample = parse_update(text, "BTCUSD").unwrap();
        assert_eq!(sample.price, 60123.45);
        assert_eq!(sample.observed_at, 1005);
    }

    /// Scenario: an update frame missing `message_timestamp`.
    /// Expected: parse returns None rather than fabricating a receive-time fallback.
    #[test]
    fn test_parse_update_missing_timestamp() {
        let text = r#"{"symbol":"btcusd","value":60123.45}"#;
        assert!(parse_update(text, "BTCUSD").is_none());
    }
}
