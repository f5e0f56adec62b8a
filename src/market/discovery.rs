use crate::config::FeedConfig;
use crate::error::DiscoveryError;
use crate::types::Window;

/// Probes the venue's market catalog to resolve the active 15-minute
/// window. Strategy: compute candidate window starts `base + i*15min` for
/// `i in {-1,0,1,2,3}` where `base` is the nearest 15-minute boundary <=
/// now; query each candidate slug; return the first that parses into a
/// complete Window.
pub async fn discover_current_window(client: &reqwest::Client, config: &FeedConfig) -> Result<Window, DiscoveryError> {
    const WINDOW_SECS: i64 = 900;
    let now_s = chrono::Utc::now().timestamp();
    let base = (now_s / WINDOW_SECS) * WINDOW_SECS;

    for i in -1..=3i64 {
        let window_start = base + i * WINDOW_SECS;
        let slug = format!("{}{}", config.slug_prefix, window_start);
        eprintln!("[DISCOVERY] trying slug: {}", slug);

        match fetch_event_by_slug(client, &config.gamma_api_url, &slug, WINDOW_SECS * 1000).await {
            Ok(Some(window)) => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                if window.end < now_ms {
                    eprintln!("[DISCOVERY] {} already ended, skipping", window.slug);
                    continue;
                }
                eprintln!(
                    "[DISCOVERY] found: {} start={} end={} up={}.. down={}..",
                    window.slug,
                    window.start,
                    window.end,
                    &window.up_token_id[..8.min(window.up_token_id.len())],
                    &window.down_token_id[..8.min(window.down_token_id.len())],
                );
                return Ok(window);
            }
            Ok(None) => {
                eprintln!("[DISCOVERY] slug {} not found", slug);
            }
            Err(e) => {
                eprintln!("[DISCOVERY] error fetching {}: {}", slug, e);
            }
        }
    }

    eprintln!("[DISCOVERY] slug sweep failed, falling back to series_id={}", config.series_id);
    discover_via_series(client, config).await
}

async fn fetch_event_by_slug(client: &reqwest::Client, gamma_api_url: &str, slug: &str, window_ms: i64) -> Result<Option<Window>, DiscoveryError> {
    let url = format!("{}/events?slug={}", gamma_api_url, slug);
    let text = client.get(&url).send().await?.text().await?;
    let events: serde_json::Value = serde_json::from_str(&text)?;

    let events_arr = match events.as_array() {
        Some(arr) if !arr.is_empty() => arr,
        _ => return Ok(None),
    };

    parse_event_to_window(&events_arr[0], slug, window_ms)
}

fn parse_event_to_window(event: &serde_json::Value, slug: &str, window_ms: i64) -> Result<Option<Window>, DiscoveryError> {
    let markets = match event.get("markets").and_then(|m| m.as_array()) {
        Some(m) if !m.is_empty() => m,
        _ => return Ok(None),
    };

    let condition_id = event
        .get("conditionId")
        .or_else(|| markets[0].get("conditionId"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    let end_date = event.get("endDate").and_then(|s| s.as_str()).unwrap_or("");
    let end_ms = parse_datetime_ms(end_date).unwrap_or(0);

    let start_ms = slug
        .rsplit('-')
        .next()
        .and_then(|s| s.parse::<i64>().ok())
        .map(|ts| if ts > 1_000_000_000_000 { ts } else { ts * 1000 })
        .filter(|&ts| ts > 0)
        .unwrap_or_else(|| if end_ms > 0 { end_ms - window_ms } else { 0 });

    if start_ms == 0 || end_ms == 0 || condition_id.is_empty() {
        return Ok(None);
    }

    let (up_token, down_token) = extract_token_ids(markets);
    if up_token.is_empty() || down_token.is_empty() {
        eprintln!("[DISCOVERY] skipping {} — can't find UP/DOWN tokens", slug);
        return Ok(None);
    }

    Ok(Some(Window {
        condition_id,
        slug: slug.to_string(),
        up_token_id: up_token,
        down_token_id: down_token,
        start: start_ms,
        end: end_ms,
    }))
}

/// Handles both the 2-market format (separate UP/DOWN markets) and the
/// 1-market format with JSON-array-encoded outcomes/clobTokenIds.
fn extract_token_ids(markets: &[serde_json::Value]) -> (String, String) {
    let mut up_token = String::new();
    let mut down_token = String::new();

    if markets.len() == 2 {
        for market in markets {
            let outcome = market
                .get("groupItemTitle")
                .or_else(|| market.get("outcome"))
                .and_then(|o| o.as_str())
                .unwrap_or("")
                .to_lowercase();
            let token_id = extract_first_token_id(market);

            if outcome.contains("up") || outcome.contains("yes") || outcome.contains("higher") {
                up_token = token_id;
            } else if outcome.contains("down") || outcome.contains("no") || outcome.contains("lower") {
                down_token = token_id;
            }
        }
    }

    if up_token.is_empty() || down_token.is_empty() {
        for market in markets {
            let outcomes_str = market.get("outcomes").and_then(|o| o.as_str()).unwrap_or("");
            let tokens_str = market.get("clobTokenIds").and_then(|t| t.as_str()).unwrap_or("");

            if let (Ok(outcomes), Ok(tokens)) = (
                serde_json::from_str::<Vec<String>>(outcomes_str),
                serde_json::from_str::<Vec<String>>(tokens_str),
            ) {
                for (outcome, token) in outcomes.iter().zip(tokens.iter()) {
                    let lower = outcome.to_lowercase();
                    if lower.contains("up") || lower.contains("yes") || lower.contains("higher") {
                        up_token = token.clone();
                    } else if lower.contains("down") || lower.contains("no") || lower.contains("lower") {
                        down_token = token.clone();
                    }
                }
            }
        }
    }

    (up_token, down_token)
}

fn extract_first_token_id(market: &serde_json::Value) -> String {
    let Some(raw) = market.get("clobTokenIds") else {
        return String::new();
    };
    if let Some(s) = raw.as_str() {
        if s.starts_with('[') {
            if let Ok(tokens) = serde_json::from_str::<Vec<String>>(s) {
                return tokens.into_iter().next().unwrap_or_default();
            }
        }
        return s.to_string();
    }
    if let Some(arr) = raw.as_array() {
        return arr.first().and_then(|v| v.as_str()).unwrap_or("").to_string();
    }
    String::new()
}

/// Fallback discovery: search by series_id for markets Gamma hasn't yet
/// exposed under the expected slug shape.
async fn discover_via_series(client: &reqwest::Client, config: &FeedConfig) -> Result<Window, DiscoveryError> {
    let url = format!(
        "{}/events?series_id={}&active=true&closed=false&limit=100&order=endDate&ascending=false",
        config.gamma_api_url, config.series_id,
    );
    eprintln!("[DISCOVERY] fetching {}", url);

    let text = client.get(&url).send().await?.text().await?;
    let events: serde_json::Value = serde_json::from_str(&text)?;
    let events_arr = events.as_array().cloned().unwrap_or_default();

    let now_ms = chrono::Utc::now().timestamp_millis();
    let mut best: Option<Window> = None;
    let mut best_start = i64::MAX;

    for event in &events_arr {
        let slug = event.get("slug").and_then(|s| s.as_str()).unwrap_or("");
        if let Ok(Some(window)) = parse_event_to_window(event, slug, 900_000) {
            if window.end >= now_ms && window.start < best_start {
                best_start = window.start;
                best = Some(window);
            }
        }
    }

    best.ok_or_else(|| DiscoveryError::NoActiveMarket {
        series_id: config.series_id.clone(),
    })
}

fn parse_datetime_ms(s: &str) -> Option<i64> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ") {
        return Some(dt.and_utc().timestamp_millis());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ") {
        return Some(dt.and_utc().timestamp_millis());
    }
    if let Ok(ts) = s.parse::<i64>() {
        return Some(if ts > 1_000_000_000_000 { ts } else { ts * 1000 });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: extracting UP/DOWN token ids from the 2-market groupItemTitle format.
    /// Expected: tokens map to the right side regardless of array order.
    #[test]
    fn test_extract_token_ids_two_market_format() {
        let markets = serde_json::json!([
            {"groupItemTitle": "Down", "clobTokenIds": "[\"tok_down\"]"},
            {"groupItemTitle": "Up", "clobTokenIds": "[\"tok_up\"]"},
        ]);
        let markets_arr = markets.as_array().unwrap();
        let (up, down) = extract_token_ids(markets_arr);
        assert_eq!(up, "tok_up");
        assert_eq!(down, "tok_down");
    }

    /// Scenario: single-market format with JSON-array-encoded outcomes/clobTokenIds strings.
    /// Expected: tokens map to the right side by zipped index.
    #[test]
    fn test_extract_token_ids_single_market_format() {
        let markets = serde_json::json!([
            {"outcomes": "[\"Up\",\"Down\"]", "clobTokenIds": "[\"tok_up\",\"tok_down\"]"},
        ]);
        let markets_arr = markets.as_array().unwrap();
        let (up, down) = extract_token_ids(markets_arr);
        assert_eq!(up, "tok_up");
        assert_eq!(down, "tok_down");
    }
}
