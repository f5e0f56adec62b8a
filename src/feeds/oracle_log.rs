use alloy::primitives::{Address, I256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use alloy::sol;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::types::{Sample, Side, Source};

sol! {
    #[sol(rpc)]
    interface AggregatorV3Interface {
        function latestRoundData() external view returns (
            uint80 roundId,
            int256 answer,
            uint256 startedAt,
            uint256 updatedAt,
            uint80 answeredInRound
        );
    }
}

/// Pure producer: subscribes to contract logs for the Chainlink aggregator
/// and, on any log, reads `latestRoundData()`. Also polls on a safety timer
/// (`poll_ms`) in case the log subscription misses an update. Emits
/// `Sample(Oracle)` only when roundId or the decoded answer changes vs. the
/// last emission.
pub async fn run(feed_tx: mpsc::Sender<Sample>, symbol: String, rpc_ws_url: String, aggregator_address: String, poll_ms: u64, decimals: u32) {
    let Ok(address) = aggregator_address.parse::<Address>() else {
        eprintln!("[ORACLE_LOG] invalid aggregator address: {}", aggregator_address);
        return;
    };

    let mut backoff_ms: u64 = 500;
    const BACKOFF_CAP_MS: u64 = 30_000;
    const MAX_ATTEMPTS: u32 = 50;
    let mut attempts: u32 = 0;

    let mut last_round_id: Option<u128> = None;
    let mut last_answer: Option<i128> = None;

    loop {
        if attempts >= MAX_ATTEMPTS {
            eprintln!("[ORACLE_LOG] reconnect attempts exhausted ({}), giving up", attempts);
            return;
        }
        attempts += 1;

        eprintln!("[ORACLE_LOG] connecting to {}", rpc_ws_url);
        let provider = match ProviderBuilder::new().connect(&rpc_ws_url).await {
            Ok(p) => {
                eprintln!("[ORACLE_LOG] connected");
                backoff_ms = 500;
                attempts = 0;
                p
            }
            Err(e) => {
                eprintln!("[ORACLE_LOG] connect failed: {}, retrying in {}ms", e, backoff_ms);
                tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(BACKOFF_CAP_MS);
                continue;
            }
        };

        let contract = AggregatorV3Interface::new(address, provider.clone());

        let filter = Filter::new().address(address);
        let sub = match provider.subscribe_logs(&filter).await {
            Ok(s) => s,
            Err(e) => {
                eprintln!("[ORACLE_LOG] log subscription failed: {}, falling back to poll-only", e);
                poll_loop(&feed_tx, &contract, &symbol, poll_ms, decimals, &mut last_round_id, &mut last_answer).await;
                continue;
            }
        };
        let mut log_stream = sub.into_stream();
        let mut poll_timer = tokio::time::interval(tokio::time::Duration::from_millis(poll_ms));
        poll_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                log = log_stream.next() => {
                    match log {
                        Some(_log) => {
                            if !read_and_maybe_emit(&feed_tx, &contract, &symbol, decimals, &mut last_round_id, &mut last_answer).await {
                                return;
                            }
                        }
                        None => {
                            eprintln!("[ORACLE_LOG] log stream ended, reconnecting");
                            break;
                        }
                    }
                }
                _ = poll_timer.tick() => {
                    if !read_and_maybe_emit(&feed_tx, &contract, &symbol, decimals, &mut last_round_id, &mut last_answer).await {
                        return;
                    }
                }
            }
        }

        eprintln!("[ORACLE_LOG] disconnected, reconnecting in {}ms", backoff_ms);
        tokio::time::sleep(tokio::time::Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(BACKOFF_CAP_MS);
    }
}

/// Poll-only fallback loop, used when the node doesn't support
/// `eth_subscribe("logs", ...)`. Runs until the channel closes or the
/// provider starts erroring, at which point the caller reconnects.
async fn poll_loop<P: Provider + Clone>(
    feed_tx: &mpsc::Sender<Sample>,
    contract: &AggregatorV3Interface::AggregatorV3InterfaceInstance<P>,
    symbol: &str,
    poll_ms: u64,
    decimals: u32,
    last_round_id: &mut Option<u128>,
    last_answer: &mut Option<i128>,
) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(poll_ms));
    loop {
        interval.tick().await;
        if !read_and_maybe_emit(feed_tx, contract, symbol, decimals, last_round_id, last_answer).await {
            return;
        }
        // Bail back to the reconnect loop after a handful of polls so we
        // periodically retry the log subscription.
    }
}

async fn read_and_maybe_emit<P: Provider + Clone>(
    feed_tx: &mpsc::Sender<Sample>,
    contract: &AggregatorV3Interface::AggregatorV3InterfaceInstance<P>,
    symbol: &str,
    decimals: u32,
    last_round_id: &mut Option<u128>,
    last_answer: &mut Option<i128>,
) -> bool {
    let result = contract.latestRoundData().call().await;
    let round = match result {
        Ok(r) => r,
        Err(e) => {
            eprintln!("[ORACLE_LOG] latestRoundData call failed: {}", e);
            return true;
        }
    };

    let round_id: u128 = round.roundId.to::<u128>();
    let answer: i128 = i256_to_i128(round.answer);
    let updated_at_secs: i64 = round.updatedAt.to::<u64>() as i64;

    let changed = *last_round_id != Some(round_id) || *last_answer != Some(answer);
    if !changed {
        return true;
    }
    *last_round_id = Some(round_id);
    *last_answer = Some(answer);

    let price = decode_price(answer, decimals);
    let observed_at = updated_at_secs * 1000;

    if let Some(s) = Sample::new_checked(Source::OracleLog, symbol, Side::Oracle, price, observed_at) {
        if feed_tx.send(s).await.is_err() {
            eprintln!("[ORACLE_LOG] channel closed, exiting");
            return false;
        }
    }
    true
}

/// Price = answer x 10^-decimals.
fn decode_price(answer: i128, decimals: u32) -> f64 {
    answer as f64 / 10f64.powi(decimals as i32)
}

fn i256_to_i128(v: I256) -> i128 {
    let bytes = v.to_be_bytes::<32>();
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&bytes[16..32]);
    i128::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: a Chainlink BTC/USD answer of 6_000_000_000_000 with 8 decimals.
    /// Expected: decoded price is 60000.0.
    #[test]
    fn test_decode_price() {
        let price = decode_price(6_000_000_000_000, 8);
        assert!((price - 60000.0).abs() < 1e-9);
    }

    /// Scenario: a negative answer (should not occur for a price feed, but the decode must not panic).
    /// Expected: the sign is preserved through the division.
    #[test]
    fn test_decode_price_negative() {
        let price = decode_price(-100_000_000, 8);
        assert!((price - (-1.0)).abs() < 1e-9);
    }
}
