//! Multi-Feed Recorder: discovers the active window, anchors its Baseline,
//! and joins four live feeds into one SampleStore.
//!
//! Usage:
//!   recorder [OPTIONS]
//!     --db <path>   SQLite store path (default: "recorder.db")

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use polymarket_lag::config::{BufferConfig, FeedConfig};
use polymarket_lag::feeds;
use polymarket_lag::health::HealthSurface;
use polymarket_lag::market::{baseline, discovery};
use polymarket_lag::store::{self, SampleStore};
use polymarket_lag::types::{Sample, Window};

const HEALTH_LOG_INTERVAL_MS: i64 = 10_000;
const STALE_AFTER_MS: i64 = 15_000;

struct Args {
    db_path: String,
}

impl Args {
    fn from_cli() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut a = Args { db_path: "recorder.db".to_string() };
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--db" => {
                    i += 1;
                    a.db_path = args[i].clone();
                }
                "--help" | "-h" => {
                    eprintln!("Usage: recorder [--db <path>]");
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown arg: {other}");
                    std::process::exit(1);
                }
            }
            i += 1;
        }
        a
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let args = Args::from_cli();

    let feed_config = FeedConfig::from_env();
    let buffer_config = BufferConfig::from_env();
    let http = reqwest::Client::new();

    eprintln!("╔══════════════════════════════════════════════════╗");
    eprintln!("║  Multi-Feed Recorder — asset={}", feed_config.asset);
    eprintln!("║  store: {}", args.db_path);
    eprintln!("╚══════════════════════════════════════════════════╝");

    let store = match SampleStore::open(&args.db_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[RECORDER] failed to open store {}: {e}", args.db_path);
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            eprintln!("[RECORDER] ctrl-c received, shutting down");
            shutdown.cancel();
        });
    }

    let (sample_tx, sample_rx) = mpsc::channel::<Sample>(4096);
    let (command_tx, command_rx) = mpsc::channel::<feeds::market_book::FeedCommand>(16);

    let buffer_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(store::buffer::run(sample_rx, store, buffer_config, shutdown))
    };

    let cex_symbol = format!("{}USDT", feed_config.asset.to_uppercase());

    let cex_handle = tokio::spawn(feeds::cex::run(
        sample_tx.clone(),
        cex_symbol.clone(),
        feed_config.cex_ws.clone(),
        feed_config.cex_ws_fallback.clone(),
        feed_config.cex_sample_interval_ms,
    ));

    // Both oracle variants carry the same Chainlink reference price and
    // are merged downstream by symbol — share one label between them.
    let oracle_log_handle = tokio::spawn(feeds::oracle_log::run(
        sample_tx.clone(),
        feed_config.oracle_aggregator_symbol.clone(),
        feed_config.oracle_log_rpc_ws.clone(),
        feed_config.oracle_log_aggregator_address.clone(),
        feed_config.oracle_log_poll_ms,
        feed_config.oracle_log_decimals,
    ));

    let oracle_aggregator_handle = tokio::spawn(feeds::oracle_aggregator::run(
        sample_tx.clone(),
        feed_config.oracle_aggregator_symbol.clone(),
        feed_config.oracle_aggregator_ws.clone(),
        feed_config.oracle_aggregator_topic.clone(),
        feed_config.oracle_aggregator_symbol.clone(),
    ));

    let market_handle = tokio::spawn(feeds::market_book::run(sample_tx.clone(), command_rx, feed_config.market_ws.clone()));

    drop(sample_tx);

    let mut health = HealthSurface::new(&["cex", "oracle_log", "oracle_aggregator", "market_book", "discovery"]);
    for name in ["cex", "oracle_log", "oracle_aggregator", "market_book"] {
        health.mark_spawned(name);
    }
    let mut health_timer = tokio::time::interval(tokio::time::Duration::from_millis(HEALTH_LOG_INTERVAL_MS as u64));

    let mut current_window: Option<Window> = None;
    let mut discovery_timer = tokio::time::interval(tokio::time::Duration::from_secs(feed_config.discovery_interval_secs as u64));

    // Second handle purely for baseline reads/writes, open against the
    // same file as the buffer task's writer connection. A baseline insert
    // racing the flusher's open transaction hits SQLITE_BUSY; SampleStore
    // sets a busy_timeout on open so this connection blocks and retries
    // instead of failing the write outright.
    let mut baseline_store = match SampleStore::open(&args.db_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[RECORDER] failed to open baseline store handle: {e}");
            std::process::exit(1);
        }
    };

    let mut cex_done = false;
    let mut oracle_log_done = false;
    let mut oracle_aggregator_done = false;
    let mut market_done = false;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                eprintln!("[RECORDER] shutting down feed clients");
                cex_handle.abort();
                oracle_log_handle.abort();
                oracle_aggregator_handle.abort();
                market_handle.abort();
                let _ = buffer_handle.await;
                break;
            }

            // Every feed task loops forever on its own reconnect backoff;
            // it only returns after exhausting its reconnect budget. Treat
            // that as a subsystem failure rather than a clean exit.
            res = &mut cex_handle, if !cex_done => {
                cex_done = true;
                health.record_error("cex", format!("feed task exited: {res:?}"));
            }
            res = &mut oracle_log_handle, if !oracle_log_done => {
                oracle_log_done = true;
                health.record_error("oracle_log", format!("feed task exited: {res:?}"));
            }
            res = &mut oracle_aggregator_handle, if !oracle_aggregator_done => {
                oracle_aggregator_done = true;
                health.record_error("oracle_aggregator", format!("feed task exited: {res:?}"));
            }
            res = &mut market_handle, if !market_done => {
                market_done = true;
                health.record_error("market_book", format!("feed task exited: {res:?}"));
            }

            _ = health_timer.tick() => {
                health.log(chrono::Utc::now().timestamp_millis(), STALE_AFTER_MS);
            }

            _ = discovery_timer.tick() => {
                match discovery::discover_current_window(&http, &feed_config).await {
                    Ok(window) => {
                        health.record_tick("discovery", chrono::Utc::now().timestamp_millis());
                        if current_window.as_ref().map(|w| w.slug != window.slug).unwrap_or(true) {
                            eprintln!("[RECORDER] window rollover: {}", window.slug);
                            let _ = command_tx.send(feeds::market_book::FeedCommand::Subscribe(window.up_token_id.clone())).await;
                            let _ = command_tx.send(feeds::market_book::FeedCommand::Subscribe(window.down_token_id.clone())).await;
                            if let Some(old) = &current_window {
                                let _ = command_tx.send(feeds::market_book::FeedCommand::Unsubscribe(old.up_token_id.clone())).await;
                                let _ = command_tx.send(feeds::market_book::FeedCommand::Unsubscribe(old.down_token_id.clone())).await;
                            }
                            current_window = Some(window);
                        }
                        if let Some(w) = &current_window {
                            match baseline::anchor_baseline(&mut baseline_store, w, &feed_config.oracle_aggregator_symbol) {
                                Ok(true) => eprintln!("[RECORDER] baseline anchored for {}", w.slug),
                                Ok(false) => {}
                                Err(e) => health.record_error("discovery", e),
                            }
                        }
                    }
                    Err(e) => {
                        eprintln!("[RECORDER] discovery failed: {e}");
                        health.record_error("discovery", e);
                    }
                }
            }
        }
    }

    eprintln!("[RECORDER] stopped");
}
