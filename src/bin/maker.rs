//! Maker-Ladder Controller: quotes a passive ladder around the binary
//! market's best bid/ask, guarded against CEX spikes, reconciling on every
//! book/CEX/window event plus a safety timer.
//!
//! Usage:
//!   maker [OPTIONS]   (all tuning comes from env vars, see MakerConfig)

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use polymarket_lag::config::{FeedConfig, MakerConfig};
use polymarket_lag::feeds;
use polymarket_lag::health::HealthSurface;
use polymarket_lag::maker::gateway::OrderGateway;
use polymarket_lag::maker::ladder::{self, MakerEvent};
use polymarket_lag::market::discovery;
use polymarket_lag::types::{Sample, Side, Source, Window};

const HEALTH_LOG_INTERVAL_MS: i64 = 10_000;
const STALE_AFTER_MS: i64 = 15_000;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let feed_config = FeedConfig::from_env();
    let maker_config = MakerConfig::from_env();

    if let Err(e) = maker_config.require_credentials() {
        eprintln!("[MAKER] refusing to start: {e}");
        std::process::exit(1);
    }

    eprintln!("╔══════════════════════════════════════════════════╗");
    eprintln!("║  Maker-Ladder Controller — asset={}", feed_config.asset);
    eprintln!("║  dry_run={} levels={} tick={}", maker_config.dry_run, maker_config.levels, maker_config.tick);
    eprintln!("╚══════════════════════════════════════════════════╝");

    let http = reqwest::Client::new();
    let gateway = OrderGateway::new(&maker_config);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            eprintln!("[MAKER] ctrl-c received, shutting down");
            shutdown.cancel();
        });
    }

    let (sample_tx, mut sample_rx) = mpsc::channel::<Sample>(4096);
    let (command_tx, command_rx) = mpsc::channel::<feeds::market_book::FeedCommand>(16);
    let (event_tx, event_rx) = mpsc::channel::<MakerEvent>(4096);

    let cex_symbol = format!("{}USDT", feed_config.asset.to_uppercase());
    let cex_handle = tokio::spawn(feeds::cex::run(
        sample_tx.clone(),
        cex_symbol,
        feed_config.cex_ws.clone(),
        feed_config.cex_ws_fallback.clone(),
        feed_config.cex_sample_interval_ms,
    ));
    let market_handle = tokio::spawn(feeds::market_book::run(sample_tx.clone(), command_rx, feed_config.market_ws.clone()));
    drop(sample_tx);

    let ladder_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(ladder::run(event_rx, gateway, maker_config.clone(), shutdown))
    };

    // Translates raw Samples from the live feeds into the ladder's MakerEvents.
    let window_event_tx = event_tx.clone();
    let translate_handle = tokio::spawn(async move {
        while let Some(sample) = sample_rx.recv().await {
            let ev = match (sample.source, sample.side) {
                (Source::CexBook, Side::Bid) => Some(MakerEvent::Cex { price: sample.price, ts: sample.observed_at }),
                (Source::MarketBook, Side::Bid) | (Source::MarketBook, Side::Ask) => sample.asset_id.clone().map(|asset_id| MakerEvent::Book {
                    asset_id,
                    side: sample.side,
                    price: sample.price,
                    ts: sample.observed_at,
                }),
                _ => None,
            };
            if let Some(ev) = ev {
                if event_tx.send(ev).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut health = HealthSurface::new(&["cex", "market_book", "discovery", "ladder"]);
    health.mark_spawned("cex");
    health.mark_spawned("market_book");
    health.mark_spawned("ladder");
    let mut health_timer = tokio::time::interval(tokio::time::Duration::from_millis(HEALTH_LOG_INTERVAL_MS as u64));

    let mut discovery_timer = tokio::time::interval(tokio::time::Duration::from_secs(feed_config.discovery_interval_secs as u64));
    let mut current_window: Option<Window> = None;

    let mut cex_done = false;
    let mut market_done = false;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                eprintln!("[MAKER] shutting down feed clients");
                cex_handle.abort();
                market_handle.abort();
                translate_handle.abort();
                let _ = ladder_handle.await;
                break;
            }

            res = &mut cex_handle, if !cex_done => {
                cex_done = true;
                health.record_error("cex", format!("feed task exited: {res:?}"));
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
                            eprintln!("[MAKER] window rollover: {}", window.slug);
                            let _ = command_tx.send(feeds::market_book::FeedCommand::Subscribe(window.up_token_id.clone())).await;
                            if maker_config.quote_both_assets {
                                let _ = command_tx.send(feeds::market_book::FeedCommand::Subscribe(window.down_token_id.clone())).await;
                            }
                            if let Some(old) = &current_window {
                                let _ = command_tx.send(feeds::market_book::FeedCommand::Unsubscribe(old.up_token_id.clone())).await;
                                let _ = command_tx.send(feeds::market_book::FeedCommand::Unsubscribe(old.down_token_id.clone())).await;
                            }
                            let _ = window_event_tx.send(MakerEvent::WindowChanged(window.clone())).await;
                            current_window = Some(window);
                        }
                    }
                    Err(e) => {
                        eprintln!("[MAKER] discovery failed: {e}");
                        health.record_error("discovery", e);
                    }
                }
            }
        }
    }

    eprintln!("[MAKER] stopped");
}
