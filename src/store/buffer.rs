use tokio::sync::mpsc;

use crate::config::BufferConfig;
use crate::store::sample_store::SampleStore;
use crate::types::Sample;

/// The sole writer to SampleStore. Coalesces writes from multiple
/// FeedClients and flushes in size- or time-triggered batches. Pure
/// producer/consumer task: owns the store, owns the receiver, shares
/// nothing.
pub async fn run(
    mut sample_rx: mpsc::Receiver<Sample>,
    mut store: SampleStore,
    config: BufferConfig,
    mut shutdown: tokio_util::sync::CancellationToken,
) {
    let mut batch: Vec<Sample> = Vec::with_capacity(config.max_buffer);
    let mut flush_timer = tokio::time::interval(tokio::time::Duration::from_millis(config.flush_interval_ms));
    flush_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut dropped_batches: u64 = 0;
    let mut total_inserted: u64 = 0;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                flush(&mut store, &mut batch, &mut dropped_batches, &mut total_inserted);
                eprintln!("[BUFFER] shutdown: final flush done, inserted={} dropped_batches={}", total_inserted, dropped_batches);
                return;
            }

            maybe = sample_rx.recv() => {
                match maybe {
                    Some(sample) => {
                        batch.push(sample);
                        if batch.len() >= config.max_buffer {
                            flush(&mut store, &mut batch, &mut dropped_batches, &mut total_inserted);
                        }
                    }
                    None => {
                        flush(&mut store, &mut batch, &mut dropped_batches, &mut total_inserted);
                        eprintln!("[BUFFER] channel closed, inserted={} dropped_batches={}", total_inserted, dropped_batches);
                        return;
                    }
                }
            }

            _ = flush_timer.tick() => {
                if !batch.is_empty() {
                    flush(&mut store, &mut batch, &mut dropped_batches, &mut total_inserted);
                }
            }
        }
    }
}

/// A flush is a single bulk insert; on failure the batch is dropped
/// (logged, counted), not requeued, to bound memory.
fn flush(store: &mut SampleStore, batch: &mut Vec<Sample>, dropped_batches: &mut u64, total_inserted: &mut u64) {
    if batch.is_empty() {
        return;
    }
    match store.insert_many(batch) {
        Ok(n) => {
            *total_inserted += n as u64;
        }
        Err(e) => {
            *dropped_batches += 1;
            eprintln!("[BUFFER] flush failed ({} samples dropped): {}", batch.len(), e);
        }
    }
    batch.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Side, Source};

    /// Scenario: `max_buffer` samples arrive back to back with a long flush interval.
    /// Expected: the buffer flushes as soon as size hits the threshold, not waiting for the timer.
    #[tokio::test]
    async fn test_flush_on_size_threshold() {
        let store = SampleStore::open_in_memory().unwrap();
        let (tx, rx) = mpsc::channel(64);
        let config = BufferConfig { flush_interval_ms: 60_000, max_buffer: 3 };
        let token = tokio_util::sync::CancellationToken::new();
        let token2 = token.clone();

        let handle = tokio::spawn(run(rx, store, config, token2));

        for i in 0..3 {
            let s = Sample::new_checked(Source::CexBook, "BTCUSDT", Side::Bid, 60000.0 + i as f64, 100 + i).unwrap();
            tx.send(s).await.unwrap();
        }

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        token.cancel();
        handle.await.unwrap();
    }
}
