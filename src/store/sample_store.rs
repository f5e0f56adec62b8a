use std::collections::HashMap;
use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::types::{Sample, ScanOrder, Side, Source};

/// Key identifying one (source, symbol, side) series for the out-of-order
/// watermark.
type SeriesKey = (String, String, String);

const DDL: &str = "
CREATE TABLE IF NOT EXISTS samples (
    source       TEXT NOT NULL,
    symbol       TEXT NOT NULL,
    side         TEXT NOT NULL,
    price        REAL NOT NULL,
    observed_at  INTEGER NOT NULL,
    condition_id TEXT,
    asset_id     TEXT,
    market_slug  TEXT,
    extra        TEXT,
    UNIQUE(source, symbol, side, observed_at)
);
CREATE INDEX IF NOT EXISTS idx_samples_ssso ON samples(source, symbol, side, observed_at);
CREATE INDEX IF NOT EXISTS idx_samples_cond  ON samples(condition_id, observed_at);
";

/// Append-only time-indexed storage keyed by (source, symbol, side,
/// observed_at). Single writer (SampleBuffer's flusher task); shared-read.
pub struct SampleStore {
    conn: Connection,
    /// Per-(source, symbol, side) watermark of the latest `observed_at`
    /// accepted so far, seeded from the table at open time. Enforces the
    /// data-model invariant that samples for the same key arrive
    /// non-decreasing in `observed_at`; anything older is dropped rather
    /// than inserted (a duplicate at the *same* timestamp still passes
    /// through and is coalesced by the uniqueness constraint).
    last_observed: HashMap<SeriesKey, i64>,
}

impl SampleStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_millis(5_000))?;
        conn.execute_batch(DDL)?;
        let last_observed = load_last_observed(&conn)?;
        Ok(Self { conn, last_observed })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(DDL)?;
        let last_observed = load_last_observed(&conn)?;
        Ok(Self { conn, last_observed })
    }

    /// Idempotent on the uniqueness key; duplicates are silently dropped.
    /// Samples older than the series' current watermark are dropped too
    /// (out-of-order, e.g. a replayed frame after a feed reconnect) —
    /// never inserted, never advancing the watermark. A single
    /// transaction wraps the whole batch; if the transaction fails the
    /// caller drops the batch rather than retrying (see SampleBuffer).
    pub fn insert_many(&mut self, samples: &[Sample]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0usize;
        let mut dropped_out_of_order = 0usize;
        let mut advanced: HashMap<SeriesKey, i64> = HashMap::new();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO samples
                 (source, symbol, side, price, observed_at, condition_id, asset_id, market_slug, extra)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for s in samples {
                let key: SeriesKey = (s.source.as_str().to_string(), s.symbol.clone(), s.side.as_str().to_string());
                let watermark = advanced.get(&key).copied().or_else(|| self.last_observed.get(&key).copied());
                if let Some(w) = watermark {
                    if s.observed_at < w {
                        dropped_out_of_order += 1;
                        continue;
                    }
                }

                let n = stmt.execute(params![
                    s.source.as_str(),
                    s.symbol,
                    s.side.as_str(),
                    s.price,
                    s.observed_at,
                    s.condition_id,
                    s.asset_id,
                    s.market_slug,
                    s.extra,
                ])?;
                inserted += n;
                let new_watermark = watermark.map(|w| w.max(s.observed_at)).unwrap_or(s.observed_at);
                advanced.insert(key, new_watermark);
            }
        }
        tx.commit()?;
        for (key, watermark) in advanced {
            let entry = self.last_observed.entry(key).or_insert(watermark);
            *entry = (*entry).max(watermark);
        }
        if dropped_out_of_order > 0 {
            eprintln!("[STORE] dropped {dropped_out_of_order} out-of-order sample(s)");
        }
        Ok(inserted)
    }

    pub fn scan(
        &self,
        source: Source,
        symbol: &str,
        side: Side,
        from: i64,
        to: i64,
        limit: usize,
        order: ScanOrder,
    ) -> Result<Vec<Sample>, StoreError> {
        let order_sql = match order {
            ScanOrder::Asc => "ASC",
            ScanOrder::Desc => "DESC",
        };
        let sql = format!(
            "SELECT source, symbol, side, price, observed_at, condition_id, asset_id, market_slug, extra
             FROM samples
             WHERE source = ?1 AND symbol = ?2 AND side = ?3 AND observed_at BETWEEN ?4 AND ?5
             ORDER BY observed_at {}
             LIMIT ?6",
            order_sql
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![source.as_str(), symbol, side.as_str(), from, to, limit as i64],
            row_to_sample,
        )?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn latest(&self, source: Source, symbol: &str, side: Side) -> Result<Option<Sample>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT source, symbol, side, price, observed_at, condition_id, asset_id, market_slug, extra
             FROM samples
             WHERE source = ?1 AND symbol = ?2 AND side = ?3
             ORDER BY observed_at DESC LIMIT 1",
        )?;
        Ok(stmt
            .query_row(params![source.as_str(), symbol, side.as_str()], row_to_sample)
            .optional()?)
    }

    pub fn nearest_before(
        &self,
        source: Source,
        symbol: &str,
        side: Side,
        t: i64,
    ) -> Result<Option<Sample>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT source, symbol, side, price, observed_at, condition_id, asset_id, market_slug, extra
             FROM samples
             WHERE source = ?1 AND symbol = ?2 AND side = ?3 AND observed_at <= ?4
             ORDER BY observed_at DESC LIMIT 1",
        )?;
        Ok(stmt
            .query_row(params![source.as_str(), symbol, side.as_str(), t], row_to_sample)
            .optional()?)
    }

    pub fn nearest_after(
        &self,
        source: Source,
        symbol: &str,
        side: Side,
        t: i64,
    ) -> Result<Option<Sample>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT source, symbol, side, price, observed_at, condition_id, asset_id, market_slug, extra
             FROM samples
             WHERE source = ?1 AND symbol = ?2 AND side = ?3 AND observed_at >= ?4
             ORDER BY observed_at ASC LIMIT 1",
        )?;
        Ok(stmt
            .query_row(params![source.as_str(), symbol, side.as_str(), t], row_to_sample)
            .optional()?)
    }

    /// Scan Baseline samples in a time range, used by the Analyzer to
    /// enumerate canonical windows. Baselines are stored with
    /// source=Baseline, side=Baseline, symbol = condition_id.
    pub fn scan_baselines(&self, from: i64, to: i64) -> Result<Vec<Sample>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT source, symbol, side, price, observed_at, condition_id, asset_id, market_slug, extra
             FROM samples
             WHERE source = 'baseline' AND observed_at BETWEEN ?1 AND ?2
             ORDER BY observed_at ASC",
        )?;
        let rows = stmt.query_map(params![from, to], row_to_sample)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

/// Seeds the in-memory out-of-order watermark from whatever is already on
/// disk, so a restarted recorder doesn't re-accept samples older than what
/// it already has for a series.
fn load_last_observed(conn: &Connection) -> Result<HashMap<SeriesKey, i64>, StoreError> {
    let mut stmt = conn.prepare("SELECT source, symbol, side, MAX(observed_at) FROM samples GROUP BY source, symbol, side")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            (row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?),
            row.get::<_, i64>(3)?,
        ))
    })?;
    let mut out = HashMap::new();
    for r in rows {
        let (key, max_ts) = r?;
        out.insert(key, max_ts);
    }
    Ok(out)
}

fn row_to_sample(row: &rusqlite::Row) -> rusqlite::Result<Sample> {
    let source_str: String = row.get(0)?;
    let side_str: String = row.get(2)?;
    Ok(Sample {
        source: Source::from_str(&source_str).unwrap_or(Source::CexBook),
        symbol: row.get(1)?,
        side: Side::from_str(&side_str).unwrap_or(Side::Bid),
        price: row.get(3)?,
        observed_at: row.get(4)?,
        condition_id: row.get(5)?,
        asset_id: row.get(6)?,
        market_slug: row.get(7)?,
        extra: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Source;

    fn sample(source: Source, symbol: &str, side: Side, price: f64, t: i64) -> Sample {
        Sample::new_checked(source, symbol, side, price, t).unwrap()
    }

    /// Scenario: inserting the same (source, symbol, side, observed_at) key twice.
    /// Expected: the second insert is coalesced; only one row exists and a scan returns it once.
    #[test]
    fn test_duplicate_insert_coalesced() {
        let mut store = SampleStore::open_in_memory().unwrap();
        let s1 = sample(Source::CexBook, "BTCUSDT", Side::Bid, 60000.0, 100);
        let s2 = sample(Source::CexBook, "BTCUSDT", Side::Bid, 60001.0, 100);
        store.insert_many(&[s1]).unwrap();
        store.insert_many(&[s2]).unwrap();
        let rows = store
            .scan(Source::CexBook, "BTCUSDT", Side::Bid, 0, 1000, 10, ScanOrder::Asc)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, 60000.0);
    }

    /// Data-model invariant: an out-of-order sample (earlier `observed_at`
    /// than what's already stored for the same source/symbol/side) must be
    /// dropped, not inserted — e.g. a replayed frame after a reconnect.
    #[test]
    fn test_out_of_order_sample_dropped() {
        let mut store = SampleStore::open_in_memory().unwrap();
        store
            .insert_many(&[sample(Source::CexBook, "BTCUSDT", Side::Bid, 60010.0, 300)])
            .unwrap();
        let inserted = store
            .insert_many(&[sample(Source::CexBook, "BTCUSDT", Side::Bid, 59990.0, 200)])
            .unwrap();
        assert_eq!(inserted, 0);

        let rows = store
            .scan(Source::CexBook, "BTCUSDT", Side::Bid, 0, 1000, 10, ScanOrder::Asc)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].observed_at, 300);
    }

    /// The watermark is per-(source, symbol, side): an out-of-order sample
    /// on one series must not affect acceptance on another.
    #[test]
    fn test_out_of_order_watermark_is_per_series() {
        let mut store = SampleStore::open_in_memory().unwrap();
        store
            .insert_many(&[sample(Source::CexBook, "BTCUSDT", Side::Bid, 60010.0, 300)])
            .unwrap();
        let inserted = store
            .insert_many(&[sample(Source::CexBook, "BTCUSDT", Side::Ask, 60020.0, 100)])
            .unwrap();
        assert_eq!(inserted, 1);
    }

    /// A sample at the same `observed_at` as the current watermark is a
    /// duplicate, not out-of-order — it still reaches the uniqueness
    /// constraint and coalesces rather than being silently dropped as
    /// "old".
    #[test]
    fn test_same_timestamp_as_watermark_still_attempts_insert() {
        let mut store = SampleStore::open_in_memory().unwrap();
        store
            .insert_many(&[sample(Source::CexBook, "BTCUSDT", Side::Bid, 60000.0, 300)])
            .unwrap();
        let inserted = store
            .insert_many(&[sample(Source::CexBook, "BTCUSDT", Side::Bid, 60001.0, 300)])
            .unwrap();
        assert_eq!(inserted, 0);
        let rows = store
            .scan(Source::CexBook, "BTCUSDT", Side::Bid, 0, 1000, 10, ScanOrder::Asc)
            .unwrap();
        assert_eq!(rows[0].price, 60000.0);
    }

    /// The watermark is seeded from disk at `open()` so a restarted store
    /// doesn't re-accept a sample older than what's already persisted.
    #[test]
    fn test_watermark_seeded_from_disk_on_reopen() {
        let dir = std::env::temp_dir().join(format!("sample_store_test_{}.sqlite", std::process::id()));
        let path = dir.to_str().unwrap().to_string();
        let _ = std::fs::remove_file(&path);

        {
            let mut store = SampleStore::open(&path).unwrap();
            store
                .insert_many(&[sample(Source::CexBook, "BTCUSDT", Side::Bid, 60010.0, 300)])
                .unwrap();
        }
        {
            let mut store = SampleStore::open(&path).unwrap();
            let inserted = store
                .insert_many(&[sample(Source::CexBook, "BTCUSDT", Side::Bid, 59990.0, 200)])
                .unwrap();
            assert_eq!(inserted, 0);
        }

        let _ = std::fs::remove_file(&path);
    }

    /// Scenario: nearest_before/nearest_after around a sparse set of timestamps.
    /// Expected: each probe returns the closest sample on the correct side, or None past the edges.
    #[test]
    fn test_nearest_before_after() {
        let mut store = SampleStore::open_in_memory().unwrap();
        let samples = vec![
            sample(Source::OracleLog, "BTCUSD", Side::Oracle, 60000.0, 100),
            sample(Source::OracleLog, "BTCUSD", Side::Oracle, 60010.0, 300),
            sample(Source::OracleLog, "BTCUSD", Side::Oracle, 60020.0, 500),
        ];
        store.insert_many(&samples).unwrap();

        let before = store
            .nearest_before(Source::OracleLog, "BTCUSD", Side::Oracle, 400)
            .unwrap()
            .unwrap();
        assert_eq!(before.observed_at, 300);

        let after = store
            .nearest_after(Source::OracleLog, "BTCUSD", Side::Oracle, 400)
            .unwrap()
            .unwrap();
        assert_eq!(after.observed_at, 500);

        assert!(store
            .nearest_before(Source::OracleLog, "BTCUSD", Side::Oracle, 50)
            .unwrap()
            .is_none());
        assert!(store
            .nearest_after(Source::OracleLog, "BTCUSD", Side::Oracle, 600)
            .unwrap()
            .is_none());
    }

    /// Scenario: scan with `order = Desc` over a range of three samples.
    /// Expected: results come back strictly newest-first.
    #[test]
    fn test_scan_desc_order() {
        let mut store = SampleStore::open_in_memory().unwrap();
        let samples = vec![
            sample(Source::CexBook, "BTCUSDT", Side::Ask, 1.0, 10),
            sample(Source::CexBook, "BTCUSDT", Side::Ask, 2.0, 20),
            sample(Source::CexBook, "BTCUSDT", Side::Ask, 3.0, 30),
        ];
        store.insert_many(&samples).unwrap();
        let rows = store
            .scan(Source::CexBook, "BTCUSDT", Side::Ask, 0, 100, 10, ScanOrder::Desc)
            .unwrap();
        let ts: Vec<i64> = rows.iter().map(|s| s.observed_at).collect();
        assert_eq!(ts, vec![30, 20, 10]);
    }
}
