use std::fmt;

/// Which feed produced a Sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    CexBook,
    OracleLog,
    OracleAggregator,
    MarketBook,
    MarketTrade,
    Baseline,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::CexBook => "cex_book",
            Source::OracleLog => "oracle_log",
            Source::OracleAggregator => "oracle_aggregator",
            Source::MarketBook => "market_book",
            Source::MarketTrade => "market_trade",
            Source::Baseline => "baseline",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, ()> {
        Ok(match s {
            "cex_book" => Source::CexBook,
            "oracle_log" => Source::OracleLog,
            "oracle_aggregator" => Source::OracleAggregator,
            "market_book" => Source::MarketBook,
            "market_trade" => Source::MarketTrade,
            "baseline" => Source::Baseline,
            _ => return Err(()),
        })
    }
}

/// Which side of the market a Sample describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Bid,
    Ask,
    Trade,
    Oracle,
    Baseline,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
            Side::Trade => "trade",
            Side::Oracle => "oracle",
            Side::Baseline => "baseline",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Side {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, ()> {
        Ok(match s {
            "bid" => Side::Bid,
            "ask" => Side::Ask,
            "trade" => Side::Trade,
            "oracle" => Side::Oracle,
            "baseline" => Side::Baseline,
            _ => return Err(()),
        })
    }
}

/// The outcome side of a binary market. Distinct from `Side` (bid/ask on a
/// given book) — `MarketSide` names which of the two outcome tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MarketSide {
    Up,
    Down,
}

impl fmt::Display for MarketSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketSide::Up => write!(f, "UP"),
            MarketSide::Down => write!(f, "DOWN"),
        }
    }
}

/// The universal record. Every feed normalizes into this shape before it
/// reaches the SampleBuffer.
#[derive(Clone, Debug)]
pub struct Sample {
    pub source: Source,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub observed_at: i64,
    pub condition_id: Option<String>,
    pub asset_id: Option<String>,
    pub market_slug: Option<String>,
    pub extra: Option<String>,
}

impl Sample {
    /// The only public constructor outside of tests. Enforces the domain
    /// validation rules in the data model: market-book prices must lie in
    /// the open interval (0, 1); oracle and CEX prices must be positive
    /// finite. Returns `None` rather than a `Result` because a validation
    /// failure here is not an error to propagate — it's a frame to drop
    /// and count (see `FeedError` doc and the recorder's health surface).
    pub fn new_checked(
        source: Source,
        symbol: impl Into<String>,
        side: Side,
        price: f64,
        observed_at: i64,
    ) -> Option<Self> {
        let valid = match source {
            Source::MarketBook | Source::MarketTrade => price > 0.0 && price < 1.0,
            _ => price.is_finite() && price > 0.0,
        };
        if !valid {
            return None;
        }
        Some(Sample {
            source,
            symbol: symbol.into(),
            side,
            price,
            observed_at,
            condition_id: None,
            asset_id: None,
            market_slug: None,
            extra: None,
        })
    }

    pub fn with_condition_id(mut self, v: impl Into<String>) -> Self {
        self.condition_id = Some(v.into());
        self
    }

    pub fn with_asset_id(mut self, v: impl Into<String>) -> Self {
        self.asset_id = Some(v.into());
        self
    }

    pub fn with_market_slug(mut self, v: impl Into<String>) -> Self {
        self.market_slug = Some(v.into());
        self
    }

    pub fn with_extra(mut self, v: impl Into<String>) -> Self {
        self.extra = Some(v.into());
        self
    }
}

/// Sort order for `SampleStore::scan`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanOrder {
    Asc,
    Desc,
}

/// A single 15-minute market instance.
#[derive(Clone, Debug)]
pub struct Window {
    pub condition_id: String,
    pub slug: String,
    pub up_token_id: String,
    pub down_token_id: String,
    pub start: i64,
    pub end: i64,
}

impl Window {
    pub fn contains(&self, t: i64) -> bool {
        t >= self.start && t <= self.end
    }

    pub fn remaining_ms(&self, t: i64) -> i64 {
        self.end - t
    }
}

/// A derived, non-persisted record: one qualifying CEX price transition
/// together with its joined oracle and market-book reactions.
#[derive(Clone, Debug)]
pub struct Event {
    pub t0: i64,
    pub binance_delta_usd: f64,
    pub chainlink_delta_from_baseline_usd: Option<f64>,
    pub remaining_ms: i64,
    pub up_mid0: Option<f64>,
    pub up_mid1: Option<f64>,
    pub up_lag_ms: Option<i64>,
    pub down_mid0: Option<f64>,
    pub down_mid1: Option<f64>,
    pub down_lag_ms: Option<i64>,
    pub up_aligned: bool,
    pub down_aligned: bool,
}

impl Event {
    pub fn direction(&self) -> i32 {
        if self.binance_delta_usd > 0.0 {
            1
        } else if self.binance_delta_usd < 0.0 {
            -1
        } else {
            0
        }
    }

    pub fn remaining_bucket(&self) -> &'static str {
        remaining_bucket_label(self.remaining_ms)
    }
}

/// Boundaries exactly as enumerated in the bucketing rules: `{0..30s,
/// 30..60s, 60..120s, 120..300s, 300..600s, 600s+}`.
pub fn remaining_bucket_label(remaining_ms: i64) -> &'static str {
    let s = remaining_ms / 1000;
    if s < 30 {
        "0..30s"
    } else if s < 60 {
        "30..60s"
    } else if s < 120 {
        "60..120s"
    } else if s < 300 {
        "120..300s"
    } else if s < 600 {
        "300..600s"
    } else {
        "600s+"
    }
}

/// A half-open numeric bucket rendered as `"[lo..hi)"`, used for both the
/// delta and spike dimensions.
pub fn half_open_bucket(value: f64, width: f64) -> String {
    let lo = (value / width).floor() * width;
    let hi = lo + width;
    format!("[{:.0}..{:.0})", lo, hi)
}
