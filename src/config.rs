/// Feed sampling & transport configuration, shared by all FeedClients.
#[derive(Clone)]
pub struct FeedConfig {
    pub cex_ws: String,
    pub cex_ws_fallback: String,
    pub cex_sample_interval_ms: i64,

    pub market_ws: String,

    pub oracle_log_rpc_ws: String,
    pub oracle_log_aggregator_address: String,
    pub oracle_log_poll_ms: u64,
    pub oracle_log_decimals: u32,

    pub oracle_aggregator_ws: String,
    pub oracle_aggregator_topic: String,
    pub oracle_aggregator_symbol: String,

    pub gamma_api_url: String,
    pub asset: String,
    pub slug_prefix: String,
    pub series_id: String,
    pub discovery_interval_secs: i64,
}

impl FeedConfig {
    pub fn from_env() -> Self {
        let asset = env_str("ASSET", "btc").to_lowercase();
        Self {
            cex_ws: env_str(
                "CEX_WS",
                &format!("wss://stream.binance.com:9443/ws/{}usdt@bookTicker", asset),
            ),
            cex_ws_fallback: env_str(
                "CEX_WS_FALLBACK",
                &format!("wss://stream.binance.us:9443/ws/{}usd@bookTicker", asset),
            ),
            cex_sample_interval_ms: env_i64("CEX_SAMPLE_INTERVAL_MS", 100),

            market_ws: env_str("MARKET_WS", "wss://ws-subscriptions-clob.polymarket.com/ws/market"),

            oracle_log_rpc_ws: env_str("ORACLE_LOG_RPC_WS", "wss://polygon-bor-rpc.publicnode.com"),
            oracle_log_aggregator_address: env_str(
                "ORACLE_LOG_AGGREGATOR_ADDRESS",
                "0xc907E116054Ad103354f2D350FD2514433D57F6f",
            ),
            oracle_log_poll_ms: env_u64("ORACLE_LOG_POLL_MS", 250),
            oracle_log_decimals: env_u64("ORACLE_LOG_DECIMALS", 8) as u32,

            oracle_aggregator_ws: env_str("ORACLE_AGGREGATOR_WS", "wss://1.rdp.lseg.com/live-data"),
            oracle_aggregator_topic: env_str("ORACLE_AGGREGATOR_TOPIC", "crypto-price"),
            oracle_aggregator_symbol: env_str("ORACLE_AGGREGATOR_SYMBOL", &format!("{}usd", asset)),

            gamma_api_url: env_str("GAMMA_API_URL", "https://gamma-api.polymarket.com"),
            slug_prefix: env_str("SLUG_PREFIX", &format!("{}-updown-15m-", asset)),
            series_id: env_str("SERIES_ID", "10192"),
            discovery_interval_secs: env_i64("DISCOVERY_INTERVAL_SECS", 300),

            asset,
        }
    }
}

/// SampleBuffer batching parameters.
#[derive(Clone, Copy)]
pub struct BufferConfig {
    pub flush_interval_ms: u64,
    pub max_buffer: usize,
}

impl BufferConfig {
    pub fn from_env() -> Self {
        Self {
            flush_interval_ms: env_u64("FLUSH_INTERVAL_MS", 1000),
            max_buffer: env_u64("MAX_BUFFER", 200) as usize,
        }
    }
}

/// Analyzer parameters, per §4.4.
#[derive(Clone, Copy)]
pub struct AnalyzerConfig {
    pub spike_usd: f64,
    pub reaction_window_ms: i64,
    pub delta_bucket_usd: f64,
    pub spike_bucket_usd: f64,
    pub spike_cooldown_ms: i64,
    pub epsilon: f64,
    pub min_n: u32,
    pub order_p95_ms: Option<i64>,
    pub safety_ms: i64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            spike_usd: 6.0,
            reaction_window_ms: 3000,
            delta_bucket_usd: 10.0,
            spike_bucket_usd: 2.0,
            spike_cooldown_ms: 250,
            epsilon: 0.01,
            min_n: 10,
            order_p95_ms: None,
            safety_ms: 150,
        }
    }
}

impl AnalyzerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            spike_usd: env_f64("SPIKE_USD", d.spike_usd),
            reaction_window_ms: env_i64("REACTION_WINDOW_MS", d.reaction_window_ms),
            delta_bucket_usd: env_f64("DELTA_BUCKET_USD", d.delta_bucket_usd),
            spike_bucket_usd: env_f64("SPIKE_BUCKET_USD", d.spike_bucket_usd),
            spike_cooldown_ms: env_i64("SPIKE_COOLDOWN_MS", d.spike_cooldown_ms),
            epsilon: env_f64("EPSILON", d.epsilon),
            min_n: env_u64("MIN_N", d.min_n as u64) as u32,
            order_p95_ms: std::env::var("ORDER_P95_MS").ok().and_then(|s| s.parse().ok()),
            safety_ms: env_i64("SAFETY_MS", d.safety_ms),
        }
    }
}

/// Papertrader parameters, per §6.
#[derive(Clone, Copy)]
pub struct PapertradeConfig {
    pub hold_ms: i64,
    pub fee_bps: f64,
    pub include_fills: bool,
    pub max_fills: usize,
}

impl Default for PapertradeConfig {
    fn default() -> Self {
        Self {
            hold_ms: 2000,
            fee_bps: 0.0,
            include_fills: false,
            max_fills: 500,
        }
    }
}

impl PapertradeConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            hold_ms: env_i64("HOLD_MS", d.hold_ms),
            fee_bps: env_f64("FEE_BPS", d.fee_bps),
            include_fills: env_bool("INCLUDE_FILLS", d.include_fills),
            max_fills: env_u64("MAX_FILLS", d.max_fills as u64) as usize,
        }
    }
}

/// MakerLadder parameters, per §6.
#[derive(Clone)]
pub struct MakerConfig {
    pub levels: u32,
    pub tick: f64,
    pub size: f64,
    pub refresh_ms: u64,
    pub burst_place: usize,
    pub burst_cancel: usize,
    pub spike_usd: f64,
    pub spike_window_ms: i64,
    pub spike_cooldown_ms: i64,
    pub quote_both_assets: bool,
    pub quote_both_sides: bool,
    pub dry_run: bool,
    pub cancel_on_start: bool,
    pub cancel_all_on_start: bool,
    pub event_driven: bool,
    pub event_debounce_ms: u64,

    pub gateway_base_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub api_passphrase: Option<String>,
}

impl Default for MakerConfig {
    fn default() -> Self {
        Self {
            levels: 3,
            tick: 0.01,
            size: 5.0,
            refresh_ms: 750,
            burst_place: 5,
            burst_cancel: 10,
            spike_usd: 6.0,
            spike_window_ms: 250,
            spike_cooldown_ms: 1200,
            quote_both_assets: true,
            quote_both_sides: true,
            dry_run: true,
            cancel_on_start: true,
            cancel_all_on_start: false,
            event_driven: true,
            event_debounce_ms: 15,
            gateway_base_url: "https://clob.polymarket.com".to_string(),
            api_key: None,
            api_secret: None,
            api_passphrase: None,
        }
    }
}

impl MakerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            levels: env_u64("LEVELS", d.levels as u64) as u32,
            tick: env_f64("TICK", d.tick),
            size: env_f64("SIZE", d.size),
            refresh_ms: env_u64("REFRESH_MS", d.refresh_ms),
            burst_place: env_u64("BURST_PLACE", d.burst_place as u64) as usize,
            burst_cancel: env_u64("BURST_CANCEL", d.burst_cancel as u64) as usize,
            spike_usd: env_f64("MAKER_SPIKE_USD", d.spike_usd),
            spike_window_ms: env_i64("MAKER_SPIKE_WINDOW_MS", d.spike_window_ms),
            spike_cooldown_ms: env_i64("MAKER_SPIKE_COOLDOWN_MS", d.spike_cooldown_ms),
            quote_both_assets: env_bool("QUOTE_BOTH_ASSETS", d.quote_both_assets),
            quote_both_sides: env_bool("QUOTE_BOTH_SIDES", d.quote_both_sides),
            dry_run: env_bool("DRY_RUN", d.dry_run),
            cancel_on_start: env_bool("CANCEL_ON_START", d.cancel_on_start),
            cancel_all_on_start: env_bool("CANCEL_ALL_ON_START", d.cancel_all_on_start),
            event_driven: env_bool("EVENT_DRIVEN", d.event_driven),
            event_debounce_ms: env_u64("EVENT_DEBOUNCE_MS", d.event_debounce_ms),
            gateway_base_url: env_str("GATEWAY_BASE_URL", &d.gateway_base_url),
            api_key: std::env::var("POLY_API_KEY").ok(),
            api_secret: std::env::var("POLY_API_SECRET").ok(),
            api_passphrase: std::env::var("POLY_PASSPHRASE").ok(),
        }
    }

    /// Fatal-config check: order placement and the user channel require
    /// credentials. Called at MakerLadder/OrderGateway startup, never at
    /// load time — DRY_RUN components must still construct successfully.
    pub fn require_credentials(&self) -> Result<(), crate::error::ConfigError> {
        if self.dry_run {
            return Ok(());
        }
        if self.api_key.is_none() {
            return Err(crate::error::ConfigError::MissingVar("POLY_API_KEY".into()));
        }
        if self.api_secret.is_none() {
            return Err(crate::error::ConfigError::MissingVar("POLY_API_SECRET".into()));
        }
        if self.api_passphrase.is_none() {
            return Err(crate::error::ConfigError::MissingVar("POLY_PASSPHRASE".into()));
        }
        Ok(())
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(default)
}
