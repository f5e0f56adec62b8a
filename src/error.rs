use thiserror::Error;

/// Errors surfaced by a FeedClient. Transient network errors never leave the
/// feed task; only reconnect exhaustion does (see `FeedError::ReconnectExhausted`).
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("websocket error: {0}")]
    Transport(String),

    #[error("subscription rejected: {0}")]
    SubscriptionRejected(String),

    #[error("reconnect attempts exhausted ({attempts})")]
    ReconnectExhausted { attempts: u32 },
}

/// Errors from SampleStore operations. A batch-insert failure is logged and
/// the batch dropped by the caller (SampleBuffer); it is never retried.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store path invalid: {0}")]
    InvalidPath(String),
}

/// Errors from market discovery / baseline anchoring.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json decode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no active market found for series {series_id}")]
    NoActiveMarket { series_id: String },
}

/// Errors surfaced by the Analyzer/Papertrader for one invocation — these
/// never escape the per-window loop, only the final aggregate call.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Errors from the order gateway. Transient failures (5xx, timeout) are
/// retried implicitly by the next reconciliation tick, not here.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway rejected request: {status} {body}")]
    Rejected { status: u16, body: String },

    #[error("response decode error: {0}")]
    Decode(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(String),
}

/// Fatal configuration errors surfaced at component startup. A component
/// that returns this refuses to start; other components keep running.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
}
