pub mod cex;
pub mod market_book;
pub mod oracle_aggregator;
pub mod oracle_log;
