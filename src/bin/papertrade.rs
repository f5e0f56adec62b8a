//! Papertrader: replays a SampleStore range through the entry/exit
//! simulation and reports per-bucket, per-side fill statistics.
//!
//! Usage:
//!   papertrade [OPTIONS]
//!     --db <path>          SQLite store path (default: "recorder.db")
//!     --cex-symbol <sym>   CEX symbol to scan (default: "BTCUSDT")
//!     --oracle-symbol <s>  Oracle symbol to scan (default: "btcusd")
//!     --from <YYYY-MM-DD>  Range start (default: all time)
//!     --to <YYYY-MM-DD>    Range end (default: now)

use polymarket_lag::analyzer::papertrade::{self, PapertradeSummary};
use polymarket_lag::config::{AnalyzerConfig, PapertradeConfig};
use polymarket_lag::store::SampleStore;

struct Args {
    db_path: String,
    cex_symbol: String,
    oracle_symbol: String,
    from_ms: i64,
    to_ms: i64,
}

impl Args {
    fn from_cli() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut a = Args {
            db_path: "recorder.db".to_string(),
            cex_symbol: "BTCUSDT".to_string(),
            oracle_symbol: "btcusd".to_string(),
            from_ms: 0,
            to_ms: chrono::Utc::now().timestamp_millis(),
        };
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--db" => {
                    i += 1;
                    a.db_path = args[i].clone();
                }
                "--cex-symbol" => {
                    i += 1;
                    a.cex_symbol = args[i].clone();
                }
                "--oracle-symbol" => {
                    i += 1;
                    a.oracle_symbol = args[i].clone();
                }
                "--from" => {
                    i += 1;
                    if let Some(ms) = parse_date_to_ms(&args[i]) {
                        a.from_ms = ms;
                    }
                }
                "--to" => {
                    i += 1;
                    if let Some(ms) = parse_date_to_ms(&args[i]) {
                        a.to_ms = ms;
                    }
                }
                "--help" | "-h" => {
                    eprintln!(
                        "Usage: papertrade [OPTIONS]\n\
                         \x20 --db <path>\n\
                         \x20 --cex-symbol <sym>\n\
                         \x20 --oracle-symbol <s>\n\
                         \x20 --from <YYYY-MM-DD>\n\
                         \x20 --to <YYYY-MM-DD>"
                    );
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

fn parse_date_to_ms(s: &str) -> Option<i64> {
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 3 {
        eprintln!("Warning: cannot parse date '{}', expected YYYY-MM-DD", s);
        return None;
    }
    let y: i32 = parts[0].parse().ok()?;
    let m: u32 = parts[1].parse().ok()?;
    let d: u32 = parts[2].parse().ok()?;
    let dt = chrono::NaiveDate::from_ymd_opt(y, m, d)?;
    Some(dt.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

fn print_summary_row(label: &str, s: &PapertradeSummary) {
    println!(
        "{:50} │ fills={:>5} skip_late={:>4} skip_noq={:>4} win%={:>5.1} avg_pnl={:>+8.4} med_pnl={:>+8.4} roi%={:>+6.2} total_pnl={:>+9.3}",
        label,
        s.fills,
        s.skipped_too_late,
        s.skipped_no_quote,
        s.win_rate * 100.0,
        s.avg_pnl,
        s.median_pnl,
        s.avg_roi * 100.0,
        s.total_pnl,
    );
}

fn main() {
    let _ = dotenvy::dotenv();
    let args = Args::from_cli();

    let store = match SampleStore::open(&args.db_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to open store {}: {e}", args.db_path);
            std::process::exit(1);
        }
    };

    let analyzer_params = AnalyzerConfig::from_env();
    let params = PapertradeConfig::from_env();

    let report = match papertrade::run(&store, &args.cex_symbol, &args.oracle_symbol, args.from_ms, args.to_ms, &analyzer_params, &params) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("papertrade run failed: {e}");
            std::process::exit(1);
        }
    };

    println!();
    println!("╔═══════════════════════════════════════════════════════════════════════════╗");
    println!("║  Papertrade Report                                                         ║");
    println!("╚═══════════════════════════════════════════════════════════════════════════╝");
    println!();
    print_summary_row("GLOBAL", &report.global);
    println!();

    println!("Per bucket / side:");
    for ((bucket_key, side), summary) in &report.per_bucket_side {
        print_summary_row(&format!("{bucket_key} [{side}]"), summary);
    }

    if params.include_fills {
        println!();
        println!("Fills (first {}):", report.include_fills.len());
        for f in report.include_fills.iter().take(params.max_fills) {
            println!(
                "  t0={:<14} side={:<5} bucket={:<45} entry={:.4} exit={:.4} fee={:.5} pnl/share={:+.4} roi={:+.2}%",
                f.t0,
                f.side.to_string(),
                f.bucket_key.as_deref().unwrap_or("-"),
                f.entry,
                f.exit,
                f.fee,
                f.pnl_per_share,
                f.roi * 100.0,
            );
        }
    }
}
