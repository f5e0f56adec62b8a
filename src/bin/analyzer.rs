//! Pattern Analyzer: scans a SampleStore over a time range and reports
//! per-bucket CEX/Chainlink response statistics plus strategy candidates.
//!
//! Usage:
//!   analyzer [OPTIONS]
//!     --db <path>          SQLite store path (default: "recorder.db")
//!     --cex-symbol <sym>   CEX symbol to scan (default: "BTCUSDT")
//!     --oracle-symbol <s>  Oracle symbol to scan (default: "btcusd")
//!     --from <YYYY-MM-DD>  Range start (default: all time)
//!     --to <YYYY-MM-DD>    Range end (default: now)

use polymarket_lag::analyzer::{self, bucket::BucketStats};
use polymarket_lag::config::AnalyzerConfig;
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
                    print_usage();
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown arg: {other}");
                    print_usage();
                    std::process::exit(1);
                }
            }
            i += 1;
        }
        a
    }
}

fn print_usage() {
    eprintln!(
        "Usage: analyzer [OPTIONS]\n\
         \n\
         Options:\n\
         \x20 --db <path>          SQLite store path (default: \"recorder.db\")\n\
         \x20 --cex-symbol <sym>   CEX symbol to scan (default: \"BTCUSDT\")\n\
         \x20 --oracle-symbol <s>  Oracle symbol to scan (default: \"btcusd\")\n\
         \x20 --from <YYYY-MM-DD>  Range start (default: all time)\n\
         \x20 --to <YYYY-MM-DD>    Range end (default: now)\n\
         \x20 --help, -h           Show this help"
    );
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

fn print_report(windows_analyzed: usize, total_events: usize, global_rate: f64, buckets: &[BucketStats], candidates: &[BucketStats]) {
    println!();
    println!("╔═══════════════════════════════════════════════════════════════════════════╗");
    println!("║  Pattern Analyzer Report                                                   ║");
    println!(
        "║  windows={:<6} events={:<7} global_up_rate={:>5.1}%                      ║",
        windows_analyzed,
        total_events,
        global_rate * 100.0
    );
    println!("╚═══════════════════════════════════════════════════════════════════════════╝");
    println!();

    println!(
        "{:45} │ {:>5} │ {:>7} │ {:>13} │ {:>9} │ {:>8}",
        "Bucket (delta|spike|remaining)", "n", "up_rate", "ci95", "lift", "edge"
    );
    println!(
        "{}┼{}┼{}┼{}┼{}┼{}",
        "─".repeat(45),
        "─".repeat(7),
        "─".repeat(9),
        "─".repeat(15),
        "─".repeat(11),
        "─".repeat(10),
    );
    for b in buckets {
        println!(
            "{:45} │ {:>5} │ {:>6.1}% │ [{:>5.1}%,{:>5.1}%] │ {:>+8.3} │ {:>8.4}",
            b.key,
            b.n,
            b.up_response_rate * 100.0,
            b.up_ci95_low * 100.0,
            b.up_ci95_high * 100.0,
            b.lift_vs_global,
            b.edge_score,
        );
    }
    println!();

    println!("Strategy candidates (n >= min_n, up_ci95_low > global rate), top {}:", candidates.len());
    for (rank, c) in candidates.iter().enumerate() {
        println!(
            "  {:>2}. {:45} n={:<5} up_rate={:>5.1}% lift={:>+6.3} edge={:.4}",
            rank + 1,
            c.key,
            c.n,
            c.up_response_rate * 100.0,
            c.lift_vs_global,
            c.edge_score,
        );
    }
    if candidates.is_empty() {
        println!("  (none)");
    }
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

    let params = AnalyzerConfig::from_env();

    let report = match analyzer::run(&store, &args.cex_symbol, &args.oracle_symbol, args.from_ms, args.to_ms, &params) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("analyzer run failed: {e}");
            std::process::exit(1);
        }
    };

    print_report(
        report.windows_analyzed,
        report.total_events,
        report.global_up_response_rate,
        &report.buckets,
        &report.candidates,
    );
}
