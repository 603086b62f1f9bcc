//! Merchant Balance Consumer CLI
//!
//! Consumes transaction events and writes the resulting merchant daily
//! balances as CSV.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- --input events.jsonl > balances.csv
//! cargo run -- --input events.jsonl --dedup-window-secs 0 > balances.csv
//! cargo run -- --failure-threshold 3 --cooldown-secs 10
//! cargo run --features postgres -- --database-url postgres://localhost/balances
//! ```
//!
//! With `--input`, the queue is seeded from the replay file and the consumer
//! stops once the queue is idle. Without it, the consumer polls until Ctrl-C.
//! Either way the final balances are written to stdout; logs go to stderr,
//! ending with the totals of every metrics counter.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (file not found, runtime failure, output not writable, etc.)

use merchant_balance_consumer::{cli, service, CounterRecorder};
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse command-line arguments using clap
    let args = cli::parse_args();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let recorder = CounterRecorder::new();
    if let Err(e) = recorder.install() {
        tracing::warn!(error = %e, "metrics recorder not installed");
    }

    let config = args.to_service_config();

    // Output goes to stdout
    let mut output = std::io::stdout();
    let result = service::run(args.input.as_deref(), &config, &mut output);
    recorder.log_totals();

    if let Err(e) = result {
        tracing::error!(error = %e, "balance consumer failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
