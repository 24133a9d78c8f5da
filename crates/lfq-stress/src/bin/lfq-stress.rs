//! lfq-stress: bounded-time multi-threaded stress run of the queue.
//!
//! # Usage
//!
//! ```bash
//! lfq-stress --producers 8 --consumers 8 --ops 100000 --time-limit-ms 60000 --json
//! ```
//!
//! Exits non-zero on a liveness failure or a property violation.

use std::process;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lfq_stress::{run_stress, StressConfig};

/// Stress the lock-free queue and check every value arrives exactly once.
#[derive(Parser, Debug)]
#[command(name = "lfq-stress")]
#[command(about = "Bounded-time stress runner for the lock-free queue")]
struct Cli {
    /// Producer threads.
    #[arg(long, default_value_t = 4)]
    producers: u32,

    /// Consumer threads.
    #[arg(long, default_value_t = 4)]
    consumers: u32,

    /// Values pushed by each producer.
    #[arg(long, default_value_t = 10_000)]
    ops: u32,

    /// Time limit in milliseconds; exceeding it is a liveness failure.
    #[arg(long, default_value_t = 30_000)]
    time_limit_ms: u64,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = StressConfig {
        producers: cli.producers,
        consumers: cli.consumers,
        ops_per_producer: cli.ops,
        time_limit: Duration::from_millis(cli.time_limit_ms),
    };

    match run_stress(&config) {
        Ok(report) => {
            if cli.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("Error: {e}");
                        process::exit(1);
                    }
                }
            } else {
                println!("{}", report.format());
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
