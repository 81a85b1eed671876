//! hello-bench: throughput and latency load generators for hello-timeout.

use clap::Parser;
use hello_timeout::bench::{self, BenchCli};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = BenchCli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let report = bench::run(cli.mode)?;
    print!("{report}");
    Ok(())
}
