//! Load generators for the hello fixture.
//!
//! Both clients open `num_workers * num_conns` connections up front, line
//! them up at a barrier and then drive request/response rounds:
//!
//! - `throughput`: back-to-back rounds, reports requests per second
//! - `latency`: rounds spaced by a delay, reports the write-to-read latency
//!   distribution in nanoseconds
//!
//! Any I/O failure aborts the whole run.

pub mod latency;
pub mod stats;
pub mod throughput;

pub use latency::LatencyReport;
pub use stats::LatencySummary;
pub use throughput::ThroughputReport;

use clap::{Args, Parser, Subcommand};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Builder;

use crate::protocols::hello::REQUEST;

/// Read buffer for responses. One read is treated as one response.
const RESPONSE_BUFFER: usize = 128;

/// Command-line arguments for the load generator
#[derive(Parser, Debug)]
#[command(name = "hello-bench")]
#[command(version = "0.1.0")]
#[command(about = "Drives a hello fixture and reports throughput or latency", long_about = None)]
pub struct BenchCli {
    #[command(subcommand)]
    pub mode: Mode,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Measure requests per second
    Throughput(LoadOptions),
    /// Measure per-request latency
    Latency {
        #[command(flatten)]
        load: LoadOptions,

        /// Delay in nanoseconds before sending each request
        #[arg(short = 'd', long, default_value_t = 1_000_000)]
        delay: u64,
    },
}

/// Options shared by both modes
#[derive(Args, Debug, Clone)]
pub struct LoadOptions {
    /// IPv4 address of the server
    #[arg(value_name = "HOST-IPV4")]
    pub host: Ipv4Addr,

    /// Port of the server
    #[arg(value_name = "PORT")]
    pub port: u16,

    /// Number of connections per worker
    #[arg(
        short = 'c',
        long,
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub num_conns: u32,

    /// Number of requests per connection
    #[arg(
        short = 'r',
        long,
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub num_reqs: u32,

    /// Number of worker threads
    #[arg(
        short = 'w',
        long,
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub num_workers: u32,
}

impl LoadOptions {
    pub fn target(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.host, self.port))
    }

    /// Connections across all workers.
    pub fn total_conns(&self) -> usize {
        self.num_workers as usize * self.num_conns as usize
    }
}

/// Result of one run, ready to print.
#[derive(Debug)]
pub enum Report {
    Throughput(ThroughputReport),
    Latency(LatencyReport),
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Report::Throughput(report) => write!(f, "{report}"),
            Report::Latency(report) => write!(f, "{report}"),
        }
    }
}

/// Build a runtime sized by `num_workers` and run the selected mode on it.
pub fn run(mode: Mode) -> Result<Report, BenchError> {
    let workers = match &mode {
        Mode::Throughput(load) => load.num_workers,
        Mode::Latency { load, .. } => load.num_workers,
    };

    let runtime = Builder::new_multi_thread()
        .worker_threads(workers as usize)
        .thread_name("bench-worker")
        .enable_all()
        .build()
        .map_err(BenchError::Runtime)?;

    runtime.block_on(async {
        match mode {
            Mode::Throughput(load) => throughput::run(&load).await.map(Report::Throughput),
            Mode::Latency { load, delay } => {
                let delay = Duration::from_nanos(delay);
                latency::run(&load, delay).await.map(Report::Latency)
            }
        }
    })
}

async fn connect(target: SocketAddr) -> Result<TcpStream, BenchError> {
    let stream = TcpStream::connect(target)
        .await
        .map_err(|e| BenchError::Connect(target, e))?;
    stream
        .set_nodelay(true)
        .map_err(|e| BenchError::Connect(target, e))?;
    Ok(stream)
}

/// Send one request and wait for one read's worth of response.
async fn round_trip(stream: &mut TcpStream, buf: &mut [u8]) -> Result<(), BenchError> {
    stream.write_all(REQUEST).await.map_err(BenchError::Write)?;
    match stream.read(buf).await.map_err(BenchError::Read)? {
        0 => Err(BenchError::Closed),
        _ => Ok(()),
    }
}

/// Load generator errors
#[derive(Debug)]
pub enum BenchError {
    Connect(SocketAddr, io::Error),
    Read(io::Error),
    Write(io::Error),
    Closed,
    Runtime(io::Error),
    Task(tokio::task::JoinError),
}

impl std::fmt::Display for BenchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BenchError::Connect(addr, e) => {
                write!(f, "Connecting to the server {addr} failed: {e}")
            }
            BenchError::Read(e) => write!(f, "Reading failed: {e}"),
            BenchError::Write(e) => write!(f, "Writing failed: {e}"),
            BenchError::Closed => write!(f, "Server closed the connection"),
            BenchError::Runtime(e) => write!(f, "Building runtime failed: {e}"),
            BenchError::Task(e) => write!(f, "Connection task failed: {e}"),
        }
    }
}

impl std::error::Error for BenchError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_args() {
        let cli = BenchCli::try_parse_from([
            "hello-bench",
            "throughput",
            "-c",
            "8",
            "--num-reqs",
            "100",
            "-w",
            "2",
            "127.0.0.1",
            "9000",
        ])
        .unwrap();

        match cli.mode {
            Mode::Throughput(load) => {
                assert_eq!(
                    load.target(),
                    "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
                );
                assert_eq!(load.num_conns, 8);
                assert_eq!(load.num_reqs, 100);
                assert_eq!(load.num_workers, 2);
                assert_eq!(load.total_conns(), 16);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(cli.log_level, "warn");
    }

    #[test]
    fn test_latency_defaults() {
        let cli = BenchCli::try_parse_from(["hello-bench", "latency", "10.0.0.1", "80"]).unwrap();

        match cli.mode {
            Mode::Latency { load, delay } => {
                assert_eq!(delay, 1_000_000);
                assert_eq!(load.num_conns, 1);
                assert_eq!(load.num_reqs, 1);
                assert_eq!(load.num_workers, 1);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_counts() {
        for flag in ["-c", "-r", "-w"] {
            let args = ["hello-bench", "throughput", flag, "0", "127.0.0.1", "80"];
            let result = BenchCli::try_parse_from(args);
            assert!(result.is_err(), "{flag} 0 accepted");
        }
    }

    #[test]
    fn test_rejects_missing_target() {
        let args = ["hello-bench", "throughput", "127.0.0.1"];
        assert!(BenchCli::try_parse_from(args).is_err());

        let args = ["hello-bench", "latency", "-d", "-5", "127.0.0.1", "80"];
        assert!(BenchCli::try_parse_from(args).is_err());
    }
}
