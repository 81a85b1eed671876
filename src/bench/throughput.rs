//! Throughput client: back-to-back rounds on every connection.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tracing::debug;

use super::{connect, round_trip, BenchError, LoadOptions, RESPONSE_BUFFER};

/// Requests completed and the wall time they took.
#[derive(Debug, Clone, Copy)]
pub struct ThroughputReport {
    pub requests: u64,
    pub elapsed: Duration,
}

impl ThroughputReport {
    pub fn rate(&self) -> f64 {
        self.requests as f64 / self.elapsed.as_secs_f64()
    }
}

impl std::fmt::Display for ThroughputReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} requests in {:.2}s, rate: {:.2} req/s",
            self.requests,
            self.elapsed.as_secs_f64(),
            self.rate()
        )
    }
}

/// Connect everything, release all connections at once, time until the last
/// one finishes.
pub async fn run(load: &LoadOptions) -> Result<ThroughputReport, BenchError> {
    let target = load.target();
    let total = load.total_conns();
    let num_reqs = load.num_reqs;
    let barrier = Arc::new(Barrier::new(total + 1));
    let mut tasks = JoinSet::new();

    for _ in 0..total {
        let stream = connect(target).await?;
        let barrier = Arc::clone(&barrier);
        tasks.spawn(async move {
            barrier.wait().await;
            drive(stream, num_reqs).await
        });
    }
    debug!(connections = total, target = %target, "All connections open");

    barrier.wait().await;
    let start = Instant::now();

    while let Some(result) = tasks.join_next().await {
        result.map_err(BenchError::Task)??;
    }

    Ok(ThroughputReport {
        requests: total as u64 * u64::from(num_reqs),
        elapsed: start.elapsed(),
    })
}

async fn drive(mut stream: TcpStream, num_reqs: u32) -> Result<(), BenchError> {
    let mut buf = [0u8; RESPONSE_BUFFER];
    for _ in 0..num_reqs {
        round_trip(&mut stream, &mut buf).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_format() {
        let report = ThroughputReport {
            requests: 1000,
            elapsed: Duration::from_millis(500),
        };
        assert_eq!(report.rate(), 2000.0);
        assert_eq!(
            report.to_string(),
            "1000 requests in 0.50s, rate: 2000.00 req/s\n"
        );
    }
}
