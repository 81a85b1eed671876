//! Latency client: delayed rounds, each timed from write to read.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tracing::debug;

use super::{connect, round_trip, BenchError, LatencySummary, LoadOptions, RESPONSE_BUFFER};

/// Outcome of a latency run.
#[derive(Debug)]
pub struct LatencyReport {
    pub summary: LatencySummary,
}

impl std::fmt::Display for LatencyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.summary)
    }
}

/// Each connection does one untimed warm-up round, then waits at the barrier
/// before its measured rounds.
pub async fn run(load: &LoadOptions, delay: Duration) -> Result<LatencyReport, BenchError> {
    let target = load.target();
    let total = load.total_conns();
    let num_reqs = load.num_reqs;
    let barrier = Arc::new(Barrier::new(total));
    let mut tasks = JoinSet::new();

    for _ in 0..total {
        let stream = connect(target).await?;
        let barrier = Arc::clone(&barrier);
        tasks.spawn(async move { measure(stream, num_reqs, delay, &barrier).await });
    }
    debug!(connections = total, target = %target, ?delay, "All connections open");

    let mut samples = Vec::with_capacity(total * num_reqs as usize);
    while let Some(result) = tasks.join_next().await {
        samples.extend(result.map_err(BenchError::Task)??);
    }

    // num_reqs >= 1 and total >= 1, so there is at least one sample.
    let summary = LatencySummary::from_samples(samples).ok_or(BenchError::Closed)?;
    Ok(LatencyReport { summary })
}

async fn measure(
    mut stream: TcpStream,
    num_reqs: u32,
    delay: Duration,
    barrier: &Barrier,
) -> Result<Vec<u64>, BenchError> {
    let mut buf = [0u8; RESPONSE_BUFFER];
    let mut latencies = Vec::with_capacity(num_reqs as usize);

    round_trip(&mut stream, &mut buf).await?;
    barrier.wait().await;

    for _ in 0..num_reqs {
        tokio::time::sleep(delay).await;
        let sent = Instant::now();
        round_trip(&mut stream, &mut buf).await?;
        latencies.push(u64::try_from(sent.elapsed().as_nanos()).unwrap_or(u64::MAX));
    }

    Ok(latencies)
}
