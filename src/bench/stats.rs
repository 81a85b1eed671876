//! Latency distribution summary.

/// How many of the fastest and slowest samples to list.
const EXTREMES: usize = 10;

/// Quantiles reported, as (label, numerator, denominator).
const QUANTILES: [(&str, usize, usize); 7] = [
    ("0.9", 9, 10),
    ("0.95", 95, 100),
    ("0.99", 99, 100),
    ("0.995", 995, 1000),
    ("0.999", 999, 1000),
    ("0.9995", 9995, 10000),
    ("0.9999", 9999, 10000),
];

/// Summary of latency samples in nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencySummary {
    pub count: usize,
    pub mean: u64,
    pub min: u64,
    pub max: u64,
    pub median: u64,
    /// Values for each entry of `QUANTILES`, in order.
    pub quantiles: Vec<(&'static str, u64)>,
    /// Fastest samples, ascending.
    pub best: Vec<u64>,
    /// Slowest samples, descending.
    pub worst: Vec<u64>,
}

impl LatencySummary {
    /// Sort the samples and compute the summary. `None` if there are none.
    ///
    /// Quantile `q` is the sample at index `floor(n * q)` of the sorted set.
    pub fn from_samples(mut samples: Vec<u64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();

        let n = samples.len();
        let sum: u128 = samples.iter().map(|&s| u128::from(s)).sum();
        let mean = u64::try_from(sum / n as u128).unwrap_or(u64::MAX);
        let at = |num: usize, den: usize| samples[n * num / den];
        let shown = n.min(EXTREMES);

        Some(Self {
            count: n,
            mean,
            min: samples[0],
            max: samples[n - 1],
            median: samples[n / 2],
            quantiles: QUANTILES
                .iter()
                .map(|&(label, num, den)| (label, at(num, den)))
                .collect(),
            best: samples[..shown].to_vec(),
            worst: samples.iter().rev().take(shown).copied().collect(),
        })
    }
}

impl std::fmt::Display for LatencySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Latency [ns]:")?;
        writeln!(f, "  {:<9} {}", "mean:", self.mean)?;
        writeln!(f, "  {:<9} {}", "min:", self.min)?;
        writeln!(f, "  {:<9} {}", "max:", self.max)?;
        writeln!(f, "  {:<9} {}", "median:", self.median)?;
        for (label, value) in &self.quantiles {
            writeln!(f, "  {:<9} {}", format!("q {label}:"), value)?;
        }

        writeln!(f, "\nBest {}:", self.best.len())?;
        for (i, value) in self.best.iter().enumerate() {
            writeln!(f, "  {:>2}. {}", i + 1, value)?;
        }
        writeln!(f, "\nWorst {}:", self.worst.len())?;
        for (i, value) in self.worst.iter().enumerate() {
            writeln!(f, "  {:>2}. {}", i + 1, value)?;
        }
        Ok(())
    }
}
