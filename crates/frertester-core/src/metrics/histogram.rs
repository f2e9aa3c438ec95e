//! Bounded-memory latency statistics

use std::time::Duration;

/// Bucket upper bounds in microseconds (1-2-5 steps, 10 µs to 10 ms)
pub const LATENCY_BUCKETS_US: [u64; 10] = [10, 20, 50, 100, 200, 500, 1_000, 2_000, 5_000, 10_000];

/// Exact min/mean/max over all recorded latencies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencySummary {
    count: u64,
    sum: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
}

impl LatencySummary {
    pub fn record(&mut self, latency: Duration) {
        self.count += 1;
        self.sum = self.sum.saturating_add(latency);
        self.min = Some(self.min.map_or(latency, |min| min.min(latency)));
        self.max = Some(self.max.map_or(latency, |max| max.max(latency)));
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> Option<Duration> {
        self.min
    }

    pub fn max(&self) -> Option<Duration> {
        self.max
    }

    pub fn mean(&self) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        let nanos = self.sum.as_nanos() / self.count as u128;
        Some(Duration::from_nanos(nanos.min(u64::MAX as u128) as u64))
    }
}

/// Latency histogram with fixed bucket boundaries
///
/// A latency lands in the first bucket whose upper bound it does not exceed;
/// anything above 10 ms lands in the overflow bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LatencyHistogram {
    counts: [u64; LATENCY_BUCKETS_US.len()],
    overflow: u64,
    summary: LatencySummary,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, latency: Duration) {
        match bucket_index(latency) {
            Some(index) => self.counts[index] += 1,
            None => self.overflow += 1,
        }
        self.summary.record(latency);
    }

    /// `(upper bound µs, count)` for every bucket, ascending
    pub fn buckets(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        LATENCY_BUCKETS_US.iter().copied().zip(self.counts.iter().copied())
    }

    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    pub fn summary(&self) -> &LatencySummary {
        &self.summary
    }

    pub fn count(&self) -> u64 {
        self.summary.count()
    }
}

/// Index of the bucket holding `latency`, `None` for overflow
pub fn bucket_index(latency: Duration) -> Option<usize> {
    let nanos = latency.as_nanos();
    LATENCY_BUCKETS_US
        .iter()
        .position(|&bound_us| nanos <= bound_us as u128 * 1_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_upper_bound_inclusive() {
        assert_eq!(bucket_index(Duration::ZERO), Some(0));
        assert_eq!(bucket_index(Duration::from_micros(10)), Some(0));
        assert_eq!(bucket_index(Duration::from_nanos(10_001)), Some(1));
        assert_eq!(bucket_index(Duration::from_micros(100)), Some(3));
        assert_eq!(bucket_index(Duration::from_millis(10)), Some(9));
        assert_eq!(bucket_index(Duration::from_nanos(10_000_001)), None);
    }

    #[test]
    fn test_histogram_counts_and_overflow() {
        let mut histogram = LatencyHistogram::new();
        histogram.record(Duration::from_micros(15));
        histogram.record(Duration::from_micros(15));
        histogram.record(Duration::from_millis(50));

        let buckets: Vec<_> = histogram.buckets().collect();
        assert_eq!(buckets[1], (20, 2));
        assert_eq!(histogram.overflow(), 1);
        assert_eq!(histogram.count(), 3);
    }

    #[test]
    fn test_summary_exact() {
        let mut summary = LatencySummary::default();
        assert_eq!(summary.mean(), None);

        summary.record(Duration::from_micros(100));
        summary.record(Duration::from_micros(300));
        assert_eq!(summary.min(), Some(Duration::from_micros(100)));
        assert_eq!(summary.max(), Some(Duration::from_micros(300)));
        assert_eq!(summary.mean(), Some(Duration::from_micros(200)));
    }
}
