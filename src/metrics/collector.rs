use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

use super::percentiles::PercentileSet;
use super::RequestSample;

// ─── Configuration ───────────────────────────────────────────────

/// HdrHistogram range: 1 μs → 60 s, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 60_000_000;
const HIST_SIGFIG: u8 = 3;

// ─── Public types ────────────────────────────────────────────────

/// Thread-safe metrics engine.
/// The interceptor calls `record()`, the reporting endpoints call `snapshot()`.
///
/// All counters, the endpoint map and the latency histogram live behind one
/// mutex, so the incremental-average update and the counter bumps for a
/// sample are applied as a single critical section.
pub struct MetricsCollector {
    inner: Mutex<Inner>,
    slow_threshold: Duration,
}

/// Process-wide request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GlobalCounters {
    pub total_requests: u64,
    pub slow_requests: u64,
    /// Requests that finished with status >= 400
    pub failed_requests: u64,
}

/// Rolling statistics for one endpoint identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EndpointStats {
    pub count: u64,
    /// Running mean duration in seconds
    pub avg_time: f64,
    pub slow_count: u64,
}

impl EndpointStats {
    /// Fold one more observation into the running mean.
    fn observe(&mut self, duration_secs: f64, slow: bool) {
        self.count += 1;
        self.avg_time += (duration_secs - self.avg_time) / self.count as f64;
        if slow {
            self.slow_count += 1;
        }
    }
}

/// The `performance` half of the monitoring payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    #[serde(flatten)]
    pub counters: GlobalCounters,
    pub endpoint_stats: BTreeMap<String, EndpointStats>,
}

/// Latency distribution since the first recorded request.
#[derive(Debug, Clone, Serialize)]
pub struct LatencyReport {
    /// Microseconds
    pub e2e: PercentileSet,
    pub requests_per_sec: f64,
    pub elapsed_secs: f64,
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    counters: GlobalCounters,
    endpoints: HashMap<String, EndpointStats>,
    e2e_hist: Histogram<u64>,
    // Wall-clock anchor for the requests/sec figure
    start_time: Option<Instant>,
}

// ─── MetricsCollector impl ───────────────────────────────────────

impl MetricsCollector {
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            slow_threshold,
        }
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// A request is slow when it takes strictly longer than the threshold.
    pub fn is_slow(&self, duration: Duration) -> bool {
        duration > self.slow_threshold
    }

    /// Record a single request observation.
    pub fn record(&self, sample: &RequestSample) {
        let slow = self.is_slow(sample.duration);
        self.inner.lock().record(sample, slow);
    }

    /// Consistent copy of the counters and per-endpoint stats.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().snapshot()
    }

    pub fn latency(&self) -> LatencyReport {
        self.inner.lock().latency()
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn new() -> Self {
        Self {
            counters: GlobalCounters::default(),
            endpoints: HashMap::new(),
            e2e_hist: Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
                .expect("histogram creation"),
            start_time: None,
        }
    }

    fn record(&mut self, sample: &RequestSample, slow: bool) {
        self.start_time.get_or_insert_with(Instant::now);

        // ── Counters ────────────────────────────────────────────
        self.counters.total_requests += 1;
        if slow {
            self.counters.slow_requests += 1;
        }
        if sample.is_failure() {
            self.counters.failed_requests += 1;
        }

        // ── Per-endpoint running stats ──────────────────────────
        // get_mut first so the common path doesn't allocate a key
        let secs = sample.duration_secs();
        match self.endpoints.get_mut(&sample.endpoint) {
            Some(stats) => stats.observe(secs, slow),
            None => {
                let mut stats = EndpointStats::default();
                stats.observe(secs, slow);
                self.endpoints.insert(sample.endpoint.clone(), stats);
            }
        }

        // ── Histogram (clamp to ≥ 1 μs, saturate at the upper bound) ──
        let us = (sample.duration.as_micros().min(u64::MAX as u128) as u64).max(1);
        self.e2e_hist.saturating_record(us);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters,
            endpoint_stats: self
                .endpoints
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }

    fn latency(&self) -> LatencyReport {
        let elapsed_secs = self
            .start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let rps = if elapsed_secs > 0.0 {
            self.counters.total_requests as f64 / elapsed_secs
        } else {
            0.0
        };

        LatencyReport {
            e2e: PercentileSet::from_histogram(&self.e2e_hist),
            requests_per_sec: rps,
            elapsed_secs,
        }
    }
}
