//! Prometheus metrics for monitoring
//!
//! Provides counters, gauges, and histograms for observability.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

/// Counter metric (monotonically increasing)
pub struct Counter {
    value: AtomicU64,
    name: String,
    help: String,
}

impl Counter {
    /// Create a new counter
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by delta
    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Gauge metric (can go up or down)
pub struct Gauge {
    value: AtomicI64,
    name: String,
    help: String,
}

impl Gauge {
    /// Create a new gauge
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Set value
    pub fn set(&self, val: i64) {
        self.value.store(val, Ordering::Relaxed);
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement by 1
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} gauge\n{} {}\n",
            self.name, self.help, self.name, self.name, self.get()
        )
    }
}

/// Histogram for latency measurements
pub struct Histogram {
    buckets: Vec<(f64, AtomicU64)>,
    sum: AtomicU64,
    count: AtomicU64,
    name: String,
    help: String,
}

impl Histogram {
    /// Create with default buckets
    pub fn new(name: &str, help: &str) -> Self {
        Self::with_buckets(
            name,
            help,
            vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0],
        )
    }

    /// Create with custom buckets
    pub fn with_buckets(name: &str, help: &str, bounds: Vec<f64>) -> Self {
        let buckets = bounds
            .into_iter()
            .map(|b| (b, AtomicU64::new(0)))
            .collect();

        Self {
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
            name: name.into(),
            help: help.into(),
        }
    }

    /// Observe a value in seconds
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);

        // sum kept as micros
        let micros = (value * 1_000_000.0) as u64;
        self.sum.fetch_add(micros, Ordering::Relaxed);

        for (bound, count) in &self.buckets {
            if value <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record the time elapsed since `start`
    pub fn observe_since(&self, start: Instant) {
        self.observe(start.elapsed().as_secs_f64());
    }

    /// Number of observations
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Format as Prometheus metric
    pub fn to_prometheus(&self) -> String {
        let mut output = format!(
            "# HELP {} {}\n# TYPE {} histogram\n",
            self.name, self.help, self.name
        );

        for (bound, count) in &self.buckets {
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                self.name, bound, count.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!(
            "{}_bucket{{le=\"+Inf\"}} {}\n",
            self.name,
            self.count()
        ));

        let sum_secs = self.sum.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        output.push_str(&format!("{}_sum {}\n", self.name, sum_secs));
        output.push_str(&format!("{}_count {}\n", self.name, self.count()));

        output
    }
}

/// Standard distort metrics
pub mod standard {
    use super::*;
    use std::sync::LazyLock;

    pub static FRAMES_RECEIVED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("distort_frames_received_total", "Frames read from peers")
    });

    pub static CHECKSUM_FAILURES: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("distort_checksum_failures_total", "Frames discarded for checksum mismatch")
    });

    pub static DECODE_FAILURES: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("distort_decode_failures_total", "Frames that could not be decoded")
    });

    pub static FRAMES_REJECTED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("distort_frames_rejected_total", "Frames refused by a full frame queue")
    });

    pub static DISPATCHES_RELAYED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("distort_dispatches_relayed_total", "Distort requests relayed to a worker")
    });

    pub static ROUTING_MISSES: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("distort_routing_misses_total", "Distort requests with no worker to route to")
    });

    pub static JOBS_COMPLETED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("distort_jobs_completed_total", "Jobs validated by the client")
    });

    pub static BYTES_RECEIVED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("distort_job_bytes_received_total", "Job payload bytes received by workers")
    });

    pub static REGISTERED_WORKERS: LazyLock<Gauge> = LazyLock::new(|| {
        Gauge::new("distort_registered_workers", "Workers currently in the registry")
    });

    pub static OPEN_CONNECTIONS: LazyLock<Gauge> = LazyLock::new(|| {
        Gauge::new("distort_open_connections", "Connections currently being served")
    });

    pub static FORWARD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new("distort_forward_duration_seconds", "Worker round trip for relayed requests")
    });
}

/// Helper to gather all standard metrics
pub fn gather_system_metrics() -> String {
    let mut output = String::new();

    // Counters
    output.push_str(&standard::FRAMES_RECEIVED.to_prometheus());
    output.push_str(&standard::CHECKSUM_FAILURES.to_prometheus());
    output.push_str(&standard::DECODE_FAILURES.to_prometheus());
    output.push_str(&standard::FRAMES_REJECTED.to_prometheus());
    output.push_str(&standard::DISPATCHES_RELAYED.to_prometheus());
    output.push_str(&standard::ROUTING_MISSES.to_prometheus());
    output.push_str(&standard::JOBS_COMPLETED.to_prometheus());
    output.push_str(&standard::BYTES_RECEIVED.to_prometheus());

    // Gauges
    output.push_str(&standard::REGISTERED_WORKERS.to_prometheus());
    output.push_str(&standard::OPEN_CONNECTIONS.to_prometheus());

    // Histograms
    output.push_str(&standard::FORWARD_DURATION.to_prometheus());

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new("test_counter", "Test counter");
        assert_eq!(counter.get(), 0);

        counter.inc();
        assert_eq!(counter.get(), 1);

        counter.inc_by(5);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new("test_gauge", "Test gauge");
        gauge.set(10);
        gauge.dec();
        assert_eq!(gauge.get(), 9);
        assert!(gauge.to_prometheus().contains("test_gauge 9"));
    }

    #[test]
    fn test_histogram() {
        let histogram = Histogram::new("test_histogram", "Test histogram");

        histogram.observe(0.001);
        histogram.observe(0.01);
        histogram.observe(0.1);

        let prometheus = histogram.to_prometheus();
        assert!(prometheus.contains("test_histogram_count 3"));
        assert!(prometheus.contains("le=\"+Inf\"} 3"));
    }

    #[test]
    fn test_gather_contains_every_family() {
        let text = gather_system_metrics();
        assert!(text.contains("distort_checksum_failures_total"));
        assert!(text.contains("distort_forward_duration_seconds_count"));
    }
}
