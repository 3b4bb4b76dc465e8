use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, exponential_buckets,
};
use std::time::{Duration, Instant};

use crate::errors::Result;
use crate::workload::OperationType;

// Re-export prometheus types for convenience
pub use prometheus::{Encoder, TextEncoder};

/// Content type of the text exposition format produced by [`LoadgenMetrics::collect`].
pub const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// All instruments for one load generator.
///
/// Each instance owns its own [`Registry`] rather than the process-wide default one, so
/// the controller hands out an `Arc<LoadgenMetrics>` to whatever needs to record.
pub struct LoadgenMetrics {
    registry: Registry,

    /// Currently open database connections
    pub nconns: IntGauge,

    /// Queries submitted, by operation type
    pub nqueries_started: IntCounterVec,

    /// Queries whose result (success or failure) was observed, by operation type
    pub nqueries_done: IntCounterVec,

    /// Queries that failed, by operation type
    pub nqueries_failed: IntCounterVec,

    /// Operations never submitted because the max id was still unknown
    pub nqueries_skipped: IntCounterVec,

    /// Occurrences of each distinct error message
    pub error_messages: IntCounterVec,

    /// Query latency in microseconds, by operation type and result
    pub query_latency_us: HistogramVec,
}

impl LoadgenMetrics {
    /// Register every instrument. `target` describes the database and becomes a constant
    /// label on the connection gauge.
    pub fn new(target: &str) -> Result<Self> {
        // 100us, 250us, 625us, ... ~5.9s
        let latency_buckets = exponential_buckets(100.0, 2.5, 12)?;
        let registry = Registry::new();

        let nconns = IntGauge::with_opts(
            Opts::new("pgloadgen_nconns", "count of open connections")
                .const_label("target", target),
        )?;
        let nqueries_started = IntCounterVec::new(
            Opts::new("pgloadgen_nqueries_started", "count of queries started"),
            &["type"],
        )?;
        let nqueries_done = IntCounterVec::new(
            Opts::new("pgloadgen_nqueries_done", "count of queries completed"),
            &["type"],
        )?;
        let nqueries_failed = IntCounterVec::new(
            Opts::new("pgloadgen_nqueries_failed", "count of queries that failed"),
            &["type"],
        )?;
        let nqueries_skipped = IntCounterVec::new(
            Opts::new(
                "pgloadgen_nqueries_skipped",
                "count of operations skipped because no max id is known yet",
            ),
            &["type"],
        )?;
        let error_messages = IntCounterVec::new(
            Opts::new("pgloadgen_error_messages", "count of each error message"),
            &["error_message"],
        )?;
        let query_latency_us = HistogramVec::new(
            HistogramOpts::new("pgloadgen_query_latency_us", "query latency in microseconds")
                .buckets(latency_buckets),
            &["type", "result"],
        )?;

        registry.register(Box::new(nconns.clone()))?;
        registry.register(Box::new(nqueries_started.clone()))?;
        registry.register(Box::new(nqueries_done.clone()))?;
        registry.register(Box::new(nqueries_failed.clone()))?;
        registry.register(Box::new(nqueries_skipped.clone()))?;
        registry.register(Box::new(error_messages.clone()))?;
        registry.register(Box::new(query_latency_us.clone()))?;

        tracing::debug!(
            "Metrics initialized with {} registered metrics",
            registry.gather().len()
        );

        Ok(Self {
            registry,
            nconns,
            nqueries_started,
            nqueries_done,
            nqueries_failed,
            nqueries_skipped,
            error_messages,
            query_latency_us,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Count a query as started and begin timing it.
    pub fn start_query(&self, kind: OperationType) -> QueryTimer<'_> {
        self.nqueries_started
            .with_label_values(&[kind.as_str()])
            .inc();
        QueryTimer {
            metrics: self,
            kind,
            start: Instant::now(),
        }
    }

    /// Record the completion of a query that took `elapsed`.
    ///
    /// "done" is bumped before "failed" so a concurrent scrape never sees more failures
    /// than completions.
    pub fn record_completion(&self, kind: OperationType, result: &Result<()>, elapsed: Duration) {
        let label = kind.as_str();
        self.nqueries_done.with_label_values(&[label]).inc();
        let outcome = match result {
            Ok(()) => "ok",
            Err(err) => {
                self.nqueries_failed.with_label_values(&[label]).inc();
                self.error_messages
                    .with_label_values(&[err.to_string().as_str()])
                    .inc();
                "error"
            }
        };
        self.query_latency_us
            .with_label_values(&[label, outcome])
            .observe(elapsed.as_micros() as f64);
    }

    pub fn record_skip(&self, kind: OperationType) {
        self.nqueries_skipped
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    /// Render every instrument in the Prometheus text exposition format.
    pub fn collect(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Measures one in-flight query. Dropping it without calling [`QueryTimer::finish`]
/// leaves the query counted as started but never completed.
pub struct QueryTimer<'a> {
    metrics: &'a LoadgenMetrics,
    kind: OperationType,
    start: Instant,
}

impl QueryTimer<'_> {
    /// Stop the clock and record the outcome. Returns the elapsed time.
    pub fn finish(self, result: &Result<()>) -> Duration {
        let elapsed = self.start.elapsed();
        self.metrics.record_completion(self.kind, result, elapsed);
        elapsed
    }
}
