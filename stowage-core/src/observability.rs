/*!
Observability infrastructure for Stowage.

This module provides:
- Structured JSON logging through `tracing-subscriber`
- Prometheus metrics for adapters and migrations (`metrics` feature)
*/

#[cfg(feature = "metrics")]
use prometheus::{CounterVec, Encoder, Histogram, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use std::time::Instant;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{Result, StowageError};

/// Directive applied on top of `RUST_LOG` by [`init_default_observability`]
pub const DEFAULT_LOG_DIRECTIVE: &str = "stowage=info";

#[cfg(feature = "metrics")]
static METRICS: OnceLock<Option<StowageMetrics>> = OnceLock::new();

/// Metrics collection for Stowage operations
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct StowageMetrics {
    pub adapter_reads_total: CounterVec,
    pub adapter_writes_total: CounterVec,
    pub adapter_errors_total: CounterVec,
    pub adapter_latency_seconds: HistogramVec,
    pub migrations_total: CounterVec,
    pub payload_size_bytes: Histogram,

    registry: Registry,
}

#[cfg(feature = "metrics")]
fn metric_error(name: &str, e: prometheus::Error) -> StowageError {
    StowageError::validation(format!("Failed to set up metric {name}: {e}"))
}

#[cfg(feature = "metrics")]
impl StowageMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let adapter_reads_total = CounterVec::new(
            Opts::new("stowage_adapter_reads_total", "Total adapter reads"),
            &["adapter"],
        )
        .map_err(|e| metric_error("stowage_adapter_reads_total", e))?;

        let adapter_writes_total = CounterVec::new(
            Opts::new("stowage_adapter_writes_total", "Total adapter writes"),
            &["adapter"],
        )
        .map_err(|e| metric_error("stowage_adapter_writes_total", e))?;

        let adapter_errors_total = CounterVec::new(
            Opts::new("stowage_adapter_errors_total", "Total failed adapter operations"),
            &["adapter", "operation"],
        )
        .map_err(|e| metric_error("stowage_adapter_errors_total", e))?;

        let adapter_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "stowage_adapter_latency_seconds",
                "Duration of adapter operations in seconds",
            ),
            &["adapter", "operation"],
        )
        .map_err(|e| metric_error("stowage_adapter_latency_seconds", e))?;

        let migrations_total = CounterVec::new(
            Opts::new("stowage_migrations_total", "Total migration steps applied"),
            &["direction"],
        )
        .map_err(|e| metric_error("stowage_migrations_total", e))?;

        let payload_size_bytes = Histogram::with_opts(
            HistogramOpts::new("stowage_payload_size_bytes", "Size of encoded payloads in bytes")
                .buckets(prometheus::exponential_buckets(64.0, 4.0, 10).map_err(|e| {
                    metric_error("stowage_payload_size_bytes", e)
                })?),
        )
        .map_err(|e| metric_error("stowage_payload_size_bytes", e))?;

        registry
            .register(Box::new(adapter_reads_total.clone()))
            .map_err(|e| metric_error("stowage_adapter_reads_total", e))?;
        registry
            .register(Box::new(adapter_writes_total.clone()))
            .map_err(|e| metric_error("stowage_adapter_writes_total", e))?;
        registry
            .register(Box::new(adapter_errors_total.clone()))
            .map_err(|e| metric_error("stowage_adapter_errors_total", e))?;
        registry
            .register(Box::new(adapter_latency_seconds.clone()))
            .map_err(|e| metric_error("stowage_adapter_latency_seconds", e))?;
        registry
            .register(Box::new(migrations_total.clone()))
            .map_err(|e| metric_error("stowage_migrations_total", e))?;
        registry
            .register(Box::new(payload_size_bytes.clone()))
            .map_err(|e| metric_error("stowage_payload_size_bytes", e))?;

        Ok(Self {
            adapter_reads_total,
            adapter_writes_total,
            adapter_errors_total,
            adapter_latency_seconds,
            migrations_total,
            payload_size_bytes,
            registry,
        })
    }

    /// Global metrics instance; `None` if the registry could not be built
    pub fn global() -> Option<&'static StowageMetrics> {
        METRICS
            .get_or_init(|| match Self::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to initialize Stowage metrics");
                    None
                }
            })
            .as_ref()
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| StowageError::validation(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer).map_err(|e| {
            StowageError::validation(format!("Failed to convert metrics to string: {e}"))
        })
    }
}

/// Record one applied migration step
pub(crate) fn record_migration(_direction: &str) {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = StowageMetrics::global() {
        metrics.migrations_total.with_label_values(&[_direction]).inc();
    }
}

/// Times one adapter operation and records its outcome
pub(crate) struct OperationTimer {
    start: Instant,
    adapter: String,
    operation: &'static str,
}

impl OperationTimer {
    pub(crate) fn start(adapter: &str, operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            adapter: adapter.to_string(),
            operation,
        }
    }

    /// Complete a read or write, recording latency and the payload size
    pub(crate) fn finish(self, _payload_size: Option<usize>) {
        let elapsed = self.start.elapsed();
        tracing::trace!(
            adapter = %self.adapter,
            operation = self.operation,
            elapsed_us = elapsed.as_micros() as u64,
            "Adapter operation finished"
        );

        #[cfg(feature = "metrics")]
        if let Some(metrics) = StowageMetrics::global() {
            metrics
                .adapter_latency_seconds
                .with_label_values(&[self.adapter.as_str(), self.operation])
                .observe(elapsed.as_secs_f64());
            match self.operation {
                "read" => metrics
                    .adapter_reads_total
                    .with_label_values(&[self.adapter.as_str()])
                    .inc(),
                "write" => metrics
                    .adapter_writes_total
                    .with_label_values(&[self.adapter.as_str()])
                    .inc(),
                _ => {}
            }
            if let Some(size) = _payload_size {
                metrics.payload_size_bytes.observe(size as f64);
            }
        }
    }

    /// Complete the timer with an error
    pub(crate) fn finish_with_error(self) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = StowageMetrics::global() {
            metrics
                .adapter_errors_total
                .with_label_values(&[self.adapter.as_str(), self.operation])
                .inc();
        }
        self.finish(None);
    }
}

/// Initialize the global tracing subscriber with JSON output.
///
/// `directive` is added on top of `RUST_LOG`, e.g. `"stowage=debug"`.
pub fn init_observability(directive: &str) -> Result<()> {
    #[cfg(feature = "metrics")]
    StowageMetrics::global();

    let directive = directive
        .parse::<tracing_subscriber::filter::Directive>()
        .map_err(|e| StowageError::validation(format!("Invalid log directive '{directive}': {e}")))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(false);

    let subscriber = TracingRegistry::default()
        .with(EnvFilter::from_default_env().add_directive(directive))
        .with(fmt_layer);

    set_global_default(subscriber).map_err(|e| {
        StowageError::validation(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::info!("Stowage observability system initialized");
    Ok(())
}

/// Initialize observability with default settings
pub fn init_default_observability() -> Result<()> {
    init_observability(DEFAULT_LOG_DIRECTIVE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_directive_is_rejected() {
        let err = init_observability("stowage=[[[").unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_timer_without_metrics_backend() {
        let timer = OperationTimer::start("memory", "read");
        timer.finish(Some(128));
        OperationTimer::start("memory", "write").finish_with_error();
        record_migration("up");
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_metrics_gathering() {
        let metrics = StowageMetrics::global().unwrap();

        OperationTimer::start("memory", "write").finish(Some(512));
        OperationTimer::start("memory", "read").finish_with_error();
        record_migration("down");

        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("stowage_adapter_writes_total"));
        assert!(text.contains("stowage_adapter_errors_total"));
        assert!(text.contains("stowage_migrations_total"));
    }
}
