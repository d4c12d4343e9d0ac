//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the transfer engine.
//!
//! # Metrics
//!
//! - `ledger_transfers_total` - Committed transfers
//! - `ledger_transfer_failures_total{kind}` - Failed transfers by error kind
//! - `ledger_transfer_amount_total` - Sum of committed transfer amounts
//! - `ledger_transfer_duration_seconds` - Histogram of transfer latencies

use crate::error::ErrorKind;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct LedgerMetrics {
    /// Committed transfers
    pub transfers_total: IntCounter,

    /// Failed transfers, labelled by error kind
    pub transfer_failures: IntCounterVec,

    /// Sum of committed amounts (smallest currency unit)
    pub amount_total: IntCounter,

    /// Transfer duration histogram
    pub transfer_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl LedgerMetrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transfers_total =
            IntCounter::new("ledger_transfers_total", "Total number of committed transfers")?;
        registry.register(Box::new(transfers_total.clone()))?;

        let transfer_failures = IntCounterVec::new(
            Opts::new(
                "ledger_transfer_failures_total",
                "Failed transfers by error kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(transfer_failures.clone()))?;

        let amount_total = IntCounter::new(
            "ledger_transfer_amount_total",
            "Sum of committed transfer amounts",
        )?;
        registry.register(Box::new(amount_total.clone()))?;

        let transfer_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_transfer_duration_seconds",
                "Histogram of transfer latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(transfer_duration.clone()))?;

        Ok(Self {
            transfers_total,
            transfer_failures,
            amount_total,
            transfer_duration,
            registry,
        })
    }

    /// Record a committed transfer
    pub fn record_transfer(&self, amount: i64, duration_seconds: f64) {
        self.transfers_total.inc();
        self.amount_total.inc_by(amount.max(0) as u64);
        self.transfer_duration.observe(duration_seconds);
    }

    /// Record a failed transfer
    pub fn record_failure(&self, kind: ErrorKind, duration_seconds: f64) {
        self.transfer_failures
            .with_label_values(&[kind.as_str()])
            .inc();
        self.transfer_duration.observe(duration_seconds);
    }

    /// Failures recorded for one kind
    pub fn failures(&self, kind: ErrorKind) -> u64 {
        self.transfer_failures
            .with_label_values(&[kind.as_str()])
            .get()
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = LedgerMetrics::new().unwrap();
        assert_eq!(metrics.transfers_total.get(), 0);
        assert_eq!(metrics.failures(ErrorKind::Conflict), 0);
    }

    #[test]
    fn test_independent_registries() {
        let first = LedgerMetrics::new().unwrap();
        let second = LedgerMetrics::new().unwrap();

        first.record_transfer(30, 0.001);
        assert_eq!(first.transfers_total.get(), 1);
        assert_eq!(second.transfers_total.get(), 0);
    }

    #[test]
    fn test_record_transfer_and_failure() {
        let metrics = LedgerMetrics::new().unwrap();
        metrics.record_transfer(30, 0.002);
        metrics.record_transfer(20, 0.003);
        metrics.record_failure(ErrorKind::InvalidInput, 0.0);

        assert_eq!(metrics.transfers_total.get(), 2);
        assert_eq!(metrics.amount_total.get(), 50);
        assert_eq!(metrics.failures(ErrorKind::InvalidInput), 1);
        assert_eq!(metrics.transfer_duration.get_sample_count(), 3);
        assert!(!metrics.registry().gather().is_empty());
    }
}
