//! Prometheus metrics for the token index
//!
//! # Metrics
//!
//! - `token_index_transactions_total` - Transactions processed
//! - `token_index_snapshots_total` - Balance snapshots appended
//! - `token_index_snapshots_skipped_total` - Snapshots already present (replays)
//! - `token_index_malformed_amounts_total` - Amounts dropped as malformed
//! - `token_index_unresolved_inputs_total` - Consumed records with no known owner
//! - `token_index_block_duration_seconds` - Block ingestion latency
//! - `token_index_plans_total` - Insertion plans computed
//! - `token_index_registrations_rejected_total` - Duplicate registrations
//! - `token_index_registry_nodes` - Nodes in the current registry view

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector
///
/// Each collector owns its registry, so several indexes can live in one
/// process.
#[derive(Clone)]
pub struct Metrics {
    /// Transactions processed
    pub transactions_total: IntCounter,

    /// Snapshots appended
    pub snapshots_total: IntCounter,

    /// Snapshots skipped because they already existed
    pub snapshots_skipped: IntCounter,

    /// Amounts dropped as malformed
    pub malformed_amounts: IntCounter,

    /// Inputs the resolver could not place
    pub unresolved_inputs: IntCounter,

    /// Block ingestion latency
    pub block_duration: Histogram,

    /// Insertion plans computed
    pub plans_total: IntCounter,

    /// Duplicate registrations rejected
    pub registrations_rejected: IntCounter,

    /// Registry view size
    pub registry_nodes: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("transactions_total", &self.transactions_total.get())
            .field("snapshots_total", &self.snapshots_total.get())
            .field("registry_nodes", &self.registry_nodes.get())
            .finish()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let transactions_total =
            counter("token_index_transactions_total", "Transactions processed")?;
        let snapshots_total = counter("token_index_snapshots_total", "Balance snapshots appended")?;
        let snapshots_skipped = counter(
            "token_index_snapshots_skipped_total",
            "Snapshots already present for the transaction",
        )?;
        let malformed_amounts = counter(
            "token_index_malformed_amounts_total",
            "Amounts dropped as malformed",
        )?;
        let unresolved_inputs = counter(
            "token_index_unresolved_inputs_total",
            "Consumed records with no known owner",
        )?;
        let plans_total = counter("token_index_plans_total", "Insertion plans computed")?;
        let registrations_rejected = counter(
            "token_index_registrations_rejected_total",
            "Registrations rejected as duplicates",
        )?;

        let block_duration = Histogram::with_opts(
            HistogramOpts::new(
                "token_index_block_duration_seconds",
                "Block ingestion latency",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(block_duration.clone()))?;

        let registry_nodes = IntGauge::new(
            "token_index_registry_nodes",
            "Nodes in the current registry view",
        )?;
        registry.register(Box::new(registry_nodes.clone()))?;

        Ok(Self {
            transactions_total,
            snapshots_total,
            snapshots_skipped,
            malformed_amounts,
            unresolved_inputs,
            block_duration,
            plans_total,
            registrations_rejected,
            registry_nodes,
            registry,
        })
    }

    /// Record one ingested block
    pub fn record_block(&self, transactions: usize, duration_secs: f64) {
        self.transactions_total.inc_by(transactions as u64);
        self.block_duration.observe(duration_secs);
    }

    /// Record appended and skipped snapshots
    pub fn record_snapshots(&self, appended: usize, skipped: usize) {
        self.snapshots_total.inc_by(appended as u64);
        self.snapshots_skipped.inc_by(skipped as u64);
    }

    /// Render in the Prometheus text format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.snapshots_total.get(), 0);
        assert_eq!(metrics.registry_nodes.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        // Each collector registers the same names without clashing
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();

        first.record_snapshots(3, 1);
        assert_eq!(first.snapshots_total.get(), 3);
        assert_eq!(first.snapshots_skipped.get(), 1);
        assert_eq!(second.snapshots_total.get(), 0);
    }

    #[test]
    fn test_render() {
        let metrics = Metrics::new().unwrap();
        metrics.record_block(2, 0.004);
        let text = metrics.render().unwrap();
        assert!(text.contains("token_index_transactions_total 2"));
        assert!(text.contains("token_index_block_duration_seconds_bucket"));
    }
}
