//! # Prometheus Metrics
//!
//! Operational metrics for the application. The node binary exposes them at
//! `/metrics` when instrumentation is enabled in the settings document.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};

/// Holds all Prometheus metric handles for the application.
///
/// Prometheus handles are internally reference counted, so cloning is cheap
/// and every clone updates the same series.
#[derive(Clone)]
pub struct AppMetrics {
    registry: Registry,
    /// Blocks committed since process start.
    pub blocks_committed_total: IntCounter,
    /// Transactions staged by DeliverTx.
    pub txs_delivered_total: IntCounter,
    /// Transactions rejected by DeliverTx or CheckTx.
    pub txs_rejected_total: IntCounter,
    /// CheckTx calls.
    pub check_tx_total: IntCounter,
    /// Last committed height.
    pub committed_height: IntGauge,
    /// Wall time spent inside Commit.
    pub commit_duration_seconds: Histogram,
    /// Open transport connections.
    pub connections_open: IntGauge,
}

impl AppMetrics {
    /// Creates and registers all metrics.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some(crate::config::APP_NAME.into()), None)?;

        let blocks_committed_total =
            IntCounter::new("blocks_committed_total", "Total number of committed blocks")?;
        registry.register(Box::new(blocks_committed_total.clone()))?;

        let txs_delivered_total = IntCounter::new(
            "txs_delivered_total",
            "Total number of transactions staged by DeliverTx",
        )?;
        registry.register(Box::new(txs_delivered_total.clone()))?;

        let txs_rejected_total = IntCounter::new(
            "txs_rejected_total",
            "Total number of malformed or duplicate transactions rejected",
        )?;
        registry.register(Box::new(txs_rejected_total.clone()))?;

        let check_tx_total = IntCounter::new("check_tx_total", "Total number of CheckTx calls")?;
        registry.register(Box::new(check_tx_total.clone()))?;

        let committed_height = IntGauge::new("committed_height", "Last committed block height")?;
        registry.register(Box::new(committed_height.clone()))?;

        let commit_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("commit_duration_seconds", "Time spent committing a block")
                .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(commit_duration_seconds.clone()))?;

        let connections_open =
            IntGauge::new("connections_open", "Currently open transport connections")?;
        registry.register(Box::new(connections_open.clone()))?;

        Ok(Self {
            registry,
            blocks_committed_total,
            txs_delivered_total,
            txs_rejected_total,
            check_tx_total,
            committed_height,
            commit_duration_seconds,
            connections_open,
        })
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for AppMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppMetrics")
            .field("committed_height", &self.committed_height.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_registered_series() {
        let metrics = AppMetrics::new().unwrap();
        metrics.blocks_committed_total.inc();
        metrics.committed_height.set(42);

        let text = metrics.encode().unwrap();
        assert!(text.contains("kvchain_blocks_committed_total 1"));
        assert!(text.contains("kvchain_committed_height 42"));
    }
}
