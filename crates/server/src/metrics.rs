//! Prometheus metrics: a single process-wide recorder installed at
//! startup. The recording helpers themselves live in
//! `voice_agent_core::metrics` so every crate in the workspace (engine
//! pools, the turn router, the egress path) can record against the same
//! `metrics` facade without depending on this binary crate.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the global recorder and returns the handle `/metrics` renders
/// from. Call once, before any `metrics::` macro invocation.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install prometheus recorder")
}
