//! Prometheus metrics exposition
//!
//! The pool crate records its own series through the `metrics` facade
//! (`pool_accounts_total`, `pool_accounts_selectable`, `pool_cooldowns_total`,
//! `pool_accounts_deleted_total`, `health_check_probes_total`,
//! `tokens_minted_total`, `health_check_sweep_duration_seconds`). This module
//! installs the recorder that collects them and adds the service's own:
//!
//! - `notifications_total` (counter): labels `kind`, `severity`
//! - `admin_requests_total` (counter): labels `route`, `status`

use anyhow::Context;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Sweeps probe accounts serially with a pause between probes, so a sweep over
/// a large pool takes minutes.
const SWEEP_BUCKETS: &[f64] = &[
    0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0,
];

fn builder() -> anyhow::Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("health_check_sweep_duration_seconds".to_string()),
            SWEEP_BUCKETS,
        )
        .context("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `health_check_sweep_duration_seconds` gets explicit buckets so it renders
/// as a histogram with `_bucket` lines instead of a summary.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Record a notification emitted by the pool or the health checker.
pub fn record_notification(kind: &'static str, severity: &'static str) {
    metrics::counter!("notifications_total", "kind" => kind, "severity" => severity).increment(1);
}

/// Record an admin API call with its response status.
pub fn record_admin_request(route: &'static str, status: u16) {
    metrics::counter!("admin_requests_total", "route" => route, "status" => status.to_string())
        .increment(1);
}
