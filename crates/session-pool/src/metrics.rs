//! Pool metrics, recorded through the `metrics` facade
//!
//! - `pool_accounts_total` (gauge)
//! - `pool_accounts_selectable` (gauge): available and not under a
//!   whole-account cooldown
//! - `pool_cooldowns_total` (counter): label `class`
//! - `pool_accounts_deleted_total` (counter): label `reason`
//! - `health_check_probes_total` (counter): label `outcome`
//! - `tokens_minted_total` (counter): label `outcome`
//! - `health_check_sweep_duration_seconds` (histogram)
//!
//! The binary installs the Prometheus recorder; without one these are no-ops.

pub(crate) fn record_pool_size(total: usize, selectable: usize) {
    metrics::gauge!("pool_accounts_total").set(total as f64);
    metrics::gauge!("pool_accounts_selectable").set(selectable as f64);
}

pub(crate) fn record_cooldown(class: &'static str) {
    metrics::counter!("pool_cooldowns_total", "class" => class).increment(1);
}

pub(crate) fn record_deleted(reason: &'static str) {
    metrics::counter!("pool_accounts_deleted_total", "reason" => reason).increment(1);
}

pub(crate) fn record_probe(outcome: &'static str) {
    metrics::counter!("health_check_probes_total", "outcome" => outcome).increment(1);
}

pub(crate) fn record_mint(outcome: &'static str) {
    metrics::counter!("tokens_minted_total", "outcome" => outcome).increment(1);
}

pub(crate) fn record_sweep(duration_secs: f64) {
    metrics::histogram!("health_check_sweep_duration_seconds").record(duration_secs);
}
