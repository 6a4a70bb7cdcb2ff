//! Notification sink for the running service
//!
//! There is no UI to push events to; every account change and notification
//! becomes a structured log line and a `notifications_total` increment.

use session_pool::{AccountView, Notifier, Severity};
use tracing::{error, info, warn};

use crate::metrics;

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn account_changed(&self, index: usize, account: Option<&AccountView>) {
        match account {
            Some(view) => {
                metrics::record_notification("account_changed", "info");
                info!(
                    account_index = index,
                    account_id = %view.id,
                    status = view.status,
                    cooldowns = view.cooldowns.len(),
                    "account updated"
                );
            }
            None => {
                metrics::record_notification("account_deleted", "info");
                info!(account_index = index, "account removed");
            }
        }
    }

    fn notify(&self, title: &str, message: &str, severity: Severity) {
        metrics::record_notification("notification", severity.as_str());
        match severity {
            Severity::Info | Severity::Success => {
                info!(title, message, severity = %severity, "notification")
            }
            Severity::Warning => warn!(title, message, severity = %severity, "notification"),
            Severity::Error => error!(title, message, severity = %severity, "notification"),
        }
    }
}
