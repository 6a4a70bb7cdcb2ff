//! Lifecycle event sink
//!
//! The pool reports every account mutation and the scheduler's notable
//! outcomes here. Calls are synchronous, fire-and-forget, and made after the
//! registry lock is released; implementations must not block.

use std::fmt;

use serde::Serialize;

use crate::pool::AccountView;

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Notifier: Send + Sync {
    /// An account at `index` was created or updated (`Some`) or deleted (`None`).
    fn account_changed(&self, index: usize, account: Option<&AccountView>);

    fn notify(&self, title: &str, message: &str, severity: Severity);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn account_changed(&self, _index: usize, _account: Option<&AccountView>) {}

    fn notify(&self, _title: &str, _message: &str, _severity: Severity) {}
}
