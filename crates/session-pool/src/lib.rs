//! Credential pool for cookie-authenticated upstream sessions
//!
//! Keeps the ordered registry of accounts with their runtime state, decides
//! which account may serve a capability, and retires accounts that stop
//! working. Token minting itself lives in `session-auth`; this crate decides
//! *which* account to mint for and what a failure means for it.
//!
//! Account lifecycle:
//! 1. Loaded from the account document, or added through `Pool::add_account`
//! 2. `Pool::select(capability)` returns the first selectable account
//! 3. The caller mints a token (`Pool::mint_token`) and calls upstream
//! 4. A failure is reported through `Pool::report_failure`, which applies a
//!    whole-account or per-capability cooldown
//! 5. Cooldowns lapse on their own once their deadline passes
//! 6. `HealthChecker` probes every account on a timer and retires or deletes
//!    the ones that fail
//!
//! Every mutation is saved through `Persistence` and reported to `Notifier`.

pub mod cooldown;
pub mod error;
pub mod health;
mod metrics;
pub mod notify;
pub mod pool;
pub mod store;

pub use cooldown::{
    Cooldown, CooldownClass, CooldownPolicy, CooldownScope, QuotaKind, RuntimeState,
    seconds_until_next_pt_midnight,
};
pub use error::{Error, Result};
pub use health::{
    DEFAULT_PROBE_DELAY, HealthCheckStatus, HealthChecker, HealthReport, ProbeResult,
    RunSummary, SchedulerState,
};
pub use notify::{NoopNotifier, Notifier, Severity};
pub use pool::{AccountView, CooldownView, Pool, SelectedAccount};
pub use store::{
    Availability, Document, JsonFileStore, Persistence, PoolSettings, Snapshot, StoredAccount,
};
