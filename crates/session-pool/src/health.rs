//! Health-check scheduler
//!
//! Probes every account by running the full handshake and signing path, then
//! feeds the outcome back into the pool:
//!
//! - success → clear the unavailability flag (cooldowns are left alone)
//! - rate limited → counted as a success, nothing changes
//! - missing cookie fields, auth failure, any other failure → delete the
//!   account when auto-delete is on, otherwise mark it unavailable
//!
//! A sweep walks indexes from the highest down, so deleting the account just
//! probed never shifts one not yet visited. Probes within a sweep are spaced
//! by `probe_delay`, with no delay after the last one.
//!
//! One scheduler task runs at most. It sweeps immediately on start, then once
//! per interval. Every sweep, scheduled or on demand, holds a child of one
//! stop token. Stopping cancels it, which is observed before each probe and
//! during every sleep; a probe already in flight runs to completion (bounded
//! by the handshake timeout).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use session_auth::FailureKind;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::notify::Severity;
use crate::pool::{Pool, SelectedAccount};

/// Pause between probes within one sweep.
pub const DEFAULT_PROBE_DELAY: Duration = Duration::from_secs(2);

/// Outcome of probing one account.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    /// Index at probe time
    pub account_index: usize,
    pub account_id: String,
    pub team_id: String,
    /// True for a working account, including a rate-limited one
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub rate_limited: bool,
    pub deleted: bool,
}

/// Aggregate of one sweep.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub auto_delete: bool,
    pub checked: usize,
    pub succeeded: usize,
    pub deleted: usize,
    /// The sweep stopped early on a stop request
    pub aborted: bool,
    /// Ascending by index at probe time
    pub results: Vec<ProbeResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Stopped,
    Running,
    Stopping,
}

/// Answer to a status query.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckStatus {
    pub running: bool,
    pub state: SchedulerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_delete: Option<bool>,
    pub last_run_time: Option<DateTime<Utc>>,
    pub last_run_results: Vec<ProbeResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<RunSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub checked: usize,
    pub succeeded: usize,
    pub deleted: usize,
    pub aborted: bool,
}

struct Shared {
    pool: Arc<Pool>,
    probe_delay: Duration,
    state: RwLock<SchedulerState>,
    last_run: RwLock<Option<HealthReport>>,
}

#[derive(Default)]
struct Control {
    /// Parent of every sweep's token; replaced after each stop.
    stop_signal: CancellationToken,
    handle: Option<JoinHandle<()>>,
    interval_minutes: u64,
    auto_delete: bool,
}

/// Owner of the scheduler task and its last-run snapshot.
pub struct HealthChecker {
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

impl HealthChecker {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self::with_probe_delay(pool, DEFAULT_PROBE_DELAY)
    }

    pub fn with_probe_delay(pool: Arc<Pool>, probe_delay: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                pool,
                probe_delay,
                state: RwLock::new(SchedulerState::Stopped),
                last_run: RwLock::new(None),
            }),
            control: Mutex::new(Control::default()),
        }
    }

    /// Start the periodic sweep. Returns false if it is already running.
    pub async fn start(&self, interval_minutes: u64, auto_delete: bool) -> bool {
        let mut control = self.control.lock().await;
        if control.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            info!("health check scheduler already running");
            return false;
        }

        let interval_minutes = interval_minutes.max(1);
        let interval = Duration::from_secs(interval_minutes * 60);
        let token = control.stop_signal.child_token();
        *self.shared.state.write().await = SchedulerState::Running;

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            shared.run_loop(interval, auto_delete, token).await;
        });

        control.handle = Some(handle);
        control.interval_minutes = interval_minutes;
        control.auto_delete = auto_delete;
        info!(interval_minutes, auto_delete, "health check scheduler started");
        true
    }

    /// Stop the scheduler and wait for its task to exit. A `run_once` sweep in
    /// progress is aborted too. Returns false if the scheduler was not
    /// running.
    pub async fn stop(&self) -> bool {
        let mut control = self.control.lock().await;
        let handle = control.handle.take().filter(|h| !h.is_finished());
        if handle.is_some() {
            info!("stopping health check scheduler");
            *self.shared.state.write().await = SchedulerState::Stopping;
        }
        std::mem::take(&mut control.stop_signal).cancel();

        let Some(handle) = handle else {
            info!("health check scheduler not running");
            *self.shared.state.write().await = SchedulerState::Stopped;
            return false;
        };
        if let Err(e) = handle.await {
            warn!(error = %e, "health check task ended abnormally");
        }
        *self.shared.state.write().await = SchedulerState::Stopped;
        true
    }

    pub async fn status(&self) -> HealthCheckStatus {
        let (running, interval_minutes, auto_delete) = {
            let control = self.control.lock().await;
            let running = control.handle.as_ref().is_some_and(|h| !h.is_finished());
            (
                running,
                running.then_some(control.interval_minutes),
                running.then_some(control.auto_delete),
            )
        };
        let state = *self.shared.state.read().await;
        let last_run = self.shared.last_run.read().await;
        HealthCheckStatus {
            running,
            state,
            interval_minutes,
            auto_delete,
            last_run_time: last_run.as_ref().map(|r| r.finished_at),
            last_run_results: last_run
                .as_ref()
                .map(|r| r.results.clone())
                .unwrap_or_default(),
            last_run: last_run.as_ref().map(|r| RunSummary {
                checked: r.checked,
                succeeded: r.succeeded,
                deleted: r.deleted,
                aborted: r.aborted,
            }),
        }
    }

    /// Run one sweep now and wait for it. A `stop` issued meanwhile ends it
    /// early, with `aborted` set on the report.
    pub async fn run_once(&self, auto_delete: bool) -> HealthReport {
        let cancel = self.control.lock().await.stop_signal.child_token();
        let report = self.shared.sweep(auto_delete, &cancel).await;
        self.shared.record(report.clone()).await;
        report
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        self.control.get_mut().stop_signal.cancel();
    }
}

impl Shared {
    async fn run_loop(&self, interval: Duration, auto_delete: bool, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let report = self.sweep(auto_delete, &cancel).await;
            self.record(report).await;

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(interval) => {}
            }
        }
        *self.state.write().await = SchedulerState::Stopped;
        info!("health check scheduler stopped");
    }

    async fn record(&self, report: HealthReport) {
        *self.last_run.write().await = Some(report);
    }

    async fn sweep(&self, auto_delete: bool, cancel: &CancellationToken) -> HealthReport {
        let started_at = Utc::now();
        let total = self.pool.len().await;
        let mut results = Vec::with_capacity(total);
        let mut aborted = false;

        if total == 0 {
            info!("no accounts to check");
        } else {
            info!(accounts = total, auto_delete, "health check sweep started");
        }

        for index in (0..total).rev() {
            if cancel.is_cancelled() {
                info!(remaining = index + 1, "stop requested, aborting sweep");
                aborted = true;
                break;
            }

            if let Some(result) = self.probe(index, auto_delete).await {
                results.push(result);
            }

            if index > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.probe_delay) => {}
                }
            }
        }
        results.reverse();

        let finished_at = Utc::now();
        metrics::record_sweep((finished_at - started_at).num_milliseconds() as f64 / 1000.0);

        let succeeded = results.iter().filter(|r| r.success).count();
        let deleted = results.iter().filter(|r| r.deleted).count();
        info!(
            checked = results.len(),
            succeeded, deleted, aborted, "health check sweep finished"
        );

        HealthReport {
            started_at,
            finished_at,
            auto_delete,
            checked: results.len(),
            succeeded,
            deleted,
            aborted,
            results,
        }
    }

    /// Probe one account. `None` if the index no longer exists.
    async fn probe(&self, index: usize, auto_delete: bool) -> Option<ProbeResult> {
        let selected = self.pool.account_at(index).await?;

        let missing = selected.account.missing_fields();
        if !missing.is_empty() {
            let reason = format!("incomplete session cookies: missing {}", missing.join(", "));
            return Some(self.fail(&selected, reason, auto_delete).await);
        }

        let outcome = self
            .pool
            .minter()
            .mint(&selected.account, selected.proxy.as_deref())
            .await;

        match outcome {
            Ok(_) => {
                metrics::record_probe("success");
                info!(account_index = index, account_id = %selected.id(), "probe succeeded");
                if let Err(e) = self.pool.set_available(index, Some(selected.id())).await {
                    debug!(account_id = %selected.id(), error = %e, "account gone after probe");
                }
                Some(result(&selected, true, Some("ok".into()), None, false))
            }
            Err(e) if e.kind() == FailureKind::RateLimit => {
                metrics::record_probe("rate_limited");
                warn!(account_index = index, account_id = %selected.id(), error = %e, "probe rate limited");
                let mut r = result(&selected, true, Some(format!("rate limited: {e}")), None, false);
                r.rate_limited = true;
                Some(r)
            }
            Err(e) => {
                let reason = match e.kind() {
                    FailureKind::Auth => format!("authentication failed: {e}"),
                    _ => format!("probe failed: {e}"),
                };
                Some(self.fail(&selected, reason, auto_delete).await)
            }
        }
    }

    /// Delete or retire a failing account.
    async fn fail(&self, selected: &SelectedAccount, reason: String, auto_delete: bool) -> ProbeResult {
        metrics::record_probe("failure");
        warn!(
            account_index = selected.index,
            account_id = %selected.id(),
            reason = %reason,
            "probe failed"
        );

        if !auto_delete {
            if let Err(e) = self
                .pool
                .set_unavailable(selected.index, Some(selected.id()), reason.clone())
                .await
            {
                debug!(account_id = %selected.id(), error = %e, "account gone before it could be retired");
            }
            return result(selected, false, None, Some(reason), false);
        }

        match self
            .pool
            .remove(selected.index, Some(selected.id()), "health_check")
            .await
        {
            Ok((index, account)) => {
                self.pool.notifier().notify(
                    "Account auto-deleted",
                    &format!(
                        "account {index} ({}) failed its health check and was deleted: {reason}",
                        account.team_id
                    ),
                    Severity::Warning,
                );
                result(selected, false, None, Some(reason), true)
            }
            Err(e) => {
                debug!(account_id = %selected.id(), error = %e, "account gone before it could be deleted");
                result(selected, false, None, Some(reason), false)
            }
        }
    }
}

fn result(
    selected: &SelectedAccount,
    success: bool,
    message: Option<String>,
    error: Option<String>,
    deleted: bool,
) -> ProbeResult {
    ProbeResult {
        account_index: selected.index,
        account_id: selected.account.id.clone(),
        team_id: selected.account.team_id.clone(),
        success,
        message,
        error,
        rate_limited: false,
        deleted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooldown::{CooldownPolicy, QuotaKind};
    use crate::notify::testing::{Event, RecordingNotifier};
    use crate::store::Document;
    use crate::store::testing::MemoryStore;
    use session_auth::{Account, Minter};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const OK_BODY: &str = r#")]}'{"keyId":"kid-1","xsrfToken":"c2VjcmV0LWtleS1ieXRlcw"}"#;

    fn account(n: usize) -> Account {
        let mut account = Account::new(
            format!("sec-{n}"),
            format!("host-{n}"),
            format!("{}", 1000 + n),
            format!("team-{n}"),
        );
        account.id = format!("acct-{n}");
        account
    }

    fn pool_with(
        accounts: Vec<Account>,
        handshake_url: String,
    ) -> (Arc<Pool>, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let pool = Arc::new(Pool::new(
            Document {
                accounts: accounts.into_iter().map(Into::into).collect(),
                ..Document::default()
            },
            CooldownPolicy::default(),
            Minter::new(reqwest::Client::new(), handshake_url, Duration::from_secs(5)),
            Arc::new(MemoryStore::default()),
            notifier.clone(),
        ));
        (pool, notifier)
    }

    async fn respond(server: &MockServer, subject: &str, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/auth/getoxsrf"))
            .and(query_param("csesidx", subject))
            .respond_with(template)
            .mount(server)
            .await;
    }

    fn url(server: &MockServer) -> String {
        format!("{}/auth/getoxsrf", server.uri())
    }

    fn checker(pool: Arc<Pool>) -> HealthChecker {
        HealthChecker::with_probe_delay(pool, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn auth_failure_marks_unavailable_without_auto_delete() {
        let server = MockServer::start().await;
        respond(&server, "1000", ResponseTemplate::new(200).set_body_string(OK_BODY)).await;
        respond(&server, "1001", ResponseTemplate::new(403)).await;

        let (pool, notifier) = pool_with(vec![account(0), account(1)], url(&server));
        let report = checker(pool.clone()).run_once(false).await;

        assert_eq!(pool.len().await, 2);
        let views = pool.accounts().await;
        assert!(views[0].available);
        assert!(!views[1].available);
        assert!(
            views[1]
                .unavailable_reason
                .as_deref()
                .unwrap()
                .starts_with("authentication failed")
        );

        assert_eq!(notifier.changes(), vec![1]);
        assert!(notifier.deletions().is_empty());

        assert_eq!(report.checked, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.deleted, 0);
        assert!(!report.aborted);
        assert_eq!(report.results[0].account_index, 0);
        assert!(report.results[0].success);
        assert_eq!(report.results[1].account_index, 1);
        assert!(!report.results[1].success);
        assert!(!report.results[1].deleted);
    }

    #[tokio::test]
    async fn auth_failure_deletes_with_auto_delete() {
        let server = MockServer::start().await;
        respond(&server, "1000", ResponseTemplate::new(200).set_body_string(OK_BODY)).await;
        respond(&server, "1001", ResponseTemplate::new(403)).await;

        let (pool, notifier) = pool_with(vec![account(0), account(1)], url(&server));
        let report = checker(pool.clone()).run_once(true).await;

        assert_eq!(pool.len().await, 1);
        let views = pool.accounts().await;
        assert_eq!(views[0].index, 0);
        assert_eq!(views[0].id, "acct-0");

        assert_eq!(notifier.deletions(), vec![1]);
        assert!(notifier.events().contains(&Event::Notification {
            title: "Account auto-deleted".into(),
            severity: Severity::Warning,
        }));
        assert_eq!(report.deleted, 1);
        assert!(report.results[1].deleted);
    }

    #[tokio::test]
    async fn descending_sweep_deletes_every_failing_account() {
        let server = MockServer::start().await;
        for subject in ["1000", "1002"] {
            respond(&server, subject, ResponseTemplate::new(401)).await;
        }
        for subject in ["1001", "1003"] {
            respond(&server, subject, ResponseTemplate::new(200).set_body_string(OK_BODY)).await;
        }

        let accounts = (0..4).map(account).collect();
        let (pool, notifier) = pool_with(accounts, url(&server));
        let report = checker(pool.clone()).run_once(true).await;

        let ids: Vec<_> = pool.accounts().await.into_iter().map(|v| v.id).collect();
        assert_eq!(ids, vec!["acct-1", "acct-3"]);
        assert_eq!(notifier.deletions(), vec![2, 0]);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.succeeded, 2);
    }

    #[tokio::test]
    async fn rate_limit_is_not_a_failure() {
        let server = MockServer::start().await;
        respond(&server, "1000", ResponseTemplate::new(429)).await;

        let (pool, notifier) = pool_with(vec![account(0)], url(&server));
        let report = checker(pool.clone()).run_once(true).await;

        assert_eq!(pool.len().await, 1);
        assert_eq!(pool.accounts().await[0].status, "available");
        assert!(notifier.events().is_empty());
        assert!(report.results[0].success);
        assert!(report.results[0].rate_limited);
    }

    #[tokio::test]
    async fn missing_cookies_fail_without_network_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(OK_BODY))
            .expect(0)
            .mount(&server)
            .await;

        let mut incomplete = account(0);
        incomplete.secure_session_cookie = Default::default();
        let (pool, _) = pool_with(vec![incomplete], url(&server));
        let report = checker(pool.clone()).run_once(false).await;

        let view = &pool.accounts().await[0];
        assert!(!view.available);
        assert!(
            view.unavailable_reason
                .as_deref()
                .unwrap()
                .contains("secure_c_ses")
        );
        assert!(!report.results[0].success);
    }

    #[tokio::test]
    async fn network_failure_retires_account() {
        let (pool, _) = pool_with(vec![account(0)], "http://127.0.0.1:1/auth/getoxsrf".into());
        let report = checker(pool.clone()).run_once(false).await;

        let view = &pool.accounts().await[0];
        assert!(!view.available);
        assert!(
            view.unavailable_reason
                .as_deref()
                .unwrap()
                .starts_with("probe failed")
        );
        assert_eq!(report.succeeded, 0);
    }

    #[tokio::test]
    async fn success_clears_unavailable_but_keeps_quota_cooldowns() {
        let server = MockServer::start().await;
        respond(&server, "1000", ResponseTemplate::new(200).set_body_string(OK_BODY)).await;

        let (pool, notifier) = pool_with(vec![account(0)], url(&server));
        pool.mark_quota_error(0, 429, "quota", Some(QuotaKind::Videos))
            .await
            .unwrap();
        pool.mark_unavailable(0, "earlier failure").await.unwrap();

        checker(pool.clone()).run_once(false).await;

        let view = &pool.accounts().await[0];
        assert!(view.available);
        assert!(view.unavailable_reason.is_none());
        assert_eq!(view.cooldowns.len(), 1);
        assert!(pool.select(QuotaKind::Videos).await.is_err());
        assert!(pool.select(QuotaKind::Images).await.is_ok());
        assert_eq!(notifier.changes(), vec![0, 0, 0]);
    }

    #[tokio::test]
    async fn empty_pool_sweep_is_empty() {
        let (pool, _) = pool_with(vec![], "http://127.0.0.1:1".into());
        let report = checker(pool).run_once(true).await;
        assert_eq!(report.checked, 0);
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn run_once_records_last_run() {
        let server = MockServer::start().await;
        respond(&server, "1000", ResponseTemplate::new(200).set_body_string(OK_BODY)).await;

        let (pool, _) = pool_with(vec![account(0)], url(&server));
        let checker = checker(pool);
        let before = checker.status().await;
        assert!(!before.running);
        assert!(before.last_run_time.is_none());

        checker.run_once(false).await;
        let after = checker.status().await;
        assert!(after.last_run_time.is_some());
        assert_eq!(after.last_run_results.len(), 1);
        assert_eq!(after.last_run.unwrap().succeeded, 1);
    }

    #[tokio::test]
    async fn start_is_guarded_and_stop_ends_task() {
        let server = MockServer::start().await;
        respond(&server, "1000", ResponseTemplate::new(200).set_body_string(OK_BODY)).await;

        let (pool, _) = pool_with(vec![account(0)], url(&server));
        let checker = checker(pool);

        assert!(checker.start(30, false).await);
        assert!(!checker.start(30, false).await, "second start must be refused");

        let status = checker.status().await;
        assert!(status.running);
        assert_eq!(status.state, SchedulerState::Running);
        assert_eq!(status.interval_minutes, Some(30));

        assert!(checker.stop().await);
        let status = checker.status().await;
        assert!(!status.running);
        assert_eq!(status.state, SchedulerState::Stopped);
        assert!(!checker.stop().await);

        assert!(checker.start(5, true).await, "restart after stop");
        assert!(checker.stop().await);
    }

    #[tokio::test]
    async fn scheduler_sweeps_on_start() {
        let server = MockServer::start().await;
        respond(&server, "1000", ResponseTemplate::new(200).set_body_string(OK_BODY)).await;

        let (pool, _) = pool_with(vec![account(0)], url(&server));
        let checker = checker(pool);
        checker.start(30, false).await;

        let recorded = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if checker.status().await.last_run_time.is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(recorded.is_ok(), "first sweep should run immediately");
        checker.stop().await;
    }

    #[tokio::test]
    async fn stop_aborts_sweep_between_probes() {
        let server = MockServer::start().await;
        for n in 0..3 {
            respond(
                &server,
                &format!("{}", 1000 + n),
                ResponseTemplate::new(200).set_body_string(OK_BODY),
            )
            .await;
        }

        let accounts = (0..3).map(account).collect();
        let (pool, _) = pool_with(accounts, url(&server));
        let checker = HealthChecker::with_probe_delay(pool, Duration::from_secs(60));
        checker.start(30, false).await;

        // Wait for the first probe, then stop while the sweep sleeps
        let probed = tokio::time::timeout(Duration::from_secs(5), async {
            while server.received_requests().await.unwrap_or_default().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(probed.is_ok());

        let stopped = tokio::time::timeout(Duration::from_secs(2), checker.stop()).await;
        assert_eq!(stopped.ok(), Some(true), "stop must not wait out the probe delay");

        let status = checker.status().await;
        let summary = status.last_run.unwrap();
        assert!(summary.aborted);
        assert_eq!(summary.checked, 1);
        assert_eq!(status.last_run_results[0].account_index, 2);
    }

    #[tokio::test]
    async fn stop_also_aborts_on_demand_sweep() {
        let server = MockServer::start().await;
        for n in 0..3 {
            respond(
                &server,
                &format!("{}", 1000 + n),
                ResponseTemplate::new(200).set_body_string(OK_BODY),
            )
            .await;
        }

        let accounts = (0..3).map(account).collect();
        let (pool, _) = pool_with(accounts, url(&server));
        let checker = HealthChecker::with_probe_delay(pool, Duration::from_secs(60));

        let (report, stopped) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(checker.run_once(false), async {
                while server.received_requests().await.unwrap_or_default().is_empty() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                checker.stop().await
            })
        })
        .await
        .expect("stop must cut the on-demand sweep short");

        assert!(!stopped, "scheduler itself was not running");
        assert!(report.aborted);
        assert_eq!(report.checked, 1);
        assert_eq!(report.results[0].account_index, 2);
    }

    #[tokio::test]
    async fn sweep_after_stop_runs_to_completion() {
        let server = MockServer::start().await;
        for n in 0..2 {
            respond(
                &server,
                &format!("{}", 1000 + n),
                ResponseTemplate::new(200).set_body_string(OK_BODY),
            )
            .await;
        }

        let accounts = (0..2).map(account).collect();
        let (pool, _) = pool_with(accounts, url(&server));
        let checker = checker(pool);
        assert!(!checker.stop().await);

        let report = checker.run_once(false).await;
        assert!(!report.aborted);
        assert_eq!(report.checked, 2);
    }
}
