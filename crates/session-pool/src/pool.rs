//! Credential registry and account selection
//!
//! Accounts and their runtime state live together in one `Vec` behind a single
//! `RwLock`, so an entry's state can never drift from its account: deleting
//! index `k` shifts every later entry, state included, in one operation.
//!
//! Selection takes the read half of the lock and returns the first account in
//! stable order that is selectable for the requested capability. Mutations
//! take the write half for their whole critical section, then release it
//! before persisting, updating metrics and notifying. Handshakes never run
//! under the lock.
//!
//! Positional indexes are the public contract, but every account also carries
//! a stable id. Paths that act on an index read earlier (the health-check
//! sweep, minting on behalf of a selection) pass the id along; if the account
//! moved in the meantime it is found by id, and if it is gone the operation
//! reports `NotFound` instead of touching a different account.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use session_auth::{Account, MintedToken, Minter};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cooldown::{Cooldown, CooldownPolicy, CooldownScope, QuotaKind, RuntimeState};
use crate::error::{Error, Result};
use crate::metrics;
use crate::notify::Notifier;
use crate::store::{Availability, Document, Persistence, PoolSettings, Snapshot, StoredAccount};

/// An account picked by `select`, with the proxy its handshake should use.
#[derive(Debug, Clone)]
pub struct SelectedAccount {
    pub index: usize,
    pub account: Account,
    /// Account override, else the pool-wide proxy
    pub proxy: Option<String>,
}

impl SelectedAccount {
    pub fn id(&self) -> &str {
        &self.account.id
    }
}

/// Public view of one account. Never carries cookie values.
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    pub index: usize,
    pub id: String,
    pub subject_id: String,
    pub team_id: String,
    pub user_agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// `available`, `cooling_down` or `unavailable`
    pub status: &'static str,
    pub available: bool,
    pub unavailable_reason: Option<String>,
    pub unavailable_since: Option<DateTime<Utc>>,
    pub missing_fields: Vec<&'static str>,
    pub cooldowns: Vec<CooldownView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CooldownView {
    /// `account` or a quota kind
    pub scope: &'static str,
    pub until: DateTime<Utc>,
    pub remaining_secs: u64,
}

struct Entry {
    account: Account,
    state: RuntimeState,
    /// Record keys this crate does not own, written back on every save.
    extra: serde_json::Map<String, serde_json::Value>,
}

impl Entry {
    fn from_stored(stored: StoredAccount) -> Self {
        let Availability {
            available,
            unavailable_reason,
            unavailable_time,
        } = stored.availability;
        Self {
            account: stored.account,
            state: RuntimeState {
                available,
                unavailable_reason,
                unavailable_since: unavailable_time,
                ..RuntimeState::default()
            },
            extra: stored.extra,
        }
    }

    fn to_stored(&self) -> StoredAccount {
        StoredAccount {
            account: self.account.clone(),
            availability: Availability {
                available: self.state.available,
                unavailable_reason: self.state.unavailable_reason.clone(),
                unavailable_time: self.state.unavailable_since,
            },
            extra: self.extra.clone(),
        }
    }

    fn account_cooling(&self, now: DateTime<Utc>) -> bool {
        self.state
            .cooldown_remaining(CooldownScope::Account, now)
            .is_some()
    }

    fn status(&self, now: DateTime<Utc>) -> &'static str {
        if !self.state.available {
            "unavailable"
        } else if self.account_cooling(now) {
            "cooling_down"
        } else {
            "available"
        }
    }

    fn view(&self, index: usize, now: DateTime<Utc>) -> AccountView {
        AccountView {
            index,
            id: self.account.id.clone(),
            subject_id: self.account.subject_id.clone(),
            team_id: self.account.team_id.clone(),
            user_agent: self.account.user_agent.clone(),
            proxy: self.account.proxy.clone(),
            status: self.status(now),
            available: self.state.available,
            unavailable_reason: self.state.unavailable_reason.clone(),
            unavailable_since: self.state.unavailable_since,
            missing_fields: self.account.missing_fields(),
            cooldowns: self
                .state
                .active_cooldowns(now)
                .into_iter()
                .map(|(scope, until)| CooldownView {
                    scope: scope.label(),
                    until,
                    remaining_secs: (until - now).num_seconds().max(0) as u64,
                })
                .collect(),
        }
    }
}

struct Registry {
    entries: Vec<Entry>,
    settings: PoolSettings,
    extra: serde_json::Map<String, serde_json::Value>,
    generation: u64,
}

/// What a mutation hands to `publish` once the lock is released.
struct Commit {
    snapshot: Snapshot,
    total: usize,
    selectable: usize,
}

impl Registry {
    /// Resolve `index` to the current position of the intended account.
    fn locate(&self, index: usize, expected_id: Option<&str>) -> Result<usize> {
        match expected_id {
            None if index < self.entries.len() => Ok(index),
            None => Err(Error::NotFound(index)),
            Some(id) => {
                if self.entries.get(index).is_some_and(|e| e.account.id == id) {
                    return Ok(index);
                }
                self.entries
                    .iter()
                    .position(|e| e.account.id == id)
                    .ok_or(Error::NotFound(index))
            }
        }
    }

    fn selected(&self, index: usize) -> SelectedAccount {
        let account = self.entries[index].account.clone();
        let proxy = account
            .proxy
            .clone()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| self.settings.effective_proxy().map(str::to_owned));
        SelectedAccount {
            index,
            account,
            proxy,
        }
    }

    fn selectable_count(&self, now: DateTime<Utc>) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state.available && !e.account_cooling(now))
            .count()
    }

    /// Bump the generation and capture everything the mutation must publish.
    fn commit(&mut self, now: DateTime<Utc>) -> Commit {
        self.generation += 1;
        Commit {
            snapshot: Snapshot {
                generation: self.generation,
                document: Document {
                    accounts: self.entries.iter().map(Entry::to_stored).collect(),
                    settings: self.settings.clone(),
                    extra: self.extra.clone(),
                },
            },
            total: self.entries.len(),
            selectable: self.selectable_count(now),
        }
    }

    fn exhausted_message(&self, capability: QuotaKind, now: DateTime<Utc>) -> String {
        let unavailable = self.entries.iter().filter(|e| !e.state.available).count();
        let cooling = self
            .entries
            .iter()
            .filter(|e| e.state.available && !e.state.is_selectable(capability, now))
            .count();
        serde_json::json!({
            "error": {
                "type": "pool_exhausted",
                "message": format!("no available account for {capability}"),
                "pool": {
                    "accounts_total": self.entries.len(),
                    "accounts_unavailable": unavailable,
                    "accounts_cooling_down": cooling
                }
            }
        })
        .to_string()
    }
}

/// The credential pool.
///
/// Constructed once at startup and shared by `Arc` with the request path, the
/// health checker and the admin API.
pub struct Pool {
    registry: RwLock<Registry>,
    policy: CooldownPolicy,
    minter: Minter,
    store: Arc<dyn Persistence>,
    notifier: Arc<dyn Notifier>,
}

impl Pool {
    /// Build the pool from a loaded document. Accounts keep their persisted
    /// availability; every cooldown starts empty.
    pub fn new(
        document: Document,
        policy: CooldownPolicy,
        minter: Minter,
        store: Arc<dyn Persistence>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let entries: Vec<Entry> = document
            .accounts
            .into_iter()
            .map(Entry::from_stored)
            .collect();
        let registry = Registry {
            entries,
            settings: document.settings,
            extra: document.extra,
            generation: 0,
        };
        let now = Utc::now();
        let selectable = registry.selectable_count(now);
        info!(
            accounts = registry.entries.len(),
            selectable, "pool initialized"
        );
        metrics::record_pool_size(registry.entries.len(), selectable);
        Self {
            registry: RwLock::new(registry),
            policy,
            minter,
            store,
            notifier,
        }
    }

    pub fn minter(&self) -> &Minter {
        &self.minter
    }

    pub fn policy(&self) -> &CooldownPolicy {
        &self.policy
    }

    pub(crate) fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    /// First account, in stable order, selectable for `capability` now.
    pub async fn select(&self, capability: QuotaKind) -> Result<SelectedAccount> {
        self.select_at(capability, Utc::now()).await
    }

    /// `select` evaluated at an explicit instant.
    pub async fn select_at(
        &self,
        capability: QuotaKind,
        now: DateTime<Utc>,
    ) -> Result<SelectedAccount> {
        let registry = self.registry.read().await;
        match registry
            .entries
            .iter()
            .position(|e| e.state.is_selectable(capability, now))
        {
            Some(index) => {
                debug!(account_index = index, %capability, "account selected");
                Ok(registry.selected(index))
            }
            None => Err(Error::PoolExhausted(
                registry.exhausted_message(capability, now),
            )),
        }
    }

    /// The account at `index` as `select` would hand it out, regardless of
    /// its state.
    pub async fn account_at(&self, index: usize) -> Option<SelectedAccount> {
        let registry = self.registry.read().await;
        (index < registry.entries.len()).then(|| registry.selected(index))
    }

    /// Mint a bearer token for a selected account.
    ///
    /// The handshake runs without holding the lock. A non-200 handshake
    /// status is reported against the selected account as if the caller had
    /// called `report_failure` with it.
    pub async fn mint_token(&self, selected: &SelectedAccount) -> Result<MintedToken> {
        match self
            .minter
            .mint(&selected.account, selected.proxy.as_deref())
            .await
        {
            Ok(token) => {
                metrics::record_mint("success");
                Ok(token)
            }
            Err(e) => {
                metrics::record_mint(failure_label(&e));
                if let Some(status) = e.status() {
                    let applied = self
                        .apply_quota_error(
                            selected.index,
                            Some(selected.id()),
                            status,
                            &e.to_string(),
                            None,
                        )
                        .await;
                    if let Err(err) = applied {
                        debug!(
                            account_id = %selected.id(),
                            error = %err,
                            "account gone before handshake failure could be recorded"
                        );
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Take an account out of rotation until a health check or admin clears it.
    pub async fn mark_unavailable(&self, index: usize, reason: impl Into<String>) -> Result<()> {
        self.set_unavailable(index, None, reason.into())
            .await
            .map(|_| ())
    }

    /// Classify an upstream failure and apply the resulting cooldown.
    ///
    /// Returns the cooldown that was applied.
    pub async fn mark_quota_error(
        &self,
        index: usize,
        status: u16,
        message: &str,
        quota: Option<QuotaKind>,
    ) -> Result<Cooldown> {
        self.apply_quota_error(index, None, status, message, quota)
            .await
    }

    /// Router-facing name for `mark_quota_error`.
    pub async fn report_failure(
        &self,
        index: usize,
        status: u16,
        message: &str,
        quota: Option<QuotaKind>,
    ) -> Result<Cooldown> {
        self.mark_quota_error(index, status, message, quota).await
    }

    /// Clear the unavailability flag. Returns whether it was set.
    pub async fn mark_available(&self, index: usize) -> Result<bool> {
        self.set_available(index, None).await
    }

    /// Remove the account at `index`; later accounts shift down by one.
    pub async fn delete(&self, index: usize) -> Result<Account> {
        self.remove(index, None, "admin").await.map(|(_, a)| a)
    }

    /// Append an account. Returns its index.
    pub async fn add_account(&self, account: Account) -> Result<usize> {
        let now = Utc::now();
        let (index, view, commit) = {
            let mut registry = self.registry.write().await;
            if registry.entries.iter().any(|e| e.account.id == account.id) {
                return Err(Error::DuplicateId(account.id));
            }
            registry.entries.push(Entry {
                account,
                state: RuntimeState::default(),
                extra: serde_json::Map::new(),
            });
            let index = registry.entries.len() - 1;
            (
                index,
                registry.entries[index].view(index, now),
                registry.commit(now),
            )
        };
        info!(account_index = index, account_id = %view.id, "account added to pool");
        self.publish(commit).await;
        self.notifier.account_changed(index, Some(&view));
        Ok(index)
    }

    pub async fn len(&self) -> usize {
        self.registry.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.registry.read().await.entries.is_empty()
    }

    /// Every account, in index order.
    pub async fn accounts(&self) -> Vec<AccountView> {
        let now = Utc::now();
        let registry = self.registry.read().await;
        registry
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| e.view(i, now))
            .collect()
    }

    pub async fn settings(&self) -> PoolSettings {
        self.registry.read().await.settings.clone()
    }

    /// Update the persisted health-check settings; `None` leaves a field as is.
    pub async fn update_health_check_settings(
        &self,
        enabled: Option<bool>,
        interval_minutes: Option<u64>,
        auto_delete: Option<bool>,
    ) -> PoolSettings {
        let now = Utc::now();
        let (settings, commit) = {
            let mut registry = self.registry.write().await;
            if let Some(enabled) = enabled {
                registry.settings.health_check_enabled = enabled;
            }
            if let Some(interval) = interval_minutes {
                registry.settings.health_check_interval = interval;
            }
            if let Some(auto_delete) = auto_delete {
                registry.settings.health_check_auto_delete = auto_delete;
            }
            (registry.settings.clone(), registry.commit(now))
        };
        info!(
            enabled = settings.health_check_enabled,
            interval_minutes = settings.health_check_interval,
            auto_delete = settings.health_check_auto_delete,
            "health check settings updated"
        );
        self.publish(commit).await;
        settings
    }

    /// Pool health summary.
    ///
    /// `healthy` when every account is available, `degraded` when some are,
    /// `unhealthy` when none are or the pool is empty. Quota cooldowns do not
    /// count against an account here; they show up in its `cooldowns`.
    pub async fn health(&self) -> serde_json::Value {
        let accounts = self.accounts().await;
        let count = |status: &str| accounts.iter().filter(|a| a.status == status).count();
        let available = count("available");
        let cooling = count("cooling_down");
        let unavailable = count("unavailable");
        let total = accounts.len();

        let status = if total > 0 && available == total {
            "healthy"
        } else if available > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": status,
            "accounts_total": total,
            "accounts_available": available,
            "accounts_cooling_down": cooling,
            "accounts_unavailable": unavailable,
            "accounts": accounts
        })
    }

    pub(crate) async fn set_unavailable(
        &self,
        index: usize,
        expected_id: Option<&str>,
        reason: String,
    ) -> Result<usize> {
        let now = Utc::now();
        let (index, view, commit) = {
            let mut registry = self.registry.write().await;
            let index = registry.locate(index, expected_id)?;
            registry.entries[index]
                .state
                .mark_unavailable(reason.clone(), now);
            (
                index,
                registry.entries[index].view(index, now),
                registry.commit(now),
            )
        };
        warn!(
            account_index = index,
            account_id = %view.id,
            reason = %reason,
            "account marked unavailable"
        );
        self.publish(commit).await;
        self.notifier.account_changed(index, Some(&view));
        Ok(index)
    }

    pub(crate) async fn set_available(
        &self,
        index: usize,
        expected_id: Option<&str>,
    ) -> Result<bool> {
        let now = Utc::now();
        let (index, view, commit) = {
            let mut registry = self.registry.write().await;
            let index = registry.locate(index, expected_id)?;
            if !registry.entries[index].state.clear_unavailable() {
                return Ok(false);
            }
            (
                index,
                registry.entries[index].view(index, now),
                registry.commit(now),
            )
        };
        info!(account_index = index, account_id = %view.id, "account available again");
        self.publish(commit).await;
        self.notifier.account_changed(index, Some(&view));
        Ok(true)
    }

    pub(crate) async fn apply_quota_error(
        &self,
        index: usize,
        expected_id: Option<&str>,
        status: u16,
        message: &str,
        quota: Option<QuotaKind>,
    ) -> Result<Cooldown> {
        let now = Utc::now();
        let cooldown = self.policy.classify(status, quota, now);
        let (index, view, commit) = {
            let mut registry = self.registry.write().await;
            let index = registry.locate(index, expected_id)?;
            registry.entries[index].state.apply(&cooldown, now);
            (
                index,
                registry.entries[index].view(index, now),
                registry.commit(now),
            )
        };
        warn!(
            account_index = index,
            account_id = %view.id,
            status,
            scope = cooldown.scope.label(),
            class = cooldown.class.label(),
            cooldown_secs = (cooldown.until - now).num_seconds(),
            message,
            "account entering cooldown"
        );
        metrics::record_cooldown(cooldown.class.label());
        self.publish(commit).await;
        self.notifier.account_changed(index, Some(&view));
        Ok(cooldown)
    }

    /// Remove an account and return where it was.
    pub(crate) async fn remove(
        &self,
        index: usize,
        expected_id: Option<&str>,
        reason: &'static str,
    ) -> Result<(usize, Account)> {
        let now = Utc::now();
        let (index, removed, commit) = {
            let mut registry = self.registry.write().await;
            let index = registry.locate(index, expected_id)?;
            let removed = registry.entries.remove(index);
            (index, removed.account, registry.commit(now))
        };
        info!(
            account_index = index,
            account_id = %removed.id,
            team_id = %removed.team_id,
            reason,
            "account deleted"
        );
        metrics::record_deleted(reason);
        self.publish(commit).await;
        self.notifier.account_changed(index, None);
        Ok((index, removed))
    }

    /// Record gauges and save. Failures are logged, never returned.
    async fn publish(&self, commit: Commit) {
        metrics::record_pool_size(commit.total, commit.selectable);
        let generation = commit.snapshot.generation;
        if let Err(e) = self.store.save(commit.snapshot).await {
            warn!(generation, error = %e, "failed to persist account document");
        }
    }
}

fn failure_label(err: &session_auth::Error) -> &'static str {
    match err.kind() {
        session_auth::FailureKind::Auth => "auth_error",
        session_auth::FailureKind::RateLimit => "rate_limited",
        session_auth::FailureKind::Request => "request_error",
    }
}
