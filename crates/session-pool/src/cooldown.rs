//! Cooldown and quota state machine
//!
//! Pure logic over one account's `RuntimeState`; the pool calls it inside its
//! lock. Classification of a failure report:
//!
//! - 429 with a known quota kind → that capability cools until the next
//!   Pacific midnight, when the upstream resets per-capability quotas
//! - 401/403 → whole account cools for the auth window (15 min)
//! - 429 without a quota kind → whole account cools for the rate-limit window (5 min)
//! - anything else → whole account cools for the generic window (2 min)
//!
//! Expiry is lazy: nothing is scheduled when a deadline passes, the
//! selection predicate compares the deadline with the current instant.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Auth failure cooldown, seconds
pub const AUTH_ERROR_COOLDOWN_SECS: u64 = 900;
/// Rate limit without a quota kind, seconds
pub const RATE_LIMIT_COOLDOWN_SECS: u64 = 300;
/// Any other transient failure, seconds
pub const GENERIC_ERROR_COOLDOWN_SECS: u64 = 120;

/// Capability with its own upstream quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    Images,
    Videos,
    TextQueries,
}

impl QuotaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaKind::Images => "images",
            QuotaKind::Videos => "videos",
            QuotaKind::TextQueries => "text_queries",
        }
    }
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuotaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "images" => Ok(QuotaKind::Images),
            "videos" => Ok(QuotaKind::Videos),
            "text_queries" => Ok(QuotaKind::TextQueries),
            other => Err(format!("unknown quota kind: {other}")),
        }
    }
}

/// What a cooldown blocks: the whole account, or one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CooldownScope {
    Account,
    Quota(QuotaKind),
}

impl CooldownScope {
    pub fn label(&self) -> &'static str {
        match self {
            CooldownScope::Account => "account",
            CooldownScope::Quota(kind) => kind.as_str(),
        }
    }
}

/// Why a cooldown was applied; decides its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownClass {
    Auth,
    RateLimit,
    Generic,
    QuotaReset,
}

impl CooldownClass {
    pub fn label(&self) -> &'static str {
        match self {
            CooldownClass::Auth => "auth",
            CooldownClass::RateLimit => "rate_limit",
            CooldownClass::Generic => "generic",
            CooldownClass::QuotaReset => "quota_reset",
        }
    }
}

/// A computed cooldown, ready to apply to a `RuntimeState`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cooldown {
    pub scope: CooldownScope,
    pub class: CooldownClass,
    pub until: DateTime<Utc>,
}

/// Fixed windows for the whole-account cooldown classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub auth: Duration,
    pub rate_limit: Duration,
    pub generic: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            auth: Duration::from_secs(AUTH_ERROR_COOLDOWN_SECS),
            rate_limit: Duration::from_secs(RATE_LIMIT_COOLDOWN_SECS),
            generic: Duration::from_secs(GENERIC_ERROR_COOLDOWN_SECS),
        }
    }
}

impl CooldownPolicy {
    /// Classify a failure report into the cooldown it triggers.
    pub fn classify(&self, status: u16, quota: Option<QuotaKind>, now: DateTime<Utc>) -> Cooldown {
        let (scope, class, window) = match (status, quota) {
            (429, Some(kind)) => (
                CooldownScope::Quota(kind),
                CooldownClass::QuotaReset,
                Duration::from_secs(seconds_until_next_pt_midnight(now)),
            ),
            (401 | 403, _) => (CooldownScope::Account, CooldownClass::Auth, self.auth),
            (429, None) => (
                CooldownScope::Account,
                CooldownClass::RateLimit,
                self.rate_limit,
            ),
            _ => (CooldownScope::Account, CooldownClass::Generic, self.generic),
        };
        Cooldown {
            scope,
            class,
            until: now + chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero()),
        }
    }
}

/// Seconds from `now` until the next 00:00 in US Pacific time, floored at 0.
///
/// Exactly at a Pacific midnight the quota has just reset, so the result is 0
/// rather than a full day.
pub fn seconds_until_next_pt_midnight(now: DateTime<Utc>) -> u64 {
    let midnight = next_pacific_midnight(now);
    (midnight - now).num_seconds().max(0) as u64
}

#[cfg(feature = "tzdb")]
fn next_pacific_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    next_local_midnight(now.with_timezone(&chrono_tz::America::Los_Angeles))
}

#[cfg(not(feature = "tzdb"))]
fn next_pacific_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    // No tz database: fixed UTC-8, daylight saving is ignored
    match chrono::FixedOffset::west_opt(8 * 3600) {
        Some(pst) => next_local_midnight(now.with_timezone(&pst)),
        None => now + chrono::Duration::days(1),
    }
}

fn next_local_midnight<Tz: TimeZone>(local: DateTime<Tz>) -> DateTime<Utc> {
    let today = local.date_naive();
    if local.naive_local() == today.and_time(NaiveTime::MIN) {
        return local.with_timezone(&Utc);
    }
    today
        .succ_opt()
        .and_then(|tomorrow| {
            local
                .timezone()
                .from_local_datetime(&tomorrow.and_time(NaiveTime::MIN))
                .earliest()
        })
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or_else(|| local.with_timezone(&Utc) + chrono::Duration::days(1))
}

/// In-memory runtime state of one account.
#[derive(Debug, Clone)]
pub struct RuntimeState {
    pub available: bool,
    pub unavailable_reason: Option<String>,
    pub unavailable_since: Option<DateTime<Utc>>,
    pub quota_cooldowns: HashMap<CooldownScope, DateTime<Utc>>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            available: true,
            unavailable_reason: None,
            unavailable_since: None,
            quota_cooldowns: HashMap::new(),
        }
    }
}

impl RuntimeState {
    /// Whether this account may serve `capability` at `now`.
    ///
    /// Requires `available`, no unexpired whole-account cooldown, and no
    /// unexpired cooldown on the capability itself.
    pub fn is_selectable(&self, capability: QuotaKind, now: DateTime<Utc>) -> bool {
        if !self.available {
            return false;
        }
        let blocked = |scope: CooldownScope| {
            self.quota_cooldowns
                .get(&scope)
                .is_some_and(|until| now < *until)
        };
        !blocked(CooldownScope::Account) && !blocked(CooldownScope::Quota(capability))
    }

    /// Remaining cooldown for `scope`, `None` if absent or expired.
    pub fn cooldown_remaining(&self, scope: CooldownScope, now: DateTime<Utc>) -> Option<Duration> {
        self.quota_cooldowns
            .get(&scope)
            .filter(|until| now < **until)
            .and_then(|until| (*until - now).to_std().ok())
    }

    /// Unexpired cooldowns at `now`, in a stable order.
    pub fn active_cooldowns(&self, now: DateTime<Utc>) -> Vec<(CooldownScope, DateTime<Utc>)> {
        let mut active: Vec<_> = self
            .quota_cooldowns
            .iter()
            .filter(|(_, until)| now < **until)
            .map(|(scope, until)| (*scope, *until))
            .collect();
        active.sort_by_key(|(scope, _)| scope.label());
        active
    }

    /// Record a cooldown and drop any that already expired.
    pub fn apply(&mut self, cooldown: &Cooldown, now: DateTime<Utc>) {
        self.quota_cooldowns.retain(|_, until| now < *until);
        self.quota_cooldowns.insert(cooldown.scope, cooldown.until);
    }

    pub fn mark_unavailable(&mut self, reason: String, now: DateTime<Utc>) {
        self.available = false;
        self.unavailable_reason = Some(reason);
        self.unavailable_since = Some(now);
    }

    /// Clear the unavailability flag. Cooldowns are left alone.
    /// Returns whether the flag was set.
    pub fn clear_unavailable(&mut self) -> bool {
        let was_unavailable = !self.available;
        self.available = true;
        self.unavailable_reason = None;
        self.unavailable_since = None;
        was_unavailable
    }
}
