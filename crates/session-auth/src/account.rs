//! Account record: one scraped upstream session
//!
//! Field names on the wire match the upstream cookie names so account
//! documents exported by the cookie-harvesting tooling load unchanged.

use common::Secret;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_USER_AGENT, HOST_SESSION_COOKIE, SECURE_SESSION_COOKIE};
use crate::error::{Error, Result};

/// One upstream session credential.
///
/// Immutable once created except by an explicit credential refresh or
/// deletion. `id` is stable for the account's lifetime; positional indexes in
/// the pool are not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    #[serde(default = "new_account_id")]
    pub id: String,
    #[serde(rename = "secure_c_ses", default)]
    pub secure_session_cookie: Secret<String>,
    #[serde(rename = "host_c_oses", default)]
    pub host_session_cookie: Secret<String>,
    /// Upstream subject identifier (`csesidx`)
    #[serde(rename = "csesidx", default)]
    pub subject_id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-account proxy override (http, https or socks5 URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

fn new_account_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Account {
    /// Create an account with a fresh id.
    pub fn new(
        secure_session_cookie: String,
        host_session_cookie: String,
        subject_id: String,
        team_id: String,
    ) -> Self {
        Self {
            id: new_account_id(),
            secure_session_cookie: Secret::new(secure_session_cookie),
            host_session_cookie: Secret::new(host_session_cookie),
            subject_id,
            team_id,
            user_agent: default_user_agent(),
            proxy: None,
        }
    }

    /// Names of the fields required for a handshake that are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.secure_session_cookie.is_blank() {
            missing.push("secure_c_ses");
        }
        if self.subject_id.trim().is_empty() {
            missing.push("csesidx");
        }
        missing
    }

    /// Fail with `MissingField` unless the handshake fields are present.
    pub fn validate(&self) -> Result<()> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingField(missing.join(", ")))
        }
    }

    /// `Cookie` header value for the handshake request.
    pub fn cookie_header(&self) -> String {
        format!(
            "{SECURE_SESSION_COOKIE}={}; {HOST_SESSION_COOKIE}={}",
            self.secure_session_cookie.expose(),
            self.host_session_cookie.expose()
        )
    }
}
