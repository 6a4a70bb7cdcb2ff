//! Handshake and token minting
//!
//! Minting is two steps: a GET to the `getoxsrf` endpoint with the account's
//! cookie pair (the only network I/O), then local HS256 signing with the key
//! material it returns. The handshake response is JSON behind an anti-XSSI
//! prefix (`)]}'`), which is stripped before parsing.
//!
//! Non-200 statuses map onto `Error::from_status`; a body that does not parse
//! or lacks `keyId`/`xsrfToken` is treated as a rejected credential.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

use crate::account::Account;
use crate::constants::{GETOXSRF_URL, HANDSHAKE_TIMEOUT_SECS, TOKEN_LIFETIME_SECS, XSSI_PREFIX};
use crate::error::{Error, Result};
use crate::jwt::{create_jwt, decode_signing_key};

/// Key material returned by the handshake.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    pub key_id: String,
    pub xsrf_token: String,
}

/// A signed bearer token and its validity window.
///
/// Valid for exactly `TOKEN_LIFETIME_SECS` from `issued_at`. Callers that cache
/// it must leave a safety margin before `expires_at`.
#[derive(Debug, Clone, Serialize)]
pub struct MintedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Turns an account's cookie pair into a bearer token.
///
/// Cheap to clone. Keeps one HTTP client per proxy URL so connection pools are
/// reused across mints.
#[derive(Clone)]
pub struct Minter {
    client: reqwest::Client,
    handshake_url: String,
    timeout: Duration,
    proxied: Arc<Mutex<HashMap<String, reqwest::Client>>>,
}

impl Minter {
    pub fn new(client: reqwest::Client, handshake_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            handshake_url: handshake_url.into(),
            timeout,
            proxied: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Minter against the production handshake endpoint with a 30s timeout.
    pub fn with_defaults(client: reqwest::Client) -> Self {
        Self::new(
            client,
            GETOXSRF_URL,
            Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
        )
    }

    pub fn handshake_url(&self) -> &str {
        &self.handshake_url
    }

    /// Run the handshake and mint a token issued now.
    pub async fn mint(&self, account: &Account, proxy: Option<&str>) -> Result<MintedToken> {
        let material = self.fetch_key_material(account, proxy).await?;
        let key = decode_signing_key(&material.xsrf_token)?;

        let now = Utc::now().timestamp();
        let token = create_jwt(&key, &material.key_id, &account.subject_id, now)?;

        Ok(MintedToken {
            token,
            issued_at: timestamp(now),
            expires_at: timestamp(now + TOKEN_LIFETIME_SECS),
        })
    }

    /// Send the cookie pair to the handshake endpoint and read back the key
    /// material.
    ///
    /// Fails with `MissingField` before any network call when the account
    /// lacks `secure_c_ses` or `csesidx`.
    pub async fn fetch_key_material(
        &self,
        account: &Account,
        proxy: Option<&str>,
    ) -> Result<KeyMaterial> {
        account.validate()?;

        let client = self.client_for(proxy)?;
        let url = format!("{}?csesidx={}", self.handshake_url, account.subject_id.trim());

        let response = client
            .get(&url)
            .header(reqwest::header::ACCEPT, "*/*")
            .header(reqwest::header::USER_AGENT, &account.user_agent)
            .header(reqwest::header::COOKIE, account.cookie_header())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Request(format!("handshake request failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Request(format!("reading handshake response: {e}")))?;

        if status != 200 {
            return Err(Error::from_status(status, error_message(status, &body)));
        }

        let material = parse_key_material(&body)?;
        debug!(
            account_id = %account.id,
            key_id = %material.key_id,
            "handshake succeeded"
        );
        Ok(material)
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<reqwest::Client> {
        let Some(proxy) = proxy.map(str::trim).filter(|p| !p.is_empty()) else {
            return Ok(self.client.clone());
        };

        let mut proxied = self
            .proxied
            .lock()
            .map_err(|_| Error::Request("proxy client cache poisoned".into()))?;
        if let Some(client) = proxied.get(proxy) {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|e| Error::Request(format!("invalid proxy {proxy}: {e}")))?,
            )
            .build()
            .map_err(|e| Error::Request(format!("building proxied client: {e}")))?;
        proxied.insert(proxy.to_string(), client.clone());
        Ok(client)
    }
}

/// Parse a handshake body, tolerating the anti-XSSI prefix.
fn parse_key_material(body: &str) -> Result<KeyMaterial> {
    let text = body.strip_prefix(XSSI_PREFIX).unwrap_or(body).trim();

    let data: serde_json::Value = serde_json::from_str(text).map_err(|e| Error::Auth {
        status: None,
        message: format!("handshake response is not JSON: {e}"),
    })?;

    let field = |name: &str| {
        data.get(name)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    match (field("keyId"), field("xsrfToken")) {
        (Some(key_id), Some(xsrf_token)) => Ok(KeyMaterial { key_id, xsrf_token }),
        _ => Err(Error::Auth {
            status: None,
            message: "handshake response missing keyId/xsrfToken".into(),
        }),
    }
}

/// Extract a short error message from a failed upstream response.
///
/// Prefers `error.message` from a JSON body, then the first 200 characters of
/// the raw body, then `HTTP <status>`.
pub(crate) fn error_message(status: u16, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .filter(|m| !m.is_empty())
        {
            return msg.to_string();
        }
        return json.to_string();
    }
    let trimmed: String = body.chars().take(200).collect();
    if trimmed.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        trimmed
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}
