//! Account document persistence
//!
//! The pool hands a `Snapshot` to its `Persistence` after every mutation,
//! outside the registry lock. Saves are best effort: the pool logs failures
//! and carries on.
//!
//! `JsonFileStore` keeps the document as one JSON file. Writes go to a temp
//! file that is renamed over the target, with 0600 permissions since the file
//! holds session cookies. Each snapshot carries the registry generation it was
//! taken at; a save older than the last one written is dropped, so two saves
//! racing each other cannot put an older document back on disk.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use session_auth::Account;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Default health-check interval, minutes.
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MINUTES: u64 = 30;

/// Persisted availability of one account.
///
/// Cooldown deadlines are not persisted; only the explicit unavailability
/// flag survives a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    #[serde(default = "default_available")]
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable_reason: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_time"
    )]
    pub unavailable_time: Option<DateTime<Utc>>,
}

impl Default for Availability {
    fn default() -> Self {
        Self {
            available: true,
            unavailable_reason: None,
            unavailable_time: None,
        }
    }
}

fn default_available() -> bool {
    true
}

/// Accept RFC 3339, or a naive ISO timestamp read as UTC. Anything else is
/// dropped rather than failing the whole document.
fn lenient_time<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|t| t.and_utc())
            })
    }))
}

/// One entry of the `accounts` array.
///
/// Keys owned by other tools sharing the file (mailbox details, refresh
/// flags) land in `extra` and are written back untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAccount {
    #[serde(flatten)]
    pub account: Account,
    #[serde(flatten)]
    pub availability: Availability,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl From<Account> for StoredAccount {
    fn from(account: Account) -> Self {
        Self {
            account,
            availability: Availability::default(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Runtime settings stored alongside the accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Default outbound proxy for handshakes; an account's own proxy wins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// `proxy` is ignored unless this is set.
    pub proxy_enabled: bool,
    pub health_check_enabled: bool,
    /// Minutes between scheduled sweeps
    pub health_check_interval: u64,
    pub health_check_auto_delete: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            proxy: None,
            proxy_enabled: false,
            health_check_enabled: false,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL_MINUTES,
            health_check_auto_delete: false,
        }
    }
}

impl PoolSettings {
    /// The pool-wide proxy handshakes should use, if any.
    ///
    /// `None` when the switch is off, the value is blank, or the URL is not
    /// http, https or socks5.
    pub fn effective_proxy(&self) -> Option<&str> {
        if !self.proxy_enabled {
            return None;
        }
        let proxy = self.proxy.as_deref()?.trim();
        SUPPORTED_PROXY_SCHEMES
            .iter()
            .any(|scheme| proxy.starts_with(scheme))
            .then_some(proxy)
    }
}

const SUPPORTED_PROXY_SCHEMES: [&str; 3] = ["http://", "https://", "socks5://"];

/// The whole persisted document. Top-level keys this crate does not know
/// about are carried through `extra` and written back unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub accounts: Vec<StoredAccount>,
    #[serde(flatten)]
    pub settings: PoolSettings,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A document taken under the registry lock, tagged with its generation.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub generation: u64,
    pub document: Document,
}

/// Durable store the pool saves to after each mutation.
pub trait Persistence: Send + Sync {
    fn save<'a>(
        &'a self,
        snapshot: Snapshot,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// JSON file implementation of `Persistence`.
pub struct JsonFileStore {
    path: PathBuf,
    /// Generation of the last document written; serializes writers.
    written: Mutex<u64>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document from disk.
    ///
    /// A missing file is a cold start: an empty document is written and
    /// returned. Accounts stored without an `id` get one generated, and the
    /// file is rewritten so the ids stay stable across restarts.
    pub async fn load(&self) -> Result<Document> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "account file not found, starting with empty pool");
            let document = Document::default();
            write_atomic(&self.path, &document).await?;
            return Ok(document);
        }

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::Persist(format!("reading account file: {e}")))?;
        let raw: serde_json::Value = serde_json::from_str(&contents)
            .map_err(|e| Error::Persist(format!("parsing account file: {e}")))?;

        let missing_ids = raw
            .get("accounts")
            .and_then(|a| a.as_array())
            .map(|accounts| accounts.iter().filter(|a| a.get("id").is_none()).count())
            .unwrap_or(0);

        let document: Document = serde_json::from_value(raw)
            .map_err(|e| Error::Persist(format!("parsing account file: {e}")))?;

        if missing_ids > 0 {
            info!(
                path = %self.path.display(),
                accounts = missing_ids,
                "assigned ids to accounts without one"
            );
            write_atomic(&self.path, &document).await?;
        }

        info!(
            path = %self.path.display(),
            accounts = document.accounts.len(),
            "loaded account document"
        );
        Ok(document)
    }
}

impl Persistence for JsonFileStore {
    fn save<'a>(
        &'a self,
        snapshot: Snapshot,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut written = self.written.lock().await;
            if snapshot.generation <= *written {
                debug!(
                    generation = snapshot.generation,
                    written = *written,
                    "skipping stale snapshot"
                );
                return Ok(());
            }
            write_atomic(&self.path, &snapshot.document).await?;
            *written = snapshot.generation;
            Ok(())
        })
    }
}

/// Write the document atomically (temp file + rename, 0600 on unix).
async fn write_atomic(path: &Path, document: &Document) -> Result<()> {
    let json = serde_json::to_string_pretty(document)
        .map_err(|e| Error::Persist(format!("serializing account document: {e}")))?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("accounts.json");
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Persist(format!("writing temp account file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| Error::Persist(format!("setting account file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Persist(format!("renaming temp account file: {e}")))?;

    debug!(path = %path.display(), accounts = document.accounts.len(), "persisted accounts");
    Ok(())
}
