//! Shared fixtures for the service's unit tests

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use session_auth::{Account, Minter};
use session_pool::{CooldownPolicy, Document, JsonFileStore, NoopNotifier, Pool};

/// Nothing listens on the discard port, so handshakes fail fast.
pub(crate) const UNREACHABLE_HANDSHAKE: &str = "http://127.0.0.1:9/auth/getoxsrf";

pub(crate) fn account(n: usize) -> Account {
    let mut account = Account::new(
        format!("sec-{n}"),
        format!("host-{n}"),
        format!("{}", 1000 + n),
        format!("team-{n}"),
    );
    account.id = format!("acct-{n}");
    account
}

pub(crate) fn minter(url: &str) -> Minter {
    Minter::new(reqwest::Client::new(), url, Duration::from_secs(2))
}

/// A pool of `n` accounts backed by a JSON file under `dir`.
pub(crate) async fn test_pool(dir: &Path, n: usize) -> Arc<Pool> {
    test_pool_with_minter(dir, n, minter(UNREACHABLE_HANDSHAKE)).await
}

pub(crate) async fn test_pool_with_minter(dir: &Path, n: usize, minter: Minter) -> Arc<Pool> {
    let store = JsonFileStore::new(dir.join("accounts.json"));
    let mut document: Document = store.load().await.unwrap();
    document.accounts = (0..n).map(|i| account(i).into()).collect();
    Arc::new(Pool::new(
        document,
        CooldownPolicy::default(),
        minter,
        Arc::new(store),
        Arc::new(NoopNotifier),
    ))
}
