//! Admin API for account and health-check management
//!
//! Runs on a separate listener and must not be exposed publicly: it can add
//! and delete credentials. Responses never carry cookie values.
//!
//! Endpoints:
//! - GET    /admin/accounts                 : list accounts with status
//! - POST   /admin/accounts                 : add an account (201)
//! - DELETE /admin/accounts/{index}         : delete an account
//! - POST   /admin/accounts/{index}/enable  : clear unavailability
//! - GET    /admin/pool                     : pool health summary
//! - GET    /admin/health-check             : scheduler status + settings
//! - POST   /admin/health-check/start       : `{interval_minutes?, auto_delete?}`
//! - POST   /admin/health-check/stop
//! - POST   /admin/health-check/run         : `{auto_delete?}`, one sweep now
//!
//! Request bodies are optional JSON; an empty body means "use the persisted
//! settings".

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderName, StatusCode, header};
use axum::routing::{get, post};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use session_auth::Account;
use session_pool::{HealthChecker, Pool};
use tracing::{info, warn};

use crate::metrics;

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    pool: Arc<Pool>,
    checker: Arc<HealthChecker>,
}

impl AdminState {
    pub fn new(pool: Arc<Pool>, checker: Arc<HealthChecker>) -> Self {
        Self { pool, checker }
    }
}

type JsonResponse = (StatusCode, [(HeaderName, &'static str); 1], String);

/// Build the admin axum router.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/accounts", get(list_accounts).post(add_account))
        .route("/admin/accounts/{index}", axum::routing::delete(delete_account))
        .route("/admin/accounts/{index}/enable", post(enable_account))
        .route("/admin/pool", get(pool_status))
        .route("/admin/health-check", get(health_check_status))
        .route("/admin/health-check/start", post(start_health_check))
        .route("/admin/health-check/stop", post(stop_health_check))
        .route("/admin/health-check/run", post(run_health_check))
        .with_state(state)
}

fn respond(route: &'static str, status: StatusCode, body: serde_json::Value) -> JsonResponse {
    metrics::record_admin_request(route, status.as_u16());
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

fn pool_error(route: &'static str, err: session_pool::Error) -> JsonResponse {
    let status = match &err {
        session_pool::Error::NotFound(_) => StatusCode::NOT_FOUND,
        session_pool::Error::DuplicateId(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    respond(route, status, json!({ "error": err.to_string() }))
}

/// Empty or whitespace-only bodies deserialize to `T::default()`.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| format!("invalid request body: {e}"))
}

/// GET /admin/accounts
async fn list_accounts(State(state): State<AdminState>) -> JsonResponse {
    let accounts = state.pool.accounts().await;
    respond("accounts_list", StatusCode::OK, json!({ "accounts": accounts }))
}

/// POST /admin/accounts: body is an account record in document format.
async fn add_account(State(state): State<AdminState>, body: Bytes) -> JsonResponse {
    const ROUTE: &str = "accounts_create";

    let account: Account = match serde_json::from_slice(&body) {
        Ok(a) => a,
        Err(e) => {
            return respond(
                ROUTE,
                StatusCode::BAD_REQUEST,
                json!({ "error": format!("invalid account: {e}") }),
            );
        }
    };
    if let Err(e) = account.validate() {
        return respond(ROUTE, StatusCode::BAD_REQUEST, json!({ "error": e.to_string() }));
    }

    let account_id = account.id.clone();
    match state.pool.add_account(account).await {
        Ok(index) => respond(
            ROUTE,
            StatusCode::CREATED,
            json!({ "index": index, "account_id": account_id, "status": "added" }),
        ),
        Err(e) => {
            warn!(account_id = %account_id, error = %e, "account add rejected");
            pool_error(ROUTE, e)
        }
    }
}

/// DELETE /admin/accounts/{index}
async fn delete_account(State(state): State<AdminState>, Path(index): Path<usize>) -> JsonResponse {
    const ROUTE: &str = "accounts_delete";

    match state.pool.delete(index).await {
        Ok(account) => respond(
            ROUTE,
            StatusCode::OK,
            json!({ "index": index, "account_id": account.id, "status": "removed" }),
        ),
        Err(e) => pool_error(ROUTE, e),
    }
}

/// POST /admin/accounts/{index}/enable
async fn enable_account(State(state): State<AdminState>, Path(index): Path<usize>) -> JsonResponse {
    const ROUTE: &str = "accounts_enable";

    match state.pool.mark_available(index).await {
        Ok(was_unavailable) => respond(
            ROUTE,
            StatusCode::OK,
            json!({ "index": index, "status": "available", "was_unavailable": was_unavailable }),
        ),
        Err(e) => pool_error(ROUTE, e),
    }
}

/// GET /admin/pool: same shape as the `/health` body.
async fn pool_status(State(state): State<AdminState>) -> JsonResponse {
    respond("pool", StatusCode::OK, state.pool.health().await)
}

/// GET /admin/health-check
async fn health_check_status(State(state): State<AdminState>) -> JsonResponse {
    let status = state.checker.status().await;
    let settings = state.pool.settings().await;
    respond(
        "health_check_status",
        StatusCode::OK,
        json!({
            "scheduler": status,
            "settings": {
                "enabled": settings.health_check_enabled,
                "interval_minutes": settings.health_check_interval,
                "auto_delete": settings.health_check_auto_delete,
            }
        }),
    )
}

#[derive(Debug, Default, Deserialize)]
struct StartRequest {
    interval_minutes: Option<u64>,
    auto_delete: Option<bool>,
}

/// POST /admin/health-check/start: starts the scheduler and persists the
/// effective settings with `enabled = true`.
async fn start_health_check(State(state): State<AdminState>, body: Bytes) -> JsonResponse {
    const ROUTE: &str = "health_check_start";

    let request: StartRequest = match parse_body(&body) {
        Ok(r) => r,
        Err(e) => return respond(ROUTE, StatusCode::BAD_REQUEST, json!({ "error": e })),
    };
    let settings = state.pool.settings().await;
    let interval_minutes = request
        .interval_minutes
        .unwrap_or(settings.health_check_interval);
    let auto_delete = request
        .auto_delete
        .unwrap_or(settings.health_check_auto_delete);
    if interval_minutes == 0 {
        return respond(
            ROUTE,
            StatusCode::BAD_REQUEST,
            json!({ "error": "interval_minutes must be at least 1" }),
        );
    }

    if !state.checker.start(interval_minutes, auto_delete).await {
        return respond(
            ROUTE,
            StatusCode::CONFLICT,
            json!({ "error": "health check scheduler already running" }),
        );
    }
    state
        .pool
        .update_health_check_settings(Some(true), Some(interval_minutes), Some(auto_delete))
        .await;
    info!(interval_minutes, auto_delete, "health check started via admin API");

    respond(
        ROUTE,
        StatusCode::OK,
        json!({
            "status": "started",
            "interval_minutes": interval_minutes,
            "auto_delete": auto_delete,
        }),
    )
}

/// POST /admin/health-check/stop: also persists `enabled = false`, so the
/// scheduler stays off across restarts.
async fn stop_health_check(State(state): State<AdminState>) -> JsonResponse {
    let stopped = state.checker.stop().await;
    state
        .pool
        .update_health_check_settings(Some(false), None, None)
        .await;

    let status = if stopped { "stopped" } else { "not_running" };
    respond("health_check_stop", StatusCode::OK, json!({ "status": status }))
}

#[derive(Debug, Default, Deserialize)]
struct RunRequest {
    auto_delete: Option<bool>,
}

/// POST /admin/health-check/run: sweeps now and returns the report.
async fn run_health_check(State(state): State<AdminState>, body: Bytes) -> JsonResponse {
    const ROUTE: &str = "health_check_run";

    let request: RunRequest = match parse_body(&body) {
        Ok(r) => r,
        Err(e) => return respond(ROUTE, StatusCode::BAD_REQUEST, json!({ "error": e })),
    };
    let auto_delete = match request.auto_delete {
        Some(v) => v,
        None => state.pool.settings().await.health_check_auto_delete,
    };

    let report = state.checker.run_once(auto_delete).await;
    respond(ROUTE, StatusCode::OK, json!(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn admin(pool: Arc<Pool>) -> (Router, Arc<HealthChecker>) {
        let checker = Arc::new(HealthChecker::with_probe_delay(pool.clone(), Duration::ZERO));
        let router = build_admin_router(AdminState::new(pool, checker.clone()));
        (router, checker)
    }

    async fn send(
        app: Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let body = match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        };
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn new_account_body(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "secure_c_ses": "sec-new",
            "host_c_oses": "host-new",
            "csesidx": "4242",
            "team_id": "team-new",
        })
    }

    #[tokio::test]
    async fn list_accounts_empty_pool() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = admin(testing::test_pool(dir.path(), 0).await);

        let (status, json) = send(app, "GET", "/admin/accounts", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["accounts"], json!([]));
    }

    #[tokio::test]
    async fn list_accounts_never_exposes_cookies() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = admin(testing::test_pool(dir.path(), 2).await);

        let (status, json) = send(app, "GET", "/admin/accounts", None).await;
        assert_eq!(status, StatusCode::OK);
        let accounts = json["accounts"].as_array().unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[1]["id"], "acct-1");
        assert_eq!(accounts[1]["index"], 1);
        assert_eq!(accounts[1]["status"], "available");
        let raw = json.to_string();
        assert!(!raw.contains("sec-0") && !raw.contains("host-1"), "got: {raw}");
    }

    #[tokio::test]
    async fn add_account_appends_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let pool = testing::test_pool(dir.path(), 1).await;
        let (app, _) = admin(pool.clone());

        let (status, json) = send(
            app,
            "POST",
            "/admin/accounts",
            Some(new_account_body("acct-new")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["index"], 1);
        assert_eq!(json["account_id"], "acct-new");
        assert_eq!(pool.len().await, 2);

        let saved = std::fs::read_to_string(dir.path().join("accounts.json")).unwrap();
        assert!(saved.contains("acct-new"));
    }

    #[tokio::test]
    async fn add_account_generates_an_id_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let pool = testing::test_pool(dir.path(), 0).await;
        let (app, _) = admin(pool.clone());

        let mut body = new_account_body("unused");
        body.as_object_mut().unwrap().remove("id");
        let (status, json) = send(app, "POST", "/admin/accounts", Some(body)).await;

        assert_eq!(status, StatusCode::CREATED);
        let id = json["account_id"].as_str().unwrap();
        assert_eq!(id.len(), 36, "expected a UUID, got {id}");
    }

    #[tokio::test]
    async fn add_duplicate_id_returns_409() {
        let dir = tempfile::tempdir().unwrap();
        let pool = testing::test_pool(dir.path(), 1).await;
        let (app, _) = admin(pool.clone());

        let (status, json) = send(app, "POST", "/admin/accounts", Some(new_account_body("acct-0"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(json["error"].as_str().unwrap().contains("acct-0"));
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn add_account_missing_cookie_returns_400() {
        let dir = tempfile::tempdir().unwrap();
        let pool = testing::test_pool(dir.path(), 0).await;
        let (app, _) = admin(pool.clone());

        let body = json!({ "host_c_oses": "host", "csesidx": "1", "team_id": "t" });
        let (status, json) = send(app, "POST", "/admin/accounts", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("secure_c_ses"));
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn add_account_malformed_json_returns_400() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = admin(testing::test_pool(dir.path(), 0).await);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/accounts")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_account_shifts_later_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let pool = testing::test_pool(dir.path(), 3).await;
        let (app, _) = admin(pool.clone());

        let (status, json) = send(app, "DELETE", "/admin/accounts/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["account_id"], "acct-1");
        assert_eq!(json["status"], "removed");

        let ids: Vec<String> = pool.accounts().await.into_iter().map(|a| a.id).collect();
        assert_eq!(ids, ["acct-0", "acct-2"]);
    }

    #[tokio::test]
    async fn delete_out_of_range_returns_404() {
        let dir = tempfile::tempdir().unwrap();
        let pool = testing::test_pool(dir.path(), 1).await;
        let (app, _) = admin(pool.clone());

        let (status, _) = send(app, "DELETE", "/admin/accounts/5", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn enable_clears_unavailability() {
        let dir = tempfile::tempdir().unwrap();
        let pool = testing::test_pool(dir.path(), 2).await;
        pool.mark_unavailable(1, "probe failed").await.unwrap();
        let (app, _) = admin(pool.clone());

        let (status, json) = send(app.clone(), "POST", "/admin/accounts/1/enable", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["was_unavailable"], true);
        assert_eq!(pool.accounts().await[1].status, "available");

        let (_, json) = send(app.clone(), "POST", "/admin/accounts/1/enable", None).await;
        assert_eq!(json["was_unavailable"], false);

        let (status, _) = send(app, "POST", "/admin/accounts/9/enable", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn pool_status_reports_empty_pool_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = admin(testing::test_pool(dir.path(), 0).await);

        let (status, json) = send(app, "GET", "/admin/pool", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["accounts_total"], 0);
        assert_eq!(json["accounts_available"], 0);
    }

    #[tokio::test]
    async fn pool_status_reports_degraded_with_a_cooling_account() {
        let dir = tempfile::tempdir().unwrap();
        let pool = testing::test_pool(dir.path(), 2).await;
        pool.report_failure(0, 401, "expired", None).await.unwrap();
        let (app, _) = admin(pool);

        let (_, json) = send(app, "GET", "/admin/pool", None).await;
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["accounts_cooling_down"], 1);
        let remaining = json["accounts"][0]["cooldowns"][0]["remaining_secs"]
            .as_u64()
            .unwrap();
        assert!((899..=900).contains(&remaining), "got {remaining}");
    }

    #[tokio::test]
    async fn health_check_status_starts_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = admin(testing::test_pool(dir.path(), 0).await);

        let (status, json) = send(app, "GET", "/admin/health-check", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["scheduler"]["running"], false);
        assert_eq!(json["scheduler"]["state"], "stopped");
        assert_eq!(json["scheduler"]["last_run_time"], serde_json::Value::Null);
        assert_eq!(json["settings"]["interval_minutes"], 30);
        assert_eq!(json["settings"]["enabled"], false);
    }

    #[tokio::test]
    async fn start_twice_conflicts_and_stop_persists_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let pool = testing::test_pool(dir.path(), 0).await;
        let (app, checker) = admin(pool.clone());

        let body = json!({ "interval_minutes": 15, "auto_delete": true });
        let (status, json) = send(app.clone(), "POST", "/admin/health-check/start", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["interval_minutes"], 15);
        assert!(checker.status().await.running);

        let settings = pool.settings().await;
        assert!(settings.health_check_enabled);
        assert_eq!(settings.health_check_interval, 15);
        assert!(settings.health_check_auto_delete);

        let (status, _) = send(app.clone(), "POST", "/admin/health-check/start", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, json) = send(app.clone(), "POST", "/admin/health-check/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "stopped");
        assert!(!checker.status().await.running);
        assert!(!pool.settings().await.health_check_enabled);

        let (_, json) = send(app, "POST", "/admin/health-check/stop", None).await;
        assert_eq!(json["status"], "not_running");
    }

    #[tokio::test]
    async fn start_with_empty_body_uses_persisted_settings() {
        let dir = tempfile::tempdir().unwrap();
        let pool = testing::test_pool(dir.path(), 0).await;
        pool.update_health_check_settings(None, Some(45), Some(false))
            .await;
        let (app, checker) = admin(pool);

        let (status, json) = send(app, "POST", "/admin/health-check/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["interval_minutes"], 45);
        assert_eq!(json["auto_delete"], false);
        assert_eq!(checker.status().await.interval_minutes, Some(45));
        checker.stop().await;
    }

    #[tokio::test]
    async fn start_rejects_zero_interval() {
        let dir = tempfile::tempdir().unwrap();
        let (app, checker) = admin(testing::test_pool(dir.path(), 0).await);

        let body = json!({ "interval_minutes": 0 });
        let (status, _) = send(app, "POST", "/admin/health-check/start", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!checker.status().await.running);
    }

    #[tokio::test]
    async fn run_without_auto_delete_marks_failures_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let pool = testing::test_pool(dir.path(), 2).await;
        let (app, checker) = admin(pool.clone());

        let body = json!({ "auto_delete": false });
        let (status, json) = send(app, "POST", "/admin/health-check/run", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["checked"], 2);
        assert_eq!(json["succeeded"], 0);
        assert_eq!(json["deleted"], 0);
        assert_eq!(json["results"][0]["account_index"], 0);
        assert_eq!(json["results"][1]["account_index"], 1);

        assert_eq!(pool.len().await, 2);
        assert!(pool.accounts().await.iter().all(|a| !a.available));
        assert_eq!(checker.status().await.last_run_results.len(), 2);
    }

    #[tokio::test]
    async fn run_with_auto_delete_removes_failing_accounts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/getoxsrf"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let minter = testing::minter(&format!("{}/auth/getoxsrf", server.uri()));
        let pool = testing::test_pool_with_minter(dir.path(), 3, minter).await;
        let (app, _) = admin(pool.clone());

        let body = json!({ "auto_delete": true });
        let (status, json) = send(app, "POST", "/admin/health-check/run", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["deleted"], 3);
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn run_success_restores_retired_account() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/getoxsrf"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#")]}'{"keyId":"kid-1","xsrfToken":"c2VjcmV0LWtleS1ieXRlcw"}"#,
            ))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let minter = testing::minter(&format!("{}/auth/getoxsrf", server.uri()));
        let pool = testing::test_pool_with_minter(dir.path(), 1, minter).await;
        pool.mark_unavailable(0, "earlier failure").await.unwrap();
        let (app, _) = admin(pool.clone());

        let (status, json) = send(app, "POST", "/admin/health-check/run", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["succeeded"], 1);
        assert!(pool.accounts().await[0].available);
    }

    #[tokio::test]
    async fn run_rejects_malformed_body() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = admin(testing::test_pool(dir.path(), 0).await);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/health-check/run")
                    .body(Body::from("{\"auto_delete\": \"yes\"}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
