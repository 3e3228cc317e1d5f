//! End-to-end session flow over real HTTP: reqwest transport, cookie-held
//! refresh credential, file-backed credential store, and an in-process axum
//! backend standing in for the journal API.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{Value, json};
use ujsti_portal::net::client::ApiError;
use ujsti_portal::net::transport::TransportError;
use ujsti_portal::session::{GuardDecision, HistoryNavigator, RouteGuard};
use ujsti_portal::store::cookies::CookieJarFile;
use ujsti_portal::store::credentials::TokenKind;
use ujsti_portal::store::file::FileStore;
use ujsti_portal::{ApiClient, ClientConfig, Credentials, Role, Session};

const EMAIL: &str = "amaka@uniben.test";
const PASSWORD: &str = "peer-review-2024";
const REFRESH_COOKIE: &str = "ujsti_refresh";
const REFRESH_VALUE: &str = "rt-amaka";

// =============================================================================
// FAKE BACKEND
// =============================================================================

#[derive(Default)]
struct Backend {
    access: Mutex<Option<String>>,
    issued: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl Backend {
    fn issue(&self) -> String {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let token = format!("access-{n}");
        *self.access.lock().expect("backend mutex should lock") = Some(token.clone());
        token
    }

    fn expire_access(&self) {
        *self.access.lock().expect("backend mutex should lock") = None;
    }

    fn authorized(&self, headers: &HeaderMap) -> Option<String> {
        let bearer = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))?;
        let access = self.access.lock().expect("backend mutex should lock");
        (access.as_deref() == Some(bearer)).then(|| bearer.to_owned())
    }
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "success": false, "message": message }))).into_response()
}

fn account() -> Value {
    json!({ "id": "r-7", "name": "Amaka Okafor", "email": EMAIL, "role": "reviewer" })
}

async fn reviewer_login(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    if body["email"] != EMAIL {
        return (StatusCode::NOT_FOUND, Json(json!({ "success": false, "message": "User not found" })))
            .into_response();
    }
    if body["password"] != PASSWORD {
        return unauthorized("Invalid password");
    }
    let token = backend.issue();
    let cookie = format!("{REFRESH_COOKIE}={REFRESH_VALUE}; Path=/; HttpOnly");
    (
        [(SET_COOKIE, cookie)],
        Json(json!({ "success": true, "accessToken": token, "user": account() })),
    )
        .into_response()
}

async fn refresh_token(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    backend.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let has_cookie = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(';').any(|pair| pair.trim() == format!("{REFRESH_COOKIE}={REFRESH_VALUE}")));
    if !has_cookie {
        return unauthorized("Refresh token missing");
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
    let token = backend.issue();
    Json(json!({ "success": true, "accessToken": token })).into_response()
}

async fn verify_token(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if backend.authorized(&headers).is_none() {
        return unauthorized("jwt expired");
    }
    Json(json!({ "success": true, "user": { "id": "r-7", "role": "reviewer" } })).into_response()
}

async fn logout(State(backend): State<Arc<Backend>>) -> Response {
    backend.expire_access();
    let cookie = format!("{REFRESH_COOKIE}=; Path=/; Max-Age=0");
    ([(SET_COOKIE, cookie)], Json(json!({ "success": true }))).into_response()
}

async fn assignments(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    match backend.authorized(&headers) {
        Some(token) => Json(json!({ "assignments": ["UJSTI-2024-031"], "token": token })).into_response(),
        None => unauthorized("jwt expired"),
    }
}

async fn slow() -> Response {
    tokio::time::sleep(Duration::from_secs(2)).await;
    Json(json!({ "success": true })).into_response()
}

async fn spawn_backend() -> (SocketAddr, Arc<Backend>) {
    let backend = Arc::new(Backend::default());
    let app = Router::new()
        .route("/auth/reviewer-login", post(reviewer_login))
        .route("/auth/refresh-token", post(refresh_token))
        .route("/auth/verify-token", get(verify_token))
        .route("/auth/logout", post(logout))
        .route("/reviewer/assignments", get(assignments))
        .route("/slow", get(slow))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind should succeed");
    let addr = listener.local_addr().expect("listener should have an address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server failed");
    });
    (addr, backend)
}

// =============================================================================
// HELPERS
// =============================================================================

async fn open_session(addr: SocketAddr, store_path: &Path) -> (Session, Arc<HistoryNavigator>) {
    let store = FileStore::open(store_path).await.expect("store should open");
    let client = ApiClient::from_config(ClientConfig::new(format!("http://{addr}/")), Credentials::new(Arc::new(store)))
        .expect("client should build");
    let navigator = Arc::new(HistoryNavigator::new());
    let session = Session::mount(Role::Reviewer, Arc::new(client), navigator.clone());
    (session, navigator)
}

/// Session over the credential file plus the on-disk cookie jar, the way the
/// CLI opens one on every run.
async fn open_persistent_session(addr: SocketAddr, dir: &Path) -> (Session, CookieJarFile) {
    let store = FileStore::open(dir.join("credentials.json")).await.expect("store should open");
    let cookies = CookieJarFile::open(dir.join("credentials.cookies.json")).await.expect("jar should open");
    let client = ApiClient::from_config_with_cookies(
        ClientConfig::new(format!("http://{addr}")),
        Credentials::new(Arc::new(store)),
        cookies.jar(),
    )
    .expect("client should build");
    let session = Session::mount(Role::Reviewer, Arc::new(client), Arc::new(HistoryNavigator::new()));
    (session, cookies)
}

async fn stored_access_token(store_path: &Path) -> Option<String> {
    let store = FileStore::open(store_path).await.expect("store should reopen");
    Credentials::new(Arc::new(store))
        .get_token(TokenKind::AccessToken)
        .await
        .expect("token read should succeed")
}

// =============================================================================
// TESTS
// =============================================================================

#[tokio::test]
async fn login_then_concurrent_401s_share_one_cookie_refresh() {
    let (addr, backend) = spawn_backend().await;
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store_path = dir.path().join("credentials.json");
    let (session, navigator) = open_session(addr, &store_path).await;

    assert!(!session.check_auth().await.expect("check should succeed"));
    let user = session.login(EMAIL, PASSWORD).await.expect("login should succeed");
    assert_eq!(user.role, Role::Reviewer);
    assert_eq!(navigator.current().as_deref(), Some("/reviewer/dashboard"));
    assert_eq!(RouteGuard::new(Role::Reviewer).decide(&session.state()), GuardDecision::Allow);

    backend.expire_access();
    let client = session.client().clone();
    let calls = (0..4).map(|_| {
        let client = client.clone();
        tokio::spawn(async move { client.get_json::<Value>("/reviewer/assignments").await })
    });
    let results = futures::future::join_all(calls).await;

    for result in results {
        let body = result.expect("task should not panic").expect("call should succeed after refresh");
        assert_eq!(body["token"], "access-2");
    }
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stored_access_token(&store_path).await.as_deref(), Some("access-2"));
    assert!(session.is_authenticated());
}

#[tokio::test]
async fn restart_with_saved_cookie_jar_refreshes() {
    let (addr, backend) = spawn_backend().await;
    let dir = tempfile::tempdir().expect("tempdir should be created");

    {
        let (session, cookies) = open_persistent_session(addr, dir.path()).await;
        session.login(EMAIL, PASSWORD).await.expect("login should succeed");
        cookies.save().await.expect("jar should save");
    }

    let (session, cookies) = open_persistent_session(addr, dir.path()).await;
    assert!(session.check_auth().await.expect("check should succeed"));

    backend.expire_access();
    let body: Value = session
        .client()
        .get_json("/reviewer/assignments")
        .await
        .expect("call should succeed after refresh");
    cookies.save().await.expect("jar should save");

    assert_eq!(body["token"], "access-2");
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert!(session.is_authenticated());
    assert_eq!(stored_access_token(&dir.path().join("credentials.json")).await.as_deref(), Some("access-2"));
}

#[tokio::test]
async fn restart_after_logout_cannot_refresh() {
    let (addr, backend) = spawn_backend().await;
    let dir = tempfile::tempdir().expect("tempdir should be created");

    {
        let (session, cookies) = open_persistent_session(addr, dir.path()).await;
        session.login(EMAIL, PASSWORD).await.expect("login should succeed");
        session.logout().await.expect("logout should succeed");
        cookies.save().await.expect("jar should save");
    }

    let (session, _) = open_persistent_session(addr, dir.path()).await;
    assert!(!session.check_auth().await.expect("check should succeed"));
    let refresh = session.client().refresh_access_token().await;

    assert!(refresh.is_err());
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn restart_without_cookie_jar_ends_session() {
    let (addr, backend) = spawn_backend().await;
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store_path = dir.path().join("credentials.json");

    {
        let (session, _) = open_session(addr, &store_path).await;
        session.login(EMAIL, PASSWORD).await.expect("login should succeed");
    }

    let (session, _) = open_session(addr, &store_path).await;
    assert!(session.check_auth().await.expect("check should succeed"));

    backend.expire_access();
    let err = session
        .client()
        .get_json::<Value>("/reviewer/assignments")
        .await
        .expect_err("call should fail");

    assert!(err.is_unauthorized());
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert!(!session.is_authenticated());
    assert_eq!(stored_access_token(&store_path).await, None);
}

#[tokio::test]
async fn logout_clears_file_store_and_cookie() {
    let (addr, backend) = spawn_backend().await;
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store_path = dir.path().join("credentials.json");
    let (session, navigator) = open_session(addr, &store_path).await;
    session.login(EMAIL, PASSWORD).await.expect("login should succeed");

    session.logout().await.expect("logout should succeed");

    assert_eq!(navigator.current().as_deref(), Some("/reviewer/login"));
    assert_eq!(stored_access_token(&store_path).await, None);
    let refresh = session.client().refresh_access_token().await;
    assert!(refresh.is_err());
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn wrong_password_over_http_is_generic() {
    let (addr, _) = spawn_backend().await;
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let (session, _) = open_session(addr, &dir.path().join("credentials.json")).await;

    let wrong_password = session.login(EMAIL, "guess").await.expect_err("login should fail");
    let unknown_user = session.login("nobody@uniben.test", PASSWORD).await.expect_err("login should fail");

    assert_eq!(wrong_password.to_string(), "Invalid credentials");
    assert_eq!(unknown_user.to_string(), "Invalid credentials");
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let (addr, _) = spawn_backend().await;
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store = FileStore::open(dir.path().join("credentials.json")).await.expect("store should open");
    let mut config = ClientConfig::new(format!("http://{addr}"));
    config.timeout = Duration::from_millis(200);
    let client = ApiClient::from_config(config, Credentials::new(Arc::new(store))).expect("client should build");

    let err = client.get_json::<Value>("/slow").await.expect_err("call should time out");

    assert_eq!(err, ApiError::Transport(TransportError::Timeout));
}
