//! Scripted in-process stand-in for the journal API, plus small fakes shared
//! by the client and session tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::json;

use super::client::{ApiClient, AuthFailureHandler};
use super::transport::{HttpRequest, HttpResponse, Transport, TransportError};
use super::types::UserProfile;
use crate::role::{LOGOUT_ENDPOINT, REFRESH_TOKEN_ENDPOINT, Role, VERIFY_TOKEN_ENDPOINT, is_login_endpoint};
use crate::store::credentials::Credentials;
use crate::store::memory::MemoryStore;

pub(crate) const PASSWORD: &str = "correct horse";

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<serde_json::Value>,
}

/// Mutable behavior of the fake API.
#[derive(Debug, Clone)]
pub(crate) struct FakeApiState {
    /// Token accepted on protected routes.
    pub valid_token: Option<String>,
    /// Token issued by a successful refresh; `None` makes refresh return 401.
    pub refresh_token_result: Option<String>,
    /// Whether a refreshed token is then accepted on protected routes.
    pub refresh_activates: bool,
    /// Account accepted by every login endpoint.
    pub account: UserProfile,
    pub login_token: String,
    /// Id echoed by verify-token; defaults to the account id.
    pub verify_user_id: Option<String>,
    pub logout_unreachable: bool,
}

pub(crate) struct FakeApi {
    state: Mutex<FakeApiState>,
    calls: Mutex<Vec<RecordedCall>>,
    refresh_delay: Duration,
}

pub(crate) fn profile(role: Role) -> UserProfile {
    UserProfile {
        id: "u-100".into(),
        name: "Ngozi Eze".into(),
        email: "ngozi@uniben.test".into(),
        role,
    }
}

impl FakeApi {
    pub(crate) fn new(account: UserProfile) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeApiState {
                valid_token: None,
                refresh_token_result: Some("refreshed-token".into()),
                refresh_activates: true,
                account,
                login_token: "login-token".into(),
                verify_user_id: None,
                logout_unreachable: false,
            }),
            calls: Mutex::new(Vec::new()),
            refresh_delay: Duration::from_millis(15),
        })
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, FakeApiState> {
        self.state.lock().expect("fake api mutex should lock")
    }

    pub(crate) fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("fake api mutex should lock").clone()
    }

    pub(crate) fn count(&self, path: &str) -> usize {
        self.calls().iter().filter(|c| c.path == path).count()
    }

    fn respond(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut state = self.state();
        let bearer = request.bearer().map(str::to_owned);
        let authorized = bearer.is_some() && bearer == state.valid_token;
        let path = request.path.as_str();

        if is_login_endpoint(path) {
            let body = request.body.clone().unwrap_or_default();
            let email_matches = body["email"] == state.account.email.as_str();
            if !email_matches {
                return Ok(HttpResponse::json_body(
                    StatusCode::NOT_FOUND,
                    &json!({"success": false, "message": "User not found"}),
                ));
            }
            if body["password"] != PASSWORD {
                return Ok(HttpResponse::json_body(
                    StatusCode::UNAUTHORIZED,
                    &json!({"success": false, "message": "Invalid password"}),
                ));
            }
            state.valid_token = Some(state.login_token.clone());
            return Ok(HttpResponse::json_body(
                StatusCode::OK,
                &json!({"success": true, "accessToken": state.login_token, "user": state.account}),
            ));
        }

        match path {
            REFRESH_TOKEN_ENDPOINT => match state.refresh_token_result.clone() {
                Some(token) => {
                    if state.refresh_activates {
                        state.valid_token = Some(token.clone());
                    }
                    Ok(HttpResponse::json_body(StatusCode::OK, &json!({"success": true, "accessToken": token})))
                }
                None => Ok(HttpResponse::json_body(
                    StatusCode::UNAUTHORIZED,
                    &json!({"success": false, "message": "Refresh token expired"}),
                )),
            },
            VERIFY_TOKEN_ENDPOINT if authorized => {
                let id = state.verify_user_id.clone().unwrap_or_else(|| state.account.id.clone());
                Ok(HttpResponse::json_body(
                    StatusCode::OK,
                    &json!({"success": true, "user": {"id": id, "role": state.account.role}}),
                ))
            }
            LOGOUT_ENDPOINT if state.logout_unreachable => Err(TransportError::Connect("connection refused".into())),
            LOGOUT_ENDPOINT => Ok(HttpResponse::json_body(StatusCode::OK, &json!({"success": true}))),
            "/timeout" => Err(TransportError::Timeout),
            "/status/500" => Ok(HttpResponse::json_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({"success": false, "message": "boom"}),
            )),
            _ if authorized => Ok(HttpResponse::json_body(
                StatusCode::OK,
                &json!({"path": path, "token": bearer, "body": request.body}),
            )),
            _ => Ok(HttpResponse::json_body(
                StatusCode::UNAUTHORIZED,
                &json!({"success": false, "message": "jwt expired"}),
            )),
        }
    }
}

#[async_trait::async_trait]
impl Transport for FakeApi {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.lock().expect("fake api mutex should lock").push(RecordedCall {
            method: request.method.clone(),
            path: request.path.clone(),
            bearer: request.bearer().map(str::to_owned),
            body: request.body.clone(),
        });
        if request.path == REFRESH_TOKEN_ENDPOINT {
            tokio::time::sleep(self.refresh_delay).await;
        }
        self.respond(request)
    }
}

/// Counts auth-failure notifications.
#[derive(Default)]
pub(crate) struct CountingHandler(pub AtomicUsize);

impl CountingHandler {
    pub(crate) fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AuthFailureHandler for CountingHandler {
    async fn on_auth_failure(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fake API + memory-backed client wired together.
pub(crate) struct Harness {
    pub api: Arc<FakeApi>,
    pub store: Arc<MemoryStore>,
    pub client: Arc<ApiClient>,
}

pub(crate) fn harness(role: Role) -> Harness {
    let api = FakeApi::new(profile(role));
    let store = Arc::new(MemoryStore::new());
    let credentials = Credentials::new(store.clone());
    let client = Arc::new(ApiClient::new(api.clone(), credentials));
    Harness { api, store, client }
}
