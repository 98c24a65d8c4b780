#![allow(dead_code)]

use axum::{
    Form, Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    net::SocketAddr,
    path::Path,
    sync::{Arc, Mutex},
};
use tokio::net::TcpListener;
use url::Url;

/// Refresh tokens the fake token endpoint understands. Anything else gets a
/// non-JSON 500.
pub const GOOD_PREFIX: &str = "good";
pub const NO_TOKEN: &str = "notoken";
pub const NEEDS_SECRET: &str = "secret";
pub const EXPIRED: &str = "expired";
pub const UNAVAILABLE: &str = "unavailable";

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Form bodies received by the fake token endpoint.
pub type TokenCalls = Arc<Mutex<Vec<HashMap<String, String>>>>;

pub struct FakeTokenEndpoint {
    pub url: Url,
    pub calls: TokenCalls,
}

impl FakeTokenEndpoint {
    pub async fn start() -> Self {
        let calls = TokenCalls::default();
        let app = Router::new()
            .route("/token", post(token))
            .with_state(calls.clone());
        let addr = serve(app).await;
        Self {
            url: Url::parse(&format!("http://{addr}/token")).unwrap(),
            calls,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

async fn token(State(calls): State<TokenCalls>, Form(form): Form<HashMap<String, String>>) -> Response {
    let presented = form.get("refresh_token").cloned().unwrap_or_default();
    calls.lock().unwrap().push(form);

    match presented.as_str() {
        t if t.starts_with(GOOD_PREFIX) => Json(json!({
            "access_token": format!("access-for-{t}"),
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": format!("{t}-rotated"),
        }))
        .into_response(),
        NO_TOKEN => Json(json!({
            "access_token": "access-only",
            "token_type": "Bearer",
            "expires_in": 3600,
        }))
        .into_response(),
        NEEDS_SECRET => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_client",
                "error_description": "AADSTS70002: The provided client is not supported for this feature. The client application must be marked as 'mobile.'",
            })),
        )
            .into_response(),
        EXPIRED => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "AADSTS70000: The provided value for the 'refresh_token' is not valid.",
            })),
        )
            .into_response(),
        UNAVAILABLE => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "temporarily_unavailable" })),
        )
            .into_response(),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response(),
    }
}

#[derive(Debug, Clone)]
pub struct CapturedNotification {
    pub project_key: Option<String>,
    pub body: Value,
}

#[derive(Clone)]
struct SinkState {
    status: StatusCode,
    received: Arc<Mutex<Vec<CapturedNotification>>>,
}

pub struct FakeNotifySink {
    pub url: String,
    received: Arc<Mutex<Vec<CapturedNotification>>>,
}

impl FakeNotifySink {
    pub async fn start(status: StatusCode) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new().route("/notify", post(notify)).with_state(SinkState {
            status,
            received: received.clone(),
        });
        let addr = serve(app).await;
        Self {
            url: format!("http://{addr}/notify"),
            received,
        }
    }

    pub fn received(&self) -> Vec<CapturedNotification> {
        self.received.lock().unwrap().clone()
    }
}

async fn notify(State(state): State<SinkState>, headers: HeaderMap, Json(body): Json<Value>) -> StatusCode {
    let project_key = headers
        .get("x-project-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state
        .received
        .lock()
        .unwrap()
        .push(CapturedNotification { project_key, body });
    state.status
}

pub fn write_json(path: &Path, value: &Value) {
    std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

pub fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}
