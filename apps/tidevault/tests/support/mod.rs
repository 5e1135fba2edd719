//! Local stand-ins for Google's OAuth and Drive endpoints plus helpers to
//! build a pipeline against them.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Form, Json, Router};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tidevault_core::app::{App, AppBuilder};
use tidevault_core::auth::{AuthError, CodePrompt};
use tidevault_core::clock::FixedClock;
use tidevault_core::config::Config;
use tokio::net::TcpListener;
use url::Url;

pub const GOOD_CODE: &str = "good-code";
pub const ACCESS_TOKEN: &str = "ya29.access";
pub const REFRESHED_TOKEN: &str = "ya29.refreshed";
pub const REFRESH_TOKEN: &str = "1//refresh";

#[derive(Default)]
pub struct Recorded {
    pub requests: usize,
    pub token_requests: Vec<HashMap<String, String>>,
    pub uploads: Vec<(String, Vec<u8>)>,
    pub sessions: Vec<Value>,
    pub deleted: Vec<String>,
}

#[derive(Clone)]
pub struct MockGoogle {
    pub base: String,
    pub recorded: Arc<Mutex<Recorded>>,
}

impl MockGoogle {
    /// Every request that reached the server, whatever the route.
    pub fn requests(&self) -> usize {
        self.recorded.lock().unwrap().requests
    }

    pub fn token_requests(&self) -> usize {
        self.recorded.lock().unwrap().token_requests.len()
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.recorded.lock().unwrap().uploads.clone()
    }
}

async fn count_requests(
    State(state): State<MockGoogle>,
    request: Request,
    next: Next,
) -> Response {
    state.recorded.lock().unwrap().requests += 1;
    next.run(request).await
}

fn bearer_ok(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value == format!("Bearer {ACCESS_TOKEN}") || value == format!("Bearer {REFRESHED_TOKEN}")
        })
        .unwrap_or(false)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": {"code": 401, "message": "Invalid Credentials"}})),
    )
        .into_response()
}

async fn token(
    State(state): State<MockGoogle>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.recorded.lock().unwrap().token_requests.push(form.clone());
    let grant = form.get("grant_type").map(String::as_str);
    match grant {
        Some("authorization_code") if form.get("code").map(String::as_str) == Some(GOOD_CODE) => {
            Json(json!({
                "access_token": ACCESS_TOKEN,
                "expires_in": 3599,
                "refresh_token": REFRESH_TOKEN,
                "scope": "https://www.googleapis.com/auth/drive.file",
                "token_type": "Bearer",
            }))
            .into_response()
        }
        Some("refresh_token")
            if form.get("refresh_token").map(String::as_str) == Some(REFRESH_TOKEN) =>
        {
            Json(json!({
                "access_token": REFRESHED_TOKEN,
                "expires_in": 3599,
                "token_type": "Bearer",
            }))
            .into_response()
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant", "error_description": "Bad Request"})),
        )
            .into_response(),
    }
}

async fn start_upload(
    State(state): State<MockGoogle>,
    headers: HeaderMap,
    Json(metadata): Json<Value>,
) -> Response {
    if !bearer_ok(&headers) {
        return unauthorized();
    }
    let parent = metadata["parents"][0].as_str().unwrap_or_default().to_string();
    if parent == "missing-folder" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"code": 404, "message": format!("File not found: {parent}.")}})),
        )
            .into_response();
    }
    let mut recorded = state.recorded.lock().unwrap();
    recorded.sessions.push(metadata);
    let session = recorded.sessions.len();
    let location = format!(
        "{}/upload/drive/v3/files?uploadType=resumable&upload_id={session}",
        state.base
    );
    (StatusCode::OK, [(header::LOCATION, location)]).into_response()
}

async fn finish_upload(
    State(state): State<MockGoogle>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !bearer_ok(&headers) {
        return unauthorized();
    }
    let session: usize = query
        .get("upload_id")
        .and_then(|id| id.parse().ok())
        .unwrap_or_default();
    let mut recorded = state.recorded.lock().unwrap();
    let name = recorded.sessions[session - 1]["name"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    recorded.uploads.push((name.clone(), body.to_vec()));
    Json(json!({
        "id": format!("file{}", 122 + session),
        "name": name,
        "size": body.len().to_string(),
        "createdTime": "2024-03-05T10:15:31.000Z",
    }))
    .into_response()
}

async fn list_files(State(state): State<MockGoogle>, headers: HeaderMap) -> Response {
    if !bearer_ok(&headers) {
        return unauthorized();
    }
    let recorded = state.recorded.lock().unwrap();
    let files: Vec<Value> = recorded
        .uploads
        .iter()
        .enumerate()
        .rev()
        .map(|(index, (name, body))| {
            json!({"id": format!("file{}", 123 + index), "name": name, "size": body.len().to_string()})
        })
        .collect();
    Json(json!({ "files": files })).into_response()
}

async fn delete_file(
    State(state): State<MockGoogle>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !bearer_ok(&headers) {
        return unauthorized();
    }
    state.recorded.lock().unwrap().deleted.push(id);
    StatusCode::NO_CONTENT.into_response()
}

pub async fn spawn_google() -> MockGoogle {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock google");
    let addr = listener.local_addr().expect("local addr");
    let state = MockGoogle {
        base: format!("http://{addr}"),
        recorded: Arc::default(),
    };
    let router = Router::new()
        .route("/token", post(token))
        .route("/upload/drive/v3/files", post(start_upload).put(finish_upload))
        .route("/drive/v3/files", get(list_files))
        .route("/drive/v3/files/:id", delete(delete_file))
        .layer(middleware::from_fn_with_state(state.clone(), count_requests))
        .with_state(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    state
}

/// Hands back a fixed code and counts how often it was asked.
pub struct ScriptedPrompt {
    code: String,
    pub calls: AtomicUsize,
}

impl ScriptedPrompt {
    pub fn new(code: &str) -> Arc<Self> {
        Arc::new(Self {
            code: code.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodePrompt for ScriptedPrompt {
    async fn request_code(&self, url: &Url) -> Result<String, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(url.as_str().contains("access_type=offline"));
        Ok(self.code.clone())
    }
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub google: MockGoogle,
    pub env: HashMap<String, String>,
}

impl Fixture {
    /// A workspace whose fake `mysqldump` runs `script` through `/bin/sh`.
    pub async fn new(script: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let google = spawn_google().await;

        let script_path = dir.path().join("fake-mysqldump.sh");
        std::fs::write(&script_path, script).expect("write dump script");
        let credentials = dir.path().join("credentials.json");
        std::fs::write(
            &credentials,
            json!({
                "installed": {
                    "client_id": "test-client.apps.googleusercontent.com",
                    "client_secret": "test-secret",
                    "redirect_uris": ["urn:ietf:wg:oauth:2.0:oob"],
                    "auth_uri": format!("{}/auth", google.base),
                    "token_uri": format!("{}/token", google.base),
                }
            })
            .to_string(),
        )
        .expect("write credentials");

        let env = HashMap::from([
            ("MYSQL_HOST", "127.0.0.1".to_string()),
            ("MYSQL_USER", "backup".to_string()),
            ("MYSQL_PASSWORD", "s3cret".to_string()),
            ("MYSQL_DATABASE", "orders".to_string()),
            ("BACKUP_DIR", dir.path().join("b").display().to_string()),
            ("GOOGLE_DRIVE_FOLDER_ID", "folder-1".to_string()),
            ("GOOGLE_CREDENTIALS_PATH", credentials.display().to_string()),
            ("GOOGLE_TOKEN_PATH", dir.path().join("token.json").display().to_string()),
            ("BACKUP_TIMEZONE", "UTC".to_string()),
            ("MYSQLDUMP_BIN", "/bin/sh".to_string()),
            ("MYSQLDUMP_ARGS", script_path.display().to_string()),
            ("UPLOAD_MAX_ATTEMPTS", "1".to_string()),
        ])
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();

        Self { dir, google, env }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.env.insert(key.to_string(), value.to_string());
    }

    pub fn token_path(&self) -> PathBuf {
        self.dir.path().join("token.json")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.dir.path().join("b")
    }

    pub fn write_token(&self, token: Value) {
        std::fs::write(self.token_path(), token.to_string()).expect("write token");
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.dir.path().join("credentials.json")
    }

    pub fn endpoints(&self) -> drive_sdk::DriveEndpoints {
        drive_sdk::DriveEndpoints::new(
            format!("{}/drive/v3", self.google.base),
            format!("{}/upload/drive/v3", self.google.base),
        )
    }

    pub fn config(&self) -> Config {
        Config::from_lookup(|key| self.env.get(key).cloned()).expect("valid config")
    }

    pub fn app(&self, prompt: Arc<dyn CodePrompt>) -> App {
        AppBuilder::new(self.config())
            .endpoints(self.endpoints())
            .prompt(prompt)
            .clock(Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2024, 3, 5, 10, 15, 30).unwrap(),
            )))
            .build()
            .expect("app")
    }
}
