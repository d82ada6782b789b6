//! Route handlers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::http::mime;
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::http::router::Exchange;
use crate::http::static_files::StaticFiles;
use crate::websocket::compute_accept;

/// Decides whether a login attempt succeeds.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, username: &str, password: &str) -> bool;
}

/// Lets every login through.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Authenticator for AcceptAll {
    fn authenticate(&self, _username: &str, _password: &str) -> bool {
        true
    }
}

/// Shared, read-only state the handlers work from.
pub struct AppState {
    pub files: StaticFiles,
    /// Value of the `session_id` cookie handed out on login and required by `/dashboard`.
    pub session_id: String,
    pub auth: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(files: StaticFiles, session_id: impl Into<String>) -> Self {
        Self {
            files,
            session_id: session_id.into(),
            auth: Arc::new(AcceptAll),
        }
    }

    pub fn with_authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = auth;
        self
    }
}

/// Extracts top-level string fields from a JSON object body.
///
/// Non-string scalars are rendered with their JSON text; anything that is not
/// an object yields an empty map.
pub fn json_fields(body: &[u8]) -> HashMap<String, String> {
    let Ok(map) = serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(body) else {
        return HashMap::new();
    };

    map.into_iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect()
}

/// Serves a file resolved from the request path.
pub fn handle_static(state: &AppState, req: &Request, resp: &mut Response) {
    let relative = state.files.url_to_file_path(&req.path);
    if relative.is_empty() {
        tracing::warn!(path = %req.path, "Rejected path traversal");
        resp.set_status(StatusCode::NotFound);
        resp.set_body(Vec::new());
        return;
    }
    serve_file(state, &relative, resp);
}

fn serve_file(state: &AppState, relative: &str, resp: &mut Response) {
    match state.files.read_file(relative) {
        Ok(content) => {
            resp.set_header("Content-Type", mime::from_path(relative));
            resp.set_body(content);
        }
        Err(e) => {
            tracing::debug!(file = relative, error = %e, "Static file unavailable");
            resp.set_error(StatusCode::NotFound);
        }
    }
}

pub fn handle_login(state: &AppState, req: &Request, resp: &mut Response) {
    let fields = json_fields(&req.body);
    let username = fields.get("username").map(String::as_str).unwrap_or("");
    let password = fields.get("password").map(String::as_str).unwrap_or("");

    resp.set_header("Content-Type", "application/json");

    if state.auth.authenticate(username, password) {
        tracing::info!(username, "Login accepted");
        resp.set_header("Set-Cookie", format!("session_id={}; Path=/", state.session_id));
        resp.set_body(r#"{"success": true}"#);
    } else {
        tracing::info!(username, "Login rejected");
        resp.set_status(StatusCode::Unauthorized);
        resp.set_body(r#"{"success": false}"#);
    }
}

pub fn handle_dashboard(state: &AppState, req: &Request, resp: &mut Response) {
    if req.cookie("session_id") != Some(state.session_id.as_str()) {
        resp.set_error(StatusCode::Forbidden);
        return;
    }
    serve_file(state, state.files.dashboard_file(), resp);
}

/// Accepts a WebSocket upgrade for `?username=<name>`.
///
/// The role switch itself happens in the connection state machine once the
/// 101 response has been written.
pub fn handle_upgrade(req: &Request, resp: &mut Response, exchange: &mut Exchange) {
    let key = req.header("Sec-WebSocket-Key").map(str::trim);
    let username = req.query_param("username").filter(|u| !u.is_empty());

    let (Some(key), Some(username)) = (key, username) else {
        resp.set_error(StatusCode::BadRequest);
        return;
    };

    resp.set_status(StatusCode::SwitchingProtocols);
    resp.set_header("Upgrade", "websocket");
    resp.set_header("Connection", "Upgrade");
    resp.set_header("Sec-WebSocket-Accept", compute_accept(key));
    exchange.accept_upgrade(username);
}
