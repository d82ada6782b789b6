//! Path to handler mapping.
//!
//! Routing is method-agnostic and exact-match on the request path. The
//! standard table is built by [`Router::standard`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::http::handlers::{self, AppState};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::server::connection::ConnId;

/// A route handler fills in `Response` for `Request`.
pub type Handler = Box<dyn Fn(&Request, &mut Response, &mut Exchange) + Send + Sync>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("no route for `{0}`")]
    NotFound(String),
}

/// Per-exchange context handed to handlers.
///
/// Handlers never touch the connection directly; they record what should
/// happen to it and the connection state machine applies it after the
/// response went out.
#[derive(Debug)]
pub struct Exchange {
    conn_id: ConnId,
    upgrade: Option<String>,
}

impl Exchange {
    pub fn new(conn_id: ConnId) -> Self {
        Self { conn_id, upgrade: None }
    }

    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    /// Asks for the connection to switch to WebSocket, bound to `username`.
    pub fn accept_upgrade(&mut self, username: impl Into<String>) {
        self.upgrade = Some(username.into());
    }

    pub fn upgrade(&self) -> Option<&str> {
        self.upgrade.as_deref()
    }

    pub fn take_upgrade(&mut self) -> Option<String> {
        self.upgrade.take()
    }
}

#[derive(Default)]
pub struct Router {
    routes: HashMap<String, Handler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// The server's route table: `/`, `/favicon.ico`, `/login`,
    /// `/dashboard` and `/upgrade`.
    pub fn standard(state: Arc<AppState>) -> Self {
        let mut router = Router::new();

        let s = state.clone();
        router.route("/", move |req, resp, _| handlers::handle_static(&s, req, resp));
        let s = state.clone();
        router.route("/favicon.ico", move |req, resp, _| {
            handlers::handle_static(&s, req, resp)
        });
        let s = state.clone();
        router.route("/login", move |req, resp, _| handlers::handle_login(&s, req, resp));
        let s = state.clone();
        router.route("/dashboard", move |req, resp, _| {
            handlers::handle_dashboard(&s, req, resp)
        });
        router.route("/upgrade", handlers::handle_upgrade);

        router
    }

    /// Adds or replaces the handler for `path`.
    pub fn route<F>(&mut self, path: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response, &mut Exchange) + Send + Sync + 'static,
    {
        self.routes.insert(path.into(), Box::new(handler));
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    pub fn dispatch(
        &self,
        req: &Request,
        resp: &mut Response,
        exchange: &mut Exchange,
    ) -> Result<(), RouteError> {
        let handler = self
            .routes
            .get(req.path.as_str())
            .ok_or_else(|| RouteError::NotFound(req.path.clone()))?;
        handler(req, resp, exchange);
        Ok(())
    }
}
