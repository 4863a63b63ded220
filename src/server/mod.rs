//! HTTP surface: a thin axum adapter over the session controller and the gateway.

mod error;
mod handlers;

pub use error::ApiError;

use crate::gateway::Gateway;
use crate::session::SessionController;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Default request body limit; base64 media is large.
pub const DEFAULT_BODY_LIMIT: usize = 50 * 1024 * 1024;

/// Every route, relative to the base path.
pub const ENDPOINTS: &[(&str, &str)] = &[
    ("GET", "/session/qr"),
    ("GET", "/session/status"),
    ("POST", "/message/text"),
    ("POST", "/message/image"),
    ("POST", "/message/doc"),
    ("POST", "/message/audio"),
    ("POST", "/session/logout"),
    ("POST", "/session/reset"),
    ("GET", "/health"),
];

#[derive(Clone)]
pub(crate) struct AppState {
    session: SessionController,
    gateway: Gateway,
}

/// Router knobs.
#[derive(Clone, Debug)]
pub struct RouterOptions {
    /// Prefix for every route (`""` or e.g. `/api`).
    pub base_path: String,
    pub body_limit: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            base_path: String::new(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl RouterOptions {
    /// Base path with a leading slash and no trailing one; `None` for the root.
    pub fn normalized_base(&self) -> Option<String> {
        let trimmed = self.base_path.trim().trim_matches('/');
        if trimmed.is_empty() {
            None
        } else {
            Some(format!("/{trimmed}"))
        }
    }
}

/// Build the API router (shared between production startup and tests).
pub fn build_router(session: SessionController, options: &RouterOptions) -> Router {
    let state = AppState {
        gateway: Gateway::new(session.clone()),
        session,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let api = Router::new()
        .route("/session/qr", get(handlers::pairing_code))
        .route("/session/status", get(handlers::status))
        .route("/message/text", post(handlers::send_text))
        .route("/message/image", post(handlers::send_image))
        .route("/message/doc", post(handlers::send_document))
        .route("/message/audio", post(handlers::send_audio))
        .route("/session/logout", post(handlers::logout))
        .route("/session/reset", post(handlers::reset))
        .route("/health", get(handlers::health))
        .with_state(state);

    let router = match options.normalized_base() {
        Some(base) => Router::new().nest(&base, api),
        None => api,
    };

    router
        .layer(DefaultBodyLimit::max(options.body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(error::panic_response))
}

/// Log the listening address and every endpoint.
pub fn log_banner(addr: SocketAddr, options: &RouterOptions) {
    let base = options.normalized_base().unwrap_or_default();
    let mut lines = vec![
        format!("wa-relay v{}", env!("CARGO_PKG_VERSION")),
        format!("listening on http://{addr}{base}"),
        String::new(),
    ];
    lines.extend(
        ENDPOINTS
            .iter()
            .map(|(method, path)| format!("{method:<5} {base}{path}")),
    );
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));
}

/// Serve `router` until `shutdown` resolves, then drain in-flight requests.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
