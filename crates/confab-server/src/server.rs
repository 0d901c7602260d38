use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::client::{self, ClientSender};
use crate::handlers::SharedState;
use crate::session::Session;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    /// Shared secret for verifying admin tokens. Required; never
    /// hardcoded.
    pub token_secret: String,
    /// Per-connection outbound queue capacity.
    pub max_send_queue: usize,
    /// Upper bound in milliseconds of the random delay applied before
    /// each command executes.
    pub dispatch_jitter_ms: u64,
}

impl ServerConfig {
    pub fn new(port: u16, token_secret: impl Into<String>) -> Self {
        Self {
            port,
            token_secret: token_secret.into(),
            max_send_queue: 256,
            dispatch_jitter_ms: 400,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,
    pub max_send_queue: usize,
    pub dispatch_jitter_ms: u64,
}

/// Build the Axum router: the WebSocket upgrade route plus a bare 404
/// for every other request.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Create and start the server. Returns a handle that keeps the
/// accept loop alive.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    let state = AppState {
        shared: Arc::new(SharedState::new(&config.token_secret)),
        max_send_queue: config.max_send_queue,
        dispatch_jitter_ms: config.dispatch_jitter_ms,
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "Confab server listening");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a new WebSocket connection for its whole lifetime.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (channel, rx) = ClientSender::pair(state.max_send_queue);
    tracing::info!(client_id = %channel.id(), "WebSocket client connected");

    let session = Session::new(channel, Arc::clone(&state.shared), state.dispatch_jitter_ms);
    client::run_connection(socket, session, rx).await;
}

/// Non-upgrade HTTP requests get an empty 404.
async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_starts_and_serves_bare_404() {
        let config = ServerConfig::new(0, "test-secret"); // random port
        let handle = start(config).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 404);
        assert!(resp.text().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_paths_are_404_too() {
        let config = ServerConfig::new(0, "test-secret");
        let handle = start(config).await.unwrap();

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[test]
    fn build_router_creates_routes() {
        let state = AppState {
            shared: Arc::new(SharedState::new("test-secret")),
            max_send_queue: 32,
            dispatch_jitter_ms: 400,
        };
        let _router = build_router(state);
    }

    #[test]
    fn config_defaults() {
        let config = ServerConfig::new(8081, "s3cret");
        assert_eq!(config.port, 8081);
        assert_eq!(config.max_send_queue, 256);
        assert_eq!(config.dispatch_jitter_ms, 400);
    }
}
