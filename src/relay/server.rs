use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::{Html, Json, Response};
use axum::routing::get;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use super::manager::ConnectionManager;
use super::session::serve_connection;
use crate::error::RelayError;

const CHAT_PAGE: &str = include_str!("page.html");

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    connections: usize,
}

/// Routes: `GET /` chat page, `GET /ws` relay, `GET /health`.
pub fn router(manager: Arc<ConnectionManager>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(manager)
}

/// Serves until `shutdown` resolves, then waits for open connections to end.
pub async fn serve<F>(
    listener: TcpListener,
    manager: Arc<ConnectionManager>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "relay listening");
    }
    axum::serve(listener, router(manager))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => {
            error!(error = %err, "cannot listen for Ctrl-C, running until killed");
            std::future::pending::<()>().await;
        }
    }
}

async fn index() -> Html<&'static str> {
    Html(CHAT_PAGE)
}

async fn ws_handler(
    State(manager): State<Arc<ConnectionManager>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade
        .on_failed_upgrade(|err: axum::Error| {
            let err = RelayError::Handshake(err.to_string());
            warn!(error = %err, "websocket upgrade failed");
        })
        .on_upgrade(move |socket| async move { serve_connection(&manager, socket).await })
}

async fn health(State(manager): State<Arc<ConnectionManager>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: manager.active_count(),
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::agent::{AgentHandle, ResponseStream, RunOptions};
    use crate::error::AgentError;

    struct NoAgent;

    #[async_trait]
    impl AgentHandle for NoAgent {
        async fn arun(
            &self,
            _prompt: String,
            _options: RunOptions,
        ) -> Result<ResponseStream, AgentError> {
            Err(AgentError::Config("not used".to_string()))
        }
    }

    fn app() -> Router {
        router(Arc::new(ConnectionManager::new(Arc::new(NoAgent))))
    }

    async fn fetch(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn health_reports_connection_count() {
        let (status, body) = fetch(app(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({"status": "ok", "connections": 0}));
    }

    #[tokio::test]
    async fn index_serves_chat_page() {
        let (status, body) = fetch(app(), "/").await;
        assert_eq!(status, StatusCode::OK);
        let page = String::from_utf8(body).unwrap();
        assert!(page.contains("/ws"));
        assert!(page.contains("ToolCallStarted"));
    }

    #[tokio::test]
    async fn plain_get_on_ws_is_rejected() {
        let (status, _) = fetch(app(), "/ws").await;
        assert!(status.is_client_error());
    }
}
