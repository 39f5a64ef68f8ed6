//! `WsroomServer`: Axum router, listener and shutdown.

use std::net::SocketAddr;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::registry::Registry;
use crate::websocket::upgrade::ws_handler;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection and session registry.
    pub registry: Registry,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus render handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// HTTP server exposing the upgrade endpoint, `/health` and `/metrics`.
pub struct WsroomServer {
    registry: Registry,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl WsroomServer {
    /// Create a server around `registry`.
    pub fn new(registry: Registry, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            registry,
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route(&self.config().ws_path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the configured address and serve in a background task.
    ///
    /// The task finishes once [`Registry::shutdown`] has been called and
    /// in-flight HTTP requests have completed.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let config = self.config();
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;
        info!(%addr, ws_path = %config.ws_path, "wsroom server listening");

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.registry.shutdown_token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server stopped with error");
            }
        });
        Ok((addr, handle))
    }

    /// Close every connection and stop accepting.
    ///
    /// Waits up to the configured shutdown timeout for connections to flush
    /// their close frames. Returns `false` if the timeout elapsed.
    pub async fn shutdown(&self) -> bool {
        let deadline = self.config().shutdown_timeout;
        info!(?deadline, "shutting down");
        self.registry.shutdown(deadline).await
    }

    /// Get the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        self.registry.config()
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = &state.registry;
    Json(health::health_check(
        state.start_time,
        registry.connection_count(),
        registry.session_count(),
        registry.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    use super::*;

    fn make_server() -> WsroomServer {
        WsroomServer::new(Registry::builder(ServerConfig::default()).build(), None)
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[test]
    fn server_with_default_config() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 0);
        assert_eq!(server.config().ws_path, "/ws");
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (status, body) = get_body(make_server().router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["sessions"], 0);
    }

    #[tokio::test]
    async fn health_reports_shutdown() {
        let server = make_server();
        assert!(server.shutdown().await);
        let (_, body) = get_body(server.router(), "/health").await;
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "shutting_down");
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let (status, _) = get_body(make_server().router(), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_handle_renders() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = WsroomServer::new(
            Registry::builder(ServerConfig::default()).build(),
            Some(handle),
        );
        let (status, _) = get_body(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn plain_get_on_ws_path_is_rejected() {
        let (status, _) = get_body(make_server().router(), "/ws").await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn custom_ws_path_is_routed() {
        let config = ServerConfig {
            ws_path: "/socket".into(),
            ..ServerConfig::default()
        };
        let server = WsroomServer::new(Registry::builder(config).build(), None);
        let (status, _) = get_body(server.router(), "/socket").await;
        assert!(status.is_client_error());
        assert_ne!(status, StatusCode::NOT_FOUND);
        let (status, _) = get_body(server.router(), "/ws").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (status, _) = get_body(make_server().router(), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.shutdown().await);
        handle.await.unwrap();
    }
}
