use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::SystemTime};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::{manager::PoolManager, metrics::PoolManagerMetrics};

/// HTTP server for metrics export and health checks
pub struct HttpServer {
    manager: PoolManager,
    metrics: Arc<PoolManagerMetrics>,
    bind_addr: SocketAddr,
}

impl HttpServer {
    pub fn new(manager: PoolManager, bind_addr: SocketAddr) -> Self {
        let metrics = manager.metrics().clone();
        Self {
            manager,
            metrics,
            bind_addr,
        }
    }

    pub fn router(self) -> Router {
        let app_state = AppState {
            manager: self.manager,
            metrics: self.metrics,
            startup_time: SystemTime::now(),
        };

        Router::new()
            .route("/health", get(health_check))
            .route("/metrics", get(prometheus_metrics))
            .route("/pools", get(pools))
            .with_state(app_state)
    }

    /// Serve until the shutdown signal fires
    pub async fn start(
        self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let bind_addr = self.bind_addr;
        let app = self.router();

        info!("Starting HTTP server on {}", bind_addr);
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                info!("HTTP server shutting down");
            })
            .await?;

        Ok(())
    }
}

#[derive(Clone)]
struct AppState {
    manager: PoolManager,
    metrics: Arc<PoolManagerMetrics>,
    startup_time: SystemTime,
}

/// Basic health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state
        .startup_time
        .elapsed()
        .map(|d| d.as_secs())
        .unwrap_or_default();

    Json(json!({
        "status": "healthy",
        "uptime_seconds": uptime,
        "pools": state.manager.topology().len(),
        "status_store": state.manager.status_store().name(),
    }))
}

/// Prometheus metrics endpoint
async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.export() {
        Ok(metrics) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            metrics,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to export metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to export metrics".to_string(),
            )
                .into_response()
        }
    }
}

/// Pool topology summary
async fn pools(State(state): State<AppState>) -> impl IntoResponse {
    let pools: Vec<_> = state
        .manager
        .topology()
        .pools()
        .map(|pool| {
            json!({
                "id": pool.id,
                "name": pool.name,
                "threshold_percentage": pool.threshold_percentage,
                "required_successes": pool.required_successes(),
                "targets": pool.targets.iter().map(|t| &t.id).collect::<Vec<_>>(),
                "nameservers": pool.nameservers.iter().map(|ns| ns.to_string()).collect::<Vec<_>>(),
                "also_notifies": pool.also_notifies.iter().map(|ns| ns.to_string()).collect::<Vec<_>>(),
            })
        })
        .collect();

    Json(json!({ "pools": pools }))
}
