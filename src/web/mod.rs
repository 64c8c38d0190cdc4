//! Read-only HTTP surface over the current snapshots

use anyhow::Result;
use axum::{Router, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::WebConfig;
use crate::coordinator::CoordinatorReader;
use crate::engine::TelemetryEngine;
use crate::identity::IdentityTracker;
use crate::models::{DeviceInfo, MeterReadings};

pub mod handlers;
pub mod responses;

pub use responses::ApiResponse;

#[derive(Clone)]
pub struct AppState {
    pub connection_key: String,
    pub meter: CoordinatorReader<MeterReadings>,
    pub system: CoordinatorReader<DeviceInfo>,
    pub identity: Arc<IdentityTracker>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn from_engine(engine: &TelemetryEngine) -> Self {
        Self {
            connection_key: engine.connection_key().to_string(),
            meter: engine.meter(),
            system: engine.system(),
            identity: engine.identity(),
            start_time: chrono::Utc::now(),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/v1/meter", get(handlers::snapshots::meter_snapshot))
        .route("/api/v1/system", get(handlers::snapshots::system_snapshot))
        .route("/api/v1/identity", get(handlers::snapshots::identity_model))
        .route("/api/v1/catalog", get(handlers::catalog::metric_catalog))
        .with_state(state)
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(config: &WebConfig, state: AppState) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
        Ok(Self {
            app: create_router(state),
            addr,
        })
    }

    /// Serve until the token is cancelled
    pub async fn serve_with_cancellation(self, cancellation_token: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!("Read API listening on http://{}", listener.local_addr()?);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move {
                cancellation_token.cancelled().await;
                info!("Web server received cancellation signal, shutting down gracefully");
            })
            .await?;
        Ok(())
    }
}
