//! Device API access
//!
//! Pipelines talk to the device only through [`DeviceTransport`], which returns
//! parsed JSON or a classified [`DeviceError`]. [`DeviceHttpClient`] is the
//! production implementation.

use async_trait::async_trait;
use serde_json::Value;
use strum::{Display, EnumIter};
use tracing::{info, warn};

pub mod http;

pub use http::DeviceHttpClient;

use crate::errors::DeviceResult;

/// Read-only device API endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Endpoint {
    Health,
    SystemInfo,
    UpdateInfo,
    ChannelConfig,
    MeterValues,
    GridFrequency,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Self::Health => "/api/v1/health",
            Self::SystemInfo => "/api/v1/system/info",
            Self::UpdateInfo => "/api/v1/firmware/update-info",
            Self::ChannelConfig => "/api/v1/ade7953/channel",
            Self::MeterValues => "/api/v1/ade7953/meter-values",
            Self::GridFrequency => "/api/v1/ade7953/grid-frequency",
        }
    }
}

/// Authenticated GET access to the device
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// GET an endpoint and parse the body as JSON
    async fn get_json(&self, endpoint: Endpoint) -> DeviceResult<Value>;
}

/// Check the health endpoint.
///
/// Transport and authentication failures are returned. A reachable device
/// reporting something other than `"ok"` is only logged.
pub async fn verify_connection(transport: &dyn DeviceTransport) -> DeviceResult<()> {
    let body = transport.get_json(Endpoint::Health).await?;
    match body.get("status").and_then(Value::as_str) {
        Some("ok") => info!("Device health check passed"),
        Some(other) => warn!("Device health reports status '{}'", other),
        None => warn!("Device health response carries no status field"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DeviceError;
    use serde_json::json;

    #[test]
    fn test_endpoint_paths() {
        assert_eq!(Endpoint::MeterValues.path(), "/api/v1/ade7953/meter-values");
        assert_eq!(Endpoint::UpdateInfo.path(), "/api/v1/firmware/update-info");
        assert_eq!(Endpoint::ChannelConfig.to_string(), "channel_config");
    }

    #[tokio::test]
    async fn test_verify_connection_tolerates_degraded_status() {
        let mut transport = MockDeviceTransport::new();
        transport
            .expect_get_json()
            .withf(|e| *e == Endpoint::Health)
            .returning(|_| Ok(json!({"status": "degraded"})));
        assert!(verify_connection(&transport).await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_connection_propagates_auth_failure() {
        let mut transport = MockDeviceTransport::new();
        transport
            .expect_get_json()
            .returning(|e| Err(DeviceError::auth_failed(e.path())));
        let err = verify_connection(&transport).await.unwrap_err();
        assert!(err.is_auth_failure());
    }
}
