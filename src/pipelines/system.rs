use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{PipelineStage, PollPipeline, StageTracker, fetch_required};
use crate::catalog::coerce_f64;
use crate::client::{DeviceTransport, Endpoint};
use crate::errors::DeviceResult;
use crate::identity::IdentityTracker;
use crate::models::{DeviceInfo, Snapshot};

/// Device status with best-effort firmware update availability
pub struct SystemPipeline {
    transport: Arc<dyn DeviceTransport>,
    identity: Option<Arc<IdentityTracker>>,
    stage: StageTracker,
}

impl SystemPipeline {
    pub fn new(transport: Arc<dyn DeviceTransport>) -> Self {
        Self {
            transport,
            identity: None,
            stage: StageTracker::new("system"),
        }
    }

    /// Bind device identity after every committed snapshot
    pub fn with_identity(mut self, identity: Arc<IdentityTracker>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn stage(&self) -> &StageTracker {
        &self.stage
    }
}

fn text_at(body: &Value, pointer: &str) -> Option<String> {
    match body.pointer(pointer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_at(body: &Value, pointer: &str) -> Option<f64> {
    body.pointer(pointer).and_then(coerce_f64)
}

/// Read device info from the `static`/`dynamic` sections of system info
pub fn parse_system_info(body: &Value) -> DeviceInfo {
    let uptime_seconds = number_at(body, "/dynamic/time/uptimeSeconds").or_else(|| {
        number_at(body, "/dynamic/time/uptimeMilliseconds").map(|ms| ms / 1000.0)
    });

    DeviceInfo {
        device_id: text_at(body, "/static/device/id"),
        firmware_version: text_at(body, "/static/firmware/buildVersion"),
        temperature_celsius: number_at(body, "/dynamic/performance/temperatureCelsius"),
        wifi_rssi: number_at(body, "/dynamic/network/wifiRssi"),
        heap_free_percentage: number_at(body, "/dynamic/memory/heap/freePercentage"),
        uptime_seconds,
        storage_free_percentage: number_at(body, "/dynamic/storage/littlefs/freePercentage"),
        update_available: None,
        available_version: None,
        product_name: text_at(body, "/static/product/fullProductName")
            .or_else(|| text_at(body, "/static/product/productName")),
        manufacturer: text_at(body, "/static/product/companyName"),
        chip_model: text_at(body, "/static/hardware/chipModel"),
        wifi_ssid: text_at(body, "/dynamic/network/wifiSsid"),
        local_ip: text_at(body, "/dynamic/network/wifiLocalIp"),
    }
}

/// `(update_available, available_version)` from update info
pub fn parse_update_info(body: &Value) -> (Option<bool>, Option<String>) {
    let update_available = body.get("isLatest").and_then(Value::as_bool).map(|latest| !latest);
    (update_available, text_at(body, "/availableVersion"))
}

#[async_trait]
impl PollPipeline for SystemPipeline {
    type Output = DeviceInfo;

    fn name(&self) -> &'static str {
        "system"
    }

    async fn poll(&self) -> DeviceResult<DeviceInfo> {
        self.stage.enter(PipelineStage::FetchingSystemInfo);
        let body = fetch_required(self.transport.as_ref(), Endpoint::SystemInfo, &self.stage).await?;

        self.stage.enter(PipelineStage::FetchingUpdateInfo);
        let update = match self.transport.get_json(Endpoint::UpdateInfo).await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!("Update info unavailable, reporting no update: {}", e);
                None
            }
        };

        self.stage.enter(PipelineStage::Normalizing);
        let mut info = parse_system_info(&body);
        if let Some(update) = update {
            (info.update_available, info.available_version) = parse_update_info(&update);
        }
        debug!(
            "System poll: firmware {:?}, update available {:?}",
            info.firmware_version, info.update_available
        );

        self.stage.enter(PipelineStage::Committed);
        Ok(info)
    }

    fn on_commit(&self, snapshot: &Snapshot<DeviceInfo>) {
        let Some(identity) = &self.identity else {
            return;
        };
        if let Err(e) = identity.observe_device(&snapshot.payload) {
            error!("Failed to record device identity: {}", e);
        }
    }
}
