use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Highest channel index the device exposes (17 channels, 0..=16)
pub const MAX_CHANNEL_INDEX: u8 = 16;

/// One active monitored circuit as seen by a single meter poll.
///
/// Records are rebuilt on every poll and replaced wholesale. `label` is
/// cosmetic, identity is `channel_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub channel_index: u8,
    pub active: bool,
    pub label: String,
    /// Catalog metric key to rounded value, `None` when unavailable
    pub metrics: BTreeMap<String, Option<f64>>,
}

/// Output of the meter pipeline
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeterReadings {
    /// Active channels ordered by index, indices unique
    pub channels: Vec<ChannelRecord>,
    pub grid_frequency: Option<f64>,
}

impl MeterReadings {
    pub fn channel(&self, index: u8) -> Option<&ChannelRecord> {
        self.channels
            .binary_search_by_key(&index, |c| c.channel_index)
            .ok()
            .map(|pos| &self.channels[pos])
    }
}

/// Output of the system pipeline
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: Option<String>,
    pub firmware_version: Option<String>,
    pub temperature_celsius: Option<f64>,
    pub wifi_rssi: Option<f64>,
    pub heap_free_percentage: Option<f64>,
    pub uptime_seconds: Option<f64>,
    pub storage_free_percentage: Option<f64>,
    /// `None` when the update-info fetch failed
    pub update_available: Option<bool>,
    pub available_version: Option<String>,
    pub product_name: Option<String>,
    pub manufacturer: Option<String>,
    pub chip_model: Option<String>,
    pub wifi_ssid: Option<String>,
    pub local_ip: Option<String>,
}

impl DeviceInfo {
    /// Unknown update state reads as "no update"
    pub fn update_available(&self) -> bool {
        self.update_available.unwrap_or(false)
    }
}

/// Complete result of one successful poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub payload: T,
    pub fetched_at: DateTime<Utc>,
    pub success: bool,
}

impl<T> Snapshot<T> {
    pub fn committed(payload: T) -> Self {
        Self {
            payload,
            fetched_at: Utc::now(),
            success: true,
        }
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.fetched_at)
    }
}
