//! Derived system (diagnostic) metrics.

use serde::Serialize;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use super::{MetricCategory, StateClass, floor_to_half, round_to_precision};
use crate::models::DeviceInfo;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// How a raw system value becomes the published one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Floor to the nearest 0.5
    FloorHalf,
    /// Seconds to days, rounded to one decimal
    UptimeDays,
    /// Plain rounding to the given decimals
    Round(u8),
    /// Passed through unchanged
    Verbatim,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SystemMetric {
    FirmwareVersion,
    DeviceId,
    Temperature,
    WifiRssi,
    HeapFreePercentage,
    StorageFreePercentage,
    Uptime,
    UpdateAvailable,
}

impl SystemMetric {
    pub fn name(self) -> &'static str {
        match self {
            Self::FirmwareVersion => "Firmware Version",
            Self::DeviceId => "Device ID",
            Self::Temperature => "Temperature",
            Self::WifiRssi => "WiFi Signal",
            Self::HeapFreePercentage => "Free Heap",
            Self::StorageFreePercentage => "Free Storage",
            Self::Uptime => "Uptime",
            Self::UpdateAvailable => "Update Available",
        }
    }

    pub fn unit(self) -> Option<&'static str> {
        match self {
            Self::Temperature => Some("°C"),
            Self::WifiRssi => Some("dBm"),
            Self::HeapFreePercentage | Self::StorageFreePercentage => Some("%"),
            Self::Uptime => Some("d"),
            Self::FirmwareVersion | Self::DeviceId | Self::UpdateAvailable => None,
        }
    }

    pub fn transform(self) -> Transform {
        match self {
            Self::Temperature | Self::HeapFreePercentage | Self::StorageFreePercentage => {
                Transform::FloorHalf
            }
            Self::Uptime => Transform::UptimeDays,
            Self::WifiRssi => Transform::Round(0),
            Self::FirmwareVersion | Self::DeviceId | Self::UpdateAvailable => Transform::Verbatim,
        }
    }

    pub fn category(self) -> MetricCategory {
        MetricCategory::Diagnostic
    }

    pub fn state_class(self) -> Option<StateClass> {
        match self.transform() {
            Transform::Verbatim => None,
            _ => Some(StateClass::Measurement),
        }
    }
}

/// Published value of a system metric
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SystemValue {
    Number(f64),
    Text(String),
    Flag(bool),
    Unavailable,
}

impl SystemValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }
}

fn numeric(raw: Option<f64>, transform: Transform) -> SystemValue {
    let Some(raw) = raw else {
        return SystemValue::Unavailable;
    };
    let value = match transform {
        Transform::FloorHalf => floor_to_half(raw),
        Transform::UptimeDays => round_to_precision(raw / SECONDS_PER_DAY, 1),
        Transform::Round(digits) => round_to_precision(raw, digits),
        Transform::Verbatim => raw,
    };
    SystemValue::Number(value)
}

fn text(raw: Option<&String>) -> SystemValue {
    raw.filter(|s| !s.trim().is_empty())
        .map_or(SystemValue::Unavailable, |s| SystemValue::Text(s.clone()))
}

/// Derive one system metric from the latest device info
pub fn system_value(info: &DeviceInfo, metric: SystemMetric) -> SystemValue {
    let transform = metric.transform();
    match metric {
        SystemMetric::FirmwareVersion => text(info.firmware_version.as_ref()),
        SystemMetric::DeviceId => text(info.device_id.as_ref()),
        SystemMetric::Temperature => numeric(info.temperature_celsius, transform),
        SystemMetric::WifiRssi => numeric(info.wifi_rssi, transform),
        SystemMetric::HeapFreePercentage => numeric(info.heap_free_percentage, transform),
        SystemMetric::StorageFreePercentage => numeric(info.storage_free_percentage, transform),
        SystemMetric::Uptime => numeric(info.uptime_seconds, transform),
        SystemMetric::UpdateAvailable => SystemValue::Flag(info.update_available()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn info() -> DeviceInfo {
        DeviceInfo {
            device_id: Some("a1b2c3d4e5f6".to_string()),
            firmware_version: Some("00.12.03".to_string()),
            temperature_celsius: Some(36.79534),
            wifi_rssi: Some(-62.4),
            heap_free_percentage: Some(71.82),
            uptime_seconds: Some(86_400.0),
            storage_free_percentage: Some(88.2),
            update_available: None,
            ..DeviceInfo::default()
        }
    }

    #[test]
    fn test_temperature_floors_to_half_degree() {
        assert_eq!(
            system_value(&info(), SystemMetric::Temperature),
            SystemValue::Number(36.5)
        );
    }

    #[test]
    fn test_uptime_is_reported_in_days() {
        assert_eq!(
            system_value(&info(), SystemMetric::Uptime),
            SystemValue::Number(1.0)
        );
        let mut longer = info();
        longer.uptime_seconds = Some(200_000.0);
        assert_eq!(
            system_value(&longer, SystemMetric::Uptime).as_f64(),
            Some(2.3)
        );
    }

    #[test]
    fn test_percentages_and_rssi() {
        let info = info();
        assert_eq!(
            system_value(&info, SystemMetric::HeapFreePercentage),
            SystemValue::Number(71.5)
        );
        assert_eq!(
            system_value(&info, SystemMetric::StorageFreePercentage),
            SystemValue::Number(88.0)
        );
        assert_eq!(
            system_value(&info, SystemMetric::WifiRssi),
            SystemValue::Number(-62.0)
        );
    }

    #[test]
    fn test_unknown_update_state_is_false() {
        assert_eq!(
            system_value(&info(), SystemMetric::UpdateAvailable),
            SystemValue::Flag(false)
        );
    }

    #[test]
    fn test_missing_values_are_unavailable() {
        let empty = DeviceInfo::default();
        for metric in SystemMetric::iter().filter(|m| *m != SystemMetric::UpdateAvailable) {
            assert_eq!(system_value(&empty, metric), SystemValue::Unavailable, "{metric}");
        }
    }

    #[test]
    fn test_metric_keys_are_snake_case() {
        assert_eq!(SystemMetric::HeapFreePercentage.to_string(), "heap_free_percentage");
        assert_eq!(
            "wifi_rssi".parse::<SystemMetric>().ok(),
            Some(SystemMetric::WifiRssi)
        );
    }
}
