//! Metric catalog and value extraction
//!
//! One static, versioned table describes every meter metric the engine knows.
//! Keys missing from the table are dropped during record building, so every
//! value that reaches a [`ChannelRecord`] has a descriptor and a rounding
//! policy.

use serde::Serialize;
use serde_json::Value;
use strum::{Display, EnumString};

use crate::models::ChannelRecord;

pub mod system;

pub use system::{SystemMetric, SystemValue, system_value};

/// Bumped whenever a descriptor's unit or precision changes
pub const CATALOG_VERSION: u32 = 1;

/// Precision used for catalog entries without an explicit one
pub const DEFAULT_PRECISION: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MetricCategory {
    Meter,
    Diagnostic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StateClass {
    Measurement,
    Total,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricDescriptor {
    pub key: &'static str,
    pub name: &'static str,
    pub unit: Option<&'static str>,
    /// `None` falls back to [`DEFAULT_PRECISION`]
    pub decimal_precision: Option<u8>,
    pub category: MetricCategory,
    pub state_class: StateClass,
}

impl MetricDescriptor {
    pub fn precision(&self) -> u8 {
        self.decimal_precision.unwrap_or(DEFAULT_PRECISION)
    }

    pub fn round(&self, value: f64) -> f64 {
        round_to_precision(value, self.precision())
    }
}

const fn meter(
    key: &'static str,
    name: &'static str,
    unit: Option<&'static str>,
    decimal_precision: Option<u8>,
    state_class: StateClass,
) -> MetricDescriptor {
    MetricDescriptor {
        key,
        name,
        unit,
        decimal_precision,
        category: MetricCategory::Meter,
        state_class,
    }
}

pub static METER_CATALOG: &[MetricDescriptor] = &[
    meter("voltage", "Voltage", Some("V"), Some(1), StateClass::Measurement),
    meter("current", "Current", Some("A"), Some(3), StateClass::Measurement),
    meter("activePower", "Active Power", Some("W"), Some(1), StateClass::Measurement),
    meter("reactivePower", "Reactive Power", Some("var"), Some(1), StateClass::Measurement),
    meter("apparentPower", "Apparent Power", Some("VA"), Some(1), StateClass::Measurement),
    meter("powerFactor", "Power Factor", None, Some(3), StateClass::Measurement),
    meter("activeEnergyImported", "Active Energy Imported", Some("Wh"), Some(0), StateClass::Total),
    meter("activeEnergyExported", "Active Energy Exported", Some("Wh"), Some(0), StateClass::Total),
    meter("reactiveEnergyImported", "Reactive Energy Imported", Some("varh"), Some(0), StateClass::Total),
    meter("reactiveEnergyExported", "Reactive Energy Exported", Some("varh"), Some(0), StateClass::Total),
    meter("apparentEnergy", "Apparent Energy", Some("VAh"), Some(0), StateClass::Total),
    meter("gridFrequency", "Grid Frequency", Some("Hz"), None, StateClass::Measurement),
];

/// Look up a meter metric by its device key
pub fn descriptor(key: &str) -> Option<&'static MetricDescriptor> {
    METER_CATALOG.iter().find(|d| d.key == key)
}

/// Per-channel metrics, grid frequency is reported at device level
pub fn channel_metrics() -> impl Iterator<Item = &'static MetricDescriptor> {
    METER_CATALOG.iter().filter(|d| d.key != "gridFrequency")
}

/// Decimal precision for a key, falling back to the default for unlisted keys
pub fn precision_for(key: &str) -> u8 {
    descriptor(key).map_or(DEFAULT_PRECISION, MetricDescriptor::precision)
}

/// Round to `digits` decimals.
///
/// Goes through correctly rounded decimal formatting so the result matches
/// rounding the exact binary value half-to-even, not `(x * 10^n).round()`.
pub fn round_to_precision(value: f64, digits: u8) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let rounded = format!("{value:.prec$}", prec = usize::from(digits))
        .parse::<f64>()
        .unwrap_or(value);
    // collapse -0.0
    if rounded == 0.0 { 0.0 } else { rounded }
}

/// Floor to the nearest 0.5
pub fn floor_to_half(value: f64) -> f64 {
    (value * 2.0).floor() / 2.0
}

/// Coerce a JSON value to f64: numbers and numeric strings only
pub fn coerce_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Coerce and round a raw device value for `key`, `None` when unavailable
pub fn extract_raw(key: &str, raw: &Value) -> Option<f64> {
    coerce_f64(raw).map(|v| round_to_precision(v, precision_for(key)))
}

/// Read a metric from a record at catalog precision
pub fn extract(record: &ChannelRecord, key: &str) -> Option<f64> {
    let desc = descriptor(key)?;
    record
        .metrics
        .get(key)
        .copied()
        .flatten()
        .map(|v| desc.round(v))
}
