#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use energyme_sync::TelemetryEngine;
use energyme_sync::client::{DeviceTransport, Endpoint};
use energyme_sync::config::PollingConfig;
use energyme_sync::errors::{DeviceError, DeviceResult};
use energyme_sync::identity::InMemoryRegistry;

pub const HOST: &str = "192.168.1.76";

#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Fail(DeviceError),
}

/// Transport answering each endpoint from a replaceable script
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<Endpoint, Reply>>,
    delays: Mutex<HashMap<Endpoint, Duration>>,
    calls: Mutex<HashMap<Endpoint, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    /// Healthy device with three active channels
    pub fn device() -> Arc<Self> {
        let transport = Arc::new(Self::default());
        transport.reply(Endpoint::Health, json!({"status": "ok"}));
        transport.reply(Endpoint::SystemInfo, system_info());
        transport.reply(Endpoint::UpdateInfo, update_info());
        transport.reply(Endpoint::ChannelConfig, channel_config(&["Main", "Kitchen", "Solar"]));
        transport.reply(Endpoint::MeterValues, meter_values(3));
        transport.reply(Endpoint::GridFrequency, json!({"gridFrequency": 50.01}));
        transport
    }

    pub fn reply(&self, endpoint: Endpoint, body: Value) {
        self.replies.lock().unwrap().insert(endpoint, Reply::Json(body));
    }

    pub fn fail(&self, endpoint: Endpoint, error: DeviceError) {
        self.replies.lock().unwrap().insert(endpoint, Reply::Fail(error));
    }

    pub fn delay(&self, endpoint: Endpoint, delay: Duration) {
        self.delays.lock().unwrap().insert(endpoint, delay);
    }

    pub fn calls(&self, endpoint: Endpoint) -> usize {
        self.calls.lock().unwrap().get(&endpoint).copied().unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceTransport for ScriptedTransport {
    async fn get_json(&self, endpoint: Endpoint) -> DeviceResult<Value> {
        *self.calls.lock().unwrap().entry(endpoint).or_default() += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delays.lock().unwrap().get(&endpoint).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = self.replies.lock().unwrap().get(&endpoint).cloned();
        match reply {
            Some(Reply::Json(body)) => Ok(body),
            Some(Reply::Fail(error)) => Err(error),
            None => Err(DeviceError::protocol(endpoint.path(), 404)),
        }
    }
}

pub fn engine(transport: Arc<ScriptedTransport>) -> (TelemetryEngine, Arc<InMemoryRegistry>) {
    engine_with(transport, PollingConfig::default())
}

pub fn engine_with(
    transport: Arc<ScriptedTransport>,
    polling: PollingConfig,
) -> (TelemetryEngine, Arc<InMemoryRegistry>) {
    let registry = Arc::new(InMemoryRegistry::default());
    let engine = TelemetryEngine::with_transport(transport, HOST.to_string(), &polling, registry.clone());
    (engine, registry)
}

pub fn system_info() -> Value {
    json!({
        "static": {
            "product": {
                "companyName": "EnergyMe",
                "productName": "Home",
                "fullProductName": "EnergyMe - Home"
            },
            "firmware": {"buildVersion": "00.12.36", "buildDate": "Aug 29 2025"},
            "hardware": {"chipModel": "ESP32-S3", "chipCores": 2},
            "device": {"id": "588c81c47af8"}
        },
        "dynamic": {
            "time": {"uptimeMilliseconds": 86_400_000u64, "uptimeSeconds": 86_400},
            "memory": {"heap": {"freePercentage": 36.79534, "usedPercentage": 63.20466}},
            "storage": {"littlefs": {"freePercentage": 99.77273}},
            "performance": {"temperatureCelsius": 44},
            "network": {
                "wifiConnected": true,
                "wifiSsid": "Casasha",
                "wifiLocalIp": HOST,
                "wifiRssi": -90
            }
        }
    })
}

pub fn update_info() -> Value {
    json!({
        "currentVersion": "00.12.36",
        "availableVersion": "00.12.40",
        "isLatest": false
    })
}

pub fn channel_config(labels: &[&str]) -> Value {
    Value::Array(
        labels
            .iter()
            .enumerate()
            .map(|(i, label)| {
                json!({
                    "index": i,
                    "active": true,
                    "reverse": false,
                    "label": label,
                    "phase": 1,
                    "ctSpecification": {"currentRating": 100.0, "voltageOutput": 1.0, "scalingFraction": 0.0}
                })
            })
            .collect(),
    )
}

pub fn meter_values(channels: usize) -> Value {
    Value::Array(
        (0..channels)
            .map(|n| {
                let i = n as f64;
                json!({
                    "index": n,
                    "label": format!("Channel {n}"),
                    "phase": 1,
                    "data": {
                        "voltage": 230.5 + i * 0.1,
                        "current": 5.2 + i * 0.2,
                        "activePower": 1198.6 + i * 10.0,
                        "reactivePower": 120.3 + i * 2.0,
                        "apparentPower": 1204.8 + i * 10.1,
                        "powerFactor": 0.99 - i * 0.001,
                        "activeEnergyImported": 1234.56 + i * 100.0,
                        "activeEnergyExported": 12.34 + i,
                        "reactiveEnergyImported": 567.89 + i * 50.0,
                        "reactiveEnergyExported": 5.67 + i * 0.5,
                        "apparentEnergy": 1235.67 + i * 100.1
                    }
                })
            })
            .collect(),
    )
}
