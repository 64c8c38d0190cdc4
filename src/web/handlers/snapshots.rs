//! Current snapshot endpoints

use axum::{extract::State, response::Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use strum::IntoEnumIterator;
use uuid::Uuid;

use crate::catalog::{SystemMetric, SystemValue, system_value};
use crate::coordinator::CoordinatorReader;
use crate::identity::{IdentityModel, IdentityTracker, channel_identity};
use crate::models::{DeviceInfo, MeterReadings};
use crate::web::{
    AppState,
    responses::{not_ready, ok, reauth_required},
};

#[derive(Debug, Serialize)]
pub struct SnapshotResponse<T> {
    pub fetched_at: DateTime<Utc>,
    pub age_seconds: i64,
    /// False when the latest poll failed and this is the previous snapshot
    pub last_poll_succeeded: bool,
    pub payload: T,
}

#[derive(Debug, Serialize)]
pub struct ChannelView {
    /// Stable channel identity, derived from the connection key
    pub id: Uuid,
    pub channel_index: u8,
    pub label: String,
    pub metrics: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Serialize)]
pub struct MeterView {
    pub device_id: Option<String>,
    pub grid_frequency: Option<f64>,
    pub channels: Vec<ChannelView>,
}

#[derive(Debug, Serialize)]
pub struct SystemView {
    pub device_id: Option<String>,
    pub info: DeviceInfo,
    pub metrics: HashMap<&'static str, SystemValue>,
}

fn respond<T, U, F>(name: &str, reader: &CoordinatorReader<T>, view: F) -> Response
where
    U: Serialize,
    F: FnOnce(&T) -> U,
{
    let status = reader.status();
    if status.reauth_required {
        return reauth_required(name);
    }
    let Some((snapshot, last_poll_succeeded)) = reader.current() else {
        return not_ready(name, &status);
    };
    ok(SnapshotResponse {
        fetched_at: snapshot.fetched_at,
        age_seconds: snapshot.age().num_seconds(),
        last_poll_succeeded,
        payload: view(&snapshot.payload),
    })
}

fn meter_view(readings: &MeterReadings, identity: &IdentityModel) -> MeterView {
    MeterView {
        device_id: identity.root().map(|r| r.id.clone()),
        grid_frequency: readings.grid_frequency,
        channels: readings
            .channels
            .iter()
            .map(|c| ChannelView {
                id: identity
                    .channel(c.channel_index)
                    .map(|n| n.id)
                    .unwrap_or_else(|| channel_identity(identity.connection_key(), c.channel_index)),
                channel_index: c.channel_index,
                label: c.label.clone(),
                metrics: c.metrics.clone(),
            })
            .collect(),
    }
}

fn system_view(info: &DeviceInfo, identity: &IdentityModel) -> SystemView {
    SystemView {
        device_id: identity.root().map(|r| r.id.clone()),
        info: info.clone(),
        metrics: SystemMetric::iter()
            .map(|metric| (metric.into(), system_value(info, metric)))
            .collect(),
    }
}

// The identity is copied after the store read so it is never older than the payload.
pub async fn meter_snapshot(State(state): State<AppState>) -> Response {
    let tracker: &IdentityTracker = &state.identity;
    respond("meter", &state.meter, |readings| meter_view(readings, &tracker.snapshot()))
}

pub async fn system_snapshot(State(state): State<AppState>) -> Response {
    let tracker: &IdentityTracker = &state.identity;
    respond("system", &state.system, |info| system_view(info, &tracker.snapshot()))
}

pub async fn identity_model(State(state): State<AppState>) -> Response {
    ok(state.identity.snapshot())
}
