use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error};

use super::{
    PipelineStage, PollPipeline, StageTracker, fetch_degradable, fetch_required, log_diagnostics,
};
use crate::catalog;
use crate::client::{DeviceTransport, Endpoint};
use crate::config::PollOptions;
use crate::errors::DeviceResult;
use crate::identity::IdentityTracker;
use crate::models::{ChannelRecord, MeterReadings, Snapshot};
use crate::normalizer::{Normalized, NormalizedRecord, normalize};

const GRID_FREQUENCY: &str = "gridFrequency";

/// Channel configuration joined with live meter values
pub struct MeterPipeline {
    transport: Arc<dyn DeviceTransport>,
    options: watch::Receiver<PollOptions>,
    identity: Option<Arc<IdentityTracker>>,
    stage: StageTracker,
}

impl MeterPipeline {
    pub fn new(transport: Arc<dyn DeviceTransport>, options: watch::Receiver<PollOptions>) -> Self {
        Self {
            transport,
            options,
            identity: None,
            stage: StageTracker::new("meter"),
        }
    }

    /// Reconcile channel identity after every committed snapshot
    pub fn with_identity(mut self, identity: Arc<IdentityTracker>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn stage(&self) -> &StageTracker {
        &self.stage
    }

    async fn grid_frequency(&self) -> Option<f64> {
        match self.transport.get_json(Endpoint::GridFrequency).await {
            Ok(body) => body
                .get(GRID_FREQUENCY)
                .and_then(|raw| catalog::extract_raw(GRID_FREQUENCY, raw)),
            Err(err) => {
                debug!("Grid frequency unavailable: {}", err);
                None
            }
        }
    }
}

/// Activity flag as reported by channel config, missing means inactive
fn is_active(fields: &Map<String, Value>) -> bool {
    match fields.get("active") {
        Some(Value::Bool(active)) => *active,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1"),
        _ => false,
    }
}

fn label_of(record: Option<&NormalizedRecord>) -> Option<String> {
    record
        .and_then(|r| r.fields.get("label"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

/// Metric source of a values record: its nested `data` object, else itself
fn metric_source(record: &NormalizedRecord) -> &Map<String, Value> {
    match record.fields.get("data") {
        Some(Value::Object(data)) => data,
        _ => &record.fields,
    }
}

/// Join normalized channel config and meter values into channel records.
///
/// Config decides which channels exist and what they are called, values
/// supply the metrics. Only active channels are returned, ordered by index.
pub fn join_channels(
    config: &Normalized,
    values: &Normalized,
    enabled_metrics: &BTreeSet<String>,
) -> Vec<ChannelRecord> {
    let keys: Vec<&'static str> = catalog::channel_metrics()
        .map(|d| d.key)
        .filter(|key| enabled_metrics.contains(*key))
        .collect();

    config
        .records
        .iter()
        .filter(|cfg| is_active(&cfg.fields))
        .map(|cfg| {
            let reading = values.get(cfg.index);
            let label = label_of(Some(cfg))
                .or_else(|| label_of(reading))
                .unwrap_or_else(|| format!("Channel {}", cfg.index));
            let metrics: BTreeMap<String, Option<f64>> = keys
                .iter()
                .map(|key| {
                    let value = reading
                        .map(metric_source)
                        .and_then(|source| source.get(*key))
                        .and_then(|raw| catalog::extract_raw(key, raw));
                    (key.to_string(), value)
                })
                .collect();
            ChannelRecord {
                channel_index: cfg.index,
                active: true,
                label,
                metrics,
            }
        })
        .collect()
}

#[async_trait]
impl PollPipeline for MeterPipeline {
    type Output = MeterReadings;

    fn name(&self) -> &'static str {
        "meter"
    }

    async fn poll(&self) -> DeviceResult<MeterReadings> {
        let transport = self.transport.as_ref();

        self.stage.enter(PipelineStage::FetchingChannelConfig);
        let config_raw = fetch_required(transport, Endpoint::ChannelConfig, &self.stage).await?;

        self.stage.enter(PipelineStage::FetchingMeterValues);
        let values_raw = fetch_degradable(transport, Endpoint::MeterValues, &self.stage).await?;

        let options = self.options.borrow().clone();
        let grid_frequency = if options.enabled_metrics.contains(GRID_FREQUENCY) {
            self.grid_frequency().await
        } else {
            None
        };

        self.stage.enter(PipelineStage::Normalizing);
        let config = normalize(&config_raw);
        log_diagnostics(Endpoint::ChannelConfig, &config);
        let values = normalize(&values_raw);
        log_diagnostics(Endpoint::MeterValues, &values);

        let channels = join_channels(&config, &values, &options.enabled_metrics);
        debug!(
            "Meter poll built {} active channels from {} configured",
            channels.len(),
            config.records.len()
        );

        self.stage.enter(PipelineStage::Committed);
        Ok(MeterReadings {
            channels,
            grid_frequency,
        })
    }

    fn on_commit(&self, snapshot: &Snapshot<MeterReadings>) {
        let Some(identity) = &self.identity else {
            return;
        };
        if let Err(e) = identity.observe_channels(&snapshot.payload.channels) {
            error!("Failed to reconcile channel identity: {}", e);
        }
    }
}
