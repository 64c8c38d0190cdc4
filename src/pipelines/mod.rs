//! Poll pipelines
//!
//! A pipeline performs one complete fetch-normalize-build run and returns its
//! payload, or the error that aborted it. Pipelines never publish anything
//! themselves: the coordinator owns the snapshot store and commits the result.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use strum::Display;
use tokio::sync::watch;
use tracing::{trace, warn};

pub mod meter;
pub mod system;

pub use meter::MeterPipeline;
pub use system::SystemPipeline;

use crate::client::{DeviceTransport, Endpoint};
use crate::errors::DeviceResult;
use crate::models::Snapshot;
use crate::normalizer::Normalized;

#[async_trait]
pub trait PollPipeline: Send + Sync + 'static {
    type Output: Clone + Send + Sync + 'static;

    /// Short name used in logs and status reports
    fn name(&self) -> &'static str;

    /// Run one poll to completion
    async fn poll(&self) -> DeviceResult<Self::Output>;

    /// Called after the coordinator has published a new snapshot
    fn on_commit(&self, _snapshot: &Snapshot<Self::Output>) {}
}

/// Where a pipeline run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    FetchingChannelConfig,
    FetchingMeterValues,
    FetchingSystemInfo,
    FetchingUpdateInfo,
    Normalizing,
    Committed,
    Failed,
}

/// Observable stage of one pipeline
#[derive(Debug)]
pub struct StageTracker {
    pipeline: &'static str,
    tx: watch::Sender<PipelineStage>,
}

impl StageTracker {
    pub fn new(pipeline: &'static str) -> Self {
        Self {
            pipeline,
            tx: watch::Sender::new(PipelineStage::Idle),
        }
    }

    pub fn enter(&self, stage: PipelineStage) {
        trace!("{} pipeline -> {}", self.pipeline, stage);
        self.tx.send_replace(stage);
    }

    pub fn current(&self) -> PipelineStage {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineStage> {
        self.tx.subscribe()
    }
}

/// Fetch an endpoint the run cannot do without.
///
/// Any failure fails the run, a body that is not JSON included, so the last
/// good snapshot stays current.
pub(crate) async fn fetch_required(
    transport: &dyn DeviceTransport,
    endpoint: Endpoint,
    stage: &StageTracker,
) -> DeviceResult<Value> {
    transport
        .get_json(endpoint)
        .await
        .inspect_err(|_| stage.enter(PipelineStage::Failed))
}

/// Fetch an endpoint whose items degrade one by one.
///
/// A body that is not JSON degrades to `null`, leaving every item unavailable.
/// Every other failure fails the run.
pub(crate) async fn fetch_degradable(
    transport: &dyn DeviceTransport,
    endpoint: Endpoint,
    stage: &StageTracker,
) -> DeviceResult<Value> {
    match transport.get_json(endpoint).await {
        Ok(body) => Ok(body),
        Err(err) if !err.is_fatal() => {
            warn!("Degrading malformed {} response: {}", endpoint, err);
            Ok(Value::Null)
        }
        Err(err) => {
            stage.enter(PipelineStage::Failed);
            Err(err)
        }
    }
}

pub(crate) fn log_diagnostics(source: Endpoint, normalized: &Normalized) {
    for diagnostic in &normalized.diagnostics {
        warn!("{}: {}", source, diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_tracker_publishes_transitions() {
        let tracker = StageTracker::new("meter");
        let rx = tracker.subscribe();
        assert_eq!(tracker.current(), PipelineStage::Idle);
        tracker.enter(PipelineStage::FetchingMeterValues);
        assert_eq!(*rx.borrow(), PipelineStage::FetchingMeterValues);
        assert_eq!(PipelineStage::FetchingMeterValues.to_string(), "fetching_meter_values");
    }
}
