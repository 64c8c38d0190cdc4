//! Engine context for one configured connection
//!
//! [`TelemetryEngine`] owns the transport, the identity model and both
//! coordinators. Nothing here is global: two engines for two devices share no
//! state.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog;
use crate::client::{self, DeviceHttpClient, DeviceTransport};
use crate::config::{Config, PollOptions, PollingConfig};
use crate::coordinator::{Coordinator, CoordinatorReader, IntervalSource, RefreshOutcome};
use crate::errors::{AppError, AppResult};
use crate::identity::{DeviceRegistry, IdentityModel, IdentityTracker};
use crate::models::{DeviceInfo, MeterReadings};
use crate::pipelines::{MeterPipeline, SystemPipeline};

pub struct TelemetryEngine {
    connection_key: String,
    transport: Arc<dyn DeviceTransport>,
    identity: Arc<IdentityTracker>,
    options: watch::Sender<PollOptions>,
    meter: Coordinator<MeterPipeline>,
    system: Coordinator<SystemPipeline>,
    cancel: CancellationToken,
}

impl TelemetryEngine {
    /// Engine talking HTTP to the configured device
    pub fn new(config: &Config, registry: Arc<dyn DeviceRegistry>) -> AppResult<Self> {
        let transport = Arc::new(DeviceHttpClient::new(&config.device)?);
        Ok(Self::with_transport(
            transport,
            config.device.connection_key(),
            &config.polling,
            registry,
        ))
    }

    /// Engine over any transport
    pub fn with_transport(
        transport: Arc<dyn DeviceTransport>,
        connection_key: String,
        polling: &PollingConfig,
        registry: Arc<dyn DeviceRegistry>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let identity = Arc::new(IdentityTracker::new(
            IdentityModel::new(connection_key.clone()),
            registry,
        ));
        let (options, options_rx) = watch::channel(polling.poll_options());

        let meter = Coordinator::new(
            MeterPipeline::new(transport.clone(), options_rx.clone()).with_identity(identity.clone()),
            IntervalSource::Options(options_rx),
            cancel.child_token(),
        );
        let system = Coordinator::new(
            SystemPipeline::new(transport.clone()).with_identity(identity.clone()),
            IntervalSource::Fixed(polling.system_interval),
            cancel.child_token(),
        );

        Self {
            connection_key,
            transport,
            identity,
            options,
            meter,
            system,
            cancel,
        }
    }

    pub fn connection_key(&self) -> &str {
        &self.connection_key
    }

    /// Check reachability and credentials without touching any snapshot
    pub async fn verify(&self) -> AppResult<()> {
        client::verify_connection(self.transport.as_ref()).await?;
        Ok(())
    }

    /// Run both first refreshes, then start both periodic loops.
    ///
    /// System info goes first so the device identity can be pinned from the
    /// reported id before channels are registered under it. A coordinator
    /// whose first refresh fails still starts and keeps retrying on its own;
    /// only rejected credentials stop the start.
    pub async fn start(&self) -> AppResult<()> {
        if self.cancel.is_cancelled() {
            return Err(AppError::internal("Engine has been stopped"));
        }
        info!("Starting telemetry engine for {}", self.connection_key);
        admit(self.system.first_refresh().await)?;
        admit(self.meter.first_refresh().await)?;
        self.system.spawn();
        self.meter.spawn();
        Ok(())
    }

    /// [`start`](Self::start) raced against a shutdown token. `Ok(false)`
    /// when shutdown came first, nothing is left running then.
    pub async fn start_until(&self, shutdown: &CancellationToken) -> AppResult<bool> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Shutdown requested while starting {}", self.connection_key);
                Ok(false)
            }
            started = self.start() => started.map(|()| true),
        }
    }

    pub async fn stop(&self) {
        info!("Stopping telemetry engine for {}", self.connection_key);
        self.cancel.cancel();
        self.meter.stop().await;
        self.system.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.meter.is_running() && self.system.is_running()
    }

    pub fn options(&self) -> PollOptions {
        self.options.borrow().clone()
    }

    /// Apply new options to the running engine, no restart needed
    pub fn update_options(&self, mut options: PollOptions) -> AppResult<()> {
        if options.poll_interval < Duration::from_secs(1) {
            return Err(AppError::configuration(format!(
                "poll interval must be at least 1s, got {:?}",
                options.poll_interval
            )));
        }
        let (known, unknown): (BTreeSet<String>, BTreeSet<String>) = options
            .enabled_metrics
            .into_iter()
            .partition(|key| catalog::descriptor(key).is_some());
        for key in &unknown {
            warn!("Ignoring unknown metric key '{}'", key);
        }
        options.enabled_metrics = known;

        info!(
            "Applying options: interval {:?}, {} metrics",
            options.poll_interval,
            options.enabled_metrics.len()
        );
        self.options.send_replace(options);
        Ok(())
    }

    pub fn meter(&self) -> CoordinatorReader<MeterReadings> {
        self.meter.reader()
    }

    pub fn system(&self) -> CoordinatorReader<DeviceInfo> {
        self.system.reader()
    }

    pub fn identity(&self) -> Arc<IdentityTracker> {
        self.identity.clone()
    }

    pub async fn refresh_meter(&self) -> RefreshOutcome {
        self.meter.refresh().await
    }

    pub async fn refresh_system(&self) -> RefreshOutcome {
        self.system.refresh().await
    }
}

/// Pass a first refresh failure through only when it needs new credentials
fn admit(first_refresh: AppResult<()>) -> AppResult<()> {
    match first_refresh {
        Err(e) if e.requires_reauth() => Err(e),
        Err(e) => {
            warn!("{}, retrying in the background", e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}
