//! Per-model polling of llama-server `/metrics` endpoints.
//!
//! Each registered model gets a [`ModelTelemetry`] record holding its bounded
//! sample history. Polling loops reschedule themselves only after the current
//! request settles, so two polls of the same model never overlap. Failures are
//! absorbed: the record flips to [`TelemetryStatus::Error`] and the loop keeps
//! retrying every tick.

pub mod exposition;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use llamactl_shared::{HubEvent, MetricSample, ModelStatus, TelemetryStatus};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::history::HistoryBuffer;
use crate::hub::BroadcastHub;

pub use exposition::parse_metrics;

#[derive(Debug, Clone)]
pub struct PollerOptions {
    pub history_capacity: usize,
    pub recent_window: usize,
    pub request_timeout: Duration,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            history_capacity: 300,
            recent_window: 60,
            request_timeout: Duration::from_secs(3),
        }
    }
}

/// Telemetry record for one model. Written only by that model's poll loop.
pub struct ModelTelemetry {
    name: String,
    url: String,
    gate: Option<watch::Receiver<ModelStatus>>,
    state: Mutex<TelemetryState>,
    poll: Mutex<Option<CancellationToken>>,
}

struct TelemetryState {
    status: TelemetryStatus,
    history: HistoryBuffer<MetricSample>,
    last_update: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Read-only view of a telemetry record, as returned by [`MetricsPoller::all_status`].
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySummary {
    pub status: TelemetryStatus,
    pub url: String,
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub metrics: Option<MetricSample>,
}

impl ModelTelemetry {
    fn new(
        name: &str,
        host: &str,
        port: u16,
        capacity: usize,
        gate: Option<watch::Receiver<ModelStatus>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            url: format!("http://{host}:{port}/metrics"),
            gate,
            state: Mutex::new(TelemetryState {
                status: TelemetryStatus::Starting,
                history: HistoryBuffer::new(capacity),
                last_update: None,
                last_error: None,
            }),
            poll: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> TelemetryStatus {
        self.state().status
    }

    pub fn latest(&self) -> Option<MetricSample> {
        self.state().history.latest().cloned()
    }

    pub fn history(&self, limit: usize) -> Vec<MetricSample> {
        self.state().history.tail(limit)
    }

    pub fn summary(&self) -> TelemetrySummary {
        let state = self.state();
        TelemetrySummary {
            status: state.status,
            url: self.url.clone(),
            last_update: state.last_update,
            last_error: state.last_error.clone(),
            metrics: state.history.latest().cloned(),
        }
    }

    /// Supervised records only poll while the owning runtime reports `running`.
    fn may_poll(&self) -> bool {
        self.gate
            .as_ref()
            .is_none_or(|status| *status.borrow() == ModelStatus::Running)
    }

    fn record_sample(&self, sample: MetricSample, recent_window: usize) -> Vec<MetricSample> {
        let mut state = self.state();
        state.last_update = Some(sample.timestamp);
        state.history.push(sample);
        if state.status != TelemetryStatus::Running {
            info!(model = %self.name, "Metrics endpoint reachable");
        }
        state.status = TelemetryStatus::Running;
        state.last_error = None;
        state.history.tail(recent_window)
    }

    fn record_failure(&self, error: &Error) {
        let mut state = self.state();
        if state.status == TelemetryStatus::Error {
            debug!(model = %self.name, "{error}");
        } else {
            warn!(model = %self.name, "{error}");
        }
        state.status = TelemetryStatus::Error;
        state.last_error = Some(error.to_string());
    }

    fn replace_poll(&self, token: Option<CancellationToken>) -> bool {
        let mut poll = self.poll.lock().unwrap_or_else(|p| p.into_inner());
        let previous = std::mem::replace(&mut *poll, token);
        match previous {
            Some(previous) => {
                previous.cancel();
                true
            }
            None => false,
        }
    }

    fn is_polling(&self) -> bool {
        self.poll
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    fn state(&self) -> MutexGuard<'_, TelemetryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Clone)]
pub struct MetricsPoller {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    client: reqwest::Client,
    hub: BroadcastHub,
    options: PollerOptions,
    targets: DashMap<String, Arc<ModelTelemetry>>,
}

impl MetricsPoller {
    pub fn new(hub: BroadcastHub, options: PollerOptions) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                client: reqwest::Client::new(),
                hub,
                options,
                targets: DashMap::new(),
            }),
        }
    }

    /// Create a polling target with empty history. Polling does not start until
    /// [`MetricsPoller::start_polling`]. Registering an existing name replaces it.
    pub fn register_model(&self, name: &str, host: &str, port: u16) -> Arc<ModelTelemetry> {
        self.insert_target(name, host, port, None)
    }

    /// Like [`MetricsPoller::register_model`], but every tick first checks the
    /// supervisor's status channel and skips the request unless the model is running.
    pub fn register_supervised(
        &self,
        name: &str,
        host: &str,
        port: u16,
        status: watch::Receiver<ModelStatus>,
    ) -> Arc<ModelTelemetry> {
        self.insert_target(name, host, port, Some(status))
    }

    fn insert_target(
        &self,
        name: &str,
        host: &str,
        port: u16,
        gate: Option<watch::Receiver<ModelStatus>>,
    ) -> Arc<ModelTelemetry> {
        let target = Arc::new(ModelTelemetry::new(
            name,
            host,
            port,
            self.inner.options.history_capacity,
            gate,
        ));
        if let Some(previous) = self.inner.targets.insert(name.to_string(), target.clone()) {
            previous.replace_poll(None);
        }
        info!(model = name, url = %target.url, "Registered metrics target");
        target
    }

    /// Start (or restart) the polling loop for a registered model.
    pub fn start_polling(&self, name: &str, interval: Duration) -> Result<()> {
        let target = self
            .target(name)
            .ok_or_else(|| Error::NotRegistered(name.to_string()))?;

        let token = CancellationToken::new();
        target.replace_poll(Some(token.clone()));

        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = inner.poll_once(&target) => {}
                }
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!(model = %target.name, "Polling loop exited");
        });

        info!(model = name, ?interval, "Started polling metrics");
        Ok(())
    }

    /// Cancel the polling loop. History is kept. No-op if not polling.
    pub fn stop_polling(&self, name: &str) {
        if let Some(target) = self.target(name) {
            if target.replace_poll(None) {
                info!(model = name, "Stopped polling metrics");
            }
        }
    }

    /// Stop polling and drop the target with its history. No-op if unknown.
    pub fn unregister_model(&self, name: &str) {
        if let Some((_, target)) = self.inner.targets.remove(name) {
            target.replace_poll(None);
            info!(model = name, "Unregistered metrics target");
        }
    }

    /// Cancel every polling loop.
    pub fn stop_all(&self) {
        let names: Vec<String> = self.inner.targets.iter().map(|t| t.key().clone()).collect();
        for name in names {
            self.stop_polling(&name);
        }
    }

    pub fn metrics(&self, name: &str) -> Option<MetricSample> {
        self.target(name)?.latest()
    }

    pub fn history(&self, name: &str, limit: usize) -> Vec<MetricSample> {
        self.target(name)
            .map(|t| t.history(limit))
            .unwrap_or_default()
    }

    pub fn status(&self, name: &str) -> TelemetryStatus {
        self.target(name)
            .map(|t| t.status())
            .unwrap_or(TelemetryStatus::Unknown)
    }

    pub fn is_polling(&self, name: &str) -> bool {
        self.target(name).is_some_and(|t| t.is_polling())
    }

    pub fn all_status(&self) -> BTreeMap<String, TelemetrySummary> {
        let targets: Vec<Arc<ModelTelemetry>> =
            self.inner.targets.iter().map(|t| t.value().clone()).collect();
        targets
            .into_iter()
            .map(|t| (t.name.clone(), t.summary()))
            .collect()
    }

    fn target(&self, name: &str) -> Option<Arc<ModelTelemetry>> {
        self.inner.targets.get(name).map(|t| t.value().clone())
    }
}

impl PollerInner {
    async fn poll_once(&self, target: &ModelTelemetry) {
        if !target.may_poll() {
            debug!(model = %target.name, "Model not running, skipping poll");
            return;
        }

        match self.fetch(&target.url).await {
            Ok(body) => {
                let sample = parse_metrics(&body);
                let recent_history =
                    target.record_sample(sample.clone(), self.options.recent_window);
                self.hub.publish(&HubEvent::MetricsUpdate {
                    model_name: target.name.clone(),
                    sample,
                    recent_history,
                });
            }
            Err(e) => target.record_failure(&e),
        }
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let unreachable = |e: reqwest::Error| Error::MetricsUnreachable {
            url: url.to_string(),
            reason: e.to_string(),
        };

        self.client
            .get(url)
            .timeout(self.options.request_timeout)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(unreachable)?
            .text()
            .await
            .map_err(unreachable)
    }
}
