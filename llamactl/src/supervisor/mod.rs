//! Lifecycle of llama-server child processes.
//!
//! One [`ModelRuntime`] exists per model name. The child handle itself lives in
//! a watcher task that also receives stop requests, so the process is only
//! ever touched from one place. Status changes go through a `watch` channel
//! that the metrics poller uses to gate its requests.
//!
//! Each runtime also has a queue of status events drained by its own publisher
//! task. Transitions enqueue while holding the `watch` lock, so subscribers see
//! them in the order they were applied, and nothing follows the final
//! `stopped` or `error`.

pub mod command;

use std::collections::BTreeMap;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use llamactl_shared::{HubEvent, ModelConfig, ModelStatus, TelemetryStatus};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::hub::BroadcastHub;
use crate::poller::{MetricsPoller, ModelTelemetry};

pub use command::LaunchCommand;

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Program and fixed leading arguments, model flags are appended.
    pub server_command: Vec<String>,
    pub ready_marker: String,
    pub ready_timeout: Duration,
    pub stop_grace: Duration,
    pub poll_interval: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            server_command: vec!["llama-server".to_string()],
            ready_marker: "listening".to_string(),
            ready_timeout: Duration::from_secs(60),
            stop_grace: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// SIGTERM sent, the model is now `stopping`.
    Stopping,
    /// A stop was already in flight, nothing was sent.
    AlreadyStopping,
}

/// How a model's last process ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExitRecord {
    pub at: DateTime<Utc>,
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub requested: bool,
    pub error: Option<String>,
}

impl ExitRecord {
    fn from_wait(result: &io::Result<ExitStatus>, requested: bool) -> Self {
        match result {
            Ok(status) => Self {
                at: Utc::now(),
                code: status.code(),
                signal: exit_signal(status),
                requested,
                error: None,
            },
            Err(e) => Self::failed(e.to_string()),
        }
    }

    fn failed(error: String) -> Self {
        Self {
            at: Utc::now(),
            code: None,
            signal: None,
            requested: false,
            error: Some(error),
        }
    }

    /// Requested stops and zero exit codes count as a normal shutdown.
    pub fn is_clean(&self) -> bool {
        self.requested || (self.code == Some(0) && self.error.is_none())
    }

    pub fn describe(&self) -> String {
        if let Some(error) = &self.error {
            return error.clone();
        }
        let how = match (self.code, self.signal) {
            (Some(code), _) => format!("exit code {code}"),
            (None, Some(signal)) => format!("signal {signal}"),
            (None, None) => "unknown status".to_string(),
        };
        if self.requested {
            format!("{how} (stop requested)")
        } else {
            how
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Point-in-time view of one model, as returned by [`ProcessSupervisor::model_status`].
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatusReport {
    pub name: String,
    pub status: ModelStatus,
    pub pid: Option<u32>,
    pub uptime_secs: Option<u64>,
    pub config: Option<ModelConfig>,
    pub last_exit: Option<ExitRecord>,
    pub telemetry: Option<TelemetryStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunningModel {
    pub name: String,
    pub status: ModelStatus,
    pub uptime_secs: u64,
}

struct ModelRuntime {
    generation: u64,
    config: ModelConfig,
    status: watch::Sender<ModelStatus>,
    events: mpsc::UnboundedSender<ModelStatus>,
    pid: Option<u32>,
    started: Instant,
    stop_tx: mpsc::Sender<()>,
    exited: CancellationToken,
    telemetry: Option<Arc<ModelTelemetry>>,
}

enum Transition {
    Applied,
    Unchanged,
    Refused,
}

impl ModelRuntime {
    fn transition(&self, name: &str, to: ModelStatus) -> Transition {
        let mut outcome = Transition::Unchanged;
        self.status.send_if_modified(|status| {
            if *status == to {
                return false;
            }
            if !status.can_transition_to(to) {
                warn!(model = name, from = %status, %to, "Refusing status transition");
                outcome = Transition::Refused;
                return false;
            }
            *status = to;
            // the receiver outlives every sender
            let _ = self.events.send(to);
            outcome = Transition::Applied;
            true
        });
        outcome
    }

    /// Final status, queued last. Dropping the runtime afterwards lets the
    /// publisher drain and finish.
    fn finish(&self, status: ModelStatus) {
        self.status.send_modify(|current| {
            *current = status;
            let _ = self.events.send(status);
        });
    }
}

#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    options: SupervisorOptions,
    hub: BroadcastHub,
    poller: MetricsPoller,
    runtimes: DashMap<String, ModelRuntime>,
    exits: DashMap<String, ExitRecord>,
    // distinguishes a restarted model from tasks of its previous process
    next_generation: AtomicU64,
}

impl ProcessSupervisor {
    pub fn new(hub: BroadcastHub, poller: MetricsPoller, options: SupervisorOptions) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                options,
                hub,
                poller,
                runtimes: DashMap::new(),
                exits: DashMap::new(),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Spawn llama-server for `name`. Returns the child pid.
    pub fn start_model(&self, name: &str, config: ModelConfig) -> Result<u32> {
        let inner = &self.inner;

        let vacant = match inner.runtimes.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(Error::AlreadyRunning(name.to_string())),
            Entry::Vacant(vacant) => vacant,
        };

        if !config.path.exists() {
            return Err(Error::ModelFileNotFound(config.path.clone()));
        }

        let launch = LaunchCommand::build(&inner.options.server_command, &config.path, &config.flags);
        info!(model = name, command = %launch.display(), "Starting model");

        let mut child = match launch.to_command().spawn() {
            Ok(child) => child,
            Err(source) => {
                drop(vacant);
                error!(model = name, "Failed to spawn {}: {source}", launch.program());
                inner
                    .exits
                    .insert(name.to_string(), ExitRecord::failed(source.to_string()));
                inner.hub.publish(&HubEvent::status_change(name, ModelStatus::Error));
                return Err(Error::SpawnFailure {
                    model: name.to_string(),
                    source,
                });
            }
        };

        let generation = inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let pid = child.id();
        let (status, _) = watch::channel(ModelStatus::Starting);
        let (events, events_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let exited = CancellationToken::new();
        let _ = events.send(ModelStatus::Starting);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        vacant.insert(ModelRuntime {
            generation,
            config,
            status,
            events,
            pid,
            started: Instant::now(),
            stop_tx,
            exited: exited.clone(),
            telemetry: None,
        });
        inner.exits.remove(name);

        spawn_event_publisher(inner.hub.clone(), name.to_string(), events_rx, exited);
        if let Some(stdout) = stdout {
            spawn_output_reader(inner.clone(), name.to_string(), generation, stdout, "stdout");
        }
        if let Some(stderr) = stderr {
            spawn_output_reader(inner.clone(), name.to_string(), generation, stderr, "stderr");
        }
        tokio::spawn(watch_process(
            inner.clone(),
            name.to_string(),
            generation,
            child,
            stop_rx,
        ));

        Ok(pid.unwrap_or_default())
    }

    /// Ask the model's process to terminate. It is force-killed if it is still
    /// alive once the grace period has elapsed.
    pub fn stop_model(&self, name: &str) -> Result<StopOutcome> {
        let inner = &self.inner;

        let stop_tx = {
            let runtime = inner
                .runtimes
                .get(name)
                .ok_or_else(|| Error::NotRunning(name.to_string()))?;

            match runtime.transition(name, ModelStatus::Stopping) {
                Transition::Applied => {}
                Transition::Unchanged => {
                    debug!(model = name, "Stop already in progress");
                    return Ok(StopOutcome::AlreadyStopping);
                }
                Transition::Refused => return Err(Error::NotRunning(name.to_string())),
            }
            runtime.stop_tx.clone()
        };

        info!(model = name, "Stopping model");

        // a closed channel means the watcher already saw the process exit
        if stop_tx.try_send(()).is_err() {
            debug!(model = name, "Process watcher no longer listening");
        }
        Ok(StopOutcome::Stopping)
    }

    /// Stop every model and wait until all processes are gone, or the grace
    /// period plus a margin has elapsed.
    pub async fn stop_all(&self) {
        let inner = &self.inner;
        let targets: Vec<(String, CancellationToken)> = inner
            .runtimes
            .iter()
            .map(|rt| (rt.key().clone(), rt.exited.clone()))
            .collect();
        if targets.is_empty() {
            return;
        }

        for (name, _) in &targets {
            if let Err(e) = self.stop_model(name) {
                debug!(model = %name, "{e}");
            }
        }

        let exits = futures::future::join_all(targets.iter().map(|(_, exited)| exited.cancelled()));
        let bound = inner.options.stop_grace + Duration::from_secs(2);
        if tokio::time::timeout(bound, exits).await.is_err() {
            warn!(
                remaining = inner.runtimes.len(),
                "Timed out waiting for models to exit"
            );
        } else {
            info!(count = targets.len(), "All models stopped");
        }
    }

    pub fn model_status(&self, name: &str) -> ModelStatusReport {
        let inner = &self.inner;
        if let Some(runtime) = inner.runtimes.get(name) {
            return ModelStatusReport {
                name: name.to_string(),
                status: *runtime.status.borrow(),
                pid: runtime.pid,
                uptime_secs: Some(runtime.started.elapsed().as_secs()),
                config: Some(runtime.config.clone()),
                last_exit: None,
                telemetry: runtime.telemetry.as_ref().map(|t| t.status()),
            };
        }

        let telemetry = match inner.poller.status(name) {
            TelemetryStatus::Unknown => None,
            status => Some(status),
        };
        ModelStatusReport {
            name: name.to_string(),
            status: ModelStatus::Stopped,
            pid: None,
            uptime_secs: None,
            config: None,
            last_exit: inner.exits.get(name).map(|e| e.value().clone()),
            telemetry,
        }
    }

    /// Every model that currently has a process, in any live state.
    pub fn all_running(&self) -> Vec<RunningModel> {
        let mut models: Vec<RunningModel> = self
            .inner
            .runtimes
            .iter()
            .map(|rt| RunningModel {
                name: rt.key().clone(),
                status: *rt.status.borrow(),
                uptime_secs: rt.started.elapsed().as_secs(),
            })
            .collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        models
    }

    pub fn all_status(&self) -> BTreeMap<String, ModelStatus> {
        self.inner
            .runtimes
            .iter()
            .map(|rt| (rt.key().clone(), *rt.status.borrow()))
            .collect()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.inner
            .runtimes
            .get(name)
            .is_some_and(|rt| *rt.status.borrow() == ModelStatus::Running)
    }

    pub fn running_count(&self) -> usize {
        self.inner
            .runtimes
            .iter()
            .filter(|rt| *rt.status.borrow() == ModelStatus::Running)
            .count()
    }
}

impl SupervisorInner {
    /// Apply `to` if the runtime still belongs to `generation` and the move is
    /// legal. The event is queued with the change.
    fn set_status(&self, name: &str, generation: u64, to: ModelStatus) -> bool {
        let Some(runtime) = self.runtimes.get(name) else {
            return false;
        };
        runtime.generation == generation
            && matches!(runtime.transition(name, to), Transition::Applied)
    }

    /// Hook the model up to the poller, then move it to `running`. The gate is
    /// still closed while polling is set up, and the event only goes out once
    /// telemetry is attached.
    fn mark_running(&self, name: &str, generation: u64) {
        let target = self
            .runtimes
            .get(name)
            .filter(|rt| rt.generation == generation && *rt.status.borrow() == ModelStatus::Starting)
            .map(|rt| {
                (
                    rt.status.subscribe(),
                    poll_host(rt.config.flags.host()),
                    rt.config.flags.port(),
                )
            });
        let Some((status_rx, host, port)) = target else {
            return;
        };

        let telemetry = self.poller.register_supervised(name, &host, port, status_rx);
        if let Some(mut runtime) = self.runtimes.get_mut(name) {
            if runtime.generation == generation {
                runtime.telemetry = Some(telemetry);
            }
        }
        if let Err(e) = self.poller.start_polling(name, self.options.poll_interval) {
            warn!(model = name, "Could not start metrics polling: {e}");
        }

        if self.set_status(name, generation, ModelStatus::Running) {
            info!(model = name, "Model is running");
            return;
        }
        // exited or stopped while polling was being set up
        let alive = self
            .runtimes
            .get(name)
            .is_some_and(|rt| rt.generation == generation);
        if !alive {
            self.poller.stop_polling(name);
        }
    }

    fn ready_timeout_elapsed(&self, name: &str, generation: u64) {
        let still_starting = self
            .runtimes
            .get(name)
            .is_some_and(|rt| rt.generation == generation && *rt.status.borrow() == ModelStatus::Starting);
        if still_starting {
            warn!(
                model = name,
                timeout = ?self.options.ready_timeout,
                "No readiness marker seen, assuming the server is up"
            );
            self.mark_running(name, generation);
        }
    }

    fn handle_exit(&self, name: &str, generation: u64, result: io::Result<ExitStatus>, requested: bool) {
        let Some((_, runtime)) = self.runtimes.remove_if(name, |_, rt| rt.generation == generation) else {
            return;
        };

        let was_stopping = *runtime.status.borrow() == ModelStatus::Stopping;
        let record = ExitRecord::from_wait(&result, requested || was_stopping);
        let status = if record.is_clean() {
            ModelStatus::Stopped
        } else {
            ModelStatus::Error
        };

        if status == ModelStatus::Stopped {
            info!(model = name, "Model stopped: {}", record.describe());
        } else {
            error!(model = name, "Model exited unexpectedly: {}", record.describe());
        }
        self.exits.insert(name.to_string(), record);
        self.poller.stop_polling(name);
        runtime.finish(status);
    }
}

/// Bind-all addresses are polled over loopback. IPv6 literals get brackets.
fn poll_host(bind: &str) -> String {
    match bind {
        "0.0.0.0" | "" => "127.0.0.1".to_string(),
        "::" | "[::]" => "[::1]".to_string(),
        host if host.contains(':') && !host.starts_with('[') => format!("[{host}]"),
        host => host.to_string(),
    }
}

/// Publish queued status changes in order. Marks the runtime as exited once
/// the final event is out.
fn spawn_event_publisher(
    hub: BroadcastHub,
    name: String,
    mut events: mpsc::UnboundedReceiver<ModelStatus>,
    exited: CancellationToken,
) {
    tokio::spawn(async move {
        while let Some(status) = events.recv().await {
            hub.publish(&HubEvent::status_change(&name, status));
        }
        exited.cancel();
    });
}

fn spawn_output_reader<R>(
    inner: Arc<SupervisorInner>,
    name: String,
    generation: u64,
    stream: R,
    source: &'static str,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        let mut ready = false;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end();
                    debug!(model = %name, source, "{line}");
                    if !ready && line.contains(inner.options.ready_marker.as_str()) {
                        ready = true;
                        inner.mark_running(&name, generation);
                    }
                }
                Err(e) => {
                    debug!(model = %name, source, "Output stream closed: {e}");
                    break;
                }
            }
        }
    });
}

/// Owns the child until it exits. Handles stop requests and the readiness
/// fallback.
async fn watch_process(
    inner: Arc<SupervisorInner>,
    name: String,
    generation: u64,
    mut child: Child,
    mut stop_rx: mpsc::Receiver<()>,
) {
    let ready_deadline = tokio::time::sleep(inner.options.ready_timeout);
    tokio::pin!(ready_deadline);
    let mut ready_checked = false;
    let mut requested = false;

    let result = loop {
        tokio::select! {
            result = child.wait() => break result,
            Some(()) = stop_rx.recv() => {
                requested = true;
                break terminate(&name, &mut child, inner.options.stop_grace).await;
            }
            _ = &mut ready_deadline, if !ready_checked => {
                ready_checked = true;
                inner.ready_timeout_elapsed(&name, generation);
            }
        }
    };

    inner.handle_exit(&name, generation, result, requested);
}

/// SIGTERM, then SIGKILL once `grace` runs out.
async fn terminate(name: &str, child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    send_sigterm(name, child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(result) => result,
        Err(_) => {
            warn!(model = name, ?grace, "Process did not exit in time, killing");
            child.start_kill()?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn send_sigterm(name: &str, child: &mut Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => debug!(model = name, pid, "Sent SIGTERM"),
        Err(e) => warn!(model = name, pid, "Failed to send SIGTERM: {e}"),
    }
}

#[cfg(not(unix))]
fn send_sigterm(name: &str, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!(model = name, "Failed to terminate process: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::PollerOptions;

    fn supervisor(server_command: &[&str]) -> ProcessSupervisor {
        let hub = BroadcastHub::new();
        let poller = MetricsPoller::new(hub.clone(), PollerOptions::default());
        ProcessSupervisor::new(
            hub,
            poller,
            SupervisorOptions {
                server_command: server_command.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        )
    }

    fn runtime() -> (ModelRuntime, mpsc::UnboundedReceiver<ModelStatus>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (stop_tx, _) = mpsc::channel(1);
        let runtime = ModelRuntime {
            generation: 0,
            config: ModelConfig::new("/models/m1.gguf"),
            status: watch::channel(ModelStatus::Starting).0,
            events,
            pid: None,
            started: Instant::now(),
            stop_tx,
            exited: CancellationToken::new(),
            telemetry: None,
        };
        (runtime, events_rx)
    }

    #[test]
    fn test_transitions_queue_in_order() {
        let (runtime, mut events) = runtime();
        assert!(matches!(runtime.transition("m1", ModelStatus::Running), Transition::Applied));
        assert!(matches!(runtime.transition("m1", ModelStatus::Running), Transition::Unchanged));
        assert!(matches!(runtime.transition("m1", ModelStatus::Stopping), Transition::Applied));
        assert!(matches!(runtime.transition("m1", ModelStatus::Running), Transition::Refused));
        runtime.finish(ModelStatus::Stopped);
        drop(runtime);

        let mut seen = Vec::new();
        while let Ok(status) = events.try_recv() {
            seen.push(status);
        }
        assert_eq!(
            seen,
            [ModelStatus::Running, ModelStatus::Stopping, ModelStatus::Stopped]
        );
        // nothing can be queued after the final status
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_running_after_exit_is_not_published() {
        let supervisor = supervisor(&["llama-server"]);
        let inner = &supervisor.inner;
        let (_sub, mut hub_events) = inner.hub.subscribe_channel();
        let (runtime, events_rx) = runtime();
        let exited = runtime.exited.clone();
        spawn_event_publisher(inner.hub.clone(), "m1".into(), events_rx, exited.clone());
        inner.runtimes.insert("m1".into(), runtime);

        // the process is gone before the readiness marker is handled
        inner.handle_exit("m1", 0, Err(io::ErrorKind::Other.into()), false);
        inner.mark_running("m1", 0);

        exited.cancelled().await;
        match hub_events.recv().await {
            Some(HubEvent::StatusChange { status, .. }) => assert_eq!(status, ModelStatus::Error),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(hub_events.try_recv().is_err());
        assert!(!inner.poller.is_polling("m1"));
    }

    #[test]
    fn test_poll_host_mapping() {
        assert_eq!(poll_host("0.0.0.0"), "127.0.0.1");
        assert_eq!(poll_host("::"), "[::1]");
        assert_eq!(poll_host("::1"), "[::1]");
        assert_eq!(poll_host("10.0.0.5"), "10.0.0.5");
        assert_eq!(poll_host("localhost"), "localhost");
    }

    #[test]
    fn test_exit_record_classification() {
        let crashed = ExitRecord {
            at: Utc::now(),
            code: Some(1),
            signal: None,
            requested: false,
            error: None,
        };
        assert!(!crashed.is_clean());
        assert_eq!(crashed.describe(), "exit code 1");

        let requested = ExitRecord {
            code: None,
            signal: Some(15),
            requested: true,
            ..crashed.clone()
        };
        assert!(requested.is_clean());
        assert_eq!(requested.describe(), "signal 15 (stop requested)");

        let clean = ExitRecord {
            code: Some(0),
            ..crashed.clone()
        };
        assert!(clean.is_clean());

        assert!(!ExitRecord::failed("wait failed".into()).is_clean());
    }

    #[tokio::test]
    async fn test_unknown_model_status() {
        let supervisor = supervisor(&["llama-server"]);
        let report = supervisor.model_status("ghost");
        assert_eq!(report.status, ModelStatus::Stopped);
        assert!(report.pid.is_none());
        assert!(report.last_exit.is_none());
        assert!(report.telemetry.is_none());
        assert_eq!(supervisor.running_count(), 0);
        assert!(supervisor.all_running().is_empty());
    }

    #[tokio::test]
    async fn test_stop_unknown_model() {
        let supervisor = supervisor(&["llama-server"]);
        let err = supervisor.stop_model("ghost").unwrap_err();
        assert!(matches!(err, Error::NotRunning(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_missing_model_file_spawns_nothing() {
        let supervisor = supervisor(&["llama-server"]);
        let config = ModelConfig::new("/nonexistent/model.gguf");
        let err = supervisor.start_model("m1", config).unwrap_err();
        assert!(matches!(err, Error::ModelFileNotFound(_)));
        assert!(supervisor.all_status().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let model = tempfile::NamedTempFile::new().unwrap();
        let supervisor = supervisor(&["/nonexistent/llama-server-binary"]);
        let (_sub, mut events) = supervisor.inner.hub.subscribe_channel();

        let err = supervisor
            .start_model("m1", ModelConfig::new(model.path()))
            .unwrap_err();
        assert!(matches!(err, Error::SpawnFailure { .. }));
        assert!(supervisor.all_status().is_empty());

        match events.recv().await {
            Some(HubEvent::StatusChange { status, .. }) => assert_eq!(status, ModelStatus::Error),
            other => panic!("unexpected event: {other:?}"),
        }
        let report = supervisor.model_status("m1");
        assert!(report.last_exit.is_some_and(|e| e.error.is_some()));
    }
}
