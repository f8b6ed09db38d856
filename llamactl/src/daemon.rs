use anyhow::{Result, bail};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use llamactl_shared::HubEvent;

use crate::config::Config;
use crate::hub::BroadcastHub;
use crate::poller::MetricsPoller;
use crate::supervisor::ProcessSupervisor;
use crate::system::{GpuMonitor, SystemMetricsCollector};

/// Every component, wired to one hub.
#[derive(Clone)]
pub struct Daemon {
    pub config: Config,
    pub hub: BroadcastHub,
    pub poller: MetricsPoller,
    pub supervisor: ProcessSupervisor,
    pub collector: SystemMetricsCollector,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        let hub = BroadcastHub::new();
        let poller = MetricsPoller::new(hub.clone(), config.poller_options());
        let supervisor =
            ProcessSupervisor::new(hub.clone(), poller.clone(), config.supervisor_options());
        let collector =
            SystemMetricsCollector::new(hub.clone(), GpuMonitor::new(), config.system_history);
        Self {
            config,
            hub,
            poller,
            supervisor,
            collector,
        }
    }

    /// Start `models` (every configured model when empty), stream events to
    /// stdout until `shutdown` fires, then stop everything.
    pub async fn run(&self, models: &[String], shutdown: CancellationToken) -> Result<()> {
        let names: Vec<String> = if models.is_empty() {
            self.config.models.keys().cloned().collect()
        } else {
            models.to_vec()
        };
        if let Some(unknown) = names.iter().find(|n| !self.config.models.contains_key(*n)) {
            bail!("Model {unknown} is not in the config");
        }

        let (subscription, events) = self.hub.subscribe_channel();
        let forwarder = tokio::spawn(forward_events(events, tokio::io::stdout()));

        let collector = self.collector.clone();
        let interval = self.config.system_interval();
        let collector_cancel = shutdown.child_token();
        let collector_task =
            tokio::spawn(async move { collector.run(interval, collector_cancel).await });

        for name in &names {
            let Some(model) = self.config.model(name) else {
                continue;
            };
            match self.supervisor.start_model(name, model) {
                Ok(pid) => info!(model = %name, pid, "Model process spawned"),
                Err(e) => error!(model = %name, "Failed to start model: {e}"),
            }
        }
        if names.is_empty() {
            warn!("No models configured, only collecting host metrics");
        }

        shutdown.cancelled().await;
        info!("Received shutdown signal, stopping models");

        self.supervisor.stop_all().await;
        self.poller.stop_all();
        if let Err(e) = collector_task.await {
            warn!("System collector task failed: {e}");
        }

        self.hub.unsubscribe(&subscription);
        if let Err(e) = forwarder.await {
            warn!("Event forwarder failed: {e}");
        }
        Ok(())
    }
}

/// Write each event as one JSON line until the hub side closes or the output
/// stops accepting writes.
async fn forward_events<W>(mut events: mpsc::UnboundedReceiver<HubEvent>, mut out: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = events.recv().await {
        let mut line = match serde_json::to_vec(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize event: {e}");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = out.write_all(&line).await {
            warn!("Event stream closed: {e}");
            break;
        }
        if let Err(e) = out.flush().await {
            warn!("Event stream closed: {e}");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llamactl_shared::{ModelConfig, ModelStatus};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Accepts writes, fails every flush.
    struct BrokenPipe {
        written: usize,
    }

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.written += buf.len();
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_forwarder_writes_json_lines() {
        let (tx, rx) = mpsc::unbounded_channel();
        let starting = HubEvent::status_change("m1", ModelStatus::Starting);
        tx.send(starting.clone()).unwrap();
        tx.send(HubEvent::status_change("m1", ModelStatus::Running)).unwrap();
        drop(tx);

        let mut out = Vec::new();
        forward_events(rx, &mut out).await;

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: HubEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first, starting);
    }

    #[tokio::test]
    async fn test_forwarder_stops_when_flush_fails() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(HubEvent::status_change("m1", ModelStatus::Starting)).unwrap();
        tx.send(HubEvent::status_change("m1", ModelStatus::Running)).unwrap();

        let mut out = BrokenPipe { written: 0 };
        // the sender stays open, so only the failed flush can end the loop
        tokio::time::timeout(std::time::Duration::from_secs(5), forward_events(rx, &mut out))
            .await
            .unwrap();
        assert!(out.written > 0);
        assert!(!tx.is_closed());
    }

    #[tokio::test]
    async fn test_unknown_model_rejected() {
        let daemon = Daemon::new(Config::default());
        let err = daemon
            .run(&["ghost".to_string()], CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
        assert_eq!(daemon.hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let mut config = Config::default();
        config.system_interval_ms = 20;
        // spawn fails, which must not abort the daemon
        config.server_command = vec!["/nonexistent/llama-server".to_string()];
        let model = tempfile::NamedTempFile::new().unwrap();
        config
            .models
            .insert("m1".into(), ModelConfig::new(model.path()));

        let daemon = Daemon::new(config);
        let shutdown = CancellationToken::new();
        let task = {
            let daemon = daemon.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { daemon.run(&[], shutdown).await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(!daemon.collector.history(10).is_empty());
        assert_eq!(daemon.supervisor.running_count(), 0);
        assert!(daemon.supervisor.model_status("m1").last_exit.is_some());
        assert_eq!(daemon.hub.subscriber_count(), 0);
    }
}
