//! Host-wide resource sampling.

pub mod gpu;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use llamactl_shared::metrics::{CpuMetrics, DiskMetrics, DiskVolume, MemoryMetrics, NetworkMetrics};
use llamactl_shared::{GpuSummary, HubEvent, SystemSample};
use sysinfo::{CpuRefreshKind, Disks, Networks, RefreshKind, System};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::history::HistoryBuffer;
use crate::hub::BroadcastHub;

pub use gpu::GpuMonitor;

pub const DEFAULT_HISTORY: usize = 3600;

#[derive(Clone)]
pub struct SystemMetricsCollector {
    inner: Arc<CollectorInner>,
}

struct CollectorInner {
    host: Arc<Mutex<HostProbe>>,
    gpu: GpuMonitor,
    hub: BroadcastHub,
    last: Mutex<SystemSample>,
    history: Mutex<HistoryBuffer<SystemSample>>,
}

/// Everything sysinfo gives us, minus the GPU.
struct HostSnapshot {
    uptime_secs: u64,
    cpu: CpuMetrics,
    memory: MemoryMetrics,
    disk: DiskMetrics,
    network: NetworkMetrics,
}

struct HostProbe {
    sys: System,
}

impl SystemMetricsCollector {
    pub fn new(hub: BroadcastHub, gpu: GpuMonitor, history_capacity: usize) -> Self {
        Self {
            inner: Arc::new(CollectorInner {
                host: Arc::new(Mutex::new(HostProbe::new())),
                gpu,
                hub,
                last: Mutex::new(SystemSample::default()),
                history: Mutex::new(HistoryBuffer::new(history_capacity)),
            }),
        }
    }

    /// Take a host snapshot plus a GPU reading.
    ///
    /// If the host probe fails the previous good sample is returned unchanged,
    /// never a partially filled one.
    pub async fn collect_metrics(&self) -> SystemSample {
        let host = self.inner.host.clone();
        let snapshot = tokio::task::spawn_blocking(move || {
            let mut probe = host.lock().unwrap_or_else(|p| p.into_inner());
            probe.snapshot()
        })
        .await;

        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Host metrics collection failed, serving last sample: {e}");
                return self.metrics();
            }
        };

        let gpu = self.inner.gpu.collect_gpu_metrics().await.aggregate();
        let sample = SystemSample {
            timestamp: Utc::now(),
            uptime_secs: snapshot.uptime_secs,
            cpu: snapshot.cpu,
            memory: snapshot.memory,
            disk: snapshot.disk,
            network: snapshot.network,
            gpu,
        };
        *lock(&self.inner.last) = sample.clone();
        sample
    }

    /// Collect, append to history, and publish a snapshot event.
    pub async fn tick(&self) -> SystemSample {
        let sample = self.collect_metrics().await;
        lock(&self.inner.history).push(sample.clone());
        self.inner.hub.publish(&HubEvent::SystemSnapshot {
            sample: sample.clone(),
        });
        sample
    }

    /// Tick every `interval` until `cancel` fires. The next tick is scheduled
    /// after the current one completes.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        info!(?interval, "System metrics collection started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.tick() => {}
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("System metrics collection stopped");
    }

    /// Last collected sample (zeroed before the first collection).
    pub fn metrics(&self) -> SystemSample {
        lock(&self.inner.last).clone()
    }

    pub fn aggregated_metrics(&self) -> GpuSummary {
        lock(&self.inner.last).gpu.clone()
    }

    pub fn history(&self, limit: usize) -> Vec<SystemSample> {
        lock(&self.inner.history).tail(limit)
    }

    pub fn gpu(&self) -> &GpuMonitor {
        &self.inner.gpu
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

fn percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64 * 100.0) as f32
    }
}

fn round1(v: f32) -> f32 {
    (v * 10.0).round() / 10.0
}

impl HostProbe {
    /// Takes the first CPU reading, so the first snapshot already has a usage
    /// delta to report.
    fn new() -> Self {
        let sys = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::everything()),
        );
        Self { sys }
    }

    fn snapshot(&mut self) -> HostSnapshot {
        // ---------- CPU ----------
        self.sys.refresh_cpu_usage();
        let cpus = self.sys.cpus();
        let load = System::load_average();
        let cpu = CpuMetrics {
            percent: round1(self.sys.global_cpu_usage()),
            per_core: cpus.iter().map(|c| round1(c.cpu_usage())).collect(),
            count: cpus.len(),
            model: cpus
                .first()
                .map(|c| c.brand().trim().to_string())
                .unwrap_or_else(|| "Unknown".into()),
            load_avg: (load.one as f32, load.five as f32, load.fifteen as f32),
        };

        // ---------- Memory ----------
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        let used = self.sys.used_memory();
        let memory = MemoryMetrics {
            used_bytes: used,
            total_bytes: total,
            available_bytes: self.sys.available_memory(),
            percent: percent(used, total),
        };

        // ---------- Disks ----------
        let disks = Disks::new_with_refreshed_list();
        let volumes: Vec<DiskVolume> = disks
            .iter()
            .filter(|d| d.total_space() > 0)
            .map(|d| {
                let used = d.total_space().saturating_sub(d.available_space());
                DiskVolume {
                    filesystem: d.file_system().to_string_lossy().into_owned(),
                    mount: d.mount_point().display().to_string(),
                    used_bytes: used,
                    total_bytes: d.total_space(),
                    percent: percent(used, d.total_space()),
                }
            })
            .collect();
        let used_bytes = volumes.iter().map(|v| v.used_bytes).sum();
        let total_bytes = volumes.iter().map(|v| v.total_bytes).sum();
        let disk = DiskMetrics {
            used_bytes,
            total_bytes,
            percent: percent(used_bytes, total_bytes),
            volumes,
        };

        // ---------- Networks ----------
        let networks = Networks::new_with_refreshed_list();
        let mut network = NetworkMetrics::default();
        for (_, data) in &networks {
            network.rx_bytes = network.rx_bytes.saturating_add(data.total_received());
            network.tx_bytes = network.tx_bytes.saturating_add(data.total_transmitted());
        }

        debug!(cpu = cpu.percent, mem = memory.percent, "Host snapshot taken");

        HostSnapshot {
            uptime_secs: System::uptime(),
            cpu,
            memory,
            disk,
            network,
        }
    }
}
