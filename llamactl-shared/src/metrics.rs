use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Host-wide snapshot taken by the system collector.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SystemSample {
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub disk: DiskMetrics,
    pub network: NetworkMetrics,
    pub gpu: GpuSummary,
}

impl Default for SystemSample {
    fn default() -> Self {
        Self {
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            uptime_secs: 0,
            cpu: CpuMetrics::default(),
            memory: MemoryMetrics::default(),
            disk: DiskMetrics::default(),
            network: NetworkMetrics::default(),
            gpu: GpuSummary::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CpuMetrics {
    pub percent: f32,
    pub per_core: Vec<f32>,
    pub count: usize,
    pub model: String,
    pub load_avg: (f32, f32, f32),
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MemoryMetrics {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub percent: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DiskMetrics {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub percent: f32,
    pub volumes: Vec<DiskVolume>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DiskVolume {
    pub filesystem: String,
    pub mount: String,
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub percent: f32,
}

/// Cumulative interface counters summed over every interface.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct NetworkMetrics {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    #[default]
    None,
}

/// One GPU as reported by its vendor tool. Fields the tool does not expose stay at zero.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GpuDevice {
    pub id: u32,
    pub name: String,
    pub driver_version: Option<String>,
    pub memory_total_mb: u64,
    pub memory_used_mb: u64,
    pub memory_free_mb: u64,
    pub utilization_gpu: f32,
    pub utilization_memory: f32,
    pub power_draw_w: f32,
    pub power_limit_w: f32,
    pub temperature_c: f32,
    pub clock_gpu_mhz: u32,
    pub clock_gpu_max_mhz: u32,
    pub clock_memory_mhz: u32,
    pub clock_memory_max_mhz: u32,
    pub compute_cap: Option<String>,
}

/// Raw reading from the GPU monitor.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GpuReading {
    pub available: bool,
    pub vendor: GpuVendor,
    pub devices: Vec<GpuDevice>,
}

impl GpuReading {
    pub fn unavailable() -> Self {
        Self {
            available: false,
            vendor: GpuVendor::None,
            devices: Vec::new(),
        }
    }

    /// Totals and averages across devices. An empty or unavailable reading aggregates to zeros.
    pub fn aggregate(&self) -> GpuSummary {
        if !self.available || self.devices.is_empty() {
            return GpuSummary::default();
        }

        let count = self.devices.len();
        let avg = |f: fn(&GpuDevice) -> f32| {
            self.devices.iter().map(f).sum::<f32>() / count as f32
        };

        GpuSummary {
            available: true,
            average_utilization: avg(|d| d.utilization_gpu).round(),
            total_memory_used_mb: self.devices.iter().map(|d| d.memory_used_mb).sum(),
            total_memory_mb: self.devices.iter().map(|d| d.memory_total_mb).sum(),
            average_temperature_c: avg(|d| d.temperature_c).round(),
            total_power_draw_w: self.devices.iter().map(|d| d.power_draw_w).sum(),
            device_count: count,
            devices: self.devices.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GpuSummary {
    pub available: bool,
    pub average_utilization: f32,
    pub total_memory_used_mb: u64,
    pub total_memory_mb: u64,
    pub average_temperature_c: f32,
    pub total_power_draw_w: f32,
    pub device_count: usize,
    pub devices: Vec<GpuDevice>,
}
