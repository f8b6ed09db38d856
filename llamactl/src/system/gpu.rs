//! GPU sampling through vendor command line tools.
//!
//! The first read probes `PATH` for `nvidia-smi`, then `rocm-smi`, then
//! `intel_gpu_top` and sticks with whichever it finds for the lifetime of the
//! monitor. Tool invocations are rate limited; reads inside the window return
//! the cached reading. No tool, or a failing tool, never surfaces as an error.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use llamactl_shared::{GpuDevice, GpuReading, GpuSummary, GpuVendor};
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::Error;

const TOOL_TIMEOUT: Duration = Duration::from_secs(5);
pub const MIN_INVOCATION_INTERVAL: Duration = Duration::from_secs(1);

const NVIDIA_QUERY: [&str; 16] = [
    "index",
    "name",
    "driver_version",
    "memory.total",
    "memory.used",
    "memory.free",
    "utilization.gpu",
    "utilization.memory",
    "power.draw",
    "power.limit",
    "temperature.gpu",
    "clocks.current.graphics",
    "clocks.max.graphics",
    "clocks.current.memory",
    "clocks.max.memory",
    "compute_cap",
];

/// One vendor's query tool.
#[async_trait]
pub trait GpuTool: Send + Sync {
    fn vendor(&self) -> GpuVendor;

    async fn query(&self) -> Result<Vec<GpuDevice>>;
}

pub struct GpuMonitor {
    search_path: Vec<PathBuf>,
    tool: OnceLock<Option<Arc<dyn GpuTool>>>,
    min_interval: Duration,
    // serializes invocations, holds the last spawn time
    last_invocation: tokio::sync::Mutex<Option<Instant>>,
    reading: Mutex<GpuReading>,
}

impl Default for GpuMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuMonitor {
    /// Monitor that probes the process `PATH`.
    pub fn new() -> Self {
        let search_path = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        Self::with_search_path(search_path)
    }

    pub fn with_search_path(search_path: Vec<PathBuf>) -> Self {
        Self {
            search_path,
            tool: OnceLock::new(),
            min_interval: MIN_INVOCATION_INTERVAL,
            last_invocation: tokio::sync::Mutex::new(None),
            reading: Mutex::new(GpuReading::unavailable()),
        }
    }

    /// Skip detection and use `tool` directly.
    pub fn with_tool(tool: Arc<dyn GpuTool>) -> Self {
        let monitor = Self::with_search_path(Vec::new());
        let _ = monitor.tool.set(Some(tool));
        monitor
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Vendor found on first use, [`GpuVendor::None`] when no tool is installed.
    pub fn vendor(&self) -> GpuVendor {
        self.detected()
            .map(|tool| tool.vendor())
            .unwrap_or(GpuVendor::None)
    }

    /// Fresh reading, or the cached one when the last tool run is younger than
    /// the minimum interval.
    pub async fn collect_gpu_metrics(&self) -> GpuReading {
        let Some(tool) = self.detected() else {
            return GpuReading::unavailable();
        };

        let mut last_invocation = self.last_invocation.lock().await;
        if let Some(last) = *last_invocation {
            if last.elapsed() < self.min_interval {
                return self.metrics();
            }
        }
        *last_invocation = Some(Instant::now());

        match tool.query().await {
            Ok(devices) => {
                let reading = GpuReading {
                    available: !devices.is_empty(),
                    vendor: tool.vendor(),
                    devices,
                };
                *self.reading.lock().unwrap_or_else(|p| p.into_inner()) = reading.clone();
                reading
            }
            Err(e) => {
                // keep serving the last known state
                let error = Error::GpuUnavailable(format!("{e:#}"));
                warn!("{error}");
                self.metrics()
            }
        }
    }

    /// Last reading without invoking any tool.
    pub fn metrics(&self) -> GpuReading {
        self.reading.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn aggregated_metrics(&self) -> GpuSummary {
        self.metrics().aggregate()
    }

    fn detected(&self) -> Option<Arc<dyn GpuTool>> {
        self.tool.get_or_init(|| detect_tool(&self.search_path)).clone()
    }
}

fn detect_tool(search_path: &[PathBuf]) -> Option<Arc<dyn GpuTool>> {
    if let Some(program) = find_program("nvidia-smi", search_path) {
        info!(tool = %program.display(), "NVIDIA GPU tooling detected");
        return Some(Arc::new(NvidiaSmi { program }));
    }
    if let Some(program) = find_program("rocm-smi", search_path) {
        info!(tool = %program.display(), "AMD GPU tooling detected");
        return Some(Arc::new(RocmSmi { program }));
    }
    if let Some(program) = find_program("intel_gpu_top", search_path) {
        info!(tool = %program.display(), "Intel GPU tooling detected");
        return Some(Arc::new(IntelGpuTop { program }));
    }
    info!("No GPU tooling found (nvidia-smi, rocm-smi, intel_gpu_top)");
    None
}

/// First `dir/name` in `search_path` that is a regular file.
pub fn find_program(name: &str, search_path: &[PathBuf]) -> Option<PathBuf> {
    search_path.iter().find_map(|dir| {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{name}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}

async fn run_tool(program: &Path, args: &[&str]) -> Result<String> {
    debug!(tool = %program.display(), ?args, "Invoking GPU tool");
    let output = tokio::time::timeout(
        TOOL_TIMEOUT,
        Command::new(program).args(args).kill_on_drop(true).output(),
    )
    .await
    .with_context(|| format!("{} timed out", program.display()))?
    .with_context(|| format!("Failed to run {}", program.display()))?;

    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            program.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ---------- NVIDIA ----------

struct NvidiaSmi {
    program: PathBuf,
}

#[async_trait]
impl GpuTool for NvidiaSmi {
    fn vendor(&self) -> GpuVendor {
        GpuVendor::Nvidia
    }

    async fn query(&self) -> Result<Vec<GpuDevice>> {
        let query = format!("--query-gpu={}", NVIDIA_QUERY.join(","));
        let out = run_tool(&self.program, &[&query, "--format=csv,noheader,nounits"]).await?;
        Ok(parse_nvidia_csv(&out))
    }
}

/// Parse `nvidia-smi` CSV rows in [`NVIDIA_QUERY`] order. Cells such as
/// `[N/A]` read as zero.
pub fn parse_nvidia_csv(text: &str) -> Vec<GpuDevice> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(idx, line)| {
            let parts: Vec<&str> = line.split(',').map(|x| x.trim()).collect();
            let cell = |i: usize| parts.get(i).copied().unwrap_or("");
            let num = |i: usize| cell(i).parse::<f32>().unwrap_or(0.0);
            let int = |i: usize| cell(i).parse::<f64>().map(|v| v as u64).unwrap_or(0);
            let label = |i: usize| Some(cell(i)).filter(|s| !s.is_empty() && !s.starts_with('['));

            GpuDevice {
                id: cell(0).parse().unwrap_or(idx as u32),
                name: label(1)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("GPU {idx}")),
                driver_version: label(2).map(str::to_string),
                memory_total_mb: int(3),
                memory_used_mb: int(4),
                memory_free_mb: int(5),
                utilization_gpu: num(6),
                utilization_memory: num(7),
                power_draw_w: num(8),
                power_limit_w: num(9),
                temperature_c: num(10),
                clock_gpu_mhz: int(11) as u32,
                clock_gpu_max_mhz: int(12) as u32,
                clock_memory_mhz: int(13) as u32,
                clock_memory_max_mhz: int(14) as u32,
                compute_cap: label(15).map(str::to_string),
            }
        })
        .collect()
}

// ---------- AMD ----------

struct RocmSmi {
    program: PathBuf,
}

#[async_trait]
impl GpuTool for RocmSmi {
    fn vendor(&self) -> GpuVendor {
        GpuVendor::Amd
    }

    async fn query(&self) -> Result<Vec<GpuDevice>> {
        let out = run_tool(
            &self.program,
            &[
                "--showuse",
                "--showtemp",
                "--showpower",
                "--showmeminfo",
                "vram",
                "--showproductname",
                "--json",
            ],
        )
        .await?;
        Ok(parse_rocm_json(&out))
    }
}

/// Best-effort parse of `rocm-smi --json`. Field names differ between ROCm
/// releases, so keys are matched by substring. Output that is not JSON yields
/// no devices.
pub fn parse_rocm_json(text: &str) -> Vec<GpuDevice> {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        debug!("rocm-smi output is not JSON, ignoring");
        return Vec::new();
    };

    let cards: Vec<&Map<String, Value>> = match &value {
        Value::Object(map) => map
            .iter()
            .filter(|(key, _)| key.starts_with("card"))
            .filter_map(|(_, v)| v.as_object())
            .collect(),
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    };

    cards
        .into_iter()
        .enumerate()
        .map(|(idx, card)| {
            let bytes_to_mb = |v: f64| (v / (1024.0 * 1024.0)) as u64;
            GpuDevice {
                id: idx as u32,
                name: find_str(card, &["card series"])
                    .or_else(|| find_str(card, &["card model"]))
                    .unwrap_or_else(|| format!("GPU {idx}")),
                utilization_gpu: find_num(card, &["gpu use"]).unwrap_or(0.0) as f32,
                temperature_c: find_num(card, &["temperature", "edge"])
                    .or_else(|| find_num(card, &["temperature"]))
                    .unwrap_or(0.0) as f32,
                power_draw_w: find_num(card, &["power"]).unwrap_or(0.0) as f32,
                memory_total_mb: find_num(card, &["vram total memory"])
                    .map(bytes_to_mb)
                    .unwrap_or(0),
                memory_used_mb: find_num(card, &["vram total used memory"])
                    .map(bytes_to_mb)
                    .unwrap_or(0),
                ..Default::default()
            }
        })
        .collect()
}

fn find_value<'a>(card: &'a Map<String, Value>, needles: &[&str]) -> Option<&'a Value> {
    card.iter()
        .find(|(key, _)| {
            let key = key.to_lowercase();
            needles.iter().all(|n| key.contains(n))
        })
        .map(|(_, v)| v)
}

fn find_str(card: &Map<String, Value>, needles: &[&str]) -> Option<String> {
    find_value(card, needles)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn find_num(card: &Map<String, Value>, needles: &[&str]) -> Option<f64> {
    match find_value(card, needles)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

// ---------- Intel ----------

struct IntelGpuTop {
    program: PathBuf,
}

#[async_trait]
impl GpuTool for IntelGpuTop {
    fn vendor(&self) -> GpuVendor {
        GpuVendor::Intel
    }

    async fn query(&self) -> Result<Vec<GpuDevice>> {
        let out = run_tool(&self.program, &["-L"]).await?;
        Ok(parse_intel_list(&out))
    }
}

/// `intel_gpu_top -L` only lists cards; metrics stay at zero.
pub fn parse_intel_list(text: &str) -> Vec<GpuDevice> {
    text.lines()
        .map(str::trim)
        .filter(|l| l.starts_with("card"))
        .enumerate()
        .map(|(idx, line)| GpuDevice {
            id: idx as u32,
            name: format!("Intel GPU ({line})"),
            ..Default::default()
        })
        .collect()
}
