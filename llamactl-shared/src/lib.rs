//! Types shared between the llamactl supervisor and whatever consumes its events.

pub mod config;
pub mod event;
pub mod metrics;
pub mod model;
pub mod sample;

pub use config::RuntimeFlags;
pub use event::HubEvent;
pub use metrics::{GpuDevice, GpuReading, GpuSummary, GpuVendor, SystemSample};
pub use model::{ModelConfig, ModelStatus, TelemetryStatus};
pub use sample::MetricSample;
