// === Core components ===
pub mod hub;
pub mod poller;
pub mod supervisor;
pub mod system;

pub mod config;
pub mod daemon;
pub mod error;
pub mod history;
pub mod util;

// === CLI entrypoint ===
pub mod cli;

pub use error::{Error, Result};
pub use hub::{BroadcastHub, Subscription};
pub use poller::{MetricsPoller, PollerOptions};
pub use supervisor::{ProcessSupervisor, StopOutcome, SupervisorOptions};
pub use system::{GpuMonitor, SystemMetricsCollector};

/// Entrypoint used by `main.rs` to run the full CLI.
pub async fn run_cli() -> anyhow::Result<()> {
    cli::cli().await
}
