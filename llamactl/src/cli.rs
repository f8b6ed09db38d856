use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::daemon::Daemon;
use crate::hub::BroadcastHub;
use crate::poller;
use crate::system::{GpuMonitor, SystemMetricsCollector};
use crate::util;

#[derive(Parser)]
#[command(name = "llamactl")]
#[command(version, about = "Supervise llama-server processes and stream their telemetry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start models and stream status/metrics events to stdout as JSON lines
    Run {
        /// Config file (defaults to the user config directory)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Model to start, repeatable. All configured models when omitted
        #[arg(short, long = "model")]
        models: Vec<String>,
    },

    /// Parse a saved /metrics payload and print the resulting sample
    Parse {
        /// Path to the exposition text
        file: PathBuf,
    },

    /// Print one host metrics snapshot
    System,

    /// Detect GPUs and print an aggregated reading
    Gpu,

    /// Show version information
    Version,
}

pub async fn cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, models } => {
            let (config, source) =
                Config::load(config.as_deref()).context("Failed to load configuration")?;
            util::logging::init_tracing(&config.log_level)?;
            source.log();
            let shutdown = util::shutdown::ctrl_c_token();
            Daemon::new(config).run(&models, shutdown).await?
        }
        Commands::Parse { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let sample = poller::parse_metrics(&text);
            println!("{}", serde_json::to_string_pretty(&sample)?);
        }
        Commands::System => {
            util::logging::init_tracing("warn")?;
            let collector = SystemMetricsCollector::new(BroadcastHub::new(), GpuMonitor::new(), 1);
            // cpu usage is measured against the reading taken in `new`
            tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
            let sample = collector.collect_metrics().await;
            println!("{}", serde_json::to_string_pretty(&sample)?);
        }
        Commands::Gpu => {
            util::logging::init_tracing("warn")?;
            let monitor = GpuMonitor::new();
            let reading = monitor.collect_gpu_metrics().await;
            println!("vendor: {:?}", monitor.vendor());
            println!("{}", serde_json::to_string_pretty(&reading.aggregate())?);
        }
        Commands::Version => {
            println!("llamactl version {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
