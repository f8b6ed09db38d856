use std::path::PathBuf;

use thiserror::Error;

/// Result type for supervisor and telemetry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by llamactl components.
///
/// Only the lifecycle variants reach callers of the supervisor. The telemetry
/// variants are produced internally, logged, and folded into status fields.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Model {0} is already running")]
    AlreadyRunning(String),

    #[error("Model {0} is not running")]
    NotRunning(String),

    #[error("Model file not found: {}", .0.display())]
    ModelFileNotFound(PathBuf),

    #[error("Failed to spawn {model}: {source}")]
    SpawnFailure {
        model: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Model {0} is not registered for metrics")]
    NotRegistered(String),

    #[error("Metrics endpoint {url} unreachable: {reason}")]
    MetricsUnreachable { url: String, reason: String },

    #[error("GPU unavailable: {0}")]
    GpuUnavailable(String),

    #[error("Subscriber failed: {0}")]
    SubscriberFailure(String),
}
