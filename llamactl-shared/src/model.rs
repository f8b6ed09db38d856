use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::config::RuntimeFlags;

/// Lifecycle status of a supervised model process.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl ModelStatus {
    /// Whether the supervisor may move a runtime from `self` to `next`.
    ///
    /// ```text
    /// stopped -> starting -> running -> stopping -> stopped
    /// starting -> error | stopping
    /// running  -> error
    /// starting | running -> stopped   (process exited on its own with success)
    /// error -> stopped
    /// ```
    pub fn can_transition_to(self, next: ModelStatus) -> bool {
        use ModelStatus::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Error)
                | (Starting, Stopping)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Running, Error)
                | (Running, Stopped)
                | (Stopping, Stopped)
                | (Error, Stopped)
        )
    }
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelStatus::Stopped => "stopped",
            ModelStatus::Starting => "starting",
            ModelStatus::Running => "running",
            ModelStatus::Stopping => "stopping",
            ModelStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Health of a model's metrics endpoint as seen by the poller.
///
/// Independent from [`ModelStatus`]: a running process can have an unreachable endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryStatus {
    Starting,
    Running,
    Error,
    #[default]
    Unknown,
}

/// What to launch for one model: the model artifact and its runtime flags.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ModelConfig {
    pub path: PathBuf,
    #[serde(flatten)]
    pub flags: RuntimeFlags,
}

impl ModelConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            flags: RuntimeFlags::default(),
        }
    }

    pub fn with_flags(mut self, flags: RuntimeFlags) -> Self {
        self.flags = flags;
        self
    }
}
