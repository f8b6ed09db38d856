use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::SystemSample;
use crate::model::ModelStatus;
use crate::sample::MetricSample;

/// Everything the broadcast hub can carry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    StatusChange {
        model_name: String,
        status: ModelStatus,
        timestamp: DateTime<Utc>,
    },
    MetricsUpdate {
        model_name: String,
        sample: MetricSample,
        recent_history: Vec<MetricSample>,
    },
    SystemSnapshot {
        sample: SystemSample,
    },
}

impl HubEvent {
    pub fn status_change(model_name: impl Into<String>, status: ModelStatus) -> Self {
        HubEvent::StatusChange {
            model_name: model_name.into(),
            status,
            timestamp: Utc::now(),
        }
    }

    /// Model the event is about, `None` for host snapshots.
    pub fn model_name(&self) -> Option<&str> {
        match self {
            HubEvent::StatusChange { model_name, .. } | HubEvent::MetricsUpdate { model_name, .. } => {
                Some(model_name)
            }
            HubEvent::SystemSnapshot { .. } => None,
        }
    }
}
