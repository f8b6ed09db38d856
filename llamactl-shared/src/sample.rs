use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One successful scrape of a model's metrics endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub llama: LlamaCounters,
    pub slots: SlotCounters,
    pub tokens: TokenCounters,
}

impl MetricSample {
    /// Sample with every numeric field at zero.
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            llama: LlamaCounters::default(),
            slots: SlotCounters::default(),
            tokens: TokenCounters::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct LlamaCounters {
    pub tokens_generated: f64,
    pub context_used: f64,
    pub context_size: f64,
    pub context_used_percent: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SlotCounters {
    pub busy: f64,
    pub idle: f64,
    pub total: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TokenCounters {
    pub predicted: f64,
    pub evaluation_timings: f64,
}
