//! Parser for the text exposition format served by llama-server's `/metrics`.
//!
//! ```text
//! # HELP llamacpp_tokens_predicted Number of generation tokens processed.
//! # TYPE llamacpp_tokens_predicted counter
//! llamacpp_tokens_predicted 10
//! llamacpp_slots_busy{slot="0"} 1
//! ```
//!
//! Only a fixed set of metric names is understood. A rename on the server side
//! silently leaves the matching field at zero.

use chrono::{DateTime, Utc};
use llamactl_shared::MetricSample;

pub const TOKENS_GENERATED: &str = "llamacpp_slot_tokens_generated";
pub const CONTEXT_USED: &str = "llamacpp_slot_context_used";
pub const CONTEXT_SIZE: &str = "llamacpp_slot_context_size";
pub const TIMINGS_PROCESSING: &str = "llamacpp_slot_timings_processing";
pub const SLOTS_BUSY: &str = "llamacpp_slots_busy";
pub const SLOTS_IDLE: &str = "llamacpp_slots_idle";
pub const TOKENS_PREDICTED: &str = "llamacpp_tokens_predicted";

/// Parse a payload into a sample stamped with the current time. Never fails:
/// unknown, malformed or non-finite lines are skipped.
pub fn parse_metrics(text: &str) -> MetricSample {
    parse_metrics_at(text, Utc::now())
}

pub fn parse_metrics_at(text: &str, timestamp: DateTime<Utc>) -> MetricSample {
    let mut sample = MetricSample::empty(timestamp);

    for (name, value) in text.lines().filter_map(parse_line) {
        match name {
            TOKENS_GENERATED => sample.llama.tokens_generated = value,
            CONTEXT_USED => sample.llama.context_used = value,
            CONTEXT_SIZE => sample.llama.context_size = value,
            TIMINGS_PROCESSING => sample.tokens.evaluation_timings = value,
            SLOTS_BUSY => sample.slots.busy = value,
            SLOTS_IDLE => sample.slots.idle = value,
            TOKENS_PREDICTED => sample.tokens.predicted = value,
            _ => {}
        }
    }

    sample.slots.total = sample.slots.busy + sample.slots.idle;
    sample.llama.context_used_percent =
        percent(sample.llama.context_used, sample.llama.context_size);
    sample
}

/// `used / size * 100`, rounded to two decimals. Zero when `size` is zero.
fn percent(used: f64, size: f64) -> f64 {
    if size <= 0.0 {
        return 0.0;
    }
    let pct = used / size * 100.0;
    if !pct.is_finite() {
        return 0.0;
    }
    (pct * 100.0).round() / 100.0
}

/// Split `name{labels} value [timestamp]` into the name and a finite value.
fn parse_line(line: &str) -> Option<(&str, f64)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let name_end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == ':'))
        .unwrap_or(line.len());
    if name_end == 0 {
        return None;
    }
    let (name, mut rest) = line.split_at(name_end);

    if rest.starts_with('{') {
        let close = rest.find('}')?;
        rest = &rest[close + 1..];
    }

    // at least one separator between the series and its value
    if !rest.starts_with(|c: char| c.is_whitespace()) {
        return None;
    }
    let value: f64 = rest.split_whitespace().next()?.parse().ok()?;
    value.is_finite().then_some((name, value))
}
