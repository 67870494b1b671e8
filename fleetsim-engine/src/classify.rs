//! Health classification and metric bounds.
//!
//! Every producer of `ServerState` (tick engine, scenario overlay, builders)
//! goes through these functions so thresholds cannot drift apart.

use crate::models::{HealthStatus, ServerState};

pub const CRITICAL_THRESHOLD: f64 = 90.0;
pub const WARNING_THRESHOLD: f64 = 70.0;

pub const METRIC_FLOOR: f64 = 5.0;
pub const METRIC_CEILING: f64 = 98.0;

/// Worst-of classification over CPU, memory and disk usage.
pub fn classify(cpu: f64, memory: f64, disk: f64) -> HealthStatus {
    let worst = cpu.max(memory).max(disk);
    if worst >= CRITICAL_THRESHOLD {
        HealthStatus::Critical
    } else if worst >= WARNING_THRESHOLD {
        HealthStatus::Warning
    } else {
        HealthStatus::Normal
    }
}

pub fn classify_state(state: &ServerState) -> HealthStatus {
    classify(state.cpu_usage, state.memory_usage_percent, state.disk_usage_percent)
}

/// Clamp a usage percentage into `[5, 98]`. NaN collapses to the floor.
pub fn clamp_metric(value: f64) -> f64 {
    if value.is_nan() {
        return METRIC_FLOOR;
    }
    value.clamp(METRIC_FLOOR, METRIC_CEILING)
}
