//! AdjustmentEngine types

use crate::hysteresis::GateState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Last-known state of one camera parameter
#[derive(Debug, Clone, Default)]
pub struct TrackedParameter {
    pub value: Option<i64>,
    /// False after a timeout or transport fault until a GET confirms
    /// what the camera actually holds
    pub trusted: bool,
    /// True after a protocol rejection until the next successful GET
    pub excluded: bool,
}

/// One applied adjustment, kept in the bounded history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    pub feature: String,
    pub parameter: String,
    pub old_value: i64,
    pub new_value: i64,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}

/// Outcome summary of one control cycle
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CycleReport {
    pub adjustments_applied: usize,
    pub adjustments_rejected: usize,
    /// Features that needed adjustment but had no feasible parameter
    pub stalls: usize,
    /// False when no feature snapshot was available this cycle
    pub measured: bool,
}

/// Engine view served by the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub gate_states: HashMap<String, GateState>,
    pub recent_adjustments: Vec<AdjustmentRecord>,
}
