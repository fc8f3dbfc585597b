//! ConcurrencyController types

use serde::{Deserialize, Serialize};

/// One camera operation to schedule
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Read the current value of a parameter
    Get { parameter: String },
    /// Write a new value to a parameter
    Set { parameter: String, value: i64 },
}

impl Operation {
    pub fn parameter(&self) -> &str {
        match self {
            Operation::Get { parameter } => parameter,
            Operation::Set { parameter, .. } => parameter,
        }
    }

    /// SET operations are throttled separately from GETs
    pub fn is_set(&self) -> bool {
        matches!(self, Operation::Set { .. })
    }
}

/// Scheduling mode derived from config and the adaptive limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    Concurrent,
    Sequential,
}

/// Point-in-time controller statistics, served on the stats endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyStats {
    pub enabled: bool,
    pub mode: SchedulingMode,
    pub current_limit: usize,
    pub max_limit: usize,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub rate_limiting_active: bool,
    /// False once `unhealthy_after` consecutive transport failures pile up
    pub healthy: bool,
    pub consecutive_failures: u32,
}
