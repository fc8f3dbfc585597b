//! camtuned - PTZ Camera Exposure Control Daemon
//!
//! Drives camera exposure parameters toward acceptable image statistics
//! across a fleet of cameras speaking two wire protocols.
//!
//! ## Architecture (8 Components)
//!
//! 1. ConfigStore - SSoT for cameras, cost weights, hysteresis, pacing
//! 2. CameraProtocol - CGI (HTTP digest) / VISCA (UDP) transports
//! 3. ConcurrencyController - bounded, rate-limited, adaptive dispatch
//! 4. ParameterCostModel - cost-based parameter selection
//! 5. HysteresisGate - dead-band state machine per (camera, feature)
//! 6. AdjustmentEngine - one adjustment per feature per control cycle
//! 7. TargetSync - master target publication / slave target cache
//! 8. WebApi - stats and health endpoints
//!
//! ## Design Principles
//!
//! - SSoT: ConfigStore is the single source of truth
//! - Single-writer: ConcurrencyState and the target cache each have one owner
//! - Monotonic convergence over minimal adjustment count

pub mod concurrency;
pub mod config_store;
pub mod cost;
pub mod engine;
pub mod error;
pub mod features;
pub mod hysteresis;
pub mod preset;
pub mod protocol;
pub mod state;
pub mod sync;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
