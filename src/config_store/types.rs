//! ConfigStore type definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Wire protocol selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// HTTP CGI with digest authentication
    Cgi,
    /// VISCA over IP (UDP)
    Visca,
}

impl Default for ProtocolKind {
    fn default() -> Self {
        Self::Cgi
    }
}

/// One camera in the fleet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraEndpoint {
    /// Stable camera identifier (used in topics, stats, logs)
    pub camera_id: String,
    /// Camera number within the venue (1-6)
    pub cam_id: u8,
    /// Venue number (1-15)
    pub venue_number: u8,
    /// Explicit host override; when absent the venue addressing
    /// scheme 192.168.{venue+54}.5{cam} is used
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    /// Per-camera protocol override
    #[serde(default)]
    pub protocol: Option<ProtocolKind>,
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_password() -> String {
    "admin".to_string()
}

impl CameraEndpoint {
    /// Resolve the camera host address
    pub fn host(&self) -> String {
        match &self.host {
            Some(h) => h.clone(),
            None => format!("192.168.{}.5{}", self.venue_number as u16 + 54, self.cam_id),
        }
    }
}

/// CGI transport tuning.
///
/// The network tolerates many short retries better than long waits,
/// hence the high attempt budget at tight spacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CgiConfig {
    #[serde(default = "default_cgi_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_cgi_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_cgi_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_cgi_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_cgi_pool_size() -> usize {
    6
}
fn default_cgi_timeout_ms() -> u64 {
    2000
}
fn default_cgi_max_attempts() -> u32 {
    50
}
fn default_cgi_retry_delay_ms() -> u64 {
    500
}

impl Default for CgiConfig {
    fn default() -> Self {
        Self {
            pool_size: default_cgi_pool_size(),
            timeout_ms: default_cgi_timeout_ms(),
            max_attempts: default_cgi_max_attempts(),
            retry_delay_ms: default_cgi_retry_delay_ms(),
        }
    }
}

/// VISCA transport tuning.
///
/// Per-packet cost is low but a shared UDP socket blocks while a
/// transaction is in flight, so the timeout is short and retries few.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViscaConfig {
    #[serde(default = "default_visca_port")]
    pub port: u16,
    #[serde(default = "default_visca_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_visca_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_visca_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_visca_batch_size")]
    pub batch_size: usize,
}

fn default_visca_port() -> u16 {
    52381
}
fn default_visca_timeout_ms() -> u64 {
    100
}
fn default_visca_max_retries() -> u32 {
    2
}
fn default_visca_retry_delay_ms() -> u64 {
    10
}
fn default_visca_batch_size() -> usize {
    5
}

impl Default for ViscaConfig {
    fn default() -> Self {
        Self {
            port: default_visca_port(),
            timeout_ms: default_visca_timeout_ms(),
            max_retries: default_visca_max_retries(),
            retry_delay_ms: default_visca_retry_delay_ms(),
            batch_size: default_visca_batch_size(),
        }
    }
}

/// Protocol section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub kind: ProtocolKind,
    #[serde(default)]
    pub cgi: CgiConfig,
    #[serde(default)]
    pub visca: ViscaConfig,
}

/// Dispatch spacing on one camera connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Minimum spacing between concurrent dispatches (VISCA compliance: >= 10ms)
    #[serde(default = "default_concurrent_ms")]
    pub concurrent_ms: u64,
    /// Spacing between sequential commands (VISCA compliance: >= 20ms)
    #[serde(default = "default_sequential_ms")]
    pub sequential_ms: u64,
    /// Extra delay before a sequential-mode retry
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_concurrent_ms() -> u64 {
    10
}
fn default_sequential_ms() -> u64 {
    20
}
fn default_retry_delay_ms() -> u64 {
    50
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            concurrent_ms: default_concurrent_ms(),
            sequential_ms: default_sequential_ms(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Token-bucket rate limiting shared per camera across GET and SET traffic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Count SET operations against the bucket
    #[serde(default = "default_true")]
    pub set_operations: bool,
    /// Count GET operations against the bucket
    #[serde(default = "default_true")]
    pub get_operations: bool,
    #[serde(default = "default_max_rps")]
    pub max_requests_per_second: u32,
}

fn default_true() -> bool {
    true
}
fn default_max_rps() -> u32 {
    20
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            set_operations: true,
            get_operations: true,
            max_requests_per_second: default_max_rps(),
        }
    }
}

/// Climb-back behavior after adaptive degradation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Consecutive clean successes required before the limit may climb
    #[serde(default = "default_success_run")]
    pub success_run: u32,
    /// Minimum time between consecutive climbs
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_success_run() -> u32 {
    5
}
fn default_cooldown_ms() -> u64 {
    1000
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            success_run: default_success_run(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

/// ConcurrencyController configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// When false, operations run strictly sequentially with legacy pacing
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Hard ceiling on simultaneously in-flight operations (1-10)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_operations: usize,
    /// Adaptive degradation toward sequential on repeated failure
    #[serde(default = "default_true")]
    pub fallback_to_sequential: bool,
    /// Consecutive transport failures before the camera is reported unhealthy
    #[serde(default = "default_unhealthy_after")]
    pub unhealthy_after: u32,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

fn default_max_concurrent() -> usize {
    5
}
fn default_unhealthy_after() -> u32 {
    5
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_operations: default_max_concurrent(),
            fallback_to_sequential: true,
            unhealthy_after: default_unhealthy_after(),
            pacing: PacingConfig::default(),
            rate_limit: RateLimitConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

/// Cost weights for one parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostWeights {
    pub base_cost: f64,
    pub max_cost: f64,
    pub min_cost: f64,
    #[serde(default)]
    pub preferred_direction: PreferredDirection,
}

/// Preferred adjustment direction for a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferredDirection {
    Increase,
    Decrease,
    Either,
}

impl Default for PreferredDirection {
    fn default() -> Self {
        Self::Either
    }
}

/// Hysteresis percentages relative to the acceptable range
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HysteresisConfig {
    #[serde(default = "default_dead_band_pct")]
    pub dead_band_pct: f64,
    #[serde(default = "default_inner_pct")]
    pub inner_pct: f64,
    #[serde(default = "default_outer_pct")]
    pub outer_pct: f64,
}

fn default_dead_band_pct() -> f64 {
    0.05
}
fn default_inner_pct() -> f64 {
    0.02
}
fn default_outer_pct() -> f64 {
    0.08
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            dead_band_pct: default_dead_band_pct(),
            inner_pct: default_inner_pct(),
            outer_pct: default_outer_pct(),
        }
    }
}

/// One monitored image feature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub name: String,
    pub acceptable_low: f64,
    pub acceptable_high: f64,
    /// Per-feature hysteresis override
    #[serde(default)]
    pub hysteresis: Option<HysteresisConfig>,
}

/// Mapping from a feature to the parameters that can correct it,
/// in tie-break priority order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustmentRule {
    pub feature: String,
    pub parameters: Vec<String>,
}

/// Valid range and granularity of one camera parameter
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParameterRange {
    pub min: i64,
    pub max: i64,
    #[serde(default = "default_step")]
    pub step: i64,
}

fn default_step() -> i64 {
    1
}

/// Master/slave sync section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Camera designated as the single target publisher (configured, not elected)
    #[serde(default)]
    pub master_camera_id: Option<String>,
    /// Received targets older than this are ignored
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
}

fn default_staleness_secs() -> u64 {
    30
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            master_camera_id: None,
            staleness_secs: default_staleness_secs(),
        }
    }
}

/// Root control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    pub cameras: Vec<CameraEndpoint>,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    /// Cost weights keyed by parameter name
    #[serde(default)]
    pub cost_weights: HashMap<String, CostWeights>,
    /// Default hysteresis applied to features without an override
    #[serde(default)]
    pub hysteresis: HysteresisConfig,
    pub features: Vec<FeatureConfig>,
    pub adjustment_rules: Vec<AdjustmentRule>,
    /// Parameter ranges keyed by parameter name
    pub parameter_ranges: HashMap<String, ParameterRange>,
    #[serde(default)]
    pub sync: SyncConfig,
    /// Control cycle period
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
    /// Imaging preset pushed before the first control cycle
    #[serde(default)]
    pub initial_preset: HashMap<String, String>,
}

fn default_cycle_interval_ms() -> u64 {
    1000
}
