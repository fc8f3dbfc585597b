//! ConfigStore - Single Source of Truth (SSoT)
//!
//! ## Responsibilities
//!
//! - Camera fleet inventory
//! - Cost weights, hysteresis bands, adjustment rules
//! - Protocol selection and pacing/concurrency/rate-limit knobs
//! - Startup validation (invalid config is fatal before any cycle runs)
//!
//! ## Design Principles
//!
//! - SSoT: all configuration reads go through here
//! - Validation happens once at load; runtime code trusts the values

mod types;

pub use types::*;

use crate::error::{Error, Result};
use std::path::Path;

/// ConfigStore instance
pub struct ConfigStore {
    config: ControlConfig,
}

impl ConfigStore {
    /// Load and validate configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "cannot read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: ControlConfig = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid config JSON: {}", e)))?;
        Self::from_config(config)
    }

    /// Wrap an already-built configuration (used by tests and embedding)
    pub fn from_config(mut config: ControlConfig) -> Result<Self> {
        apply_defaults(&mut config);
        validate(&config)?;
        Ok(Self { config })
    }

    /// Borrow the validated configuration
    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Find a camera by id
    pub fn camera(&self, camera_id: &str) -> Option<&CameraEndpoint> {
        self.config
            .cameras
            .iter()
            .find(|c| c.camera_id == camera_id)
    }

    /// Whether the given camera is the configured sync master
    pub fn is_master(&self, camera_id: &str) -> bool {
        self.config
            .sync
            .master_camera_id
            .as_deref()
            .map(|m| m == camera_id)
            .unwrap_or(false)
    }
}

/// Built-in exposure parameter tables, used when the config leaves the
/// cost/rule/range sections empty.
fn apply_defaults(config: &mut ControlConfig) {
    if config.cost_weights.is_empty() {
        let table: [(&str, f64, f64, f64, PreferredDirection); 5] = [
            ("ExposureIris", 0.5, 2.0, 0.2, PreferredDirection::Increase),
            ("ExposureExposureTime", 1.5, 5.0, 0.5, PreferredDirection::Decrease),
            ("ExposureGain", 3.0, 10.0, 1.0, PreferredDirection::Decrease),
            ("DigitalBrightLevel", 2.0, 6.0, 0.5, PreferredDirection::Either),
            ("ColorSaturation", 0.8, 3.0, 0.3, PreferredDirection::Either),
        ];
        for (name, base_cost, max_cost, min_cost, preferred_direction) in table {
            config.cost_weights.insert(
                name.to_string(),
                CostWeights {
                    base_cost,
                    max_cost,
                    min_cost,
                    preferred_direction,
                },
            );
        }
    }
    if config.adjustment_rules.is_empty() {
        let defaults = [
            AdjustmentRule {
                feature: "brightness".to_string(),
                parameters: vec![
                    "ExposureIris".to_string(),
                    "ExposureExposureTime".to_string(),
                    "ExposureGain".to_string(),
                    "DigitalBrightLevel".to_string(),
                ],
            },
            AdjustmentRule {
                feature: "saturation".to_string(),
                parameters: vec!["ColorSaturation".to_string()],
            },
        ];
        config.adjustment_rules = defaults
            .into_iter()
            .filter(|rule| config.features.iter().any(|f| f.name == rule.feature))
            .collect();
    }
    if config.parameter_ranges.is_empty() {
        let ranges: [(&str, i64, i64); 5] = [
            ("ExposureIris", 0, 17),
            ("ExposureExposureTime", 0, 21),
            ("ExposureGain", 0, 15),
            ("DigitalBrightLevel", 0, 15),
            ("ColorSaturation", 0, 14),
        ];
        for (name, min, max) in ranges {
            config
                .parameter_ranges
                .insert(name.to_string(), ParameterRange { min, max, step: 1 });
        }
    }
}

/// Validate configured ranges. Any violation is fatal at startup.
fn validate(config: &ControlConfig) -> Result<()> {
    if config.cameras.is_empty() {
        return Err(Error::Config("no cameras configured".to_string()));
    }
    if config.cycle_interval_ms == 0 {
        return Err(Error::Config(
            "cycle_interval_ms must be greater than zero".to_string(),
        ));
    }

    for cam in &config.cameras {
        if !(1..=6).contains(&cam.cam_id) {
            return Err(Error::Config(format!(
                "camera {}: cam_id {} out of range 1-6",
                cam.camera_id, cam.cam_id
            )));
        }
        if !(1..=15).contains(&cam.venue_number) {
            return Err(Error::Config(format!(
                "camera {}: venue_number {} out of range 1-15",
                cam.camera_id, cam.venue_number
            )));
        }
    }

    let cc = &config.concurrency;
    if !(1..=10).contains(&cc.max_concurrent_operations) {
        return Err(Error::Config(format!(
            "max_concurrent_operations {} out of range 1-10",
            cc.max_concurrent_operations
        )));
    }
    if !(5..=50).contains(&cc.rate_limit.max_requests_per_second) {
        return Err(Error::Config(format!(
            "max_requests_per_second {} out of range 5-50",
            cc.rate_limit.max_requests_per_second
        )));
    }
    for (name, ms) in [
        ("concurrent_ms", cc.pacing.concurrent_ms),
        ("sequential_ms", cc.pacing.sequential_ms),
        ("retry_delay_ms", cc.pacing.retry_delay_ms),
    ] {
        if !(5..=100).contains(&ms) {
            return Err(Error::Config(format!(
                "pacing.{} {} out of range 5-100ms",
                name, ms
            )));
        }
    }
    if cc.pacing.concurrent_ms < 10 {
        return Err(Error::Config(
            "pacing.concurrent_ms below VISCA minimum of 10ms".to_string(),
        ));
    }
    if cc.pacing.sequential_ms < 20 {
        return Err(Error::Config(
            "pacing.sequential_ms below VISCA minimum of 20ms".to_string(),
        ));
    }
    if cc.recovery.success_run == 0 {
        return Err(Error::Config(
            "recovery.success_run must be at least 1".to_string(),
        ));
    }
    if cc.unhealthy_after == 0 {
        return Err(Error::Config(
            "unhealthy_after must be at least 1".to_string(),
        ));
    }

    for (name, w) in &config.cost_weights {
        if !(w.min_cost <= w.base_cost && w.base_cost <= w.max_cost) {
            return Err(Error::Config(format!(
                "cost_weights.{}: expected min_cost <= base_cost <= max_cost",
                name
            )));
        }
        if w.min_cost <= 0.0 {
            return Err(Error::Config(format!(
                "cost_weights.{}: min_cost must be positive",
                name
            )));
        }
    }

    validate_hysteresis("hysteresis", &config.hysteresis)?;
    for feature in &config.features {
        if feature.acceptable_low >= feature.acceptable_high {
            return Err(Error::Config(format!(
                "feature {}: acceptable_low must be below acceptable_high",
                feature.name
            )));
        }
        if let Some(h) = &feature.hysteresis {
            validate_hysteresis(&format!("feature {}", feature.name), h)?;
        }
    }

    for rule in &config.adjustment_rules {
        if !config.features.iter().any(|f| f.name == rule.feature) {
            return Err(Error::Config(format!(
                "adjustment rule references unknown feature '{}'",
                rule.feature
            )));
        }
        for param in &rule.parameters {
            if !config.parameter_ranges.contains_key(param) {
                return Err(Error::Config(format!(
                    "adjustment rule for '{}' references parameter '{}' with no range",
                    rule.feature, param
                )));
            }
        }
    }

    for (name, range) in &config.parameter_ranges {
        if range.min >= range.max {
            return Err(Error::Config(format!(
                "parameter_ranges.{}: min must be below max",
                name
            )));
        }
        if range.step <= 0 {
            return Err(Error::Config(format!(
                "parameter_ranges.{}: step must be positive",
                name
            )));
        }
    }

    if let Some(master) = &config.sync.master_camera_id {
        if !config.cameras.iter().any(|c| &c.camera_id == master) {
            return Err(Error::Config(format!(
                "sync.master_camera_id '{}' is not a configured camera",
                master
            )));
        }
    }

    Ok(())
}

fn validate_hysteresis(scope: &str, h: &HysteresisConfig) -> Result<()> {
    for (name, pct) in [
        ("dead_band_pct", h.dead_band_pct),
        ("inner_pct", h.inner_pct),
        ("outer_pct", h.outer_pct),
    ] {
        if !(0.0..1.0).contains(&pct) {
            return Err(Error::Config(format!(
                "{}: {} {} out of range [0, 1)",
                scope, name, pct
            )));
        }
    }
    if h.inner_pct >= h.outer_pct {
        return Err(Error::Config(format!(
            "{}: inner_pct must be strictly below outer_pct",
            scope
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn minimal_config() -> ControlConfig {
        ControlConfig {
            cameras: vec![CameraEndpoint {
                camera_id: "cam1".to_string(),
                cam_id: 1,
                venue_number: 15,
                host: None,
                username: "admin".to_string(),
                password: "admin".to_string(),
                protocol: None,
            }],
            protocol: ProtocolConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            cost_weights: HashMap::new(),
            hysteresis: HysteresisConfig::default(),
            features: vec![FeatureConfig {
                name: "normalized_brightness".to_string(),
                acceptable_low: 0.25,
                acceptable_high: 0.5,
                hysteresis: None,
            }],
            adjustment_rules: vec![AdjustmentRule {
                feature: "normalized_brightness".to_string(),
                parameters: vec!["ExposureIris".to_string()],
            }],
            parameter_ranges: HashMap::from([(
                "ExposureIris".to_string(),
                ParameterRange {
                    min: 0,
                    max: 17,
                    step: 1,
                },
            )]),
            sync: SyncConfig::default(),
            cycle_interval_ms: 1000,
            initial_preset: HashMap::new(),
        }
    }

    #[test]
    fn test_venue_addressing() {
        let config = minimal_config();
        assert_eq!(config.cameras[0].host(), "192.168.69.51");
    }

    #[test]
    fn test_valid_config_loads() {
        assert!(ConfigStore::from_config(minimal_config()).is_ok());
    }

    #[test]
    fn test_inner_must_be_below_outer() {
        let mut config = minimal_config();
        config.hysteresis.inner_pct = 0.08;
        config.hysteresis.outer_pct = 0.08;
        assert!(matches!(
            ConfigStore::from_config(config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_zero_cycle_interval_rejected() {
        let mut config = minimal_config();
        config.cycle_interval_ms = 0;
        assert!(matches!(
            ConfigStore::from_config(config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_concurrency_limit_range_enforced() {
        let mut config = minimal_config();
        config.concurrency.max_concurrent_operations = 11;
        assert!(ConfigStore::from_config(config).is_err());
    }

    #[test]
    fn test_rule_referencing_unknown_parameter_rejected() {
        let mut config = minimal_config();
        config.adjustment_rules[0]
            .parameters
            .push("ExposureGain".to_string());
        assert!(ConfigStore::from_config(config).is_err());
    }

    #[test]
    fn test_default_tables_fill_empty_sections() {
        let mut config = minimal_config();
        config.features[0].name = "brightness".to_string();
        config.adjustment_rules.clear();
        config.parameter_ranges.clear();
        config.cost_weights.clear();
        let store = ConfigStore::from_config(config).expect("defaults apply");
        let loaded = store.config();
        assert_eq!(loaded.adjustment_rules.len(), 1);
        assert_eq!(loaded.adjustment_rules[0].parameters[0], "ExposureIris");
        assert_eq!(loaded.cost_weights.len(), 5);
        assert_eq!(loaded.parameter_ranges["ExposureGain"].max, 15);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let json = serde_json::to_string(&minimal_config()).expect("serialize");
        std::fs::write(&path, json).expect("write");
        let store = ConfigStore::load(&path).expect("load");
        assert_eq!(store.config().cameras.len(), 1);
        assert!(!store.is_master("cam1"));
    }
}
