//! HysteresisGate - Adjustment Flapping Prevention
//!
//! ## Responsibilities
//!
//! - Decide per cycle whether a feature deviation warrants adjustment
//! - Hold an explicit two-state gate so entry and exit use different
//!   thresholds and a value hovering at the band edge cannot flap
//!
//! ## Design
//!
//! - Thresholds derive from the acceptable range: the dead band is a
//!   percentage of it, the outer (entry) threshold sits beyond the dead
//!   band, the inner (exit) threshold sits inside it
//! - The gate's reference center can be overridden per evaluation, the
//!   sync layer uses this to recenter slaves on the master's target

use crate::config_store::{FeatureConfig, HysteresisConfig};
use crate::cost::Direction;
use serde::{Deserialize, Serialize};

/// Gate state, entry and exit thresholds differ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    InsideDeadBand,
    OutsideNeedsAdjust,
}

/// Thresholds derived from one feature's acceptable range
#[derive(Debug, Clone, Copy)]
pub struct FeatureBand {
    pub center: f64,
    pub dead_band: f64,
    /// Deviation that flips the gate to OutsideNeedsAdjust
    pub outer: f64,
    /// Deviation below which the gate returns to InsideDeadBand
    pub inner: f64,
}

impl FeatureBand {
    pub fn from_config(feature: &FeatureConfig, defaults: &HysteresisConfig) -> Self {
        let hysteresis = feature.hysteresis.as_ref().unwrap_or(defaults);
        let range = feature.acceptable_high - feature.acceptable_low;
        let dead_band = range * hysteresis.dead_band_pct;
        Self {
            center: (feature.acceptable_low + feature.acceptable_high) / 2.0,
            dead_band,
            outer: dead_band + range * hysteresis.outer_pct,
            inner: (dead_band - range * hysteresis.inner_pct).max(0.0),
        }
    }
}

/// One gate evaluation
#[derive(Debug, Clone, Copy)]
pub struct GateDecision {
    pub state: GateState,
    pub needs_adjustment: bool,
    /// Which way a parameter must move to pull the feature back
    pub direction: Option<Direction>,
    /// Absolute deviation from the (possibly overridden) center
    pub error_magnitude: f64,
}

/// Per-feature hysteresis gate, held across cycles
pub struct HysteresisGate {
    band: FeatureBand,
    state: GateState,
}

impl HysteresisGate {
    pub fn new(band: FeatureBand) -> Self {
        Self {
            band,
            state: GateState::InsideDeadBand,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn band(&self) -> &FeatureBand {
        &self.band
    }

    /// Evaluate one measurement. `center_override` replaces the band
    /// midpoint as the reference, the thresholds themselves are
    /// unchanged.
    pub fn evaluate(&mut self, measured: f64, center_override: Option<f64>) -> GateDecision {
        let center = center_override.unwrap_or(self.band.center);
        let deviation = measured - center;
        let magnitude = deviation.abs();

        self.state = match self.state {
            GateState::InsideDeadBand if magnitude > self.band.outer => {
                GateState::OutsideNeedsAdjust
            }
            GateState::OutsideNeedsAdjust if magnitude <= self.band.inner => {
                GateState::InsideDeadBand
            }
            state => state,
        };

        let needs_adjustment = self.state == GateState::OutsideNeedsAdjust;
        GateDecision {
            state: self.state,
            needs_adjustment,
            direction: needs_adjustment.then(|| {
                if deviation < 0.0 {
                    Direction::Increase
                } else {
                    Direction::Decrease
                }
            }),
            error_magnitude: magnitude,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brightness_gate() -> HysteresisGate {
        let feature = FeatureConfig {
            name: "brightness".to_string(),
            acceptable_low: 0.4,
            acceptable_high: 0.6,
            hysteresis: None,
        };
        let defaults = HysteresisConfig {
            dead_band_pct: 0.05,
            inner_pct: 0.02,
            outer_pct: 0.08,
        };
        // range 0.2: dead_band 0.01, outer 0.026, inner 0.006
        HysteresisGate::new(FeatureBand::from_config(&feature, &defaults))
    }

    #[test]
    fn test_band_thresholds() {
        let gate = brightness_gate();
        let band = gate.band();
        assert!((band.center - 0.5).abs() < 1e-9);
        assert!((band.dead_band - 0.01).abs() < 1e-9);
        assert!((band.outer - 0.026).abs() < 1e-9);
        assert!((band.inner - 0.006).abs() < 1e-9);
    }

    #[test]
    fn test_small_deviation_stays_inside() {
        let mut gate = brightness_gate();
        // Past the dead band but below the outer threshold
        let decision = gate.evaluate(0.52, None);
        assert_eq!(decision.state, GateState::InsideDeadBand);
        assert!(!decision.needs_adjustment);
        assert_eq!(decision.direction, None);
    }

    #[test]
    fn test_large_deviation_opens_gate() {
        let mut gate = brightness_gate();
        let decision = gate.evaluate(0.55, None);
        assert_eq!(decision.state, GateState::OutsideNeedsAdjust);
        assert_eq!(decision.direction, Some(Direction::Decrease));

        let dim = gate.evaluate(0.45, None);
        assert_eq!(dim.direction, Some(Direction::Increase));
    }

    #[test]
    fn test_gate_holds_until_inner_threshold() {
        let mut gate = brightness_gate();
        gate.evaluate(0.55, None);
        // Back inside the dead band but not within the inner threshold
        let hovering = gate.evaluate(0.508, None);
        assert_eq!(hovering.state, GateState::OutsideNeedsAdjust);
        assert!(hovering.needs_adjustment);
        // Within the inner threshold closes the gate
        let settled = gate.evaluate(0.503, None);
        assert_eq!(settled.state, GateState::InsideDeadBand);
        assert!(!settled.needs_adjustment);
    }

    #[test]
    fn test_edge_hover_does_not_flap() {
        let mut gate = brightness_gate();
        gate.evaluate(0.53, None);
        // Oscillating between inner and outer keeps one stable state
        for measured in [0.520, 0.510, 0.522, 0.512] {
            let decision = gate.evaluate(measured, None);
            assert_eq!(decision.state, GateState::OutsideNeedsAdjust);
        }
    }

    #[test]
    fn test_center_override_shifts_reference() {
        let mut gate = brightness_gate();
        // 0.55 is far from the default center but on top of the override
        let decision = gate.evaluate(0.55, Some(0.55));
        assert_eq!(decision.state, GateState::InsideDeadBand);
        assert!(decision.error_magnitude < 1e-9);

        let shifted = gate.evaluate(0.5, Some(0.55));
        assert_eq!(shifted.state, GateState::OutsideNeedsAdjust);
        assert_eq!(shifted.direction, Some(Direction::Increase));
    }
}
