//! ParameterCostModel - Adjustment Candidate Selection
//!
//! ## Responsibilities
//!
//! - Score each candidate parameter for a requested feature correction
//! - Pick the cheapest single-step adjustment, ties broken by the
//!   candidate order given in the adjustment rule
//!
//! ## Design
//!
//! - Cost starts at the parameter's configured base and is scaled by
//!   direction preference, error magnitude, and remaining headroom,
//!   then clamped into [min_cost, max_cost]
//! - A parameter with no headroom in the needed direction is skipped
//!   entirely rather than priced

use crate::config_store::{CostWeights, ParameterRange, PreferredDirection};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Moving against the configured preferred direction
const AGAINST_PREFERENCE_FACTOR: f64 = 1.5;
/// Large feature error, a correction is worth more
const LARGE_ERROR_FACTOR: f64 = 0.8;
/// Tiny feature error, adjusting is barely worth the disturbance
const SMALL_ERROR_FACTOR: f64 = 1.2;
/// Step lands on or within one step of the range bound
const LOW_HEADROOM_FACTOR: f64 = 1.25;

const LARGE_ERROR_THRESHOLD: f64 = 0.1;
const SMALL_ERROR_THRESHOLD: f64 = 0.02;

/// Direction a correction must move a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increase,
    Decrease,
}

impl Direction {
    fn against(&self, preferred: PreferredDirection) -> bool {
        match (preferred, self) {
            (PreferredDirection::Increase, Direction::Decrease) => true,
            (PreferredDirection::Decrease, Direction::Increase) => true,
            _ => false,
        }
    }
}

/// A camera parameter as last observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraParameter {
    pub name: String,
    pub current_value: i64,
    pub min: i64,
    pub max: i64,
    pub step: i64,
}

impl CameraParameter {
    /// Value after one step in `direction`, None when the range bound
    /// has already been reached
    fn next_value(&self, direction: Direction) -> Option<i64> {
        match direction {
            Direction::Increase if self.current_value < self.max => {
                Some((self.current_value + self.step).min(self.max))
            }
            Direction::Decrease if self.current_value > self.min => {
                Some((self.current_value - self.step).max(self.min))
            }
            _ => None,
        }
    }

    /// True when the step would land on or within one step of the bound
    fn low_headroom(&self, direction: Direction, next_value: i64) -> bool {
        let remaining = match direction {
            Direction::Increase => self.max - next_value,
            Direction::Decrease => next_value - self.min,
        };
        remaining <= self.step
    }
}

/// The chosen single-step adjustment for one feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub parameter_name: String,
    pub current_value: i64,
    pub target_value: i64,
    pub direction: Direction,
    pub cost: f64,
}

/// Cost model over the configured parameter weights and ranges
pub struct CostModel {
    weights: HashMap<String, CostWeights>,
    ranges: HashMap<String, ParameterRange>,
}

impl CostModel {
    pub fn new(
        weights: HashMap<String, CostWeights>,
        ranges: HashMap<String, ParameterRange>,
    ) -> Self {
        Self { weights, ranges }
    }

    /// Bind the configured range onto an observed value
    pub fn parameter(&self, name: &str, current_value: i64) -> Option<CameraParameter> {
        let range = self.ranges.get(name)?;
        Some(CameraParameter {
            name: name.to_string(),
            current_value,
            min: range.min,
            max: range.max,
            step: range.step,
        })
    }

    /// Price one candidate, None when it cannot move in `direction`
    pub fn cost(
        &self,
        parameter: &CameraParameter,
        direction: Direction,
        error_magnitude: f64,
    ) -> Option<f64> {
        let weights = self.weights.get(&parameter.name)?;
        let next_value = parameter.next_value(direction)?;

        let mut cost = weights.base_cost;
        if direction.against(weights.preferred_direction) {
            cost *= AGAINST_PREFERENCE_FACTOR;
        }
        if error_magnitude > LARGE_ERROR_THRESHOLD {
            cost *= LARGE_ERROR_FACTOR;
        } else if error_magnitude < SMALL_ERROR_THRESHOLD {
            cost *= SMALL_ERROR_FACTOR;
        }
        if parameter.low_headroom(direction, next_value) {
            cost *= LOW_HEADROOM_FACTOR;
        }
        Some(cost.clamp(weights.min_cost, weights.max_cost))
    }

    /// Pick the cheapest candidate able to move in `direction`.
    ///
    /// `candidates` come in the adjustment rule's configured order and a
    /// strictly-lower cost is required to displace an earlier candidate,
    /// so ties resolve to the rule order deterministically.
    pub fn find_best_adjustment(
        &self,
        candidates: &[String],
        observed: &HashMap<String, i64>,
        direction: Direction,
        error_magnitude: f64,
    ) -> Result<Adjustment> {
        let mut best: Option<Adjustment> = None;
        for name in candidates {
            let Some(&current_value) = observed.get(name) else {
                continue;
            };
            let Some(parameter) = self.parameter(name, current_value) else {
                tracing::debug!(parameter = %name, "no configured range, skipping candidate");
                continue;
            };
            let Some(cost) = self.cost(&parameter, direction, error_magnitude) else {
                continue;
            };
            let Some(target_value) = parameter.next_value(direction) else {
                continue;
            };
            if best.as_ref().map_or(true, |b| cost < b.cost) {
                best = Some(Adjustment {
                    parameter_name: name.clone(),
                    current_value,
                    target_value,
                    direction,
                    cost,
                });
            }
        }
        best.ok_or_else(|| {
            Error::NoSuitableParameter(format!(
                "no candidate can move {:?} (candidates: {})",
                direction,
                candidates.join(", ")
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(base: f64, preferred: PreferredDirection) -> CostWeights {
        CostWeights {
            base_cost: base,
            max_cost: base * 4.0,
            min_cost: base * 0.4,
            preferred_direction: preferred,
        }
    }

    fn range(min: i64, max: i64) -> ParameterRange {
        ParameterRange { min, max, step: 1 }
    }

    fn brightness_model() -> CostModel {
        let mut w = HashMap::new();
        w.insert(
            "ExposureIris".to_string(),
            weights(0.5, PreferredDirection::Increase),
        );
        w.insert(
            "ExposureGain".to_string(),
            weights(3.0, PreferredDirection::Decrease),
        );
        let mut r = HashMap::new();
        r.insert("ExposureIris".to_string(), range(0, 17));
        r.insert("ExposureGain".to_string(), range(0, 15));
        CostModel::new(w, r)
    }

    fn observed(pairs: &[(&str, i64)]) -> HashMap<String, i64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_cheapest_candidate_wins() {
        let model = brightness_model();
        let candidates = vec!["ExposureIris".to_string(), "ExposureGain".to_string()];
        let adjustment = model
            .find_best_adjustment(
                &candidates,
                &observed(&[("ExposureIris", 8), ("ExposureGain", 5)]),
                Direction::Increase,
                0.05,
            )
            .expect("adjustment");
        assert_eq!(adjustment.parameter_name, "ExposureIris");
        assert_eq!(adjustment.target_value, 9);
    }

    #[test]
    fn test_tie_resolves_to_candidate_order() {
        let mut w = HashMap::new();
        w.insert("A".to_string(), weights(1.0, PreferredDirection::Either));
        w.insert("B".to_string(), weights(1.0, PreferredDirection::Either));
        let mut r = HashMap::new();
        r.insert("A".to_string(), range(0, 10));
        r.insert("B".to_string(), range(0, 10));
        let model = CostModel::new(w, r);
        let adjustment = model
            .find_best_adjustment(
                &["A".to_string(), "B".to_string()],
                &observed(&[("A", 5), ("B", 5)]),
                Direction::Increase,
                0.05,
            )
            .expect("adjustment");
        assert_eq!(adjustment.parameter_name, "A");
    }

    #[test]
    fn test_against_preference_costs_more() {
        let model = brightness_model();
        let iris = model.parameter("ExposureIris", 8).expect("param");
        let with = model.cost(&iris, Direction::Increase, 0.05).expect("cost");
        let against = model.cost(&iris, Direction::Decrease, 0.05).expect("cost");
        assert!(against > with);
        assert!((against / with - AGAINST_PREFERENCE_FACTOR).abs() < 1e-9);
    }

    #[test]
    fn test_error_magnitude_scales_cost() {
        let model = brightness_model();
        let iris = model.parameter("ExposureIris", 8).expect("param");
        let large = model.cost(&iris, Direction::Increase, 0.2).expect("cost");
        let mid = model.cost(&iris, Direction::Increase, 0.05).expect("cost");
        let small = model.cost(&iris, Direction::Increase, 0.01).expect("cost");
        assert!(large < mid);
        assert!(small > mid);
    }

    #[test]
    fn test_exhausted_parameter_is_skipped() {
        let model = brightness_model();
        let candidates = vec!["ExposureIris".to_string(), "ExposureGain".to_string()];
        // Iris pinned at max, gain must carry the correction
        let adjustment = model
            .find_best_adjustment(
                &candidates,
                &observed(&[("ExposureIris", 17), ("ExposureGain", 5)]),
                Direction::Increase,
                0.05,
            )
            .expect("adjustment");
        assert_eq!(adjustment.parameter_name, "ExposureGain");
    }

    #[test]
    fn test_all_exhausted_is_no_suitable_parameter() {
        let model = brightness_model();
        let candidates = vec!["ExposureIris".to_string(), "ExposureGain".to_string()];
        let err = model
            .find_best_adjustment(
                &candidates,
                &observed(&[("ExposureIris", 17), ("ExposureGain", 15)]),
                Direction::Increase,
                0.05,
            )
            .unwrap_err();
        assert!(matches!(err, Error::NoSuitableParameter(_)));
    }

    #[test]
    fn test_low_headroom_penalty_applies() {
        let model = brightness_model();
        let mid = model.parameter("ExposureIris", 8).expect("param");
        let near_max = model.parameter("ExposureIris", 16).expect("param");
        let mid_cost = model.cost(&mid, Direction::Increase, 0.05).expect("cost");
        let edge_cost = model
            .cost(&near_max, Direction::Increase, 0.05)
            .expect("cost");
        assert!(edge_cost > mid_cost);
    }

    #[test]
    fn test_cost_clamped_to_bounds() {
        let mut w = HashMap::new();
        w.insert(
            "A".to_string(),
            CostWeights {
                base_cost: 1.0,
                max_cost: 1.1,
                min_cost: 0.95,
                preferred_direction: PreferredDirection::Increase,
            },
        );
        let mut r = HashMap::new();
        r.insert("A".to_string(), range(0, 10));
        let model = CostModel::new(w, r);
        let param = model.parameter("A", 5).expect("param");
        // 1.0 * 1.5 against preference would be 1.5, clamps to max
        let against = model.cost(&param, Direction::Decrease, 0.05).expect("cost");
        assert!((against - 1.1).abs() < 1e-9);
        // 1.0 * 0.8 large error would be 0.8, clamps to min
        let cheap = model.cost(&param, Direction::Increase, 0.2).expect("cost");
        assert!((cheap - 0.95).abs() < 1e-9);
    }
}
