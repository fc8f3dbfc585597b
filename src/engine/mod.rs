//! AdjustmentEngine - Per-Camera Control Loop
//!
//! ## Responsibilities
//!
//! - Run the periodic cycle: refresh parameters, measure features,
//!   evaluate gates, pick and submit at most one adjustment per feature
//! - Track per-parameter trust (stale after timeout/fault, excluded
//!   after rejection) and a bounded adjustment history
//! - Push the initial imaging preset before the first cycle
//! - Publish feature targets when this camera is the sync master,
//!   recenter on the master's targets when it is a slave
//!
//! ## Design
//!
//! - A failed feature never blocks the others, a failed camera never
//!   blocks the fleet; everything soft is logged and retried next cycle
//! - All camera traffic flows through the ConcurrencyController

mod types;

pub use types::*;

use crate::concurrency::{ConcurrencyController, Operation};
use crate::config_store::{ControlConfig, FeatureConfig};
use crate::cost::CostModel;
use crate::error::Error;
use crate::features::FeatureExtractor;
use crate::hysteresis::{FeatureBand, HysteresisGate};
use crate::preset::apply_initial_preset;
use crate::protocol::CommandOutcome;
use crate::sync::{TargetCache, TargetPublisher};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::interval;

/// Applied adjustments retained for the stats endpoint
const HISTORY_LIMIT: usize = 100;

/// AdjustmentEngine instance, one per camera
pub struct AdjustmentEngine {
    camera_id: String,
    controller: Arc<ConcurrencyController>,
    extractor: Arc<dyn FeatureExtractor>,
    cost_model: CostModel,
    features: Vec<FeatureConfig>,
    /// feature name -> candidate parameters in rule order
    rules: HashMap<String, Vec<String>>,
    /// All parameters under management, refreshed each cycle
    parameters: Vec<String>,
    initial_preset: HashMap<String, String>,
    cycle_interval: Duration,
    gates: Mutex<HashMap<String, HysteresisGate>>,
    tracked: RwLock<HashMap<String, TrackedParameter>>,
    history: RwLock<VecDeque<AdjustmentRecord>>,
    preset_applied: AtomicBool,
    /// Present only on the configured sync master
    publisher: Option<TargetPublisher>,
    /// Present only on slaves
    target_cache: Option<Arc<TargetCache>>,
    running: Arc<RwLock<bool>>,
}

impl AdjustmentEngine {
    pub fn new(
        camera_id: impl Into<String>,
        controller: Arc<ConcurrencyController>,
        extractor: Arc<dyn FeatureExtractor>,
        config: &ControlConfig,
        publisher: Option<TargetPublisher>,
        target_cache: Option<Arc<TargetCache>>,
    ) -> Self {
        let rules: HashMap<String, Vec<String>> = config
            .adjustment_rules
            .iter()
            .map(|r| (r.feature.clone(), r.parameters.clone()))
            .collect();

        let mut parameters: Vec<String> = Vec::new();
        for rule in &config.adjustment_rules {
            for param in &rule.parameters {
                if !parameters.contains(param) {
                    parameters.push(param.clone());
                }
            }
        }

        let gates = config
            .features
            .iter()
            .map(|f| {
                let band = FeatureBand::from_config(f, &config.hysteresis);
                (f.name.clone(), HysteresisGate::new(band))
            })
            .collect();

        Self {
            camera_id: camera_id.into(),
            controller,
            extractor,
            cost_model: CostModel::new(
                config.cost_weights.clone(),
                config.parameter_ranges.clone(),
            ),
            features: config.features.clone(),
            rules,
            parameters,
            initial_preset: config.initial_preset.clone(),
            cycle_interval: Duration::from_millis(config.cycle_interval_ms),
            gates: Mutex::new(gates),
            tracked: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            preset_applied: AtomicBool::new(false),
            publisher,
            target_cache,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the control loop task
    pub fn start(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            {
                let mut running = engine.running.write().await;
                if *running {
                    tracing::warn!(camera_id = %engine.camera_id, "control loop already running");
                    return;
                }
                *running = true;
            }
            tracing::info!(camera_id = %engine.camera_id, "starting adjustment loop");

            let mut ticker = interval(engine.cycle_interval);
            loop {
                ticker.tick().await;
                if !*engine.running.read().await {
                    break;
                }
                let report = engine.run_cycle().await;
                tracing::debug!(
                    camera_id = %engine.camera_id,
                    applied = report.adjustments_applied,
                    rejected = report.adjustments_rejected,
                    stalls = report.stalls,
                    "cycle complete"
                );
            }
            tracing::info!(camera_id = %engine.camera_id, "adjustment loop stopped");
        });
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// One full control cycle. Never fails; soft errors are logged and
    /// retried on the next cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        self.ensure_preset().await;
        self.refresh_parameters().await;

        let snapshot = match self.extractor.measure(&self.camera_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::debug!(camera_id = %self.camera_id, error = %e, "no feature snapshot");
                return CycleReport::default();
            }
        };

        let mut report = CycleReport {
            measured: true,
            ..CycleReport::default()
        };

        // Plan at most one adjustment per feature
        let observed = self.trusted_values().await;
        let mut planned: Vec<(String, crate::cost::Adjustment)> = Vec::new();
        {
            let mut gates = self.gates.lock().await;
            for feature in &self.features {
                let Some(measured) = snapshot.value(&feature.name) else {
                    continue;
                };
                let center_override = match &self.target_cache {
                    Some(cache) => cache.fresh_target(&feature.name).await,
                    None => None,
                };
                let Some(gate) = gates.get_mut(&feature.name) else {
                    continue;
                };
                let before = gate.state();
                let decision = gate.evaluate(measured, center_override);
                if decision.state != before {
                    tracing::info!(
                        camera_id = %self.camera_id,
                        feature = %feature.name,
                        measured,
                        from = ?before,
                        to = ?decision.state,
                        "gate transition"
                    );
                }
                if !decision.needs_adjustment {
                    continue;
                }
                let Some(direction) = decision.direction else {
                    continue;
                };
                let Some(candidates) = self.rules.get(&feature.name) else {
                    continue;
                };
                match self.cost_model.find_best_adjustment(
                    candidates,
                    &observed,
                    direction,
                    decision.error_magnitude,
                ) {
                    Ok(adjustment) => {
                        tracing::info!(
                            camera_id = %self.camera_id,
                            feature = %feature.name,
                            parameter = %adjustment.parameter_name,
                            from = adjustment.current_value,
                            to = adjustment.target_value,
                            cost = adjustment.cost,
                            "adjustment selected"
                        );
                        planned.push((feature.name.clone(), adjustment));
                    }
                    Err(Error::NoSuitableParameter(reason)) => {
                        report.stalls += 1;
                        tracing::warn!(
                            camera_id = %self.camera_id,
                            feature = %feature.name,
                            reason = %reason,
                            "adjustment stalled"
                        );
                    }
                    Err(e) => {
                        tracing::error!(camera_id = %self.camera_id, error = %e, "selection failed");
                    }
                }
            }
        }

        // Submit and fold the outcomes back into parameter trust
        let ops: Vec<Operation> = planned
            .iter()
            .map(|(_, adj)| Operation::Set {
                parameter: adj.parameter_name.clone(),
                value: adj.target_value,
            })
            .collect();
        let results = self.controller.execute_batch(ops).await;

        let mut tracked = self.tracked.write().await;
        for result in results {
            let Some((feature, adjustment)) = planned
                .iter()
                .find(|(_, adj)| adj.parameter_name == result.parameter_name)
            else {
                continue;
            };
            let entry = tracked.entry(result.parameter_name.clone()).or_default();
            match result.outcome {
                CommandOutcome::Ok => {
                    entry.value = result.achieved_value;
                    entry.trusted = true;
                    report.adjustments_applied += 1;
                    self.record_adjustment(feature, adjustment).await;
                }
                CommandOutcome::Rejected => {
                    entry.excluded = true;
                    report.adjustments_rejected += 1;
                    tracing::warn!(
                        camera_id = %self.camera_id,
                        parameter = %result.parameter_name,
                        "set rejected, parameter excluded until next successful read"
                    );
                }
                CommandOutcome::Timeout | CommandOutcome::Error => {
                    // The camera may or may not have applied the value
                    entry.trusted = false;
                    tracing::warn!(
                        camera_id = %self.camera_id,
                        parameter = %result.parameter_name,
                        outcome = ?result.outcome,
                        "set unconfirmed, value stale until next successful read"
                    );
                }
            }
        }
        drop(tracked);

        self.publish_targets().await;
        report
    }

    async fn ensure_preset(&self) {
        if self.preset_applied.load(Ordering::SeqCst) {
            return;
        }
        match apply_initial_preset(&self.camera_id, self.controller.protocol(), &self.initial_preset)
            .await
        {
            Ok(()) => self.preset_applied.store(true, Ordering::SeqCst),
            Err(e) => {
                tracing::warn!(
                    camera_id = %self.camera_id,
                    error = %e,
                    "initial preset failed, will retry next cycle"
                );
            }
        }
    }

    /// GET every managed parameter. A successful read restores trust
    /// and clears a rejection exclusion.
    async fn refresh_parameters(&self) {
        let ops: Vec<Operation> = self
            .parameters
            .iter()
            .map(|p| Operation::Get {
                parameter: p.clone(),
            })
            .collect();
        let results = self.controller.execute_batch(ops).await;

        let mut tracked = self.tracked.write().await;
        for result in results {
            let entry = tracked.entry(result.parameter_name.clone()).or_default();
            if result.outcome.is_ok() {
                entry.value = result.achieved_value;
                entry.trusted = true;
                entry.excluded = false;
            } else {
                entry.trusted = false;
            }
        }
    }

    /// Parameters usable as adjustment candidates right now
    async fn trusted_values(&self) -> HashMap<String, i64> {
        self.tracked
            .read()
            .await
            .iter()
            .filter(|(_, t)| t.trusted && !t.excluded)
            .filter_map(|(name, t)| t.value.map(|v| (name.clone(), v)))
            .collect()
    }

    async fn record_adjustment(&self, feature: &str, adjustment: &crate::cost::Adjustment) {
        let mut history = self.history.write().await;
        history.push_back(AdjustmentRecord {
            feature: feature.to_string(),
            parameter: adjustment.parameter_name.clone(),
            old_value: adjustment.current_value,
            new_value: adjustment.target_value,
            cost: adjustment.cost,
            timestamp: Utc::now(),
        });
        while history.len() > HISTORY_LIMIT {
            history.pop_front();
        }
    }

    /// Master publishes each feature's reference center after the cycle
    async fn publish_targets(&self) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let gates = self.gates.lock().await;
        for feature in &self.features {
            let Some(gate) = gates.get(&feature.name) else {
                continue;
            };
            if let Err(e) = publisher
                .publish_target(&feature.name, gate.band().center)
                .await
            {
                tracing::warn!(
                    camera_id = %self.camera_id,
                    feature = %feature.name,
                    error = %e,
                    "target publish failed"
                );
            }
        }
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        let gate_states = self
            .gates
            .lock()
            .await
            .iter()
            .map(|(name, gate)| (name.clone(), gate.state()))
            .collect();
        let recent_adjustments = self
            .history
            .read()
            .await
            .iter()
            .rev()
            .take(20)
            .cloned()
            .collect();
        EngineSnapshot {
            gate_states,
            recent_adjustments,
        }
    }
}
