//! ConcurrencyController - Adaptive Operation Scheduling
//!
//! ## Responsibilities
//!
//! - Dispatch camera operations up to an adaptive concurrency limit
//! - Serialize operations touching the same parameter
//! - Pace dispatches so cameras are never burst-flooded
//! - Throttle aggregate request rate with a token bucket
//!
//! ## Design
//!
//! - Failures shrink the limit toward sequential, sustained success
//!   climbs it back one step at a time after a cooldown
//! - The limit is re-read at every dispatch, mid-batch changes apply
//!   to the next spawn, in-flight work is never cancelled

mod limiter;
mod types;

pub use limiter::TokenBucket;
pub use types::*;

use crate::config_store::ConcurrencyConfig;
use crate::protocol::{CameraProtocol, CommandOutcome, CommandResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Window in which a blocked token acquire counts as "rate limiting active"
const THROTTLE_REPORT_WINDOW: Duration = Duration::from_secs(5);

/// ConcurrencyController instance, one per camera
pub struct ConcurrencyController {
    camera_id: String,
    protocol: Arc<dyn CameraProtocol>,
    config: ConcurrencyConfig,
    /// Commands per dispatch group, protocol-dependent
    batch_size: usize,
    current_limit: AtomicUsize,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    /// Consecutive successes since the last failure
    success_run: AtomicU32,
    /// Consecutive timeouts or transport faults, any contact resets it
    failure_run: AtomicU32,
    last_limit_change: Mutex<Instant>,
    bucket: TokenBucket,
}

impl ConcurrencyController {
    pub fn new(
        camera_id: impl Into<String>,
        protocol: Arc<dyn CameraProtocol>,
        config: ConcurrencyConfig,
    ) -> Self {
        let limit = config.max_concurrent_operations.max(1);
        let bucket = TokenBucket::new(config.rate_limit.max_requests_per_second);
        Self {
            camera_id: camera_id.into(),
            protocol,
            config,
            batch_size: usize::MAX,
            current_limit: AtomicUsize::new(limit),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            success_run: AtomicU32::new(0),
            failure_run: AtomicU32::new(0),
            last_limit_change: Mutex::new(Instant::now()),
            bucket,
        }
    }

    /// Cap dispatch groups, used by the VISCA variant
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn current_limit(&self) -> usize {
        self.current_limit.load(Ordering::SeqCst)
    }

    pub fn protocol(&self) -> &Arc<dyn CameraProtocol> {
        &self.protocol
    }

    /// Execute a batch of operations and return their results in
    /// completion order. Operations on the same parameter never run
    /// concurrently and keep their submission order.
    pub async fn execute_batch(&self, ops: Vec<Operation>) -> Vec<CommandResult> {
        if ops.is_empty() {
            return Vec::new();
        }
        let sequential = !self.config.enabled || self.current_limit() <= 1;
        let mut results = Vec::with_capacity(ops.len());
        if sequential {
            self.run_sequential(ops, &mut results).await;
        } else {
            for wave in partition_waves(ops) {
                // Mid-batch limit drops to 1 switch remaining waves over
                if self.current_limit() <= 1 {
                    self.run_sequential(wave, &mut results).await;
                } else {
                    self.run_wave(wave, &mut results).await;
                }
            }
        }
        results
    }

    async fn run_sequential(&self, ops: Vec<Operation>, results: &mut Vec<CommandResult>) {
        let spacing = Duration::from_millis(self.config.pacing.sequential_ms);
        let mut first = true;
        for op in ops {
            if !first {
                tokio::time::sleep(spacing).await;
            }
            first = false;
            self.throttle(&op).await;
            let result = run_op(
                &self.protocol,
                op,
                Duration::from_millis(self.config.pacing.retry_delay_ms),
            )
            .await;
            self.record_outcome(result.outcome);
            results.push(result);
        }
    }

    /// Dispatch one wave (unique parameters) through a sliding window
    /// bounded by the live concurrency limit.
    async fn run_wave(&self, wave: Vec<Operation>, results: &mut Vec<CommandResult>) {
        let spacing = Duration::from_millis(self.config.pacing.concurrent_ms);
        let retry_delay = Duration::from_millis(self.config.pacing.retry_delay_ms);

        for chunk in wave.chunks(self.batch_size.min(wave.len().max(1))) {
            let mut pending: VecDeque<Operation> = chunk.to_vec().into();
            let mut join_set: JoinSet<CommandResult> = JoinSet::new();

            while !pending.is_empty() || !join_set.is_empty() {
                while join_set.len() < self.current_limit().max(1) {
                    let Some(op) = pending.pop_front() else { break };
                    self.throttle(&op).await;
                    let protocol = Arc::clone(&self.protocol);
                    join_set.spawn(async move { run_op(&protocol, op, retry_delay).await });
                    tokio::time::sleep(spacing).await;
                }
                match join_set.join_next().await {
                    Some(Ok(result)) => {
                        self.record_outcome(result.outcome);
                        results.push(result);
                    }
                    Some(Err(e)) => {
                        tracing::error!(camera_id = %self.camera_id, error = %e, "operation task panicked");
                        self.record_outcome(CommandOutcome::Error);
                    }
                    None => {}
                }
            }
        }
    }

    async fn throttle(&self, op: &Operation) {
        let gated = if op.is_set() {
            self.config.rate_limit.set_operations
        } else {
            self.config.rate_limit.get_operations
        };
        if gated {
            self.bucket.acquire().await;
        }
    }

    /// True until `unhealthy_after` consecutive timeouts or transport
    /// faults accumulate. A rejection still proves the camera answers,
    /// so it resets the run like a success does.
    pub fn is_healthy(&self) -> bool {
        self.failure_run.load(Ordering::SeqCst) < self.config.unhealthy_after.max(1)
    }

    fn track_health(&self, outcome: CommandOutcome) {
        match outcome {
            CommandOutcome::Timeout | CommandOutcome::Error => {
                let run = self.failure_run.fetch_add(1, Ordering::SeqCst) + 1;
                if run == self.config.unhealthy_after.max(1) {
                    tracing::warn!(
                        camera_id = %self.camera_id,
                        consecutive_failures = run,
                        "camera unreachable, marking unhealthy"
                    );
                }
            }
            CommandOutcome::Ok | CommandOutcome::Rejected => {
                let prev = self.failure_run.swap(0, Ordering::SeqCst);
                if prev >= self.config.unhealthy_after.max(1) {
                    tracing::info!(camera_id = %self.camera_id, "camera reachable again, marking healthy");
                }
            }
        }
    }

    /// Adapt the limit from one operation outcome
    fn record_outcome(&self, outcome: CommandOutcome) {
        self.track_health(outcome);
        if outcome.is_ok() {
            self.success_count.fetch_add(1, Ordering::SeqCst);
            let run = self.success_run.fetch_add(1, Ordering::SeqCst) + 1;
            if run >= self.config.recovery.success_run {
                self.try_raise_limit();
            }
        } else {
            self.failure_count.fetch_add(1, Ordering::SeqCst);
            self.success_run.store(0, Ordering::SeqCst);
            if self.config.fallback_to_sequential {
                self.lower_limit();
            }
        }
    }

    fn lower_limit(&self) {
        let prev = self
            .current_limit
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |limit| {
                (limit > 1).then(|| limit - 1)
            });
        if let Ok(prev) = prev {
            if let Ok(mut last) = self.last_limit_change.lock() {
                *last = Instant::now();
            }
            tracing::warn!(
                camera_id = %self.camera_id,
                from = prev,
                to = prev - 1,
                "operation failed, lowering concurrency limit"
            );
        }
    }

    fn try_raise_limit(&self) {
        let cooldown = Duration::from_millis(self.config.recovery.cooldown_ms);
        {
            let Ok(last) = self.last_limit_change.lock() else { return };
            if last.elapsed() < cooldown {
                return;
            }
        }
        let max = self.config.max_concurrent_operations.max(1);
        let prev = self
            .current_limit
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |limit| {
                (limit < max).then(|| limit + 1)
            });
        if let Ok(prev) = prev {
            self.success_run.store(0, Ordering::SeqCst);
            if let Ok(mut last) = self.last_limit_change.lock() {
                *last = Instant::now();
            }
            tracing::info!(
                camera_id = %self.camera_id,
                from = prev,
                to = prev + 1,
                "sustained success, raising concurrency limit"
            );
        }
    }

    pub fn stats(&self) -> ConcurrencyStats {
        let success = self.success_count.load(Ordering::SeqCst);
        let failure = self.failure_count.load(Ordering::SeqCst);
        let total = success + failure;
        let current_limit = self.current_limit();
        ConcurrencyStats {
            enabled: self.config.enabled,
            mode: if self.config.enabled && current_limit > 1 {
                SchedulingMode::Concurrent
            } else {
                SchedulingMode::Sequential
            },
            current_limit,
            max_limit: self.config.max_concurrent_operations,
            success_count: success,
            failure_count: failure,
            success_rate: if total == 0 {
                1.0
            } else {
                success as f64 / total as f64
            },
            rate_limiting_active: self.bucket.recently_throttled(THROTTLE_REPORT_WINDOW),
            healthy: self.is_healthy(),
            consecutive_failures: self.failure_run.load(Ordering::SeqCst),
        }
    }
}

/// Split operations into waves with unique parameter names so the wave
/// can run concurrently while same-parameter operations stay ordered
/// across waves.
fn partition_waves(ops: Vec<Operation>) -> Vec<Vec<Operation>> {
    let mut waves: Vec<Vec<Operation>> = Vec::new();
    'next: for op in ops {
        for wave in waves.iter_mut() {
            if !wave.iter().any(|held| held.parameter() == op.parameter()) {
                wave.push(op);
                continue 'next;
            }
        }
        waves.push(vec![op]);
    }
    waves
}

/// Run one operation with a single follow-up attempt on timeout or
/// transport error. Protocol rejections are final.
async fn run_op(
    protocol: &Arc<dyn CameraProtocol>,
    op: Operation,
    retry_delay: Duration,
) -> CommandResult {
    let first = execute(protocol, &op).await;
    match first.outcome {
        CommandOutcome::Timeout | CommandOutcome::Error => {
            tokio::time::sleep(retry_delay).await;
            execute(protocol, &op).await
        }
        _ => first,
    }
}

async fn execute(protocol: &Arc<dyn CameraProtocol>, op: &Operation) -> CommandResult {
    match op {
        Operation::Get { parameter } => protocol.get_parameter(parameter).await,
        Operation::Set { parameter, value } => protocol.set_parameter(parameter, *value).await,
    }
}
