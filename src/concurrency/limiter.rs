//! Token bucket rate limiter
//!
//! Caps the aggregate request rate against one camera. `acquire` blocks
//! until a token is available, it never drops work.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
    /// Millis since `started` of the last blocked acquire, 0 = never
    last_throttled_ms: AtomicU64,
    started: Instant,
}

impl TokenBucket {
    /// Bucket refilling at `max_requests_per_second`, holding at most
    /// one token. Without the burst allowance, no sliding one-second
    /// window ever grants more than `max_requests_per_second` tokens.
    pub fn new(max_requests_per_second: u32) -> Self {
        Self {
            capacity: 1.0,
            refill_per_sec: max_requests_per_second as f64,
            state: Mutex::new(BucketState {
                tokens: 1.0,
                last_refill: Instant::now(),
            }),
            last_throttled_ms: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Take one token, sleeping until the refill makes one available
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64(
                        (1.0 - state.tokens) / self.refill_per_sec,
                    ))
                }
            };
            match wait {
                None => return,
                Some(delay) => {
                    self.last_throttled_ms
                        .store(self.started.elapsed().as_millis().max(1) as u64, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// True if an acquire blocked within the given window
    pub fn recently_throttled(&self, window: Duration) -> bool {
        let last = self.last_throttled_ms.load(Ordering::Relaxed);
        if last == 0 {
            return false;
        }
        let now = self.started.elapsed().as_millis() as u64;
        now.saturating_sub(last) <= window.as_millis() as u64
    }
}
