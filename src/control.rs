// Control plane: admission control
//
// Bounds the quote fan-out: a semaphore caps concurrent upstream calls and a
// sliding one-second window caps the call rate.
//
// Numan Thabit 2025 Nov

use crate::errors::AggrError;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};

#[derive(Clone)]
pub struct AdmissionControl {
    max_inflight: Arc<Semaphore>,
    // Simple rate limiter: allow up to rate_per_sec within a 1s sliding window
    inner: Arc<Mutex<RateLimiter>>,
}

struct RateLimiter {
    rate_per_sec: u32,
    timestamps: VecDeque<Instant>,
    window: Duration,
}

impl AdmissionControl {
    pub fn new(max_inflight: usize, rate_per_sec: Option<u32>) -> Self {
        let rl = RateLimiter {
            rate_per_sec: rate_per_sec.unwrap_or(200),
            timestamps: VecDeque::with_capacity(256),
            window: Duration::from_secs(1),
        };
        Self {
            max_inflight: Arc::new(Semaphore::new(max_inflight.max(1))),
            inner: Arc::new(Mutex::new(rl)),
        }
    }

    /// Acquire an admission permit respecting max inflight and rate limit.
    /// The permit is released when dropped, including when the owning
    /// future is cancelled.
    pub async fn acquire(&self) -> Result<AdmissionPermit, AggrError> {
        // Rate limit loop
        loop {
            let mut guard = self.inner.lock().await;
            let now = Instant::now();
            while let Some(front) = guard.timestamps.front() {
                if now.duration_since(*front) > guard.window {
                    guard.timestamps.pop_front();
                } else {
                    break;
                }
            }
            if (guard.timestamps.len() as u32) < guard.rate_per_sec {
                guard.timestamps.push_back(now);
                break;
            }
            drop(guard);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let permit = self
            .max_inflight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AggrError::Transport("admission control closed".into()))?;
        Ok(AdmissionPermit { _permit: permit })
    }

    pub fn available_permits(&self) -> usize {
        self.max_inflight.available_permits()
    }
}

pub struct AdmissionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
