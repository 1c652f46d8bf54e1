// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token bucket throttling outbound authority requests.
//!
//! Callers queue in arrival order. A caller whose wait would exceed the
//! configured maximum fails at once instead of sleeping, and a caller that is
//! cancelled while waiting takes no token.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::AttestationError;

/// Authority requests allowed per minute.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 50;

/// Requests allowed back to back before throttling starts.
pub const DEFAULT_BURST: u32 = 5;

/// Longest a request waits for a token.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);

struct Bucket {
    tokens: f64,
    last: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, per_sec: f64, burst: f64) {
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * per_sec).min(burst);
        self.last = now;
    }
}

pub struct RequestLimiter {
    bucket: Mutex<Bucket>,
    per_sec: f64,
    burst: f64,
    max_wait: Duration,
}

impl RequestLimiter {
    /// `per_minute` and `burst` are clamped to at least one.
    pub fn new(per_minute: u32, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
            per_sec: f64::from(per_minute.max(1)) / 60.0,
            burst,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Wait for a token.
    ///
    /// Fails with `AttestationAuthorityFailure` when the token cannot be had
    /// within the maximum wait.
    pub async fn acquire(&self) -> Result<(), AttestationError> {
        let started = Instant::now();
        let mut bucket = tokio::time::timeout(self.max_wait, self.bucket.lock())
            .await
            .map_err(|_| self.exhausted(self.max_wait))?;

        bucket.refill(Instant::now(), self.per_sec, self.burst);
        if bucket.tokens < 1.0 {
            let wait = Duration::from_secs_f64((1.0 - bucket.tokens) / self.per_sec);
            if started.elapsed() + wait > self.max_wait {
                return Err(self.exhausted(wait));
            }
            tokio::time::sleep(wait).await;
            bucket.refill(Instant::now(), self.per_sec, self.burst);
        }
        bucket.tokens -= 1.0;
        Ok(())
    }

    fn exhausted(&self, wait: Duration) -> AttestationError {
        AttestationError::authority(format!(
            "request rate limit exceeded: next slot in {wait:?}, max wait {:?}",
            self.max_wait
        ))
    }
}

impl Default for RequestLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_MINUTE, DEFAULT_BURST)
    }
}
