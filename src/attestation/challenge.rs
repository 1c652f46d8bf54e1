// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Challenge Registry
//!
//! Single-use freshness nonces with expiry.
//!
//! ## Sweep lifecycle
//!
//! Expired-but-unconsumed entries are removed by a background task that only
//! exists while the registry holds entries:
//!
//! 1. The first insert into a registry without a sweeper spawns one and keeps
//!    its `CancellationToken`.
//! 2. Any operation that leaves the map empty cancels the token.
//! 3. A sweep pass that empties the map clears the token and exits.
//!
//! All three happen under the registry lock, so at most one sweeper is live.
//! The task holds a `Weak` reference and exits once the registry is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::AttestationError;

/// Default challenge lifetime.
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(300);

/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Random bytes per challenge (256 bits).
const CHALLENGE_BYTES: usize = 32;

/// A freshly issued challenge.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Challenge {
    /// Hex-encoded random token.
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

struct RegistryState {
    entries: HashMap<String, Instant>,
    sweeper: Option<CancellationToken>,
}

impl RegistryState {
    fn stop_sweeper_if_empty(&mut self) {
        if self.entries.is_empty() {
            if let Some(token) = self.sweeper.take() {
                token.cancel();
                debug!("Challenge sweep stopped: registry empty");
            }
        }
    }
}

/// Thread-safe store of outstanding challenges.
pub struct ChallengeRegistry {
    shared: Arc<Mutex<RegistryState>>,
    ttl: Duration,
    sweep_interval: Duration,
    rng: SystemRandom,
}

impl ChallengeRegistry {
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Mutex::new(RegistryState {
                entries: HashMap::new(),
                sweeper: None,
            })),
            ttl,
            sweep_interval,
            rng: SystemRandom::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a new challenge valid for the configured TTL.
    ///
    /// Starts the expiry sweep if none is running and a tokio runtime is
    /// available. Without a runtime, expired entries are still purged lazily.
    pub fn issue(&self) -> Result<Challenge, AttestationError> {
        let mut raw = [0u8; CHALLENGE_BYTES];
        self.rng
            .fill(&mut raw)
            .map_err(|_| AttestationError::EntropyUnavailable)?;
        let value = hex::encode(raw);

        let mut state = lock(&self.shared);
        state.entries.insert(value.clone(), Instant::now() + self.ttl);
        if state.sweeper.is_none() {
            state.sweeper = self.spawn_sweeper();
        }
        drop(state);

        Ok(Challenge {
            value,
            expires_at: saturating_add(Utc::now(), self.ttl),
        })
    }

    /// Whether `value` is registered and unexpired. Does not consume it.
    ///
    /// An expired entry found here is purged.
    pub fn is_live(&self, value: &str) -> bool {
        let mut state = lock(&self.shared);
        match state.entries.get(value) {
            Some(expires_at) if *expires_at > Instant::now() => true,
            Some(_) => {
                state.entries.remove(value);
                state.stop_sweeper_if_empty();
                false
            }
            None => false,
        }
    }

    /// Atomically check and remove `value`.
    ///
    /// Returns `true` only if the challenge existed and had not expired. The
    /// entry is removed either way, so a value can succeed here at most once.
    pub fn consume(&self, value: &str) -> bool {
        let mut state = lock(&self.shared);
        let live = match state.entries.remove(value) {
            Some(expires_at) => expires_at > Instant::now(),
            None => false,
        };
        state.stop_sweeper_if_empty();
        live
    }

    /// Number of outstanding (possibly expired, not yet swept) challenges.
    pub fn len(&self) -> usize {
        lock(&self.shared).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a sweep task currently owns this registry.
    pub fn is_sweeping(&self) -> bool {
        lock(&self.shared).sweeper.is_some()
    }

    fn spawn_sweeper(&self) -> Option<CancellationToken> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let token = CancellationToken::new();
        handle.spawn(sweep(
            Arc::downgrade(&self.shared),
            self.sweep_interval,
            token.clone(),
        ));
        debug!(
            interval_secs = self.sweep_interval.as_secs(),
            "Challenge sweep started"
        );
        Some(token)
    }
}

impl Default for ChallengeRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CHALLENGE_TTL, DEFAULT_SWEEP_INTERVAL)
    }
}

impl Drop for ChallengeRegistry {
    fn drop(&mut self) {
        if let Some(token) = lock(&self.shared).sweeper.take() {
            token.cancel();
        }
    }
}

async fn sweep(shared: Weak<Mutex<RegistryState>>, interval: Duration, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(shared) = shared.upgrade() else {
            return;
        };
        let mut state = lock(&shared);
        // Cancelled while waiting for the lock; a newer sweeper may own the map.
        if token.is_cancelled() {
            return;
        }

        let now = Instant::now();
        let before = state.entries.len();
        state.entries.retain(|_, expires_at| *expires_at > now);
        let removed = before - state.entries.len();
        if removed > 0 {
            debug!(removed, "Swept expired challenges");
        }

        if state.entries.is_empty() {
            state.sweeper = None;
            debug!("Challenge sweep stopped: registry empty");
            return;
        }
    }
}

// Map operations cannot leave the state half-updated, so a poisoned lock is
// still safe to use.
fn lock(shared: &Mutex<RegistryState>) -> MutexGuard<'_, RegistryState> {
    shared
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// `base + after`, saturating at the maximum timestamp.
pub(crate) fn saturating_add(base: DateTime<Utc>, after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(after)
        .ok()
        .and_then(|delta| base.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
