// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache for attestation authority verdicts.
//!
//! Keyed by the SHA-256 of the submitted quote so repeated submissions of the
//! same quote skip the authority round trip. Rejected verdicts are never
//! stored.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use sha2::{Digest, Sha256};

use super::authority::{AuthorityStatus, AuthorityVerdict};

/// Default number of cached verdicts.
pub const DEFAULT_CAPACITY: usize = 256;

/// Default verdict lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

struct CacheEntry {
    verdict: AuthorityVerdict,
    inserted_at: Instant,
}

/// In-process verdict cache.
pub struct VerdictCache {
    cache: Mutex<LruCache<[u8; 32], CacheEntry>>,
    ttl: Duration,
}

impl VerdictCache {
    /// - `capacity`: max number of distinct quotes (at least 1).
    /// - `ttl`: lifetime of each entry.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    /// Cached verdict for `quote`, if present and not expired.
    pub fn get(&self, quote: &[u8]) -> Option<AuthorityVerdict> {
        let key = cache_key(quote);
        let mut cache = self.lock();
        if let Some(entry) = cache.get(&key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.verdict.clone());
            }
            cache.pop(&key);
        }
        None
    }

    /// Store `verdict` for `quote` unless it is a rejection.
    pub fn put(&self, quote: &[u8], verdict: &AuthorityVerdict) {
        if verdict.status == AuthorityStatus::Rejected {
            return;
        }
        self.lock().put(
            cache_key(quote),
            CacheEntry {
                verdict: verdict.clone(),
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Every entry is written whole, so a poisoned cache is still consistent.
    fn lock(&self) -> MutexGuard<'_, LruCache<[u8; 32], CacheEntry>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for VerdictCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

fn cache_key(quote: &[u8]) -> [u8; 32] {
    Sha256::digest(quote).into()
}
