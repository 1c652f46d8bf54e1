// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-service allow-lists of acceptable enclave builds.
//!
//! Several measurements may be trusted for one service at the same time so
//! that old and new builds overlap during a rolling upgrade. A measurement
//! stays trusted until it is explicitly revoked.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Identity of one acceptable enclave build.
///
/// Both identities are stored lowercase; comparisons are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Measurement {
    /// MRENCLAVE hex.
    pub code_identity: String,
    /// MRSIGNER hex.
    pub signer_identity: String,
}

impl Measurement {
    pub fn new(code_identity: impl AsRef<str>, signer_identity: impl AsRef<str>) -> Self {
        Self {
            code_identity: code_identity.as_ref().to_ascii_lowercase(),
            signer_identity: signer_identity.as_ref().to_ascii_lowercase(),
        }
    }

    fn matches(&self, code_identity: &str, signer_identity: &str) -> bool {
        self.code_identity.eq_ignore_ascii_case(code_identity)
            && self.signer_identity.eq_ignore_ascii_case(signer_identity)
    }
}

/// Thread-safe measurement allow-list keyed by service id.
#[derive(Debug, Default)]
pub struct MeasurementPolicy {
    allowed: RwLock<HashMap<String, Vec<Measurement>>>,
}

impl MeasurementPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a policy from `(service_id, measurement)` pairs.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Measurement)>,
    {
        let policy = Self::new();
        for (service_id, measurement) in entries {
            policy.allow(&service_id, measurement);
        }
        policy
    }

    /// Trust `measurement` for `service_id`. Adding a pair twice is a no-op.
    pub fn allow(&self, service_id: &str, measurement: Measurement) {
        let measurement =
            Measurement::new(&measurement.code_identity, &measurement.signer_identity);
        let mut allowed = self.allowed.write().unwrap_or_else(PoisonError::into_inner);
        let entries = allowed.entry(service_id.to_string()).or_default();
        if !entries.contains(&measurement) {
            entries.push(measurement);
        }
    }

    /// Stop trusting `measurement` for `service_id`.
    ///
    /// Returns `false` if the pair was not allowed.
    pub fn revoke(&self, service_id: &str, measurement: &Measurement) -> bool {
        let mut allowed = self.allowed.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = allowed.get_mut(service_id) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|m| !m.matches(&measurement.code_identity, &measurement.signer_identity));
        let removed = entries.len() != before;
        if entries.is_empty() {
            allowed.remove(service_id);
        }
        removed
    }

    pub fn is_allowed(&self, service_id: &str, code_identity: &str, signer_identity: &str) -> bool {
        let allowed = self.allowed.read().unwrap_or_else(PoisonError::into_inner);
        allowed
            .get(service_id)
            .is_some_and(|entries| {
                entries
                    .iter()
                    .any(|m| m.matches(code_identity, signer_identity))
            })
    }

    /// Whether any service trusts the pair.
    pub fn is_allowed_anywhere(&self, code_identity: &str, signer_identity: &str) -> bool {
        let allowed = self.allowed.read().unwrap_or_else(PoisonError::into_inner);
        allowed
            .values()
            .flatten()
            .any(|m| m.matches(code_identity, signer_identity))
    }

    /// Measurements currently trusted for `service_id`.
    pub fn measurements(&self, service_id: &str) -> Vec<Measurement> {
        let allowed = self.allowed.read().unwrap_or_else(PoisonError::into_inner);
        allowed.get(service_id).cloned().unwrap_or_default()
    }

    /// Number of services with at least one trusted measurement.
    pub fn service_count(&self) -> usize {
        self.allowed.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(n: u8) -> Measurement {
        Measurement::new(format!("{n:02x}").repeat(32), format!("{:02x}", n + 1).repeat(32))
    }

    #[test]
    fn allow_then_revoke() {
        let policy = MeasurementPolicy::new();
        let m = build(0xa0);

        assert!(!policy.is_allowed("oracle", &m.code_identity, &m.signer_identity));
        policy.allow("oracle", m.clone());
        assert!(policy.is_allowed("oracle", &m.code_identity, &m.signer_identity));

        assert!(policy.revoke("oracle", &m));
        assert!(!policy.is_allowed("oracle", &m.code_identity, &m.signer_identity));
        assert!(!policy.revoke("oracle", &m));
        assert_eq!(policy.service_count(), 0);
    }

    #[test]
    fn rolling_upgrade_keeps_both_builds() {
        let policy = MeasurementPolicy::new();
        let old = build(1);
        let new = build(2);
        policy.allow("functions", old.clone());
        policy.allow("functions", new.clone());

        assert!(policy.is_allowed("functions", &old.code_identity, &old.signer_identity));
        assert!(policy.is_allowed("functions", &new.code_identity, &new.signer_identity));

        policy.revoke("functions", &old);
        assert!(!policy.is_allowed("functions", &old.code_identity, &old.signer_identity));
        assert!(policy.is_allowed("functions", &new.code_identity, &new.signer_identity));
    }

    #[test]
    fn matching_ignores_hex_case() {
        let policy = MeasurementPolicy::new();
        policy.allow("gas", Measurement::new("ABCDEF", "012345"));

        assert!(policy.is_allowed("gas", "abcdef", "012345"));
        assert!(policy.is_allowed("gas", "AbCdEf", "012345"));
        assert!(policy.revoke("gas", &Measurement::new("abcdef", "012345")));
    }

    #[test]
    fn pairs_must_match_together() {
        let policy = MeasurementPolicy::new();
        let a = build(3);
        let b = build(7);
        policy.allow("gas", a.clone());

        assert!(!policy.is_allowed("gas", &a.code_identity, &b.signer_identity));
        assert!(!policy.is_allowed("gas", &b.code_identity, &a.signer_identity));
    }

    #[test]
    fn allow_lists_are_per_service() {
        let policy = MeasurementPolicy::from_entries([("oracle".to_string(), build(9))]);
        let m = build(9);

        assert!(policy.is_allowed("oracle", &m.code_identity, &m.signer_identity));
        assert!(!policy.is_allowed("gas", &m.code_identity, &m.signer_identity));
        assert!(policy.is_allowed_anywhere(&m.code_identity, &m.signer_identity));
    }

    #[test]
    fn duplicate_allow_is_idempotent() {
        let policy = MeasurementPolicy::new();
        policy.allow("gas", build(4));
        policy.allow("gas", build(4));
        assert_eq!(policy.measurements("gas").len(), 1);
    }
}
