// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Remote attestation.
//!
//! ## Flow
//!
//! 1. The caller asks a verifier for a [`Challenge`].
//! 2. The challenge travels to the enclave out of band and comes back bound
//!    into a quote, submitted as [`Evidence`].
//! 3. [`AttestationVerifier::verify`] checks freshness and policy, consumes the
//!    challenge and returns a time-bounded [`VerificationResult`].
//!
//! One verifier exists per hardware platform, selected by [`ProviderType`].
//!
//! ## Modules
//!
//! - `quote` - fixed-layout SGX quote codec
//! - `challenge` - single-use freshness nonces
//! - `policy` - per-service measurement allow-lists
//! - `trust_root` - pinned authority certificates
//! - `authority` - attestation authority client
//! - `rate_limit` - authority request throttling
//! - `sgx` - SGX verifier

pub mod authority;
pub mod challenge;
pub mod error;
pub mod evidence;
pub mod policy;
pub mod quote;
pub mod rate_limit;
pub mod sgx;
pub mod trust_root;
pub mod verdict_cache;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use authority::{
    AttestationAuthority, AuthorityStatus, AuthorityVerdict, RemoteAttestationClient,
};
pub use challenge::{Challenge, ChallengeRegistry};
pub use error::AttestationError;
pub use evidence::{Evidence, SecurityLevel, VerificationOptions, VerificationResult};
pub use policy::{Measurement, MeasurementPolicy};
pub use quote::Quote;
pub use rate_limit::RequestLimiter;
pub use sgx::{SgxVerifier, VerifierSettings};
pub use trust_root::TrustRoot;
pub use verdict_cache::VerdictCache;

/// Attestation hardware platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ProviderType {
    /// Intel SGX.
    Sgx,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Sgx => "sgx",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = AttestationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sgx" => Ok(ProviderType::Sgx),
            other => Err(AttestationError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Verification capability of one attestation platform.
#[async_trait]
pub trait AttestationVerifier: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Issue a fresh single-use challenge.
    fn issue_challenge(&self) -> Result<Challenge, AttestationError>;

    /// Verify `evidence` against its challenge and the verifier's policy.
    async fn verify(
        &self,
        evidence: &Evidence,
        options: &VerificationOptions,
    ) -> Result<VerificationResult, AttestationError>;

    /// Static allow-list lookup. Does not touch challenges.
    fn is_measurement_allowed(
        &self,
        service_id: &str,
        code_identity: &str,
        signer_identity: &str,
    ) -> bool;

    /// [`verify`](Self::verify) with a deadline.
    ///
    /// A verification cut short by the deadline leaves its challenge live.
    async fn verify_within(
        &self,
        evidence: &Evidence,
        options: &VerificationOptions,
        deadline: Duration,
    ) -> Result<VerificationResult, AttestationError> {
        tokio::time::timeout(deadline, self.verify(evidence, options))
            .await
            .map_err(|_| AttestationError::Timeout(deadline))?
    }
}

/// Registered verifiers, keyed by platform.
#[derive(Clone, Default)]
pub struct VerifierSet {
    verifiers: HashMap<ProviderType, Arc<dyn AttestationVerifier>>,
}

impl VerifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `verifier` under its own provider type, replacing any
    /// previous one.
    pub fn register(&mut self, verifier: Arc<dyn AttestationVerifier>) -> &mut Self {
        self.verifiers.insert(verifier.provider_type(), verifier);
        self
    }

    pub fn get(
        &self,
        provider: ProviderType,
    ) -> Result<Arc<dyn AttestationVerifier>, AttestationError> {
        self.verifiers
            .get(&provider)
            .cloned()
            .ok_or_else(|| AttestationError::UnsupportedProvider(provider.to_string()))
    }

    /// Look up a verifier by its string tag (e.g. `"sgx"`).
    pub fn get_by_tag(&self, tag: &str) -> Result<Arc<dyn AttestationVerifier>, AttestationError> {
        self.get(tag.parse()?)
    }

    pub fn providers(&self) -> Vec<ProviderType> {
        self.verifiers.keys().copied().collect()
    }
}

impl fmt::Debug for VerifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifierSet")
            .field("providers", &self.providers())
            .finish()
    }
}
