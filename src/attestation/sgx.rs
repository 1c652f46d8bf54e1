// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # SGX Verifier
//!
//! End-to-end verification of SGX quotes:
//!
//! 1. Decode the quote. A malformed quote never touches the challenge.
//! 2. Check the challenge is live (without consuming it).
//! 3. Debug flag, optional report-data binding, optional expected identity.
//! 4. Trust: the service allow-list first, then the attestation authority.
//! 5. Consume the challenge on every definitive outcome, success or failure.
//!
//! No lock is held across the authority round trip. A verification that is
//! cancelled before step 5 leaves the challenge usable for a retry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::warn;

use super::authority::{AttestationAuthority, AuthorityStatus, AuthorityVerdict};
use super::challenge::{
    saturating_add, Challenge, ChallengeRegistry, DEFAULT_CHALLENGE_TTL, DEFAULT_SWEEP_INTERVAL,
};
use super::evidence::{
    Evidence, SecurityLevel, VerificationOptions, VerificationResult, AUTHORITY_STATUS, CPUSVN,
    ISVPRODID, ISVSVN, MRENCLAVE, MRSIGNER,
};
use super::policy::MeasurementPolicy;
use super::quote::Quote;
use super::{AttestationError, AttestationVerifier, ProviderType};

/// Default lifetime of a [`VerificationResult`].
pub const DEFAULT_RESULT_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

/// Verifier behaviour knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierSettings {
    pub challenge_ttl: Duration,
    pub sweep_interval: Duration,
    pub result_validity: Duration,
    /// Accept debug enclaves regardless of per-call options.
    pub allow_debug: bool,
    /// Require `reportData[0..32] == SHA-256(challenge)`.
    pub bind_report_data: bool,
    /// Reject `Degraded` authority verdicts instead of accepting them with a
    /// warning.
    pub strict_verdicts: bool,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            challenge_ttl: DEFAULT_CHALLENGE_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            result_validity: DEFAULT_RESULT_VALIDITY,
            allow_debug: false,
            bind_report_data: false,
            strict_verdicts: false,
        }
    }
}

/// Attestation verifier for Intel SGX quotes.
pub struct SgxVerifier {
    challenges: ChallengeRegistry,
    policy: MeasurementPolicy,
    authority: Option<Arc<dyn AttestationAuthority>>,
    settings: VerifierSettings,
}

impl SgxVerifier {
    pub fn new(settings: VerifierSettings, policy: MeasurementPolicy) -> Self {
        Self {
            challenges: ChallengeRegistry::new(settings.challenge_ttl, settings.sweep_interval),
            policy,
            authority: None,
            settings,
        }
    }

    /// Consult `authority` for quotes that are not allow-listed.
    pub fn with_authority(mut self, authority: Arc<dyn AttestationAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn policy(&self) -> &MeasurementPolicy {
        &self.policy
    }

    pub fn challenges(&self) -> &ChallengeRegistry {
        &self.challenges
    }

    pub fn settings(&self) -> &VerifierSettings {
        &self.settings
    }

    pub fn has_authority(&self) -> bool {
        self.authority.is_some()
    }

    /// Steps 3 and 4. Returns the authority verdict when one was used.
    async fn evaluate(
        &self,
        quote: &Quote,
        evidence: &Evidence,
        options: &VerificationOptions,
    ) -> Result<Option<AuthorityVerdict>, AttestationError> {
        let code_identity = quote.code_identity();
        let signer_identity = quote.signer_identity();

        if quote.is_debug() && !(options.allow_debug || self.settings.allow_debug) {
            return Err(AttestationError::DebugNotAllowed { code_identity });
        }

        if self.settings.bind_report_data {
            let expected = Sha256::digest(evidence.challenge.as_bytes());
            if quote.report_data[..32] != expected[..] {
                return Err(AttestationError::ReportDataMismatch);
            }
        }

        if options.require_identity {
            let expected = options.expected_identity.as_deref().unwrap_or_default();
            if !code_identity.eq_ignore_ascii_case(expected)
                && !signer_identity.eq_ignore_ascii_case(expected)
            {
                return Err(AttestationError::IdentityMismatch {
                    expected: expected.to_string(),
                    code_identity,
                    signer_identity,
                });
            }
        }

        if let Some(service_id) = &options.service_id {
            if self.policy.is_allowed(service_id, &code_identity, &signer_identity) {
                return Ok(None);
            }
        }

        let Some(authority) = &self.authority else {
            return Err(AttestationError::UntrustedIdentity {
                service_id: options.service_id.clone(),
                code_identity,
                signer_identity,
            });
        };

        let verdict = authority.submit(&evidence.quote).await?;
        self.accept_verdict(&verdict, &code_identity, &signer_identity)?;
        Ok(Some(verdict))
    }

    fn accept_verdict(
        &self,
        verdict: &AuthorityVerdict,
        code_identity: &str,
        signer_identity: &str,
    ) -> Result<(), AttestationError> {
        match verdict.status {
            AuthorityStatus::Accepted => {}
            AuthorityStatus::Degraded if self.settings.strict_verdicts => {
                return Err(AttestationError::authority(format!(
                    "platform status {} not accepted in strict mode",
                    verdict.raw_status
                )));
            }
            AuthorityStatus::Degraded => {}
            AuthorityStatus::Rejected => {
                return Err(AttestationError::authority(format!(
                    "quote rejected with status {}",
                    verdict.raw_status
                )));
            }
        }

        let extracted = |key: &str| verdict.extracted_measurements.get(key).map(String::as_str);
        let matches = |key: &str, actual: &str| {
            extracted(key).is_some_and(|value| value.eq_ignore_ascii_case(actual))
        };
        if !matches(MRENCLAVE, code_identity) || !matches(MRSIGNER, signer_identity) {
            return Err(AttestationError::authority(
                "authority report does not describe the submitted quote",
            ));
        }

        if verdict.status == AuthorityStatus::Degraded {
            warn!(
                status = %verdict.raw_status,
                mrenclave = %code_identity,
                "Accepting degraded attestation verdict"
            );
        }
        Ok(())
    }

    fn build_result(&self, quote: &Quote, verdict: Option<AuthorityVerdict>) -> VerificationResult {
        let mut measurements = BTreeMap::from([
            (MRENCLAVE.to_string(), quote.code_identity()),
            (MRSIGNER.to_string(), quote.signer_identity()),
            (ISVPRODID.to_string(), quote.isv_prod_id.to_string()),
            (ISVSVN.to_string(), quote.isv_svn.to_string()),
            (CPUSVN.to_string(), hex::encode(quote.cpu_svn)),
        ]);
        if let Some(verdict) = verdict {
            measurements.insert(AUTHORITY_STATUS.to_string(), verdict.raw_status);
        }

        let issued_at = Utc::now();
        VerificationResult {
            verified: true,
            provider: ProviderType::Sgx,
            identity: quote.code_identity(),
            security_level: SecurityLevel::for_quote(quote),
            measurements,
            issued_at,
            expires_at: saturating_add(issued_at, self.settings.result_validity),
        }
    }
}

#[async_trait]
impl AttestationVerifier for SgxVerifier {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Sgx
    }

    fn issue_challenge(&self) -> Result<Challenge, AttestationError> {
        self.challenges.issue()
    }

    async fn verify(
        &self,
        evidence: &Evidence,
        options: &VerificationOptions,
    ) -> Result<VerificationResult, AttestationError> {
        let quote = Quote::decode(&evidence.quote)?;

        if !self.challenges.is_live(&evidence.challenge) {
            return Err(AttestationError::UnknownOrExpiredChallenge);
        }

        let outcome = self.evaluate(&quote, evidence, options).await;

        let consumed = self.challenges.consume(&evidence.challenge);
        let verdict = outcome?;
        if !consumed {
            return Err(AttestationError::UnknownOrExpiredChallenge);
        }

        Ok(self.build_result(&quote, verdict))
    }

    fn is_measurement_allowed(
        &self,
        service_id: &str,
        code_identity: &str,
        signer_identity: &str,
    ) -> bool {
        self.policy.is_allowed(service_id, code_identity, signer_identity)
    }
}
