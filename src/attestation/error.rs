// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Attestation errors.
//!
//! Every variant is terminal for the call that produced it. Nothing in the
//! attestation path retries or logs on its own; callers receive enough
//! structured detail here to write an audit record.

use std::time::Duration;

/// Errors produced while issuing challenges or verifying evidence.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttestationError {
    #[error("Malformed evidence: {0}")]
    MalformedEvidence(String),

    #[error("Unknown or expired challenge")]
    UnknownOrExpiredChallenge,

    #[error("System randomness unavailable")]
    EntropyUnavailable,

    #[error("Debug enclave not allowed (MRENCLAVE={code_identity})")]
    DebugNotAllowed { code_identity: String },

    #[error(
        "Identity mismatch: expected {expected}, got MRENCLAVE={code_identity}, MRSIGNER={signer_identity}"
    )]
    IdentityMismatch {
        expected: String,
        code_identity: String,
        signer_identity: String,
    },

    #[error(
        "Enclave identity not trusted for service {service_id:?}: MRENCLAVE={code_identity}, MRSIGNER={signer_identity}"
    )]
    UntrustedIdentity {
        service_id: Option<String>,
        code_identity: String,
        signer_identity: String,
    },

    #[error("Report data is not bound to the challenge")]
    ReportDataMismatch,

    #[error("Attestation authority failure: {0}")]
    AttestationAuthorityFailure(String),

    #[error("No verifier registered for provider {0}")]
    UnsupportedProvider(String),

    #[error("Verification timed out after {0:?}")]
    Timeout(Duration),
}

impl AttestationError {
    /// Stable code for audit records.
    pub fn error_code(&self) -> &'static str {
        match self {
            AttestationError::MalformedEvidence(_) => "malformed_evidence",
            AttestationError::UnknownOrExpiredChallenge => "unknown_or_expired_challenge",
            AttestationError::EntropyUnavailable => "entropy_unavailable",
            AttestationError::DebugNotAllowed { .. } => "debug_not_allowed",
            AttestationError::IdentityMismatch { .. } => "identity_mismatch",
            AttestationError::UntrustedIdentity { .. } => "untrusted_identity",
            AttestationError::ReportDataMismatch => "report_data_mismatch",
            AttestationError::AttestationAuthorityFailure(_) => "attestation_authority_failure",
            AttestationError::UnsupportedProvider(_) => "unsupported_provider",
            AttestationError::Timeout(_) => "timeout",
        }
    }

    pub(crate) fn authority(message: impl Into<String>) -> Self {
        AttestationError::AttestationAuthorityFailure(message.into())
    }
}
