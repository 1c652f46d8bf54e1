// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Evidence, verification options and verification results.

use std::collections::BTreeMap;

use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::quote::Quote;
use super::{AttestationError, ProviderType};

/// Measurement map key for the code identity.
pub const MRENCLAVE: &str = "MRENCLAVE";
/// Measurement map key for the signer identity.
pub const MRSIGNER: &str = "MRSIGNER";
pub const ISVPRODID: &str = "ISVPRODID";
pub const ISVSVN: &str = "ISVSVN";
pub const CPUSVN: &str = "CPUSVN";
/// Status reported by the attestation authority, when one was consulted.
pub const AUTHORITY_STATUS: &str = "AUTHORITY_STATUS";

/// Caller-submitted evidence, already decoded from its wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evidence {
    pub challenge: String,
    pub quote: Vec<u8>,
    pub auxiliary_data: Option<Vec<u8>>,
}

/// Evidence as submitted over the wire: binary fields are base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceSubmission {
    pub challenge: String,
    pub quote: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auxiliary_data: Option<String>,
}

impl Evidence {
    pub fn new(challenge: impl Into<String>, quote: Vec<u8>) -> Self {
        Self {
            challenge: challenge.into(),
            quote,
            auxiliary_data: None,
        }
    }

    pub fn with_auxiliary_data(mut self, data: Vec<u8>) -> Self {
        self.auxiliary_data = Some(data);
        self
    }

    /// Parse a JSON [`EvidenceSubmission`].
    pub fn from_json(bytes: &[u8]) -> Result<Self, AttestationError> {
        let submission: EvidenceSubmission = serde_json::from_slice(bytes)
            .map_err(|e| {
                AttestationError::MalformedEvidence(format!("invalid evidence JSON: {e}"))
            })?;
        Self::try_from(submission)
    }

    pub fn to_submission(&self) -> EvidenceSubmission {
        EvidenceSubmission {
            challenge: self.challenge.clone(),
            quote: Base64::encode_string(&self.quote),
            auxiliary_data: self.auxiliary_data.as_deref().map(Base64::encode_string),
        }
    }
}

impl TryFrom<EvidenceSubmission> for Evidence {
    type Error = AttestationError;

    fn try_from(submission: EvidenceSubmission) -> Result<Self, Self::Error> {
        let quote = Base64::decode_vec(&submission.quote)
            .map_err(|e| AttestationError::MalformedEvidence(format!("quote is not base64: {e}")))?;
        let auxiliary_data = submission
            .auxiliary_data
            .map(|data| {
                Base64::decode_vec(&data).map_err(|e| {
                    AttestationError::MalformedEvidence(format!("auxiliary data is not base64: {e}"))
                })
            })
            .transpose()?;

        Ok(Self {
            challenge: submission.challenge,
            quote,
            auxiliary_data,
        })
    }
}

/// Per-call verification options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOptions {
    /// Service whose allow-list applies.
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub allow_debug: bool,
    #[serde(default)]
    pub require_identity: bool,
    /// Expected MRENCLAVE or MRSIGNER (hex) when `require_identity` is set.
    #[serde(default)]
    pub expected_identity: Option<String>,
}

impl VerificationOptions {
    pub fn for_service(service_id: impl Into<String>) -> Self {
        Self {
            service_id: Some(service_id.into()),
            ..Self::default()
        }
    }

    pub fn allow_debug(mut self, allow: bool) -> Self {
        self.allow_debug = allow;
        self
    }

    /// Require the quote to carry `identity` as its MRENCLAVE or MRSIGNER.
    pub fn expect_identity(mut self, identity: impl Into<String>) -> Self {
        self.require_identity = true;
        self.expected_identity = Some(identity.into());
        self
    }
}

/// Coarse assurance level derived from the enclave's security version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    Standard,
    High,
    Critical,
}

impl SecurityLevel {
    /// ISVSVN >= 5 is critical, >= 2 is high. Debug enclaves are always
    /// standard.
    pub fn for_quote(quote: &Quote) -> Self {
        if quote.is_debug() {
            return SecurityLevel::Standard;
        }
        match quote.isv_svn {
            svn if svn >= 5 => SecurityLevel::Critical,
            svn if svn >= 2 => SecurityLevel::High,
            _ => SecurityLevel::Standard,
        }
    }
}

/// Outcome of a successful verification.
///
/// Must not be relied on after `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub verified: bool,
    pub provider: ProviderType,
    /// MRENCLAVE hex.
    pub identity: String,
    pub security_level: SecurityLevel,
    pub measurements: BTreeMap<String, String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl VerificationResult {
    pub fn is_current(&self) -> bool {
        Utc::now() < self.expires_at
    }
}
