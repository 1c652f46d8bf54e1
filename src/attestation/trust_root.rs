// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Pinned trust root for attestation authority responses.
//!
//! ## Security
//!
//! - The authority's signing certificate must either be a pinned root or be
//!   issued directly by one (issuer name match plus a verified signature).
//! - The certificate must be inside its validity window.
//! - The response body signature is checked with the certificate's key.
//!
//! Nothing in a response may be trusted before [`TrustRoot::verify_response`]
//! succeeds. Revocation and multi-level chains are out of scope; operators
//! pin the issuing CA directly.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64ct::{Base64, Encoding};
use ring::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use x509_cert::der::{Decode, Encode};
use x509_cert::spki::ObjectIdentifier;
use x509_cert::Certificate;

use super::AttestationError;

const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Errors raised while loading a trust-root bundle.
#[derive(Debug, thiserror::Error)]
pub enum TrustRootError {
    #[error("Invalid PEM bundle: {0}")]
    InvalidPem(String),

    #[error("Trust-root bundle contains no certificates")]
    Empty,

    #[error("Invalid root certificate: {0}")]
    InvalidCertificate(String),
}

/// Set of pinned authority root certificates.
#[derive(Clone)]
pub struct TrustRoot {
    roots: Vec<PinnedRoot>,
}

#[derive(Clone)]
struct PinnedRoot {
    der: Vec<u8>,
    certificate: Certificate,
}

impl std::fmt::Debug for TrustRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustRoot")
            .field("roots", &self.roots.len())
            .finish()
    }
}

impl TrustRoot {
    /// Load every `CERTIFICATE` block from a PEM bundle.
    pub fn from_pem(bundle: &str) -> Result<Self, TrustRootError> {
        let blocks =
            pem::parse_many(bundle).map_err(|e| TrustRootError::InvalidPem(e.to_string()))?;

        let roots = blocks
            .into_iter()
            .filter(|block| block.tag() == CERTIFICATE_TAG)
            .map(|block| {
                let der = block.into_contents();
                Certificate::from_der(&der)
                    .map(|certificate| PinnedRoot { der, certificate })
                    .map_err(|e| TrustRootError::InvalidCertificate(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if roots.is_empty() {
            return Err(TrustRootError::Empty);
        }
        Ok(Self { roots })
    }

    /// Number of pinned roots.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Verify an authority response.
    ///
    /// - `signature_header`: base64 signature over the raw `body`.
    /// - `certificate_header`: signing certificate as base64 DER, or a PEM
    ///   chain whose first block is the signing certificate.
    pub fn verify_response(
        &self,
        body: &[u8],
        signature_header: &str,
        certificate_header: &str,
    ) -> Result<(), AttestationError> {
        let signature = Base64::decode_vec(signature_header.trim())
            .map_err(|e| AttestationError::authority(format!("signature is not base64: {e}")))?;
        let leaf_der = decode_certificate_header(certificate_header)?;
        let leaf = self.validate_signing_certificate(&leaf_der, SystemTime::now())?;

        let spki = &leaf.tbs_certificate.subject_public_key_info;
        let key_algorithm = spki.algorithm.oid;
        let algorithm: &'static dyn VerificationAlgorithm = if key_algorithm == RSA_ENCRYPTION {
            &signature::RSA_PKCS1_2048_8192_SHA256
        } else if key_algorithm == EC_PUBLIC_KEY {
            &signature::ECDSA_P256_SHA256_ASN1
        } else {
            return Err(AttestationError::authority(format!(
                "unsupported signing key algorithm {key_algorithm}"
            )));
        };

        UnparsedPublicKey::new(algorithm, spki.subject_public_key.raw_bytes())
            .verify(body, &signature)
            .map_err(|_| AttestationError::authority("response signature verification failed"))
    }

    /// Check that `der` is a pinned root or is issued by one, and is valid at
    /// `now`. Returns the parsed certificate.
    pub fn validate_signing_certificate(
        &self,
        der: &[u8],
        now: SystemTime,
    ) -> Result<Certificate, AttestationError> {
        let leaf = Certificate::from_der(der)
            .map_err(|e| AttestationError::authority(format!("invalid signing certificate: {e}")))?;
        check_validity(&leaf, now)?;

        if self.roots.iter().any(|root| root.der == der) {
            return Ok(leaf);
        }

        let issued_by_pinned_root = self
            .roots
            .iter()
            .filter(|root| root.certificate.tbs_certificate.subject == leaf.tbs_certificate.issuer)
            .any(|root| {
                check_validity(&root.certificate, now).is_ok()
                    && verify_issued_by(&leaf, &root.certificate).is_ok()
            });

        if issued_by_pinned_root {
            Ok(leaf)
        } else {
            Err(AttestationError::authority(
                "signing certificate does not chain to a pinned root",
            ))
        }
    }
}

fn decode_certificate_header(header: &str) -> Result<Vec<u8>, AttestationError> {
    let header = header.trim();
    if header.starts_with("-----BEGIN") {
        let blocks = pem::parse_many(header)
            .map_err(|e| AttestationError::authority(format!("invalid certificate PEM: {e}")))?;
        return blocks
            .into_iter()
            .find(|block| block.tag() == CERTIFICATE_TAG)
            .map(pem::Pem::into_contents)
            .ok_or_else(|| AttestationError::authority("certificate header has no certificate"));
    }

    Base64::decode_vec(header)
        .map_err(|e| AttestationError::authority(format!("certificate is not base64: {e}")))
}

fn check_validity(certificate: &Certificate, now: SystemTime) -> Result<(), AttestationError> {
    let now = now.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    let validity = &certificate.tbs_certificate.validity;
    if now < validity.not_before.to_unix_duration() || now > validity.not_after.to_unix_duration() {
        return Err(AttestationError::authority(format!(
            "certificate {} is outside its validity window",
            certificate.tbs_certificate.subject
        )));
    }
    Ok(())
}

fn verify_issued_by(leaf: &Certificate, issuer: &Certificate) -> Result<(), AttestationError> {
    let signature_algorithm = leaf.signature_algorithm.oid;
    let algorithm: &'static dyn VerificationAlgorithm = if signature_algorithm == SHA256_WITH_RSA {
        &signature::RSA_PKCS1_2048_8192_SHA256
    } else if signature_algorithm == ECDSA_WITH_SHA256 {
        &signature::ECDSA_P256_SHA256_ASN1
    } else {
        return Err(AttestationError::authority(format!(
            "unsupported certificate signature algorithm {signature_algorithm}"
        )));
    };

    let tbs = leaf
        .tbs_certificate
        .to_der()
        .map_err(|e| AttestationError::authority(format!("cannot re-encode certificate: {e}")))?;
    let issuer_key = issuer
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .raw_bytes();

    UnparsedPublicKey::new(algorithm, issuer_key)
        .verify(&tbs, leaf.signature.raw_bytes())
        .map_err(|_| AttestationError::authority("certificate signature verification failed"))
}
