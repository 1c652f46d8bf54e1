// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Enclave transport and lifecycle errors.

use std::time::Duration;

use super::manager::EnclaveState;

#[derive(Debug, thiserror::Error)]
pub enum EnclaveError {
    #[error("Invalid enclave address: {0}")]
    InvalidAddress(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Enclave start failed: {0}")]
    EnclaveStartFailure(String),

    #[error("Enclave stop failed: {0}")]
    EnclaveStopFailure(String),

    #[error("Enclave operation failed (request {request_id}): {message}")]
    OperationFailed { request_id: String, message: String },

    #[error("Attestation document unavailable: {0}")]
    AttestationDocumentUnavailable(String),

    #[error("Enclave request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Operation not allowed while enclave is {0}")]
    InvalidState(EnclaveState),
}

impl EnclaveError {
    /// Stable code for logs and audit records.
    pub fn error_code(&self) -> &'static str {
        match self {
            EnclaveError::InvalidAddress(_) => "invalid_address",
            EnclaveError::TransportError(_) => "transport_error",
            EnclaveError::EnclaveStartFailure(_) => "enclave_start_failure",
            EnclaveError::EnclaveStopFailure(_) => "enclave_stop_failure",
            EnclaveError::OperationFailed { .. } => "operation_failed",
            EnclaveError::AttestationDocumentUnavailable(_) => "attestation_document_unavailable",
            EnclaveError::Timeout(_) => "timeout",
            EnclaveError::ProtocolError(_) => "protocol_error",
            EnclaveError::InvalidState(_) => "invalid_state",
        }
    }

    pub(crate) fn transport(context: &str, err: impl std::fmt::Display) -> Self {
        EnclaveError::TransportError(format!("{context}: {err}"))
    }
}
