// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use thiserror::Error;

use crate::attestation::AttestationError;
use crate::config::ConfigError;
use crate::enclave::EnclaveError;

/// Top-level error for the host daemon.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Attestation(#[from] AttestationError),

    #[error(transparent)]
    Enclave(#[from] EnclaveError),

    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

impl Error {
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config(e) => e.error_code(),
            Error::Attestation(e) => e.error_code(),
            Error::Enclave(e) => e.error_code(),
            Error::Logging(_) => "logging_init_failed",
        }
    }
}
