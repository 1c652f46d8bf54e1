// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use enclave_trust::attestation::AttestationVerifier;
use enclave_trust::config::{AttestationConfig, EnclaveConfig, LogFormat};
use enclave_trust::enclave::{EnclaveManager, NitroCliRuntime};
use enclave_trust::{logging, Error};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Error> {
    logging::init(LogFormat::from_env()?)?;

    let attestation = AttestationConfig::from_env()?;
    let verifier = attestation.build_verifier()?;
    info!(
        provider = %verifier.provider_type(),
        allow_listed_services = verifier.policy().service_count(),
        authority = verifier.has_authority(),
        "Attestation verifier ready"
    );

    let Some(config) = EnclaveConfig::from_env()? else {
        info!("ENCLAVE_IMAGE_PATH not set, no enclave to manage");
        return Ok(());
    };

    let manager = EnclaveManager::new(Arc::new(NitroCliRuntime::new(config.port)));
    manager.start(config).await?;

    match manager.get_attestation_document().await {
        Ok(document) => info!(
            fingerprint = %hex::encode(Sha256::digest(&document)),
            len = document.len(),
            "Fetched enclave attestation document"
        ),
        Err(e) => warn!(error = %e, "Attestation document unavailable"),
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for shutdown signal");
    }
    info!("Shutting down");

    manager.stop().await?;
    Ok(())
}
