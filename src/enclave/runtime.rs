// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Enclave runtime integration.
//!
//! The hypervisor tooling that creates enclaves sits behind [`EnclaveRuntime`].
//! [`NitroCliRuntime`] drives AWS Nitro Enclaves through `nitro-cli`.

use std::ffi::OsString;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use super::address::EndpointAddress;
use super::protocol::EnclaveRequest;
use super::transport::{Connector, FramedTransport, VsockConnector};
use super::EnclaveError;
use crate::config::EnclaveConfig;

/// Service type answered by the enclave's attestation handler.
pub const ATTESTATION_SERVICE: &str = "attestation";
/// Operation returning the signed attestation document.
pub const GET_DOCUMENT_OPERATION: &str = "get_document";

const RUNNING: &str = "RUNNING";

/// One enclave instance as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnclaveInstance {
    pub enclave_id: String,
    pub context_id: u32,
    pub state: String,
}

impl EnclaveInstance {
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case(RUNNING)
    }

    pub fn address(&self, port: u32) -> EndpointAddress {
        EndpointAddress::new(self.context_id, port)
    }
}

/// Create, inspect and destroy enclave instances.
#[async_trait]
pub trait EnclaveRuntime: Send + Sync {
    async fn launch(&self, config: &EnclaveConfig) -> Result<EnclaveInstance, EnclaveError>;

    async fn terminate(&self, enclave_id: &str) -> Result<(), EnclaveError>;

    async fn describe(&self) -> Result<Vec<EnclaveInstance>, EnclaveError>;

    /// Fetch the current signed attestation document of `instance`.
    async fn attestation_document(
        &self,
        instance: &EnclaveInstance,
    ) -> Result<Vec<u8>, EnclaveError>;
}

/// `nitro-cli` JSON record (`run-enclave` and `describe-enclaves`).
#[derive(Deserialize)]
struct NitroEnclave {
    #[serde(rename = "EnclaveID")]
    enclave_id: String,
    #[serde(rename = "EnclaveCID")]
    enclave_cid: u32,
    #[serde(rename = "State", default)]
    state: Option<String>,
}

impl From<NitroEnclave> for EnclaveInstance {
    fn from(enclave: NitroEnclave) -> Self {
        Self {
            enclave_id: enclave.enclave_id,
            context_id: enclave.enclave_cid,
            // run-enclave only reports instances it has started.
            state: enclave.state.unwrap_or_else(|| RUNNING.to_string()),
        }
    }
}

/// Runtime backed by the `nitro-cli` tool.
pub struct NitroCliRuntime<C = VsockConnector> {
    program: PathBuf,
    leading_args: Vec<OsString>,
    transport: FramedTransport<C>,
    document_port: u32,
}

impl NitroCliRuntime<VsockConnector> {
    /// Runtime that fetches attestation documents on `document_port`.
    pub fn new(document_port: u32) -> Self {
        Self::with_transport(FramedTransport::default(), document_port)
    }
}

impl<C: Connector> NitroCliRuntime<C> {
    pub fn with_transport(transport: FramedTransport<C>, document_port: u32) -> Self {
        Self {
            program: PathBuf::from("nitro-cli"),
            leading_args: Vec::new(),
            transport,
            document_port,
        }
    }

    /// Run the tool through another command, e.g. `sudo nitro-cli`.
    pub fn with_command<I, S>(mut self, program: impl Into<PathBuf>, leading_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.program = program.into();
        self.leading_args = leading_args.into_iter().map(Into::into).collect();
        self
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.leading_args).arg(subcommand).kill_on_drop(true);
        command
    }

    async fn run(&self, mut command: Command, subcommand: &str) -> Result<Vec<u8>, String> {
        debug!(program = %self.program.display(), subcommand, "Running enclave tool");
        let output = command
            .output()
            .await
            .map_err(|e| format!("cannot run {}: {e}", self.program.display()))?;
        if !output.status.success() {
            return Err(format!(
                "{subcommand} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl<C: Connector> EnclaveRuntime for NitroCliRuntime<C> {
    async fn launch(&self, config: &EnclaveConfig) -> Result<EnclaveInstance, EnclaveError> {
        let mut command = self.command("run-enclave");
        command
            .arg("--eif-path")
            .arg(&config.image_path)
            .arg("--cpu-count")
            .arg(config.cpu_count.to_string())
            .arg("--memory")
            .arg(config.memory_mib.to_string());
        if let Some(cid) = config.context_id {
            command.arg("--enclave-cid").arg(cid.to_string());
        }
        if config.debug_mode {
            command.arg("--debug-mode");
        }

        let stdout = self
            .run(command, "run-enclave")
            .await
            .map_err(EnclaveError::EnclaveStartFailure)?;
        let enclave: NitroEnclave = serde_json::from_slice(&stdout).map_err(|e| {
            EnclaveError::EnclaveStartFailure(format!("unexpected run-enclave output: {e}"))
        })?;
        Ok(enclave.into())
    }

    async fn terminate(&self, enclave_id: &str) -> Result<(), EnclaveError> {
        let mut command = self.command("terminate-enclave");
        command.arg("--enclave-id").arg(enclave_id);
        self.run(command, "terminate-enclave")
            .await
            .map(|_| ())
            .map_err(EnclaveError::EnclaveStopFailure)
    }

    async fn describe(&self) -> Result<Vec<EnclaveInstance>, EnclaveError> {
        let stdout = self
            .run(self.command("describe-enclaves"), "describe-enclaves")
            .await
            .map_err(EnclaveError::AttestationDocumentUnavailable)?;
        let enclaves: Vec<NitroEnclave> = serde_json::from_slice(&stdout).map_err(|e| {
            EnclaveError::AttestationDocumentUnavailable(format!(
                "unexpected describe-enclaves output: {e}"
            ))
        })?;
        Ok(enclaves.into_iter().map(Into::into).collect())
    }

    async fn attestation_document(
        &self,
        instance: &EnclaveInstance,
    ) -> Result<Vec<u8>, EnclaveError> {
        let request = EnclaveRequest::new(ATTESTATION_SERVICE, GET_DOCUMENT_OPERATION, Vec::new());
        let response = self
            .transport
            .request(instance.address(self.document_port), &request)
            .await?;

        if !response.success {
            return Err(EnclaveError::AttestationDocumentUnavailable(
                response
                    .error_message
                    .unwrap_or_else(|| "enclave refused the request".to_string()),
            ));
        }
        match response.payload {
            Some(document) if !document.is_empty() => Ok(document),
            _ => Err(EnclaveError::AttestationDocumentUnavailable(
                "enclave returned an empty document".to_string(),
            )),
        }
    }
}
