// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Enclave Manager
//!
//! Lifecycle state machine for a single enclave instance plus typed request
//! dispatch to it.
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//!               |                      |
//!               +------> Errored <-----+
//! ```
//!
//! `Errored` is left through `stop` while an instance is still known, and
//! through a fresh `start` otherwise. Lifecycle operations are serialised and
//! survive being cancelled; request dispatch only reads the current state and
//! never waits on a lifecycle operation.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::address::EndpointAddress;
use super::protocol::{EnclaveRequest, EnclaveResponse};
use super::runtime::{EnclaveInstance, EnclaveRuntime};
use super::transport::{Connector, FramedTransport, VsockConnector};
use super::EnclaveError;
use crate::config::EnclaveConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnclaveState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Errored,
}

impl fmt::Display for EnclaveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EnclaveState::Stopped => "stopped",
            EnclaveState::Starting => "starting",
            EnclaveState::Running => "running",
            EnclaveState::Stopping => "stopping",
            EnclaveState::Errored => "errored",
        })
    }
}

struct Active {
    instance: EnclaveInstance,
    address: EndpointAddress,
    request_timeout: Duration,
}

struct Status {
    state: EnclaveState,
    active: Option<Active>,
}

pub struct EnclaveManager<C = VsockConnector> {
    runtime: Arc<dyn EnclaveRuntime>,
    transport: FramedTransport<C>,
    status: Mutex<Status>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl EnclaveManager<VsockConnector> {
    pub fn new(runtime: Arc<dyn EnclaveRuntime>) -> Self {
        Self::with_transport(runtime, FramedTransport::default())
    }
}

impl<C: Connector> EnclaveManager<C> {
    pub fn with_transport(runtime: Arc<dyn EnclaveRuntime>, transport: FramedTransport<C>) -> Self {
        Self {
            runtime,
            transport,
            status: Mutex::new(Status {
                state: EnclaveState::Stopped,
                active: None,
            }),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> EnclaveState {
        self.status().state
    }

    /// The managed instance, while one is known.
    pub fn instance(&self) -> Option<EnclaveInstance> {
        self.status().active.as_ref().map(|active| active.instance.clone())
    }

    pub fn address(&self) -> Option<EndpointAddress> {
        self.status().active.as_ref().map(|active| active.address)
    }

    /// Launch the enclave and wait for it to settle.
    ///
    /// Allowed from `Stopped` and `Errored`, unless an instance from an
    /// interrupted start is still known. Dropping the future before it
    /// settles leaves the manager `Errored` with the launched instance kept
    /// for `stop`.
    pub async fn start(&self, config: EnclaveConfig) -> Result<EnclaveState, EnclaveError> {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut status = self.status();
            match (status.state, &status.active) {
                // An instance leaked by a cancelled start must be stopped first.
                (EnclaveState::Errored, Some(active)) => {
                    return Err(EnclaveError::EnclaveStartFailure(format!(
                        "instance {} is still known, stop it first",
                        active.instance.enclave_id
                    )));
                }
                (EnclaveState::Stopped | EnclaveState::Errored, _) => {
                    status.state = EnclaveState::Starting;
                    status.active = None;
                }
                (other, _) => return Err(EnclaveError::InvalidState(other)),
            }
        }
        let _transition = Transition::new(&self.status, EnclaveState::Starting);

        info!(
            image = %config.image_path.display(),
            cpu_count = config.cpu_count,
            memory_mib = config.memory_mib,
            "Starting enclave"
        );

        let instance = match self.runtime.launch(&config).await {
            Ok(instance) => instance,
            Err(e) => {
                self.status().state = EnclaveState::Errored;
                error!(error = %e, "Enclave launch failed");
                return Err(match e {
                    EnclaveError::EnclaveStartFailure(_) => e,
                    other => EnclaveError::EnclaveStartFailure(other.to_string()),
                });
            }
        };

        let enclave_id = instance.enclave_id.clone();
        let address = instance.address(config.port);
        self.status().active = Some(Active {
            instance,
            address,
            request_timeout: config.request_timeout,
        });

        tokio::time::sleep(config.settle_delay).await;

        info!(%enclave_id, %address, "Enclave running");
        self.status().state = EnclaveState::Running;
        Ok(EnclaveState::Running)
    }

    /// Dispatch a request with the configured timeout.
    pub async fn send_request(
        &self,
        service_type: &str,
        operation: &str,
        payload: Vec<u8>,
    ) -> Result<EnclaveResponse, EnclaveError> {
        self.dispatch(service_type, operation, payload, None).await
    }

    /// Dispatch a request with an explicit deadline.
    pub async fn send_request_within(
        &self,
        service_type: &str,
        operation: &str,
        payload: Vec<u8>,
        deadline: Duration,
    ) -> Result<EnclaveResponse, EnclaveError> {
        self.dispatch(service_type, operation, payload, Some(deadline)).await
    }

    async fn dispatch(
        &self,
        service_type: &str,
        operation: &str,
        payload: Vec<u8>,
        deadline: Option<Duration>,
    ) -> Result<EnclaveResponse, EnclaveError> {
        let (address, timeout) = {
            let status = self.status();
            match (&status.state, &status.active) {
                (EnclaveState::Running, Some(active)) => {
                    (active.address, deadline.unwrap_or(active.request_timeout))
                }
                (state, _) => return Err(EnclaveError::InvalidState(*state)),
            }
        };

        let request = EnclaveRequest::new(service_type, operation, payload);
        debug!(
            request_id = %request.request_id,
            service_type,
            operation,
            %address,
            "Dispatching enclave request"
        );

        let response = tokio::time::timeout(timeout, self.transport.request(address, &request))
            .await
            .map_err(|_| EnclaveError::Timeout(timeout))??;

        if !response.success {
            return Err(EnclaveError::OperationFailed {
                request_id: response.request_id,
                message: response
                    .error_message
                    .unwrap_or_else(|| "no error message".to_string()),
            });
        }
        Ok(response)
    }

    /// Locate the managed instance through the runtime and fetch its signed
    /// attestation document.
    ///
    /// Other enclaves reported by the runtime are never considered.
    pub async fn get_attestation_document(&self) -> Result<Vec<u8>, EnclaveError> {
        let managed_id = self
            .status()
            .active
            .as_ref()
            .map(|active| active.instance.enclave_id.clone())
            .ok_or_else(|| {
                EnclaveError::AttestationDocumentUnavailable(
                    "no managed enclave instance".to_string(),
                )
            })?;

        let unavailable = |e: EnclaveError| match e {
            EnclaveError::AttestationDocumentUnavailable(_) => e,
            other => EnclaveError::AttestationDocumentUnavailable(other.to_string()),
        };

        let instances = self.runtime.describe().await.map_err(unavailable)?;
        let instance = instances
            .into_iter()
            .find(|instance| instance.is_running() && instance.enclave_id == managed_id)
            .ok_or_else(|| {
                EnclaveError::AttestationDocumentUnavailable(format!(
                    "enclave {managed_id} is not running"
                ))
            })?;

        self.runtime
            .attestation_document(&instance)
            .await
            .map_err(unavailable)
    }

    /// Terminate the enclave. A no-op when already stopped.
    pub async fn stop(&self) -> Result<EnclaveState, EnclaveError> {
        let _lifecycle = self.lifecycle.lock().await;
        let enclave_id = {
            let mut status = self.status();
            match (status.state, &status.active) {
                (EnclaveState::Stopped, _) => return Ok(EnclaveState::Stopped),
                (EnclaveState::Running | EnclaveState::Errored, Some(active)) => {
                    let id = active.instance.enclave_id.clone();
                    status.state = EnclaveState::Stopping;
                    id
                }
                (state, _) => return Err(EnclaveError::InvalidState(state)),
            }
        };
        let _transition = Transition::new(&self.status, EnclaveState::Stopping);

        info!(%enclave_id, "Stopping enclave");
        match self.runtime.terminate(&enclave_id).await {
            Ok(()) => {
                let mut status = self.status();
                status.state = EnclaveState::Stopped;
                status.active = None;
                info!(%enclave_id, "Enclave stopped");
                Ok(EnclaveState::Stopped)
            }
            Err(e) => {
                self.status().state = EnclaveState::Errored;
                error!(%enclave_id, error = %e, "Enclave termination failed");
                Err(match e {
                    EnclaveError::EnclaveStopFailure(_) => e,
                    other => EnclaveError::EnclaveStopFailure(other.to_string()),
                })
            }
        }
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        lock(&self.status)
    }
}

// Status updates are single assignments, so a poisoned lock holds a
// consistent value.
fn lock(status: &Mutex<Status>) -> MutexGuard<'_, Status> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Moves a transitional state to `Errored` if the lifecycle future is dropped
/// before it settles. The known instance is kept so `stop` can reach it.
struct Transition<'a> {
    status: &'a Mutex<Status>,
    during: EnclaveState,
}

impl<'a> Transition<'a> {
    fn new(status: &'a Mutex<Status>, during: EnclaveState) -> Self {
        Self { status, during }
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        let mut status = lock(self.status);
        if status.state == self.during {
            status.state = EnclaveState::Errored;
            warn!(interrupted = %self.during, "Enclave lifecycle operation cancelled");
        }
    }
}
