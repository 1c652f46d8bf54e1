// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Host-side management of a hardware-isolated enclave.
//!
//! The host launches the enclave image through an [`EnclaveRuntime`], then
//! talks to it over a local socket family that addresses endpoints by
//! (context id, port). Every request is one length-prefixed JSON frame on a
//! fresh connection.
//!
//! ## Modules
//!
//! - `address` - endpoint address record
//! - `protocol` - request/response envelopes
//! - `transport` - framed request/response transport
//! - `runtime` - enclave runtime tooling
//! - `manager` - lifecycle state machine

pub mod address;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod runtime;
pub mod transport;

pub use address::EndpointAddress;
pub use error::EnclaveError;
pub use manager::{EnclaveManager, EnclaveState};
pub use protocol::{EnclaveRequest, EnclaveResponse};
pub use runtime::{EnclaveInstance, EnclaveRuntime, NitroCliRuntime};
pub use transport::{Connector, FramedTransport, VsockConnector};
