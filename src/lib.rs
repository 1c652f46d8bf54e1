// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Enclave Trust - remote attestation and host/enclave transport
//!
//! This crate decides whether a remote enclave can be trusted and carries
//! typed requests to a locally launched enclave.
//!
//! ## Modules
//!
//! - `attestation` - quote parsing, challenges, measurement policy, authority client
//! - `enclave` - enclave lifecycle, endpoint addressing, framed transport
//! - `config` - environment configuration
//! - `logging` - tracing subscriber setup

pub mod attestation;
pub mod config;
pub mod enclave;
pub mod error;
pub mod logging;

pub use error::Error;
