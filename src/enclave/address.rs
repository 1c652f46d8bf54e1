// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! vsock endpoint addresses.
//!
//! Record layout (16 bytes, little-endian):
//!
//! | Bytes | Field |
//! |---|---|
//! | 0..2 | family tag (`AF_VSOCK`) |
//! | 2..6 | port |
//! | 6..10 | context id |
//! | 10..16 | reserved, zero |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::EnclaveError;

/// Serialized size of an [`EndpointAddress`].
pub const ENDPOINT_ADDRESS_LEN: usize = 16;

/// Family tag written into serialized addresses.
pub const FAMILY_TAG: u16 = libc::AF_VSOCK as u16;

const URI_SCHEME: &str = "vsock://";

/// Address of one enclave instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointAddress {
    pub context_id: u32,
    pub port: u32,
}

impl EndpointAddress {
    pub fn new(context_id: u32, port: u32) -> Self {
        Self { context_id, port }
    }

    pub fn serialize(&self) -> [u8; ENDPOINT_ADDRESS_LEN] {
        let mut out = [0u8; ENDPOINT_ADDRESS_LEN];
        out[0..2].copy_from_slice(&FAMILY_TAG.to_le_bytes());
        out[2..6].copy_from_slice(&self.port.to_le_bytes());
        out[6..10].copy_from_slice(&self.context_id.to_le_bytes());
        out
    }

    /// Parse a serialized address. Requires the exact length, the vsock
    /// family tag and zeroed reserved bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, EnclaveError> {
        let bytes: &[u8; ENDPOINT_ADDRESS_LEN] = bytes.try_into().map_err(|_| {
            EnclaveError::InvalidAddress(format!(
                "expected {ENDPOINT_ADDRESS_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;

        let family = u16::from_le_bytes([bytes[0], bytes[1]]);
        if family != FAMILY_TAG {
            return Err(EnclaveError::InvalidAddress(format!(
                "unexpected address family {family}"
            )));
        }
        if bytes[10..].iter().any(|b| *b != 0) {
            return Err(EnclaveError::InvalidAddress(
                "reserved bytes are not zero".to_string(),
            ));
        }

        Ok(Self {
            port: u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
            context_id: u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
        })
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{URI_SCHEME}{}:{}", self.context_id, self.port)
    }
}

impl FromStr for EndpointAddress {
    type Err = EnclaveError;

    /// Accepts `cid:port` or `vsock://cid:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix(URI_SCHEME).unwrap_or(s);
        let (cid, port) = rest
            .split_once(':')
            .ok_or_else(|| EnclaveError::InvalidAddress(format!("expected cid:port, got {s:?}")))?;

        let parse = |field: &str, value: &str| {
            value
                .parse::<u32>()
                .map_err(|e| {
                    EnclaveError::InvalidAddress(format!("invalid {field} {value:?}: {e}"))
                })
        };
        Ok(Self {
            context_id: parse("context id", cid)?,
            port: parse("port", port)?,
        })
    }
}

impl From<EndpointAddress> for tokio_vsock::VsockAddr {
    fn from(address: EndpointAddress) -> Self {
        tokio_vsock::VsockAddr::new(address.context_id, address.port)
    }
}
