// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fixed-layout SGX quote codec.
//!
//! Offsets come from the hardware vendor's quote format and are a
//! compatibility contract. Multi-byte integers are little-endian.
//!
//! | Field | Offset | Length |
//! |-------|--------|--------|
//! | version | 0 | 2 |
//! | signature type | 2 | 2 |
//! | CPUSVN | 32 | 16 |
//! | MRENCLAVE | 48 | 32 |
//! | flags | 96 | 8 |
//! | MRSIGNER | 128 | 32 |
//! | ISVPRODID | 256 | 2 |
//! | ISVSVN | 258 | 2 |
//! | report data | 368 | 64 |
//!
//! Bytes past the fixed header (signature blocks appended by some quote
//! formats) are ignored by [`Quote::decode`].

use super::AttestationError;

/// Minimum length of an encoded quote.
pub const QUOTE_MIN_LEN: usize = 432;

/// Debug attribute (bit 1 of the flags field).
pub const DEBUG_FLAG: u64 = 0x2;

const VERSION_OFFSET: usize = 0;
const SIGNATURE_TYPE_OFFSET: usize = 2;
const CPU_SVN_OFFSET: usize = 32;
const MR_ENCLAVE_OFFSET: usize = 48;
const FLAGS_OFFSET: usize = 96;
const MR_SIGNER_OFFSET: usize = 128;
const ISV_PROD_ID_OFFSET: usize = 256;
const ISV_SVN_OFFSET: usize = 258;
const REPORT_DATA_OFFSET: usize = 368;

/// Decoded view of the fixed quote header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub version: u16,
    pub signature_type: u16,
    pub cpu_svn: [u8; 16],
    pub flags: u64,
    /// Code identity (MRENCLAVE).
    pub mr_enclave: [u8; 32],
    /// Signer identity (MRSIGNER).
    pub mr_signer: [u8; 32],
    pub isv_prod_id: u16,
    /// Security version number.
    pub isv_svn: u16,
    pub report_data: [u8; 64],
}

impl Quote {
    /// Decode the fixed header from `bytes`.
    ///
    /// Fails with [`AttestationError::MalformedEvidence`] when the buffer is
    /// shorter than [`QUOTE_MIN_LEN`]. Never panics.
    pub fn decode(bytes: &[u8]) -> Result<Self, AttestationError> {
        if bytes.len() < QUOTE_MIN_LEN {
            return Err(AttestationError::MalformedEvidence(format!(
                "quote is {} bytes, need at least {QUOTE_MIN_LEN}",
                bytes.len()
            )));
        }

        Ok(Self {
            version: read_u16(bytes, VERSION_OFFSET),
            signature_type: read_u16(bytes, SIGNATURE_TYPE_OFFSET),
            cpu_svn: read_array(bytes, CPU_SVN_OFFSET),
            flags: read_u64(bytes, FLAGS_OFFSET),
            mr_enclave: read_array(bytes, MR_ENCLAVE_OFFSET),
            mr_signer: read_array(bytes, MR_SIGNER_OFFSET),
            isv_prod_id: read_u16(bytes, ISV_PROD_ID_OFFSET),
            isv_svn: read_u16(bytes, ISV_SVN_OFFSET),
            report_data: read_array(bytes, REPORT_DATA_OFFSET),
        })
    }

    /// Encode the fixed header. Unused gaps are zero-filled.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; QUOTE_MIN_LEN];
        out[VERSION_OFFSET..VERSION_OFFSET + 2].copy_from_slice(&self.version.to_le_bytes());
        out[SIGNATURE_TYPE_OFFSET..SIGNATURE_TYPE_OFFSET + 2]
            .copy_from_slice(&self.signature_type.to_le_bytes());
        out[CPU_SVN_OFFSET..CPU_SVN_OFFSET + 16].copy_from_slice(&self.cpu_svn);
        out[MR_ENCLAVE_OFFSET..MR_ENCLAVE_OFFSET + 32].copy_from_slice(&self.mr_enclave);
        out[FLAGS_OFFSET..FLAGS_OFFSET + 8].copy_from_slice(&self.flags.to_le_bytes());
        out[MR_SIGNER_OFFSET..MR_SIGNER_OFFSET + 32].copy_from_slice(&self.mr_signer);
        out[ISV_PROD_ID_OFFSET..ISV_PROD_ID_OFFSET + 2]
            .copy_from_slice(&self.isv_prod_id.to_le_bytes());
        out[ISV_SVN_OFFSET..ISV_SVN_OFFSET + 2].copy_from_slice(&self.isv_svn.to_le_bytes());
        out[REPORT_DATA_OFFSET..REPORT_DATA_OFFSET + 64].copy_from_slice(&self.report_data);
        out
    }

    pub fn is_debug(&self) -> bool {
        self.flags & DEBUG_FLAG != 0
    }

    /// MRENCLAVE as lowercase hex.
    pub fn code_identity(&self) -> String {
        hex::encode(self.mr_enclave)
    }

    /// MRSIGNER as lowercase hex.
    pub fn signer_identity(&self) -> String {
        hex::encode(self.mr_signer)
    }
}

// Callers check the total length first, so every index below is in bounds.
fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}
