// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Bundle Integrity Block: a cipher suite identifier and its security result
// computed over the payload bytes. The result slot is written as zeros at
// header-build time and patched once the payload is known.

use super::{put_fixed, Reader, BIB_BLK_TYPE};
use crate::crc;
use crate::error::{BpError, Result};
use crate::flags::ConditionFlags;

const BLK_FLAGS_WIDTH: usize = 1;
const BLKLEN_WIDTH: usize = 2;
const SUITE_WIDTH: usize = 2;
const RESULT_LEN_WIDTH: usize = 1;

/// Supported integrity cipher suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherSuite {
    #[default]
    Crc16X25,
    Crc32Castagnoli,
}

impl CipherSuite {
    pub fn from_id(id: u64) -> Result<Self> {
        match id {
            1 => Ok(CipherSuite::Crc16X25),
            2 => Ok(CipherSuite::Crc32Castagnoli),
            other => Err(BpError::InvalidCipherSuite(other)),
        }
    }

    pub fn id(self) -> u64 {
        match self {
            CipherSuite::Crc16X25 => 1,
            CipherSuite::Crc32Castagnoli => 2,
        }
    }

    /// Security result size in bytes.
    pub fn result_len(self) -> usize {
        match self {
            CipherSuite::Crc16X25 => 2,
            CipherSuite::Crc32Castagnoli => 4,
        }
    }

    /// Security result over `payload`, widened to u64.
    pub fn compute(self, payload: &[u8]) -> u64 {
        match self {
            CipherSuite::Crc16X25 => u64::from(crc::crc16_x25(payload)),
            CipherSuite::Crc32Castagnoli => u64::from(crc::crc32_castagnoli(payload)),
        }
    }
}

/// Decoded BIB.
#[derive(Debug, Clone, Copy)]
pub struct BibBlock {
    pub suite: CipherSuite,
    pub result: u64,
}

impl BibBlock {
    /// Check the recorded result against the payload.
    pub fn verify(&self, payload: &[u8]) -> Result<()> {
        if self.suite.compute(payload) != self.result {
            return Err(BpError::IntegrityFailed);
        }
        Ok(())
    }
}

/// Position of the security result inside a written header.
#[derive(Debug, Clone, Copy, Default)]
pub struct BibFields {
    pub result_index: usize,
    pub result_len: usize,
}

/// Serialize a BIB onto `out` with a zeroed result slot.
pub fn write(out: &mut Vec<u8>, suite: CipherSuite, flags: &mut ConditionFlags) -> BibFields {
    let result_len = suite.result_len();
    out.push(BIB_BLK_TYPE);
    put_fixed(out, 0, BLK_FLAGS_WIDTH, flags);
    put_fixed(
        out,
        (SUITE_WIDTH + RESULT_LEN_WIDTH + result_len) as u64,
        BLKLEN_WIDTH,
        flags,
    );
    put_fixed(out, suite.id(), SUITE_WIDTH, flags);
    put_fixed(out, result_len as u64, RESULT_LEN_WIDTH, flags);
    let result_index = out.len();
    out.extend(std::iter::repeat(0u8).take(result_len));
    BibFields {
        result_index,
        result_len,
    }
}

/// Write a computed result into its slot.
pub fn patch_result(header: &mut [u8], fields: &BibFields, result: u64) {
    let bytes = result.to_be_bytes();
    let src = &bytes[bytes.len() - fields.result_len..];
    header[fields.result_index..fields.result_index + fields.result_len].copy_from_slice(src);
}

/// Parse a BIB body (the type byte has already been consumed).
pub fn read(reader: &mut Reader<'_>, flags: &mut ConditionFlags) -> Result<BibBlock> {
    let _blk_flags = reader.sdnv(flags)?;
    let _blklen = reader.sdnv(flags)?;
    let suite = CipherSuite::from_id(reader.sdnv(flags)?)?;
    let result_len = reader.sdnv(flags)? as usize;
    if result_len != suite.result_len() {
        return Err(BpError::Parse("integrity result length"));
    }
    let mut result: u64 = 0;
    for &b in reader.bytes(result_len)? {
        result = (result << 8) | u64::from(b);
    }
    Ok(BibBlock { suite, result })
}
