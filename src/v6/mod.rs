// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// RFC 5050 (Bundle Protocol version 6) block codecs. Addressing is CBHE:
// node and service numbers ride as SDNV offsets and the dictionary is empty.
//
// Outbound headers encode every per-send field with a fixed SDNV width so
// the creation timestamp, payload length, and custody ID can be patched in
// place without shifting the rest of the header.

pub mod bib;
pub mod cteb;
pub mod pay;
pub mod pri;

use crate::error::{BpError, Result};
use crate::flags::ConditionFlags;
use crate::sdnv::{self, SdnvField};

/// Protocol version this agent speaks.
pub const BP_VERSION: u8 = 6;

/// Payload block type.
pub const PAY_BLK_TYPE: u8 = 1;
/// Custody Transfer Enhancement Block type.
pub const CTEB_BLK_TYPE: u8 = 10;
/// Bundle Integrity Block type.
pub const BIB_BLK_TYPE: u8 = 13;

// Primary block processing control flags.
pub const PCF_FRAGMENT: u64 = 0x0001;
pub const PCF_ADMIN_RECORD: u64 = 0x0002;
pub const PCF_NO_FRAGMENT: u64 = 0x0004;
pub const PCF_CUSTODY_REQUEST: u64 = 0x0008;
pub const PCF_SINGLETON: u64 = 0x0010;

// Canonical block processing flags.
pub const BLK_LAST_BLOCK: u64 = 0x08;

/// Bounds-checked cursor over an inbound bundle.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn u8(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(BpError::Parse("block truncated"))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(BpError::Parse("block truncated"));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.bytes(len).map(|_| ())
    }

    /// Decode one SDNV. Numeric overflow is a soft condition; running out
    /// of buffer is a parse error.
    pub fn sdnv(&mut self, flags: &mut ConditionFlags) -> Result<u64> {
        Ok(self.sdnv_field(flags)?.value)
    }

    /// Decode one SDNV, keeping its absolute position for later rewrite.
    pub fn sdnv_field(&mut self, flags: &mut ConditionFlags) -> Result<SdnvField> {
        let mut local = ConditionFlags::empty();
        let (field, next) = SdnvField::read(self.buf, self.pos, &mut local);
        if local.contains(ConditionFlags::SDNV_INCOMPLETE) {
            *flags |= local;
            return Err(BpError::Parse("truncated numeric value"));
        }
        *flags |= local;
        self.pos = next;
        Ok(field)
    }
}

/// Append a fixed-width SDNV, returning its field descriptor.
pub(crate) fn put_fixed(
    out: &mut Vec<u8>,
    value: u64,
    width: usize,
    flags: &mut ConditionFlags,
) -> SdnvField {
    let index = out.len();
    sdnv::encode_fixed_into(out, value, width, flags);
    SdnvField {
        value,
        index,
        width,
    }
}
