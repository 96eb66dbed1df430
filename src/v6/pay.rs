// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Payload block. Outbound headers carry only the block header; the payload
// bytes themselves follow the header in storage and on the wire. The length
// field uses a fixed width so each send can stamp the actual payload size.

use super::{put_fixed, Reader, BLK_LAST_BLOCK, PAY_BLK_TYPE};
use crate::error::{BpError, Result};
use crate::flags::ConditionFlags;
use crate::sdnv::SdnvField;

const BLK_FLAGS_WIDTH: usize = 1;
const PAYLEN_WIDTH: usize = 4;

/// Serialize a payload block header onto `out`, returning the position of
/// the length field for per-send patching.
pub fn write_header(out: &mut Vec<u8>, flags: &mut ConditionFlags) -> SdnvField {
    out.push(PAY_BLK_TYPE);
    put_fixed(out, BLK_LAST_BLOCK, BLK_FLAGS_WIDTH, flags);
    put_fixed(out, 0, PAYLEN_WIDTH, flags)
}

/// Parse a payload block body (the type byte has already been consumed)
/// and return the payload bytes.
pub fn read<'a>(reader: &mut Reader<'a>, flags: &mut ConditionFlags) -> Result<&'a [u8]> {
    let _blk_flags = reader.sdnv(flags)?;
    let paylen = reader.sdnv(flags)? as usize;
    if paylen > reader.remaining() {
        return Err(BpError::Parse("payload length exceeds bundle"));
    }
    reader.bytes(paylen)
}
