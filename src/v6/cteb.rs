// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Custody Transfer Enhancement Block: the custody ID of the bundle and the
// EID of its current custodian. The CID rides in a fixed-width SDNV so the
// channel can stamp it at transmission time without reshaping the header.

use super::{put_fixed, Reader, CTEB_BLK_TYPE};
use crate::eid;
use crate::error::{BpError, Result};
use crate::flags::ConditionFlags;
use crate::sdnv::SdnvField;

const BLK_FLAGS_WIDTH: usize = 1;
const BLKLEN_WIDTH: usize = 2;
const CID_WIDTH: usize = 5;

/// Decoded CTEB.
#[derive(Debug, Clone)]
pub struct CtebBlock {
    pub cid: SdnvField,
    pub custodian_node: u64,
    pub custodian_service: u64,
}

/// Serialize a CTEB onto `out`, returning the CID field position.
pub fn write(
    out: &mut Vec<u8>,
    cid: u64,
    custodian: &str,
    flags: &mut ConditionFlags,
) -> SdnvField {
    out.push(CTEB_BLK_TYPE);
    put_fixed(out, 0, BLK_FLAGS_WIDTH, flags);
    put_fixed(out, (CID_WIDTH + custodian.len()) as u64, BLKLEN_WIDTH, flags);
    let cid = put_fixed(out, cid, CID_WIDTH, flags);
    out.extend_from_slice(custodian.as_bytes());
    cid
}

/// Parse a CTEB body (the type byte has already been consumed).
pub fn read(reader: &mut Reader<'_>, flags: &mut ConditionFlags) -> Result<CtebBlock> {
    let _blk_flags = reader.sdnv(flags)?;
    let blklen = reader.sdnv(flags)? as usize;
    let body_start = reader.pos();

    let cid = reader.sdnv_field(flags)?;
    let eid_len = blklen
        .checked_sub(reader.pos() - body_start)
        .ok_or(BpError::Parse("custody block length"))?;
    let eid_bytes = reader.bytes(eid_len)?;
    let eid_str =
        std::str::from_utf8(eid_bytes).map_err(|_| BpError::InvalidEid("not valid UTF-8"))?;
    let (custodian_node, custodian_service) = eid::eid2ipn(eid_str)?;

    Ok(CtebBlock {
        cid,
        custodian_node,
        custodian_service,
    })
}
