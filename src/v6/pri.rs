// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Primary block: version byte, processing control flags, block length, the
// four CBHE endpoint pairs (destination, source, report-to, custodian),
// creation timestamp + sequence, lifetime, and an empty dictionary.

use super::{put_fixed, Reader, BP_VERSION, PCF_ADMIN_RECORD, PCF_CUSTODY_REQUEST, PCF_FRAGMENT};
use crate::error::{BpError, Result};
use crate::flags::ConditionFlags;
use crate::sdnv::SdnvField;

// Fixed widths used for outbound headers.
const PCF_WIDTH: usize = 2;
const BLKLEN_WIDTH: usize = 2;
const EID_WIDTH: usize = 5;
const CREATESEC_WIDTH: usize = 6;
const CREATESEQ_WIDTH: usize = 4;
const LIFETIME_WIDTH: usize = 4;
const DICTLEN_WIDTH: usize = 1;

/// Byte count of the primary block past its block-length field (no
/// fragment fields; this agent never originates fragments).
const BODY_LEN: u64 =
    (8 * EID_WIDTH + CREATESEC_WIDTH + CREATESEQ_WIDTH + LIFETIME_WIDTH + DICTLEN_WIDTH) as u64;

/// Decoded primary block.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriBlock {
    pub pcf: u64,
    pub dstnode: u64,
    pub dstserv: u64,
    pub srcnode: u64,
    pub srcserv: u64,
    pub rptnode: u64,
    pub rptserv: u64,
    pub cstnode: u64,
    pub cstserv: u64,
    pub createsec: u64,
    pub createseq: u64,
    pub lifetime: u64,
    pub fragoffset: u64,
    pub adulen: u64,
}

impl PriBlock {
    pub fn is_admin_record(&self) -> bool {
        self.pcf & PCF_ADMIN_RECORD != 0
    }

    pub fn is_fragment(&self) -> bool {
        self.pcf & PCF_FRAGMENT != 0
    }

    pub fn request_custody(&self) -> bool {
        self.pcf & PCF_CUSTODY_REQUEST != 0
    }

    /// Absolute expiration time; 0 when the creation time was unusable.
    pub fn exprtime(&self) -> u64 {
        if self.createsec == 0 {
            0
        } else {
            self.createsec.saturating_add(self.lifetime)
        }
    }
}

/// Patchable field positions inside a written primary block.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriFields {
    pub createsec: SdnvField,
    pub createseq: SdnvField,
}

/// Serialize `pri` onto `out`, returning the patchable field positions.
pub fn write(out: &mut Vec<u8>, pri: &PriBlock, flags: &mut ConditionFlags) -> PriFields {
    out.push(BP_VERSION);
    put_fixed(out, pri.pcf, PCF_WIDTH, flags);
    put_fixed(out, BODY_LEN, BLKLEN_WIDTH, flags);
    for value in [
        pri.dstnode,
        pri.dstserv,
        pri.srcnode,
        pri.srcserv,
        pri.rptnode,
        pri.rptserv,
        pri.cstnode,
        pri.cstserv,
    ] {
        put_fixed(out, value, EID_WIDTH, flags);
    }
    let createsec = put_fixed(out, pri.createsec, CREATESEC_WIDTH, flags);
    let createseq = put_fixed(out, pri.createseq, CREATESEQ_WIDTH, flags);
    put_fixed(out, pri.lifetime, LIFETIME_WIDTH, flags);
    put_fixed(out, 0, DICTLEN_WIDTH, flags);
    PriFields {
        createsec,
        createseq,
    }
}

/// Parse a primary block from the front of `reader`.
pub fn read(reader: &mut Reader<'_>, flags: &mut ConditionFlags) -> Result<PriBlock> {
    let version = reader.u8()?;
    if version != BP_VERSION {
        return Err(BpError::WrongVersion(version));
    }

    let mut pri = PriBlock {
        pcf: reader.sdnv(flags)?,
        ..Default::default()
    };
    let _blklen = reader.sdnv(flags)?;
    pri.dstnode = reader.sdnv(flags)?;
    pri.dstserv = reader.sdnv(flags)?;
    pri.srcnode = reader.sdnv(flags)?;
    pri.srcserv = reader.sdnv(flags)?;
    pri.rptnode = reader.sdnv(flags)?;
    pri.rptserv = reader.sdnv(flags)?;
    pri.cstnode = reader.sdnv(flags)?;
    pri.cstserv = reader.sdnv(flags)?;
    pri.createsec = reader.sdnv(flags)?;
    pri.createseq = reader.sdnv(flags)?;
    pri.lifetime = reader.sdnv(flags)?;

    let dictlen = reader.sdnv(flags)?;
    if dictlen != 0 {
        // Dictionary-based EIDs are outside the CBHE profile this agent
        // implements.
        *flags |= ConditionFlags::NONCOMPLIANT;
        return Err(BpError::Unsupported("non-empty dictionary"));
    }

    if pri.is_fragment() {
        pri.fragoffset = reader.sdnv(flags)?;
        pri.adulen = reader.sdnv(flags)?;
    }

    Ok(pri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v6::PCF_SINGLETON;

    #[test]
    fn write_read_roundtrip() {
        let mut flags = ConditionFlags::empty();
        let pri = PriBlock {
            pcf: PCF_CUSTODY_REQUEST | PCF_SINGLETON,
            dstnode: 8,
            dstserv: 1,
            srcnode: 42,
            srcserv: 7,
            rptnode: 42,
            rptserv: 7,
            cstnode: 42,
            cstserv: 7,
            createsec: 1_700_000_000,
            createseq: 3,
            lifetime: 86_400,
            ..Default::default()
        };
        let mut buf = Vec::new();
        let fields = write(&mut buf, &pri, &mut flags);
        assert!(flags.is_empty());

        let mut reader = Reader::new(&buf);
        let back = read(&mut reader, &mut flags).unwrap();
        assert_eq!(reader.remaining(), 0);
        assert_eq!(back.dstnode, 8);
        assert_eq!(back.srcserv, 7);
        assert_eq!(back.createsec, 1_700_000_000);
        assert_eq!(back.createseq, 3);
        assert_eq!(back.lifetime, 86_400);
        assert!(back.request_custody());
        assert!(!back.is_admin_record());

        // Creation fields patch in place without moving the header.
        let mut patched = fields.createsec;
        patched.value = 1_700_000_010;
        patched.write(&mut buf, &mut flags);
        let mut reader = Reader::new(&buf);
        let back = read(&mut reader, &mut flags).unwrap();
        assert_eq!(back.createsec, 1_700_000_010);
        assert!(flags.is_empty());
    }

    #[test]
    fn wrong_version_rejected() {
        let mut flags = ConditionFlags::empty();
        let mut reader = Reader::new(&[7, 0, 0]);
        assert!(matches!(
            read(&mut reader, &mut flags),
            Err(BpError::WrongVersion(7))
        ));
    }
}
