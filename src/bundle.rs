// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Outbound bundle template and inbound bundle classification.
//
// A channel keeps one prebuilt header per template: primary block, optional
// custody block, optional integrity block, and the payload block header,
// all with fixed-width numeric fields. Each send patches the creation
// timestamp/sequence, payload length, and integrity result in place, then
// hands storage a metadata prefix plus the header while the payload rides
// as the second buffer. Inbound bundles walk the block sequence once and
// come back as an expired verdict, an administrative record, or a payload
// with optional custody to acknowledge.

use crate::channel::Route;
use crate::clock;
use crate::eid;
use crate::error::{BpError, Result};
use crate::flags::ConditionFlags;
use crate::sdnv::SdnvField;
use crate::storage::{Sid, StorageService, StoreHandle, Timeout};
use crate::v6::bib::{self, BibFields, CipherSuite};
use crate::v6::pay;
use crate::v6::pri::{self, PriBlock, PriFields};
use crate::v6::{
    cteb, Reader, BIB_BLK_TYPE, CTEB_BLK_TYPE, PAY_BLK_TYPE, PCF_ADMIN_RECORD,
    PCF_CUSTODY_REQUEST, PCF_NO_FRAGMENT, PCF_SINGLETON,
};

/// Largest header prefix a serialized bundle may carry.
pub const BUNDLE_HDR_BUF_SIZE: usize = 128;

/// Byte length of the fixed metadata prefix stored ahead of the header.
const STORED_PREFIX_LEN: usize = 44;

// ---------------------------------------------------------------------------
// BundleData — the serialized bundle and its cached geometry
// ---------------------------------------------------------------------------

/// A serialized bundle header plus the auxiliary fields the data plane
/// needs without re-parsing: expiration time, the custody ID field
/// descriptor, and the block offsets. `cteboffset == 0` means the bundle
/// does not request custody.
#[derive(Debug, Clone)]
pub struct BundleData {
    pub exprtime: u64,
    pub cidsdnv: SdnvField,
    pub cteboffset: usize,
    pub biboffset: usize,
    pub payoffset: usize,
    pub headersize: usize,
    pub bundlesize: usize,
    pub header: [u8; BUNDLE_HDR_BUF_SIZE],
}

impl Default for BundleData {
    fn default() -> Self {
        Self {
            exprtime: 0,
            cidsdnv: SdnvField::default(),
            cteboffset: 0,
            biboffset: 0,
            payoffset: 0,
            headersize: 0,
            bundlesize: 0,
            header: [0; BUNDLE_HDR_BUF_SIZE],
        }
    }
}

impl BundleData {
    /// Whether this bundle is custody tracked.
    pub fn request_custody(&self) -> bool {
        self.cteboffset != 0
    }

    /// Serialize the metadata prefix and header for storage. The payload is
    /// enqueued as the storage service's second buffer, so a stored object
    /// is `prefix ++ header ++ payload`.
    pub fn to_stored(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(STORED_PREFIX_LEN + self.headersize);
        out.extend_from_slice(&self.exprtime.to_le_bytes());
        out.extend_from_slice(&self.cidsdnv.value.to_le_bytes());
        for v in [
            self.cidsdnv.index,
            self.cidsdnv.width,
            self.cteboffset,
            self.biboffset,
            self.payoffset,
            self.headersize,
            self.bundlesize,
        ] {
            out.extend_from_slice(&(v as u32).to_le_bytes());
        }
        out.extend_from_slice(&self.header[..self.headersize]);
        out
    }

    /// Rebuild from a stored object, returning the payload tail.
    pub fn from_stored(bytes: &[u8]) -> Result<(BundleData, &[u8])> {
        if bytes.len() < STORED_PREFIX_LEN {
            return Err(BpError::StoreFailed);
        }
        let u64_at = |i: usize| u64::from_le_bytes(bytes[i..i + 8].try_into().unwrap());
        let u32_at = |i: usize| u32::from_le_bytes(bytes[i..i + 4].try_into().unwrap()) as usize;

        let mut data = BundleData {
            exprtime: u64_at(0),
            cidsdnv: SdnvField {
                value: u64_at(8),
                index: u32_at(16),
                width: u32_at(20),
            },
            cteboffset: u32_at(24),
            biboffset: u32_at(28),
            payoffset: u32_at(32),
            headersize: u32_at(36),
            bundlesize: u32_at(40),
            ..Default::default()
        };
        if data.headersize > BUNDLE_HDR_BUF_SIZE
            || bytes.len() < STORED_PREFIX_LEN + data.headersize
        {
            return Err(BpError::StoreFailed);
        }
        let (header, payload) = bytes[STORED_PREFIX_LEN..].split_at(data.headersize);
        data.header[..data.headersize].copy_from_slice(header);
        if data.bundlesize != data.headersize + payload.len() {
            return Err(BpError::StoreFailed);
        }
        Ok((data, payload))
    }

    /// Concatenate header and payload into one wire-ready buffer.
    pub fn assemble(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.headersize + payload.len());
        out.extend_from_slice(&self.header[..self.headersize]);
        out.extend_from_slice(payload);
        out
    }
}

/// Rewrite the custody ID of a serialized bundle in place. The header
/// length never changes; the CID field keeps its recorded width.
pub fn update(data: &mut BundleData, cid: u64, flags: &mut ConditionFlags) -> Result<()> {
    if !data.request_custody() {
        return Err(BpError::Parm("bundle does not request custody"));
    }
    data.cidsdnv.value = cid;
    data.cidsdnv.write(&mut data.header, flags);
    Ok(())
}

// ---------------------------------------------------------------------------
// Outbound template
// ---------------------------------------------------------------------------

/// Dynamic options shaping generated bundles.
#[derive(Debug, Clone, Copy)]
pub struct BundleOptions {
    pub lifetime: u64,
    pub request_custody: bool,
    pub admin_record: bool,
    pub integrity_check: bool,
    pub allow_fragmentation: bool,
    pub cipher_suite: CipherSuite,
    pub max_length: usize,
}

/// Prebuilt outbound bundle, rebuilt only when a shape option changes.
pub struct BundleTemplate {
    route: Route,
    pub options: BundleOptions,
    data: BundleData,
    pri_fields: PriFields,
    bib_fields: Option<BibFields>,
    pay_length: SdnvField,
    createseq: u64,
    prebuilt: bool,
}

impl BundleTemplate {
    pub fn new(route: Route, options: BundleOptions, flags: &mut ConditionFlags) -> Result<Self> {
        let mut template = Self {
            route,
            options,
            data: BundleData::default(),
            pri_fields: PriFields::default(),
            bib_fields: None,
            pay_length: SdnvField::default(),
            createseq: 0,
            prebuilt: false,
        };
        template.build(flags)?;
        Ok(template)
    }

    /// Force a header rebuild before the next send.
    pub fn invalidate(&mut self) {
        self.prebuilt = false;
    }

    /// Serialize `payload` as a bundle and enqueue it on `handle`.
    ///
    /// With `set_time`, the creation timestamp is stamped with the current
    /// clock and the sequence number advances; without it the previous
    /// stamp is reused (administrative retransmissions).
    pub fn send(
        &mut self,
        payload: &[u8],
        set_time: bool,
        store: &dyn StorageService,
        handle: StoreHandle,
        timeout: Timeout,
        flags: &mut ConditionFlags,
    ) -> Result<Sid> {
        if payload.is_empty() {
            return Err(BpError::Parm("empty payload"));
        }
        if !self.prebuilt {
            self.build(flags)?;
        }

        let total = self.data.headersize + payload.len();
        if total > self.options.max_length {
            return Err(BpError::BundleTooLarge {
                size: total,
                max: self.options.max_length,
            });
        }

        if set_time {
            self.pri_fields.createsec.value = clock::now_secs(flags);
            self.pri_fields.createsec.write(&mut self.data.header, flags);
            self.pri_fields.createseq.value = self.createseq;
            self.pri_fields.createseq.write(&mut self.data.header, flags);
            self.createseq += 1;
        }
        let createsec = self.pri_fields.createsec.value;
        self.data.exprtime = if createsec == 0 {
            0
        } else {
            createsec.saturating_add(self.options.lifetime)
        };

        self.pay_length.value = payload.len() as u64;
        self.pay_length.write(&mut self.data.header, flags);

        if let Some(fields) = &self.bib_fields {
            let result = self.options.cipher_suite.compute(payload);
            bib::patch_result(&mut self.data.header, fields, result);
        }

        self.data.bundlesize = total;
        let prefix = self.data.to_stored();
        store.enqueue(handle, &prefix, payload, timeout)
    }

    fn build(&mut self, flags: &mut ConditionFlags) -> Result<()> {
        // Administrative records never themselves request custody.
        let custody = self.options.request_custody && !self.options.admin_record;

        let mut pcf = PCF_SINGLETON;
        if custody {
            pcf |= PCF_CUSTODY_REQUEST;
        }
        if self.options.admin_record {
            pcf |= PCF_ADMIN_RECORD;
        }
        if !self.options.allow_fragmentation {
            pcf |= PCF_NO_FRAGMENT;
        }

        let pri = PriBlock {
            pcf,
            dstnode: self.route.destination_node,
            dstserv: self.route.destination_service,
            srcnode: self.route.local_node,
            srcserv: self.route.local_service,
            rptnode: self.route.report_node,
            rptserv: self.route.report_service,
            cstnode: self.route.local_node,
            cstserv: self.route.local_service,
            createsec: 0,
            createseq: 0,
            lifetime: self.options.lifetime,
            ..Default::default()
        };

        let mut hdr = Vec::with_capacity(BUNDLE_HDR_BUF_SIZE);
        self.pri_fields = pri::write(&mut hdr, &pri, flags);

        self.data.cteboffset = 0;
        self.data.cidsdnv = SdnvField::default();
        if custody {
            let custodian = eid::ipn2eid(self.route.local_node, self.route.local_service)?;
            self.data.cteboffset = hdr.len();
            self.data.cidsdnv = cteb::write(&mut hdr, 0, &custodian, flags);
        }

        self.bib_fields = None;
        self.data.biboffset = 0;
        if self.options.integrity_check {
            self.data.biboffset = hdr.len();
            self.bib_fields = Some(bib::write(&mut hdr, self.options.cipher_suite, flags));
        }

        self.data.payoffset = hdr.len();
        self.pay_length = pay::write_header(&mut hdr, flags);

        if hdr.len() > BUNDLE_HDR_BUF_SIZE {
            return Err(BpError::BundleTooLarge {
                size: hdr.len(),
                max: BUNDLE_HDR_BUF_SIZE,
            });
        }
        self.data.header[..hdr.len()].copy_from_slice(&hdr);
        self.data.headersize = hdr.len();
        self.prebuilt = true;
        Ok(())
    }
}

/// Build a one-shot administrative-record bundle (used for custody
/// signals): primary block + payload block, no custody, no integrity.
pub fn build_admin_record_bundle(
    source: &Route,
    destination: (u64, u64),
    lifetime: u64,
    record: &[u8],
    sysnow: u64,
    flags: &mut ConditionFlags,
) -> Result<(BundleData, Vec<u8>)> {
    let pri = PriBlock {
        pcf: PCF_SINGLETON | PCF_ADMIN_RECORD | PCF_NO_FRAGMENT,
        dstnode: destination.0,
        dstserv: destination.1,
        srcnode: source.local_node,
        srcserv: source.local_service,
        rptnode: source.report_node,
        rptserv: source.report_service,
        cstnode: source.local_node,
        cstserv: source.local_service,
        createsec: sysnow,
        createseq: 0,
        lifetime,
        ..Default::default()
    };

    let mut hdr = Vec::with_capacity(BUNDLE_HDR_BUF_SIZE);
    pri::write(&mut hdr, &pri, flags);
    let mut data = BundleData::default();
    data.payoffset = hdr.len();
    let mut pay_length = pay::write_header(&mut hdr, flags);
    if hdr.len() > BUNDLE_HDR_BUF_SIZE {
        return Err(BpError::BundleTooLarge {
            size: hdr.len(),
            max: BUNDLE_HDR_BUF_SIZE,
        });
    }
    data.header[..hdr.len()].copy_from_slice(&hdr);
    data.headersize = hdr.len();
    pay_length.value = record.len() as u64;
    pay_length.write(&mut data.header, flags);
    data.exprtime = if sysnow == 0 {
        0
    } else {
        sysnow.saturating_add(lifetime)
    };
    data.bundlesize = data.headersize + record.len();
    Ok((data, record.to_vec()))
}

// ---------------------------------------------------------------------------
// Inbound classification
// ---------------------------------------------------------------------------

/// The custodian a received bundle wants acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Custodian {
    pub node: u64,
    pub service: u64,
    pub cid: u64,
}

/// What a received bundle turned out to be.
#[derive(Debug)]
pub enum Reception {
    /// An administrative record destined to this node; the record bytes
    /// are returned uninterpreted.
    AdminRecord(Vec<u8>),
    /// An application payload, with custody to acknowledge when the sender
    /// asked for it.
    Payload {
        payload: Vec<u8>,
        custody: Option<Custodian>,
    },
}

/// Parse and classify an inbound bundle.
pub fn receive(
    route: &Route,
    buf: &[u8],
    sysnow: u64,
    flags: &mut ConditionFlags,
) -> Result<Reception> {
    let mut reader = Reader::new(buf);
    let pri = pri::read(&mut reader, flags)?;

    if pri.is_fragment() {
        *flags |= ConditionFlags::NONCOMPLIANT;
        return Err(BpError::Unsupported("fragment reassembly"));
    }
    let exprtime = pri.exprtime();
    if exprtime != 0 && sysnow >= exprtime {
        return Err(BpError::Expired);
    }
    if pri.dstnode != route.local_node || pri.dstserv != route.local_service {
        return Err(BpError::PendingForward);
    }

    let mut custodian = None;
    let mut integrity = None;
    let mut payload = None;
    while reader.remaining() > 0 {
        let blk_type = reader.u8()?;
        match blk_type {
            CTEB_BLK_TYPE => custodian = Some(cteb::read(&mut reader, flags)?),
            BIB_BLK_TYPE => integrity = Some(bib::read(&mut reader, flags)?),
            PAY_BLK_TYPE => {
                payload = Some(pay::read(&mut reader, flags)?);
                break;
            }
            other => {
                // Unrecognized block: skip its body, remember the gap.
                *flags |= ConditionFlags::INCOMPLETE;
                let _blk_flags = reader.sdnv(flags)?;
                let len = reader.sdnv(flags)? as usize;
                reader.skip(len)?;
                log::debug!("skipped unrecognized block type {other}");
            }
        }
    }
    let payload = payload.ok_or(BpError::Parse("missing payload block"))?;

    if let Some(bib) = integrity {
        bib.verify(payload)?;
    }

    if pri.is_admin_record() {
        return Ok(Reception::AdminRecord(payload.to_vec()));
    }

    let custody = match (pri.request_custody(), custodian) {
        (true, Some(blk)) => Some(Custodian {
            node: blk.custodian_node,
            service: blk.custodian_service,
            cid: blk.cid.value,
        }),
        (true, None) => {
            // Custody requested without a custody block: deliver the
            // payload but there is nobody to acknowledge.
            *flags |= ConditionFlags::NONCOMPLIANT;
            None
        }
        _ => None,
    };

    Ok(Reception::Payload {
        payload: payload.to_vec(),
        custody,
    })
}
