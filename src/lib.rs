// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Bundle Protocol version 6 (RFC 5050) store-and-forward channel engine.
//
// A channel accepts application payloads, encapsulates them as bundles with
// routing, lifetime, custody, and integrity metadata, persists them through
// a pluggable storage service, and emits them toward a next hop. Custody
// transfer is acknowledged with aggregate custody signals: received custody
// IDs collapse into compact fill/gap records, and incoming records release
// the in-flight bundles they cover.
//
// The usual deployment runs one thread per data-plane direction:
//
//   let store = Arc::new(RamStore::default());
//   let ch = Channel::open(route, store, Attributes::default())?;
//   ch.store(payload, PEND, &mut flags)?;        // application ingress
//   let wire = ch.load(PEND, &mut flags)?;       // transport egress
//   ch.process(&incoming, PEND, &mut flags)?;    // transport ingress
//   let payload = ch.accept(PEND, &mut flags)?;  // application egress

pub mod active_table;
pub mod bundle;
pub mod channel;
mod clock;
pub mod crc;
pub mod dacs;
pub mod eid;
mod error;
mod flags;
pub mod rh_hash;
pub mod sdnv;
pub mod storage;
pub mod v6;

pub use active_table::{ActiveBundle, ActiveTable};
pub use bundle::{BundleData, BundleOptions, Custodian, Reception, BUNDLE_HDR_BUF_SIZE};
pub use channel::{
    routeinfo, Attributes, Channel, ChannelOpt, Options, ProcessOutcome, RetransmitOrder, Route,
    Stats, WrapResponse, WRAP_TIMEOUT,
};
pub use dacs::{decode_record, CidTree, DacsAggregator, Insert, ACS_REC_TYPE, MAX_FILL};
pub use eid::{eid2ipn, ipn2eid, MAX_EID_STRING};
pub use error::{BpError, Result};
pub use flags::ConditionFlags;
pub use rh_hash::{hash_key, IndexError, RhHash};
pub use sdnv::SdnvField;
pub use storage::{
    RamStore, Sid, StorageObject, StorageService, StoreHandle, Timeout, CHECK, PEND, SID_VACANT,
};
pub use v6::bib::CipherSuite;
pub use v6::BP_VERSION;
