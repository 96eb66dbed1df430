// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The channel: one outbound bundle template, one custody-signal aggregator,
// one active table, and three storage queues (outbound bundles, inbound
// payloads, outbound custody signals) behind a thread-safe data plane.
//
// Lock layout, per channel:
//   - outbound template + its options  (store, option access)
//   - inbound payload enqueue order    (process)
//   - custody-signal aggregator        (load tick, process acknowledge)
//   - active table + CID counters      (load, process acks) + wrap condvar
//
// A channel never sleeps holding the aggregator lock; the only in-lock
// waits are the bounded wrap waits on the active-table condvar, which
// acknowledgments arriving through `process` cut short.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::active_table::{ActiveBundle, ActiveTable};
use crate::bundle::{self, BundleData, BundleOptions, BundleTemplate, Reception};
use crate::clock;
use crate::dacs::{self, DacsAggregator};
use crate::error::{BpError, Result};
use crate::flags::ConditionFlags;
use crate::storage::{Sid, StorageService, StoreHandle, Timeout, CHECK};
use crate::v6::bib::CipherSuite;
use crate::v6::{pri, Reader, BP_VERSION};

/// Bounded wait applied when the active table wraps.
pub const WRAP_TIMEOUT: Duration = Duration::from_millis(1000);

// ---------------------------------------------------------------------------
// Configuration types
// ---------------------------------------------------------------------------

/// Channel addressing: who we are, where bundles go, who gets reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub local_node: u64,
    pub local_service: u64,
    pub destination_node: u64,
    pub destination_service: u64,
    pub report_node: u64,
    pub report_service: u64,
}

/// Behavior when a new custody ID would land on an occupied slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapResponse {
    /// Retransmit the occupying bundle under a fresh custody ID.
    #[default]
    Resend,
    /// Report the table full after a bounded wait; callers retry.
    Block,
    /// Drop the occupying bundle and move on.
    Drop,
}

/// Which timed-out bundle is retransmitted first. Only the oldest-bundle
/// order is implemented; smallest-CID is a recognized but unsupported
/// variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetransmitOrder {
    #[default]
    OldestBundle,
    SmallestCid,
}

/// Channel attributes fixed at `open` (plus initial values for the
/// dynamic options).
#[derive(Debug, Clone, Copy)]
pub struct Attributes {
    /// Seconds from creation until a generated bundle expires.
    pub lifetime: u64,
    pub request_custody: bool,
    pub admin_record: bool,
    pub integrity_check: bool,
    pub allow_fragmentation: bool,
    pub cipher_suite: CipherSuite,
    /// Retransmission timeout in seconds; 0 disables retransmission.
    pub timeout: u64,
    /// Maximum serialized bundle size in bytes.
    pub max_length: usize,
    /// Reuse the custody ID (and slot) when retransmitting.
    pub cid_reuse: bool,
    /// Seconds between custody-signal emissions per custodian.
    pub dacs_rate: u64,
    pub protocol_version: u8,
    pub retransmit_order: RetransmitOrder,
    /// Number of in-flight custody-tracked bundles to index.
    pub active_table_size: usize,
    pub max_concurrent_dacs: usize,
    pub max_fills_per_dacs: usize,
    pub max_gaps_per_dacs: usize,
    pub wrap_response: WrapResponse,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            lifetime: 86_400,
            request_custody: true,
            admin_record: false,
            integrity_check: true,
            allow_fragmentation: false,
            cipher_suite: CipherSuite::Crc16X25,
            timeout: 10,
            max_length: 4096,
            cid_reuse: false,
            dacs_rate: 5,
            protocol_version: BP_VERSION,
            retransmit_order: RetransmitOrder::OldestBundle,
            active_table_size: 16_384,
            max_concurrent_dacs: 4,
            max_fills_per_dacs: 64,
            max_gaps_per_dacs: 1028,
            wrap_response: WrapResponse::Resend,
        }
    }
}

/// One dynamic option write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOpt {
    Lifetime(u64),
    RequestCustody(bool),
    AdminRecord(bool),
    IntegrityCheck(bool),
    AllowFragmentation(bool),
    CipherSuite(CipherSuite),
    Timeout(u64),
    MaxLength(usize),
    CidReuse(bool),
    DacsRate(u64),
}

/// Snapshot of the dynamic options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub lifetime: u64,
    pub request_custody: bool,
    pub admin_record: bool,
    pub integrity_check: bool,
    pub allow_fragmentation: bool,
    pub cipher_suite: CipherSuite,
    pub timeout: u64,
    pub max_length: usize,
    pub cid_reuse: bool,
    pub dacs_rate: u64,
}

/// What `process` did with an inbound bundle, mirroring the distinct
/// statuses the data plane reports beyond plain success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// A payload was queued for `accept`; no custody transfer was involved.
    Delivered,
    /// A payload was queued for `accept` and its custody transfer was
    /// folded into the aggregator, pending acknowledgment to the custodian.
    PendingAcknowledgment,
    /// An aggregate custody signal released this many in-flight bundles.
    Acknowledged(u32),
}

/// Channel statistics snapshot. `bundles`, `payloads`, `records`, and
/// `active` are latched from live sources; the rest are monotonic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub lost: u32,
    pub expired: u32,
    pub acknowledged: u32,
    pub transmitted: u32,
    pub retransmitted: u32,
    pub received: u32,
    pub generated: u32,
    pub delivered: u32,
    pub bundles: u32,
    pub payloads: u32,
    pub records: u32,
    pub active: u32,
}

#[derive(Default)]
struct StatsCell {
    lost: AtomicU32,
    expired: AtomicU32,
    acknowledged: AtomicU32,
    transmitted: AtomicU32,
    retransmitted: AtomicU32,
    received: AtomicU32,
    generated: AtomicU32,
    delivered: AtomicU32,
    bundles: AtomicU32,
    payloads: AtomicU32,
    records: AtomicU32,
    active: AtomicU32,
}

impl StatsCell {
    fn snapshot(&self) -> Stats {
        Stats {
            lost: self.lost.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            transmitted: self.transmitted.load(Ordering::Relaxed),
            retransmitted: self.retransmitted.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            generated: self.generated.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            bundles: self.bundles.load(Ordering::Relaxed),
            payloads: self.payloads.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

struct ActiveState {
    table: ActiveTable,
    oldest_cid: u64,
    current_cid: u64,
}

/// A selected outbound bundle on its way to the caller.
struct Candidate {
    data: BundleData,
    payload: Vec<u8>,
    sid: Sid,
    handle: StoreHandle,
    newcid: bool,
    reuse_cid: Option<u64>,
}

/// A BPv6 channel. Thread-safe: one thread may call `store`/`accept`,
/// another `load`, another `process`, concurrently.
pub struct Channel {
    attributes: Attributes,
    route: Route,
    store: Arc<dyn StorageService>,
    bundle_handle: StoreHandle,
    payload_handle: StoreHandle,
    dacs_handle: StoreHandle,
    outbound: Mutex<BundleTemplate>,
    inbound: Mutex<()>,
    dacs: Mutex<DacsAggregator>,
    active: Mutex<ActiveState>,
    active_signal: Condvar,
    stats: StatsCell,
    timeout: AtomicU64,
    cid_reuse: AtomicBool,
    dacs_rate: AtomicU64,
    closed: AtomicBool,
}

impl Channel {
    /// Open a channel over the injected storage service.
    pub fn open(
        route: Route,
        store: Arc<dyn StorageService>,
        attributes: Attributes,
    ) -> Result<Channel> {
        if attributes.protocol_version != BP_VERSION {
            return Err(BpError::Unsupported("protocol version"));
        }
        if attributes.retransmit_order == RetransmitOrder::SmallestCid {
            return Err(BpError::Unsupported("smallest-CID retransmit order"));
        }
        if attributes.active_table_size == 0 {
            return Err(BpError::Parm("active table size"));
        }
        if attributes.max_length == 0 {
            return Err(BpError::Parm("max length"));
        }

        let mut handles: Vec<StoreHandle> = Vec::with_capacity(3);
        for _ in 0..3 {
            match store.create() {
                Ok(h) => handles.push(h),
                Err(err) => {
                    for &h in &handles {
                        let _ = store.destroy(h);
                    }
                    return Err(err);
                }
            }
        }
        let (bundle_handle, payload_handle, dacs_handle) = (handles[0], handles[1], handles[2]);

        let mut flags = ConditionFlags::empty();
        let template = match BundleTemplate::new(route, bundle_options(&attributes), &mut flags) {
            Ok(t) => t,
            Err(err) => {
                for &h in &handles {
                    let _ = store.destroy(h);
                }
                return Err(err);
            }
        };

        let aggregator = DacsAggregator::new(
            route,
            attributes.max_concurrent_dacs,
            attributes.max_fills_per_dacs,
            attributes.max_gaps_per_dacs,
        );

        Ok(Channel {
            route,
            store,
            bundle_handle,
            payload_handle,
            dacs_handle,
            outbound: Mutex::new(template),
            inbound: Mutex::new(()),
            dacs: Mutex::new(aggregator),
            active: Mutex::new(ActiveState {
                table: ActiveTable::new(attributes.active_table_size),
                oldest_cid: 0,
                current_cid: 0,
            }),
            active_signal: Condvar::new(),
            stats: StatsCell::default(),
            timeout: AtomicU64::new(attributes.timeout),
            cid_reuse: AtomicBool::new(attributes.cid_reuse),
            dacs_rate: AtomicU64::new(attributes.dacs_rate),
            closed: AtomicBool::new(false),
            attributes,
        })
    }

    /// Tear the channel down, destroying its storage queues. Dropping the
    /// channel does the same.
    pub fn close(self) {}

    /// The channel's addressing.
    pub fn route(&self) -> Route {
        self.route
    }

    /// Snapshot of the dynamic options.
    pub fn options(&self) -> Options {
        let outbound = self.outbound.lock();
        Options {
            lifetime: outbound.options.lifetime,
            request_custody: outbound.options.request_custody,
            admin_record: outbound.options.admin_record,
            integrity_check: outbound.options.integrity_check,
            allow_fragmentation: outbound.options.allow_fragmentation,
            cipher_suite: outbound.options.cipher_suite,
            timeout: self.timeout.load(Ordering::Relaxed),
            max_length: outbound.options.max_length,
            cid_reuse: self.cid_reuse.load(Ordering::Relaxed),
            dacs_rate: self.dacs_rate.load(Ordering::Relaxed),
        }
    }

    /// Write one dynamic option. Writes that change the header shape
    /// invalidate the prebuilt template.
    pub fn set_opt(&self, opt: ChannelOpt) -> Result<()> {
        match opt {
            ChannelOpt::Timeout(v) => self.timeout.store(v, Ordering::Relaxed),
            ChannelOpt::CidReuse(v) => self.cid_reuse.store(v, Ordering::Relaxed),
            ChannelOpt::DacsRate(v) => self.dacs_rate.store(v, Ordering::Relaxed),
            ChannelOpt::MaxLength(v) => {
                if v == 0 {
                    return Err(BpError::Parm("max length"));
                }
                self.outbound.lock().options.max_length = v;
            }
            ChannelOpt::Lifetime(v) => {
                let mut outbound = self.outbound.lock();
                outbound.options.lifetime = v;
                outbound.invalidate();
            }
            ChannelOpt::RequestCustody(v) => {
                let mut outbound = self.outbound.lock();
                outbound.options.request_custody = v;
                outbound.invalidate();
            }
            ChannelOpt::AdminRecord(v) => {
                let mut outbound = self.outbound.lock();
                outbound.options.admin_record = v;
                outbound.invalidate();
            }
            ChannelOpt::IntegrityCheck(v) => {
                let mut outbound = self.outbound.lock();
                outbound.options.integrity_check = v;
                outbound.invalidate();
            }
            ChannelOpt::AllowFragmentation(v) => {
                let mut outbound = self.outbound.lock();
                outbound.options.allow_fragmentation = v;
                outbound.invalidate();
            }
            ChannelOpt::CipherSuite(v) => {
                let mut outbound = self.outbound.lock();
                outbound.options.cipher_suite = v;
                outbound.invalidate();
            }
        }
        Ok(())
    }

    /// Latch statistics, refreshing the live storage counts.
    pub fn latchstats(&self) -> Stats {
        self.stats.bundles.store(
            self.store.getcount(self.bundle_handle) as u32,
            Ordering::Relaxed,
        );
        self.stats.payloads.store(
            self.store.getcount(self.payload_handle) as u32,
            Ordering::Relaxed,
        );
        self.stats.records.store(
            self.store.getcount(self.dacs_handle) as u32,
            Ordering::Relaxed,
        );
        let active = {
            let guard = self.active.lock();
            (guard.current_cid - guard.oldest_cid) as u32
        };
        self.stats.active.store(active, Ordering::Relaxed);
        self.stats.snapshot()
    }

    /// Relinquish every in-flight custody-tracked bundle and reset the
    /// tracking window.
    pub fn flush(&self) {
        let mut guard = self.active.lock();
        for active in guard.table.drain() {
            let _ = self.store.relinquish(self.bundle_handle, active.sid);
        }
        guard.oldest_cid = guard.current_cid;
        self.stats.active.store(0, Ordering::Relaxed);
        self.active_signal.notify_all();
    }

    // -----------------------------------------------------------------------
    // Data plane
    // -----------------------------------------------------------------------

    /// Encapsulate an application payload and queue it for transmission.
    pub fn store(
        &self,
        payload: &[u8],
        timeout: Timeout,
        flags: &mut ConditionFlags,
    ) -> Result<()> {
        let mut outbound = self.outbound.lock();
        outbound.send(
            payload,
            true,
            self.store.as_ref(),
            self.bundle_handle,
            timeout,
            flags,
        )?;
        StatsCell::bump(&self.stats.generated);
        Ok(())
    }

    /// Produce the next bundle to transmit: a due custody signal, a
    /// timed-out retransmission, or a fresh bundle from the outbound queue.
    pub fn load(&self, timeout: Timeout, flags: &mut ConditionFlags) -> Result<Vec<u8>> {
        let sysnow = clock::now_secs(flags);
        let retx_timeout = self.timeout.load(Ordering::Relaxed);
        let cid_reuse = self.cid_reuse.load(Ordering::Relaxed);

        let mut candidate = self.load_dacs(sysnow, flags);
        if candidate.is_none() {
            candidate = self.load_retransmit(sysnow, retx_timeout, cid_reuse, flags)?;
        }
        let mut candidate = match candidate {
            Some(c) => c,
            None => self.load_dequeue(sysnow, timeout, flags)?,
        };

        // Transmit: custody-tracked bundles get their CID stamped and an
        // active-table entry; everything else leaves storage for good.
        let mut guard = self.active.lock();
        if candidate.data.request_custody() {
            let cid = match (candidate.newcid, candidate.reuse_cid) {
                (true, _) => {
                    let cid = guard.current_cid;
                    guard.table.insert(ActiveBundle {
                        sid: candidate.sid,
                        retx: sysnow,
                        cid,
                    });
                    guard.current_cid += 1;
                    cid
                }
                (false, Some(cid)) => {
                    guard.table.touch(cid, sysnow);
                    cid
                }
                (false, None) => {
                    // A custody bundle must arrive here with an assignment
                    // path; treat anything else as a lost CID.
                    return Err(BpError::CidNotFound);
                }
            };
            bundle::update(&mut candidate.data, cid, flags)?;
        } else {
            let _ = self.store.relinquish(candidate.handle, candidate.sid);
        }
        let active = (guard.current_cid - guard.oldest_cid) as u32;
        self.stats.active.store(active, Ordering::Relaxed);
        drop(guard);

        StatsCell::bump(&self.stats.transmitted);
        Ok(candidate.data.assemble(&candidate.payload))
    }

    /// Ingest a bundle arriving from the transport. The returned outcome
    /// tells the caller whether this call delivered a payload, took on a
    /// custody acknowledgment, or applied a custody signal.
    pub fn process(
        &self,
        bundle_bytes: &[u8],
        timeout: Timeout,
        flags: &mut ConditionFlags,
    ) -> Result<ProcessOutcome> {
        StatsCell::bump(&self.stats.received);
        let sysnow = clock::now_secs(flags);

        let reception = match bundle::receive(&self.route, bundle_bytes, sysnow, flags) {
            Ok(r) => r,
            Err(BpError::Expired) => {
                StatsCell::bump(&self.stats.expired);
                return Err(BpError::Expired);
            }
            Err(err) => return Err(err),
        };

        match reception {
            Reception::AdminRecord(record) => {
                let count = {
                    let mut guard = self.active.lock();
                    let count = dacs::process(
                        &record,
                        &mut guard.table,
                        self.store.as_ref(),
                        self.bundle_handle,
                        flags,
                    )?;
                    if count > 0 {
                        // Sweep the freed prefix so the tracking window
                        // reflects the acknowledgments immediately.
                        while guard.oldest_cid < guard.current_cid
                            && guard.table.get(guard.oldest_cid).is_none()
                        {
                            guard.oldest_cid += 1;
                        }
                        let active = (guard.current_cid - guard.oldest_cid) as u32;
                        self.stats.active.store(active, Ordering::Relaxed);
                        self.active_signal.notify_all();
                    }
                    count
                };
                self.stats.acknowledged.fetch_add(count, Ordering::Relaxed);
                Ok(ProcessOutcome::Acknowledged(count))
            }
            Reception::Payload { payload, custody } => {
                let acknowledging = custody.is_some();
                if let Some(custodian) = custody {
                    let lifetime = self.outbound.lock().options.lifetime;
                    let mut aggregator = self.dacs.lock();
                    aggregator.acknowledge(
                        custodian,
                        sysnow,
                        lifetime,
                        self.store.as_ref(),
                        self.dacs_handle,
                        flags,
                    )?;
                }
                let _inbound = self.inbound.lock();
                self.store
                    .enqueue(self.payload_handle, &[], &payload, timeout)?;
                if acknowledging {
                    Ok(ProcessOutcome::PendingAcknowledgment)
                } else {
                    Ok(ProcessOutcome::Delivered)
                }
            }
        }
    }

    /// Deliver the next received payload to the application.
    pub fn accept(&self, timeout: Timeout, flags: &mut ConditionFlags) -> Result<Vec<u8>> {
        let _ = flags;
        let object = self.store.dequeue(self.payload_handle, timeout)?;
        let _ = self.store.relinquish(self.payload_handle, object.sid);
        StatsCell::bump(&self.stats.delivered);
        Ok(object.data)
    }

    // -----------------------------------------------------------------------
    // Load stages
    // -----------------------------------------------------------------------

    /// Custody signals go out ahead of data bundles.
    fn load_dacs(&self, sysnow: u64, flags: &mut ConditionFlags) -> Option<Candidate> {
        let lifetime = self.outbound.lock().options.lifetime;
        let rate = self.dacs_rate.load(Ordering::Relaxed);
        let mut aggregator = self.dacs.lock();
        if let Err(err) = aggregator.check(
            sysnow,
            rate,
            lifetime,
            self.store.as_ref(),
            self.dacs_handle,
            flags,
        ) {
            *flags |= ConditionFlags::STORE_FAILURE;
            log::warn!("custody signal emission failed: {err}");
        }
        match self.store.dequeue(self.dacs_handle, CHECK) {
            Ok(object) => match BundleData::from_stored(&object.data) {
                Ok((data, payload)) => {
                    *flags |= ConditionFlags::ROUTE_NEEDED;
                    Some(Candidate {
                        data,
                        payload: payload.to_vec(),
                        sid: object.sid,
                        handle: self.dacs_handle,
                        newcid: false,
                        reuse_cid: None,
                    })
                }
                Err(_) => {
                    let _ = self.store.relinquish(self.dacs_handle, object.sid);
                    *flags |= ConditionFlags::STORE_FAILURE;
                    StatsCell::bump(&self.stats.lost);
                    None
                }
            },
            Err(BpError::Timeout) => None,
            Err(_) => {
                *flags |= ConditionFlags::STORE_FAILURE;
                None
            }
        }
    }

    /// Scan the active-table window for expired and timed-out bundles, and
    /// apply the wrap policy when the next assignment slot is occupied.
    fn load_retransmit(
        &self,
        sysnow: u64,
        retx_timeout: u64,
        cid_reuse: bool,
        flags: &mut ConditionFlags,
    ) -> Result<Option<Candidate>> {
        let mut guard = self.active.lock();
        while guard.oldest_cid < guard.current_cid {
            let cid = guard.oldest_cid;
            let active = match guard.table.get(cid).copied() {
                Some(a) => a,
                None => {
                    guard.oldest_cid += 1;
                    continue;
                }
            };

            let parsed = self
                .store
                .retrieve(self.bundle_handle, active.sid, CHECK)
                .and_then(|object| {
                    let _ = self.store.release(self.bundle_handle, active.sid);
                    BundleData::from_stored(&object.data)
                        .map(|(data, payload)| (data, payload.to_vec()))
                });
            let (data, payload) = match parsed {
                Ok(v) => v,
                Err(_) => {
                    // Storage lost the bundle: vacate and keep scanning.
                    let _ = self.store.relinquish(self.bundle_handle, active.sid);
                    guard.table.vacate(cid);
                    *flags |= ConditionFlags::STORE_FAILURE;
                    StatsCell::bump(&self.stats.lost);
                    continue;
                }
            };

            if data.exprtime != 0 && sysnow >= data.exprtime {
                let _ = self.store.relinquish(self.bundle_handle, active.sid);
                guard.table.vacate(cid);
                guard.oldest_cid += 1;
                StatsCell::bump(&self.stats.expired);
                continue;
            }

            if retx_timeout != 0 && sysnow >= active.retx.saturating_add(retx_timeout) {
                // Timed out: retransmit the oldest bundle.
                guard.oldest_cid += 1;
                StatsCell::bump(&self.stats.retransmitted);
                let candidate = if cid_reuse {
                    // Slot and CID stay; only the transmit time moves.
                    Candidate {
                        data,
                        payload,
                        sid: active.sid,
                        handle: self.bundle_handle,
                        newcid: false,
                        reuse_cid: Some(active.cid),
                    }
                } else {
                    guard.table.vacate(cid);
                    Candidate {
                        data,
                        payload,
                        sid: active.sid,
                        handle: self.bundle_handle,
                        newcid: true,
                        reuse_cid: None,
                    }
                };
                return Ok(Some(candidate));
            }

            // Oldest bundle still in flight. Before dequeuing new work,
            // make sure the next assignment slot is free; the design keeps
            // one slot open at all times.
            let occupant = match guard.table.get(guard.current_cid).copied() {
                None => break,
                Some(o) => o,
            };
            *flags |= ConditionFlags::ACTIVE_TABLE_WRAP;
            match self.attributes.wrap_response {
                WrapResponse::Resend => {
                    guard.oldest_cid += 1;
                    let parsed = self
                        .store
                        .retrieve(self.bundle_handle, occupant.sid, CHECK)
                        .and_then(|object| {
                            let _ = self.store.release(self.bundle_handle, occupant.sid);
                            BundleData::from_stored(&object.data)
                                .map(|(data, payload)| (data, payload.to_vec()))
                        });
                    match parsed {
                        Ok((data, payload)) => {
                            StatsCell::bump(&self.stats.retransmitted);
                            let candidate = Candidate {
                                data,
                                payload,
                                sid: occupant.sid,
                                handle: self.bundle_handle,
                                newcid: true,
                                reuse_cid: None,
                            };
                            // Give acknowledgments a bounded chance to
                            // drain the table before the forced resend.
                            let _ = self.active_signal.wait_for(&mut guard, WRAP_TIMEOUT);
                            return Ok(Some(candidate));
                        }
                        Err(_) => {
                            let _ = self.store.relinquish(self.bundle_handle, occupant.sid);
                            guard.table.vacate(occupant.cid);
                            *flags |= ConditionFlags::STORE_FAILURE;
                            StatsCell::bump(&self.stats.lost);
                            continue;
                        }
                    }
                }
                WrapResponse::Block => {
                    let _ = self.active_signal.wait_for(&mut guard, WRAP_TIMEOUT);
                    if guard.table.get(guard.current_cid).is_some() {
                        return Err(BpError::ActiveTableFull);
                    }
                    break;
                }
                WrapResponse::Drop => {
                    guard.oldest_cid += 1;
                    let _ = self.store.relinquish(self.bundle_handle, occupant.sid);
                    guard.table.vacate(occupant.cid);
                    StatsCell::bump(&self.stats.lost);
                    break;
                }
            }
        }
        Ok(None)
    }

    /// Pull the next fresh bundle off the outbound queue, discarding any
    /// that expired while stored.
    fn load_dequeue(
        &self,
        sysnow: u64,
        timeout: Timeout,
        flags: &mut ConditionFlags,
    ) -> Result<Candidate> {
        loop {
            let object = match self.store.dequeue(self.bundle_handle, timeout) {
                Ok(o) => o,
                Err(BpError::Timeout) => return Err(BpError::Timeout),
                Err(err) => {
                    *flags |= ConditionFlags::STORE_FAILURE;
                    log::warn!("outbound dequeue failed: {err}");
                    return Err(BpError::StoreFailed);
                }
            };
            let (data, payload) = match BundleData::from_stored(&object.data) {
                Ok((data, payload)) => (data, payload.to_vec()),
                Err(_) => {
                    let _ = self.store.relinquish(self.bundle_handle, object.sid);
                    *flags |= ConditionFlags::STORE_FAILURE;
                    StatsCell::bump(&self.stats.lost);
                    continue;
                }
            };
            if data.exprtime != 0 && sysnow >= data.exprtime {
                let _ = self.store.relinquish(self.bundle_handle, object.sid);
                StatsCell::bump(&self.stats.expired);
                continue;
            }
            return Ok(Candidate {
                data,
                payload,
                sid: object.sid,
                handle: self.bundle_handle,
                newcid: true,
                reuse_cid: None,
            });
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        for handle in [self.bundle_handle, self.payload_handle, self.dacs_handle] {
            let _ = self.store.destroy(handle);
        }
    }
}

/// Parse a raw bundle's primary block into its addressing triple without
/// touching any channel state.
pub fn routeinfo(bundle: &[u8]) -> Result<Route> {
    let mut flags = ConditionFlags::empty();
    let mut reader = Reader::new(bundle);
    let pri = pri::read(&mut reader, &mut flags)?;
    Ok(Route {
        local_node: pri.srcnode,
        local_service: pri.srcserv,
        destination_node: pri.dstnode,
        destination_service: pri.dstserv,
        report_node: pri.rptnode,
        report_service: pri.rptserv,
    })
}

fn bundle_options(attributes: &Attributes) -> BundleOptions {
    BundleOptions {
        lifetime: attributes.lifetime,
        request_custody: attributes.request_custody,
        admin_record: attributes.admin_record,
        integrity_check: attributes.integrity_check,
        allow_fragmentation: attributes.allow_fragmentation,
        cipher_suite: attributes.cipher_suite,
        max_length: attributes.max_length,
    }
}
