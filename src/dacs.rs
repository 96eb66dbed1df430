// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Aggregate custody signals.
//
// The acknowledging side folds every custody ID it accepts into a
// per-custodian tree of disjoint closed intervals, then periodically
// serializes the tree as an administrative record: an absolute first CID
// followed by alternating fill/gap deltas. The transmitting side walks a
// received record and vacates the matching active-table slots.

use std::collections::BTreeMap;

use crate::active_table::ActiveTable;
use crate::bundle::{self, Custodian};
use crate::channel::Route;
use crate::error::{BpError, Result};
use crate::flags::ConditionFlags;
use crate::sdnv;
use crate::storage::{StorageService, StoreHandle, CHECK};
use crate::v6::Reader;

/// Largest encodable fill or gap run per record segment.
pub const MAX_FILL: u64 = 0x3FFF;

/// Administrative record type nibble for aggregate custody signals.
pub const ACS_REC_TYPE: u8 = 0x40;
/// Status bit: custody transfer succeeded.
pub const ACS_STATUS_SUCCESS: u8 = 0x01;

// ---------------------------------------------------------------------------
// Interval tree
// ---------------------------------------------------------------------------

/// Outcome of a tree insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Added,
    Duplicate,
    Full,
}

/// Ordered set of disjoint closed CID intervals, bounded by `max_gaps`
/// nodes. Adjacent intervals merge on insert.
pub struct CidTree {
    intervals: BTreeMap<u64, u64>,
    max_gaps: usize,
}

impl CidTree {
    pub fn new(max_gaps: usize) -> Self {
        Self {
            intervals: BTreeMap::new(),
            max_gaps: max_gaps.max(1),
        }
    }

    /// Fold `cid` into the tree.
    pub fn insert(&mut self, cid: u64) -> Insert {
        if let Some((&lo, &hi)) = self.intervals.range(..=cid).next_back() {
            if cid <= hi {
                return Insert::Duplicate;
            }
            if hi + 1 == cid {
                // Extend the predecessor, absorbing a touching successor.
                let new_hi = match self.intervals.range(cid + 1..).next() {
                    Some((&nlo, &nhi)) if nlo == cid + 1 => {
                        self.intervals.remove(&nlo);
                        nhi
                    }
                    _ => cid,
                };
                self.intervals.insert(lo, new_hi);
                return Insert::Added;
            }
        }
        if let Some((&nlo, &nhi)) = self.intervals.range(cid + 1..).next() {
            if nlo == cid + 1 {
                self.intervals.remove(&nlo);
                self.intervals.insert(cid, nhi);
                return Insert::Added;
            }
        }
        if self.intervals.len() >= self.max_gaps {
            return Insert::Full;
        }
        self.intervals.insert(cid, cid);
        Insert::Added
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Number of disjoint intervals.
    pub fn count(&self) -> usize {
        self.intervals.len()
    }

    /// Highest CID in the tree.
    pub fn max(&self) -> Option<u64> {
        self.intervals.iter().next_back().map(|(_, &hi)| hi)
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    /// Intervals in ascending order.
    pub fn intervals(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.intervals.iter().map(|(&lo, &hi)| (lo, hi))
    }
}

// ---------------------------------------------------------------------------
// Record codec
// ---------------------------------------------------------------------------

/// Serialize and drain up to `max_fills` intervals from `tree` into one
/// record. Oversized runs split (`FILL_OVERFLOW`); exhausting the fill
/// budget truncates (`TOO_MANY_FILLS`); leftovers stay queued for the next
/// emission.
fn encode_record(tree: &mut CidTree, max_fills: usize, flags: &mut ConditionFlags) -> Vec<u8> {
    let mut out = vec![ACS_REC_TYPE | ACS_STATUS_SUCCESS];
    let pending: Vec<(u64, u64)> = tree.intervals().collect();
    let mut fills = 0usize;
    let mut prev_hi: Option<u64> = None;

    for (lo, hi) in pending {
        if fills == max_fills {
            *flags |= ConditionFlags::TOO_MANY_FILLS;
            break;
        }
        if let Some(p) = prev_hi {
            let gap = lo - p - 1;
            if gap > MAX_FILL {
                // Re-anchor in the next record instead.
                *flags |= ConditionFlags::FILL_OVERFLOW;
                break;
            }
            sdnv::encode(&mut out, gap);
        } else {
            sdnv::encode(&mut out, lo);
        }

        let len = hi - lo + 1;
        let emit_hi = if len > MAX_FILL {
            lo + MAX_FILL - 1
        } else {
            hi
        };
        sdnv::encode(&mut out, emit_hi - lo + 1);
        fills += 1;
        prev_hi = Some(emit_hi);

        tree.intervals.remove(&lo);
        if emit_hi != hi {
            *flags |= ConditionFlags::FILL_OVERFLOW;
            tree.intervals.insert(emit_hi + 1, hi);
            break;
        }
    }
    out
}

/// Decode a custody-signal record into acknowledged CID intervals.
pub fn decode_record(record: &[u8], flags: &mut ConditionFlags) -> Result<Vec<(u64, u64)>> {
    let mut reader = Reader::new(record);
    let rec_type = reader.u8()?;
    if rec_type >> 4 != ACS_REC_TYPE >> 4 {
        return Err(BpError::UnknownRecord(rec_type));
    }

    let overflow = BpError::Parse("custody signal arithmetic overflow");
    let first = reader.sdnv(flags)?;
    let fill = reader.sdnv(flags)?;
    if fill == 0 || fill > MAX_FILL {
        return Err(BpError::Parse("custody signal fill"));
    }
    let mut cursor = first.checked_add(fill - 1).ok_or(overflow.clone())?;
    let mut intervals = vec![(first, cursor)];

    while reader.remaining() > 0 {
        let gap = reader.sdnv(flags)?;
        let fill = reader.sdnv(flags)?;
        if fill == 0 || fill > MAX_FILL {
            return Err(BpError::Parse("custody signal fill"));
        }
        let lo = cursor
            .checked_add(gap)
            .and_then(|v| v.checked_add(1))
            .ok_or(overflow.clone())?;
        cursor = lo.checked_add(fill - 1).ok_or(overflow.clone())?;
        intervals.push((lo, cursor));
    }
    Ok(intervals)
}

// ---------------------------------------------------------------------------
// Aggregator (acknowledging side)
// ---------------------------------------------------------------------------

struct CustodianEntry {
    node: u64,
    service: u64,
    tree: CidTree,
    /// Last emission time; new entries stamp their creation time so the
    /// first record waits out one full period.
    last_sent: u64,
    /// Highest CID ever aggregated for this custodian.
    last_cid: Option<u64>,
}

/// Per-channel custody-signal aggregation across a bounded set of
/// custodians.
pub struct DacsAggregator {
    route: Route,
    entries: Vec<CustodianEntry>,
    max_custodians: usize,
    max_fills: usize,
    max_gaps: usize,
}

impl DacsAggregator {
    pub fn new(route: Route, max_custodians: usize, max_fills: usize, max_gaps: usize) -> Self {
        Self {
            route,
            entries: Vec::new(),
            max_custodians: max_custodians.max(1),
            max_fills: max_fills.max(1),
            max_gaps: max_gaps.max(1),
        }
    }

    /// Fold one accepted custody transfer into the aggregation state,
    /// emitting a record immediately when a bound is hit.
    pub fn acknowledge(
        &mut self,
        custody: Custodian,
        sysnow: u64,
        lifetime: u64,
        store: &dyn StorageService,
        handle: StoreHandle,
        flags: &mut ConditionFlags,
    ) -> Result<()> {
        let route = self.route;
        let max_fills = self.max_fills;
        let idx = self.entry_index(custody.node, custody.service, sysnow, lifetime, store, handle, flags)?;
        let entry = &mut self.entries[idx];

        if let Some(last) = entry.last_cid {
            if custody.cid < last {
                *flags |= ConditionFlags::CID_WENT_BACKWARDS;
            }
        }

        // A forward jump too wide to encode flushes the pending tree so the
        // next record re-anchors at the new CID.
        if let Some(mx) = entry.tree.max() {
            if custody.cid > mx && custody.cid - mx - 1 > MAX_FILL {
                *flags |= ConditionFlags::FILL_OVERFLOW;
                emit_entry(&route, max_fills, entry, sysnow, lifetime, store, handle, flags)?;
            }
        }

        match entry.tree.insert(custody.cid) {
            Insert::Added => {}
            Insert::Duplicate => *flags |= ConditionFlags::DUPLICATES,
            Insert::Full => {
                *flags |= ConditionFlags::CUSTODY_TREE_FULL;
                emit_entry(&route, max_fills, entry, sysnow, lifetime, store, handle, flags)?;
                let _ = entry.tree.insert(custody.cid);
            }
        }
        entry.last_cid = Some(entry.last_cid.map_or(custody.cid, |l| l.max(custody.cid)));

        if entry.tree.count() >= max_fills {
            emit_entry(&route, max_fills, entry, sysnow, lifetime, store, handle, flags)?;
        }
        Ok(())
    }

    /// Periodic tick: emit every custodian whose aggregation period has
    /// elapsed.
    pub fn check(
        &mut self,
        sysnow: u64,
        rate: u64,
        lifetime: u64,
        store: &dyn StorageService,
        handle: StoreHandle,
        flags: &mut ConditionFlags,
    ) -> Result<()> {
        let route = self.route;
        let max_fills = self.max_fills;
        for entry in &mut self.entries {
            if !entry.tree.is_empty() && sysnow >= entry.last_sent.saturating_add(rate) {
                emit_entry(&route, max_fills, entry, sysnow, lifetime, store, handle, flags)?;
            }
        }
        Ok(())
    }

    fn entry_index(
        &mut self,
        node: u64,
        service: u64,
        sysnow: u64,
        lifetime: u64,
        store: &dyn StorageService,
        handle: StoreHandle,
        flags: &mut ConditionFlags,
    ) -> Result<usize> {
        if let Some(i) = self
            .entries
            .iter()
            .position(|e| e.node == node && e.service == service)
        {
            return Ok(i);
        }
        if self.entries.len() < self.max_custodians {
            self.entries.push(CustodianEntry {
                node,
                service,
                tree: CidTree::new(self.max_gaps),
                last_sent: sysnow,
                last_cid: None,
            });
            return Ok(self.entries.len() - 1);
        }
        // All custodian slots busy: flush and repurpose the one idle the
        // longest.
        let route = self.route;
        let max_fills = self.max_fills;
        let idx = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.last_sent)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let entry = &mut self.entries[idx];
        emit_entry(&route, max_fills, entry, sysnow, lifetime, store, handle, flags)?;
        entry.node = node;
        entry.service = service;
        entry.tree.clear();
        entry.last_sent = sysnow;
        entry.last_cid = None;
        Ok(idx)
    }
}

/// Serialize one custodian's pending tree into a record bundle and enqueue
/// it on the custody-signal store.
fn emit_entry(
    route: &Route,
    max_fills: usize,
    entry: &mut CustodianEntry,
    sysnow: u64,
    lifetime: u64,
    store: &dyn StorageService,
    handle: StoreHandle,
    flags: &mut ConditionFlags,
) -> Result<()> {
    if entry.tree.is_empty() {
        return Ok(());
    }
    let record = encode_record(&mut entry.tree, max_fills, flags);
    let (data, payload) = bundle::build_admin_record_bundle(
        route,
        (entry.node, entry.service),
        lifetime,
        &record,
        sysnow,
        flags,
    )?;
    store.enqueue(handle, &data.to_stored(), &payload, CHECK)?;
    entry.last_sent = sysnow;
    Ok(())
}

// ---------------------------------------------------------------------------
// Receive side
// ---------------------------------------------------------------------------

/// Apply a received custody-signal record to the active table: every
/// acknowledged CID whose slot is occupied is relinquished from the bundle
/// store and vacated. Returns the acknowledgment count.
pub fn process(
    record: &[u8],
    table: &mut ActiveTable,
    store: &dyn StorageService,
    bundle_handle: StoreHandle,
    flags: &mut ConditionFlags,
) -> Result<u32> {
    let intervals = decode_record(record, flags)?;
    let mut count = 0u32;
    for (lo, hi) in intervals {
        let mut cid = lo;
        loop {
            match table.get(cid).copied() {
                Some(active) => {
                    if let Err(err) = store.relinquish(bundle_handle, active.sid) {
                        *flags |= ConditionFlags::STORE_FAILURE;
                        log::warn!("failed to relinquish acknowledged bundle: {err}");
                    }
                    table.vacate(cid);
                    count += 1;
                }
                None => *flags |= ConditionFlags::UNKNOWN_CID,
            }
            if cid == hi {
                break;
            }
            cid += 1;
        }
    }
    Ok(count)
}
