// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Storage capability injected at channel construction: a queue + key-value
// hybrid. Each handle names an independent FIFO of byte objects that stay
// retrievable by storage ID after dequeue, until relinquished.
//
// `RamStore` is the in-memory reference implementation. Real deployments
// substitute a persistent service; the channel only ever talks through the
// trait.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{BpError, Result};
use crate::rh_hash::RhHash;

/// Storage ID, assigned by the service on enqueue. Never zero.
pub type Sid = u64;

/// Sentinel for "no storage object".
pub const SID_VACANT: Sid = 0;

/// Opaque per-queue handle returned by `create`.
pub type StoreHandle = usize;

/// Blocking bound for storage and channel operations:
/// `None` pends indefinitely, `Some(Duration::ZERO)` polls.
pub type Timeout = Option<Duration>;

/// Block until the operation can complete.
pub const PEND: Timeout = None;

/// Poll: complete immediately or time out.
pub const CHECK: Timeout = Some(Duration::ZERO);

/// A stored object handed back by `dequeue` or `retrieve`.
#[derive(Debug, Clone)]
pub struct StorageObject {
    pub sid: Sid,
    pub data: Vec<u8>,
}

/// The eight-operation storage contract.
///
/// `enqueue` logically concatenates its two buffers into one object (the
/// split exists so callers can hand over a metadata prefix and a payload
/// without copying them together first). `dequeue` is FIFO. `retrieve`
/// returns the same bytes `enqueue` stored and is paired with `release`;
/// `relinquish` removes the object permanently.
pub trait StorageService: Send + Sync {
    fn create(&self) -> Result<StoreHandle>;
    fn destroy(&self, handle: StoreHandle) -> Result<()>;
    fn enqueue(
        &self,
        handle: StoreHandle,
        header: &[u8],
        payload: &[u8],
        timeout: Timeout,
    ) -> Result<Sid>;
    fn dequeue(&self, handle: StoreHandle, timeout: Timeout) -> Result<StorageObject>;
    fn retrieve(&self, handle: StoreHandle, sid: Sid, timeout: Timeout) -> Result<StorageObject>;
    fn release(&self, handle: StoreHandle, sid: Sid) -> Result<()>;
    fn relinquish(&self, handle: StoreHandle, sid: Sid) -> Result<()>;
    fn getcount(&self, handle: StoreHandle) -> usize;
}

// ---------------------------------------------------------------------------
// RamStore
// ---------------------------------------------------------------------------

/// Default object capacity per RAM queue.
pub const DEFAULT_RAM_CAPACITY: usize = 16384;

struct StoredObject {
    data: Vec<u8>,
    refs: u32,
}

struct QueueState {
    fifo: VecDeque<Sid>,
    objects: RhHash<StoredObject>,
}

struct RamState {
    queues: Vec<Option<QueueState>>,
    next_sid: Sid,
    capacity: usize,
}

/// In-memory storage service backed by one SID index per queue.
pub struct RamStore {
    state: Mutex<RamState>,
    cond: Condvar,
}

impl RamStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RamState {
                queues: Vec::new(),
                next_sid: 1,
                capacity: capacity.max(1),
            }),
            cond: Condvar::new(),
        }
    }
}

impl Default for RamStore {
    fn default() -> Self {
        Self::new(DEFAULT_RAM_CAPACITY)
    }
}

fn queue_mut(state: &mut RamState, handle: StoreHandle) -> Result<&mut QueueState> {
    state
        .queues
        .get_mut(handle)
        .and_then(Option::as_mut)
        .ok_or(BpError::InvalidHandle)
}

impl StorageService for RamStore {
    fn create(&self) -> Result<StoreHandle> {
        let mut state = self.state.lock();
        let capacity = state.capacity;
        let queue = QueueState {
            fifo: VecDeque::new(),
            objects: RhHash::new(capacity).map_err(|_| BpError::StoreFailed)?,
        };
        match state.queues.iter_mut().position(|q| q.is_none()) {
            Some(i) => {
                state.queues[i] = Some(queue);
                Ok(i)
            }
            None => {
                state.queues.push(Some(queue));
                Ok(state.queues.len() - 1)
            }
        }
    }

    fn destroy(&self, handle: StoreHandle) -> Result<()> {
        let mut state = self.state.lock();
        match state.queues.get_mut(handle) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.cond.notify_all();
                Ok(())
            }
            _ => Err(BpError::InvalidHandle),
        }
    }

    fn enqueue(
        &self,
        handle: StoreHandle,
        header: &[u8],
        payload: &[u8],
        timeout: Timeout,
    ) -> Result<Sid> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut state = self.state.lock();
        loop {
            let capacity = state.capacity;
            let queue = queue_mut(&mut state, handle)?;
            if queue.objects.len() < capacity {
                let sid = state.next_sid;
                state.next_sid += 1;
                let mut data = Vec::with_capacity(header.len() + payload.len());
                data.extend_from_slice(header);
                data.extend_from_slice(payload);
                let queue = queue_mut(&mut state, handle)?;
                queue
                    .objects
                    .add(sid, StoredObject { data, refs: 1 }, false)
                    .map_err(|_| BpError::StoreFailed)?;
                queue.fifo.push_back(sid);
                self.cond.notify_all();
                return Ok(sid);
            }
            if !self.wait(&mut state, deadline) {
                return Err(BpError::Timeout);
            }
        }
    }

    fn dequeue(&self, handle: StoreHandle, timeout: Timeout) -> Result<StorageObject> {
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut state = self.state.lock();
        loop {
            let queue = queue_mut(&mut state, handle)?;
            if let Some(sid) = queue.fifo.pop_front() {
                let data = queue
                    .objects
                    .get(sid)
                    .map(|o| o.data.clone())
                    .ok_or(BpError::StoreFailed)?;
                self.cond.notify_all();
                return Ok(StorageObject { sid, data });
            }
            if !self.wait(&mut state, deadline) {
                return Err(BpError::Timeout);
            }
        }
    }

    fn retrieve(&self, handle: StoreHandle, sid: Sid, _timeout: Timeout) -> Result<StorageObject> {
        let mut state = self.state.lock();
        let queue = queue_mut(&mut state, handle)?;
        let object = queue.objects.get_mut(sid).ok_or(BpError::StoreFailed)?;
        object.refs += 1;
        Ok(StorageObject {
            sid,
            data: object.data.clone(),
        })
    }

    fn release(&self, handle: StoreHandle, sid: Sid) -> Result<()> {
        let mut state = self.state.lock();
        let queue = queue_mut(&mut state, handle)?;
        let object = queue.objects.get_mut(sid).ok_or(BpError::StoreFailed)?;
        object.refs = object.refs.saturating_sub(1);
        Ok(())
    }

    fn relinquish(&self, handle: StoreHandle, sid: Sid) -> Result<()> {
        let mut state = self.state.lock();
        let queue = queue_mut(&mut state, handle)?;
        if queue.objects.remove(sid).is_none() {
            return Err(BpError::StoreFailed);
        }
        queue.fifo.retain(|&s| s != sid);
        self.cond.notify_all();
        Ok(())
    }

    fn getcount(&self, handle: StoreHandle) -> usize {
        let mut state = self.state.lock();
        queue_mut(&mut state, handle)
            .map(|q| q.objects.len())
            .unwrap_or(0)
    }
}

impl RamStore {
    /// Wait for a state change; `false` means the deadline had already
    /// passed (callers re-check their predicate once per wakeup, so the
    /// deadline is enforced on the next loop iteration).
    fn wait(
        &self,
        state: &mut parking_lot::MutexGuard<'_, RamState>,
        deadline: Option<Instant>,
    ) -> bool {
        match deadline {
            None => {
                self.cond.wait(state);
                true
            }
            Some(dl) => {
                if Instant::now() >= dl {
                    return false;
                }
                self.cond.wait_until(state, dl);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_and_retrieve() {
        let store = RamStore::default();
        let h = store.create().unwrap();
        let a = store.enqueue(h, b"hdr-", b"one", CHECK).unwrap();
        let b = store.enqueue(h, b"", b"two", CHECK).unwrap();
        assert_ne!(a, SID_VACANT);
        assert_eq!(store.getcount(h), 2);

        let first = store.dequeue(h, CHECK).unwrap();
        assert_eq!(first.sid, a);
        assert_eq!(first.data, b"hdr-one");

        // Dequeued objects stay retrievable until relinquished.
        let again = store.retrieve(h, a, CHECK).unwrap();
        assert_eq!(again.data, b"hdr-one");
        store.release(h, a).unwrap();
        store.relinquish(h, a).unwrap();
        assert!(store.retrieve(h, a, CHECK).is_err());

        let second = store.dequeue(h, CHECK).unwrap();
        assert_eq!(second.sid, b);
        assert!(matches!(store.dequeue(h, CHECK), Err(BpError::Timeout)));
    }

    #[test]
    fn blocking_dequeue_wakes_on_enqueue() {
        let store = Arc::new(RamStore::default());
        let h = store.create().unwrap();
        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.dequeue(h, Some(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(50));
        store.enqueue(h, b"", b"late", CHECK).unwrap();
        let got = reader.join().unwrap().unwrap();
        assert_eq!(got.data, b"late");
    }

    #[test]
    fn bounded_dequeue_times_out() {
        let store = RamStore::default();
        let h = store.create().unwrap();
        let start = Instant::now();
        let r = store.dequeue(h, Some(Duration::from_millis(50)));
        assert!(matches!(r, Err(BpError::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn destroyed_handle_rejected() {
        let store = RamStore::default();
        let h = store.create().unwrap();
        store.destroy(h).unwrap();
        assert!(matches!(
            store.enqueue(h, b"", b"x", CHECK),
            Err(BpError::InvalidHandle)
        ));
    }
}
