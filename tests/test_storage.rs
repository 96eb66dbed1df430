// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Contract tests of the RAM storage service through the StorageService
// trait object, the way the channel consumes it.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use libbp6::{BpError, RamStore, StorageService, CHECK, PEND};

fn service() -> Arc<dyn StorageService> {
    Arc::new(RamStore::default())
}

#[test]
fn fifo_order_preserved() {
    let store = service();
    let h = store.create().unwrap();
    let mut sids = Vec::new();
    for i in 0u8..10 {
        sids.push(store.enqueue(h, &[i], &[i * 2], CHECK).unwrap());
    }
    for (i, &sid) in sids.iter().enumerate() {
        let obj = store.dequeue(h, CHECK).unwrap();
        assert_eq!(obj.sid, sid);
        assert_eq!(obj.data, vec![i as u8, i as u8 * 2]);
    }
    assert!(matches!(store.dequeue(h, CHECK), Err(BpError::Timeout)));
}

#[test]
fn retrieve_returns_enqueued_bytes() {
    let store = service();
    let h = store.create().unwrap();
    let sid = store.enqueue(h, b"header|", b"payload", CHECK).unwrap();
    let direct = store.retrieve(h, sid, CHECK).unwrap();
    assert_eq!(direct.data, b"header|payload");
    store.release(h, sid).unwrap();

    // Dequeue does not remove the object; relinquish does.
    let queued = store.dequeue(h, CHECK).unwrap();
    assert_eq!(queued.data, b"header|payload");
    assert_eq!(store.getcount(h), 1);
    store.relinquish(h, sid).unwrap();
    assert_eq!(store.getcount(h), 0);
    assert!(store.retrieve(h, sid, CHECK).is_err());
}

#[test]
fn relinquish_removes_queued_objects() {
    let store = service();
    let h = store.create().unwrap();
    let a = store.enqueue(h, &[], b"a", CHECK).unwrap();
    let b = store.enqueue(h, &[], b"b", CHECK).unwrap();
    store.relinquish(h, a).unwrap();
    let next = store.dequeue(h, CHECK).unwrap();
    assert_eq!(next.sid, b);
}

#[test]
fn capacity_bounds_enqueue() {
    let store = RamStore::new(2);
    let h = store.create().unwrap();
    store.enqueue(h, &[], b"1", CHECK).unwrap();
    store.enqueue(h, &[], b"2", CHECK).unwrap();
    assert!(matches!(
        store.enqueue(h, &[], b"3", CHECK),
        Err(BpError::Timeout)
    ));
    // Removing one object makes room; a bounded enqueue succeeds.
    let first = store.dequeue(h, CHECK).unwrap();
    store.relinquish(h, first.sid).unwrap();
    store
        .enqueue(h, &[], b"3", Some(Duration::from_millis(100)))
        .unwrap();
}

#[test]
fn pended_dequeue_wakes_on_enqueue() {
    let store: Arc<RamStore> = Arc::new(RamStore::default());
    let h = store.create().unwrap();
    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.dequeue(h, PEND))
    };
    thread::sleep(Duration::from_millis(50));
    store.enqueue(h, &[], b"wake", CHECK).unwrap();
    assert_eq!(reader.join().unwrap().unwrap().data, b"wake");
}

#[test]
fn bounded_dequeue_respects_deadline() {
    let store = service();
    let h = store.create().unwrap();
    let start = Instant::now();
    let got = store.dequeue(h, Some(Duration::from_millis(80)));
    assert!(matches!(got, Err(BpError::Timeout)));
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(60));
    assert!(waited < Duration::from_secs(5));
}

#[test]
fn handles_are_independent() {
    let store = service();
    let h1 = store.create().unwrap();
    let h2 = store.create().unwrap();
    store.enqueue(h1, &[], b"one", CHECK).unwrap();
    assert_eq!(store.getcount(h1), 1);
    assert_eq!(store.getcount(h2), 0);
    assert!(matches!(store.dequeue(h2, CHECK), Err(BpError::Timeout)));
    store.destroy(h1).unwrap();
    assert!(matches!(
        store.dequeue(h1, CHECK),
        Err(BpError::InvalidHandle)
    ));
    // h2 is untouched by destroying h1.
    store.enqueue(h2, &[], b"two", CHECK).unwrap();
    assert_eq!(store.dequeue(h2, CHECK).unwrap().data, b"two");
}
