use gateway_core::kv::{AtomicKv, InMemoryKv};
use std::sync::Arc;
use std::thread;

/// Concurrent sliding-window inserts and counter reserves must not panic or
/// deadlock under contention — the admission limiter and the ledger's
/// reservation path both hit the same `InMemoryKv` instance from multiple
/// request-handling threads.
#[test]
fn concurrent_sliding_window_and_reserve_under_contention() {
    let kv: Arc<dyn AtomicKv> = Arc::new(InMemoryKv::new());

    let windows = {
        let kv = kv.clone();
        thread::spawn(move || {
            for i in 0..1000u64 {
                kv.sliding_window_insert("ip:10.0.0.1", i, 60_000).unwrap();
            }
        })
    };

    let reserves = {
        let kv = kv.clone();
        thread::spawn(move || {
            kv.atomic_increment("acct:contended", 1_000_000).unwrap();
            for _ in 0..1000u64 {
                let _ = kv.atomic_reserve("acct:contended", 1);
            }
        })
    };

    windows.join().unwrap();
    reserves.join().unwrap();

    let remaining = kv.atomic_increment("acct:contended", 0).unwrap();
    assert_eq!(remaining, 1_000_000 - 1000);
}
