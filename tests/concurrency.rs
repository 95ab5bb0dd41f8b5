//! Concurrent churn and integrity tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use umbra::{units, Store, UmbraError};

fn churn_store(capacity: u64) -> Arc<Store> {
    Arc::new(
        Store::builder()
            .memory_capacity(capacity)
            .eviction_threshold(0.8)
            .cleanup_interval(Duration::ZERO)
            .build()
            .unwrap(),
    )
}

#[test]
fn test_concurrent_churn_drains_clean() {
    const THREADS: u64 = 10;
    const ITERATIONS: u64 = 100;

    let store = churn_store(units::mib(1));
    let failures = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|thread_id| {
            let store = store.clone();
            let failures = failures.clone();
            std::thread::spawn(move || {
                let payload = vec![thread_id as u8; 10 * 1024];
                for _ in 0..ITERATIONS {
                    let id = match store.put(&payload) {
                        Ok(id) => id,
                        Err(UmbraError::OutOfCapacity { .. }) => {
                            failures.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        Err(e) => panic!("unexpected put failure: {}", e),
                    };

                    // The working set never nears the threshold, so the
                    // entry cannot have been evicted under us.
                    let bytes = store.get(id).expect("live entry must be readable");
                    assert_eq!(bytes, payload);

                    store.remove(id);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let total = THREADS * ITERATIONS;
    let failed = failures.load(Ordering::Relaxed);
    assert!(
        failed * 5 <= total,
        "{} of {} operations failed with OutOfCapacity",
        failed,
        total
    );

    // Every completed triple returned its bytes.
    assert_eq!(store.used(), 0);
    assert_eq!(store.len(), 0);
}

#[test]
fn test_concurrent_handles_are_unique() {
    const THREADS: u64 = 8;
    const PUTS: u64 = 200;

    let store = churn_store(units::mib(8));
    let seen = Arc::new(Mutex::new(HashSet::new()));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = store.clone();
            let seen = seen.clone();
            std::thread::spawn(move || {
                for _ in 0..PUTS {
                    let id = store.put(&[0u8; 64]).unwrap();
                    assert!(seen.lock().insert(id), "handle {} issued twice", id);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(seen.lock().len() as u64, THREADS * PUTS);
}

#[test]
fn test_concurrent_readers_and_writers() {
    let store = churn_store(units::mib(4));

    // Pre-populate entries the readers will hammer.
    let mut fixed = Vec::new();
    for i in 0..50u8 {
        fixed.push((store.put(&vec![i; 1024]).unwrap(), i));
    }
    let fixed = Arc::new(fixed);

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            let fixed = fixed.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let idx = rand::random::<usize>() % fixed.len();
                    let (id, fill) = fixed[idx];
                    let bytes = store.get(id).expect("fixed entries stay live");
                    assert!(bytes.iter().all(|&b| b == fill));
                }
            })
        })
        .collect();

    let writers: Vec<_> = (0..2)
        .map(|thread_id: u8| {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let id = store.put(&vec![0xF0 | thread_id; 2048]).unwrap();
                    store.remove(id);
                }
            })
        })
        .collect();

    for handle in readers.into_iter().chain(writers) {
        handle.join().unwrap();
    }

    // The fixed working set survived the churn intact.
    for &(id, fill) in fixed.iter() {
        assert_eq!(store.get(id).unwrap(), vec![fill; 1024]);
    }
    assert_eq!(store.len(), fixed.len());
}
