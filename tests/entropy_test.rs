use std::sync::Arc;
use std::thread;

use securebytes::entropy::{EntropyPool, EntropySource};
use securebytes::SecureBytesError;

#[test]
fn test_pool_lifecycle() {
    let pool = EntropyPool::new(512).unwrap();

    let bytes = pool.get_bytes(32).unwrap();
    assert_eq!(bytes.len(), 32);
    assert!(pool.available().unwrap() <= pool.capacity());

    pool.shutdown();
    assert!(matches!(
        pool.get_bytes(1),
        Err(SecureBytesError::EntropyUnavailable(_))
    ));
}

#[test]
fn test_blocking_reads_from_many_threads() {
    let pool = Arc::new(EntropyPool::new(2048).unwrap());
    let mut handles = Vec::new();

    for _ in 0..4 {
        let pool = pool.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..8 {
                assert_eq!(pool.get_bytes(32).unwrap().len(), 32);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    pool.shutdown();
}

#[test]
fn test_sequences_never_repeat() {
    let pool = EntropyPool::new(1024).unwrap();

    let first = pool.get_bytes(128).unwrap();
    let second = pool.get_bytes(128).unwrap();

    // A repeat is theoretically possible but vanishingly unlikely.
    assert_ne!(first, second);

    pool.shutdown();
}

#[test]
fn test_global_pool_serves_all_callers() {
    let pool = EntropyPool::global().unwrap();

    let bytes = pool.get_bytes(64).unwrap();
    assert_eq!(bytes.len(), 64);

    let extra = pool.get_available_bytes(64).unwrap();
    assert!(extra.len() <= 64);
}
