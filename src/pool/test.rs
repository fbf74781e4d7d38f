use std::sync::Arc;

use super::Pool;
use crate::memory;
use crate::sample::Sample;

#[test]
fn test_exhaustion_returns_none() {
    let mem = memory::default_type();
    let pool = Pool::new(4, 128, &mem).unwrap();

    let mut held = vec![];
    for _ in 0..4 {
        held.push(pool.get().expect("pool should have a free block"));
    }
    assert!(pool.get().is_none());
    assert_eq!(pool.available(), 0);

    for smp in held {
        Sample::decref(smp);
    }
    assert_eq!(pool.available(), 4);
}

#[test]
fn test_blocksz_cacheline_aligned() {
    let mem = memory::default_type();
    let pool = Pool::new(2, 100, &mem).unwrap();

    assert_eq!(pool.blocksz() % *crate::ffi::CACHELINE_SIZE, 0);
    assert!(pool.blocksz() >= 100);
}

#[test]
fn test_sample_capacity_matches_blocksz() {
    let mem = memory::default_type();
    let pool = Pool::for_samples(2, 16, &mem).unwrap();

    let smp = pool.get().unwrap();
    assert!(smp.capacity() >= 16);
    assert_eq!(smp.capacity(), pool.sample_capacity());
    Sample::decref(smp);
}

#[test]
fn test_get_many_partial() {
    let mem = memory::default_type();
    let pool = Pool::new(3, 128, &mem).unwrap();

    let mut smps = vec![];
    assert_eq!(pool.get_many(&mut smps, 8), 3);
    assert_eq!(smps.len(), 3);

    Sample::decref_many(&smps);
}

#[test]
fn test_concurrent_get_put() {
    let mem = memory::default_type();
    let pool = Pool::new(64, 128, &mem).unwrap();

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    if let Some(smp) = pool.get() {
                        assert_eq!(smp.refcnt(), 1);
                        Sample::decref(smp);
                    }
                }
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(pool.available(), 64);
}
