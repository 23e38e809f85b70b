//! Job Table Capacity Tests
//!
//! Validates id allocation, exhaustion and reuse through the device API,
//! including concurrent acquisition from many threads.

use core_types::{CoreError, JobState, KernelId, JOBS_Q_SZ, MAX_ARGS};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use tests_resilience::test_bootstrap;

#[test]
fn test_full_table_then_exhaustion() {
    let rig = test_bootstrap(2);

    let mut ids = HashSet::new();
    for _ in 0..JOBS_Q_SZ {
        let id = rig.device.acquire_job().expect("acquire within capacity");
        assert!(ids.insert(id), "duplicate id {}", id);
    }
    assert_eq!(ids.len(), 250);

    assert!(matches!(
        rig.device.acquire_job(),
        Err(CoreError::ResourceExhausted(_))
    ));
    assert!(rig.device.acquire_job().unwrap_err().is_retryable());
}

#[test]
fn test_release_makes_id_reusable_and_clean() {
    let rig = test_bootstrap(2);
    let id = rig.device.acquire_job().unwrap();
    rig.device.set_kernel_id(id, KernelId(42)).unwrap();
    rig.device.set_arg(id, 0, &0xdead_beef_u32.to_ne_bytes()).unwrap();
    rig.device.set_arg(id, 3, &u64::MAX.to_ne_bytes()).unwrap();
    assert_eq!(rig.device.arg_count(id).unwrap(), 4);

    assert_eq!(rig.device.release_job(id).unwrap(), JobState::Requested);
    let again = rig.device.acquire_job().unwrap();
    assert_eq!(again, id);

    assert_eq!(rig.device.kernel_id(again).unwrap(), KernelId::default());
    assert_eq!(rig.device.arg_count(again).unwrap(), 0);
    for idx in 0..MAX_ARGS {
        let mut out = [0xffu8; 8];
        rig.device.get_arg(again, idx, &mut out).unwrap();
        assert_eq!(out, [0u8; 8]);
        assert!(!rig.device.is_arg_64bit(again, idx).unwrap());
    }
}

#[test]
fn test_release_of_ready_id_is_noop() {
    let rig = test_bootstrap(1);
    let id = rig.device.acquire_job().unwrap();
    rig.device.release_job(id).unwrap();
    assert_eq!(rig.device.release_job(id).unwrap(), JobState::Ready);
}

#[test]
fn test_concurrent_acquire_returns_distinct_ids() {
    const THREADS: usize = 16;
    const PER_THREAD: usize = 10;

    let rig = test_bootstrap(1);
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let device = Arc::clone(&rig.device);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..PER_THREAD)
                    .map(|_| device.acquire_job().unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id), "{} handed out twice", id);
        }
    }
    assert_eq!(seen.len(), THREADS * PER_THREAD);
}

#[test]
fn test_argument_index_out_of_range() {
    let rig = test_bootstrap(1);
    let id = rig.device.acquire_job().unwrap();
    assert!(matches!(
        rig.device.set_arg(id, 40, &7u32.to_ne_bytes()),
        Err(CoreError::InvalidArgument(_))
    ));
    assert!(matches!(
        rig.device.set_arg(id, 1, &[1, 2, 3]),
        Err(CoreError::InvalidArgument(_))
    ));
}

#[test]
fn test_arguments_frozen_after_scheduling() {
    let rig = test_bootstrap(2);
    let id = rig.dispatch(1).unwrap();
    assert!(matches!(
        rig.device.set_arg(id, 0, &1u32.to_ne_bytes()),
        Err(CoreError::InvalidState(_))
    ));
    assert!(matches!(
        rig.device.set_kernel_id(id, KernelId(1)),
        Err(CoreError::InvalidState(_))
    ));
}
