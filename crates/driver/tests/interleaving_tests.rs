//! Detach racing with completions and handle operations
//!
//! Each round attaches a device, lets a "hardware" thread complete interrupt
//! reads as fast as the session re-arms them and a reader thread hammer an
//! open handle, then detaches from the main thread after a seeded random
//! delay. After detach no callback may reach the released session and every
//! handle operation must fail.

use common::test_utils::{MockTransport, value_frame};
use common::{DeviceId, TransportError};
use driver::{Driver, DriverConfig, DriverError, SessionState};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const ROUNDS: u64 = 64;

fn run_round(seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let driver = Arc::new(Driver::new(&DriverConfig::default().driver));
    let id = DeviceId(rng.random_range(1..=9999));
    let mock = Arc::new(MockTransport::yurex());
    let cookie = driver.on_attach(id, mock.clone()).unwrap();
    let session = driver.registry().get(id).unwrap();
    let mut handle = driver.open(&session.names().counter).unwrap();

    let hardware = {
        let mock = mock.clone();
        let mut rng = StdRng::seed_from_u64(seed ^ 0x5eed);
        thread::spawn(move || {
            let mut completed = 0u64;
            loop {
                let delivered = if rng.random_bool(0.1) {
                    mock.fail(TransportError::Timeout)
                } else {
                    mock.complete(&value_frame(rng.random_range(0..1_000_000)))
                };
                if delivered {
                    completed += 1;
                } else if mock.is_cancelled() {
                    return completed;
                } else {
                    thread::yield_now();
                }
            }
        })
    };

    let reader_saw_detach = Arc::new(AtomicBool::new(false));
    let reader = {
        let driver = driver.clone();
        let seen = reader_saw_detach.clone();
        thread::spawn(move || {
            loop {
                match driver.read(&mut handle, 0, 16) {
                    Ok(line) => assert_eq!(line.last(), Some(&b'\n')),
                    Err(DriverError::StateInvalid(_)) => {
                        seen.store(true, Ordering::Release);
                        return;
                    }
                    Err(e) => panic!("unexpected read error: {}", e),
                }
            }
        })
    };

    thread::sleep(Duration::from_micros(rng.random_range(0..2000)));
    driver.on_detach(cookie).unwrap();

    hardware.join().unwrap();
    reader.join().unwrap();

    assert!(reader_saw_detach.load(Ordering::Acquire));
    assert_eq!(session.state(), SessionState::Released);
    assert_eq!(session.late_completions(), 0, "seed {}", seed);
    assert!(mock.is_cancelled());
    assert!(!mock.has_pending());
    assert!(!mock.complete(&value_frame(1)));
    assert_eq!(driver.registry().count(), 0);
}

#[test]
fn test_detach_races_completions() {
    for seed in 0..ROUNDS {
        run_round(seed);
    }
}

#[test]
fn test_many_devices_detached_concurrently() {
    let driver = Arc::new(Driver::new(&DriverConfig::default().driver));
    let devices: Vec<_> = (1..=8)
        .map(|n| {
            let mock = Arc::new(MockTransport::yurex());
            let cookie = driver.on_attach(DeviceId(n), mock.clone()).unwrap();
            (mock, cookie)
        })
        .collect();
    let sessions = driver.registry().sessions();
    assert_eq!(driver.publish_devices().len(), 16);

    let handles: Vec<_> = devices
        .into_iter()
        .enumerate()
        .map(|(n, (mock, cookie))| {
            let driver = driver.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(n as u64);
                for _ in 0..rng.random_range(1..50) {
                    mock.complete(&value_frame(rng.random_range(0..1000)));
                }
                driver.on_detach(cookie).unwrap();
                assert!(mock.is_cancelled());
                assert!(!mock.has_pending());
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(driver.registry().count(), 0);
    assert!(driver.publish_devices().is_empty());
    for session in sessions {
        assert_eq!(session.state(), SessionState::Released);
        assert_eq!(session.late_completions(), 0);
    }
}

#[test]
fn test_attach_while_publishing() {
    let driver = Arc::new(Driver::new(&DriverConfig::default().driver));
    let done = Arc::new(AtomicBool::new(false));

    let publisher = {
        let driver = driver.clone();
        let done = done.clone();
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                let names = driver.publish_devices();
                assert_eq!(names.len() % 2, 0);
                for pair in names.chunks(2) {
                    assert!(pair[0].ends_with("/bbu"));
                    assert!(pair[1].ends_with("/animation"));
                }
            }
        })
    };

    let mut mocks = Vec::new();
    for n in 1..=16 {
        let mock = Arc::new(MockTransport::yurex());
        let cookie = driver.on_attach(DeviceId(n), mock.clone()).unwrap();
        mocks.push((mock, cookie));
    }
    for (_, cookie) in mocks.iter().step_by(2) {
        driver.on_detach(*cookie).unwrap();
    }

    done.store(true, Ordering::Release);
    publisher.join().unwrap();
    assert_eq!(driver.publish_devices().len(), 16);
}
