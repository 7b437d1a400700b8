// Declare the common module *within this test crate*
mod common;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use txgroup::prelude::*;

use common::{setup, wait_for_condition};

#[test]
fn test_concurrent_initiators_each_commit_exactly_once() {
    const CALLERS: usize = 16;
    let h = setup(Duration::from_secs(5));
    h.coordinator
        .reply_on_close(Some((Duration::from_millis(20), Decision::Commit)));
    let start = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|i| {
            let service = h.service.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                service.run(&format!("group-{}", i), GroupRole::Initiator, move || Ok(i))
            })
        })
        .collect();

    let mut values: Vec<usize> = handles
        .into_iter()
        .map(|handle| handle.join().expect("caller panicked").unwrap())
        .collect();
    values.sort();
    assert_eq!(values, (0..CALLERS).collect::<Vec<_>>());

    assert_eq!(h.tx_manager.commits(), CALLERS);
    assert_eq!(h.tx_manager.rollbacks(), 0);
    assert!(h.service.registry().is_empty());

    let requests = h.coordinator.close_requests();
    assert_eq!(requests.len(), CALLERS);
    assert!(requests.iter().all(|r| r.eligible_when_requested));
}

#[test]
fn test_reply_racing_timeout_applies_exactly_one_outcome() {
    // The coordinator answers right around the wait time, so some
    // participations commit and others time out. Each must settle on one.
    const CALLERS: usize = 24;
    let h = setup(Duration::from_millis(60));
    h.coordinator
        .reply_on_close(Some((Duration::from_millis(58), Decision::Commit)));

    let handles: Vec<_> = (0..CALLERS)
        .map(|i| {
            let service = h.service.clone();
            thread::spawn(move || {
                service.run(&format!("race-{}", i), GroupRole::Initiator, move || Ok(i))
            })
        })
        .collect();

    let results: Vec<Result<usize>> = handles
        .into_iter()
        .map(|handle| handle.join().expect("caller panicked"))
        .collect();

    let committed = results.iter().filter(|r| r.is_ok()).count();
    let timed_out = results
        .iter()
        .filter(|r| matches!(r, Err(TxError::Timeout)))
        .count();
    assert_eq!(committed + timed_out, CALLERS);
    assert_eq!(h.tx_manager.commits(), committed);
    assert_eq!(h.tx_manager.rollbacks(), timed_out);

    for (id, (commits, rollbacks)) in h.tx_manager.outcomes() {
        assert_eq!(
            commits + rollbacks,
            1,
            "transaction {} settled {} times",
            id,
            commits + rollbacks
        );
    }
    assert!(h.service.registry().is_empty());
}

#[test]
fn test_disconnect_during_mixed_roles_rolls_everything_back() {
    let h = setup(Duration::from_secs(10));
    h.coordinator.reply_on_close(None);

    for i in 0..4 {
        let value = h
            .service
            .run(&format!("shared-{}", i), GroupRole::Member, move || Ok(i))
            .unwrap();
        assert_eq!(value, i);
    }

    let initiators: Vec<_> = (0..4)
        .map(|i| {
            let service = h.service.clone();
            thread::spawn(move || {
                service.run(&format!("root-{}", i), GroupRole::Initiator, move || Ok(i))
            })
        })
        .collect();

    assert!(wait_for_condition(
        || h.service.registry().pending_keys().len() == 8,
        2_000
    ));
    assert_eq!(h.service.on_coordinator_disconnected(), 8);

    for handle in initiators {
        let result = handle.join().expect("caller panicked");
        assert!(matches!(result, Err(TxError::Network)), "got {:?}", result);
    }
    assert!(wait_for_condition(|| h.tx_manager.rollbacks() == 8, 2_000));
    assert_eq!(h.tx_manager.commits(), 0);
    assert!(wait_for_condition(|| h.service.registry().is_empty(), 2_000));
    // Nothing is left to sweep.
    assert_eq!(h.service.on_coordinator_disconnected(), 0);
}
