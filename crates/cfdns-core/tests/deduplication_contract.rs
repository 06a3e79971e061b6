//! Architectural Contract Test: Deduplication
//!
//! This test verifies that the callback only ever sees address changes.
//!
//! Constraints verified:
//! - Adjacent duplicates are suppressed
//! - A non-adjacent repeat is delivered again
//! - Recreating the source does not re-announce an unchanged address
//! - `last_address()` tracks the last delivered value
//! - Values fetched by a real poll loop are deduplicated the same way
//! - Sources that publish their own first read are not read twice
//!
//! If this test fails, someone has:
//! - Moved the last-known address into the source
//! - Reset deduplication state on restart
//! - Started comparing against something other than the previous delivery

mod common;

use cfdns_core::{ChangeCallback, SourceBuilder, Supervisor, SupervisorConfig, SupervisorEvent};
use common::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn adjacent_duplicates_are_suppressed() {
    let probe = Probe::new();
    let callback = RecordingCallback::new();
    let (mut supervisor, mut events) =
        probe_supervisor(&probe, &callback, Duration::from_secs(3_600));

    supervisor.start().unwrap();
    wait_for(&mut events, |e| matches!(e, SupervisorEvent::SourceStarted { .. })).await;

    assert!(probe.push(0, ip("1.2.3.4")));
    assert!(probe.push(0, ip("1.2.3.4")));
    assert!(probe.push(0, ip("5.6.7.8")));

    let seen = wait_for(&mut events, |e| {
        *e == SupervisorEvent::AddressChanged { address: ip("5.6.7.8") }
    })
    .await;

    assert!(seen.contains(&SupervisorEvent::DuplicateSuppressed {
        address: ip("1.2.3.4")
    }));
    assert_eq!(
        callback.calls(),
        vec![ip("1.2.3.4"), ip("5.6.7.8")],
        "callback must fire once per distinct adjacent address"
    );
    assert_eq!(supervisor.last_address().await, Some(ip("5.6.7.8")));

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn non_adjacent_repeat_is_delivered() {
    let probe = Probe::new();
    let callback = RecordingCallback::new();
    let (mut supervisor, mut events) =
        probe_supervisor(&probe, &callback, Duration::from_secs(3_600));

    supervisor.start().unwrap();
    wait_for(&mut events, |e| matches!(e, SupervisorEvent::SourceStarted { .. })).await;

    for address in ["1.2.3.4", "5.6.7.8", "1.2.3.4"] {
        assert!(probe.push(0, ip(address)));
    }

    // Wait for the third delivery
    let mut delivered = 0;
    wait_for(&mut events, |e| {
        if matches!(e, SupervisorEvent::AddressChanged { .. }) {
            delivered += 1;
        }
        delivered == 3
    })
    .await;

    assert_eq!(
        callback.calls(),
        vec![ip("1.2.3.4"), ip("5.6.7.8"), ip("1.2.3.4")]
    );

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn initial_read_is_delivered() {
    let probe = Probe::new();
    probe.set_current(Some(ip("203.0.113.7")));
    let callback = RecordingCallback::new();
    let (mut supervisor, mut events) =
        probe_supervisor(&probe, &callback, Duration::from_secs(3_600));

    assert_eq!(supervisor.last_address().await, None);
    supervisor.start().unwrap();

    wait_for(&mut events, |e| {
        *e == SupervisorEvent::AddressChanged { address: ip("203.0.113.7") }
    })
    .await;

    assert_eq!(callback.calls(), vec![ip("203.0.113.7")]);
    assert_eq!(supervisor.last_address().await, Some(ip("203.0.113.7")));

    supervisor.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unchanged_address_survives_recreation() {
    let probe = Probe::new();
    probe.set_current(Some(ip("1.2.3.4")));
    let callback = RecordingCallback::new();
    let (mut supervisor, mut events) =
        probe_supervisor(&probe, &callback, Duration::from_secs(60));

    supervisor.start().unwrap();

    // Two restarts, each new source reporting the same address
    wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::SourceStarted { generation: 3, .. })
    })
    .await;
    wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::DuplicateSuppressed { .. })
    })
    .await;

    assert_eq!(
        callback.calls(),
        vec![ip("1.2.3.4")],
        "recreating the source must not re-announce an unchanged address"
    );
    assert_eq!(probe.built(), 3);
    assert_eq!(probe.stopped(), 2);

    supervisor.stop().await.unwrap();
    assert_eq!(probe.stopped(), 3);
}

#[tokio::test(start_paused = true)]
async fn polled_repeats_are_suppressed() {
    let builder = ScriptedPollBuilder::new(
        &["1.2.3.4", "1.2.3.4", "5.6.7.8"],
        Duration::from_secs(5),
    );
    let callback = RecordingCallback::new();
    let (mut supervisor, mut events) = Supervisor::new(
        Arc::clone(&builder) as Arc<dyn SourceBuilder>,
        Arc::clone(&callback) as Arc<dyn ChangeCallback>,
        SupervisorConfig::with_restart_period(Duration::from_secs(86_400)),
    )
    .unwrap();

    supervisor.start().unwrap();
    let seen = wait_for(&mut events, |e| {
        *e == SupervisorEvent::AddressChanged { address: ip("5.6.7.8") }
    })
    .await;

    assert_eq!(callback.calls(), vec![ip("1.2.3.4"), ip("5.6.7.8")]);
    assert!(seen.contains(&SupervisorEvent::DuplicateSuppressed {
        address: ip("1.2.3.4")
    }));
    // The poll loop fetched every value; the supervisor took none itself
    assert_eq!(builder.remaining(), 0);

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn self_reading_source_is_not_read_again() {
    let probe = Probe::new();
    probe.set_reads_on_start(true);
    probe.set_current(Some(ip("1.2.3.4")));
    let callback = RecordingCallback::new();
    let (mut supervisor, mut events) =
        probe_supervisor(&probe, &callback, Duration::from_secs(3_600));

    supervisor.start().unwrap();
    wait_for(&mut events, |e| matches!(e, SupervisorEvent::SourceStarted { .. })).await;

    assert!(probe.push(0, ip("5.6.7.8")));
    wait_for(&mut events, |e| {
        *e == SupervisorEvent::AddressChanged { address: ip("5.6.7.8") }
    })
    .await;

    assert_eq!(probe.reads(), 0);
    assert_eq!(callback.calls(), vec![ip("5.6.7.8")]);

    supervisor.stop().await.unwrap();
}
