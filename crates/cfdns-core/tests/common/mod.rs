//! Test doubles and common utilities for supervisor contract tests
//!
//! This module provides minimal test doubles that verify architectural
//! constraints without touching the network.

#![allow(dead_code)]

use async_trait::async_trait;
use cfdns_core::error::{Error, Result};
use cfdns_core::config::SupervisorConfig;
use cfdns_core::supervisor::{ChangeCallback, Supervisor, SupervisorEvent};
use cfdns_core::traits::{AddressSender, AddressSource, Lifecycle, SourceBuilder};
use cfdns_core::{AddressFamily, PollLoop};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

/// Shared view into every source a [`ProbeBuilder`] has produced
///
/// Sources hand their channel to the probe on `start()`, so the test can push
/// addresses on behalf of any generation (index 0 is the first source).
#[derive(Default)]
pub struct Probe {
    built: AtomicUsize,
    started: AtomicUsize,
    stopped: AtomicUsize,
    build_failures: AtomicUsize,
    start_failures: AtomicUsize,
    stop_failures: AtomicUsize,
    reads: AtomicUsize,
    hang_builds: AtomicBool,
    hang_reads: AtomicBool,
    reads_on_start: AtomicBool,
    current: Mutex<Option<IpAddr>>,
    senders: Mutex<Vec<Option<AddressSender>>>,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Address returned by `current()` of every source
    pub fn set_current(&self, address: Option<IpAddr>) {
        *self.current.lock().unwrap() = address;
    }

    /// Fail the next `n` builds
    pub fn fail_builds(&self, n: usize) {
        self.build_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` starts
    pub fn fail_starts(&self, n: usize) {
        self.start_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` stops
    pub fn fail_stops(&self, n: usize) {
        self.stop_failures.store(n, Ordering::SeqCst);
    }

    /// Make every `build()` pend forever
    pub fn hang_builds(&self) {
        self.hang_builds.store(true, Ordering::SeqCst);
    }

    /// Make every `current()` pend forever
    pub fn hang_reads(&self) {
        self.hang_reads.store(true, Ordering::SeqCst);
    }

    /// Report sources as publishing their own first read
    pub fn set_reads_on_start(&self, value: bool) {
        self.reads_on_start.store(value, Ordering::SeqCst);
    }

    /// Number of `current()` calls across all sources
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Channel of the `index`-th started source
    pub fn sender(&self, index: usize) -> Option<AddressSender> {
        self.senders.lock().unwrap().get(index).cloned().flatten()
    }

    /// Push an address as the `index`-th started source
    ///
    /// Returns `false` if the supervisor no longer listens to that source.
    pub fn push(&self, index: usize, address: IpAddr) -> bool {
        match self.sender(index) {
            Some(sender) => sender.try_send(address).is_ok(),
            None => false,
        }
    }

    /// Drop the `index`-th source's channel, as if its listener died
    pub fn close(&self, index: usize) {
        if let Some(slot) = self.senders.lock().unwrap().get_mut(index) {
            slot.take();
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// A push-style source driven entirely by its [`Probe`]
pub struct ProbeSource {
    probe: Arc<Probe>,
    sender: Option<AddressSender>,
    lifecycle: Lifecycle,
}

#[async_trait]
impl AddressSource for ProbeSource {
    async fn current(&self) -> Result<Option<IpAddr>> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        if self.probe.hang_reads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(*self.probe.current.lock().unwrap())
    }

    fn register_callback(&mut self, sender: AddressSender) {
        self.sender = Some(sender);
    }

    async fn start(&mut self) -> Result<()> {
        let sender = self.lifecycle.begin_start_with(&mut self.sender)?;
        if Probe::take_failure(&self.probe.start_failures) {
            return Err(Error::transport("listener socket unavailable"));
        }

        self.probe.started.fetch_add(1, Ordering::SeqCst);
        self.probe.senders.lock().unwrap().push(Some(sender));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if self.lifecycle.begin_stop() {
            self.probe.stopped.fetch_add(1, Ordering::SeqCst);
        }
        self.sender = None;

        if Probe::take_failure(&self.probe.stop_failures) {
            return Err(Error::stop("listener refused to exit"));
        }
        Ok(())
    }

    fn family(&self) -> AddressFamily {
        AddressFamily::V4
    }

    fn kind(&self) -> &'static str {
        "probe"
    }

    fn reads_on_start(&self) -> bool {
        self.probe.reads_on_start.load(Ordering::SeqCst)
    }
}

/// Builds fresh [`ProbeSource`]s sharing one [`Probe`]
pub struct ProbeBuilder {
    probe: Arc<Probe>,
}

impl ProbeBuilder {
    pub fn new(probe: Arc<Probe>) -> Arc<Self> {
        Arc::new(Self { probe })
    }
}

#[async_trait]
impl SourceBuilder for ProbeBuilder {
    async fn build(&self) -> Result<Box<dyn AddressSource>> {
        if Probe::take_failure(&self.probe.build_failures) {
            return Err(Error::transport("network unavailable"));
        }
        if self.probe.hang_builds.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        self.probe.built.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ProbeSource {
            probe: Arc::clone(&self.probe),
            sender: None,
            lifecycle: Lifecycle::new("probe"),
        }))
    }
}

/// A callback that records every address it receives
#[derive(Default)]
pub struct RecordingCallback {
    calls: Mutex<Vec<IpAddr>>,
}

impl RecordingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<IpAddr> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeCallback for RecordingCallback {
    async fn on_change(&self, address: IpAddr) {
        self.calls.lock().unwrap().push(address);
    }
}

/// A callback that blocks for a long time on every address
pub struct SlowCallback {
    delay: Duration,
    entered: Notify,
    finished: AtomicUsize,
}

impl SlowCallback {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            entered: Notify::new(),
            finished: AtomicUsize::new(0),
        })
    }

    /// Resolves once a call has begun
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeCallback for SlowCallback {
    async fn on_change(&self, _address: IpAddr) {
        self.entered.notify_one();
        tokio::time::sleep(self.delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// A polling source replaying a fixed script through the real [`PollLoop`]
///
/// Each fetch pops the next scripted address; an exhausted script reads as
/// absent.
pub struct ScriptedPollSource {
    script: Arc<Mutex<VecDeque<IpAddr>>>,
    interval: Duration,
    sender: Option<AddressSender>,
    lifecycle: Lifecycle,
    poll: Option<PollLoop>,
}

#[async_trait]
impl AddressSource for ScriptedPollSource {
    async fn current(&self) -> Result<Option<IpAddr>> {
        Ok(self.script.lock().unwrap().pop_front())
    }

    fn register_callback(&mut self, sender: AddressSender) {
        self.sender = Some(sender);
    }

    async fn start(&mut self) -> Result<()> {
        let sender = self.lifecycle.begin_start_with(&mut self.sender)?;
        let script = Arc::clone(&self.script);
        self.poll = Some(PollLoop::spawn("scripted", self.interval, sender, move || {
            let next = script.lock().unwrap().pop_front();
            async move { Ok(next) }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.lifecycle.begin_stop() {
            return Ok(());
        }
        match self.poll.take() {
            Some(mut poll) => poll.stop().await,
            None => Ok(()),
        }
    }

    fn family(&self) -> AddressFamily {
        AddressFamily::V4
    }

    fn kind(&self) -> &'static str {
        "scripted"
    }

    fn reads_on_start(&self) -> bool {
        true
    }
}

/// Builds [`ScriptedPollSource`]s sharing one script
pub struct ScriptedPollBuilder {
    script: Arc<Mutex<VecDeque<IpAddr>>>,
    interval: Duration,
}

impl ScriptedPollBuilder {
    pub fn new(script: &[&str], interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::new(Mutex::new(script.iter().map(|s| ip(s)).collect())),
            interval,
        })
    }

    /// Scripted addresses not fetched yet
    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl SourceBuilder for ScriptedPollBuilder {
    async fn build(&self) -> Result<Box<dyn AddressSource>> {
        Ok(Box::new(ScriptedPollSource {
            script: Arc::clone(&self.script),
            interval: self.interval,
            sender: None,
            lifecycle: Lifecycle::new("scripted"),
            poll: None,
        }))
    }
}

/// Receive events until one matches `predicate`, returning everything seen
///
/// The generous timeout also holds under a paused clock, where it must stay
/// longer than any restart period used by the tests.
pub async fn wait_for<F>(
    events: &mut mpsc::Receiver<SupervisorEvent>,
    mut predicate: F,
) -> Vec<SupervisorEvent>
where
    F: FnMut(&SupervisorEvent) -> bool,
{
    let mut seen = Vec::new();
    let result = tokio::time::timeout(Duration::from_secs(3_600), async {
        while let Some(event) = events.recv().await {
            let done = predicate(&event);
            seen.push(event);
            if done {
                return true;
            }
        }
        false
    })
    .await;

    assert!(
        matches!(result, Ok(true)),
        "expected event never arrived, saw: {:?}",
        seen
    );
    seen
}

/// Supervisor wired to a [`ProbeBuilder`] and a [`RecordingCallback`]
pub fn probe_supervisor(
    probe: &Arc<Probe>,
    callback: &Arc<RecordingCallback>,
    restart_period: Duration,
) -> (Supervisor, mpsc::Receiver<SupervisorEvent>) {
    Supervisor::new(
        ProbeBuilder::new(Arc::clone(probe)),
        Arc::clone(callback) as Arc<dyn ChangeCallback>,
        SupervisorConfig::with_restart_period(restart_period),
    )
    .expect("supervisor construction succeeds")
}

/// Drain events already queued after the supervisor stopped
pub fn drain(events: &mut mpsc::Receiver<SupervisorEvent>) -> Vec<SupervisorEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}
