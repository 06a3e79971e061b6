//! Cancellable interval loop shared by the polling address sources
//!
//! [`PollLoop`] runs a fetch closure once immediately and then once per
//! interval tick, publishing every non-absent result into the source's
//! [`AddressSender`]. Every wait races a oneshot stop signal, so
//! [`PollLoop::stop`] returns after scheduling latency rather than after the
//! remaining interval.
//!
//! A failed fetch is logged and the loop carries on with the next tick.

use crate::error::{Error, Result};
use crate::traits::AddressSender;
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Smallest interval accepted by the loop (`tokio::time::interval` rejects zero)
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to a running poll task
///
/// Dropping the handle without calling [`PollLoop::stop`] also ends the task
/// (the stop signal resolves when its sender is dropped), but does not wait
/// for it.
#[derive(Debug)]
pub struct PollLoop {
    kind: &'static str,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PollLoop {
    /// Spawn a poll task
    ///
    /// # Parameters
    ///
    /// - `kind`: Source kind, used in log fields
    /// - `interval`: Time between fetches
    /// - `sender`: Channel observed addresses are published into
    /// - `fetch`: Reads the current address once
    pub fn spawn<F, Fut>(
        kind: &'static str,
        interval: Duration,
        sender: AddressSender,
        fetch: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<IpAddr>>> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run(kind, interval, sender, fetch, shutdown_rx));

        Self {
            kind,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Whether the poll task is still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the poll task to stop and wait for it to exit
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            // The task may already have exited on its own
            let _ = tx.send(());
        }

        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| Error::stop(format!("{} poll task failed: {}", self.kind, e))),
            None => Ok(()),
        }
    }
}

async fn run<F, Fut>(
    kind: &'static str,
    interval: Duration,
    sender: AddressSender,
    fetch: F,
    mut shutdown_rx: oneshot::Receiver<()>,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<IpAddr>>> + Send + 'static,
{
    let period = interval.max(MIN_INTERVAL);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(source = kind, interval = ?period, "Poll loop started");

    loop {
        // First tick completes immediately
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            _ = ticker.tick() => {}
        }

        let keep_going = tokio::select! {
            biased;
            _ = &mut shutdown_rx => false,
            keep_going = poll_once(kind, &fetch, &sender) => keep_going,
        };

        if !keep_going {
            break;
        }
    }

    debug!(source = kind, "Poll loop exited");
}

/// Fetch once and publish the result
///
/// Returns `false` once the receiving side is gone.
async fn poll_once<F, Fut>(kind: &'static str, fetch: &F, sender: &AddressSender) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<IpAddr>>>,
{
    match fetch().await {
        Ok(Some(addr)) => {
            debug!(source = kind, %addr, "Polled address");
            if sender.send(addr).await.is_err() {
                debug!(source = kind, "Address receiver dropped, stopping poll loop");
                return false;
            }
            true
        }
        Ok(None) => {
            debug!(source = kind, "No address determinable");
            true
        }
        Err(e) => {
            warn!(source = kind, error = %e, "Address poll failed, retrying on next tick");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Fetch closure replaying a script; "err" entries fail, `None` entries are absent
    fn scripted(
        script: Vec<Option<&'static str>>,
        calls: Arc<AtomicUsize>,
    ) -> impl Fn() -> std::future::Ready<Result<Option<IpAddr>>> + Send + Sync + 'static {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let result = match script.get(n).copied().flatten() {
                Some("err") => Err(Error::transport("scripted failure")),
                Some(addr) => Ok(Some(addr.parse().unwrap())),
                None => Ok(None),
            };
            std::future::ready(result)
        }
    }

    #[tokio::test]
    async fn test_stop_returns_promptly_with_long_interval() {
        let (tx, _rx) = mpsc::channel(16);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut poll = PollLoop::spawn(
            "test",
            Duration::from_secs(300),
            tx,
            scripted(vec![Some("1.2.3.4")], calls),
        );

        let started = std::time::Instant::now();
        tokio::time::timeout(Duration::from_secs(5), poll.stop())
            .await
            .expect("stop should not wait for the interval")
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!poll.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fetch_is_immediate_then_per_interval() {
        let (tx, mut rx) = mpsc::channel(16);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut poll = PollLoop::spawn(
            "test",
            Duration::from_secs(5),
            tx,
            scripted(vec![Some("1.2.3.4"), Some("5.6.7.8")], calls.clone()),
        );

        let start = tokio::time::Instant::now();
        assert_eq!(rx.recv().await, Some("1.2.3.4".parse().unwrap()));
        assert!(start.elapsed() < Duration::from_secs(1));

        assert_eq!(rx.recv().await, Some("5.6.7.8".parse().unwrap()));
        assert!(start.elapsed() >= Duration::from_secs(5));

        poll.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_does_not_end_loop() {
        let (tx, mut rx) = mpsc::channel(16);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut poll = PollLoop::spawn(
            "test",
            Duration::from_secs(5),
            tx,
            scripted(vec![Some("err"), None, Some("9.9.9.9")], calls.clone()),
        );

        assert_eq!(rx.recv().await, Some("9.9.9.9".parse().unwrap()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(poll.is_running());

        poll.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_receiver_ends_loop() {
        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        let calls = Arc::new(AtomicUsize::new(0));
        let mut poll = PollLoop::spawn(
            "test",
            Duration::from_secs(5),
            tx,
            scripted(vec![Some("1.2.3.4")], calls.clone()),
        );

        // The first publish fails and the task exits without further ticks
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!poll.is_running());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        poll.stop().await.unwrap();
    }
}
