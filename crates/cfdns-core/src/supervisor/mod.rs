//! Self-healing address supervisor
//!
//! The Supervisor is responsible for:
//! - Owning exactly one address source at a time
//! - Suppressing adjacent duplicate addresses
//! - Forwarding address changes to the caller's callback
//! - Tearing down and recreating the source on a fixed cadence
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  build()   ┌───────────────┐  IpAddr   ┌──────────────┐
//! │SourceBuilder │──────────▶ │ AddressSource │─────────▶ │ control task │
//! └──────────────┘            └───────────────┘  (mpsc)   └──────────────┘
//!                                                                │ dedup
//!                                                                ▼
//!                                                        ┌──────────────┐
//!                                                        │ChangeCallback│
//!                                                        └──────────────┘
//! ```
//!
//! ## Control Loop
//!
//! 1. Acquire: build a source, register a fresh channel, start it, read once
//! 2. Wait: deliver addresses until the restart period elapses or stop is requested
//! 3. Release: drop the channel, stop the source
//! 4. Exit if stop was requested, otherwise go to 1
//!
//! Failures in acquire and release are logged and never leave the supervisor.
//! Every await other than a release also races the stop signal, so a
//! hung build, read or callback cannot hold up `stop()`.
//! The restart is health-agnostic: a source that silently stopped delivering
//! (e.g. a netlink socket that went quiet) is replaced on the next tick.
//!
//! ## Deduplication
//!
//! The last delivered address lives in the supervisor, not in the source, so
//! recreating the source does not re-announce an unchanged address. Every
//! generation gets its own channel, and that channel is dropped before the
//! outgoing source is stopped: values still in flight from a superseded
//! source are discarded rather than delivered.

use crate::config::SupervisorConfig;
use crate::error::{Error, Result};
use crate::traits::{AddressSource, SourceBuilder};
use async_trait::async_trait;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Events emitted by the Supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// Control loop started
    Started,

    /// A source was built and started
    SourceStarted {
        generation: u64,
        kind: &'static str,
    },

    /// Building or starting a source failed; retried after the restart period
    SourceFailed { generation: u64, error: String },

    /// A new address was delivered; emitted after the callback returned
    AddressChanged { address: IpAddr },

    /// An address equal to the last delivered one was dropped
    DuplicateSuppressed { address: IpAddr },

    /// A source generation was released
    SourceReleased { generation: u64 },

    /// Control loop exited
    Stopped,
}

/// Receives deduplicated address changes
///
/// Invoked from the supervisor's control task, at most once per distinct new
/// address and never with a value equal to the previously delivered one.
#[async_trait]
pub trait ChangeCallback: Send + Sync {
    /// Handle a new address
    async fn on_change(&self, address: IpAddr);
}

#[async_trait]
impl<F> ChangeCallback for F
where
    F: Fn(IpAddr) + Send + Sync,
{
    async fn on_change(&self, address: IpAddr) {
        self(address)
    }
}

/// Self-healing address supervisor
///
/// ## Lifecycle
///
/// 1. Create with [`Supervisor::new()`]
/// 2. Start with [`Supervisor::start()`]
/// 3. Stop with [`Supervisor::stop()`], which waits for the final release
pub struct Supervisor {
    /// Control loop state, moved into the control task on start
    control: Option<ControlLoop>,

    /// Last delivered address, shared with the control task
    last_known: Arc<RwLock<Option<IpAddr>>>,

    /// Stop signal for the control task
    shutdown_tx: Option<oneshot::Sender<()>>,

    /// Control task handle
    handle: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Create a new supervisor
    ///
    /// # Parameters
    ///
    /// - `builder`: Zero-argument source factory, invoked at start and on every restart
    /// - `callback`: Receives deduplicated address changes
    /// - `config`: Restart period and channel capacities
    ///
    /// # Returns
    ///
    /// A tuple of (supervisor, event_receiver) where event_receiver yields supervisor events
    pub fn new(
        builder: Arc<dyn SourceBuilder>,
        callback: Arc<dyn ChangeCallback>,
        config: SupervisorConfig,
    ) -> Result<(Self, mpsc::Receiver<SupervisorEvent>)> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        let last_known = Arc::new(RwLock::new(None));

        let control = ControlLoop {
            builder,
            callback,
            restart_period: config.restart_period(),
            address_channel_capacity: config.address_channel_capacity,
            last_known: Arc::clone(&last_known),
            event_tx,
        };

        let supervisor = Self {
            control: Some(control),
            last_known,
            shutdown_tx: None,
            handle: None,
        };

        Ok((supervisor, event_rx))
    }

    /// Spawn the control loop
    ///
    /// Must be called from within a tokio runtime. A supervisor can be started once.
    pub fn start(&mut self) -> Result<()> {
        let control = self
            .control
            .take()
            .ok_or_else(|| Error::lifecycle("supervisor already started"))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);
        self.handle = Some(tokio::spawn(control.run(shutdown_rx)));

        debug!("Supervisor control task spawned");
        Ok(())
    }

    /// Request shutdown and wait for the control loop to exit
    ///
    /// Returns once the current source has been released. Calling `stop()` on
    /// a supervisor that was never started, or twice, is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| Error::stop(format!("supervisor control task failed: {}", e))),
            None => Ok(()),
        }
    }

    /// Whether the control loop is running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// The most recently delivered address, if any
    pub async fn last_address(&self) -> Option<IpAddr> {
        *self.last_known.read().await
    }
}

/// State owned by the control task
struct ControlLoop {
    builder: Arc<dyn SourceBuilder>,
    callback: Arc<dyn ChangeCallback>,
    restart_period: Duration,
    address_channel_capacity: usize,
    last_known: Arc<RwLock<Option<IpAddr>>>,
    event_tx: mpsc::Sender<SupervisorEvent>,
}

impl ControlLoop {
    async fn run(self, shutdown_rx: oneshot::Receiver<()>) {
        info!(restart_period = ?self.restart_period, "Supervisor started");
        self.emit_event(SupervisorEvent::Started);

        let mut shutdown = Shutdown::new(shutdown_rx);
        let mut generation: u64 = 0;
        loop {
            generation += 1;

            let (mut source, mut receiver) = match self.acquire(generation, &mut shutdown).await {
                Some((source, receiver)) => (Some(source), Some(receiver)),
                None => (None, None),
            };

            self.wait(&mut shutdown, &mut receiver).await;

            // Fence the generation before stopping its source
            drop(receiver);
            if let Some(source) = source.as_mut() {
                self.release(generation, source.as_mut()).await;
            }

            if shutdown.requested() {
                break;
            }
            debug!(generation, "Restarting address source");
        }

        info!("Supervisor stopped");
        self.emit_event(SupervisorEvent::Stopped);
    }

    /// Build, wire and start a source, then read its current address once
    ///
    /// Returns `None` if the source could not be built or started, or if stop
    /// was requested before it was running.
    async fn acquire(
        &self,
        generation: u64,
        shutdown: &mut Shutdown,
    ) -> Option<(Box<dyn AddressSource>, mpsc::Receiver<IpAddr>)> {
        let mut source = match shutdown.guard(self.builder.build()).await? {
            Ok(source) => source,
            Err(e) => {
                error!(generation, error = %e, "Failed to create address source");
                self.emit_event(SupervisorEvent::SourceFailed {
                    generation,
                    error: e.to_string(),
                });
                return None;
            }
        };

        let (tx, rx) = mpsc::channel(self.address_channel_capacity);
        source.register_callback(tx);

        let started = shutdown.guard(source.start()).await;
        match started {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                error!(generation, source = source.kind(), error = %e, "Failed to start address source");
                if let Err(stop_err) = source.stop().await {
                    warn!(generation, error = %stop_err, "Failed to release address source after start failure");
                }
                self.emit_event(SupervisorEvent::SourceFailed {
                    generation,
                    error: e.to_string(),
                });
                return None;
            }
            None => {
                debug!(generation, "Stop requested while starting address source");
                drop(rx);
                self.release(generation, source.as_mut()).await;
                return None;
            }
        }

        info!(
            generation,
            source = source.kind(),
            family = %source.family(),
            "Address source started"
        );
        self.emit_event(SupervisorEvent::SourceStarted {
            generation,
            kind: source.kind(),
        });

        // Poll sources publish their first read themselves
        if !source.reads_on_start() {
            match shutdown.guard(source.current()).await {
                Some(Ok(Some(address))) => {
                    shutdown.guard(self.deliver(address)).await;
                }
                Some(Ok(None)) => error!(generation, "Couldn't find a valid address"),
                Some(Err(e)) => warn!(generation, error = %e, "Initial address read failed"),
                None => debug!(generation, "Stop requested during initial address read"),
            }
        }

        Some((source, rx))
    }

    /// Deliver addresses until the restart deadline or a stop request
    async fn wait(&self, shutdown: &mut Shutdown, receiver: &mut Option<mpsc::Receiver<IpAddr>>) {
        let deadline = tokio::time::sleep(self.restart_period);
        tokio::pin!(deadline);

        loop {
            let wake = shutdown
                .guard(async {
                    tokio::select! {
                        biased;
                        _ = &mut deadline => Wake::Deadline,
                        received = next_address(receiver) => match received {
                            Some(address) => Wake::Address(address),
                            None => Wake::Closed,
                        },
                    }
                })
                .await;

            match wake {
                None | Some(Wake::Deadline) => return,
                Some(Wake::Address(address)) => {
                    if shutdown.guard(self.deliver(address)).await.is_none() {
                        return;
                    }
                }
                Some(Wake::Closed) => {
                    warn!("Address source closed its channel, waiting for next restart");
                    *receiver = None;
                }
            }
        }
    }

    /// Stop a source, logging failures
    async fn release(&self, generation: u64, source: &mut dyn AddressSource) {
        match source.stop().await {
            Ok(()) => debug!(generation, source = source.kind(), "Address source released"),
            Err(e) => warn!(generation, source = source.kind(), error = %e, "Failed to stop address source"),
        }
        self.emit_event(SupervisorEvent::SourceReleased { generation });
    }

    /// Deduplicate and forward an address
    ///
    /// The only writer of the last-known address.
    async fn deliver(&self, address: IpAddr) {
        {
            let mut last_known = self.last_known.write().await;
            if *last_known == Some(address) {
                debug!(%address, "Address unchanged, suppressing duplicate");
                self.emit_event(SupervisorEvent::DuplicateSuppressed { address });
                return;
            }
            *last_known = Some(address);
        }

        info!(%address, "Address changed");
        self.callback.on_change(address).await;
        self.emit_event(SupervisorEvent::AddressChanged { address });
    }

    fn emit_event(&self, event: SupervisorEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Supervisor event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            // Nobody is listening for events
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// What ended one wait in the control loop
enum Wake {
    Deadline,
    Address(IpAddr),
    Closed,
}

/// Stop signal of the control task
///
/// Every await in the control loop goes through [`Shutdown::guard`], so a
/// stop request cancels a pending build, start, read or callback. Once
/// requested, guarded futures are not polled at all.
struct Shutdown {
    rx: oneshot::Receiver<()>,
    requested: bool,
}

impl Shutdown {
    fn new(rx: oneshot::Receiver<()>) -> Self {
        Self { rx, requested: false }
    }

    fn requested(&self) -> bool {
        self.requested
    }

    /// Run `fut` unless stop is requested first
    ///
    /// Also resolves as stopped if the `Supervisor` handle was dropped.
    async fn guard<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        if self.requested {
            return None;
        }

        tokio::select! {
            biased;
            _ = &mut self.rx => {
                self.requested = true;
                None
            }
            output = fut => Some(output),
        }
    }
}

/// Next address from the current generation, pending forever without one
async fn next_address(receiver: &mut Option<mpsc::Receiver<IpAddr>>) -> Option<IpAddr> {
    match receiver {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
