// # Address Source Trait
//
// Defines the interface for observing the host's current global address.
//
// ## Implementations
//
// - Netlink push source (Linux): `cfdns-ip-netlink` crate
// - HTTP echo-service poll source: `cfdns-ip-http` crate
// - Outbound UDP socket poll source: `cfdns-ip-socket` crate
//
// ## Usage
//
// ```rust,ignore
// use cfdns_core::AddressSource;
//
// let (tx, mut rx) = tokio::sync::mpsc::channel(16);
// source.register_callback(tx);
// source.start().await?;
//
// let current = source.current().await?;
// while let Some(addr) = rx.recv().await {
//     println!("address observed: {}", addr);
// }
//
// source.stop().await?;
// ```

use crate::address::AddressFamily;
use crate::config::SourceConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::net::IpAddr;
use tokio::sync::mpsc;

/// Sending half a source publishes observed addresses into
///
/// Bounded; the supervisor owns the receiving half and creates a fresh
/// channel for every source it builds.
pub type AddressSender = mpsc::Sender<IpAddr>;

/// Lifecycle state shared by all address sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Constructed, not yet observing
    Created,
    /// Background observation running
    Started,
    /// Released; the instance cannot be started again
    Stopped,
}

/// Enforces `Created → Started → Stopped` for a source instance
#[derive(Debug)]
pub struct Lifecycle {
    kind: &'static str,
    state: SourceState,
}

impl Lifecycle {
    /// Create a lifecycle in the `Created` state
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            state: SourceState::Created,
        }
    }

    /// Current state
    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Transition to `Started`, claiming the registered sender
    ///
    /// Fails when the source was already started or has been stopped; a
    /// stopped source must be replaced by a fresh instance. Fails without
    /// changing state if no sender was registered.
    pub fn begin_start_with(
        &mut self,
        registered: &mut Option<AddressSender>,
    ) -> Result<AddressSender> {
        self.ensure_created()?;
        let sender = registered.take().ok_or_else(|| {
            Error::lifecycle(format!(
                "{} source started without a registered callback",
                self.kind
            ))
        })?;
        self.state = SourceState::Started;
        Ok(sender)
    }

    fn ensure_created(&self) -> Result<()> {
        match self.state {
            SourceState::Created => Ok(()),
            SourceState::Started => Err(Error::lifecycle(format!(
                "{} source already started",
                self.kind
            ))),
            SourceState::Stopped => Err(Error::lifecycle(format!(
                "{} source was stopped and cannot be restarted",
                self.kind
            ))),
        }
    }

    /// Transition to `Stopped`
    ///
    /// Returns `true` if the source was running and has resources to release.
    pub fn begin_stop(&mut self) -> bool {
        let was_started = self.state == SourceState::Started;
        self.state = SourceState::Stopped;
        was_started
    }
}

/// Trait for address source implementations
///
/// A source observes the current global-scope address of one address family.
/// Push sources publish from a listener task as changes occur; poll sources
/// publish from an interval task. Either way the only output channel is the
/// sender passed to [`AddressSource::register_callback`].
///
/// # Lifecycle
///
/// `register_callback` → `start` → `stop`. Instances are single-use: the
/// supervisor always builds a new source instead of restarting one in place.
///
/// # Task Spawning Rules
///
/// A source may spawn exactly one background task in `start()`, and `stop()`
/// must not return before that task has exited and released its resources.
/// Waits inside the task must race the stop signal so that `stop()` never
/// waits for a full poll interval or for a notification that may never arrive.
#[async_trait]
pub trait AddressSource: Send + Sync {
    /// Read the current global-scope address
    ///
    /// # Returns
    ///
    /// - `Ok(Some(IpAddr))`: The current address
    /// - `Ok(None)`: No address is currently determinable
    /// - `Err(Error)`: Configuration or transport failure
    async fn current(&self) -> Result<Option<IpAddr>>;

    /// Register the channel observed addresses are published into
    ///
    /// Must be called before [`AddressSource::start`].
    fn register_callback(&mut self, sender: AddressSender);

    /// Begin background observation
    async fn start(&mut self) -> Result<()>;

    /// Stop background observation and release all held resources
    ///
    /// Blocks until the background task has fully exited.
    async fn stop(&mut self) -> Result<()>;

    /// Address family this source observes
    fn family(&self) -> AddressFamily;

    /// Short name of the source kind (for logging)
    fn kind(&self) -> &'static str;

    /// Whether `start()` publishes a first read on its own
    ///
    /// Poll sources fetch immediately after starting, so the supervisor skips
    /// its initial [`AddressSource::current`] call for them.
    fn reads_on_start(&self) -> bool {
        false
    }
}

/// Helper trait for constructing address sources from configuration
///
/// One factory per source kind; factories are registered in a
/// [`crate::registry::SourceRegistry`].
#[async_trait]
pub trait AddressSourceFactory: Send + Sync {
    /// Create a not-yet-started source
    ///
    /// # Parameters
    ///
    /// - `config`: Configuration for this source kind
    ///
    /// # Returns
    ///
    /// A boxed AddressSource trait object
    async fn create(&self, config: &SourceConfig) -> Result<Box<dyn AddressSource>>;
}

/// Zero-argument source factory used by the supervisor
///
/// Invoked once at start and once on every restart tick; every call must
/// return a freshly constructed, not-yet-started source.
#[async_trait]
pub trait SourceBuilder: Send + Sync {
    /// Build a fresh source
    async fn build(&self) -> Result<Box<dyn AddressSource>>;
}

#[async_trait]
impl<F> SourceBuilder for F
where
    F: Fn() -> Result<Box<dyn AddressSource>> + Send + Sync,
{
    async fn build(&self) -> Result<Box<dyn AddressSource>> {
        self()
    }
}
