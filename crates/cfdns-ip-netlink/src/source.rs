use crate::binding::InterfaceBinding;
use crate::filter::AddressFilter;
use crate::socket::RouteSocket;
use async_trait::async_trait;
use cfdns_core::traits::{AddressSender, AddressSource, Lifecycle};
use cfdns_core::{AddressFamily, Error, Result};
use std::net::IpAddr;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const KIND: &str = "netlink";

/// Push source fed by kernel address notifications
///
/// The interface is resolved once at construction and never re-resolved;
/// the supervisor replaces the whole source when the interface might have
/// changed.
pub struct NetlinkAddressSource {
    family: AddressFamily,
    binding: InterfaceBinding,
    filter: AddressFilter,
    sender: Option<AddressSender>,
    lifecycle: Lifecycle,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl NetlinkAddressSource {
    /// Resolve the interface and create a not-yet-started source
    ///
    /// # Errors
    ///
    /// `Error::Config` if the named interface does not match exactly once, or
    /// if no name was given and the family has no default route.
    pub async fn new(family: AddressFamily, interface: Option<&str>) -> Result<Self> {
        let binding = InterfaceBinding::resolve(family, interface).await?;
        info!(interface = %binding, %family, "Netlink source bound to interface");
        Ok(Self::with_binding(family, binding))
    }

    /// Create a source for an already-resolved interface
    pub fn with_binding(family: AddressFamily, binding: InterfaceBinding) -> Self {
        Self {
            family,
            filter: AddressFilter::new(family, binding.index),
            binding,
            sender: None,
            lifecycle: Lifecycle::new(KIND),
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn binding(&self) -> &InterfaceBinding {
        &self.binding
    }
}

#[async_trait]
impl AddressSource for NetlinkAddressSource {
    async fn current(&self) -> Result<Option<IpAddr>> {
        let mut socket = RouteSocket::connect()?;
        let addresses = socket.dump_addresses(self.family).await?;

        Ok(addresses
            .iter()
            .find_map(|message| self.filter.accept(message)))
    }

    fn register_callback(&mut self, sender: AddressSender) {
        self.sender = Some(sender);
    }

    async fn start(&mut self) -> Result<()> {
        let sender = self.lifecycle.begin_start_with(&mut self.sender)?;
        let socket = RouteSocket::subscribe(self.family)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let filter = self.filter;
        let interface = self.binding.name.clone();

        self.shutdown_tx = Some(shutdown_tx);
        self.handle = Some(tokio::spawn(async move {
            let result = listen(socket, filter, sender, shutdown_rx).await;
            if let Err(e) = &result {
                warn!(interface = %interface, error = %e, "Netlink listener failed");
            }
            result
        }));

        debug!(interface = %self.binding, "Netlink listener started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.lifecycle.begin_stop() {
            return Ok(());
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| Error::stop(format!("netlink listener task failed: {}", e)))?,
            None => Ok(()),
        }
    }

    fn family(&self) -> AddressFamily {
        self.family
    }

    fn kind(&self) -> &'static str {
        KIND
    }
}

/// Listener task: publish every accepted `RTM_NEWADDR`
///
/// The socket is owned by the task and dropped when it returns, which is
/// what releases the kernel subscription.
async fn listen(
    mut socket: RouteSocket,
    filter: AddressFilter,
    sender: AddressSender,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> Result<()> {
    loop {
        let messages = tokio::select! {
            biased;
            _ = &mut shutdown_rx => return Ok(()),
            received = socket.next_messages() => received?,
        };

        for message in messages {
            let Some(address) = filter.accept_notification(&message) else {
                continue;
            };

            debug!(%address, "Address notification");
            let sent = tokio::select! {
                biased;
                _ = &mut shutdown_rx => return Ok(()),
                sent = sender.send(address) => sent,
            };

            if sent.is_err() {
                debug!("Address receiver dropped, stopping netlink listener");
                return Ok(());
            }
        }
    }
}
