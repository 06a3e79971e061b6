//! Core traits for the cfdns system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`AddressSource`]: Observe the host's current global address
//! - [`DnsUpdater`]: Set the content of a DNS record via a provider API

pub mod address_source;
pub mod dns_updater;

pub use address_source::{
    AddressSender, AddressSource, AddressSourceFactory, Lifecycle, SourceBuilder, SourceState,
};
pub use dns_updater::{DnsUpdater, RecordRef, UpdateResult};
