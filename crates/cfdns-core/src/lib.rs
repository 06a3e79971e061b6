// # cfdns-core
//
// Core library for the self-healing address monitor.
//
// ## Architecture Overview
//
// This library observes the host's global IP address and reports changes:
// - **AddressSource**: Trait for observing the current address (push or poll)
// - **SourceRegistry**: Plugin-based registry mapping source kinds to factories
// - **PollLoop**: Cancellable interval task shared by polling sources
// - **Supervisor**: Owns one source at a time, deduplicates, and recreates
//   the source on a fixed cadence
// - **DnsUpdater**: Trait for the downstream record updater
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from source and provider implementations
// 2. **Event-Driven**: Sources publish into a channel; nothing polls the supervisor
// 3. **Plugin-Based**: Sources are registered dynamically, no hard-coded if-else
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Self-Healing**: Sources are single-use and replaced wholesale, never repaired

pub mod address;
pub mod config;
pub mod error;
pub mod interval;
pub mod registry;
pub mod supervisor;
pub mod traits;

// Re-export core types for convenience
pub use address::{AddressFamily, is_global_scope};
pub use config::{SourceConfig, SupervisorConfig};
pub use error::{Error, Result};
pub use interval::PollLoop;
pub use registry::{ConfiguredSource, SourceRegistry};
pub use supervisor::{ChangeCallback, Supervisor, SupervisorEvent};
pub use traits::{
    AddressSender, AddressSource, AddressSourceFactory, DnsUpdater, Lifecycle, RecordRef,
    SourceBuilder, SourceState, UpdateResult,
};
