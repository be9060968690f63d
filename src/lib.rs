//! Linegate - TCP line-protocol gateway.
//!
//! Exposes a TCP port to modem/radio style clients and bridges their
//! line-based commands to an internal publish/subscribe bus, while
//! broadcasting sensor and status updates back to every client.
//!
//! # Architecture
//!
//! - **Gateway** - single-threaded poll loop, owns every socket
//! - **Registry** - live client connections, each with its own framer
//! - **Cache** - latest bus state, written by bus threads, read by the loop
//! - **Bus** - external collaborator behind the [`bus::MessageBus`] trait
//!
//! # Modules
//!
//! - [`framing`] - byte stream to lines
//! - [`protocol`] - command grammar, replies and notices
//! - [`multiplexer`] - `poll(2)` readiness
//! - [`registry`] - connection ownership and broadcast
//! - [`gateway`] - the loop and command dispatch
//! - [`cache`] - bus event cache and notice queue
//! - [`supervisor`] - bounded restart after setup failure
//! - [`config`] - configuration loading

// Library modules
pub mod bus;
pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod framing;
pub mod gateway;
pub mod multiplexer;
pub mod protocol;
pub mod registry;
pub mod supervisor;
pub mod timer;

// Re-export commonly used types
pub use bus::{BusEvent, BusRequest, EventKind, LocalBus, MessageBus};
pub use cache::{BusEventCache, TelemetrySnapshot};
pub use config::Config;
pub use error::GatewayError;
pub use gateway::Gateway;
pub use protocol::{Command, Notice, Reply};
pub use supervisor::run_supervised;
