//! robot-transport: byte-oriented links to robots
//!
//! This crate defines the `Transport` capability used by protocol plugins to reach a
//! device. Physical backends (serial, sockets) live outside this workspace; the default
//! build enables an in-process `mock` backend so that tools and tests run on any host.

mod types;
pub use types::{Timestamp, TransportInfo};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::Transport;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockRemote, MockStream, MockTransport};
