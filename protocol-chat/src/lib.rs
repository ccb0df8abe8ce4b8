//! Symmetric chat transports behind one handler contract.
//!
//! A host picks one [`handler::ProtocolHandler`], calls `initialize`, then
//! calls `send` on user input and `receive` on a timer until it calls
//! `cleanup`. Modules:
//!
//! - [`handler`] defines the contract and the `Received` poll result.
//! - [`master`] listens and fans messages in and out across many peers.
//! - [`client`] holds one connection to a master and tracks its liveness.
//! - [`serial`] is a device-free UART stand-in with the same contract.
//! - [`message`] is the newline-delimited JSON envelope on the wire.
//! - [`status`] carries lifecycle events to a single observer.
//! - [`session`] is the polling host used by the binary.
//!
//! The network endpoints run on plain OS threads; only the binary's host
//! loop is async.

pub mod cli;
pub mod client;
pub mod config;
pub mod console;
pub mod error;
pub mod handler;
pub mod history;
pub mod master;
pub mod message;
pub mod queue;
pub mod registry;
pub mod serial;
pub mod session;
pub mod status;

pub use client::{ClientEndpoint, ConnectionState};
pub use error::{FailureKind, TransportError};
pub use handler::{ProtocolHandler, Received};
pub use master::{MasterEndpoint, MasterState};
pub use serial::SerialStub;
pub use status::{StatusEvent, StatusSink};
