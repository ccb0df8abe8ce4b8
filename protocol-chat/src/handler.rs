use std::fmt;

use crate::{config::ProtocolKind, error::TransportError, status::StatusSink};

/// Result of polling a handler for inbound traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Message(String),
    /// Nothing queued right now. Not an error.
    Empty,
}

impl Received {
    pub fn into_message(self) -> Option<String> {
        match self {
            Received::Message(text) => Some(text),
            Received::Empty => None,
        }
    }
}

impl fmt::Display for Received {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Received::Message(text) => f.write_str(text),
            Received::Empty => f.write_str("No messages"),
        }
    }
}

/// The contract every transport offers the host application.
///
/// None of these calls block beyond bounded socket timeouts, and none of them
/// panic on transport failure: problems come back as [`TransportError`]s or
/// as status events.
pub trait ProtocolHandler: Send {
    fn kind(&self) -> ProtocolKind;

    /// Registers the observer for lifecycle events. Call before `initialize`.
    fn set_status_sink(&mut self, _sink: StatusSink) {}

    fn initialize(&mut self) -> Result<String, TransportError>;

    fn send(&mut self, text: &str) -> Result<(), TransportError>;

    fn receive(&mut self) -> Received;

    /// Releases everything. Safe to call any number of times.
    fn cleanup(&mut self) -> String;

    fn name(&self) -> &'static str {
        self.kind().label()
    }
}
