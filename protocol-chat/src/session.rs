//! Host-side glue: owns the configured handlers, tracks which one is active,
//! and turns user input and poll ticks into transcript lines.

use std::fmt;

use crossbeam_channel::Receiver;
use tracing::{debug, warn};

use crate::{
    config::ProtocolKind,
    handler::{ProtocolHandler, Received},
    history::{HistoryRecord, HistorySink},
};

/// Upper bound on messages drained per tick so one busy peer cannot starve
/// the input side of the host loop.
pub const MAX_MESSAGES_PER_POLL: usize = 64;

const LOCAL_PARTY: &str = "You";

/// One line of transcript output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatLine {
    Outgoing(String),
    Incoming { protocol: String, text: String },
    Status(String),
    Error(String),
}

impl fmt::Display for ChatLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatLine::Outgoing(text) => write!(f, "{LOCAL_PARTY}: {text}"),
            ChatLine::Incoming { protocol, text } => write!(f, "{protocol}: {text}"),
            ChatLine::Status(text) => write!(f, "*** {text}"),
            ChatLine::Error(text) => write!(f, "!!! {text}"),
        }
    }
}

pub struct ChatSession {
    handlers: Vec<Box<dyn ProtocolHandler>>,
    active: Option<usize>,
    history: Box<dyn HistorySink>,
    status_rx: Receiver<String>,
}

impl ChatSession {
    pub fn new(
        handlers: Vec<Box<dyn ProtocolHandler>>,
        history: Box<dyn HistorySink>,
        status_rx: Receiver<String>,
    ) -> Self {
        Self {
            handlers,
            active: None,
            history,
            status_rx,
        }
    }

    pub fn protocols(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|handler| handler.name()).collect()
    }

    pub fn active(&self) -> Option<ProtocolKind> {
        self.active.map(|index| self.handlers[index].kind())
    }

    /// Switches to `kind`, cleaning up whichever handler was active.
    pub fn select(&mut self, kind: ProtocolKind) -> Vec<ChatLine> {
        let Some(index) = self.handlers.iter().position(|handler| handler.kind() == kind) else {
            return vec![ChatLine::Error(format!("{kind} is not configured"))];
        };

        let mut lines = Vec::new();
        if let Some(previous) = self.active.take() {
            if previous != index {
                lines.push(ChatLine::Status(self.handlers[previous].cleanup()));
            }
        }

        let handler = &mut self.handlers[index];
        match handler.initialize() {
            Ok(status) => {
                self.active = Some(index);
                lines.push(ChatLine::Status(status));
            }
            Err(err) => {
                let protocol = handler.name();
                warn!(protocol, error = %err, kind = ?err.kind(), "initialize failed");
                // Keep the selection so the user can retry or just read.
                self.active = Some(index);
                lines.push(ChatLine::Error(err.to_string()));
            }
        }
        lines
    }

    pub fn send(&mut self, text: &str) -> Vec<ChatLine> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        let Some(index) = self.active else {
            return vec![ChatLine::Error("Select a protocol first".to_string())];
        };

        let handler = &mut self.handlers[index];
        let protocol = handler.name();
        match handler.send(text) {
            Ok(()) => {
                self.record(protocol, LOCAL_PARTY, protocol, text);
                vec![ChatLine::Outgoing(text.to_string())]
            }
            Err(err) => {
                debug!(protocol, error = %err, kind = ?err.kind(), "send rejected");
                vec![ChatLine::Error(err.to_string())]
            }
        }
    }

    /// One timer tick: drains status events, then inbound messages.
    pub fn poll(&mut self) -> Vec<ChatLine> {
        let mut lines: Vec<ChatLine> = self.status_rx.try_iter().map(ChatLine::Status).collect();

        let Some(index) = self.active else {
            return lines;
        };
        let protocol = self.handlers[index].name();
        for _ in 0..MAX_MESSAGES_PER_POLL {
            let Received::Message(text) = self.handlers[index].receive() else {
                break;
            };
            self.record(protocol, protocol, LOCAL_PARTY, &text);
            lines.push(ChatLine::Incoming {
                protocol: protocol.to_string(),
                text,
            });
        }
        lines
    }

    pub fn shutdown(&mut self) -> Vec<ChatLine> {
        let mut lines = Vec::new();
        if let Some(index) = self.active.take() {
            lines.push(ChatLine::Status(self.handlers[index].cleanup()));
        }
        lines.extend(self.status_rx.try_iter().map(ChatLine::Status));
        lines
    }

    fn record(&mut self, protocol: &str, sender: &str, recipient: &str, message: &str) {
        let record = HistoryRecord {
            protocol: protocol.to_string(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            message: message.to_string(),
        };
        if let Err(err) = self.history.record(&record) {
            warn!(error = ?err, "failed to record message history");
        }
    }
}
