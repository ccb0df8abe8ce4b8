use tracing::info;

use crate::{
    config::ProtocolKind,
    error::TransportError,
    handler::{ProtocolHandler, Received},
    queue::InboundQueue,
};

const ACKNOWLEDGEMENT: &str = "UART: Message received!";

/// Serial-line stand-in. Nothing touches a real device: each sent line is
/// logged and answered with a canned acknowledgement.
pub struct SerialStub {
    port: String,
    baud_rate: u32,
    open: bool,
    acks: InboundQueue,
}

impl SerialStub {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            open: false,
            acks: InboundQueue::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl ProtocolHandler for SerialStub {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Uart
    }

    fn initialize(&mut self) -> Result<String, TransportError> {
        self.open = true;
        Ok(format!("UART ready on {} at {} baud", self.port, self.baud_rate))
    }

    fn send(&mut self, text: &str) -> Result<(), TransportError> {
        info!(port = %self.port, baud = self.baud_rate, message = %text, "UART: sending message");
        self.acks.push(ACKNOWLEDGEMENT.to_string());
        Ok(())
    }

    fn receive(&mut self) -> Received {
        self.acks
            .try_pop()
            .map_or(Received::Empty, Received::Message)
    }

    fn cleanup(&mut self) -> String {
        self.open = false;
        "UART closed".to_string()
    }
}
