use std::time::Duration;

use clap::Parser;

use crate::{
    client::ClientEndpoint,
    config::{ProtocolKind, TransportConfig},
    handler::ProtocolHandler,
    master::MasterEndpoint,
    serial::SerialStub,
    status::StatusSink,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Handler to activate on startup. Switch later with `/use <protocol>`.
    #[arg(long, value_enum, default_value = "master")]
    pub protocol: ProtocolKind,

    /// Address the master endpoint binds to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub listen: String,

    /// Address of the master the client endpoint connects to.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: String,

    /// Serial device used by the UART stub.
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub uart_port: String,

    /// Baud rate reported by the UART stub.
    #[arg(long, default_value_t = 9600)]
    pub baud: u32,

    /// How often the active handler is polled for inbound messages.
    #[arg(long, default_value_t = 100)]
    pub poll_interval_ms: u64,

    /// Upper bound on a single outbound write, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    pub write_timeout_ms: u64,
}

impl Cli {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            ..TransportConfig::default()
        }
    }

    /// Builds every handler, each reporting to `status`.
    pub fn build_handlers(&self, status: &StatusSink) -> Vec<Box<dyn ProtocolHandler>> {
        let config = self.transport_config();
        let mut handlers: Vec<Box<dyn ProtocolHandler>> = vec![
            Box::new(MasterEndpoint::with_config(&self.listen, config.clone())),
            Box::new(ClientEndpoint::with_config(&self.server, config)),
            Box::new(SerialStub::new(&self.uart_port, self.baud)),
        ];
        for handler in &mut handlers {
            handler.set_status_sink(status.clone());
        }
        handlers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_classic_setup() {
        let cli = Cli::parse_from(["protocol-chat"]);
        assert_eq!(cli.protocol, ProtocolKind::Master);
        assert_eq!(cli.listen, "127.0.0.1:5000");
        assert_eq!(cli.uart_port, "/dev/ttyUSB0");
        assert_eq!(cli.baud, 9600);
        assert_eq!(cli.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn builds_one_handler_per_protocol() {
        let cli = Cli::parse_from([
            "protocol-chat",
            "--protocol",
            "client",
            "--write-timeout-ms",
            "750",
        ]);
        assert_eq!(cli.protocol, ProtocolKind::Client);
        assert_eq!(cli.transport_config().write_timeout, Duration::from_millis(750));

        let kinds: Vec<_> = cli
            .build_handlers(&StatusSink::disabled())
            .iter()
            .map(|handler| handler.kind())
            .collect();
        assert_eq!(kinds, ProtocolKind::ALL);
    }
}
