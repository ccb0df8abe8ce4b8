use std::{fmt, str::FromStr, time::Duration};

use anyhow::{Result, anyhow};
use clap::ValueEnum;

/// Socket timeouts shared by the network endpoints.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upper bound on establishing the client connection.
    pub connect_timeout: Duration,
    /// Upper bound on a single outbound frame write.
    pub write_timeout: Duration,
    /// Upper bound on the zero-length liveness probe before a client write.
    pub probe_timeout: Duration,
    /// How long cleanup waits when waking a blocked acceptor.
    pub wake_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(2),
            probe_timeout: Duration::from_millis(500),
            wake_timeout: Duration::from_millis(250),
        }
    }
}

/// Joins host and port into a `host:port` string, bracketing bare IPv6 hosts.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// The transports a host can choose between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ProtocolKind {
    Master,
    Client,
    Uart,
}

impl ProtocolKind {
    pub const ALL: [ProtocolKind; 3] = [
        ProtocolKind::Master,
        ProtocolKind::Client,
        ProtocolKind::Uart,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ProtocolKind::Master => "Ethernet(Master)",
            ProtocolKind::Client => "Ethernet(Client)",
            ProtocolKind::Uart => "UART",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ProtocolKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        ProtocolKind::ALL
            .into_iter()
            .find(|kind| {
                kind.label().eq_ignore_ascii_case(wanted)
                    || format!("{kind:?}").eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| anyhow!("unknown protocol '{wanted}'"))
    }
}
