use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One delivered or received message, in the shape the history store expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryRecord {
    pub protocol: String,
    pub sender: String,
    pub recipient: String,
    pub message: String,
}

/// Where the host reports traffic after a successful send or receive.
///
/// Failures are the host's to log. They never reach the transport.
pub trait HistorySink: Send {
    fn record(&mut self, record: &HistoryRecord) -> Result<()>;
}

/// Emits each record as a structured log event.
#[derive(Debug, Default)]
pub struct TracingHistory;

impl HistorySink for TracingHistory {
    fn record(&mut self, record: &HistoryRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        info!(target: "history", protocol = %record.protocol, %payload, "message recorded");
        Ok(())
    }
}
