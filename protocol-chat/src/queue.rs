use crossbeam_channel::{Receiver, Sender, unbounded};

/// Unbounded FIFO shared by every reader thread of an endpoint and drained by
/// the single polling consumer.
pub struct InboundQueue {
    tx: Sender<String>,
    rx: Receiver<String>,
}

impl InboundQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Producer handle for a reader thread.
    pub fn producer(&self) -> Sender<String> {
        self.tx.clone()
    }

    pub fn push(&self, content: String) {
        // The receiver lives in `self`, so the channel cannot be disconnected here.
        let _ = self.tx.send(content);
    }

    pub fn try_pop(&self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::new()
    }
}
