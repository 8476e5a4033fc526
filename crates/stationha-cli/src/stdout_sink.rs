//! Dry-run sink that prints publishes instead of sending them.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use stationha_core::{PublishSink, SinkError};

#[derive(Default)]
pub struct StdoutSink {
    closed: AtomicBool,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PublishSink for StdoutSink {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), SinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        let mut out = std::io::stdout().lock();
        writeln!(out, "{} {}", topic, payload).map_err(|e| SinkError::Transport(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
