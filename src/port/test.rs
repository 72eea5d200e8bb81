use crate::prelude::*;
use crate::port::{Port, PortKind};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Answers every command with one of its definition's test responses.
pub struct TestPort {
    response_number: usize,
    connected: bool,
    calls: Arc<AtomicUsize>,
}

impl TestPort {
    pub fn new(response_number: usize) -> Self {
        Self {
            response_number,
            connected: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared count of `send_and_receive` calls, kept after the port is boxed.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Port for TestPort {
    fn kind(&self) -> PortKind {
        PortKind::Test
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    async fn send_and_receive(&mut self, command: &Command) -> Result<Vec<u8>, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        let responses = command.definition.test_responses;
        let Some(last) = responses.len().checked_sub(1) else {
            return Err(TransportError::NoResponse);
        };
        let index = self.response_number.min(last);
        debug!("test port: {} answered with test response {}", command.code, index);

        Ok(responses[index].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clamps_response_number() -> Result<()> {
        let protocol = Protocol::new(ProtocolId::Pi30, None)?;
        let command = protocol.resolve("QPIGS")?;

        let mut port = TestPort::new(99);
        let calls = port.calls();
        assert_eq!(
            port.send_and_receive(&command).await,
            Err(TransportError::NotConnected)
        );

        port.connect().await?;
        let last = command.definition.test_responses.len() - 1;
        assert_eq!(
            port.send_and_receive(&command).await?,
            command.definition.test_responses[last]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }
}
