use crate::port::Port;
use crate::prelude::*;

/// One device: its bound protocol and the port it talks through.
pub struct Dispatcher {
    device: String,
    protocol: Protocol,
    port: Box<dyn Port>,
}

impl Dispatcher {
    pub fn new(device: &str, protocol: Protocol, port: Box<dyn Port>) -> Self {
        Self {
            device: device.to_owned(),
            protocol,
            port,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub async fn connect(&mut self) -> Result<(), TransportError> {
        self.port.connect().await
    }

    pub async fn disconnect(&mut self) {
        self.port.disconnect().await
    }

    /// Resolves, frames, sends and decodes one command. Every failure comes
    /// back as an error result; nothing here aborts the caller's loop.
    pub async fn run_command(&mut self, code: &str) -> CommandResult {
        let command = match self.protocol.resolve(code) {
            Ok(command) => command,
            Err(err) => {
                warn!("{}: {}", self.device, err);
                return CommandResult::failed(code, "", err);
            }
        };

        debug!(
            "{}: {} full command {}",
            self.device,
            command.code,
            hex::encode(&command.full_command)
        );

        if !self.port.is_connected() {
            if let Err(err) = self.port.connect().await {
                warn!("{}: {}", self.device, err);
                return CommandResult::failed(&command.code, command.definition.description, err);
            }
        }

        let raw = match self.port.send_and_receive(&command).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!("{}: {} failed: {}", self.device, command.code, err);
                if err == TransportError::Disconnected {
                    self.port.disconnect().await;
                }
                return CommandResult::failed(&command.code, command.definition.description, err);
            }
        };
        debug!("{}: {} raw response {:?}", self.device, command.code, raw);

        // some firmware echoes commands it does not know
        if !command.is_listen_only() && raw == command.full_command {
            let mut result = CommandResult::for_command(&command, &raw);
            result.invalidate(DecodeError::NotRecognised);
            return result;
        }

        self.protocol.decode(&command, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::TestPort;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;

    struct EchoPort;

    #[async_trait]
    impl Port for EchoPort {
        fn kind(&self) -> port::PortKind {
            port::PortKind::Test
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn connect(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn disconnect(&mut self) {}

        async fn send_and_receive(&mut self, command: &Command) -> Result<Vec<u8>, TransportError> {
            Ok(command.full_command.clone())
        }
    }

    struct DeadPort;

    #[async_trait]
    impl Port for DeadPort {
        fn kind(&self) -> port::PortKind {
            port::PortKind::Serial
        }

        fn is_connected(&self) -> bool {
            false
        }

        async fn connect(&mut self) -> Result<(), TransportError> {
            Err(TransportError::Open {
                path: "/dev/ttyUSB9".to_string(),
                reason: "No such file or directory".to_string(),
            })
        }

        async fn disconnect(&mut self) {}

        async fn send_and_receive(&mut self, _: &Command) -> Result<Vec<u8>, TransportError> {
            Err(TransportError::NotConnected)
        }
    }

    #[tokio::test]
    async fn unknown_command_never_reaches_port() -> Result<()> {
        let port = TestPort::new(0);
        let calls = port.calls();
        let mut dispatcher =
            Dispatcher::new("inverter", Protocol::new(ProtocolId::Pi30, None)?, Box::new(port));

        let result = dispatcher.run_command("NOTREAL").await;
        assert!(result.error);
        assert!(!result.is_valid);
        assert_eq!(result.error_messages, vec!["Unknown command: NOTREAL"]);

        let result = dispatcher.run_command("PBT03").await;
        assert_eq!(result.error_messages, vec!["Unknown command: PBT03"]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let result = dispatcher.run_command("QPI").await;
        assert!(!result.error, "{:?}", result.error_messages);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn echoed_command_is_not_decoded() -> Result<()> {
        let mut dispatcher =
            Dispatcher::new("inverter", Protocol::new(ProtocolId::Pi30, None)?, Box::new(EchoPort));

        let result = dispatcher.run_command("QPIGS").await;
        assert!(result.error);
        assert!(result.readings.is_empty());
        assert_eq!(
            result.error_messages,
            vec![DecodeError::NotRecognised.to_string()]
        );
        Ok(())
    }

    #[tokio::test]
    async fn transport_failure_becomes_result() -> Result<()> {
        let mut dispatcher =
            Dispatcher::new("inverter", Protocol::new(ProtocolId::Pi30, None)?, Box::new(DeadPort));

        let result = dispatcher.run_command("QPIGS").await;
        assert!(result.error);
        assert_eq!(result.command, "QPIGS");
        assert_eq!(
            result.error_messages,
            vec!["failed to open /dev/ttyUSB9: No such file or directory"]
        );
        Ok(())
    }
}
