use crate::mqtt::{ChannelData, Message};
use crate::port::{Port, PortKind};
use crate::prelude::*;

use async_trait::async_trait;
use tokio::sync::broadcast::error::TryRecvError;
use std::time::{Duration, Instant};

// WaitForReply {{{
#[async_trait]
pub trait WaitForReply {
    async fn wait_for_reply(&mut self, topic: &str, timeout: u64) -> Result<Vec<u8>, TransportError>;
}

#[async_trait]
impl WaitForReply for mqtt::Receiver {
    async fn wait_for_reply(&mut self, topic: &str, timeout: u64) -> Result<Vec<u8>, TransportError> {
        let start = Instant::now();
        let timeout_duration = Duration::from_secs(timeout);

        loop {
            match self.try_recv() {
                Ok(ChannelData::Message(message)) if message.topic == topic => {
                    return Ok(message.payload_bytes());
                }
                Ok(ChannelData::Message(_)) => {} // someone else's traffic
                Ok(ChannelData::Shutdown) => return Err(TransportError::Disconnected),
                Err(TryRecvError::Empty) => {
                    if start.elapsed() >= timeout_duration {
                        return Err(TransportError::ReadTimeout(timeout));
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Err(TryRecvError::Lagged(n)) => warn!("mqtt port lagged by {} messages", n),
                Err(TryRecvError::Closed) => {
                    return Err(TransportError::Mqtt("channel closed".to_string()))
                }
            }
        }
    }
} // }}}

/// Uses a remote bridge as the transport: the full command goes out hex
/// encoded on the device's `tx` topic and the reply comes back on `rx`.
pub struct MqttPort {
    channels: Channels,
    tx_topic: String,
    rx_topic: String,
    timeout: u64,
    receiver: Option<mqtt::Receiver>,
}

impl MqttPort {
    pub fn new(channels: Channels, tx_topic: String, rx_topic: String, timeout: u64) -> Self {
        Self {
            channels,
            tx_topic,
            rx_topic,
            timeout,
            receiver: None,
        }
    }
}

#[async_trait]
impl Port for MqttPort {
    fn kind(&self) -> PortKind {
        PortKind::Mqtt
    }

    fn is_connected(&self) -> bool {
        self.receiver.is_some()
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.receiver.is_none() {
            self.receiver = Some(self.channels.from_mqtt.subscribe());
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.receiver = None;
    }

    async fn send_and_receive(&mut self, command: &Command) -> Result<Vec<u8>, TransportError> {
        let receiver = self.receiver.as_mut().ok_or(TransportError::NotConnected)?;

        // stale replies from an earlier, timed out request
        loop {
            match receiver.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }

        if !command.is_listen_only() {
            let message = Message::new(&self.tx_topic, hex::encode(&command.full_command));
            self.channels
                .to_mqtt
                .send(ChannelData::Message(message))
                .map_err(|_| TransportError::Mqtt("send(to_mqtt) failed".to_string()))?;
        }

        receiver.wait_for_reply(&self.rx_topic, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_through_bridge() -> Result<()> {
        let channels = Channels::new();
        let protocol = Protocol::new(ProtocolId::Pi30, None)?;
        let command = protocol.resolve("QPI")?;
        let mut port = MqttPort::new(channels.clone(), "inv/tx".into(), "inv/rx".into(), 5);
        let mut to_mqtt = channels.to_mqtt.subscribe();

        port.connect().await?;

        let bridge = {
            let channels = channels.clone();
            tokio::spawn(async move {
                if let Ok(ChannelData::Message(request)) = to_mqtt.recv().await {
                    let reply = Message::new("inv/rx", hex::encode(b"(PI30\x9a\x0b\r"));
                    let _ = channels.from_mqtt.send(ChannelData::Message(reply));
                    return Some(request);
                }
                None
            })
        };

        let reply = port.send_and_receive(&command).await?;
        assert_eq!(reply, b"(PI30\x9a\x0b\r");

        let request = bridge.await?.ok_or_else(|| anyhow!("bridge saw nothing"))?;
        assert_eq!(request.topic, "inv/tx");
        assert_eq!(request.payload, hex::encode(&command.full_command));
        Ok(())
    }

    #[tokio::test]
    async fn times_out_without_reply() -> Result<()> {
        let channels = Channels::new();
        let protocol = Protocol::new(ProtocolId::Pi30, None)?;
        let command = protocol.resolve("QPI")?;
        let _bridge = channels.to_mqtt.subscribe();
        let mut port = MqttPort::new(channels, "inv/tx".into(), "inv/rx".into(), 0);

        assert_eq!(
            port.send_and_receive(&command).await,
            Err(TransportError::NotConnected)
        );
        port.connect().await?;
        assert_eq!(
            port.send_and_receive(&command).await,
            Err(TransportError::ReadTimeout(0))
        );
        Ok(())
    }
}
