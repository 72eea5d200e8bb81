use crate::prelude::*;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Publish, QoS};
use tokio::sync::mpsc;

// Message {{{
/// One MQTT message. `topic` is relative to the configured namespace unless
/// it arrived on a topic outside of it.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            retain: false,
            payload: payload.into(),
        }
    }

    /// Payload bytes: hex-decoded when the payload is hex, verbatim otherwise.
    pub fn payload_bytes(&self) -> Vec<u8> {
        let trimmed = self.payload.trim();
        match hex::decode(trimmed) {
            Ok(bytes) if !trimmed.is_empty() => bytes,
            _ => self.payload.as_bytes().to_vec(),
        }
    }

    /// Command codes in an adhoc payload, one per line or comma separated.
    pub fn commands(&self) -> Vec<String> {
        self.payload
            .split(|c| c == ',' || c == '\n')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_owned)
            .collect()
    }
} // }}}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

pub type Sender = broadcast::Sender<ChannelData>;
pub type Receiver = broadcast::Receiver<ChannelData>;

#[derive(Clone)]
pub struct Mqtt {
    config: ConfigWrapper,
    channels: Channels,
}

impl Mqtt {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        let c = self.config.mqtt();

        if !c.enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let mut options = MqttOptions::new(
            format!("powermon-{}", std::process::id()),
            c.host(),
            c.port(),
        );

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(std::time::Duration::from_secs(60));
        if let (Some(u), Some(p)) = (c.username(), c.password()) {
            options.set_credentials(u, p);
        }

        info!("initializing mqtt at {}:{}", c.host(), c.port());

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(
            self.setup(client.clone()),
            self.receiver(eventloop),
            self.sender(client)
        )?;

        Ok(())
    }

    pub fn stop(&self) {
        info!("stopping mqtt client");
        let _ = self.channels.to_mqtt.send(ChannelData::Shutdown);
        let _ = self.channels.from_mqtt.send(ChannelData::Shutdown);
    }

    /// Full topics this instance listens on: every device's adhoc topic, plus
    /// the reply topic of devices that use MQTT as their port.
    pub fn subscriptions(&self) -> Vec<String> {
        let mqtt = self.config.mqtt();
        let mut topics = Vec::new();

        for device in self.config.devices() {
            topics.push(mqtt.full_topic(&mqtt.adhoc_topic(device.name())));
            if device.port().kind() == port::PortKind::Mqtt {
                topics.push(mqtt.full_topic(&mqtt.device_topic(device.name(), "rx")));
            }
        }

        topics
    }

    async fn setup(&self, client: AsyncClient) -> Result<()> {
        client
            .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online")
            .await?;

        for topic in self.subscriptions() {
            info!("subscribing to {}", topic);
            client.subscribe(topic, QoS::AtMostOnce).await?;
        }

        Ok(())
    }

    // mqtt -> devices
    async fn receiver(&self, mut eventloop: EventLoop) -> Result<()> {
        let mut shutdown = self.channels.to_mqtt.subscribe();

        loop {
            if let Ok(ChannelData::Shutdown) = shutdown.try_recv() {
                info!("mqtt receiver shutting down");
                break;
            }

            if let Ok(event) =
                tokio::time::timeout(std::time::Duration::from_secs(1), eventloop.poll()).await
            {
                match event {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        self.handle_message(publish)?;
                    }
                    Err(e) => {
                        error!("{}", e);
                        info!("reconnecting in 5s");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                    _ => {} // keepalives etc
                }
            }
        }

        Ok(())
    }

    fn handle_message(&self, publish: Publish) -> Result<()> {
        let message = Message {
            topic: self.config.mqtt().relative_topic(&publish.topic),
            retain: publish.retain,
            payload: String::from_utf8_lossy(&publish.payload).into_owned(),
        };
        debug!("RX: {:?}", message);

        if self
            .channels
            .from_mqtt
            .send(ChannelData::Message(message))
            .is_err()
        {
            bail!("send(from_mqtt) failed - channel closed?");
        }

        Ok(())
    }

    // devices/outputs -> mqtt
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        let mut receiver = self.channels.to_mqtt.subscribe();
        let mqtt = self.config.mqtt();

        loop {
            match receiver.recv().await? {
                ChannelData::Shutdown => {
                    let _ = client
                        .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "offline")
                        .await;
                    let _ = client.disconnect().await;
                    break;
                }
                ChannelData::Message(message) => {
                    let topic = mqtt.full_topic(&message.topic);
                    debug!("publishing: {} = {}", topic, message.payload);
                    if let Err(err) = client
                        .publish(&topic, QoS::AtLeastOnce, message.retain, message.payload)
                        .await
                    {
                        warn!("mqtt publish to {} failed: {}", topic, err);
                    }
                }
            }
        }

        info!("mqtt sender loop exiting");
        Ok(())
    }

    fn lwt_topic(&self) -> String {
        self.config.mqtt().full_topic("LWT")
    }
}

/// Feeds adhoc command codes arriving on `topic` into a device's queue.
pub async fn forward_adhoc(
    channels: Channels,
    topic: String,
    queue: mpsc::Sender<String>,
) -> Result<()> {
    let mut receiver = channels.from_mqtt.subscribe();

    loop {
        match receiver.recv().await {
            Ok(ChannelData::Message(message)) if message.topic == topic => {
                for code in message.commands() {
                    info!("adhoc command {} received on {}", code, topic);
                    if queue.send(code).await.is_err() {
                        return Ok(());
                    }
                }
            }
            Ok(ChannelData::Message(_)) => {}
            Ok(ChannelData::Shutdown) => break,
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("adhoc forwarder lagged by {}", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_bytes() {
        let m = Message::new("inverter/rx", "283233302e30200d");
        assert_eq!(m.payload_bytes(), b"(230.0 \r");

        let m = Message::new("inverter/rx", "(NAKss\r");
        assert_eq!(m.payload_bytes(), b"(NAKss\r");
    }

    #[test]
    fn adhoc_commands() {
        let m = Message::new("inverter/adhoc", "QPIGS, QMOD\nQPI\n");
        assert_eq!(m.commands(), vec!["QPIGS", "QMOD", "QPI"]);
        assert!(Message::new("inverter/adhoc", " ").commands().is_empty());
    }

    #[tokio::test]
    async fn forwards_only_matching_topic() -> Result<()> {
        let channels = Channels::new();
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(forward_adhoc(channels.clone(), "inverter/adhoc".into(), tx));

        // let the forwarder subscribe
        while channels.from_mqtt.receiver_count() == 0 {
            tokio::task::yield_now().await;
        }

        for (topic, payload) in [("other/adhoc", "QPI"), ("inverter/adhoc", "QMOD")] {
            channels
                .from_mqtt
                .send(ChannelData::Message(Message::new(topic, payload)))?;
        }
        channels.from_mqtt.send(ChannelData::Shutdown)?;

        assert_eq!(rx.recv().await, Some("QMOD".to_string()));
        task.await??;
        assert_eq!(rx.recv().await, None);
        Ok(())
    }
}
