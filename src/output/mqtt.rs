use crate::mqtt::{ChannelData, Message};
use crate::prelude::*;

/// Queues the formatted lines as one message for the MQTT client.
pub fn publish(channels: &Channels, topic: String, lines: &[String]) -> Result<()> {
    let message = Message::new(topic, lines.join("\n"));
    debug!("queueing {}", message.topic);

    if channels.to_mqtt.send(ChannelData::Message(message)).is_err() {
        bail!("send(to_mqtt) failed - channel closed?");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_lines() -> Result<()> {
        let channels = Channels::new();
        let mut to_mqtt = channels.to_mqtt.subscribe();

        publish(&channels, "inverter/results/QPI".into(), &["a=1".into(), "b=2".into()])?;
        assert_eq!(
            to_mqtt.try_recv()?,
            ChannelData::Message(Message::new("inverter/results/QPI", "a=1\nb=2"))
        );
        Ok(())
    }

    #[test]
    fn fails_without_client() {
        let channels = Channels::new();
        assert!(publish(&channels, "x".into(), &[]).is_err());
    }
}
