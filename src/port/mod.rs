use crate::prelude::*;

use async_trait::async_trait;

pub mod ble;
pub mod codec;
pub mod mqtt;
pub mod serial;
pub mod test;
pub mod usb;

pub use self::ble::BlePort;
pub use self::mqtt::MqttPort;
pub use self::serial::SerialPort;
pub use self::test::TestPort;
pub use self::usb::UsbPort;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PortKind {
    Serial,
    Usb,
    Test,
    Mqtt,
    Ble,
}

impl FromStr for PortKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "serial" => Ok(Self::Serial),
            "usb" => Ok(Self::Usb),
            "test" => Ok(Self::Test),
            "mqtt" => Ok(Self::Mqtt),
            "ble" => Ok(Self::Ble),
            _ => Err(ConfigError::UnknownPortType(s.to_owned())),
        }
    }
}

impl std::fmt::Display for PortKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Serial => "serial",
            Self::Usb => "usb",
            Self::Test => "test",
            Self::Mqtt => "mqtt",
            Self::Ble => "ble",
        };
        write!(f, "{}", name)
    }
}

/// One physical (or virtual) link to one device. Request/response is
/// half-duplex, so a port is only ever driven by its owning dispatch loop.
#[async_trait]
pub trait Port: Send {
    fn kind(&self) -> PortKind;

    fn is_connected(&self) -> bool;

    /// Idempotent; connecting an open port does nothing.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Idempotent.
    async fn disconnect(&mut self);

    /// Writes `command.full_command` (nothing for listen-only commands) and
    /// returns the raw bytes of the reply.
    async fn send_and_receive(&mut self, command: &Command) -> Result<Vec<u8>, TransportError>;
}

/// Builds the port described by a device's configuration.
pub fn from_config(
    device: &config::Device,
    config: &ConfigWrapper,
    channels: &Channels,
) -> Box<dyn Port> {
    let port = device.port();
    info!(
        "{}: using {} port for protocol {}",
        device.name(),
        port.kind(),
        port.protocol()
    );

    match port.kind() {
        PortKind::Serial => Box::new(SerialPort::new(port.path_or("/dev/ttyUSB0"), port.baud())),
        PortKind::Usb => Box::new(UsbPort::new(port.path_or("/dev/hidraw0"))),
        PortKind::Test => Box::new(TestPort::new(port.response_number())),
        PortKind::Mqtt => Box::new(MqttPort::new(
            channels.clone(),
            config.mqtt().device_topic(device.name(), "tx"),
            config.mqtt().device_topic(device.name(), "rx"),
            port.timeout(),
        )),
        PortKind::Ble => Box::new(BlePort::new(port.path_or(""), port.protocol(), port.timeout())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_kinds() {
        assert_eq!("Serial".parse::<PortKind>(), Ok(PortKind::Serial));
        assert_eq!(PortKind::Mqtt.to_string(), "mqtt");
        assert_eq!("BLE".parse::<PortKind>(), Ok(PortKind::Ble));
        assert_eq!(
            "bluetooth".parse::<PortKind>(),
            Err(ConfigError::UnknownPortType("bluetooth".to_string()))
        );
    }
}
