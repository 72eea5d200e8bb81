use crate::port::codec::{ResponseDecoder, IDLE_GAP_MS};
use crate::port::{Port, PortKind};
use crate::prelude::*;
use crate::protocol::{jkble, ReadMode};

use async_trait::async_trait;
use btleplug::api::bleuuid::uuid_from_u16;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Manager, Peripheral};
use bytes::BytesMut;
use futures::stream::{Stream, StreamExt};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::codec::Decoder;
use uuid::Uuid;

#[cfg(not(feature = "mocks"))]
const SCAN_SECS: u64 = 10;
#[cfg(feature = "mocks")]
const SCAN_SECS: u64 = 0;

const SCAN_POLL: Duration = Duration::from_millis(500);

fn ble_error(err: btleplug::Error) -> TransportError {
    TransportError::Io(format!("ble: {}", err))
}

/// Notify and write characteristics of the device's UART service.
fn characteristics(protocol: ProtocolId) -> (Uuid, Uuid) {
    match protocol {
        ProtocolId::Daly => (uuid_from_u16(0xfff1), uuid_from_u16(0xfff2)),
        // JK BMS notifies and takes writes on the same characteristic
        _ => (uuid_from_u16(0xffe1), uuid_from_u16(0xffe1)),
    }
}

struct Connection {
    peripheral: Peripheral,
    write: Characteristic,
}

/// Bluetooth LE devices, addressed by MAC. Replies arrive as notifications
/// and are collected until a whole reply is seen or `timeout` runs out.
pub struct BlePort {
    address: String,
    notify_uuid: Uuid,
    write_uuid: Uuid,
    timeout: u64,
    connection: Option<Connection>,
}

impl BlePort {
    pub fn new(address: &str, protocol: ProtocolId, timeout: u64) -> Self {
        let (notify_uuid, write_uuid) = characteristics(protocol);
        Self {
            address: address.to_owned(),
            notify_uuid,
            write_uuid,
            timeout,
            connection: None,
        }
    }

    fn open_error(&self, reason: impl ToString) -> TransportError {
        TransportError::Open {
            path: self.address.clone(),
            reason: reason.to_string(),
        }
    }

    async fn find(&self) -> Result<Peripheral, TransportError> {
        let manager = Manager::new().await.map_err(ble_error)?;
        let central = manager
            .adapters()
            .await
            .map_err(ble_error)?
            .into_iter()
            .next()
            .ok_or_else(|| self.open_error("no bluetooth adapter found"))?;

        central.start_scan(ScanFilter::default()).await.map_err(ble_error)?;
        let deadline = Instant::now() + Duration::from_secs(SCAN_SECS);

        loop {
            for peripheral in central.peripherals().await.map_err(ble_error)? {
                if peripheral.address().to_string().eq_ignore_ascii_case(&self.address) {
                    if let Err(err) = central.stop_scan().await {
                        debug!("stop scan: {}", err);
                    }
                    return Ok(peripheral);
                }
            }
            if Instant::now() >= deadline {
                if let Err(err) = central.stop_scan().await {
                    debug!("stop scan: {}", err);
                }
                return Err(self.open_error(format!("not found after {}s scan", SCAN_SECS)));
            }
            tokio::time::sleep(SCAN_POLL).await;
        }
    }
}

#[async_trait]
impl Port for BlePort {
    fn kind(&self) -> PortKind {
        PortKind::Ble
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.connection.is_some() {
            return Ok(());
        }

        info!("connecting to ble device {}", self.address);
        let peripheral = self.find().await?;
        peripheral.connect().await.map_err(ble_error)?;
        peripheral.discover_services().await.map_err(ble_error)?;

        let chars = peripheral.characteristics();
        let find = |uuid: Uuid| chars.iter().find(|c| c.uuid == uuid).cloned();
        let notify = find(self.notify_uuid)
            .ok_or_else(|| self.open_error(format!("no notify characteristic {}", self.notify_uuid)))?;
        let write = find(self.write_uuid)
            .ok_or_else(|| self.open_error(format!("no write characteristic {}", self.write_uuid)))?;

        peripheral.subscribe(&notify).await.map_err(ble_error)?;
        self.connection = Some(Connection { peripheral, write });
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(err) = connection.peripheral.disconnect().await {
                warn!("{}: disconnect failed: {}", self.address, err);
            }
            info!("disconnected from ble device {}", self.address);
        }
    }

    async fn send_and_receive(&mut self, command: &Command) -> Result<Vec<u8>, TransportError> {
        let connection = self.connection.as_ref().ok_or(TransportError::NotConnected)?;

        // listen before writing so the first notification is not missed
        let notify_uuid = self.notify_uuid;
        let mut notifications = connection
            .peripheral
            .notifications()
            .await
            .map_err(ble_error)?
            .filter_map(move |n| async move { (n.uuid == notify_uuid).then_some(n.value) })
            .boxed();

        if !command.is_listen_only() {
            connection
                .peripheral
                .write(&connection.write, &command.full_command, WriteType::WithoutResponse)
                .await
                .map_err(ble_error)?;
        }

        collect_notifications(
            &mut notifications,
            command.definition.read_mode,
            Duration::from_secs(self.timeout),
        )
        .await
    }
}

/// Gathers notification payloads into one reply. Stops at a complete frame,
/// a complete JK record, an idle gap (`UntilIdle`) or `max_wait`.
pub async fn collect_notifications<S>(
    notifications: &mut S,
    mode: ReadMode,
    max_wait: Duration,
) -> Result<Vec<u8>, TransportError>
where
    S: Stream<Item = Vec<u8>> + Unpin + Send,
{
    let mut decoder = ResponseDecoder::new(mode);
    let mut buf = BytesMut::with_capacity(512);
    let deadline = Instant::now() + max_wait;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let idle = mode == ReadMode::UntilIdle && !buf.is_empty();
        let wait = if idle {
            remaining.min(Duration::from_millis(IDLE_GAP_MS))
        } else {
            remaining
        };

        match tokio::time::timeout(wait, notifications.next()).await {
            Ok(Some(value)) => {
                trace!("notification of {} bytes, {} buffered", value.len(), buf.len());
                buf.extend_from_slice(&value);
                if let Some(frame) = decoder.decode(&mut buf)? {
                    return Ok(frame);
                }
                if mode == ReadMode::UntilIdle {
                    if let Some(record) = jkble::take_record(&buf) {
                        return Ok(record);
                    }
                }
            }
            Ok(None) => {
                return decoder
                    .decode_eof(&mut buf)?
                    .ok_or(TransportError::Disconnected)
            }
            Err(_) if !buf.is_empty() => return Ok(buf.split().to_vec()),
            Err(_) => return Err(TransportError::ReadTimeout(max_wait.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn frame_split_across_notifications() -> Result<()> {
        let mut notifications = stream::iter(vec![b"(PI".to_vec(), b"30\x9a\x0b\r(x".to_vec()]);
        let reply =
            collect_notifications(&mut notifications, ReadMode::UntilCr, Duration::from_secs(1)).await?;
        assert_eq!(reply, b"(PI30\x9a\x0b\r");
        Ok(())
    }

    #[tokio::test]
    async fn jk_record_from_stream() -> Result<()> {
        let protocol = Protocol::new(ProtocolId::Jk02, None)?;
        let record = protocol.resolve("getInfo")?.definition.test_responses[0];

        let mut pieces = vec![b"\x01\x02".to_vec()];
        pieces.extend(record.chunks(20).map(<[u8]>::to_vec));
        pieces.push(record[..20].to_vec());
        let mut notifications = stream::iter(pieces).chain(stream::pending());

        let reply =
            collect_notifications(&mut notifications, ReadMode::UntilIdle, Duration::from_secs(5)).await?;
        assert_eq!(reply, record);
        Ok(())
    }

    #[tokio::test]
    async fn idle_gap_ends_reply() -> Result<()> {
        let frame = b"\xa5\x01\x90\x08\x02\x10\x00\x00uo\x03\xbc\xf3".to_vec();
        let mut notifications = stream::iter(vec![frame.clone()]).chain(stream::pending());

        let started = Instant::now();
        let reply =
            collect_notifications(&mut notifications, ReadMode::UntilIdle, Duration::from_secs(30)).await?;
        assert_eq!(reply, frame);
        assert!(started.elapsed() < Duration::from_secs(5));
        Ok(())
    }

    #[tokio::test]
    async fn wait_is_bounded() {
        let mut notifications = stream::pending::<Vec<u8>>();
        let reply =
            collect_notifications(&mut notifications, ReadMode::UntilCr, Duration::from_millis(50)).await;
        assert_eq!(reply, Err(TransportError::ReadTimeout(0)));
    }

    #[test]
    fn uart_characteristics() {
        let (notify, write) = characteristics(ProtocolId::Jk02);
        assert_eq!(notify, write);
        assert_eq!(notify.to_string(), "0000ffe1-0000-1000-8000-00805f9b34fb");

        let port = BlePort::new("C8:47:8C:E4:54:0E", ProtocolId::Daly, 5);
        assert_ne!(port.notify_uuid, port.write_uuid);
        assert!(!port.is_connected());
    }
}
