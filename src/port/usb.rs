use crate::prelude::*;
use crate::port::codec::ResponseDecoder;
use crate::port::{Port, PortKind};

use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::codec::Decoder;

/// hidraw report size
const CHUNK_SIZE: usize = 8;
const MAX_READS: usize = 100;

#[cfg(not(feature = "mocks"))]
const READ_TIMEOUT_SECS: u64 = 2;
#[cfg(feature = "mocks")]
const READ_TIMEOUT_SECS: u64 = 0;

/// Inverters that expose a USB HID endpoint (`/dev/hidraw*`).
pub struct UsbPort {
    path: String,
    file: Option<File>,
}

impl UsbPort {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_owned(),
            file: None,
        }
    }

    /// `data` split into reports, the last one padded with NULs.
    pub fn chunks(data: &[u8]) -> Vec<[u8; CHUNK_SIZE]> {
        data.chunks(CHUNK_SIZE)
            .map(|chunk| {
                let mut report = [0u8; CHUNK_SIZE];
                report[..chunk.len()].copy_from_slice(chunk);
                report
            })
            .collect()
    }
}

#[async_trait]
impl Port for UsbPort {
    fn kind(&self) -> PortKind {
        PortKind::Usb
    }

    fn is_connected(&self) -> bool {
        self.file.is_some()
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.file.is_some() {
            return Ok(());
        }

        info!("opening usb device {}", self.path);
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .await
            .map_err(|err| TransportError::Open {
                path: self.path.clone(),
                reason: err.to_string(),
            })?;

        self.file = Some(file);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.file.take().is_some() {
            info!("closed usb device {}", self.path);
        }
    }

    async fn send_and_receive(&mut self, command: &Command) -> Result<Vec<u8>, TransportError> {
        let file = self.file.as_mut().ok_or(TransportError::NotConnected)?;

        for report in Self::chunks(&command.full_command) {
            file.write_all(&report).await?;
        }
        file.flush().await?;

        let mut decoder = ResponseDecoder::new(command.definition.read_mode);
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE * MAX_READS);
        let mut report = [0u8; CHUNK_SIZE];

        for _ in 0..MAX_READS {
            let n = match tokio::time::timeout(
                Duration::from_secs(READ_TIMEOUT_SECS),
                file.read(&mut report),
            )
            .await
            {
                Ok(Ok(n)) => n,
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => break,
            };
            if n == 0 {
                break;
            }

            buf.extend_from_slice(&report[..n]);
            if let Some(frame) = decoder.decode(&mut buf)? {
                return Ok(frame);
            }
        }

        match decoder.decode_eof(&mut buf)? {
            Some(partial) => {
                debug!("{}: incomplete reply {:?}", self.path, partial);
                Ok(partial)
            }
            None => Err(TransportError::ReadTimeout(READ_TIMEOUT_SECS)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_final_report() {
        let reports = UsbPort::chunks(b"QPIGS\xb7\xa9\r");
        assert_eq!(reports, vec![*b"QPIGS\xb7\xa9\r"]);

        let reports = UsbPort::chunks(b"QPIRI\xf8\x54\rX");
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1], [b'X', 0, 0, 0, 0, 0, 0, 0]);

        assert!(UsbPort::chunks(b"").is_empty());
    }

    #[tokio::test]
    async fn needs_connection() -> Result<()> {
        let protocol = Protocol::new(ProtocolId::Pi30, None)?;
        let command = protocol.resolve("QPI")?;
        let mut port = UsbPort::new("/nonexistent/hidraw9");

        assert_eq!(
            port.send_and_receive(&command).await,
            Err(TransportError::NotConnected)
        );
        assert!(matches!(
            port.connect().await,
            Err(TransportError::Open { .. })
        ));
        assert!(!port.is_connected());
        Ok(())
    }
}
