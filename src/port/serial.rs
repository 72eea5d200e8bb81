use crate::prelude::*;
use crate::port::codec;
use crate::port::{Port, PortKind};

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};

const ATTEMPTS: u64 = 4;
const WRITE_TIMEOUT_SECS: u64 = 5;

// attempt n waits ATTEMPT_BASE_SECS + n
#[cfg(not(feature = "mocks"))]
const ATTEMPT_BASE_SECS: u64 = 1;
#[cfg(feature = "mocks")]
const ATTEMPT_BASE_SECS: u64 = 0;

pub struct SerialPort {
    path: String,
    baud: u32,
    stream: Option<SerialStream>,
}

impl SerialPort {
    pub fn new(path: &str, baud: u32) -> Self {
        Self {
            path: path.to_owned(),
            baud,
            stream: None,
        }
    }

    fn read_timeout(attempt: u64) -> Duration {
        Duration::from_secs(ATTEMPT_BASE_SECS + attempt)
    }
}

#[async_trait]
impl Port for SerialPort {
    fn kind(&self) -> PortKind {
        PortKind::Serial
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }

        info!("opening serial port {} at {} baud", self.path, self.baud);
        let stream = tokio_serial::new(&self.path, self.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .open_native_async()
            .map_err(|err| TransportError::Open {
                path: self.path.clone(),
                reason: err.to_string(),
            })?;

        self.stream = Some(stream);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            info!("closed serial port {}", self.path);
        }
    }

    async fn send_and_receive(&mut self, command: &Command) -> Result<Vec<u8>, TransportError> {
        let path = self.path.clone();
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let mode = command.definition.read_mode;

        if command.is_listen_only() {
            debug!("{}: listening for {:?}", path, mode);
            return codec::read_response(stream, mode, Self::read_timeout(ATTEMPTS)).await;
        }

        for attempt in 1..=ATTEMPTS {
            match tokio::time::timeout(
                Duration::from_secs(WRITE_TIMEOUT_SECS),
                AsyncWriteExt::write_all(&mut *stream, &command.full_command),
            )
            .await
            {
                Ok(Ok(())) => AsyncWriteExt::flush(&mut *stream).await?,
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => return Err(TransportError::WriteTimeout(WRITE_TIMEOUT_SECS)),
            }

            match codec::read_response(&mut *stream, mode, Self::read_timeout(attempt)).await {
                Ok(response) if !response.is_empty() => return Ok(response),
                Ok(_) | Err(TransportError::ReadTimeout(_)) => {
                    warn!(
                        "{}: no reply to {} on attempt {}/{}",
                        path, command.code, attempt, ATTEMPTS
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Err(TransportError::NoResponse)
    }
}
