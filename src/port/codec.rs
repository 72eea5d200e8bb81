//! Reply framing shared by the byte-stream ports.

use crate::prelude::*;
use crate::protocol::ReadMode;

use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::Decoder;

const MAX_BUFFER_SIZE: usize = 16384;

/// Gap that ends an `UntilIdle` read once some data has arrived.
#[cfg(not(feature = "mocks"))]
pub const IDLE_GAP_MS: u64 = 500;
#[cfg(feature = "mocks")]
pub const IDLE_GAP_MS: u64 = 10;

/// Splits one reply off the receive buffer according to the command's read mode.
#[derive(Clone, Copy, Debug)]
pub struct ResponseDecoder {
    mode: ReadMode,
}

impl ResponseDecoder {
    pub fn new(mode: ReadMode) -> Self {
        Self { mode }
    }

    fn frame_end(&self, src: &[u8]) -> Option<usize> {
        match self.mode {
            ReadMode::UntilCr => src.iter().position(|b| *b == b'\r').map(|i| i + 1),
            ReadMode::Lines(n) => src
                .iter()
                .enumerate()
                .filter(|(_, b)| **b == b'\n')
                .nth(n.saturating_sub(1))
                .map(|(i, _)| i + 1),
            // only the caller knows when the line went quiet
            ReadMode::UntilIdle => None,
        }
    }
}

impl Decoder for ResponseDecoder {
    type Item = Vec<u8>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() > MAX_BUFFER_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("reply exceeds {} bytes", MAX_BUFFER_SIZE),
            ));
        }

        Ok(self.frame_end(src).map(|end| src.split_to(end).to_vec()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Ok(Some(src.split().to_vec())),
        }
    }
}

/// Reads one reply from `reader`, giving up after `timeout`.
pub async fn read_response<R>(
    reader: &mut R,
    mode: ReadMode,
    timeout: Duration,
) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut decoder = ResponseDecoder::new(mode);
    let mut buf = BytesMut::with_capacity(1024);
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let idle = mode == ReadMode::UntilIdle && !buf.is_empty();
        let wait = if idle {
            Duration::from_millis(IDLE_GAP_MS)
        } else {
            deadline.saturating_duration_since(tokio::time::Instant::now())
        };

        match tokio::time::timeout(wait, reader.read_buf(&mut buf)).await {
            Ok(Ok(0)) => {
                return decoder
                    .decode_eof(&mut buf)?
                    .ok_or(TransportError::Disconnected)
            }
            Ok(Ok(n)) => {
                trace!("read {} bytes, {} buffered", n, buf.len());
                if let Some(frame) = decoder.decode(&mut buf)? {
                    return Ok(frame);
                }
            }
            Ok(Err(err)) => return Err(err.into()),
            Err(_) if idle => return Ok(buf.split().to_vec()),
            Err(_) => return Err(TransportError::ReadTimeout(timeout.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_at_carriage_return() -> Result<()> {
        let mut decoder = ResponseDecoder::new(ReadMode::UntilCr);
        let mut buf = BytesMut::from(&b"(ACK9 \r(NAK"[..]);

        assert_eq!(decoder.decode(&mut buf)?, Some(b"(ACK9 \r".to_vec()));
        assert_eq!(decoder.decode(&mut buf)?, None);
        assert_eq!(&buf[..], b"(NAK");
        Ok(())
    }

    #[test]
    fn waits_for_all_lines() -> Result<()> {
        let mut decoder = ResponseDecoder::new(ReadMode::Lines(2));
        let mut buf = BytesMut::from(&b"\r\nPID\t0xA053\r"[..]);
        assert_eq!(decoder.decode(&mut buf)?, None);

        buf.extend_from_slice(b"\nFW\t150\r\n");
        assert_eq!(decoder.decode(&mut buf)?, Some(b"\r\nPID\t0xA053\r\n".to_vec()));
        assert_eq!(&buf[..], b"FW\t150\r\n");
        Ok(())
    }

    #[test]
    fn idle_mode_takes_everything_at_eof() -> Result<()> {
        let mut decoder = ResponseDecoder::new(ReadMode::UntilIdle);
        let mut buf = BytesMut::from(&b"NW\x00\x13"[..]);
        assert_eq!(decoder.decode(&mut buf)?, None);
        assert_eq!(decoder.decode_eof(&mut buf)?, Some(b"NW\x00\x13".to_vec()));
        assert_eq!(decoder.decode_eof(&mut buf)?, None);
        Ok(())
    }

    #[tokio::test]
    async fn reads_from_stream() -> Result<()> {
        let mut reader: &[u8] = b"(230.0 50.0\x9e\x60\rtrailing";
        let reply =
            read_response(&mut reader, ReadMode::UntilCr, Duration::from_secs(1)).await?;
        assert_eq!(reply, b"(230.0 50.0\x9e\x60\r");

        let mut reader: &[u8] = b"no terminator";
        let reply = read_response(&mut reader, ReadMode::UntilCr, Duration::from_secs(1)).await?;
        assert_eq!(reply, b"no terminator");

        let mut reader: &[u8] = b"";
        let err = read_response(&mut reader, ReadMode::UntilCr, Duration::from_secs(1)).await;
        assert_eq!(err, Err(TransportError::Disconnected));
        Ok(())
    }
}
