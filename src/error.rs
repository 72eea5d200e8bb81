use thiserror::Error;

/// Creates an anyhow error with the current file and line number
#[macro_export]
macro_rules! file_error {
    ($($arg:tt)*) => {
        ::anyhow::anyhow!(
            "[{}:{}] {}",
            std::path::Path::new(file!())
                .file_name()
                .map(|f| f.to_string_lossy())
                .unwrap_or_default(),
            line!(),
            format!($($arg)*)
        )
    };
}

/// Creates an anyhow error with the current file and line number, and includes a source error
#[macro_export]
macro_rules! file_error_with_source {
    ($source:expr, $($arg:tt)*) => {
        ::anyhow::anyhow!(
            "[{}:{}] {}: {}",
            std::path::Path::new(file!())
                .file_name()
                .map(|f| f.to_string_lossy())
                .unwrap_or_default(),
            line!(),
            format!($($arg)*),
            $source
        )
    };
}

/// Failures at the port boundary. The dispatcher turns these into error results.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("port is not connected")]
    NotConnected,
    #[error("failed to open {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("write timed out after {0}s")]
    WriteTimeout(u64),
    #[error("read timed out after {0}s")]
    ReadTimeout(u64),
    #[error("io error: {0}")]
    Io(String),
    #[error("device disconnected")]
    Disconnected,
    #[error("no response received")]
    NoResponse,
    #[error("mqtt error: {0}")]
    Mqtt(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::ReadTimeout(0),
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::UnexpectedEof => {
                Self::Disconnected
            }
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Problems found before any I/O happens.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),
    #[error("unknown port type: {0}")]
    UnknownPortType(String),
    #[error("unknown output: {0}")]
    UnknownOutput(String),
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Validation and decode failures. The `Display` text is what ends up in
/// `CommandResult::error_messages`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("response was empty")]
    Empty,
    #[error("response is too short")]
    TooShort,
    #[error("CRC mismatch, got {got} calculated {calculated}")]
    CrcMismatch { got: String, calculated: String },
    #[error("response does not start with {0}")]
    MissingStart(String),
    #[error("insufficient number of elements in response. Got {got}, expected at least {expected}")]
    Insufficient { got: usize, expected: usize },
    #[error("command execution failed (NAK)")]
    Nak,
    #[error("command not recognised by the device (response echoed the command)")]
    NotRecognised,
    #[error("{0}")]
    InvalidValue(String),
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_messages() {
        assert_eq!(
            DecodeError::Insufficient { got: 2, expected: 5 }.to_string(),
            "insufficient number of elements in response. Got 2, expected at least 5"
        );
        assert_eq!(
            DecodeError::CrcMismatch {
                got: "b7a9".to_string(),
                calculated: "b7aa".to_string()
            }
            .to_string(),
            "CRC mismatch, got b7a9 calculated b7aa"
        );
        assert_eq!(
            DecodeError::UnknownCommand("NOTREAL".to_string()).to_string(),
            "Unknown command: NOTREAL"
        );
    }

    #[test]
    fn io_errors_map_to_transport_errors() {
        let err: TransportError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert_eq!(err, TransportError::Disconnected);

        let err: TransportError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert_eq!(err, TransportError::Io("boom".to_string()));
    }
}
