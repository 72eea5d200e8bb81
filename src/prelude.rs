pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write;
pub use std::str::FromStr;
pub use tokio::sync::broadcast;

pub use crate::channels::Channels;
pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::error::{ConfigError, DecodeError, TransportError};
pub use crate::options::Options;
pub use crate::protocol::{
    self, Command, CommandDefinition, CommandKind, Protocol, ProtocolCommon, ProtocolId,
};
pub use crate::result::{CommandResult, Reading, Value};
pub use crate::{file_error, file_error_with_source, mqtt, output, port};
