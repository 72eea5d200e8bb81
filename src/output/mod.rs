use crate::prelude::*;

use std::collections::HashMap;

pub mod datalog;
pub mod format;
pub mod mqtt;
pub mod screen;

pub use datalog::DatalogWriter;
pub use format::Formatter;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SinkKind {
    Screen,
    Mqtt,
    Datalog,
}

impl FromStr for SinkKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "screen" => Ok(Self::Screen),
            "mqtt" => Ok(Self::Mqtt),
            "datalog" => Ok(Self::Datalog),
            _ => Err(ConfigError::UnknownOutput(s.to_owned())),
        }
    }
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Screen => "screen",
            Self::Mqtt => "mqtt",
            Self::Datalog => "datalog",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FormatKind {
    Simple,
    Table,
    Json,
    Raw,
}

impl FromStr for FormatKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "raw" => Ok(Self::Raw),
            _ => Err(ConfigError::UnknownOutput(format!("format {}", s))),
        }
    }
}

impl std::fmt::Display for FormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Simple => "simple",
            Self::Table => "table",
            Self::Json => "json",
            Self::Raw => "raw",
        };
        write!(f, "{}", name)
    }
}

/// A finished dispatch on its way to the sinks.
#[derive(Clone, Debug)]
pub struct Dispatched {
    pub device: String,
    pub adhoc: bool,
    pub outputs: Vec<config::Output>,
    pub result: CommandResult,
}

#[derive(Clone, Debug)]
pub enum ChannelData {
    Result(Box<Dispatched>),
    Shutdown,
}

pub type Sender = broadcast::Sender<ChannelData>;
pub type Receiver = broadcast::Receiver<ChannelData>;

/// Renders results and hands them to their sinks. Sinks only ever read a
/// result; nothing here feeds back into scheduling.
pub struct Outputs {
    config: ConfigWrapper,
    channels: Channels,
    receiver: Receiver,
    datalogs: HashMap<String, DatalogWriter>,
}

impl Outputs {
    /// Subscribes immediately so results sent before `start` are not lost.
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        let receiver = channels.to_outputs.subscribe();
        Self {
            config,
            channels,
            receiver,
            datalogs: HashMap::new(),
        }
    }

    pub async fn start(mut self) -> Result<()> {
        loop {
            match self.receiver.recv().await {
                Ok(ChannelData::Result(dispatched)) => {
                    if let Err(err) = self.deliver(&dispatched) {
                        warn!("{}: output of {} failed: {}", dispatched.device, dispatched.result.command, err);
                    }
                }
                Ok(ChannelData::Shutdown) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("outputs lagged by {} results", n),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!("outputs loop exiting");
        Ok(())
    }

    /// Results queued before this are still delivered.
    pub fn stop(channels: &Channels) {
        let _ = channels.to_outputs.send(ChannelData::Shutdown);
    }

    pub fn deliver(&mut self, dispatched: &Dispatched) -> Result<()> {
        let mqtt_config = self.config.mqtt();
        let result = &dispatched.result;

        for output in &dispatched.outputs {
            let formatter = Formatter::new(output)?;
            debug!(
                "{}: {} to {} as {}",
                dispatched.device,
                result.command,
                output.sink(),
                formatter.kind()
            );

            match output.sink() {
                SinkKind::Screen => screen::display(&formatter.format(result)?),
                SinkKind::Mqtt => {
                    let topic = output
                        .topic
                        .clone()
                        .unwrap_or_else(|| mqtt_config.results_topic(&dispatched.device, &result.command));
                    mqtt::publish(&self.channels, topic, &formatter.format(result)?)?;
                }
                SinkKind::Datalog => {
                    let path = output
                        .path
                        .as_deref()
                        .ok_or_else(|| anyhow!("datalog output without a path"))?;
                    self.datalog(path)?.write(&dispatched.device, result, &formatter)?;
                }
            }
        }

        if dispatched.adhoc && mqtt_config.enabled() {
            let json = Formatter::new(&config::Output {
                format: Some(FormatKind::Json),
                ..Default::default()
            })?;
            let topic = format!("{}/results", mqtt_config.adhoc_topic(&dispatched.device));
            mqtt::publish(&self.channels, topic, &json.format(result)?)?;
        }

        Ok(())
    }

    fn datalog(&mut self, path: &str) -> Result<&DatalogWriter> {
        if !self.datalogs.contains_key(path) {
            let writer = DatalogWriter::new(path)?;
            self.datalogs.insert(path.to_owned(), writer);
        }
        self.datalogs
            .get(path)
            .ok_or_else(|| anyhow!("datalog {} not open", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!("MQTT".parse::<SinkKind>(), Ok(SinkKind::Mqtt));
        assert_eq!("table".parse::<FormatKind>(), Ok(FormatKind::Table));
        assert!(matches!(
            "hass".parse::<SinkKind>(),
            Err(ConfigError::UnknownOutput(_))
        ));
        assert_eq!(FormatKind::Json.to_string(), "json");
    }
}
