use crate::output::{FormatKind, SinkKind};
use crate::port::PortKind;
use crate::prelude::*;
use crate::trigger::TriggerType;

use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(rename = "loop", default = "Config::default_loop")]
    pub loop_setting: LoopSetting,

    /// single device form; its commands are the top level `commands`
    pub device: Option<Device>,
    #[serde(default = "Vec::new")]
    pub devices: Vec<Device>,
    #[serde(default = "Vec::new")]
    pub commands: Vec<CommandConfig>,

    #[serde(default = "Config::default_mqtt")]
    pub mqtt: Mqtt,
}

// LoopSetting {{{
/// Seconds between scheduler passes, or a single pass.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(from = "u64")]
pub enum LoopSetting {
    Once,
    Every(u64),
}

impl LoopSetting {
    pub fn is_once(&self) -> bool {
        *self == Self::Once
    }
}

impl From<u64> for LoopSetting {
    fn from(seconds: u64) -> Self {
        match seconds {
            0 => Self::Once,
            n => Self::Every(n),
        }
    }
}

impl FromStr for LoopSetting {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("once") {
            return Ok(Self::Once);
        }
        s.parse::<u64>()
            .map(Self::from)
            .map_err(|_| ConfigError::Invalid(format!("loop must be seconds or \"once\", got {:?}", s)))
    }
}

impl std::fmt::Display for LoopSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Once => write!(f, "once"),
            Self::Every(seconds) => write!(f, "{}", seconds),
        }
    }
} // }}}

// Device {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Device {
    #[serde(default = "Config::default_device_name")]
    pub name: String,
    pub id: Option<String>,
    pub model: Option<String>,
    #[serde(default = "Config::default_port")]
    pub port: Port,
    #[serde(default = "Vec::new")]
    pub commands: Vec<CommandConfig>,
}

impl Device {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn port(&self) -> &Port {
        &self.port
    }

    pub fn commands(&self) -> &[CommandConfig] {
        &self.commands
    }
} // }}}

// Port {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Port {
    #[serde_as(as = "DisplayFromStr")]
    #[serde(rename = "type", default = "Config::default_port_kind")]
    pub kind: PortKind,

    /// device path, or the MAC address of a ble port
    #[serde(alias = "mac")]
    pub path: Option<String>,

    #[serde(default = "Config::default_baud")]
    pub baud: u32,

    #[serde_as(as = "DisplayFromStr")]
    #[serde(default = "Config::default_protocol")]
    pub protocol: ProtocolId,

    /// test port: which test response to answer with
    #[serde(default)]
    pub response_number: usize,

    /// mqtt and ble ports: seconds to wait for the reply
    #[serde(default = "Config::default_port_timeout")]
    pub timeout: u64,
}

impl Port {
    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn path_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.path.as_deref().unwrap_or(default)
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    pub fn protocol(&self) -> ProtocolId {
        self.protocol
    }

    pub fn response_number(&self) -> usize {
        self.response_number
    }

    pub fn timeout(&self) -> u64 {
        self.timeout
    }
} // }}}

// CommandConfig {{{
#[derive(Clone, Debug, Deserialize)]
pub struct CommandConfig {
    pub command: String,
    pub trigger: Option<Trigger>,
    #[serde(default = "Vec::new")]
    pub outputs: Vec<Output>,
}

impl CommandConfig {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn trigger(&self) -> Result<TriggerType, ConfigError> {
        TriggerType::from_config(self.trigger.as_ref())
    }

    /// Configured outputs, or the screen in simple format when none are given.
    pub fn outputs(&self) -> Vec<Output> {
        if self.outputs.is_empty() {
            vec![Output::default()]
        } else {
            self.outputs.clone()
        }
    }
} // }}}

// Trigger {{{
/// The first key present wins: every, loops, at, once, disabled.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Trigger {
    pub every: Option<u64>,
    pub loops: Option<u32>,
    pub at: Option<String>,
    /// present at all (even as `once: ~`) unless `false`
    #[serde(default, deserialize_with = "de_present")]
    pub once: Option<serde_yaml::Value>,
    pub disabled: Option<bool>,
}

fn de_present<'de, D>(deserializer: D) -> Result<Option<serde_yaml::Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde_yaml::Value::deserialize(deserializer).map(Some)
} // }}}

// Output {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Output {
    #[serde_as(as = "DisplayFromStr")]
    #[serde(rename = "type", default = "Config::default_sink")]
    pub sink: SinkKind,

    #[serde_as(as = "Option<DisplayFromStr>")]
    pub format: Option<FormatKind>,

    /// regex the formatted key must match
    pub filter: Option<String>,
    /// regex the formatted key must not match
    pub excl_filter: Option<String>,

    #[serde(default = "Config::default_enabled")]
    pub remove_spaces: bool,
    #[serde(default)]
    pub keep_case: bool,
    #[serde(default)]
    pub extra_info: bool,

    /// datalog file
    pub path: Option<String>,
    /// mqtt topic instead of `{device}/results/{command}`
    pub topic: Option<String>,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            sink: SinkKind::Screen,
            format: None,
            filter: None,
            excl_filter: None,
            remove_spaces: true,
            keep_case: false,
            extra_info: false,
            path: None,
            topic: None,
        }
    }
}

impl Output {
    pub fn sink(&self) -> SinkKind {
        self.sink
    }

    /// MQTT defaults to JSON, everything else to simple.
    pub fn format(&self) -> FormatKind {
        self.format.unwrap_or(match self.sink {
            SinkKind::Mqtt => FormatKind::Json,
            _ => FormatKind::Simple,
        })
    }
} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_mqtt_host")]
    pub host: String,

    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,

    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,

    /// relative to the namespace, `{device}` is replaced by the device name
    pub adhoc_topic: Option<String>,
}

impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn device_topic(&self, device: &str, suffix: &str) -> String {
        format!("{}/{}", device, suffix)
    }

    pub fn adhoc_topic(&self, device: &str) -> String {
        match &self.adhoc_topic {
            Some(topic) => topic.replace("{device}", device),
            None => self.device_topic(device, "adhoc"),
        }
    }

    pub fn results_topic(&self, device: &str, command: &str) -> String {
        self.device_topic(device, &format!("results/{}", command))
    }

    pub fn full_topic(&self, topic: &str) -> String {
        format!("{}/{}", self.namespace, topic)
    }

    /// Strips the namespace; topics outside of it are kept whole.
    pub fn relative_topic(&self, topic: &str) -> String {
        topic
            .strip_prefix(&self.namespace)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(topic)
            .to_owned()
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        Ok(Self::from_config(Config::new(file)?))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Config> {
        self.config.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn devices(&self) -> Vec<Device> {
        self.lock().devices()
    }

    pub fn device_with_name(&self, name: &str) -> Option<Device> {
        self.devices().into_iter().find(|d| d.name() == name)
    }

    pub fn mqtt(&self) -> Mqtt {
        self.lock().mqtt.clone()
    }

    pub fn loglevel(&self) -> String {
        self.lock().loglevel.clone()
    }

    pub fn set_loglevel(&self, loglevel: &str) {
        self.lock().loglevel = loglevel.to_owned();
    }

    pub fn loop_setting(&self) -> LoopSetting {
        self.lock().loop_setting
    }

    pub fn set_loop_setting(&self, loop_setting: LoopSetting) {
        self.lock().loop_setting = loop_setting;
    }
}

impl FromStr for Config {
    type Err = Error;

    /// YAML (or JSON) text, logged and validated.
    fn from_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|err| file_error_with_source!(err, "invalid configuration"))?;
        config.log();
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| file_error!("error reading {}: {}", file, err))?;
        Self::from_str(&content)
    }

    /// `--config` takes a file path, or the configuration itself when no such file exists.
    pub fn load(path_or_inline: &str) -> Result<Self> {
        if std::path::Path::new(path_or_inline).is_file() {
            Self::new(path_or_inline.to_owned())
        } else if path_or_inline.contains(':') {
            info!("Reading inline configuration");
            Self::from_str(path_or_inline)
        } else {
            bail!("config file {} not found", path_or_inline)
        }
    }

    /// Every device, the single `device` form first with the top level commands.
    pub fn devices(&self) -> Vec<Device> {
        let mut devices = Vec::new();
        if let Some(device) = &self.device {
            let mut device = device.clone();
            device.commands.extend(self.commands.iter().cloned());
            devices.push(device);
        }
        devices.extend(self.devices.iter().cloned());
        devices
    }

    fn log(&self) {
        info!("Configuration loaded successfully:");
        info!("  Log Level: {}", self.loglevel);
        info!("  Loop: {}", self.loop_setting);
        for (i, device) in self.devices().iter().enumerate() {
            info!("  Device[{}]: {}", i, device.name);
            info!("    Id: {}", device.id.as_deref().unwrap_or_default());
            info!("    Model: {}", device.model.as_deref().unwrap_or_default());
            info!("    Port: {}", device.port.kind);
            info!("      Path: {}", device.port.path.as_deref().unwrap_or_default());
            info!("      Protocol: {}", device.port.protocol);
            if device.port.kind == PortKind::Serial {
                info!("      Baud: {}", device.port.baud);
            }
            for command in &device.commands {
                info!(
                    "    Command: {} ({} outputs)",
                    command.command,
                    command.outputs().len()
                );
            }
        }
        info!("  MQTT: {}", if self.mqtt.enabled { "enabled" } else { "disabled" });
        if self.mqtt.enabled {
            info!("    Host: {}", self.mqtt.host);
            info!("    Port: {}", self.mqtt.port);
            info!("    Namespace: {}", self.mqtt.namespace);
        }
    }

    fn validate(&self) -> Result<()> {
        let devices = self.devices();
        if devices.is_empty() {
            bail!(ConfigError::Invalid("no device configured".to_string()));
        }

        let mut names = HashSet::new();
        for device in &devices {
            if !names.insert(device.name()) {
                bail!(ConfigError::Invalid(format!("duplicate device name {}", device.name)));
            }

            if device.port.kind == PortKind::Ble && device.port.path.is_none() {
                bail!(ConfigError::Invalid(format!(
                    "device {} uses a ble port but has no mac address",
                    device.name
                )));
            }

            if device.port.kind == PortKind::Mqtt && !self.mqtt.enabled {
                bail!(ConfigError::Invalid(format!(
                    "device {} uses an mqtt port but mqtt is disabled",
                    device.name
                )));
            }

            for command in &device.commands {
                command.trigger()?;

                for output in command.outputs() {
                    for pattern in [&output.filter, &output.excl_filter].into_iter().flatten() {
                        regex::Regex::new(pattern).map_err(|err| {
                            ConfigError::Invalid(format!("{}: bad filter: {}", command.command, err))
                        })?;
                    }
                    if output.sink == SinkKind::Datalog && output.path.is_none() {
                        bail!(ConfigError::Invalid(format!(
                            "{}: datalog output needs a path",
                            command.command
                        )));
                    }
                    if output.sink == SinkKind::Mqtt && !self.mqtt.enabled {
                        bail!(ConfigError::Invalid(format!(
                            "{}: mqtt output but mqtt is disabled",
                            command.command
                        )));
                    }
                }
            }
        }

        if self.mqtt.enabled {
            if self.mqtt.port == 0 {
                bail!("mqtt.port must be between 1 and 65535");
            }
            if self.mqtt.host.is_empty() {
                return Err(file_error!("MQTT host cannot be empty"));
            }
        }

        Ok(())
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    fn default_loop() -> LoopSetting {
        LoopSetting::Every(10)
    }

    fn default_device_name() -> String {
        "powermon".to_string()
    }

    fn default_port() -> Port {
        Port {
            kind: Self::default_port_kind(),
            path: None,
            baud: Self::default_baud(),
            protocol: Self::default_protocol(),
            response_number: 0,
            timeout: Self::default_port_timeout(),
        }
    }

    fn default_port_kind() -> PortKind {
        PortKind::Test
    }

    fn default_baud() -> u32 {
        2400
    }

    fn default_protocol() -> ProtocolId {
        ProtocolId::Pi30
    }

    fn default_port_timeout() -> u64 {
        5
    }

    fn default_sink() -> SinkKind {
        SinkKind::Screen
    }

    fn default_mqtt() -> Mqtt {
        Mqtt {
            enabled: false,
            host: Self::default_mqtt_host(),
            port: Self::default_mqtt_port(),
            username: None,
            password: None,
            namespace: Self::default_mqtt_namespace(),
            adhoc_topic: None,
        }
    }

    fn default_mqtt_host() -> String {
        "localhost".to_string()
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "powermon".to_string()
    }

    fn default_enabled() -> bool {
        true
    }
}
