use crate::prelude::*;

use enum_dispatch::*;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

pub mod daly;
pub mod decode;
pub mod definition;
pub mod jkble;
pub mod jkserial;
pub mod pi18;
pub mod pi30;
pub mod pi30max;
pub mod ved;

pub use definition::{
    CommandDefinition, CommandKind, DecodeKind, FieldDef, Metadata, ReadMode, ResponseType,
};
pub use daly::Daly;
pub use jkble::JkBle;
pub use jkserial::JkSerial;
pub use pi18::Pi18;
pub use pi30::Pi30;
pub use ved::Ved;

// ProtocolId {{{
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum ProtocolId {
    Pi30,
    Pi30Max,
    Pi18,
    Ved,
    JkSerial,
    Jk02,
    Jk04,
    Daly,
}

impl FromStr for ProtocolId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PI30" => Ok(Self::Pi30),
            "PI30MAX" => Ok(Self::Pi30Max),
            "PI18" => Ok(Self::Pi18),
            "VED" => Ok(Self::Ved),
            "JKSERIAL" => Ok(Self::JkSerial),
            "JK02" => Ok(Self::Jk02),
            "JK04" => Ok(Self::Jk04),
            "DALY" => Ok(Self::Daly),
            // JKPB names a protocol that was never published, so it stays unknown
            _ => Err(ConfigError::UnknownProtocol(s.to_owned())),
        }
    }
}

impl std::fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pi30 => "PI30",
            Self::Pi30Max => "PI30MAX",
            Self::Pi18 => "PI18",
            Self::Ved => "VED",
            Self::JkSerial => "JKSERIAL",
            Self::Jk02 => "JK02",
            Self::Jk04 => "JK04",
            Self::Daly => "DALY",
        };
        write!(f, "{}", name)
    }
} // }}}

// CommandTable {{{
/// The effective command set of one protocol for one device model.
#[derive(Clone, Debug)]
pub struct CommandTable {
    definitions: Vec<&'static CommandDefinition>,
    exact: HashMap<&'static str, usize>,
    families: Vec<(Regex, usize)>,
}

impl CommandTable {
    /// Builds the table from `sources` in order. When a code appears in more
    /// than one source the first one wins, so more specific tables go first.
    pub fn new(sources: &[&'static [CommandDefinition]], model: Option<&str>) -> Result<Self> {
        let mut definitions: Vec<&'static CommandDefinition> = Vec::new();
        let mut exact = HashMap::new();
        let mut families = Vec::new();

        for source in sources {
            // model variants may share a code, so duplicates are checked after filtering
            let mut seen = HashSet::new();
            for definition in source.iter() {
                if !definition.supports_model(model) {
                    debug!("{} not available for model {:?}", definition.code, model);
                    continue;
                }
                if !seen.insert(definition.code) {
                    bail!("duplicate definition of {} in command table", definition.code);
                }
                if definitions.iter().any(|d| d.code == definition.code) {
                    continue;
                }

                let index = definitions.len();
                match definition.regex {
                    Some(pattern) => {
                        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|err| {
                            anyhow!("invalid regex for {}: {}", definition.code, err)
                        })?;
                        families.push((regex, index));
                    }
                    None => {
                        exact.insert(definition.code, index);
                    }
                }
                definitions.push(definition);
            }
        }

        Ok(Self {
            definitions,
            exact,
            families,
        })
    }

    pub fn definitions(&self) -> &[&'static CommandDefinition] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Exact code first, then the first regex family (in table order) that
    /// matches the whole code. Captured groups become the parameter.
    pub fn lookup(&self, code: &str) -> Option<(&'static CommandDefinition, Option<String>)> {
        if let Some(definition) = self.exact.get(code).and_then(|i| self.definitions.get(*i)) {
            return Some((*definition, None));
        }

        self.families.iter().find_map(|(regex, i)| {
            let captures = regex.captures(code)?;
            let definition = self.definitions.get(*i)?;
            Some((*definition, Self::parameter(&captures)))
        })
    }

    // outermost groups only, joined with ","
    fn parameter(captures: &Captures) -> Option<String> {
        let mut parts = Vec::new();
        let mut end = 0;
        for m in captures.iter().skip(1).flatten() {
            if m.start() >= end {
                parts.push(m.as_str());
                end = m.end();
            }
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(","))
        }
    }
} // }}}

/// A resolved command, ready to be sent.
#[derive(Clone, Debug)]
pub struct Command {
    pub code: String,
    pub definition: &'static CommandDefinition,
    pub parameter: Option<String>,
    pub full_command: Vec<u8>,
}

impl Command {
    /// Listen-only commands write nothing and just read.
    pub fn is_listen_only(&self) -> bool {
        self.full_command.is_empty()
    }
}

#[enum_dispatch]
pub trait ProtocolCommon {
    fn id(&self) -> ProtocolId;
    fn table(&self) -> &CommandTable;

    /// Command used to identify the connected device.
    fn id_command(&self) -> &'static str;

    /// The frame written to the device. Built fresh for every dispatch.
    fn full_command(&self, code: &str, definition: &CommandDefinition) -> Vec<u8>;

    /// Framing and checksum validation, run before anything is decoded.
    fn check_valid(&self, response: &[u8], definition: &CommandDefinition)
        -> Result<(), DecodeError>;

    /// The payload with start marker, checksum and terminator removed.
    fn trim(&self, response: &[u8]) -> Vec<u8>;

    fn split(&self, payload: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(payload)
            .split(' ')
            .map(str::to_owned)
            .collect()
    }

    /// `Some(true)` for ACK, `Some(false)` for NAK, `None` for anything else.
    fn acknowledgement(&self, _response: &[u8]) -> Option<bool> {
        None
    }

    fn decode_payload(
        &self,
        definition: &CommandDefinition,
        payload: &[u8],
        result: &mut CommandResult,
    ) {
        match definition.response_type {
            ResponseType::Indexed => {
                decode::decode_indexed(definition.fields, &self.split(payload), result)
            }
            ResponseType::Keyed => {
                decode::decode_keyed(definition.fields, &self.split(payload), result)
            }
            ResponseType::Positional => decode::decode_positional(definition.fields, payload, result),
            ResponseType::Multivalued
            | ResponseType::Bytes
            | ResponseType::Ack
            | ResponseType::Tlv => {
                decode::decode_whole(definition.fields, &String::from_utf8_lossy(payload), result)
            }
        }
    }

    fn decode(&self, command: &Command, response: &[u8]) -> CommandResult {
        let definition = command.definition;
        let mut result = CommandResult::for_command(command, response);

        if let Err(err) = self.check_valid(response, definition) {
            result.invalidate(err);
            return result;
        }

        if definition.response_type == ResponseType::Ack {
            let label = definition
                .fields
                .first()
                .map(|f| f.label)
                .unwrap_or("Command execution");
            match self.acknowledgement(response) {
                Some(ack) => {
                    let outcome = if ack { "Successful" } else { "Failed" };
                    result.push(Reading::new(label, Value::from(outcome), ""));
                }
                None => result.invalidate(DecodeError::InvalidValue(format!(
                    "unexpected response to {}: {:?}",
                    command.code,
                    String::from_utf8_lossy(response)
                ))),
            }
            return result;
        }

        let payload = self.trim(response);
        if payload == b"NAK" {
            result.invalidate(DecodeError::Nak);
            return result;
        }

        self.decode_payload(definition, &payload, &mut result);
        result
    }

    fn resolve(&self, code: &str) -> Result<Command, DecodeError> {
        let (definition, parameter) = self
            .table()
            .lookup(code)
            .ok_or_else(|| DecodeError::UnknownCommand(code.to_owned()))?;

        Ok(Command {
            code: code.to_owned(),
            definition,
            parameter,
            full_command: self.full_command(code, definition),
        })
    }

    fn get_full_command(&self, code: &str) -> Result<Vec<u8>, DecodeError> {
        Ok(self.resolve(code)?.full_command)
    }

    fn list_commands(&self) -> Vec<(&'static str, &'static str)> {
        self.table()
            .definitions()
            .iter()
            .map(|d| (d.code, d.description))
            .collect()
    }

    /// Startup sanity check of the bound table.
    fn check_definitions(&self) -> Result<()> {
        if self.table().is_empty() {
            bail!("{} has no commands", self.id());
        }

        for definition in self.table().definitions() {
            if definition.response_type == ResponseType::Indexed && definition.fields.is_empty() {
                bail!("{} {} has no response fields", self.id(), definition.code);
            }
            if definition.is_setter() && definition.response_type != ResponseType::Ack {
                bail!("{} setter {} is not acknowledged", self.id(), definition.code);
            }
        }

        Ok(())
    }
}

#[enum_dispatch(ProtocolCommon)]
#[derive(Clone, Debug)]
pub enum Protocol {
    Pi30(Pi30),
    Pi18(Pi18),
    Ved(Ved),
    JkSerial(JkSerial),
    JkBle(JkBle),
    Daly(Daly),
}

impl Protocol {
    /// Binds a protocol identifier to its command table, filtered for `model`.
    pub fn new(id: ProtocolId, model: Option<&str>) -> Result<Self> {
        let protocol: Protocol = match id {
            ProtocolId::Pi30 => {
                Pi30::new(id, CommandTable::new(&[pi30::QUERIES, pi30::SETTERS], model)?).into()
            }
            ProtocolId::Pi30Max => Pi30::new(
                id,
                CommandTable::new(&[pi30max::QUERIES, pi30::QUERIES, pi30::SETTERS], model)?,
            )
            .into(),
            ProtocolId::Pi18 => {
                Pi18::new(CommandTable::new(&[pi18::QUERIES, pi18::SETTERS], model)?).into()
            }
            ProtocolId::Ved => Ved::new(CommandTable::new(&[ved::COMMANDS], model)?).into(),
            ProtocolId::JkSerial => {
                JkSerial::new(CommandTable::new(&[jkserial::COMMANDS], model)?).into()
            }
            ProtocolId::Jk02 => {
                JkBle::new(id, CommandTable::new(&[jkble::JK02_COMMANDS], model)?).into()
            }
            ProtocolId::Jk04 => {
                JkBle::new(id, CommandTable::new(&[jkble::JK04_COMMANDS], model)?).into()
            }
            ProtocolId::Daly => Daly::new(CommandTable::new(&[daly::COMMANDS], model)?).into(),
        };

        protocol.check_definitions()?;
        info!(
            "using protocol {} with {} commands",
            protocol.id(),
            protocol.table().len()
        );

        Ok(protocol)
    }

    pub fn from_name(name: &str, model: Option<&str>) -> Result<Self> {
        Self::new(ProtocolId::from_str(name)?, model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_ids() {
        assert_eq!("pi30max".parse::<ProtocolId>(), Ok(ProtocolId::Pi30Max));
        assert_eq!(ProtocolId::Jk04.to_string(), "JK04");
        assert_eq!("daly".parse::<ProtocolId>(), Ok(ProtocolId::Daly));
        assert_eq!(
            "JKPB".parse::<ProtocolId>(),
            Err(ConfigError::UnknownProtocol("JKPB".to_string()))
        );
    }

    #[test]
    fn every_protocol_builds() -> Result<()> {
        for id in [
            ProtocolId::Pi30,
            ProtocolId::Pi30Max,
            ProtocolId::Pi18,
            ProtocolId::Ved,
            ProtocolId::JkSerial,
            ProtocolId::Jk02,
            ProtocolId::Jk04,
            ProtocolId::Daly,
        ] {
            let protocol = Protocol::new(id, None)?;
            assert_eq!(protocol.id(), id);
            assert!(protocol.table().lookup(protocol.id_command()).is_some());
        }
        Ok(())
    }

    #[test]
    fn model_variants_share_a_code() -> Result<()> {
        for model in [None, Some("PIP5048MG")] {
            let protocol = Protocol::new(ProtocolId::Pi30, model)?;
            let command = protocol.resolve("QPGS1")?;
            assert_eq!(command.definition.description, "Parallel Information inquiry");
            assert!(protocol.resolve("QPIGS").is_ok());
            assert!(protocol.resolve("QPIGS2").is_err());
        }

        let protocol = Protocol::new(ProtocolId::Pi30, Some("LV5048"))?;
        let command = protocol.resolve("QPGS1")?;
        assert_eq!(command.definition.description, "Parallel Information inquiry LV5048");
        assert_eq!(command.parameter.as_deref(), Some("1"));
        assert!(protocol.resolve("QPIGS").is_err());
        assert!(protocol.resolve("QPIGS2").is_ok());

        assert!(Protocol::new(ProtocolId::Pi30Max, Some("LV5048")).is_ok());
        Ok(())
    }

    #[test]
    fn duplicate_code_in_one_source_is_rejected() {
        static TWICE: &[CommandDefinition] = &[
            CommandDefinition {
                code: "QPI",
                ..definition::QUERY
            },
            CommandDefinition {
                code: "QPI",
                ..definition::QUERY
            },
        ];
        let err = CommandTable::new(&[TWICE], None).err().map(|e| e.to_string());
        assert_eq!(err.as_deref(), Some("duplicate definition of QPI in command table"));
    }

    #[test]
    fn nested_groups_give_one_parameter() -> Result<()> {
        let protocol = Protocol::new(ProtocolId::Pi18, None)?;
        let command = protocol.resolve("BUCD440,480")?;
        assert_eq!(command.definition.code, "BUCD");
        assert_eq!(command.parameter.as_deref(), Some("440,480"));

        let command = protocol.resolve("MUCHGC0,030")?;
        assert_eq!(command.parameter.as_deref(), Some("0,030"));
        Ok(())
    }

    #[test]
    fn first_source_wins() -> Result<()> {
        let protocol = Protocol::new(ProtocolId::Pi30Max, None)?;
        let command = protocol.resolve("QPIRI")?;
        assert_eq!(command.definition.fields.len(), 28);
        assert!(protocol.resolve("QSID").is_ok());

        let protocol = Protocol::new(ProtocolId::Pi30, None)?;
        assert!(protocol.resolve("QSID").is_err());
        Ok(())
    }
}
