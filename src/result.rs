use crate::prelude::*;
use crate::protocol::definition::Metadata;

use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            // Debug keeps the trailing ".0" so 230.0 does not print as 230
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reading {
    pub label: String,
    pub value: Value,
    pub unit: String,
    #[serde(skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl Reading {
    pub fn new(label: impl Into<String>, value: Value, unit: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value,
            unit: unit.into(),
            metadata: Metadata::NONE,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Canonical output key: lowercase, spaces to underscores.
    pub fn slug(&self) -> String {
        slugify(&self.label)
    }
}

pub fn slugify(label: &str) -> String {
    label.to_lowercase().replace(' ', "_")
}

/// Outcome of one dispatch, successful or not.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CommandResult {
    pub command: String,
    pub description: String,
    #[serde(skip)]
    pub raw_response: Vec<u8>,
    pub is_valid: bool,
    pub error: bool,
    pub error_messages: Vec<String>,
    pub readings: Vec<Reading>,
}

impl CommandResult {
    pub fn new(command: &str, description: &str, raw_response: &[u8]) -> Self {
        Self {
            command: command.to_owned(),
            description: description.to_owned(),
            raw_response: raw_response.to_vec(),
            is_valid: true,
            error: false,
            error_messages: Vec::new(),
            readings: Vec::new(),
        }
    }

    pub fn for_command(command: &Command, raw_response: &[u8]) -> Self {
        Self::new(&command.code, command.definition.description, raw_response)
    }

    /// An error result for a command that never produced a response.
    pub fn failed(command: &str, description: &str, err: impl std::fmt::Display) -> Self {
        let mut r = Self::new(command, description, &[]);
        r.invalidate(err);
        r
    }

    /// Marks the whole response invalid.
    pub fn invalidate(&mut self, err: impl std::fmt::Display) {
        self.is_valid = false;
        self.add_error(err);
    }

    /// Records a problem with one field; the rest of the response still decodes.
    pub fn add_error(&mut self, err: impl std::fmt::Display) {
        self.error = true;
        self.error_messages.push(err.to_string());
    }

    pub fn push(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    pub fn get(&self, slug: &str) -> Option<&Reading> {
        self.readings.iter().find(|r| r.slug() == slug)
    }

    pub fn raw_response_lossy(&self) -> String {
        String::from_utf8_lossy(&self.raw_response).into_owned()
    }
}
