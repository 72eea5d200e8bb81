//! Static command tables are built from the types in this module.

use serde::Serialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum CommandKind {
    Query,
    Setter,
}

/// How the payload of a response is laid out.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponseType {
    /// tokens split on the protocol separator, decoded by position
    Indexed,
    /// whole payload kept as one string field
    Multivalued,
    /// setter acknowledgement
    Ack,
    /// whole payload decoded by the first field
    Bytes,
    /// `KEY\tVALUE` lines looked up by key
    Keyed,
    /// binary record walked field by field
    Positional,
    /// binary type-length-value body
    Tlv,
}

/// How a port decides a response is complete.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadMode {
    UntilCr,
    /// listen only, collect this many lines
    Lines(usize),
    /// read until the device stops sending
    UntilIdle,
}

/// Passthrough hints for sinks. Never interpreted while decoding.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<&'static str>,
}

impl Metadata {
    pub const NONE: Metadata = Metadata {
        icon: None,
        device_class: None,
        state_class: None,
    };

    pub fn is_empty(&self) -> bool {
        self.icon.is_none() && self.device_class.is_none() && self.state_class.is_none()
    }
}

const fn non_empty(s: &'static str) -> Option<&'static str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DecodeKind {
    Int,
    Float,
    /// legacy tag, decoded exactly like `Float`
    TenInt,
    /// numeric token divided by the given factor
    Div(u32),
    /// numeric token multiplied by the given factor
    Mul(u32),
    Str,
    /// integer index into the list
    OptionList(&'static [&'static str]),
    /// string key into the map, unknown keys pass through
    Keyed(&'static [(&'static str, &'static str)]),
    /// one reading per `0`/`1` character
    Flags(&'static [&'static str]),
    /// one reading per set bit only
    StatFlags(&'static [&'static str]),
    /// `E`/`D` markers switch the state of the letters that follow
    EnFlags(&'static [(char, &'static str)]),
    Ack,
    /// consumed, never emitted
    Exclude,

    Hex(usize),
    /// NUL bytes dropped
    Ascii(usize),
    /// whole value as text, with the given prefix removed
    AsciiAfter(&'static str),
    U8,
    U8Plus1,
    LeU16(u32),
    /// little endian u16 / 1000 of unknown meaning, unit shows the raw bytes
    LeU16Raw,
    LeI16(u32),
    /// rounded to 4 decimal places
    LeF32,
    BeU16(u32),
    /// big endian u16 less the offset, then divided
    BeU16Offset(i64, u32),
    BeU32(u32),
    /// u8 less the offset
    U8Offset(i64),
    /// JK BMS cell list: `(number, millivolts)` triples
    JkCells,
    /// JK BMS current: bit 15 is the direction (1 = charge), the rest is 10mA units
    JkCurrent,
    Discard(usize),
    /// repeat the inner kind, labels suffixed 01..n
    Loop(usize, &'static DecodeKind),
    Uptime(usize),
    /// copy `{prefix}{NN}` where NN is the value of reading `index`
    Lookup {
        index: &'static str,
        prefix: &'static str,
    },
    /// whatever is left of the record
    Rem,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldDef {
    pub label: &'static str,
    pub kind: DecodeKind,
    pub unit: &'static str,
    pub meta: Metadata,
    pub key: Option<&'static str>,
}

impl FieldDef {
    pub const fn new(label: &'static str, kind: DecodeKind, unit: &'static str) -> Self {
        Self {
            label,
            kind,
            unit,
            meta: Metadata::NONE,
            key: None,
        }
    }

    pub const fn meta(
        self,
        icon: &'static str,
        device_class: &'static str,
        state_class: &'static str,
    ) -> Self {
        Self {
            meta: Metadata {
                icon: non_empty(icon),
                device_class: non_empty(device_class),
                state_class: non_empty(state_class),
            },
            ..self
        }
    }

    pub const fn keyed(self, key: &'static str) -> Self {
        Self {
            key: Some(key),
            ..self
        }
    }

    /// Whether decoding this field can produce a reading at all.
    pub fn is_emitted(&self) -> bool {
        !matches!(self.kind, DecodeKind::Exclude | DecodeKind::Discard(_))
    }
}

#[derive(Debug, PartialEq)]
pub struct CommandDefinition {
    pub code: &'static str,
    pub description: &'static str,
    pub help: &'static str,
    pub kind: CommandKind,
    pub response_type: ResponseType,
    pub fields: &'static [FieldDef],
    pub test_responses: &'static [&'static [u8]],
    /// full-match pattern for parameterised families, e.g. `QPGS(\d+)$`
    pub regex: Option<&'static str>,
    pub supports: &'static [&'static str],
    pub nosupports: &'static [&'static str],
    pub nocrc: bool,
    pub read_mode: ReadMode,
    /// wire code when it differs from `code` (VE.Direct register, JK command word)
    pub command_code: Option<&'static str>,
}

pub const ACK_FIELDS: &[FieldDef] = &[FieldDef::new("Command execution", DecodeKind::Ack, "")];

/// Base for query definitions, used with struct update syntax.
pub const QUERY: CommandDefinition = CommandDefinition {
    code: "",
    description: "",
    help: "",
    kind: CommandKind::Query,
    response_type: ResponseType::Indexed,
    fields: &[],
    test_responses: &[],
    regex: None,
    supports: &[],
    nosupports: &[],
    nocrc: false,
    read_mode: ReadMode::UntilCr,
    command_code: None,
};

/// Base for setter definitions: acknowledged with ACK/NAK.
pub const SETTER: CommandDefinition = CommandDefinition {
    kind: CommandKind::Setter,
    response_type: ResponseType::Ack,
    fields: ACK_FIELDS,
    ..QUERY
};

impl CommandDefinition {
    /// Whether this definition is available for the given device model.
    /// Without a model only the definitions with no `supports` list apply.
    pub fn supports_model(&self, model: Option<&str>) -> bool {
        let Some(model) = model else {
            return self.supports.is_empty();
        };

        !self.nosupports.contains(&model)
            && (self.supports.is_empty() || self.supports.contains(&model))
    }

    pub fn is_setter(&self) -> bool {
        self.kind == CommandKind::Setter
    }

    /// Minimum number of tokens an indexed response must carry.
    pub fn expected_tokens(&self) -> usize {
        match self.response_type {
            ResponseType::Indexed => self.fields.len(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static LIMITED: CommandDefinition = CommandDefinition {
        code: "QLIM",
        supports: &["PI18"],
        nosupports: &["LV5048"],
        ..QUERY
    };

    #[test]
    fn model_filter() {
        assert!(!LIMITED.supports_model(None));
        assert!(LIMITED.supports_model(Some("PI18")));
        assert!(!LIMITED.supports_model(Some("LV5048")));
        assert!(!LIMITED.supports_model(Some("MKS2")));

        assert!(QUERY.supports_model(Some("MKS2")));
    }

    #[test]
    fn field_builders() {
        let f = FieldDef::new("Battery Voltage", DecodeKind::Float, "V").meta(
            "mdi:battery-outline",
            "voltage",
            "",
        );
        assert_eq!(f.meta.icon, Some("mdi:battery-outline"));
        assert_eq!(f.meta.device_class, Some("voltage"));
        assert_eq!(f.meta.state_class, None);
        assert!(f.key.is_none());

        let f = FieldDef::new("Panel voltage", DecodeKind::Div(1000), "V").keyed("VPV");
        assert_eq!(f.key, Some("VPV"));
    }

    #[test]
    fn setter_defaults_to_ack() {
        assert_eq!(SETTER.response_type, ResponseType::Ack);
        assert!(SETTER.is_setter());
        assert_eq!(SETTER.fields[0].label, "Command execution");
    }
}
