//! Daly BMS over its UART/USB adapter: 13 byte request and reply frames,
//! `A5 <address> <command> 08 <8 data bytes> <sum>`.

use crate::crc;
use crate::prelude::*;
use crate::protocol::definition::{DecodeKind::*, FieldDef, ReadMode, ResponseType, QUERY};
use crate::protocol::CommandTable;

const START: u8 = 0xa5;
/// Address the host sends from.
const HOST_ADDRESS: u8 = 0x80;
const DATA_LENGTH: usize = 8;
const FRAME_LENGTH: usize = 4 + DATA_LENGTH + 1;

static MOSFET_MODES: &[(&str, &str)] = &[("00", "Stationary"), ("01", "Charging"), ("02", "Discharging")];
static ON_OFF: &[(&str, &str)] = &[("00", "off"), ("01", "on")];

const DALY_QUERY: CommandDefinition = CommandDefinition {
    response_type: ResponseType::Positional,
    read_mode: ReadMode::UntilIdle,
    ..QUERY
};

pub static COMMANDS: &[CommandDefinition] = &[
    CommandDefinition {
        code: "SOC",
        description: "State of Charge",
        help: " -- display the battery state of charge",
        command_code: Some("90"),
        fields: &[
            FieldDef::new("Battery Bank Voltage", BeU16(10), "V")
                .meta("mdi:battery-outline", "voltage", "measurement"),
            FieldDef::new("Acquisition Voltage", BeU16(10), "V"),
            FieldDef::new("Current", BeU16Offset(30000, 10), "A")
                .meta("mdi:current-dc", "current", "measurement"),
            FieldDef::new("SOC", BeU16(10), "%").meta("mdi:battery", "battery", "measurement"),
        ],
        test_responses: &[
            b"\xa5\x01\x90\x08\x02\x10\x00\x00uo\x03\xbc\xf3",
            b"\xa5\x01\x90\x08\x02\x14\x00\x00uE\x03x\x89",
            b"\xa5\x01\x90\x08\x01\t\x00\x00u\xcf\x03\n\x99",
            b"",
        ],
        ..DALY_QUERY
    },
    CommandDefinition {
        code: "CELLRANGE",
        description: "Cell Voltage Range",
        help: " -- display the highest and lowest cell voltages",
        command_code: Some("91"),
        fields: &[
            FieldDef::new("Highest Cell Voltage", BeU16(1000), "V"),
            FieldDef::new("Highest Cell", U8, ""),
            FieldDef::new("Lowest Cell Voltage", BeU16(1000), "V"),
            FieldDef::new("Lowest Cell", U8, ""),
            FieldDef::new("", Rem, ""),
        ],
        test_responses: &[b"\xa5\x01\x91\x08\x0d\x05\x03\x0c\xf8\x0a\x00\x00\x62"],
        ..DALY_QUERY
    },
    CommandDefinition {
        code: "TEMPRANGE",
        description: "Temperature Range",
        help: " -- display the highest and lowest temperatures",
        command_code: Some("92"),
        fields: &[
            FieldDef::new("Highest Temperature", U8Offset(40), "°C")
                .meta("", "temperature", "measurement"),
            FieldDef::new("Highest Sensor", U8, ""),
            FieldDef::new("Lowest Temperature", U8Offset(40), "°C")
                .meta("", "temperature", "measurement"),
            FieldDef::new("Lowest Sensor", U8, ""),
            FieldDef::new("", Rem, ""),
        ],
        test_responses: &[b"\xa5\x01\x92\x08\x41\x01\x3f\x02\x00\x00\x00\x00\xc3"],
        ..DALY_QUERY
    },
    CommandDefinition {
        code: "MOSFET",
        description: "MOSFET Status",
        help: " -- display the charge and discharge MOSFET state and remaining capacity",
        command_code: Some("93"),
        fields: &[
            FieldDef::new("Mode", Keyed(MOSFET_MODES), ""),
            FieldDef::new("Charging MOSFET", Keyed(ON_OFF), ""),
            FieldDef::new("Discharging MOSFET", Keyed(ON_OFF), ""),
            FieldDef::new("BMS Cycles", U8, ""),
            FieldDef::new("Remaining Capacity", BeU32(1000), "Ah"),
        ],
        test_responses: &[b"\xa5\x01\x93\x08\x01\x01\x01\x2a\x00\x01\x86\xa0\x95"],
        ..DALY_QUERY
    },
    CommandDefinition {
        code: "STATUS",
        description: "Status Information",
        help: " -- display cell and sensor counts, charger and load state and cycles",
        command_code: Some("94"),
        fields: &[
            FieldDef::new("Cells", U8, ""),
            FieldDef::new("Temperature Sensors", U8, ""),
            FieldDef::new("Charger Running", Keyed(ON_OFF), ""),
            FieldDef::new("Load Running", Keyed(ON_OFF), ""),
            FieldDef::new("IO State", Hex(1), ""),
            FieldDef::new("Cycles", BeU16(1), ""),
            FieldDef::new("", Rem, ""),
        ],
        test_responses: &[b"\xa5\x01\x94\x08\x10\x02\x00\x01\x03\x00\x2a\x00\x82"],
        ..DALY_QUERY
    },
];

#[derive(Clone, Debug)]
pub struct Daly {
    table: CommandTable,
}

impl Daly {
    pub fn new(table: CommandTable) -> Self {
        Self { table }
    }

    fn command_byte(definition: &CommandDefinition) -> u8 {
        definition
            .command_code
            .and_then(|c| u8::from_str_radix(c, 16).ok())
            .unwrap_or_default()
    }
}

impl ProtocolCommon for Daly {
    fn id(&self) -> ProtocolId {
        ProtocolId::Daly
    }

    fn table(&self) -> &CommandTable {
        &self.table
    }

    fn id_command(&self) -> &'static str {
        "SOC"
    }

    /// The adapter wants a trailing LF after the checksum.
    fn full_command(&self, _code: &str, definition: &CommandDefinition) -> Vec<u8> {
        let mut frame = vec![START, HOST_ADDRESS, Self::command_byte(definition), DATA_LENGTH as u8];
        frame.extend_from_slice(&[0u8; DATA_LENGTH]);
        frame.push(crc::crc8_sum(&frame));
        frame.push(b'\n');
        frame
    }

    fn check_valid(
        &self,
        response: &[u8],
        definition: &CommandDefinition,
    ) -> Result<(), DecodeError> {
        if response.is_empty() {
            return Err(DecodeError::Empty);
        }
        if response.len() < FRAME_LENGTH {
            return Err(DecodeError::TooShort);
        }
        if response[0] != START {
            return Err(DecodeError::MissingStart(format!("{:02x}", START)));
        }

        let expected = Self::command_byte(definition);
        if response[2] != expected {
            return Err(DecodeError::InvalidValue(format!(
                "reply to command {:02x} does not answer {} (expected {:02x})",
                response[2], definition.code, expected
            )));
        }

        let (data, checksum) = response[..FRAME_LENGTH].split_at(FRAME_LENGTH - 1);
        let calculated = crc::crc8_sum(data);
        if calculated != checksum[0] {
            return Err(DecodeError::CrcMismatch {
                got: format!("{:02x}", checksum[0]),
                calculated: format!("{:02x}", calculated),
            });
        }

        Ok(())
    }

    fn trim(&self, response: &[u8]) -> Vec<u8> {
        response.get(4..FRAME_LENGTH - 1).unwrap_or_default().to_vec()
    }
}
