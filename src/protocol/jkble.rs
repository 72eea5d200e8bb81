//! JK BMS records as delivered by the BLE firmware (JK02 2 byte cells, JK04
//! 4 byte float cells). Requests are 20 byte frames, replies 300/320 byte
//! records decoded positionally.

use crate::crc;
use crate::prelude::*;
use crate::protocol::definition::{DecodeKind::*, FieldDef, ReadMode, ResponseType, QUERY};
use crate::protocol::CommandTable;

/// Start of every record.
pub const RECORD_START: [u8; 4] = [0x55, 0xaa, 0xeb, 0x90];
const REQUEST_START: [u8; 4] = [0xaa, 0x55, 0x90, 0xeb];
const RECORD_LENGTHS: [usize; 2] = [300, 320];

const INFO_RECORD: u8 = 0x03;
const CELL_RECORD: u8 = 0x02;

const GET_INFO: CommandDefinition = CommandDefinition {
    code: "getInfo",
    description: "BLE Device Information inquiry",
    help: " -- queries the ble device information",
    response_type: ResponseType::Positional,
    command_code: Some("97"),
    read_mode: ReadMode::UntilIdle,
    fields: &[
        FieldDef::new("Header", Hex(4), ""),
        FieldDef::new("Record Type", Hex(1), ""),
        FieldDef::new("Record Counter", U8, ""),
        FieldDef::new("Device Model", Ascii(10), ""),
        FieldDef::new("Hardware Version", Ascii(10), ""),
        FieldDef::new("Software Version", Ascii(10), ""),
        FieldDef::new("", Discard(10), ""),
        FieldDef::new("Device Name", Ascii(16), ""),
        FieldDef::new("Device Passcode", Ascii(10), ""),
        FieldDef::new("Manufacturing Date", Ascii(14), ""),
        FieldDef::new("Serial Number", Ascii(14), ""),
        FieldDef::new("User Data", Ascii(16), ""),
        FieldDef::new("Settings Passcode", Ascii(16), ""),
        FieldDef::new("", Rem, ""),
    ],
    test_responses: &[
        b"U\xaa\xeb\x90\x03\xf1JK-B2A24S\x00\x00\x00\x00\x00\x00\x003.0\x00\x00\x00\x00\x003.2.3\
            \x00\x00\x00\x08vE\x00\x04\x00\x00\x00Power Wall 1\x00\x00\x00\x001234\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\xc2",
        b"U\xaa\xeb\x90\x03\xb5JK-BD6A20S10P\x00\x00\x004.0\x00\x00\x00\x00\x004.1.7\x00\x00\x00T\
            \x1d\x16\x00\x04\x00\x00\x00Nothing JK1\x00\x00\x00\x00\x001234\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00200708\x00\x002006284075\x00\x00\x00\x00\x00\x00Input Userdata\
            \x00\x00123456\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\xc4",
    ],
    ..QUERY
};

pub static JK02_COMMANDS: &[CommandDefinition] = &[
    GET_INFO,
    CommandDefinition {
        code: "getCellData",
        description: "BLE Cell Data inquiry",
        help: " -- queries the ble device for the cell data",
        response_type: ResponseType::Positional,
        command_code: Some("96"),
        read_mode: ReadMode::UntilIdle,
        fields: &[
            FieldDef::new("Header", Hex(4), ""),
            FieldDef::new("Record Type", Hex(1), ""),
            FieldDef::new("Record Counter", U8, ""),
            FieldDef::new("Voltage Cell", Loop(24, &LeU16(1000)), "V"),
            FieldDef::new("", Discard(4), ""),
            FieldDef::new("Average Cell Voltage", LeU16(1000), "V"),
            FieldDef::new("Delta Cell Voltage", LeU16(1000), "V"),
            FieldDef::new("Unknown1", LeU16Raw, ""),
            FieldDef::new("Resistance Cell", Loop(25, &LeU16(1000)), "Ohm"),
            FieldDef::new("", Discard(4), ""),
            FieldDef::new("Battery Voltage", LeU16(1000), "V")
                .meta("mdi:battery-outline", "voltage", "measurement"),
            FieldDef::new("", Discard(10), ""),
            FieldDef::new("Battery T1", LeU16(10), "°C").meta("", "temperature", "measurement"),
            FieldDef::new("Battery T2", LeU16(10), "°C").meta("", "temperature", "measurement"),
            FieldDef::new("MOS Temp", LeU16(10), "°C").meta("", "temperature", "measurement"),
            FieldDef::new("", Discard(26), ""),
            FieldDef::new("Time", Uptime(3), ""),
            FieldDef::new("", Rem, ""),
        ],
        test_responses: &[
            b"U\xaa\xeb\x90\x02\xb5.\r(\r\xfa\x0c.\r/\r\"\r\"\r\x13\r\x19\r\x1d\r\x1d\r\x17\r\x1f\r\
            \x16\r\xfb\x0c\x1f\r\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\xff\
            \xff\x00\x00\x1c\r5\x00\x04\x02\x9b\x00\xc6\x00\xa0\x00\xb3\x00\xbc\x00\xcc\x00\xbe\x00\
            \xb1\x00\xb4\x00-\x01=\x01\xb0\x00\xa1\x00\xab\x00\xb2\x00\xad\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\xbc\xd1\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x1e\x01\x16\x01<\x01\x00\x00\x00\x00\x00ck\x0c\x03\x00@\r\
            \x03\x00\x00\x00\x00\x00\xdcM\x01\x00d\x00\x00\x00x\x1e\x16\x00\x01\x01H\n\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x07\x01\x01\x00\x00\x00\x98\x04\x00\x00\x00\x00&\
            \x01A@\x00\x00\x00\x007\xfe\xff\xff\x00\x00\x00\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x80",
        ],
        ..QUERY
    },
];

pub static JK04_COMMANDS: &[CommandDefinition] = &[
    GET_INFO,
    CommandDefinition {
        code: "getCellData",
        description: "BLE Cell Data inquiry",
        help: " -- queries the ble device for the cell data",
        response_type: ResponseType::Positional,
        command_code: Some("96"),
        read_mode: ReadMode::UntilIdle,
        fields: &[
            FieldDef::new("Header", Hex(4), ""),
            FieldDef::new("Record Type", Hex(1), ""),
            FieldDef::new("Record Counter", U8, ""),
            FieldDef::new("Voltage Cell", Loop(24, &LeF32), "V"),
            FieldDef::new("Resistance Cell", Loop(25, &LeF32), "Ohm"),
            FieldDef::new("Average Cell Voltage", LeF32, "V"),
            FieldDef::new("Delta Cell Voltage", LeF32, "V"),
            FieldDef::new("", Discard(8), ""),
            FieldDef::new("Highest Cell", U8Plus1, ""),
            FieldDef::new("Lowest Cell", U8Plus1, ""),
            FieldDef::new("Flags", Hex(2), ""),
            FieldDef::new("", Discard(64), ""),
            FieldDef::new("Uptime", Uptime(3), ""),
            FieldDef::new("", Discard(10), ""),
            FieldDef::new("Checksum", Hex(1), ""),
            FieldDef::new(
                "Highest Cell Voltage",
                Lookup {
                    index: "Highest Cell",
                    prefix: "Voltage Cell",
                },
                "V",
            ),
            FieldDef::new(
                "Lowest Cell Voltage",
                Lookup {
                    index: "Lowest Cell",
                    prefix: "Voltage Cell",
                },
                "V",
            ),
        ],
        test_responses: &[
            b"U\xaa\xeb\x90\x02\xff[Vb@\xe3Nb@njb@JPb@\xac\xd7b@\x11\xd2b@\xbd\xddb@\x9a\xd1b@D\xc8b@\
            \xce\xdcb@\xcc\xc7b@y\xe1b@W\xdcb@s\xa2b@_\x80b@\x88\xc4b@\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x131\\=\x066\x14=&\xe0\x11=\x80!\xf0<\x11S6=\x89\x80\x12=~|\x03=\xacA#=\x1a\
            \xd8<=\x9doO=\x8e\xb5\x1e=j,)=\xeb(e=\x18\x9cR=\xa3rN=\xeb\x94I=\x9a\xb2\xc2=\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x1a\xadb@\x00\x84\x05<\x00\x00\x00\x00\xff\xff\x00\x00\
            \x0b\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x006\xa3UL@\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\xbe\
            \x0bT\x00\x14V\xa4?\xb8v\xa4?\x00\xa2",
            b"U\xaa\xeb\x90\x02\xfd\x01\x04\x13@\x81\xbc\x16@E\xd2\x10@\xed\xd4\x16@\xed\xd4\x16@2\x1e\
            \x17@\xa8\x10\x14@\xe3\x7f\x17@\x15\xa4\x16@\xf7)\x16@2\x1e\x17@\xb1\xf4\x0b@2\xa3\x14@\
            \x9eJ\r@\x9e\xc5\x0f@\xa8\x8b\x16@\x9e6\x17@\xc6\x05\x17@\xe3\x7f\x17@Y\xed\x16@\xe3\x7f\
            \x17@\xcf\xdf\x13@Y\xed\x16@2\xa3\x14@\xab\xe5p>Yk2>&\xef\xf6=>\xb84>p\xfc~>\xab9\xbc>\
            \xde\xd3\xb6>25\x80>672>\xaeG\xf7=\x86\xc4\xfa=g,\x02>\xf6&\x02>\x97S\x01>\xd8\x1d\x01>\
            \x94%\x05>JF\x00>\x8f\xd83>\xe0a\x92>\x05\xf2\xaa>\xd2\xbaU>\xad\xc0\xf8=\xee\x88\xf7=\
            \xd5\xa2@>\x00\x00\x00\x00\x92\xf2\x14@P,7>\x00\x00\x00\x00\xff\xff\xff\x00\x07\x0b\x01\
            \x01\x00X\xb6?\x00\x00\x00\x00\x00\x00\x00Z{\xedK@\x00\x00\x00\x00\x00\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x01\x01\x00\x00\xd2\x00\x00\x00\x00\
            \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\xa0/\x00\x00\x00\
            \x00\x00\x00\x00X*@\x00\x0b",
        ],
        ..QUERY
    },
];

/// Whether `record` is a whole record: known start, known length and a valid
/// trailing checksum.
pub fn is_record_complete(record: &[u8]) -> bool {
    record.starts_with(&RECORD_START)
        && RECORD_LENGTHS.contains(&record.len())
        && record
            .split_last()
            .is_some_and(|(checksum, data)| crc::crc8_sum(data) == *checksum)
}

/// The first whole record in `buf`, skipping anything before its start.
/// Notifications arrive in small pieces and records are streamed back to back.
pub fn take_record(buf: &[u8]) -> Option<Vec<u8>> {
    let start = buf.windows(RECORD_START.len()).position(|w| w == RECORD_START)?;
    RECORD_LENGTHS
        .iter()
        .filter_map(|len| buf.get(start..start + len))
        .find(|record| is_record_complete(record))
        .map(<[u8]>::to_vec)
}

#[derive(Clone, Debug)]
pub struct JkBle {
    id: ProtocolId,
    table: CommandTable,
}

impl JkBle {
    pub fn new(id: ProtocolId, table: CommandTable) -> Self {
        Self { id, table }
    }

    fn record_type(definition: &CommandDefinition) -> u8 {
        if definition.code == GET_INFO.code {
            INFO_RECORD
        } else {
            CELL_RECORD
        }
    }
}

impl ProtocolCommon for JkBle {
    fn id(&self) -> ProtocolId {
        self.id
    }

    fn table(&self) -> &CommandTable {
        &self.table
    }

    fn id_command(&self) -> &'static str {
        "getInfo"
    }

    fn full_command(&self, _code: &str, definition: &CommandDefinition) -> Vec<u8> {
        let mut frame = vec![0u8; 20];
        frame[..4].copy_from_slice(&REQUEST_START);
        frame[4] = definition
            .command_code
            .and_then(|c| u8::from_str_radix(c, 16).ok())
            .unwrap_or_default();
        frame[19] = crc::crc8_sum(&frame[..19]);
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
        if !response.starts_with(&RECORD_START) {
            return Err(DecodeError::MissingStart(hex::encode(RECORD_START)));
        }
        if !RECORD_LENGTHS.contains(&response.len()) {
            return Err(DecodeError::InvalidValue(format!(
                "record length {} is not one of {:?}",
                response.len(),
                RECORD_LENGTHS
            )));
        }

        let (checksum, data) = response.split_last().ok_or(DecodeError::TooShort)?;
        let calculated = crc::crc8_sum(data);
        if calculated != *checksum {
            return Err(DecodeError::CrcMismatch {
                got: format!("{:02x}", checksum),
                calculated: format!("{:02x}", calculated),
            });
        }

        let expected = Self::record_type(definition);
        match response.get(RECORD_START.len()) {
            Some(record_type) if *record_type == expected => Ok(()),
            other => Err(DecodeError::InvalidValue(format!(
                "record type {:02x?} does not answer {} (expected {:02x})",
                other, definition.code, expected
            ))),
        }
    }

    fn trim(&self, response: &[u8]) -> Vec<u8> {
        response.to_vec()
    }
}
