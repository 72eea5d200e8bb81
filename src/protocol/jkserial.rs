//! JK BMS over RS232/RS485: `NW` frames with a type-length-value body.

use crate::crc;
use crate::prelude::*;
use crate::protocol::decode;
use crate::protocol::definition::{DecodeKind::*, FieldDef, ReadMode, ResponseType, QUERY};
use crate::protocol::CommandTable;

use nom::bytes::complete::take;
use nom::multi::length_data;
use nom::number::complete::be_u8;
use nom::IResult;
use nom_derive::{Nom, Parse};
use num_enum::{IntoPrimitive, TryFromPrimitive};

const HEADER_LEN: usize = 11;
// record number (4), end marker 'h' and the 2+2 byte checksum
const TRAILER_LEN: usize = 4;

// FrameHeader {{{
#[derive(Clone, Debug, PartialEq, Nom)]
#[nom(BigEndian)]
pub struct FrameHeader {
    pub stx: u16,
    pub length: u16,
    pub terminal: u32,
    pub command_word: u8,
    pub frame_source: u8,
    pub transport_type: u8,
} // }}}

// ItemId {{{
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ItemId {
    CellVoltages = 0x79,
    PowerTubeTemperature = 0x80,
    BatteryBoxTemperature = 0x81,
    BatteryTemperature = 0x82,
    BatteryVoltage = 0x83,
    BatteryCurrent = 0x84,
    BatterySoc = 0x85,
    TemperatureSensors = 0x86,
    CycleCount = 0x87,
    TotalCycleCapacity = 0x89,
    BatteryStrings = 0x8a,
    WarningMessages = 0x8b,
    StatusInfo = 0x8c,
    BatteryOvervoltageProtection = 0x8e,
    BatteryUndervoltageProtection = 0x8f,
    CellOvervoltageProtection = 0x90,
    CellOvervoltageRecovery = 0x91,
    CellOvervoltageDelay = 0x92,
    CellUndervoltageProtection = 0x93,
    CellUndervoltageRecovery = 0x94,
    CellUndervoltageDelay = 0x95,
    CellDifferentialProtection = 0x96,
    DischargeProtectionCurrent = 0x97,
    DischargeProtectionDelay = 0x98,
    ChargeProtectionCurrent = 0x99,
    ChargeProtectionDelay = 0x9a,
    EqualizationStartingVoltage = 0x9b,
    EqualizationOpeningDifference = 0x9c,
    ActiveBalanceSwitch = 0x9d,
    PowerTubeTemperatureProtection = 0x9e,
    PowerTubeTemperatureRecovery = 0x9f,
    BatteryBoxTemperatureProtection = 0xa0,
    BatteryBoxTemperatureRecovery = 0xa1,
    BatteryTemperatureDifference = 0xa2,
    ChargeHighTemperatureProtection = 0xa3,
    DischargeHighTemperatureProtection = 0xa4,
    ChargeLowTemperatureProtection = 0xa5,
    ChargeLowTemperatureRecovery = 0xa6,
    DischargeLowTemperatureProtection = 0xa7,
    DischargeLowTemperatureRecovery = 0xa8,
    BatteryStringSetting = 0xa9,
    BatteryCapacitySetting = 0xaa,
    ChargeMosSwitch = 0xab,
    DischargeMosSwitch = 0xac,
    CurrentCalibration = 0xad,
    ProtectionBoardAddress = 0xae,
    BatteryType = 0xaf,
    SleepWaitTime = 0xb0,
    LowCapacityAlarm = 0xb1,
    ModifyParameterPassword = 0xb2,
    DedicatedChargerSwitch = 0xb3,
    DeviceId = 0xb4,
    DateOfManufacture = 0xb5,
    SystemWorkingTime = 0xb6,
    SoftwareVersion = 0xb7,
    StartCalibration = 0xb8,
    ActualBatteryCapacity = 0xb9,
    ManufacturerId = 0xba,
    ProtocolVersion = 0xc0,
}

impl ItemId {
    /// Fixed value size in bytes; `None` for the length-prefixed cell list.
    pub fn value_size(self) -> Option<usize> {
        use ItemId::*;

        let size = match self {
            CellVoltages => return None,
            BatterySoc | TemperatureSensors | ActiveBalanceSwitch | BatteryStringSetting
            | ChargeMosSwitch | DischargeMosSwitch | ProtectionBoardAddress | BatteryType
            | LowCapacityAlarm | DedicatedChargerSwitch | StartCalibration | ProtocolVersion => 1,
            TotalCycleCapacity | BatteryCapacitySetting | DateOfManufacture | SystemWorkingTime
            | ActualBatteryCapacity => 4,
            DeviceId => 8,
            ModifyParameterPassword => 10,
            SoftwareVersion => 15,
            ManufacturerId => 24,
            _ => 2,
        };
        Some(size)
    }
} // }}}

fn item(input: &[u8]) -> IResult<&[u8], (ItemId, &[u8])> {
    let (rest, id) = be_u8(input)?;
    let id = ItemId::try_from(id).map_err(|_| {
        nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Tag))
    })?;
    let (rest, value) = match id.value_size() {
        Some(size) => take(size)(rest)?,
        None => length_data(be_u8)(rest)?,
    };
    Ok((rest, (id, value)))
}

/// Splits a TLV body into items. Stops after the protocol version item or at
/// the first id that is not known.
pub fn items(body: &[u8]) -> Vec<(ItemId, &[u8])> {
    let mut items = Vec::new();
    let mut input = body;

    while !input.is_empty() {
        match item(input) {
            Ok((rest, (id, value))) => {
                items.push((id, value));
                if id == ItemId::ProtocolVersion {
                    break;
                }
                input = rest;
            }
            Err(_) => {
                debug!("stopping TLV walk at {:02x?}", input.first());
                break;
            }
        }
    }

    items
}

const WARNING_FLAGS: &[&str] = &[
    "",
    "",
    "309_B Protection",
    "309_A Protection",
    "Cell Under Voltage Alarm",
    "Cell Over Voltage Alarm",
    "Battery Low Temperature Alarm",
    "Battery Box Over Temperature Alarm",
    "Cell Pressure Difference Alarm",
    "Discharge Over Current Alarm",
    "Charging Over Current Alarm",
    "Battery Over Temperature Alarm",
    "Discharge Under Voltage Alarm",
    "Charging Over Voltage Alarm",
    "MOS Tube Over Temperature Alarm",
    "Low Capacity Alarm",
];

const STATUS_FLAGS: &[&str] = &[
    "", "", "", "", "", "", "", "", "", "", "", "",
    "Battery Down",
    "Equalization Switching State",
    "Discharge MOS On",
    "Charge MOS On",
];

static ALL_DATA_FIELDS: &[FieldDef] = &[
    FieldDef::new("Cell Voltages", JkCells, "mV").keyed("79"),
    FieldDef::new("MOS Temperature", BeU16(1), "°C").keyed("80"),
    FieldDef::new("Battery Box Temperature", BeU16(1), "°C").keyed("81"),
    FieldDef::new("Battery Temperature", BeU16(1), "°C").keyed("82"),
    FieldDef::new("Battery Voltage", BeU16(100), "V")
        .meta("mdi:battery-outline", "voltage", "measurement")
        .keyed("83"),
    FieldDef::new("Battery Current", JkCurrent, "A")
        .meta("mdi:current-dc", "current", "measurement")
        .keyed("84"),
    FieldDef::new("Battery State of Charge", U8, "%")
        .meta("", "battery", "measurement")
        .keyed("85"),
    FieldDef::new("Number of Temperature Sensors", U8, "").keyed("86"),
    FieldDef::new("Battery Cycle Count", BeU16(1), "").keyed("87"),
    FieldDef::new("Total Cycle Count Capacity", BeU32(1), "Ah").keyed("89"),
    FieldDef::new("Battery Strings", BeU16(1), "").keyed("8a"),
    FieldDef::new("Warning Messages", Flags(WARNING_FLAGS), "").keyed("8b"),
    FieldDef::new("Status Info", Flags(STATUS_FLAGS), "").keyed("8c"),
    FieldDef::new("Battery Overvoltage Protection Setting", BeU16(100), "V").keyed("8e"),
    FieldDef::new("Battery Undervoltage Protection Setting", BeU16(100), "V").keyed("8f"),
    FieldDef::new("Cell Overvoltage Protection Setting", BeU16(1), "mV").keyed("90"),
    FieldDef::new("Cell Overvoltage Protection Recovery Setting", BeU16(1), "mV").keyed("91"),
    FieldDef::new("Cell Overvoltage Protection Delay Setting", BeU16(1), "s").keyed("92"),
    FieldDef::new("Cell Undervoltage Protection Setting", BeU16(1), "mV").keyed("93"),
    FieldDef::new("Cell Undervoltage Protection Recovery Setting", BeU16(1), "mV").keyed("94"),
    FieldDef::new("Cell Undervoltage Protection Delay Setting", BeU16(1), "s").keyed("95"),
    FieldDef::new("Cell Voltage Difference Protection Setting", BeU16(1), "mV").keyed("96"),
    FieldDef::new("Discharge Current Protection Setting", BeU16(1), "A").keyed("97"),
    FieldDef::new("Discharge Current Protection Delay Setting", BeU16(1), "s").keyed("98"),
    FieldDef::new("Charge Current Protection Setting", BeU16(1), "A").keyed("99"),
    FieldDef::new("Charge Current Protection Delay Setting", BeU16(1), "s").keyed("9a"),
    FieldDef::new("Equalization Starting Voltage Setting", BeU16(1), "mV").keyed("9b"),
    FieldDef::new("Software ID", Ascii(15), "").keyed("b7"),
    FieldDef::new(
        "Start Calibration",
        Keyed(&[("00", "Close Calibration"), ("01", "Start Calibration")]),
        "",
    )
    .keyed("b8"),
    FieldDef::new("Battery Capacity", BeU32(1), "Ah").keyed("b9"),
    FieldDef::new("Manufacturer Name", AsciiAfter("Input Userda"), "").keyed("ba"),
    FieldDef::new("Protocol Version", U8, "").keyed("c0"),
];

pub static COMMANDS: &[CommandDefinition] = &[
    CommandDefinition {
        code: "all_data",
        description: "Get All BMS Data",
        help: " -- Get All BMS Data",
        response_type: ResponseType::Tlv,
        command_code: Some("00"),
        read_mode: ReadMode::UntilIdle,
        fields: ALL_DATA_FIELDS,
        test_responses: &[
            b"NW\x01\x1b\x00\x00\x00\x00\x03\x00\x01y*\x01\x0f\x90\x02\x0f\x91\x03\x0f\x94\x04\x0f\x8e\x05\x0f\x92\x06\x0f\x91\x07\x0f\x91\x08\x0f\x91\t\x0f\x93\n\x0f\x8e\x0b\x0f\x91\x0c\x0f\x90\r\x0f\x90\x0e\x0f\x8d\x80\x00!\x81\x00\x1c\x82\x00\x1e\x83\x15\xca\x84\x81\xc5\x85d\x86\x02\x87\x00\x19\x89\x00\x00\x16\xda\x8a\x00\x0e\x8b\x00\x00\x8c\x00\x03\x8e\x16\xb2\x8f\x10\xf4\x90\x106\x91\x10\x04\x92\x00\x05\x93\x0c\x1c\x94\x0c\x80\x95\x00\x05\x96\x01,\x97\x00n\x98\x01,\x99\x00U\x9a\x00\x1e\x9b\x0b\xb8\x9c\x002\x9d\x01\x9e\x00Z\x9f\x00F\xa0\x00d\xa1\x00d\xa2\x00\x14\xa3\x00<\xa4\x00<\xa5\x00\x01\xa6\x00\x03\xa7\xff\xec\xa8\xff\xf6\xa9\x0e\xaa\x00\x00\x00\xea\xab\x01\xac\x01\xad\x047\xae\x01\xaf\x01\xb0\x00\n\xb1\x14\xb2123456\x00\x00\x00\x00\xb3\x00\xb4Input Us\xb52306\xb6\x00\x01\x82\xe3\xb711.XW_S11.261__\xb8\x00\xb9\x00\x00\x00\xea\xbaInput UserdaJK_B1A20S15P\xc0\x01\x00\x00\x00\x00h\x00\x00Q\xd6",
            b"NW\x00\xfd\x00\x00\x00\x00\x06\x00\x01y\x0c\x01\r\x06\x02\r\x06\x03\r\x07\x04\r\x07\x80\x00\x10\x81\x00\x0e\x82\x00\r\x83\x055\x84\x00\x00\x85b\x86\x02\x87\x00\x00\x89\x00\x00\x00\x05\x8a\x00\x04\x8b\x00\x03\x8c\x00\x03\x8e\x05\xa0\x8f\x04\x10\x90\x0e\x10\x91\r\xde\x92\x00\x05\x93\n(\x94\nZ\x95\x00\x05\x96\x01,\x97\x00x\x98\x00\x1e\x99\x00<\x9a\x00\x1e\x9b\rH\x9c\x00\x05\x9d\x01\x9e\x00P\x9f\x00A\xa0\x00d\xa1\x00d\xa2\x00\x14\xa3\x002\xa4\x007\xa5\x00\x03\xa6\x00\x08\xa7\xff\xec\xa8\xff\xf6\xa9\x04\xaa\x00\x00\x011\xab\x01\xac\x01\xad\x03~\xae\x01\xaf\x00\xb0\x00\n\xb1\x14\xb25314\x00\x00\x00\x00\x00\x00\xb3\x00\xb4Input Us\xb52312\xb6\x00\x006\xa6\xb711.XW_S11.21H__\xb8\x00\xb9\x00\x00\x011\xbaInput UserdaEddieBlueBMS\xc0\x01\x00\x00\x00\x00h\x00\x00Dr",
        ],
        ..QUERY
    },
    CommandDefinition {
        code: "battery_voltage",
        description: "Get the battery voltage",
        help: " -- Get the battery voltage",
        response_type: ResponseType::Tlv,
        command_code: Some("83"),
        read_mode: ReadMode::UntilIdle,
        fields: &[FieldDef::new("Battery Voltage", BeU16(100), "V").keyed("83")],
        test_responses: &[
            b"NW\x00\x17\x00\x00\x00\x00\x03\x00\x01\x83\x055\xc0\x01\x00\x00\x00\x00h\x00\x00\x02\xa6",
        ],
        ..QUERY
    },
];

#[derive(Clone, Debug)]
pub struct JkSerial {
    table: CommandTable,
}

impl JkSerial {
    pub fn new(table: CommandTable) -> Self {
        Self { table }
    }
}

impl ProtocolCommon for JkSerial {
    fn id(&self) -> ProtocolId {
        ProtocolId::JkSerial
    }

    fn table(&self) -> &CommandTable {
        &self.table
    }

    fn id_command(&self) -> &'static str {
        "all_data"
    }

    fn full_command(&self, _code: &str, definition: &CommandDefinition) -> Vec<u8> {
        let register = definition
            .command_code
            .and_then(|c| u8::from_str_radix(c, 16).ok())
            .unwrap_or(0);
        // 0x06 reads everything, 0x03 a single register
        let command_word = if register == 0 { 0x06 } else { 0x03 };

        let mut frame = vec![
            0x4e, 0x57, // stx
            0x00, 0x13, // length
            0x00, 0x00, 0x00, 0x00, // terminal
            command_word,
            0x03, // frame source: computer
            0x00, // transport type: read
            register,
            0x00, 0x00, 0x00, 0x00, // record number
            0x68, // end
            0x00, 0x00,
        ];
        let checksum = crc::jk232(&frame[..17]);
        frame.extend_from_slice(&checksum);
        frame
    }

    fn check_valid(
        &self,
        response: &[u8],
        _definition: &CommandDefinition,
    ) -> Result<(), DecodeError> {
        if response.is_empty() {
            return Err(DecodeError::Empty);
        }
        if !response.starts_with(b"NW") {
            return Err(DecodeError::MissingStart("NW".to_string()));
        }
        if response.len() < HEADER_LEN + TRAILER_LEN {
            return Err(DecodeError::TooShort);
        }

        let (_, header) = FrameHeader::parse(response).map_err(|_| DecodeError::TooShort)?;
        if usize::from(header.length) + 2 != response.len() {
            return Err(DecodeError::InvalidValue(format!(
                "frame length {} does not match {} bytes received",
                header.length,
                response.len()
            )));
        }

        let (data, checksum) = response.split_at(response.len() - TRAILER_LEN);
        let calculated = crc::jk232(data);
        if checksum[2..] != calculated {
            return Err(DecodeError::CrcMismatch {
                got: hex::encode(&checksum[2..]),
                calculated: hex::encode(calculated),
            });
        }

        Ok(())
    }

    fn trim(&self, response: &[u8]) -> Vec<u8> {
        response.get(HEADER_LEN..).unwrap_or_default().to_vec()
    }

    fn decode_payload(
        &self,
        definition: &CommandDefinition,
        payload: &[u8],
        result: &mut CommandResult,
    ) {
        for (id, value) in items(payload) {
            let key = format!("{:02x}", u8::from(id));
            match definition.fields.iter().find(|f| f.key == Some(key.as_str())) {
                Some(field) => {
                    decode::decode_binary(field.label, &field.kind, field.unit, field.meta, value, result)
                }
                None => trace!("ignoring {:?}", id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol() -> Result<Protocol> {
        Protocol::new(ProtocolId::JkSerial, None)
    }

    fn value<'a>(result: &'a CommandResult, slug: &str) -> Option<&'a Value> {
        result.get(slug).map(|r| &r.value)
    }

    #[test]
    fn frames() -> Result<()> {
        let protocol = protocol()?;
        assert_eq!(
            protocol.get_full_command("all_data")?,
            [
                0x4e, 0x57, 0x00, 0x13, 0x00, 0x00, 0x00, 0x00, 0x06, 0x03, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x68, 0x00, 0x00, 0x01, 0x29
            ]
        );

        let frame = protocol.get_full_command("battery_voltage")?;
        assert_eq!(frame.len(), 21);
        assert_eq!(frame[8], 0x03);
        assert_eq!(frame[11], 0x83);
        assert_eq!(frame[19..], [0x01, 0xa9]);
        Ok(())
    }

    #[test]
    fn header() -> Result<()> {
        let (rest, header) = FrameHeader::parse(COMMANDS[0].test_responses[1])
            .map_err(|e| anyhow!("{:?}", e))?;
        assert_eq!(header.stx, 0x4e57);
        assert_eq!(header.length, 0xfd);
        assert_eq!(header.command_word, 0x06);
        assert_eq!(rest[0], 0x79);
        Ok(())
    }

    #[test]
    fn all_data() -> Result<()> {
        let protocol = protocol()?;
        let command = protocol.resolve("all_data")?;
        let result = protocol.decode(&command, command.definition.test_responses[1]);

        assert!(result.is_valid, "{:?}", result.error_messages);
        assert!(!result.error, "{:?}", result.error_messages);
        assert_eq!(value(&result, "cell_count"), Some(&Value::Int(4)));
        assert_eq!(value(&result, "cell_1_voltage"), Some(&Value::Int(3334)));
        assert_eq!(value(&result, "cell_4_voltage"), Some(&Value::Int(3335)));
        assert_eq!(value(&result, "mos_temperature"), Some(&Value::Int(16)));
        assert_eq!(value(&result, "battery_voltage"), Some(&Value::Float(13.33)));
        assert_eq!(value(&result, "battery_state_of_charge"), Some(&Value::Int(98)));
        assert_eq!(value(&result, "battery_strings"), Some(&Value::Int(4)));
        assert_eq!(value(&result, "total_cycle_count_capacity"), Some(&Value::Int(5)));
        assert_eq!(value(&result, "battery_capacity"), Some(&Value::Int(305)));
        assert_eq!(value(&result, "low_capacity_alarm"), Some(&Value::Int(1)));
        assert_eq!(value(&result, "charge_mos_on"), Some(&Value::Int(1)));
        assert_eq!(value(&result, "battery_down"), Some(&Value::Int(0)));
        assert_eq!(value(&result, "software_id"), Some(&Value::from("11.XW_S11.21H__")));
        assert_eq!(value(&result, "manufacturer_name"), Some(&Value::from("EddieBlueBMS")));
        assert_eq!(value(&result, "protocol_version"), Some(&Value::Int(1)));
        Ok(())
    }

    #[test]
    fn charging_pack() -> Result<()> {
        let protocol = protocol()?;
        let command = protocol.resolve("all_data")?;
        let result = protocol.decode(&command, command.definition.test_responses[0]);

        assert!(!result.error, "{:?}", result.error_messages);
        assert_eq!(value(&result, "cell_count"), Some(&Value::Int(14)));
        assert_eq!(value(&result, "battery_voltage"), Some(&Value::Float(55.78)));
        assert_eq!(value(&result, "battery_current_direction"), Some(&Value::from("charge")));
        assert_eq!(value(&result, "battery_current"), Some(&Value::Float(4.53)));
        assert_eq!(value(&result, "manufacturer_name"), Some(&Value::from("JK_B1A20S15P")));
        Ok(())
    }

    #[test]
    fn single_register() -> Result<()> {
        let protocol = protocol()?;
        let command = protocol.resolve("battery_voltage")?;
        let result = protocol.decode(&command, command.definition.test_responses[0]);
        assert_eq!(result.readings.len(), 1);
        assert_eq!(value(&result, "battery_voltage"), Some(&Value::Float(13.33)));
        Ok(())
    }

    #[test]
    fn tampered_frame() -> Result<()> {
        let protocol = protocol()?;
        let command = protocol.resolve("battery_voltage")?;

        let mut response = command.definition.test_responses[0].to_vec();
        response[13] = 0x36;
        let result = protocol.decode(&command, &response);
        assert!(!result.is_valid);
        assert_eq!(result.error_messages, vec!["CRC mismatch, got 02a6 calculated 02a7"]);

        let result = protocol.decode(&command, b"XX\x00\x17");
        assert_eq!(result.error_messages, vec!["response does not start with NW"]);
        Ok(())
    }

    #[test]
    fn unknown_item_stops_walk() {
        let body = [0x83, 0x05, 0x35, 0x88, 0x00, 0x85, 0x62];
        let items = items(&body);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].0, ItemId::BatteryVoltage);
    }
}
