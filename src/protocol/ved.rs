//! Victron VE.Direct. The text protocol is broadcast by the device and only
//! listened to; HEX `GET` frames read single registers.

use crate::crc;
use crate::prelude::*;
use crate::protocol::definition::{DecodeKind::*, FieldDef, ReadMode, ResponseType, QUERY};
use crate::protocol::CommandTable;

pub static COMMANDS: &[CommandDefinition] = &[
    CommandDefinition {
        code: "vedtext",
        description: "VE Direct Text",
        help: " -- the output of the VE Direct text protocol",
        response_type: ResponseType::Keyed,
        read_mode: ReadMode::Lines(30),
        fields: &[
            FieldDef::new("Main or channel 1 battery voltage", Div(1000), "V").keyed("V"),
            FieldDef::new("Channel 2 battery voltage", Div(1000), "V").keyed("V2"),
            FieldDef::new("Channel 3 battery voltage", Div(1000), "V").keyed("V3"),
            FieldDef::new("Auxiliary starter voltage", Div(1000), "V").keyed("VS"),
            FieldDef::new("Mid-point voltage of the battery bank", Div(1000), "V").keyed("VM"),
            FieldDef::new("Mid-point deviation of the battery bank", Float, "‰").keyed("DM"),
            FieldDef::new("Panel voltage", Div(1000), "V").keyed("VPV"),
            FieldDef::new("Panel power", Float, "W").keyed("PPV"),
            FieldDef::new("Main or channel 1 battery current", Div(1000), "A").keyed("I"),
            FieldDef::new("Channel 2 battery current", Div(1000), "A").keyed("I2"),
            FieldDef::new("Channel 3 battery current", Div(1000), "A").keyed("I3"),
            FieldDef::new("Load current", Div(1000), "A").keyed("IL"),
            FieldDef::new("Load output state ON/OFF", Str, "").keyed("LOAD"),
            FieldDef::new("Battery temperature", Float, "°C").keyed("T"),
            FieldDef::new("Instantaneous power", Float, "W").keyed("P"),
            FieldDef::new("Consumed Amp Hours", Div(1000), "Ah").keyed("CE"),
            FieldDef::new("State-of-charge", Div(10), "%").keyed("SOC"),
            FieldDef::new("Time-to-go", Float, "Minutes").keyed("TTG"),
            FieldDef::new("Alarm condition active", Str, "").keyed("Alarm"),
            FieldDef::new("Relay state", Str, "").keyed("Relay"),
            FieldDef::new("Alarm reason", Str, "").keyed("AR"),
            FieldDef::new("Off reason", Str, "").keyed("OR"),
            FieldDef::new("Depth of the deepest discharge", Div(1000), "Ah").keyed("H1"),
            FieldDef::new("Depth of the last discharge", Div(1000), "Ah").keyed("H2"),
            FieldDef::new("Depth of the average discharge", Div(1000), "Ah").keyed("H3"),
            FieldDef::new("Number of charge cycles", Str, "").keyed("H4"),
            FieldDef::new("Number of full discharges", Str, "").keyed("H5"),
            FieldDef::new("Cumulative Amp Hours drawn", Div(1000), "Ah").keyed("H6"),
            FieldDef::new("Minimum main battery voltage", Div(1000), "V").keyed("H7"),
            FieldDef::new("Maximum main battery voltage", Div(1000), "V").keyed("H8"),
            FieldDef::new("Number of seconds since last full charge", Float, "Seconds").keyed("H9"),
            FieldDef::new("Number of automatic synchronizations", Str, "").keyed("H10"),
            FieldDef::new("Number of low main voltage alarms", Str, "").keyed("H11"),
            FieldDef::new("Number of high main voltage alarms", Str, "").keyed("H12"),
            FieldDef::new("Number of low auxiliary voltage alarms", Str, "").keyed("H13"),
            FieldDef::new("Number of high auxiliary voltage alarms", Str, "").keyed("H14"),
            FieldDef::new("Minimum auxiliary battery voltage", Div(1000), "V").keyed("H15"),
            FieldDef::new("Maximum auxiliary battery voltage", Div(1000), "V").keyed("H16"),
            FieldDef::new("Amount of discharged energy", Div(100), "kWh").keyed("H17"),
            FieldDef::new("Amount of charged energy", Div(100), "kWh").keyed("H18"),
            FieldDef::new("Yield total - user resettable counter", Div(100), "kWh").keyed("H19"),
            FieldDef::new("Yield today", Div(100), "kWh").keyed("H20"),
            FieldDef::new("Maximum power today", Float, "W").keyed("H21"),
            FieldDef::new("Yield yesterday", Div(100), "kWh").keyed("H22"),
            FieldDef::new("Maximum power yesterday", Float, "W").keyed("H23"),
            FieldDef::new("Error code", Str, "").keyed("ERR"),
            FieldDef::new("State of operation", Str, "").keyed("CS"),
            FieldDef::new("Model description", Str, "").keyed("BMV"),
            FieldDef::new("Firmware version 16 bit", Str, "").keyed("FW"),
            FieldDef::new("Firmware version 24 bit", Str, "").keyed("FWE"),
            FieldDef::new("Product ID", Str, "").keyed("PID"),
            FieldDef::new("Serial number", Str, "").keyed("SER#"),
            FieldDef::new("Day sequence number 0..364", Str, "").keyed("HSDS"),
            FieldDef::new("Device mode", Str, "").keyed("MODE"),
            FieldDef::new("AC output voltage", Mul(100), "V").keyed("AC_OUT_V"),
            FieldDef::new("AC output current", Float, "0.1 A").keyed("AC_OUT_I"),
            FieldDef::new("AC output apparent power", Float, "VA").keyed("AC_OUT_S"),
            FieldDef::new("Warning reason", Str, "").keyed("WARN"),
            FieldDef::new("Tracker operation mode", Str, "").keyed("MPPT"),
            FieldDef::new("Checksum", Exclude, "").keyed("Checksum"),
        ],
        test_responses: &[
            b"H1\t-32914\r\nH2\t0\r\nH3\t0\r\nH4\t0\r\nH5\t0\r\nH6\t-35652\r\nH7\t12041\r\nH8\t14282\r\nH9\t0\r\nH10\t0\r\nH11\t0\r\nH12\t0\r\nH15\t-22\r\nH16\t0\r\nH17\t46\r\nH18\t48\r\nChecksum\t\x1a\r\nPID\t0xA389\r\nV\t12865\r\nVS\t-14\r\nI\t0\r\nP\t0\r\nCE\t0\r\nSOC\t1000\r\nTTG\t-1\r\nAlarm\tOFF\r\nAR\t0\r\nBMV\tSmartShunt 500A/50mV\r\nFW\t0405\r\nChecksum\tL\r\n",
            b"\x00L\r\nH1\t-32914\r\nH2\t0\r\nH3\t0\r\nH4\t0\r\nH5\t0\r\nH6\t-35652\r\nH7\t12041\r\nH8\t14282\r\nH9\t0\r\nH10\t0\r\nH11\t0\r\nH12\t0\r\nH15\t-22\r\nH16\t0\r\nH17\t46\r\nH18\t48\r\nChecksum\t\x1a\r\nPID\t0xA389\r\nV\t12868\r\nVS\t-12\r\nI\t0\r\nP\t0\r\nCE\t0\r\nSOC\t1000\r\nTTG\t-1\r\nAlarm\tOFF\r\nAR\t0\r\nBMV\tSmartShunt 500A/50mV\r\nFW\t0405\r\nChecksum\tK\r",
            b"\nH1\t-32914\r\nH2\t0\r\nH3\t0\r\nH4\t0\r\nH5\t0\r\nH6\t-35652\r\nH7\t12041\r\nH8\t14282\r\nH9\t0\r\nH10\t0\r\nH11\t0\r\nH12\t0\r\nH15\t-22\r\nH16\t0\r\nH17\t46\r\nH18\t48\r\nChecksum\t\x1a\r\nPID\t0xA389\r\nV\t12868\r\nVS\t-13\r\nI\t0\r\nP\t0\r\nCE\t0\r\nSOC\t1000\r\nTTG\t-1\r\nAlarm\tOFF\r\nAR\t0\r\nBMV\tSmartShunt 500A/50mV\r\nFW\t0405\r\nChecksum\tJ\r",
        ],
        ..QUERY
    },
    CommandDefinition {
        code: "batteryCapacity",
        description: "battery capacity",
        help: " -- display the battery capacity setting value",
        response_type: ResponseType::Positional,
        read_mode: ReadMode::Lines(1),
        command_code: Some("0010"),
        fields: &[
            FieldDef::new("Command type", Discard(1), ""),
            FieldDef::new("Command", Discard(2), ""),
            FieldDef::new(
                "Command response flag",
                Keyed(&[
                    ("00", "OK"),
                    ("01", "Unknown ID"),
                    ("02", "Not supported"),
                    ("04", "Parameter Error"),
                ]),
                "",
            ),
            FieldDef::new("Battery Capacity", LeU16(1), "Ah"),
            FieldDef::new("checksum", Discard(1), ""),
        ],
        test_responses: &[b":70010007800C6\n", b"\x00\x1a:70010007800C6\n"],
        ..QUERY
    },
];

#[derive(Clone, Debug)]
pub struct Ved {
    table: CommandTable,
}

impl Ved {
    pub fn new(table: CommandTable) -> Self {
        Self { table }
    }
}

/// The hex digits after the `:` marker, padded to whole bytes.
fn hex_body(response: &[u8]) -> Option<Result<Vec<u8>, hex::FromHexError>> {
    let start = response.iter().position(|b| *b == b':')?;
    let digits: Vec<u8> = std::iter::once(b'0')
        .chain(
            response[start + 1..]
                .iter()
                .copied()
                .take_while(|b| !matches!(b, b'\r' | b'\n')),
        )
        .collect();
    Some(hex::decode(digits))
}

impl ProtocolCommon for Ved {
    fn id(&self) -> ProtocolId {
        ProtocolId::Ved
    }

    fn table(&self) -> &CommandTable {
        &self.table
    }

    fn id_command(&self) -> &'static str {
        "vedtext"
    }

    // `:7` GET, register id little endian, flags, checksum
    fn full_command(&self, _code: &str, definition: &CommandDefinition) -> Vec<u8> {
        let Some(register) = definition.command_code else {
            return Vec::new();
        };

        let command = format!("7{}00", register);
        match hex::decode(format!("0{}", command)) {
            Ok(bytes) => format!(":{}{:02X}\n", command, crc::ved_hex(&bytes)).into_bytes(),
            Err(err) => {
                warn!("invalid register {} for {}: {}", register, definition.code, err);
                Vec::new()
            }
        }
    }

    fn check_valid(
        &self,
        response: &[u8],
        definition: &CommandDefinition,
    ) -> Result<(), DecodeError> {
        if response.is_empty() {
            return Err(DecodeError::Empty);
        }

        match hex_body(response) {
            None if definition.response_type == ResponseType::Positional => {
                Err(DecodeError::MissingStart(":".to_string()))
            }
            None => Ok(()),
            Some(Err(err)) => Err(DecodeError::InvalidValue(format!(
                "VED HEX response is not valid hex: {}",
                err
            ))),
            Some(Ok(bytes)) => {
                let Some((checksum, data)) = bytes.split_last() else {
                    return Err(DecodeError::TooShort);
                };
                let calculated = crc::ved_hex(data);
                if calculated != *checksum {
                    return Err(DecodeError::CrcMismatch {
                        got: format!("{:02x}", checksum),
                        calculated: format!("{:02x}", calculated),
                    });
                }
                Ok(())
            }
        }
    }

    fn trim(&self, response: &[u8]) -> Vec<u8> {
        match hex_body(response) {
            Some(Ok(bytes)) => bytes,
            Some(Err(_)) => Vec::new(),
            None => response.to_vec(),
        }
    }

    fn split(&self, payload: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(payload)
            .split(['\r', '\n'])
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol() -> Result<Protocol> {
        Protocol::new(ProtocolId::Ved, None)
    }

    #[test]
    fn text_is_listen_only() -> Result<()> {
        let protocol = protocol()?;
        let command = protocol.resolve("vedtext")?;
        assert!(command.is_listen_only());
        assert_eq!(command.definition.read_mode, ReadMode::Lines(30));
        Ok(())
    }

    #[test]
    fn hex_get_frame() -> Result<()> {
        let protocol = protocol()?;
        assert_eq!(protocol.get_full_command("batteryCapacity")?, b":70010003E\n");
        Ok(())
    }

    #[test]
    fn text_block() -> Result<()> {
        let protocol = protocol()?;
        let command = protocol.resolve("vedtext")?;

        for response in command.definition.test_responses {
            let result = protocol.decode(&command, response);
            assert!(result.is_valid);
            assert!(!result.error, "{:?}", result.error_messages);
            assert_eq!(
                result.get("state-of-charge").map(|r| &r.value),
                Some(&Value::Float(100.0))
            );
            assert_eq!(
                result.get("depth_of_the_deepest_discharge").map(|r| &r.value),
                Some(&Value::Float(-32.914))
            );
            assert_eq!(
                result.get("model_description").map(|r| &r.value),
                Some(&Value::from("SmartShunt 500A/50mV"))
            );
            assert!(result.get("checksum").is_none());
        }

        let result = protocol.decode(&command, command.definition.test_responses[0]);
        assert_eq!(
            result.get("main_or_channel_1_battery_voltage").map(|r| &r.value),
            Some(&Value::Float(12.865))
        );
        assert_eq!(result.get("product_id").map(|r| &r.value), Some(&Value::from("0xA389")));
        Ok(())
    }

    #[test]
    fn hex_reply() -> Result<()> {
        let protocol = protocol()?;
        let command = protocol.resolve("batteryCapacity")?;

        for response in command.definition.test_responses {
            let result = protocol.decode(&command, response);
            assert!(!result.error, "{:?}", result.error_messages);
            assert_eq!(result.readings.len(), 2);
            assert_eq!(
                result.get("command_response_flag").map(|r| &r.value),
                Some(&Value::from("OK"))
            );
            assert_eq!(result.get("battery_capacity").map(|r| &r.value), Some(&Value::Int(120)));
        }
        Ok(())
    }

    #[test]
    fn hex_reply_checksum() -> Result<()> {
        let protocol = protocol()?;
        let command = protocol.resolve("batteryCapacity")?;

        let result = protocol.decode(&command, b":70010007800C7\n");
        assert!(!result.is_valid);
        assert_eq!(result.error_messages, vec!["CRC mismatch, got c7 calculated c6"]);

        let result = protocol.decode(&command, b"V\t12865\r\n");
        assert_eq!(result.error_messages, vec!["response does not start with :"]);
        Ok(())
    }
}
