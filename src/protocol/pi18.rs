//! PI18: `^P`/`^S` prefixed frames with a length field, comma separated
//! responses starting `^D`.

use crate::crc;
use crate::prelude::*;
use crate::protocol::definition::{DecodeKind::*, FieldDef, ResponseType, QUERY, SETTER};
use crate::protocol::pi30::check_crc_framed;
use crate::protocol::CommandTable;

const DISABLED_ENABLED: &[&str] = &["Disabled", "Enabled"];
const CHARGER_STATUS: &[&str] = &["abnormal", "normal but not charged", "charging"];
const POWER_DIRECTION: &[&str] = &["donothing", "charge", "discharge"];
const ACK_RESPONSES: &[&[u8]] = &[b"^1\x0b\xc2\r", b"^0\x1b\xe3\r"];

const FAULT_CODES: &[(&str, &str)] = &[
    ("00", "No fault"),
    ("01", "Fan is locked"),
    ("02", "Over temperature"),
    ("03", "Battery voltage is too high"),
    ("04", "Battery voltage is too low"),
    ("05", "Output short circuited or Over temperature"),
    ("06", "Output voltage is too high"),
    ("07", "Over load time out"),
    ("08", "Bus voltage is too high"),
    ("09", "Bus soft start failed"),
    ("11", "Main relay failed"),
    ("51", "Over current inverter"),
    ("52", "Bus soft start failed"),
    ("53", "Inverter soft start failed"),
    ("54", "Self-test failed"),
    ("55", "Over DC voltage on output of inverter"),
    ("56", "Battery connection is open"),
    ("57", "Current sensor failed"),
    ("58", "Output voltage is too low"),
    ("60", "Inverter negative power"),
    ("71", "Parallel version different"),
    ("72", "Output circuit failed"),
    ("80", "CAN communication failed"),
    ("81", "Parallel host line lost"),
    ("82", "Parallel synchronized signal lost"),
    ("83", "Parallel battery voltage detect different"),
    ("84", "Parallel Line voltage or frequency detect different"),
    ("85", "Parallel Line input current unbalanced"),
    ("86", "Parallel output setting different"),
];

pub static QUERIES: &[CommandDefinition] = &[
    CommandDefinition {
        code: "PI",
        description: "Device Protocol Version inquiry",
        help: " -- queries the device protocol version",
        fields: &[FieldDef::new("Protocol Version", Int, "")],
        test_responses: &[b"^D00518;\x03\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "ID",
        description: "Device Serial Number inquiry",
        help: " -- queries the device serial number",
        response_type: ResponseType::Bytes,
        fields: &[FieldDef::new("Serial Number", Str, "")],
        test_responses: &[b"^D0251412345678901234000000\x0bK\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "VFW",
        description: "Device CPU version inquiry",
        help: " -- queries the CPU version",
        fields: &[
            FieldDef::new("Main CPU Version", Int, ""),
            FieldDef::new("Slave 1 CPU Version", Int, ""),
            FieldDef::new("Slave 2 CPU Version", Int, ""),
        ],
        test_responses: &[b"^D02000000,00010,00002\xca\x84\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "PIRI",
        description: "Device rated information",
        help: " -- queries rated information",
        fields: &[
            FieldDef::new("AC input rated voltage", Div(10), "V"),
            FieldDef::new("AC input rated current", Div(10), "A"),
            FieldDef::new("AC output rated voltage", Div(10), "V"),
            FieldDef::new("AC output rated frequency", Div(10), "Hz"),
            FieldDef::new("AC output rated current", Div(10), "A"),
            FieldDef::new("AC output rating apparent power", Int, "VA"),
            FieldDef::new("AC output rating active power", Int, "W"),
            FieldDef::new("Battery rated voltage", Div(10), "V"),
            FieldDef::new("Battery re-charge voltage", Div(10), "V"),
            FieldDef::new("Battery re-discharge voltage", Div(10), "V"),
            FieldDef::new("Battery under voltage", Div(10), "V"),
            FieldDef::new("Battery bulk voltage", Div(10), "V"),
            FieldDef::new("Battery float voltage", Div(10), "V"),
            FieldDef::new("Battery type", OptionList(&["AGM", "Flooded", "User"]), ""),
            FieldDef::new("Max AC charging current", Int, "A"),
            FieldDef::new("Max charging current", Int, "A"),
            FieldDef::new("Input voltage range", OptionList(&["Appliance", "UPS"]), ""),
            FieldDef::new(
                "Output source priority",
                OptionList(&["Solar-Utility-Battery", "Solar-Battery-Utility"]),
                "",
            ),
            FieldDef::new(
                "Charger source priority",
                OptionList(&["Solar First", "Solar and Utility", "Only Solar"]),
                "",
            ),
            FieldDef::new("Parallel max num", Int, ""),
            FieldDef::new("Machine type", OptionList(&["Off-Grid", "Grid-Tie"]), ""),
            FieldDef::new("Topology", OptionList(&["transformerless", "transformer"]), ""),
            FieldDef::new(
                "Output model setting",
                OptionList(&[
                    "Single module",
                    "parallel output",
                    "Phase 1 of three phase output",
                    "Phase 2 of three phase output",
                    "Phase 3 of three phase output",
                ]),
                "",
            ),
            FieldDef::new(
                "Solar power priority",
                OptionList(&["Battery-Load-Utiliy + AC Charger", "Load-Battery-Utiliy"]),
                "",
            ),
            FieldDef::new("MPPT strings", Int, ""),
        ],
        test_responses: &[
            b"^D0882300,217,2300,500,217,5000,5000,480,500,540,450,552,545,2,10,060,1,1,1,9,1,0,0,0,1,00\xd5r\r",
            b"^D0882300,217,2300,500,217,5000,5000,480,480,530,440,570,570,2,10,070,1,1,1,9,0,0,0,0,1,00\xe1k\r",
        ],
        ..QUERY
    },
    CommandDefinition {
        code: "GS",
        description: "General status query",
        help: " -- Query general status information",
        fields: &[
            FieldDef::new("Grid voltage", Div(10), "V").meta("mdi:transmission-tower-export", "voltage", ""),
            FieldDef::new("Grid frequency", Div(10), "Hz").meta("mdi:current-ac", "frequency", ""),
            FieldDef::new("AC output voltage", Div(10), "V").meta("mdi:power-plug", "voltage", ""),
            FieldDef::new("AC output frequency", Div(10), "Hz").meta("mdi:current-ac", "frequency", ""),
            FieldDef::new("AC output apparent power", Int, "VA").meta("mdi:power-plug", "apparent_power", ""),
            FieldDef::new("AC output active power", Int, "W").meta("mdi:power-plug", "power", "measurement"),
            FieldDef::new("Output load percent", Int, "%").meta("mdi:brightness-percent", "", ""),
            FieldDef::new("Battery voltage", Div(10), "V").meta("mdi:battery-outline", "voltage", ""),
            FieldDef::new("Battery voltage from SCC", Div(10), "V"),
            FieldDef::new("Battery voltage from SCC2", Div(10), "V"),
            FieldDef::new("Battery discharge current", Int, "A").meta("mdi:battery-negative", "current", ""),
            FieldDef::new("Battery charging current", Int, "A").meta("mdi:current-dc", "current", ""),
            FieldDef::new("Battery capacity", Int, "%").meta("", "battery", ""),
            FieldDef::new("Inverter heat sink temperature", Int, "°C").meta("mdi:details", "temperature", ""),
            FieldDef::new("MPPT1 charger temperature", Int, "°C"),
            FieldDef::new("MPPT2 charger temperature", Int, "°C"),
            FieldDef::new("PV1 Input power", Int, "W").meta("mdi:solar-power", "power", "measurement"),
            FieldDef::new("PV2 Input power", Int, "W").meta("mdi:solar-power", "power", "measurement"),
            FieldDef::new("PV1 Input voltage", Div(10), "V").meta("mdi:solar-power", "voltage", ""),
            FieldDef::new("PV2 Input voltage", Div(10), "V").meta("mdi:solar-power", "voltage", ""),
            FieldDef::new(
                "Setting value configuration state",
                OptionList(&["Nothing changed", "Something changed"]),
                "",
            ),
            FieldDef::new("MPPT1 charger status", OptionList(CHARGER_STATUS), ""),
            FieldDef::new("MPPT2 charger status", OptionList(CHARGER_STATUS), ""),
            FieldDef::new("Load connection", OptionList(&["disconnect", "connect"]), ""),
            FieldDef::new("Battery power direction", OptionList(POWER_DIRECTION), ""),
            FieldDef::new(
                "DC/AC power direction",
                OptionList(&["donothing", "AC-DC", "DC-AC"]),
                "",
            ),
            FieldDef::new("Line power direction", OptionList(&["donothing", "input", "output"]), ""),
            FieldDef::new("Local parallel ID", Int, ""),
        ],
        test_responses: &[
            b"^D1062232,499,2232,499,0971,0710,019,008,000,000,000,000,000,044,000,000,0520,0000,1941,0000,0,2,0,1,0,2,1,0\xe9\xa3\r",
            b"^0\x1b\xe3\r",
        ],
        ..QUERY
    },
    CommandDefinition {
        code: "MOD",
        description: "Working mode query",
        help: " -- Query the working mode",
        fields: &[FieldDef::new(
            "Working mode",
            OptionList(&[
                "Power on mode",
                "Standby mode",
                "Bypass mode",
                "Battery mode",
                "Fault mode",
                "Hybrid mode(Line mode, Grid mode)",
            ]),
            "",
        )],
        test_responses: &[b"^D00505\xd9\x9f\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "FWS",
        description: "Fault and warning status",
        help: " -- Query fault and warning status",
        fields: &[
            FieldDef::new("Fault code", Keyed(FAULT_CODES), ""),
            FieldDef::new("Line fail", Int, ""),
            FieldDef::new("Output circuit short", Int, ""),
            FieldDef::new("Inverter over temperature", Int, ""),
            FieldDef::new("Fan lock", Int, ""),
            FieldDef::new("Battery voltage high", Int, ""),
            FieldDef::new("Battery low", Int, ""),
            FieldDef::new("Battery under", Int, ""),
            FieldDef::new("Over load", Int, ""),
            FieldDef::new("Eeprom fail", Int, ""),
            FieldDef::new("Power limit", Int, ""),
            FieldDef::new("PV1 voltage high", Int, ""),
            FieldDef::new("PV2 voltage high", Int, ""),
            FieldDef::new("MPPT1 overload warning", Int, ""),
            FieldDef::new("MPPT2 overload warning", Int, ""),
            FieldDef::new("Battery too low to charge for SCC1", Int, ""),
            FieldDef::new("Battery too low to charge for SCC2", Int, ""),
        ],
        test_responses: &[
            b"^D03700,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0\x95\xf0\r",
            b"^D03701,1,0,0,0,0,0,0,1,0,0,0,0,0,0,0,0\x86\xe7\r",
        ],
        ..QUERY
    },
    CommandDefinition {
        code: "FLAG",
        description: "Query enable/disable flag status",
        help: " -- queries enable/disable flag status from the Inverter",
        fields: &[
            FieldDef::new("Buzzer beep", OptionList(DISABLED_ENABLED), ""),
            FieldDef::new("Overload bypass function", OptionList(DISABLED_ENABLED), ""),
            FieldDef::new("display back to default page", OptionList(DISABLED_ENABLED), ""),
            FieldDef::new("Overload restart", OptionList(DISABLED_ENABLED), ""),
            FieldDef::new("Over temperature restart", OptionList(DISABLED_ENABLED), ""),
            FieldDef::new("Backlight on", OptionList(DISABLED_ENABLED), ""),
            FieldDef::new("Alarm primary source interrupt", OptionList(DISABLED_ENABLED), ""),
            FieldDef::new("Fault code record", OptionList(DISABLED_ENABLED), ""),
            FieldDef::new("Reserved", Int, ""),
        ],
        test_responses: &[b"^D0200,0,1,1,0,1,0,1,0\x90j\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "T",
        description: "Query current time",
        help: " -- queries the current date and time (YYYYMMDDHHMMSS)",
        response_type: ResponseType::Bytes,
        fields: &[FieldDef::new("Device time", Str, "")],
        test_responses: &[b"^D01720231019123045>z\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "ET",
        description: "Total Generated Energy query",
        help: " -- Query total generated energy",
        fields: &[FieldDef::new("Total generated energy", Int, "Wh")],
        test_responses: &[b"^D01100003456\x04\xef\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "EY",
        description: "Query generated energy of year",
        help: " -- example: EY2023 queries generated energy for the year YYYY from the Inverter",
        regex: Some(r"EY(\d\d\d\d)$"),
        fields: &[FieldDef::new("Generated energy of year", Int, "Wh")],
        test_responses: &[b"^D01100000512$C\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "EM",
        description: "Query generated energy of month",
        help: " -- example: EM202310 queries generated energy for the month YYYYMM",
        regex: Some(r"EM(\d\d\d\d\d\d)$"),
        fields: &[FieldDef::new("Generated energy of month", Int, "Wh")],
        test_responses: &[b"^D01100001280M\xbd\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "ED",
        description: "Query generated energy of day",
        help: " -- example: ED20231019 queries generated energy for the day YYYYMMDD",
        regex: Some(r"ED(\d\d\d\d\d\d\d\d)$"),
        fields: &[FieldDef::new("Generated energy of day", Int, "Wh")],
        test_responses: &[b"^D011000000420F\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "MCHGCR",
        description: "Query Max. charging current selectable value",
        help: " -- Query Max. charging current selectable value",
        fields: &[
            FieldDef::new("Max. charging current value 1", Int, "A"),
            FieldDef::new("Max. charging current value 2", Int, "A"),
            FieldDef::new("Max. charging current value 3", Int, "A"),
            FieldDef::new("Max. charging current value 4", Int, "A"),
            FieldDef::new("Max. charging current value 5", Int, "A"),
            FieldDef::new("Max. charging current value 6", Int, "A"),
            FieldDef::new("Max. charging current value 7", Int, "A"),
            FieldDef::new("Max. charging current value 8", Int, "A"),
        ],
        test_responses: &[b"^D034010,020,030,040,050,060,070,080\x161\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "MUCHGCR",
        description: "Query Max. AC charging current selectable value",
        help: " -- Query Max. AC charging current selectable value",
        fields: &[
            FieldDef::new("Max. AC charging current value 1", Int, "A"),
            FieldDef::new("Max. AC charging current value 2", Int, "A"),
            FieldDef::new("Max. AC charging current value 3", Int, "A"),
            FieldDef::new("Max. AC charging current value 4", Int, "A"),
            FieldDef::new("Max. AC charging current value 5", Int, "A"),
            FieldDef::new("Max. AC charging current value 6", Int, "A"),
            FieldDef::new("Max. AC charging current value 7", Int, "A"),
            FieldDef::new("Max. AC charging current value 8", Int, "A"),
            FieldDef::new("Max. AC charging current value 9", Int, "A"),
        ],
        test_responses: &[b"^D038002,010,020,030,040,050,060,070,080\xd01\r"],
        ..QUERY
    },
];

pub static SETTERS: &[CommandDefinition] = &[
    CommandDefinition {
        code: "PE",
        description: "Enable a flag",
        help: " -- example: PEA (enable buzzer) [A: buzzer, B: overload bypass, C: display escape, D: overload restart, E: over temperature restart, F: backlight, G: alarm on primary source interrupt, H: fault code record]",
        regex: Some("PE([A-H])$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PD",
        description: "Disable a flag",
        help: " -- example: PDA (disable buzzer) [A-H as for PE]",
        regex: Some("PD([A-H])$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PF",
        description: "Set control parameters to default values",
        help: " -- example: PF (reset control parameters to defaults)",
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "POP",
        description: "Set output source priority",
        help: " -- example: POP0 (set Output POP0 [0: Solar-Utility-Battery], POP1 [1: Solar-Battery-Utility])",
        regex: Some("POP([01])$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PSP",
        description: "Set solar power priority",
        help: " -- example: PSP0 (set Priority PSP0 [0: Battery-Load-Utiliy (+AC Charge)], PSP1 [1: Load-Battery-Utiliy])",
        regex: Some("PSP([01])$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PEI",
        description: "Set Machine type, enable: Grid-Tie",
        help: " -- example: PEI (set enable Grid-Tie)",
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PDI",
        description: "Set Machine type, disable: Grid-Tie",
        help: " -- example: PDI (set disable Grid-Tie)",
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PCP",
        description: "Set charging source priority",
        help: " -- example: PCP0,1 (set unit 0 [0-9] to 0: Solar first, 1: Solar and Utility, 2: Only solar)",
        regex: Some("PCP([0-9],[012])$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "MCHGC",
        description: "Set Battery Max Charging Current Solar + AC",
        help: " -- example: MCHGC0,030 (set unit 0 [0-9] to max charging current of 30A [010 020 030 040 050 060 070 080])",
        regex: Some("MCHGC([0-9],0[1-8]0)$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "MUCHGC",
        description: "Set Battery Max AC Charging Current",
        help: " -- example: MUCHGC0,030 (set unit 0 [0-9] utility charging current to 30A [002 010 020 030 040 050 060 070 080])",
        regex: Some("MUCHGC([0-9]),(002|0[1-8]0)$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PBT",
        description: "Set Battery Type",
        help: " -- example: PBT0 (set battery as PBT0 [0: AGM], PBT1 [1: FLOODED], PBT2 [2: USER])",
        regex: Some("PBT([012])$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "MCHGV",
        description: "Set Battery Bulk,Float charge voltages",
        help: " -- example: MCHGV552,540 (set Bulk - CV voltage [480~584] in 0.1V xxx, Float voltage [480~584] in 0.1V yyy)",
        regex: Some("MCHGV(4[8-9][0-9]|5[0-7][0-9]|58[0-5]),(4[8-9][0-9]|5[0-7][0-9]|58[0-4])$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PSDV",
        description: "Set Battery Cut-off Voltage",
        help: " -- example: PSDV450 (set battery cut-off voltage to 45V [400~480V] for 48V unit)",
        regex: Some("PSDV(4[0-7][0-9]|480)$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "BUCD",
        description: "Set Battery Stop dis,charging when Grid is available",
        help: " -- example: BUCD440,480 (set Stop discharge Voltage [440~510] in 0.1V xxx, Stop Charge Voltage [000(Full) or 480~580] in 0.1V yyy)",
        regex: Some("BUCD((4[4-9]0|5[0-1]0),(000|4[8-9]0|5[0-8]0))$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "DAT",
        description: "Set date and time",
        help: " -- example: DAT231019123045 (set date and time to YYMMDDHHMMSS)",
        regex: Some(r"DAT(\d{12})$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
];

#[derive(Clone, Debug)]
pub struct Pi18 {
    table: CommandTable,
}

impl Pi18 {
    pub fn new(table: CommandTable) -> Self {
        Self { table }
    }
}

impl ProtocolCommon for Pi18 {
    fn id(&self) -> ProtocolId {
        ProtocolId::Pi18
    }

    fn table(&self) -> &CommandTable {
        &self.table
    }

    fn id_command(&self) -> &'static str {
        "ID"
    }

    fn full_command(&self, code: &str, definition: &CommandDefinition) -> Vec<u8> {
        let marker = match definition.kind {
            CommandKind::Query => 'P',
            CommandKind::Setter => 'S',
        };
        // length covers the code, the two CRC bytes and the CR
        let mut frame = format!("^{}{:03}{}", marker, code.len() + 3, code).into_bytes();
        if !definition.nocrc {
            let crc = crc::pi30(&frame);
            frame.extend_from_slice(&crc);
        }
        frame.push(b'\r');
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
        if !(response.starts_with(b"^D") || response.starts_with(b"^0") || response.starts_with(b"^1")) {
            return Err(DecodeError::MissingStart("^D".to_string()));
        }
        check_crc_framed(response)
    }

    fn trim(&self, response: &[u8]) -> Vec<u8> {
        if response.starts_with(b"^0") {
            return b"NAK".to_vec();
        }
        if response.starts_with(b"^1") {
            return b"ACK".to_vec();
        }

        let end = response.len().saturating_sub(3);
        response.get(5..end).unwrap_or_default().to_vec()
    }

    fn split(&self, payload: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(payload)
            .split(',')
            .map(str::to_owned)
            .collect()
    }

    fn acknowledgement(&self, response: &[u8]) -> Option<bool> {
        match response.get(..2) {
            Some(b"^1") => Some(true),
            Some(b"^0") => Some(false),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol() -> Result<Protocol> {
        Protocol::new(ProtocolId::Pi18, None)
    }

    #[test]
    fn frames() -> Result<()> {
        let protocol = protocol()?;
        let vectors: &[(&str, &[u8])] = &[
            ("PI", b"^P005PIq\x8b\r"),
            ("GS", b"^P005GSX\x14\r"),
            ("ID", b"^P005ID\x19\xcd\r"),
            ("T", b"^P004T\xdfi\r"),
            ("VFW", b"^P006VFW\xf6\xe6\r"),
            ("MOD", b"^P006MOD\xdd\xbe\r"),
            ("FWS", b"^P006FWS\xc5C\r"),
            ("PIRI", b"^P007PIRI\xee8\r"),
            ("FLAG", b"^P007FLAG\x8e\x18\r"),
            ("MCHGCR", b"^P009MCHGCR\xee\"\r"),
            ("EY2023", b"^P009EY2023\x91=\r"),
            ("ED20231019", b"^P013ED202310195|\r"),
            ("PF", b"^S005PFN\x84\r"),
            ("PEA", b"^S006PEA\xbb`\r"),
            ("POP1", b"^S007POP1\x0e\x10\r"),
            ("PCP0,1", b"^S009PCP0,1\x8f\x07\r"),
            ("BUCD440,480", b"^S014BUCD440,480\xa5]\r"),
            ("MUCHGC0,030", b"^S014MUCHGC0,030\xee\xdd\r"),
        ];

        for (code, frame) in vectors {
            assert_eq!(protocol.get_full_command(code)?, *frame, "{}", code);
            let length: usize = std::str::from_utf8(&frame[2..5])?.parse()?;
            assert_eq!(length, code.len() + 3);
        }
        Ok(())
    }

    #[test]
    fn general_status() -> Result<()> {
        let protocol = protocol()?;
        let command = protocol.resolve("GS")?;
        let result = protocol.decode(&command, command.definition.test_responses[0]);

        assert!(!result.error, "{:?}", result.error_messages);
        assert_eq!(result.readings.len(), 28);
        assert_eq!(result.get("grid_voltage").map(|r| &r.value), Some(&Value::Float(223.2)));
        assert_eq!(
            result.get("mppt1_charger_status").map(|r| &r.value),
            Some(&Value::from("charging"))
        );
        assert_eq!(
            result.get("dc/ac_power_direction").map(|r| &r.value),
            Some(&Value::from("DC-AC"))
        );

        let result = protocol.decode(&command, command.definition.test_responses[1]);
        assert!(!result.is_valid);
        assert_eq!(result.error_messages, vec!["command execution failed (NAK)"]);
        Ok(())
    }

    #[test]
    fn rated_information_with_extra_token() -> Result<()> {
        let protocol = protocol()?;
        let command = protocol.resolve("PIRI")?;
        let result = protocol.decode(&command, command.definition.test_responses[0]);

        assert!(result.is_valid);
        assert_eq!(result.readings.len(), 26);
        assert_eq!(result.readings[25].label, crate::protocol::decode::UNKNOWN_VALUE);
        assert_eq!(
            result.get("battery_bulk_voltage").map(|r| &r.value),
            Some(&Value::Float(55.2))
        );
        Ok(())
    }

    #[test]
    fn setter_acknowledgement() -> Result<()> {
        let protocol = protocol()?;
        let command = protocol.resolve("PSDV450")?;
        assert_eq!(command.parameter.as_deref(), Some("450"));

        let result = protocol.decode(&command, b"^1\x0b\xc2\r");
        assert_eq!(result.readings[0].value, Value::from("Successful"));
        let result = protocol.decode(&command, b"^0\x1b\xe3\r");
        assert_eq!(result.readings[0].value, Value::from("Failed"));

        let result = protocol.decode(&command, b"(ACK\x39\x20\r");
        assert!(!result.is_valid);
        Ok(())
    }

    #[test]
    fn out_of_range_setters_are_unknown() -> Result<()> {
        let protocol = protocol()?;
        assert!(protocol.resolve("PSDV500").is_err());
        assert!(protocol.resolve("MCHGC0,090").is_err());
        assert!(protocol.resolve("PEI")?.parameter.is_none());
        Ok(())
    }

    #[test]
    fn every_fixture_passes_crc() -> Result<()> {
        let protocol = protocol()?;
        for definition in protocol.table().definitions() {
            for response in definition.test_responses {
                assert_eq!(
                    protocol.check_valid(response, definition),
                    Ok(()),
                    "{}",
                    definition.code
                );
            }
        }
        Ok(())
    }
}
