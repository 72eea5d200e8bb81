//! PI30: `{command}{crc}\r` frames, `({payload}{crc}\r` space separated replies.

use crate::crc;
use crate::prelude::*;
use crate::protocol::definition::{DecodeKind::*, FieldDef, ResponseType, QUERY, SETTER};
use crate::protocol::{CommandTable, ProtocolId};

pub const OUTPUT_MODES: &[&str] = &[
    "single machine output",
    "parallel output",
    "Phase 1 of 3 Phase output",
    "Phase 2 of 3 Phase output",
    "Phase 3 of 3 Phase output",
    "Phase 1 of 2 phase output",
    "Phase 2 of 2 phase output",
    "unknown output",
];

pub const BATTERY_TYPES: &[&str] = &[
    "AGM",
    "Flooded",
    "User",
    "TBD",
    "Pylontech",
    "WECO",
    "Soltaro",
    "LIb-protocol compatible",
    "3rd party Lithium",
];

pub const CHARGER_PRIORITIES: &[&str] = &[
    "Utility first",
    "Solar first",
    "Solar + Utility",
    "Only solar charging permitted",
];

pub const PV_OK_CONDITIONS: &[&str] = &[
    "As long as one unit of inverters has connect PV, parallel system will consider PV OK",
    "Only All of inverters have connect PV, parallel system will consider PV OK",
];

pub const PV_POWER_BALANCE: &[&str] = &[
    "PV input max current will be the max charged current",
    "PV input max power will be the sum of the max charged power and loads power",
];

const DISABLED_ENABLED: &[&str] = &["disabled", "enabled"];

pub const WORK_MODES: &[(&str, &str)] = &[
    ("P", "Power On Mode"),
    ("S", "Standby Mode"),
    ("L", "Line Mode"),
    ("B", "Battery Mode"),
    ("F", "Fault Mode"),
    ("H", "Power Saving Mode"),
];

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

pub const INVERTER_STATUS: &[&str] = &[
    "Is SCC OK",
    "Is AC Charging",
    "Is SCC Charging",
    "Is Battery Over Voltage",
    "Is Battery Under Voltage",
    "Is Line Lost",
    "Is Load On",
    "Is Configuration Changed",
];

pub const PARALLEL_OUTPUT_MODES: &[&str] = &[
    "single machine",
    "parallel output",
    "Phase 1 of 3 phase output",
    "Phase 2 of 3 phase output",
    "Phase 3 of 3 phase output",
    "Phase 1 of 2 phase output",
    "Phase 2 of 2 phase output",
    "Unknown Output Mode",
];

pub const DEVICE_STATUS: &[&str] = &[
    "Is SBU Priority Version Added",
    "Is Configuration Changed",
    "Is SCC Firmware Updated",
    "Is Load On",
    "Is Battery Voltage to Steady While Charging",
    "Is Charging On",
    "Is SCC Charging On",
    "Is AC Charging On",
];

pub const ACK_RESPONSES: &[&[u8]] = &[b"(NAK\x73\x73\r", b"(ACK\x39\x20\r"];

// Queries {{{
pub static QUERIES: &[CommandDefinition] = &[
    CommandDefinition {
        code: "QBOOT",
        description: "DSP Has Bootstrap inquiry",
        fields: &[FieldDef::new("DSP Has Bootstrap", OptionList(&["No", "Yes"]), "")],
        test_responses: &[b"(0\xb9\x1c\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "QDI",
        description: "Default Settings inquiry",
        help: " -- queries the default settings from the Inverter",
        fields: &[
            FieldDef::new("AC Output Voltage", Float, "V"),
            FieldDef::new("AC Output Frequency", Float, "Hz"),
            FieldDef::new("Max AC Charging Current", Int, "A"),
            FieldDef::new("Battery Under Voltage", Float, "V"),
            FieldDef::new("Battery Float Charge Voltage", Float, "V"),
            FieldDef::new("Battery Bulk Charge Voltage", Float, "V"),
            FieldDef::new("Battery Recharge Voltage", Float, "V"),
            FieldDef::new("Max Charging Current", Int, "A"),
            FieldDef::new("Input Voltage Range", OptionList(&["Appliance", "UPS"]), ""),
            FieldDef::new(
                "Output Source Priority",
                OptionList(&["Utility first", "Solar first", "SBU first"]),
                "",
            ),
            FieldDef::new("Charger Source Priority", OptionList(CHARGER_PRIORITIES), ""),
            FieldDef::new("Battery Type", OptionList(&["AGM", "Flooded", "User"]), ""),
            FieldDef::new("Buzzer", OptionList(&["enabled", "disabled"]), ""),
            FieldDef::new("Power saving", OptionList(DISABLED_ENABLED), ""),
            FieldDef::new("Overload restart", OptionList(DISABLED_ENABLED), ""),
            FieldDef::new("Over temperature restart", OptionList(DISABLED_ENABLED), ""),
            FieldDef::new("LCD Backlight", OptionList(DISABLED_ENABLED), ""),
            FieldDef::new("Primary source interrupt alarm", OptionList(DISABLED_ENABLED), ""),
            FieldDef::new("Record fault code", OptionList(DISABLED_ENABLED), ""),
            FieldDef::new("Overload bypass", OptionList(DISABLED_ENABLED), ""),
            FieldDef::new("LCD reset to default", OptionList(DISABLED_ENABLED), ""),
            FieldDef::new("Output mode", OptionList(OUTPUT_MODES), ""),
            FieldDef::new("Battery Redischarge Voltage", Float, "V"),
            FieldDef::new("PV OK condition", OptionList(PV_OK_CONDITIONS), ""),
            FieldDef::new("PV Power Balance", OptionList(PV_POWER_BALANCE), ""),
            FieldDef::new("Unknown Value", Int, ""),
        ],
        test_responses: &[
            b"(230.0 50.0 0030 42.0 54.0 56.4 46.0 60 0 0 2 0 0 0 0 0 1 1 0 0 1 0 54.0 0 1 000\x9e\x60\r",
        ],
        ..QUERY
    },
    CommandDefinition {
        code: "QFLAG",
        description: "Flag Status inquiry",
        help: " -- queries the enabled / disabled state of various Inverter settings (e.g. buzzer, overload, interrupt alarm)",
        fields: &[FieldDef::new(
            "Device Status",
            EnFlags(&[
                ('a', "Buzzer"),
                ('b', "Overload Bypass"),
                ('j', "Power Saving"),
                ('k', "LCD Reset to Default"),
                ('u', "Overload Restart"),
                ('v', "Over Temperature Restart"),
                ('x', "LCD Backlight"),
                ('y', "Primary Source Interrupt Alarm"),
                ('z', "Record Fault Code"),
            ]),
            "",
        )],
        test_responses: &[b"(EakxyDbjuvz\x2f\x29\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "QID",
        description: "Device Serial Number inquiry",
        help: " -- queries the device serial number",
        response_type: ResponseType::Bytes,
        fields: &[FieldDef::new("Serial Number", Str, "")],
        test_responses: &[b"(9293333010501\xbb\x07\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "QMCHGCR",
        description: "Max Charging Current Options inquiry",
        help: " -- queries the maximum charging current setting of the Inverter",
        response_type: ResponseType::Multivalued,
        fields: &[FieldDef::new("Max Charging Current Options", Str, "A")],
        test_responses: &[b"(010 020 030 040 050 060 070 080 090 100 110 120\x0c\xcb\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "QMUCHGCR",
        description: "Max Utility Charging Current Options inquiry",
        help: " -- queries the maximum utility charging current setting of the Inverter",
        response_type: ResponseType::Multivalued,
        fields: &[FieldDef::new("Max Utility Charging Current", Str, "A")],
        test_responses: &[b"(002 010 020 030 040 050 060 070 080 090 100 110 120\xca#\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "QMOD",
        description: "Mode inquiry",
        help: " -- queries the Inverter mode",
        fields: &[FieldDef::new(
            "Device Mode",
            Keyed(&[
                ("P", "Power on"),
                ("S", "Standby"),
                ("L", "Line"),
                ("B", "Battery"),
                ("F", "Fault"),
                ("H", "Power saving"),
            ]),
            "",
        )],
        test_responses: &[b"(S\xe5\xd9\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "QMN",
        description: "Model Name Inquiry",
        response_type: ResponseType::Bytes,
        fields: &[FieldDef::new("Model Name", Str, "")],
        test_responses: &[b"(MKS2-8000\xb2\x8d\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "QGMN",
        description: "General Model Name Inquiry",
        response_type: ResponseType::Bytes,
        fields: &[FieldDef::new("General Model Number", Str, "")],
        test_responses: &[b"(044\xc8\xae\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "QOPM",
        description: "Output Mode inquiry",
        help: " -- queries the output mode of the Inverter (e.g. single, parallel, phase 1 of 3 etc)",
        fields: &[FieldDef::new("Output mode", OptionList(OUTPUT_MODES), "")],
        test_responses: &[b"(0\xb9\x1c\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "QPGS",
        description: "Parallel Information inquiry",
        help: " -- example: QPGS1 queries the values of various metrics from instance 1 of parallel setup Inverters (numbers from 0)",
        regex: Some(r"QPGS(\d+)$"),
        nosupports: &["LV5048"],
        fields: &[
            FieldDef::new("Parallel instance number", OptionList(&["Not valid", "valid"]), ""),
            FieldDef::new("Serial number", Str, ""),
            FieldDef::new("Work mode", Keyed(WORK_MODES), ""),
            FieldDef::new("Fault code", Keyed(FAULT_CODES), ""),
            FieldDef::new("Grid voltage", Float, "V"),
            FieldDef::new("Grid frequency", Float, "Hz"),
            FieldDef::new("AC output voltage", Float, "V"),
            FieldDef::new("AC output frequency", Float, "Hz"),
            FieldDef::new("AC output apparent power", Int, "VA"),
            FieldDef::new("AC output active power", Int, "W"),
            FieldDef::new("Load percentage", Int, "%"),
            FieldDef::new("Battery voltage", Float, "V"),
            FieldDef::new("Battery charging current", Int, "A"),
            FieldDef::new("Battery capacity", Int, "%"),
            FieldDef::new("PV Input Voltage", Float, "V"),
            FieldDef::new("Total charging current", Int, "A"),
            FieldDef::new("Total AC output apparent power", Int, "VA"),
            FieldDef::new("Total output active power", Int, "W"),
            FieldDef::new("Total AC output percentage", Int, "%"),
            FieldDef::new("Inverter Status", Flags(INVERTER_STATUS), ""),
            FieldDef::new("Output mode", OptionList(PARALLEL_OUTPUT_MODES), ""),
            FieldDef::new(
                "Charger source priority",
                OptionList(&["Utility first", "Solar first", "Solar + Utility", "Solar only"]),
                "",
            ),
            FieldDef::new("Max charger current", Int, "A"),
            FieldDef::new("Max charger range", Int, "A"),
            FieldDef::new("Max AC charger current", Int, "A"),
            FieldDef::new("PV input current", Int, "A"),
            FieldDef::new("Battery discharge current", Int, "A"),
            FieldDef::new("Unknown float", Float, ""),
            FieldDef::new("Unknown flags?", Str, ""),
        ],
        test_responses: &[
            b"(1 92912102100033 B 00 000.0 00.00 120.1 59.99 0048 0000 000 53.1 000 059 000.0 000 00154 00016 000 00000110 7 1 060 120 030 00 000 000.0 00\xe7c\r",
            b"(1 92931701100510 B 00 000.0 00.00 230.6 50.00 0275 0141 005 51.4 001 100 083.3 002 00574 00312 003 10100110 1 2 060 120 10 04 000\xcc#\r",
            b"QPGS0?\xda\r",
        ],
        ..QUERY
    },
    CommandDefinition {
        code: "QPGS",
        description: "Parallel Information inquiry LV5048",
        help: " -- example: QPGS1 queries the values of various metrics from instance 1 of parallel setup Inverters (numbers from 0)",
        regex: Some(r"QPGS(\d)$"),
        supports: &["LV5048"],
        fields: &[
            FieldDef::new("Parallel instance number", OptionList(&["Not valid", "valid"]), ""),
            FieldDef::new("Serial number", Str, ""),
            FieldDef::new("Work mode", Keyed(WORK_MODES), ""),
            FieldDef::new("Fault code", Keyed(FAULT_CODES), ""),
            FieldDef::new("Grid voltage", Float, "V"),
            FieldDef::new("Grid frequency", Float, "Hz"),
            FieldDef::new("AC output voltage", Float, "V"),
            FieldDef::new("AC output frequency", Float, "Hz"),
            FieldDef::new("AC output apparent power", Int, "VA"),
            FieldDef::new("AC output active power", Int, "W"),
            FieldDef::new("Load percentage", Int, "%"),
            FieldDef::new("Battery voltage", Float, "V"),
            FieldDef::new("Battery charging current", Int, "A"),
            FieldDef::new("Battery capacity", Int, "%"),
            FieldDef::new("PV Input Voltage", Float, "V"),
            FieldDef::new("Total charging current", Int, "A"),
            FieldDef::new("Total AC output apparent power", Int, "VA"),
            FieldDef::new("Total output active power", Int, "W"),
            FieldDef::new("Total AC output percentage", Int, "%"),
            FieldDef::new("Inverter Status", Flags(INVERTER_STATUS), ""),
            FieldDef::new("Output mode", OptionList(PARALLEL_OUTPUT_MODES), ""),
            FieldDef::new(
                "Charger source priority",
                OptionList(&["Utility first", "Solar first", "Solar + Utility", "Solar only"]),
                "",
            ),
            FieldDef::new("Max charger current", Int, "A"),
            FieldDef::new("Max charger range", Int, "A"),
            FieldDef::new("Max AC charger current", Int, "A"),
            FieldDef::new("PV input current", Int, "A"),
            FieldDef::new("Battery discharge current", Int, "A"),
        ],
        test_responses: &[
            b"(11 92911906100045 L 00 122.9 59.98 122.9 59.98 0331 0272 013 56.1 004 100 000.0 004 01577 01400 009 01000010 6 0 060 220 40 00 000\x0f\x80\r",
        ],
        ..QUERY
    },
    CommandDefinition {
        code: "QPI",
        description: "Protocol ID inquiry",
        help: " -- queries the device protocol ID. e.g. PI30 for HS series",
        fields: &[FieldDef::new("Protocol Id", Str, "")],
        test_responses: &[b"(PI30\x9a\x0b\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "QPIGS",
        description: "General Status Parameters inquiry",
        help: " -- queries the value of various metrics from the Inverter",
        nosupports: &["LV5048"],
        fields: &[
            FieldDef::new("AC Input Voltage", Float, "V").meta("mdi:transmission-tower-export", "voltage", ""),
            FieldDef::new("AC Input Frequency", Float, "Hz").meta("mdi:current-ac", "frequency", ""),
            FieldDef::new("AC Output Voltage", Float, "V").meta("mdi:power-plug", "voltage", ""),
            FieldDef::new("AC Output Frequency", Float, "Hz").meta("mdi:current-ac", "frequency", ""),
            FieldDef::new("AC Output Apparent Power", Int, "VA").meta("mdi:power-plug", "apparent_power", ""),
            FieldDef::new("AC Output Active Power", Int, "W").meta("mdi:power-plug", "power", "measurement"),
            FieldDef::new("AC Output Load", Int, "%").meta("mdi:brightness-percent", "", ""),
            FieldDef::new("BUS Voltage", Int, "V").meta("mdi:details", "voltage", ""),
            FieldDef::new("Battery Voltage", Float, "V").meta("mdi:battery-outline", "voltage", ""),
            FieldDef::new("Battery Charging Current", Int, "A").meta("mdi:current-dc", "current", ""),
            FieldDef::new("Battery Capacity", Int, "%").meta("", "battery", ""),
            FieldDef::new("Inverter Heat Sink Temperature", Int, "°C").meta("mdi:details", "temperature", ""),
            FieldDef::new("PV Input Current", Float, "A").meta("mdi:solar-power", "current", ""),
            FieldDef::new("PV Input Voltage", Float, "V").meta("mdi:solar-power", "voltage", ""),
            FieldDef::new("Battery Voltage from SCC", Float, "V").meta("mdi:battery-outline", "voltage", ""),
            FieldDef::new("Battery Discharge Current", Int, "A").meta("mdi:battery-negative", "current", ""),
            FieldDef::new("Device Status", Flags(DEVICE_STATUS), ""),
            FieldDef::new("RSV1", Int, "A"),
            FieldDef::new("RSV2", Int, "A"),
            FieldDef::new("PV Input Power", Int, "W").meta("mdi:solar-power", "power", "measurement"),
            FieldDef::new(
                "Device Status2",
                Flags(&["Is Charging to Float", "Is Switched On", "Is Reserved"]),
                "",
            ),
        ],
        test_responses: &[
            b"(000.0 00.0 230.0 49.9 0161 0119 003 460 57.50 012 100 0069 0014 103.8 57.45 00000 00110110 00 00 00856 010\x24\x8c\r",
        ],
        ..QUERY
    },
    CommandDefinition {
        code: "QPIGS2",
        description: "General Status Parameters inquiry (second phase)",
        help: " -- queries the value of various metrics from the second phase of an LV5048",
        supports: &["LV5048"],
        fields: &[
            FieldDef::new("L2 AC Input Voltage", Float, "V"),
            FieldDef::new("L2 AC Input Frequency", Float, "Hz"),
            FieldDef::new("L2 AC Output Voltage", Float, "V"),
            FieldDef::new("L2 AC Output Frequency", Float, "Hz"),
            FieldDef::new("L2 AC Output Apparent Power", Int, "VA"),
            FieldDef::new("L2 AC Output Active Power", Int, "W"),
            FieldDef::new("L2 AC Output Load", Int, "%"),
            FieldDef::new("PV2 Battery Charging Current", Int, "A"),
            FieldDef::new("PV2 Input Voltage", Float, "V"),
            FieldDef::new("L2 Battery Voltage", Float, "V"),
            FieldDef::new(
                "Device Status",
                Flags(&[
                    "Is L2 SCC OK",
                    "Is L2 AC Charging On",
                    "Is L2 SCC Charging On",
                    "",
                    "Is L2 Line Not OK",
                    "Is Load On",
                    "",
                ]),
                "",
            ),
        ],
        test_responses: &[
            b"(123.9 59.98 123.9 59.98 0149 0130 005 000 000.0 56.1 0100001\xdb{\r",
        ],
        ..QUERY
    },
    CommandDefinition {
        code: "QPIRI",
        description: "Current Settings inquiry",
        help: " -- queries the current settings from the Inverter",
        nosupports: &["LV5048"],
        fields: &[
            FieldDef::new("AC Input Voltage", Float, "V"),
            FieldDef::new("AC Input Current", Float, "A"),
            FieldDef::new("AC Output Voltage", Float, "V"),
            FieldDef::new("AC Output Frequency", Float, "Hz"),
            FieldDef::new("AC Output Current", Float, "A"),
            FieldDef::new("AC Output Apparent Power", Int, "VA"),
            FieldDef::new("AC Output Active Power", Int, "W"),
            FieldDef::new("Battery Voltage", Float, "V"),
            FieldDef::new("Battery Recharge Voltage", Float, "V"),
            FieldDef::new("Battery Under Voltage", Float, "V"),
            FieldDef::new("Battery Bulk Charge Voltage", Float, "V"),
            FieldDef::new("Battery Float Charge Voltage", Float, "V"),
            FieldDef::new("Battery Type", OptionList(BATTERY_TYPES), ""),
            FieldDef::new("Max AC Charging Current", Int, "A"),
            FieldDef::new("Max Charging Current", Int, "A"),
            FieldDef::new("Input Voltage Range", OptionList(&["Appliance", "UPS"]), ""),
            FieldDef::new(
                "Output Source Priority",
                OptionList(&["Utility first", "Solar first", "SBU first"]),
                "",
            ),
            FieldDef::new("Charger Source Priority", OptionList(CHARGER_PRIORITIES), ""),
            FieldDef::new("Max Parallel Units", Int, "units"),
            FieldDef::new(
                "Machine Type",
                Keyed(&[("00", "Grid tie"), ("01", "Off Grid"), ("10", "Hybrid")]),
                "",
            ),
            FieldDef::new("Topology", OptionList(&["transformerless", "transformer"]), ""),
            FieldDef::new("Output Mode", OptionList(OUTPUT_MODES), ""),
            FieldDef::new("Battery Redischarge Voltage", Float, "V"),
            FieldDef::new("PV OK Condition", OptionList(PV_OK_CONDITIONS), ""),
            FieldDef::new("PV Power Balance", OptionList(PV_POWER_BALANCE), ""),
            FieldDef::new("Max charging time for CV stage", Int, "min"),
            FieldDef::new(
                "Operation Logic",
                OptionList(&["Automatic mode", "On-line mode", "ECO mode"]),
                "",
            ),
        ],
        test_responses: &[
            b"(120.0 25.0 120.0 60.0 25.0 3000 3000 48.0 46.0 44.0 58.4 54.4 2 30 060 1 2 0 9 01 0 6 54.0 0 1 000 0\x8f\xed\r",
            b"(230.0 34.7 230.0 50.0 34.7 8000 8000 48.0 48.0 42.0 54.0 52.5 2 010 030 1 2 2 9 01 0 0 50.0 0 1 480 0 070\xd9`\r",
            b"(230.0 21.7 230.0 50.0 21.7 5000 4000 48.0 46.0 42.0 56.4 54.0 0 10 010 1 0 0 6 01 0 0 54.0 0 1\x6f\x7e\r",
            b"(230.0 13.0 230.0 50.0 13.0 3000 2400 24.0 23.0 21.0 28.2 27.0 0 30 50 0 2 1 - 01 1 0 26.0 0 0\xb9\xbd\r",
        ],
        ..QUERY
    },
    CommandDefinition {
        code: "QPIWS",
        description: "Warning status inquiry",
        help: " -- queries any active warnings flags from the Inverter",
        fields: &[FieldDef::new(
            "Warning",
            StatFlags(&[
                "",
                "Inverter fault",
                "Bus over fault",
                "Bus under fault",
                "Bus soft fail fault",
                "Line fail warning",
                "OPV short warning",
                "Inverter voltage too low fault",
                "Inverter voltage too high fault",
                "Over temperature fault",
                "Fan locked fault",
                "Battery voltage to high fault",
                "Battery low alarm warning",
                "Reserved",
                "Battery under shutdown warning",
                "Reserved",
                "Overload fault",
                "EEPROM fault",
                "Inverter over current fault",
                "Inverter soft fail fault",
                "Self test fail fault",
                "OP DC voltage over fault",
                "Bat open fault",
                "Current sensor fail fault",
                "Battery short fault",
                "Power limit warning",
                "PV voltage high warning",
                "MPPT overload fault",
                "MPPT overload warning",
                "Battery too low to charge warning",
                "",
                "",
            ]),
            "",
        )],
        test_responses: &[b"(00000100000000001000000000000000\x56\xa6\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "QVFW",
        description: "Main CPU firmware version inquiry",
        help: " -- queries the main CPU firmware version",
        fields: &[FieldDef::new("Main CPU firmware version", Str, "")],
        test_responses: &[b"(VERFW:00072.70\x53\xa7\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "QVFW2",
        description: "Secondary CPU firmware version inquiry",
        help: " -- queries the secondary CPU firmware version",
        fields: &[FieldDef::new("Secondary CPU firmware version", Str, "")],
        test_responses: &[b"(VERFW:00072.70\x53\xa7\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "Q1",
        description: "Q1 query",
        fields: &[
            FieldDef::new("Time until the end of absorb charging", Int, "sec"),
            FieldDef::new("Time until the end of float charging", Int, "sec"),
            FieldDef::new(
                "SCC Flag",
                Keyed(&[
                    ("00", "SCC not communicating?"),
                    ("01", "SCC is powered and communicating"),
                    ("11", "I am probably decoding wrong, should this be a 3?"),
                ]),
                "",
            ),
            FieldDef::new(
                "AllowSccOnFlag",
                Keyed(&[("00", "SCC not allowed to charge"), ("01", "SCC allowed to charge")]),
                "",
            ),
            FieldDef::new("ChargeAverageCurrent", Int, "A"),
            FieldDef::new("SCC PWM temperature", Int, "°C").meta("", "temperature", ""),
            FieldDef::new("Inverter temperature", Int, "°C").meta("", "temperature", ""),
            FieldDef::new("Battery temperature", Int, "°C").meta("", "temperature", ""),
            FieldDef::new("Transformer temperature", Int, "°C").meta("", "temperature", ""),
            FieldDef::new(
                "Parallel Mode",
                Keyed(&[("00", "New"), ("01", "Slave"), ("02", "Master")]),
                "",
            ),
            FieldDef::new("Fan lock status", Keyed(&[("00", "Not locked"), ("01", "Locked")]), ""),
            FieldDef::new("Not used", Str, ""),
            FieldDef::new("Fan PWM speed", Int, "%"),
            FieldDef::new("SCC charge power", Int, "W").meta("mdi:solar-power", "power", ""),
            FieldDef::new("Parallel Warning", Str, ""),
            FieldDef::new("Sync frequency", Float, "Hz"),
            FieldDef::new(
                "Inverter charge status",
                Keyed(&[
                    ("10", "nocharging"),
                    ("11", "bulk stage"),
                    ("12", "absorb"),
                    ("13", "float"),
                ]),
                "",
            )
            .meta("mdi:book-open", "", ""),
        ],
        test_responses: &[
            b"(00000 00000 01 01 00 059 045 053 068 00 00 000 0040 0580 0000 50.00 139\xb9\r",
        ],
        ..QUERY
    },
]; // }}}

// Setters {{{
pub static SETTERS: &[CommandDefinition] = &[
    CommandDefinition {
        code: "F",
        description: "Set Device Output Frequency",
        help: " -- examples: F50 (set output frequency to 50Hz) or F60 (set output frequency to 60Hz)",
        regex: Some("F([56]0)$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "MCHGC",
        description: "Set Max Charging Current (for parallel units)",
        help: " -- examples: MCHGC040 (set unit 0 to max charging current of 40A), MCHGC160 (set unit 1 to max charging current of 60A)",
        regex: Some(r"MCHGC(\d\d\d)$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "MNCHGC",
        description: "Set Utility Max Charging Current (more than 100A) (for 4000/5000)",
        help: " -- example: MNCHGC1120 (set unit 1 utility max charging current to 120A)",
        regex: Some(r"MNCHGC(\d\d\d\d)$"),
        test_responses: &[b"(ACK\x39\x20\r", b"(NAK\x73\x73\r"],
        ..SETTER
    },
    CommandDefinition {
        code: "MUCHGC",
        description: "Set Utility Max Charging Current",
        help: " -- example: MUCHGC130 (set unit 1 utility max charging current to 30A)",
        regex: Some(r"MUCHGC(\d\d\d)$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PBCV",
        description: "Set Battery re-charge voltage",
        help: " -- example PBCV44.0 - set re-charge voltage to 44V (12V unit: 11V/11.3V/11.5V/11.8V/12V/12.3V/12.5V/12.8V, 24V unit: 22V/22.5V/23V/23.5V/24V/24.5V/25V/25.5V, 48V unit: 44V/45V/46V/47V/48V/49V/50V/51V)",
        regex: Some(r"PBCV(\d\d\.\d)$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PBDV",
        description: "Set Battery re-discharge voltage",
        help: " -- example PBDV48.0 - set re-discharge voltage to 48V (00.0V means battery is full(charging in float mode).)",
        regex: Some(r"PBDV(\d\d\.\d)$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PBFT",
        description: "Set Battery Float Charging Voltage",
        help: " -- example PBFT58.0 - set battery float charging voltage to 58V (48.0 - 58.4V for 48V unit)",
        regex: Some(r"PBFT(\d\d\.\d)$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PBT",
        description: "Set Battery Type",
        help: " -- examples: PBT00 (set battery as AGM), PBT01 (set battery as FLOODED), PBT02 (set battery as USER)",
        regex: Some("PBT(0[012])$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PCP",
        description: "Set Device Charger Priority",
        help: " -- examples: PCP00 (set utility first), PCP01 (set solar first), PCP02 (HS only: set solar and utility), PCP03 (set solar only charging)",
        regex: Some("PCP(0[0123])$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PCVV",
        description: "Set Battery C.V. (constant voltage) charging voltage",
        help: " -- example PCVV48.0 - set charging voltage to 48V (48.0 - 58.4V for 48V unit)",
        regex: Some(r"PCVV(\d\d\.\d)$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PE",
        description: "Set the enabled state of an Inverter setting",
        help: " -- examples: PEa - enable a (buzzer) [a=buzzer, b=overload bypass, j=power saving, K=LCD go to default after 1min, u=overload restart, v=overtemp restart, x=backlight, y=alarm on primary source interrupt, z=fault code record]",
        regex: Some("PE(.+)$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PD",
        description: "Set the disabled state of an Inverter setting",
        help: " -- examples: PDa - disable a (buzzer) [a=buzzer, b=overload bypass, j=power saving, K=LCD go to default after 1min, u=overload restart, v=overtemp restart, x=backlight, y=alarm on primary source interrupt, z=fault code record]",
        regex: Some("PD(.+)$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PF",
        description: "Set Control Parameters to Default Values",
        help: " -- example PF (reset control parameters to defaults)",
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PGR",
        description: "Set Grid Working Range",
        help: " -- examples: PGR00 (set device working range to appliance), PGR01 (set device working range to UPS)",
        regex: Some("PGR(0[01])$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "POP",
        description: "Set Device Output Source Priority",
        help: " -- examples: POP00 (set utility first), POP01 (set solar first), POP02 (set SBU priority)",
        regex: Some("POP(0[012])$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "POPLG",
        description: "Set Device Operation Logic",
        help: " -- examples: POPLG00 (set Auto mode), POPLG01 (set Online mode), POPLG02 (set ECO mode)",
        regex: Some("POPLG(0[012])$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "POPM",
        description: "Set Device Output Mode (for 4000/5000)",
        help: " -- examples: POPM01 (set unit 0 to 1 - parallel output), POPM10 (set unit 1 to 0 - single machine output), POPM02 (set unit 0 to 2 - phase 1 of 3), POPM13 (set unit 1 to 3 - phase 2 of 3), POPM24 (set unit 2 to 4 - phase 3 of 3)",
        regex: Some(r"POPM(\d[01234])$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PPCP",
        description: "Set Parallel Device Charger Priority (for 4000/5000)",
        help: " -- examples: PPCP000 (set unit 1 to 00 - utility first), PPCP101 (set unit 1 to 01 - solar first), PPCP202 (set unit 2 to 02 - solar and utility), PPCP003 (set unit 0 to 03 - solar only charging)",
        regex: Some(r"PPCP(\d0[0123])$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PPVOKC",
        description: "Set PV OK Condition",
        help: " -- examples: PPVOKC0 (as long as one unit has connected PV, parallel system will consider PV OK), PPVOKC1 (only if all inverters have connected PV, parallel system will consider PV OK)",
        regex: Some("PPVOKC([01])$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PSDV",
        description: "Set Battery Cut-off Voltage",
        help: " -- example PSDV40.0 - set battery cut-off voltage to 40V (40.0 - 48.0V for 48V unit)",
        regex: Some(r"PSDV(\d\d\.\d)$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PSPB",
        description: "Set Solar Power Balance",
        help: " -- examples: PSPB0 (PV input max current will be the max charged current), PSPB1 (PV input max power will be the sum of the max charge power and loads power)",
        regex: Some("PSPB([01])$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PBATCD",
        description: "Battery charge/discharge controlling command",
        help: " -- examples: PBATCDxxx (please read description, use carefully)",
        regex: Some("PBATCD([01][01][01])$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "DAT",
        description: "Set Date Time",
        help: " -- examples: DATYYYYMMDDHHMMSS (14 digits after DAT)",
        regex: Some(r"DAT(\d{14})$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PBATMAXDISC",
        description: "Battery max discharge current",
        help: " -- examples: PBATMAXDISCxxx (000- disable or 030-150A)",
        regex: Some(r"PBATMAXDISC([01]\d\d)$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "BTA",
        description: "Calibrate inverter battery voltage",
        help: " -- examples: BTA-01 (reduce inverter reading by 0.05V), BTA+09 (increase inverter reading by 0.45V)",
        regex: Some(r"BTA([-+]0\d)$"),
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
    CommandDefinition {
        code: "PSAVE",
        description: "Save EEPROM changes",
        help: " -- examples: PSAVE (save changes to eeprom)",
        test_responses: ACK_RESPONSES,
        ..SETTER
    },
]; // }}}

/// Shared by PI30 and PI30MAX, which differ only in their tables.
#[derive(Clone, Debug)]
pub struct Pi30 {
    id: ProtocolId,
    table: CommandTable,
}

impl Pi30 {
    pub fn new(id: ProtocolId, table: CommandTable) -> Self {
        Self { id, table }
    }
}

impl ProtocolCommon for Pi30 {
    fn id(&self) -> ProtocolId {
        self.id
    }

    fn table(&self) -> &CommandTable {
        &self.table
    }

    fn id_command(&self) -> &'static str {
        "QID"
    }

    fn full_command(&self, code: &str, definition: &CommandDefinition) -> Vec<u8> {
        let mut frame = code.as_bytes().to_vec();
        if !definition.nocrc {
            frame.extend_from_slice(&crc::pi30(code.as_bytes()));
        }
        frame.push(b'\r');
        frame
    }

    fn check_valid(
        &self,
        response: &[u8],
        _definition: &CommandDefinition,
    ) -> Result<(), DecodeError> {
        check_crc_framed(response)
    }

    fn trim(&self, response: &[u8]) -> Vec<u8> {
        let end = response.len().saturating_sub(3);
        let body = response.get(..end).unwrap_or_default();
        body.strip_prefix(b"(").unwrap_or(body).to_vec()
    }

    fn acknowledgement(&self, response: &[u8]) -> Option<bool> {
        match self.trim(response).as_slice() {
            b"ACK" => Some(true),
            b"NAK" => Some(false),
            _ => None,
        }
    }
}

/// Length and trailing `{crc}\r` check shared by the PI family.
pub fn check_crc_framed(response: &[u8]) -> Result<(), DecodeError> {
    if response.is_empty() {
        return Err(DecodeError::Empty);
    }
    if response.len() <= 3 {
        return Err(DecodeError::TooShort);
    }

    let (data, tail) = response.split_at(response.len() - 3);
    let calculated = crc::pi30(data);
    // some firmware sends the plain table CRC without the delimiter escape
    let unescaped = crc::xmodem(data).to_be_bytes();
    if tail[..2] != calculated && tail[..2] != unescaped {
        return Err(DecodeError::CrcMismatch {
            got: hex::encode(&tail[..2]),
            calculated: hex::encode(calculated),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol() -> Result<Protocol> {
        Protocol::new(ProtocolId::Pi30, None)
    }

    #[test]
    fn frames() -> Result<()> {
        let protocol = protocol()?;
        assert_eq!(protocol.get_full_command("QPIGS")?, b"QPIGS\xb7\xa9\r");
        assert_eq!(protocol.get_full_command("QPIRI")?, b"QPIRI\xf8\x54\r");
        assert_eq!(protocol.get_full_command("PSDV56.4")?, b"PSDV56.4\xf9\xe0\r");
        Ok(())
    }

    #[test]
    fn model_filter() -> Result<()> {
        let lv = Protocol::new(ProtocolId::Pi30, Some("LV5048"))?;
        assert!(lv.resolve("QPIGS").is_err());
        assert!(lv.resolve("QPIGS2").is_ok());
        assert_eq!(
            lv.resolve("QPGS1")?.definition.description,
            "Parallel Information inquiry LV5048"
        );
        assert!(lv.resolve("QPGS10").is_err());

        let plain = protocol()?;
        assert!(plain.resolve("QPIGS2").is_err());
        assert_eq!(plain.resolve("QPGS10")?.parameter.as_deref(), Some("10"));
        Ok(())
    }

    #[test]
    fn every_fixture_passes_crc() -> Result<()> {
        let protocol = protocol()?;
        for definition in protocol.table().definitions() {
            for response in definition.test_responses {
                if response.starts_with(b"(") {
                    assert_eq!(
                        protocol.check_valid(response, definition),
                        Ok(()),
                        "{}",
                        definition.code
                    );
                }
            }
        }
        Ok(())
    }

    #[test]
    fn unescaped_crc_is_accepted() {
        // raw crc of "(00356" is 0x284d, escaped as 0x294d
        assert_eq!(check_crc_framed(b"(00356\x29\x4d\r"), Ok(()));
        assert_eq!(check_crc_framed(b"(00356\x28\x4d\r"), Ok(()));
        assert_eq!(
            check_crc_framed(b"(00356\x27\x4d\r"),
            Err(DecodeError::CrcMismatch {
                got: "274d".to_string(),
                calculated: "294d".to_string()
            })
        );
    }

    #[test]
    fn trims_marker_and_crc() -> Result<()> {
        let protocol = protocol()?;
        assert_eq!(protocol.trim(b"(PI30\x9a\x0b\r"), b"PI30");
        assert_eq!(protocol.trim(b"\r"), b"");
        Ok(())
    }

    #[test]
    fn too_short_and_empty() -> Result<()> {
        let protocol = protocol()?;
        let command = protocol.resolve("QPI")?;

        let result = protocol.decode(&command, b"");
        assert_eq!(result.error_messages, vec!["response was empty"]);

        let result = protocol.decode(&command, b"(\r");
        assert!(!result.is_valid);
        assert_eq!(result.error_messages, vec!["response is too short"]);
        Ok(())
    }
}
