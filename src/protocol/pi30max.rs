//! PI30MAX: the PI30 framing with extended status commands. Anything not
//! listed here falls back to the PI30 tables.

use crate::prelude::*;
use crate::protocol::definition::{DecodeKind::*, FieldDef, ResponseType, QUERY};
use crate::protocol::pi30::{
    BATTERY_TYPES, CHARGER_PRIORITIES, DEVICE_STATUS, INVERTER_STATUS, PARALLEL_OUTPUT_MODES,
    PV_OK_CONDITIONS, PV_POWER_BALANCE,
};

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
    ("10", "PV over current"),
    ("11", "PV over voltage"),
    ("12", "DC over current"),
    ("13", "Battery discharge over current"),
    ("51", "Over current inverter"),
    ("52", "Bus voltage too low"),
    ("53", "Inverter soft start failed"),
    ("54", "Self-test failed"),
    ("55", "Over DC voltage on output of inverter"),
    ("56", "Battery connection is open"),
    ("57", "Current sensor failed"),
    ("58", "Output voltage is too low"),
    ("60", "Power feedback protection"),
    ("71", "Firmware version different"),
    ("72", "Current sharing fault"),
    ("80", "CAN communication failed"),
    ("81", "Parallel host line lost"),
    ("82", "Parallel synchronized signal lost"),
    ("83", "Parallel battery voltage detect different"),
    ("84", "AC input voltage or frequency detected different"),
    ("85", "AC output current unbalanced"),
    ("86", "AC output mode setting different"),
];

pub static QUERIES: &[CommandDefinition] = &[
    CommandDefinition {
        code: "QSID",
        description: "Device Serial Number inquiry",
        help: " -- queries the device serial number (length greater than 14)",
        response_type: ResponseType::Bytes,
        fields: &[FieldDef::new("Serial Number", Str, "")],
        test_responses: &[b"(929321051053156\xe6\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "QVFW3",
        description: "Remote CPU firmware version inquiry",
        help: " -- queries the CPU firmware version of the remote panel",
        fields: &[FieldDef::new("Remote CPU firmware version", Str, "")],
        test_responses: &[b"(VERFW:00001.20PZ\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "VERFW",
        description: "Bluetooth version inquiry",
        help: " -- queries the bluetooth version",
        fields: &[FieldDef::new("Bluetooth version", Str, "")],
        test_responses: &[b"(VERFW:00013.00q\x01\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "QPIRI",
        description: "Current Settings inquiry",
        help: " -- queries the current settings from the Inverter",
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
                OptionList(&[
                    "Utility Solar Battery",
                    "Solar Utility Battery",
                    "Solar Battery Utility",
                ]),
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
            FieldDef::new(
                "Output Mode",
                OptionList(&[
                    "single machine output",
                    "parallel output",
                    "Phase 1 of 3 Phase output",
                    "Phase 2 of 3 Phase output",
                    "Phase 3 of 3 Phase output",
                    "Phase 1 of 2 phase output",
                    "Phase 2 of 2 phase output (120°)",
                    "Phase 2 of 2 phase output (180°)",
                    "unknown output",
                ]),
                "",
            ),
            FieldDef::new("Battery Redischarge Voltage", Float, "V"),
            FieldDef::new("PV OK Condition", OptionList(PV_OK_CONDITIONS), ""),
            FieldDef::new("PV Power Balance", OptionList(PV_POWER_BALANCE), ""),
            FieldDef::new("Max charging time for CV stage", Int, "min"),
            FieldDef::new(
                "Operation Logic",
                OptionList(&["Automatic mode", "On-line mode", "ECO mode"]),
                "",
            ),
            FieldDef::new("Max discharging current", Int, "A"),
        ],
        test_responses: &[
            b"(230.0 34.7 230.0 50.0 34.7 8000 8000 48.0 48.0 42.0 54.0 52.5 2 010 030 1 2 2 9 01 0 0 50.0 0 1 480 0 070\xd9`\r",
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
                ('d', "Solar Feed to Grid"),
                ('k', "LCD Reset to Default"),
                ('u', "Overload Restart"),
                ('v', "Over Temperature Restart"),
                ('x', "LCD Backlight"),
                ('y', "Primary Source Interrupt Alarm"),
                ('z', "Record Fault Code"),
            ]),
            "",
        )],
        test_responses: &[b"(EakxyzDbdu\t\xaf\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "QPIGS",
        description: "General Status Parameters inquiry",
        help: " -- queries the value of various metrics from the Inverter",
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
            FieldDef::new("PV1 Input Current", Float, "A").meta("mdi:solar-power", "current", ""),
            FieldDef::new("PV1 Input Voltage", Float, "V").meta("mdi:solar-power", "voltage", ""),
            FieldDef::new("Battery Voltage from SCC", Float, "V").meta("mdi:battery-outline", "voltage", ""),
            FieldDef::new("Battery Discharge Current", Int, "A").meta("mdi:battery-negative", "current", ""),
            FieldDef::new("Device Status", Flags(DEVICE_STATUS), ""),
            FieldDef::new("Battery Voltage Offset for Fans On", Int, "10mV"),
            FieldDef::new("EEPROM Version", Int, ""),
            FieldDef::new("PV1 Charging Power", Int, "W").meta("mdi:solar-power", "power", "measurement"),
            FieldDef::new(
                "Device Status2",
                Flags(&["Is Charging to Float", "Is Switched On", "Is Dustproof Installed"]),
                "",
            ),
            FieldDef::new("Solar Feed to Grid", OptionList(&["Disabled", "Enabled"]), ""),
            FieldDef::new(
                "Country",
                Keyed(&[("00", "India"), ("01", "Germany"), ("02", "South America")]),
                "",
            ),
            FieldDef::new("Solar Feed to Grid Power", Int, "W"),
        ],
        test_responses: &[
            b"(227.2 50.0 230.3 50.0 0829 0751 010 447 54.50 020 100 0553 14.0 368.7 54.51 000 10110110 00 00 00856 010 1 01 0000~\xcc\r",
        ],
        ..QUERY
    },
    CommandDefinition {
        code: "QPIGS2",
        description: "General Status Parameters inquiry 2",
        help: " -- queries the value of various metrics from the Inverter 2",
        fields: &[
            FieldDef::new("PV2 Input Current", Float, "A").meta("mdi:solar-power", "current", ""),
            FieldDef::new("PV2 Input Voltage", Float, "V").meta("mdi:solar-power", "voltage", ""),
            FieldDef::new("PV2 Charging Power", Int, "W").meta("mdi:solar-power", "power", "measurement"),
        ],
        test_responses: &[b"(03.1 327.3 01026\xc5d\r"],
        ..QUERY
    },
    CommandDefinition {
        code: "QPGS",
        description: "Parallel Information inquiry",
        help: " -- example: QPGS1 queries the values of various metrics from instance 1 of parallel setup Inverters (numbers from 0)",
        regex: Some(r"QPGS(\d+)$"),
        fields: &[
            FieldDef::new("Parallel instance number", OptionList(&["Not valid", "valid"]), ""),
            FieldDef::new("Serial number", Str, ""),
            FieldDef::new(
                "Work mode",
                Keyed(&[
                    ("P", "Power On Mode"),
                    ("S", "Standby Mode"),
                    ("L", "Line Mode"),
                    ("B", "Battery Mode"),
                    ("F", "Fault Mode"),
                    ("H", "Power Saving Mode"),
                    ("D", "Shutdown Mode"),
                ]),
                "",
            ),
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
            FieldDef::new("PV1 Input Voltage", Float, "V"),
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
        ],
        ..QUERY
    },
];
