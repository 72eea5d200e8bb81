//! Field decoding primitives shared by every protocol dialect.

use crate::prelude::*;
use crate::protocol::definition::{DecodeKind, FieldDef, Metadata};

pub const UNKNOWN_VALUE: &str = "Unknown value in response";

fn reading(field: &FieldDef, value: Value) -> Reading {
    Reading::new(field.label, value, field.unit).with_metadata(field.meta)
}

fn invalid(field: &FieldDef, token: &str, what: &str) -> DecodeError {
    DecodeError::InvalidValue(format!(
        "unable to decode '{}' as {} for {}",
        token, what, field.label
    ))
}

fn parse_f64(field: &FieldDef, token: &str) -> Result<f64, DecodeError> {
    token
        .trim()
        .parse::<f64>()
        .map_err(|_| invalid(field, token, "a number"))
}

fn scaled(raw: f64, div: u32) -> Value {
    if div <= 1 {
        Value::Int(raw as i64)
    } else {
        Value::Float(raw / div as f64)
    }
}

// Text decoding {{{

/// Decodes one text token according to its field definition and appends the
/// resulting reading(s). Problems are recorded on the result and the field skipped.
pub fn decode_token(field: &FieldDef, token: &str, result: &mut CommandResult) {
    use DecodeKind::*;

    let value = match field.kind {
        Exclude | Discard(_) | Rem => return,
        Int => match token.trim().parse::<i64>() {
            Ok(v) => Value::Int(v),
            Err(_) => return result.add_error(invalid(field, token, "int")),
        },
        Float | TenInt => match parse_f64(field, token) {
            Ok(v) => Value::Float(v),
            Err(e) => return result.add_error(e),
        },
        Div(div) => match parse_f64(field, token) {
            Ok(v) => Value::Float(v / div as f64),
            Err(e) => return result.add_error(e),
        },
        Mul(mul) => match parse_f64(field, token) {
            Ok(v) => Value::Float(v * mul as f64),
            Err(e) => return result.add_error(e),
        },
        OptionList(options) => {
            let option = token
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| options.get(i));
            match option {
                Some(option) => Value::from(*option),
                None => return result.add_error(invalid(field, token, "option")),
            }
        }
        Keyed(map) => {
            let token = token.trim();
            map.iter()
                .find(|(key, _)| *key == token)
                .map(|(_, label)| Value::from(*label))
                .unwrap_or_else(|| Value::from(token))
        }
        Flags(names) => return decode_flags(field, names, token, result),
        StatFlags(names) => return decode_stat_flags(field, names, token, result),
        EnFlags(map) => return decode_enflags(map, token, result),
        _ => Value::from(token),
    };

    result.push(reading(field, value));
}

fn decode_flags(field: &FieldDef, names: &[&str], token: &str, result: &mut CommandResult) {
    if token.chars().any(|c| c != '0' && c != '1') {
        return result.add_error(invalid(field, token, "flags"));
    }

    for (name, flag) in names.iter().zip(token.chars()) {
        if name.is_empty() {
            continue;
        }
        result.push(
            Reading::new(*name, Value::Int(i64::from(flag == '1')), field.unit)
                .with_metadata(field.meta),
        );
    }
}

fn decode_stat_flags(field: &FieldDef, names: &[&str], token: &str, result: &mut CommandResult) {
    for (name, flag) in names.iter().zip(token.chars()) {
        if flag == '1' && !name.is_empty() {
            result.push(Reading::new(*name, Value::Int(1), field.unit));
        }
    }
}

fn decode_enflags(map: &[(char, &str)], token: &str, result: &mut CommandResult) {
    let mut status = "unknown";
    for c in token.chars() {
        match c {
            'E' => status = "enabled",
            'D' => status = "disabled",
            _ => match map.iter().find(|(letter, _)| *letter == c) {
                Some((_, name)) => result.push(Reading::new(*name, Value::from(status), "")),
                None => debug!("skipping unknown enflag '{}'", c),
            },
        }
    }
}

/// Decodes tokens by position. Extra tokens become "Unknown value" readings,
/// too few tokens invalidate the whole response.
pub fn decode_indexed(fields: &[FieldDef], tokens: &[String], result: &mut CommandResult) {
    if tokens.len() < fields.len() {
        result.invalidate(DecodeError::Insufficient {
            got: tokens.len(),
            expected: fields.len(),
        });
        return;
    }

    for (i, token) in tokens.iter().enumerate() {
        match fields.get(i) {
            Some(field) => decode_token(field, token, result),
            None => result.push(Reading::new(UNKNOWN_VALUE, Value::from(token.as_str()), "")),
        }
    }
}

/// Decodes `KEY\tVALUE` lines in field-definition order; keys without a
/// definition are ignored.
pub fn decode_keyed(fields: &[FieldDef], lines: &[String], result: &mut CommandResult) {
    let pairs: Vec<(&str, &str)> = lines
        .iter()
        .filter_map(|line| line.split_once('\t'))
        .collect();

    for (key, _) in &pairs {
        if !fields.iter().any(|f| f.key == Some(*key)) {
            debug!("no definition for key {}", key);
        }
    }

    for field in fields {
        let Some(key) = field.key else { continue };
        if let Some((_, value)) = pairs.iter().find(|(k, _)| *k == key) {
            decode_token(field, value, result);
        }
    }
}

/// Whole payload as a single field (first definition), or as a raw
/// "response" reading when the command has no fields.
pub fn decode_whole(fields: &[FieldDef], payload: &str, result: &mut CommandResult) {
    match fields.first() {
        Some(field) => decode_token(field, payload, result),
        None => result.push(Reading::new("response", Value::from(payload), "")),
    }
}
// }}}

// Binary decoding {{{

/// Bytes consumed by one binary field; `None` means "the rest of the value".
pub fn binary_size(kind: &DecodeKind) -> Option<usize> {
    use DecodeKind::*;

    match kind {
        Hex(n) | Ascii(n) | Discard(n) | Uptime(n) => Some(*n),
        U8 | U8Plus1 | U8Offset(_) | Int | Keyed(_) => Some(1),
        LeU16(_) | LeU16Raw | LeI16(_) | BeU16(_) | BeU16Offset(..) | Flags(_) | JkCurrent => {
            Some(2)
        }
        LeF32 | BeU32(_) => Some(4),
        Loop(n, inner) => binary_size(inner).map(|s| s * n),
        Lookup { .. } => Some(0),
        _ => None,
    }
}

fn array<const N: usize>(bytes: &[u8]) -> Option<[u8; N]> {
    bytes.get(..N)?.try_into().ok()
}

fn ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|b| **b != 0)
        .map(|b| *b as char)
        .collect()
}

pub fn uptime(seconds: u64) -> String {
    format!(
        "{}D{}H{}M{}S",
        seconds / 86400,
        (seconds % 86400) / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Decodes one binary value (already cut to size) into zero or more readings.
pub fn decode_binary(
    label: &str,
    kind: &DecodeKind,
    unit: &str,
    meta: Metadata,
    bytes: &[u8],
    result: &mut CommandResult,
) {
    use DecodeKind::*;

    let short = |result: &mut CommandResult| {
        result.add_error(DecodeError::InvalidValue(format!(
            "not enough data to decode {}",
            label
        )))
    };

    let mut unit = unit.to_owned();
    let value = match kind {
        Discard(_) | Exclude | Rem | Lookup { .. } => return,
        Hex(_) => Value::Text(hex::encode(bytes)),
        Ascii(_) | Str => Value::Text(ascii(bytes)),
        AsciiAfter(prefix) => {
            let text = ascii(bytes);
            Value::Text(text.strip_prefix(prefix).unwrap_or(&text).to_owned())
        }
        U8 | Int | U8Plus1 => match bytes.first() {
            Some(b) if matches!(kind, U8Plus1) => Value::Int(i64::from(*b) + 1),
            Some(b) => Value::Int(i64::from(*b)),
            None => return short(result),
        },
        Keyed(map) => match bytes.first() {
            Some(b) => {
                let key = format!("{:02X}", b);
                map.iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| Value::from(*v))
                    .unwrap_or(Value::Text(key))
            }
            None => return short(result),
        },
        LeU16(div) => match array::<2>(bytes) {
            Some(b) => scaled(f64::from(u16::from_le_bytes(b)), *div),
            None => return short(result),
        },
        LeU16Raw => match array::<2>(bytes) {
            Some(b) => {
                unit = format!("{:02x} {:02x}", b[0], b[1]);
                Value::Float(f64::from(u16::from_le_bytes(b)) / 1000.0)
            }
            None => return short(result),
        },
        LeI16(div) => match array::<2>(bytes) {
            Some(b) => scaled(f64::from(i16::from_le_bytes(b)), *div),
            None => return short(result),
        },
        LeF32 => match array::<4>(bytes) {
            Some(b) => Value::Float((f64::from(f32::from_le_bytes(b)) * 10000.0).round() / 10000.0),
            None => return short(result),
        },
        BeU16(div) => match array::<2>(bytes) {
            Some(b) => scaled(f64::from(u16::from_be_bytes(b)), *div),
            None => return short(result),
        },
        BeU16Offset(offset, div) => match array::<2>(bytes) {
            Some(b) => scaled((i64::from(u16::from_be_bytes(b)) - offset) as f64, *div),
            None => return short(result),
        },
        BeU32(div) => match array::<4>(bytes) {
            Some(b) => scaled(f64::from(u32::from_be_bytes(b)), *div),
            None => return short(result),
        },
        U8Offset(offset) => match bytes.first() {
            Some(b) => Value::Int(i64::from(*b) - offset),
            None => return short(result),
        },
        Uptime(_) => {
            let seconds = bytes
                .iter()
                .rev()
                .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
            Value::Text(uptime(seconds))
        }
        Flags(names) => {
            let bits: String = bytes.iter().map(|b| format!("{:08b}", b)).collect();
            let field = FieldDef::new("", *kind, "");
            return decode_flags(&field, names, &bits, result);
        }
        JkCells => {
            result.push(Reading::new(
                "Cell Count",
                Value::Int((bytes.len() / 3) as i64),
                "",
            ));
            for cell in bytes.chunks_exact(3) {
                result.push(Reading::new(
                    format!("Cell {} Voltage", cell[0]),
                    Value::Int(i64::from(u16::from_be_bytes([cell[1], cell[2]]))),
                    "mV",
                ));
            }
            return;
        }
        JkCurrent => match array::<2>(bytes) {
            Some(b) => {
                let raw = u16::from_be_bytes(b);
                let direction = if raw & 0x8000 == 0 { "discharge" } else { "charge" };
                result.push(Reading::new("Battery Current Direction", Value::from(direction), ""));
                Value::Float(f64::from(raw & 0x7fff) / 100.0)
            }
            None => return short(result),
        },
        _ => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
    };

    result.push(Reading::new(label, value, unit).with_metadata(meta));
}

fn lookup(field: &FieldDef, index: &str, prefix: &str, result: &mut CommandResult) {
    let position = result
        .readings
        .iter()
        .find(|r| r.label == index)
        .and_then(|r| match r.value {
            Value::Int(i) => Some(i),
            _ => None,
        });

    let found = position.and_then(|n| {
        let key = format!("{}{:02}", prefix, n);
        result.readings.iter().find(|r| r.label == key).cloned()
    });

    match found {
        Some(r) => result.push(Reading::new(field.label, r.value, r.unit).with_metadata(field.meta)),
        None => result.add_error(DecodeError::InvalidValue(format!(
            "unable to resolve {} from {}",
            field.label, index
        ))),
    }
}

/// Walks a binary record field by field.
pub fn decode_positional(fields: &[FieldDef], data: &[u8], result: &mut CommandResult) {
    let mut rest = data;

    for field in fields {
        match field.kind {
            DecodeKind::Rem => {
                debug!("{} bytes remain undecoded", rest.len());
                return;
            }
            DecodeKind::Lookup { index, prefix } => {
                lookup(field, index, prefix, result);
                continue;
            }
            DecodeKind::Loop(count, inner) => {
                let size = binary_size(inner).unwrap_or(1);
                for i in 1..=count {
                    if rest.len() < size {
                        result.add_error(DecodeError::InvalidValue(format!(
                            "record too short for {}{:02}",
                            field.label, i
                        )));
                        return;
                    }
                    let (chunk, tail) = rest.split_at(size);
                    let label = format!("{}{:02}", field.label, i);
                    decode_binary(&label, inner, field.unit, field.meta, chunk, result);
                    rest = tail;
                }
                continue;
            }
            _ => {}
        }

        let size = binary_size(&field.kind).unwrap_or(rest.len());
        if rest.len() < size {
            result.add_error(DecodeError::InvalidValue(format!(
                "record too short for {}",
                field.label
            )));
            return;
        }
        let (chunk, tail) = rest.split_at(size);
        decode_binary(field.label, &field.kind, field.unit, field.meta, chunk, result);
        rest = tail;
    }
}
// }}}

#[cfg(test)]
mod tests {
    use super::*;
    use DecodeKind::*;

    fn result() -> CommandResult {
        CommandResult::new("TEST", "test", b"")
    }

    fn tokens(s: &str) -> Vec<String> {
        s.split(' ').map(str::to_owned).collect()
    }

    #[test]
    fn ints_tolerate_leading_zeros() {
        let mut r = result();
        decode_token(&FieldDef::new("Max AC Charging Current", Int, "A"), "0030", &mut r);
        assert_eq!(r.readings[0].value, Value::Int(30));
        assert!(!r.error);
    }

    #[test]
    fn bad_int_is_reported_and_skipped() {
        let mut r = result();
        decode_token(&FieldDef::new("Bus Voltage", Int, "V"), "---", &mut r);
        assert!(r.readings.is_empty());
        assert!(r.error);
        assert!(r.is_valid);
    }

    #[test]
    fn ten_int_is_not_scaled() {
        let mut r = result();
        decode_token(&FieldDef::new("Battery Voltage", TenInt, "V"), "10.0", &mut r);
        assert_eq!(r.readings[0].value, Value::Float(10.0));
    }

    #[test]
    fn division_and_multiplication() {
        let mut r = result();
        decode_token(&FieldDef::new("Voltage", Div(1000), "V"), "12865", &mut r);
        decode_token(&FieldDef::new("Grid Voltage", Div(10), "V"), "2232", &mut r);
        decode_token(&FieldDef::new("AC output voltage", Mul(100), "V"), "23", &mut r);
        assert_eq!(r.readings[0].value, Value::Float(12.865));
        assert_eq!(r.readings[1].value, Value::Float(223.2));
        assert_eq!(r.readings[2].value, Value::Float(2300.0));
    }

    #[test]
    fn options() {
        static BOOT: &[&str] = &["No", "Yes"];
        let mut r = result();
        decode_token(&FieldDef::new("Has DSP Bootstrap", OptionList(BOOT), ""), "1", &mut r);
        assert_eq!(r.readings[0].value, Value::from("Yes"));

        decode_token(&FieldDef::new("Has DSP Bootstrap", OptionList(BOOT), ""), "7", &mut r);
        assert_eq!(r.readings.len(), 1);
        assert!(r.error);
    }

    #[test]
    fn keyed_passes_unknown_keys_through() {
        static MODES: &[(&str, &str)] = &[("B", "Battery"), ("L", "Line")];
        let mut r = result();
        decode_token(&FieldDef::new("Device Mode", Keyed(MODES), ""), "B", &mut r);
        decode_token(&FieldDef::new("Device Mode", Keyed(MODES), ""), "Z", &mut r);
        assert_eq!(r.readings[0].value, Value::from("Battery"));
        assert_eq!(r.readings[1].value, Value::from("Z"));
        assert!(!r.error);
    }

    #[test]
    fn flags_and_stat_flags() {
        static NAMES: &[&str] = &["Is SBU Priority", "", "Is Load On"];
        let mut r = result();
        decode_token(&FieldDef::new("Device Status", Flags(NAMES), ""), "101", &mut r);
        assert_eq!(r.readings.len(), 2);
        assert_eq!(r.readings[0].label, "Is SBU Priority");
        assert_eq!(r.readings[0].value, Value::Int(1));
        assert_eq!(r.readings[1].value, Value::Int(1));

        let mut r = result();
        decode_token(&FieldDef::new("Device Status", Flags(NAMES), ""), "1x1", &mut r);
        assert!(r.error);
        assert!(r.readings.is_empty());

        let mut r = result();
        decode_token(&FieldDef::new("Warnings", StatFlags(NAMES), ""), "001", &mut r);
        assert_eq!(r.readings.len(), 1);
        assert_eq!(r.readings[0].label, "Is Load On");

        let mut r = result();
        decode_token(&FieldDef::new("Warnings", StatFlags(NAMES), ""), "000", &mut r);
        assert!(r.readings.is_empty());
        assert!(!r.error);
    }

    #[test]
    fn enflags_walk_left_to_right() {
        static MAP: &[(char, &str)] = &[('a', "Buzzer"), ('b', "Overload Bypass")];
        let mut r = result();
        decode_token(&FieldDef::new("Device Status", EnFlags(MAP), ""), "EaqDb", &mut r);
        assert_eq!(r.readings.len(), 2);
        assert_eq!(r.readings[0].value, Value::from("enabled"));
        assert_eq!(r.readings[1].label, "Overload Bypass");
        assert_eq!(r.readings[1].value, Value::from("disabled"));
    }

    #[test]
    fn indexed_extra_and_missing_tokens() {
        static FIELDS: &[FieldDef] = &[
            FieldDef::new("A", Int, ""),
            FieldDef::new("B", Float, "V"),
        ];

        let mut r = result();
        decode_indexed(FIELDS, &tokens("1 2.5 extra"), &mut r);
        assert_eq!(r.readings.len(), 3);
        assert_eq!(r.readings[2].label, UNKNOWN_VALUE);
        assert_eq!(r.readings[2].value, Value::from("extra"));
        assert!(!r.error);

        let mut r = result();
        decode_indexed(FIELDS, &tokens("1"), &mut r);
        assert!(!r.is_valid);
        assert_eq!(
            r.error_messages,
            vec!["insufficient number of elements in response. Got 1, expected at least 2"]
        );
    }

    #[test]
    fn keyed_lines_follow_definition_order() {
        static FIELDS: &[FieldDef] = &[
            FieldDef::new("Voltage", Div(1000), "V").keyed("V"),
            FieldDef::new("State of charge", Div(10), "%").keyed("SOC"),
            FieldDef::new("Checksum", Exclude, "").keyed("Checksum"),
        ];
        let lines: Vec<String> = ["SOC\t1000", "V\t12865", "Checksum\tL", "junk"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let mut r = result();
        decode_keyed(FIELDS, &lines, &mut r);
        assert_eq!(r.readings.len(), 2);
        assert_eq!(r.readings[0].label, "Voltage");
        assert_eq!(r.readings[1].value, Value::Float(100.0));
    }

    #[test]
    fn positional_walk() {
        static FIELDS: &[FieldDef] = &[
            FieldDef::new("Header", Hex(2), ""),
            FieldDef::new("Counter", U8, ""),
            FieldDef::new("Voltage Cell", Loop(2, &LeU16(1000)), "V"),
            FieldDef::new("", Discard(1), ""),
            FieldDef::new("Highest Cell", U8Plus1, ""),
            FieldDef::new("Highest Cell Voltage", Lookup { index: "Highest Cell", prefix: "Voltage Cell" }, ""),
            FieldDef::new("Time", Uptime(3), ""),
            FieldDef::new("Name", Ascii(4), ""),
            FieldDef::new("", Rem, ""),
        ];
        let data = [
            0x55, 0xaa, 7, 0x2e, 0x0d, 0x28, 0x0d, 0xff, 1, 0x3d, 0x5a, 0x01, b'J', b'K', 0, 0, 9, 9,
        ];

        let mut r = result();
        decode_positional(FIELDS, &data, &mut r);
        assert!(!r.error, "{:?}", r.error_messages);
        assert_eq!(r.get("header").map(|r| &r.value), Some(&Value::from("55aa")));
        assert_eq!(r.get("counter").map(|r| &r.value), Some(&Value::Int(7)));
        assert_eq!(r.get("voltage_cell01").map(|r| &r.value), Some(&Value::Float(3.374)));
        assert_eq!(r.get("highest_cell").map(|r| &r.value), Some(&Value::Int(2)));
        assert_eq!(
            r.get("highest_cell_voltage").map(|r| &r.value),
            Some(&Value::Float(3.368))
        );
        // 0x015a3d seconds
        assert_eq!(r.get("time").map(|r| &r.value), Some(&Value::from("1D0H37M17S")));
        assert_eq!(r.get("name").map(|r| &r.value), Some(&Value::from("JK")));
    }

    #[test]
    fn positional_short_record() {
        static FIELDS: &[FieldDef] = &[FieldDef::new("Voltage", LeF32, "V")];
        let mut r = result();
        decode_positional(FIELDS, &[0x00, 0x01], &mut r);
        assert!(r.error);
        assert!(r.readings.is_empty());
    }

    #[test]
    fn binary_flags_are_msb_first() {
        static NAMES: &[&str] = &[
            "", "", "", "", "", "", "", "", "", "", "", "", "Battery Down",
            "Equalization Switching State", "Discharge MOS On", "Charge MOS On",
        ];
        let mut r = result();
        decode_binary("Status", &Flags(NAMES), "", Metadata::NONE, &[0x00, 0x03], &mut r);
        assert_eq!(r.readings.len(), 4);
        assert_eq!(r.get("discharge_mos_on").map(|r| &r.value), Some(&Value::Int(1)));
        assert_eq!(r.get("battery_down").map(|r| &r.value), Some(&Value::Int(0)));
    }

    #[test]
    fn jk_current_direction() {
        let mut r = result();
        decode_binary("Battery Current", &JkCurrent, "A", Metadata::NONE, &[0x81, 0xc5], &mut r);
        assert_eq!(r.readings[0].value, Value::from("charge"));
        assert_eq!(r.readings[1].value, Value::Float(4.53));
    }
}
