use crate::output::FormatKind;
use crate::prelude::*;
use crate::protocol::definition::Metadata;
use crate::result::slugify;

use regex::Regex;

const PAD: usize = 1;
const MIN_PARAMETER: usize = 9;
const MIN_VALUE: usize = 6;
const MIN_UNIT: usize = 5;

/// One line of output before it is laid out.
#[derive(Clone, Debug, PartialEq)]
struct Row {
    key: String,
    value: String,
    unit: String,
    metadata: Metadata,
}

impl Row {
    fn new(key: impl Into<String>, value: impl ToString, unit: &str) -> Self {
        Self {
            key: key.into(),
            value: value.to_string(),
            unit: unit.to_owned(),
            metadata: Metadata::NONE,
        }
    }
}

/// Renders a `CommandResult` according to one configured output.
#[derive(Clone, Debug)]
pub struct Formatter {
    kind: FormatKind,
    filter: Option<Regex>,
    excl_filter: Option<Regex>,
    remove_spaces: bool,
    keep_case: bool,
    extra_info: bool,
}

impl Formatter {
    pub fn new(output: &config::Output) -> Result<Self> {
        let compile = |pattern: &Option<String>| -> Result<Option<Regex>> {
            pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|err| file_error_with_source!(err, "bad output filter"))
        };

        Ok(Self {
            kind: output.format(),
            filter: compile(&output.filter)?,
            excl_filter: compile(&output.excl_filter)?,
            remove_spaces: output.remove_spaces,
            keep_case: output.keep_case,
            extra_info: output.extra_info,
        })
    }

    pub fn kind(&self) -> FormatKind {
        self.kind
    }

    pub fn key(&self, label: &str) -> String {
        let mut key = label.to_owned();
        if self.remove_spaces {
            key = key.replace(' ', "_");
        }
        if !self.keep_case {
            key = key.to_lowercase();
        }
        key
    }

    /// Exclusion wins over inclusion; both match against the slug.
    pub fn is_wanted(&self, label: &str) -> bool {
        let slug = slugify(label);
        if self.excl_filter.as_ref().is_some_and(|re| re.is_match(&slug)) {
            return false;
        }
        self.filter.as_ref().map_or(true, |re| re.is_match(&slug))
    }

    fn rows(&self, result: &CommandResult) -> Vec<Row> {
        let mut rows = Vec::new();

        if self.extra_info {
            rows.push(Row::new("command", &result.command, ""));
            rows.push(Row::new("description", &result.description, ""));
        }

        for reading in result.readings.iter().filter(|r| self.is_wanted(&r.label)) {
            let mut row = Row::new(self.key(&reading.label), &reading.value, &reading.unit);
            row.metadata = reading.metadata;
            rows.push(row);
        }

        rows
    }

    fn error_rows(result: &CommandResult) -> Vec<Row> {
        if !result.error {
            return Vec::new();
        }

        let mut rows = vec![Row::new("Error Count", result.error_messages.len(), "")];
        for (i, message) in result.error_messages.iter().enumerate() {
            rows.push(Row::new(format!("Error #{}", i), message, ""));
        }
        rows
    }

    /// Output lines; JSON always gives exactly one.
    pub fn format(&self, result: &CommandResult) -> Result<Vec<String>> {
        Ok(match self.kind {
            FormatKind::Simple => self.simple(result),
            FormatKind::Table => self.table(result),
            FormatKind::Json => vec![self.json(result)?],
            FormatKind::Raw => self.raw(result),
        })
    }

    fn simple(&self, result: &CommandResult) -> Vec<String> {
        let mut lines = self.simple_errors(result);

        for row in self.rows(result) {
            let mut line = format!("{}={}{}", row.key, row.value, row.unit);
            if self.extra_info {
                for extra in [row.metadata.device_class, row.metadata.icon, row.metadata.state_class]
                    .into_iter()
                    .flatten()
                {
                    line.push(' ');
                    line.push_str(extra);
                }
            }
            lines.push(line);
        }

        lines
    }

    fn table(&self, result: &CommandResult) -> Vec<String> {
        let mut rows = Self::error_rows(result);
        if result.readings.is_empty() {
            rows.push(Row::new("Error", "No readings in result", ""));
        }
        rows.extend(self.rows(result));

        let width = |min: usize, f: fn(&Row) -> usize| {
            rows.iter().map(f).max().unwrap_or(0).max(min) + PAD
        };
        let width_p = width(MIN_PARAMETER, |r| r.key.chars().count());
        let width_v = width(MIN_VALUE, |r| r.value.chars().count());
        let mut width_u = width(MIN_UNIT, |r| r.unit.chars().count());

        let title = format!("Command: {} - {}", result.command, result.description);
        let mut line_length = width_p + width_v + width_u + 7;
        if line_length < title.chars().count() + 7 {
            line_length = title.chars().count() + 7;
            width_u = line_length - (width_p + width_v + 7);
        }

        let row = |key: &str, value: &str, unit: &str| {
            format!("{:<width_p$} {:<width_v$} {:<width_u$}", key, value, unit)
                .trim_end()
                .to_owned()
        };

        let mut lines = vec!["-".repeat(line_length), title, "-".repeat(line_length)];
        lines.push(row("Parameter", "Value", "Unit"));
        lines.extend(rows.iter().map(|r| row(&r.key, &r.value, &r.unit)));
        lines
    }

    /// `key -> {value, unit}` for every wanted reading, in decode order.
    pub fn readings(&self, result: &CommandResult) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut readings = serde_json::Map::new();

        for reading in result.readings.iter().filter(|r| self.is_wanted(&r.label)) {
            let mut entry = serde_json::Map::new();
            entry.insert("value".to_string(), serde_json::to_value(&reading.value)?);
            entry.insert("unit".to_string(), reading.unit.clone().into());
            if self.extra_info && !reading.metadata.is_empty() {
                entry.insert("metadata".to_string(), serde_json::to_value(reading.metadata)?);
            }
            readings.insert(self.key(&reading.label), serde_json::Value::Object(entry));
        }

        Ok(readings)
    }

    fn json(&self, result: &CommandResult) -> Result<String> {
        let mut object = serde_json::Map::new();

        if self.extra_info {
            object.insert("command".to_string(), result.command.clone().into());
            object.insert("description".to_string(), result.description.clone().into());
        }
        if result.error {
            object.insert("errors".to_string(), result.error_messages.clone().into());
        }
        object.extend(self.readings(result)?);

        Ok(serde_json::Value::Object(object).to_string())
    }

    fn raw(&self, result: &CommandResult) -> Vec<String> {
        let mut lines = self.simple_errors(result);
        if !result.raw_response.is_empty() {
            lines.push(result.raw_response_lossy());
        }
        lines
    }

    fn simple_errors(&self, result: &CommandResult) -> Vec<String> {
        Self::error_rows(result)
            .into_iter()
            .map(|row| format!("{}: {}", row.key, row.value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> CommandResult {
        let mut result = CommandResult::new("QPIGS", "General Status Parameters inquiry", b"(230.0 50.0\r");
        result.push(Reading::new("AC Output Voltage", Value::Float(230.0), "V"));
        result.push(
            Reading::new("Battery Voltage", Value::Float(54.1), "V").with_metadata(Metadata {
                icon: Some("mdi:battery-outline"),
                device_class: Some("voltage"),
                state_class: Some("measurement"),
            }),
        );
        result.push(Reading::new("Battery Capacity", Value::Int(95), "%"));
        result
    }

    fn formatter(format: FormatKind, tweak: impl FnOnce(&mut config::Output)) -> Formatter {
        let mut output = config::Output {
            format: Some(format),
            ..Default::default()
        };
        tweak(&mut output);
        Formatter::new(&output).unwrap_or_else(|err| panic!("{}", err))
    }

    #[test]
    fn simple() -> Result<()> {
        let lines = formatter(FormatKind::Simple, |_| {}).format(&result())?;
        assert_eq!(
            lines,
            vec![
                "ac_output_voltage=230.0V",
                "battery_voltage=54.1V",
                "battery_capacity=95%"
            ]
        );

        let lines = formatter(FormatKind::Simple, |o| {
            o.filter = Some("^battery".into());
            o.excl_filter = Some("capacity$".into());
            o.extra_info = true;
        })
        .format(&result())?;
        assert_eq!(
            lines,
            vec![
                "command=QPIGS",
                "description=General Status Parameters inquiry",
                "battery_voltage=54.1V voltage mdi:battery-outline measurement"
            ]
        );
        Ok(())
    }

    #[test]
    fn key_options() {
        let f = formatter(FormatKind::Simple, |o| {
            o.remove_spaces = false;
            o.keep_case = true;
        });
        assert_eq!(f.key("AC Output Voltage"), "AC Output Voltage");
        assert!(f.is_wanted("AC Output Voltage"));

        let f = formatter(FormatKind::Simple, |o| o.keep_case = true);
        assert_eq!(f.key("AC Output Voltage"), "AC_Output_Voltage");
    }

    #[test]
    fn errors_come_first() -> Result<()> {
        let r = CommandResult::failed("QPIGS", "", DecodeError::Nak);
        let lines = formatter(FormatKind::Simple, |_| {}).format(&r)?;
        assert_eq!(lines, vec!["Error Count: 1", "Error #0: command execution failed (NAK)"]);

        let lines = formatter(FormatKind::Raw, |_| {}).format(&r)?;
        assert_eq!(lines.len(), 2);
        Ok(())
    }

    #[test]
    fn table() -> Result<()> {
        let lines = formatter(FormatKind::Table, |_| {}).format(&result())?;
        let title = "Command: QPIGS - General Status Parameters inquiry";

        assert_eq!(lines[0], "-".repeat(title.len() + 7));
        assert_eq!(lines[1], title);
        assert_eq!(lines[3], "Parameter          Value   Unit");
        assert_eq!(lines[4], "ac_output_voltage  230.0   V");
        assert_eq!(lines[6], "battery_capacity   95      %");
        assert_eq!(lines.len(), 7);

        let r = CommandResult::failed("QMOD", "Mode inquiry", TransportError::NoResponse);
        let lines = formatter(FormatKind::Table, |_| {}).format(&r)?;
        assert_eq!(lines[4], "Error Count  1");
        assert_eq!(lines[5], "Error #0     no response received");
        assert_eq!(lines[6], "Error        No readings in result");
        Ok(())
    }

    #[test]
    fn json() -> Result<()> {
        let lines = formatter(FormatKind::Json, |o| o.filter = Some("voltage".into())).format(&result())?;
        assert_eq!(lines.len(), 1);

        let json: serde_json::Value = serde_json::from_str(&lines[0])?;
        assert_eq!(json["ac_output_voltage"]["value"], 230.0);
        assert_eq!(json["ac_output_voltage"]["unit"], "V");
        assert_eq!(json["battery_voltage"]["value"], 54.1);
        assert!(json.get("battery_capacity").is_none());
        assert!(json.get("errors").is_none());
        Ok(())
    }

    #[test]
    fn raw() -> Result<()> {
        let lines = formatter(FormatKind::Raw, |_| {}).format(&result())?;
        assert_eq!(lines, vec!["(230.0 50.0\r"]);
        Ok(())
    }
}
