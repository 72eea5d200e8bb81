use clap::Parser;

/// powermon - poll inverters and battery monitors and publish their readings
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read, or the YAML/JSON configuration itself
    #[clap(short = 'c', long = "config", default_value = "powermon.yaml")]
    pub config_file: String,

    /// Run one scheduler pass and exit
    #[clap(short = '1', long = "once")]
    pub once: bool,

    /// Log level, overrides the config file
    #[clap(short = 'l', long = "log-level")]
    pub loglevel: Option<String>,

    /// Optional runtime limit in seconds
    #[clap(short = 't', long = "time")]
    pub runtime: Option<u64>,

    /// Run a single command against the configured device and print the result
    #[clap(short = 'C', long = "command")]
    pub command: Option<String>,

    /// List the commands of the configured protocol
    #[clap(long = "list-commands")]
    pub list_commands: bool,

    /// Debug logging
    #[clap(short = 'D', long = "debug")]
    pub debug: bool,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }

    /// CLI log level, if one was given.
    pub fn loglevel(&self) -> Option<&str> {
        if self.debug {
            Some("debug")
        } else {
            self.loglevel.as_deref()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags() {
        let options = Options::parse_from(["powermon", "-1", "-C", "QPIGS", "-c", "inverter.yaml"]);
        assert!(options.once);
        assert_eq!(options.command.as_deref(), Some("QPIGS"));
        assert_eq!(options.config_file, "inverter.yaml");
        assert_eq!(options.loglevel(), None);

        let options = Options::parse_from(["powermon", "-l", "warn", "-D", "-t", "30"]);
        assert_eq!(options.loglevel(), Some("debug"));
        assert_eq!(options.runtime, Some(30));
        assert_eq!(options.config_file, "powermon.yaml");
    }
}
