#![allow(dead_code)]

pub use powermon::dispatcher::Dispatcher;
pub use powermon::output::{FormatKind, Formatter};
pub use powermon::port::TestPort;
pub use powermon::prelude::*;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_config(yaml: &str) -> Result<ConfigWrapper> {
    Ok(ConfigWrapper::from_config(Config::from_str(yaml)?))
}

/// A dispatcher over a test port answering with fixture `response_number`.
pub fn test_dispatcher(id: ProtocolId, response_number: usize) -> Result<Dispatcher> {
    Ok(Dispatcher::new(
        "test",
        Protocol::new(id, None)?,
        Box::new(TestPort::new(response_number)),
    ))
}

pub fn format(kind: FormatKind, result: &CommandResult) -> Result<Vec<String>> {
    let output = config::Output {
        format: Some(kind),
        ..Default::default()
    };
    Formatter::new(&output)?.format(result)
}

pub fn value_of(result: &CommandResult, slug: &str) -> Option<String> {
    result.get(slug).map(|r| r.value.to_string())
}
