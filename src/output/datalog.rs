use crate::output::Formatter;
use crate::prelude::*;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Appends one JSON object per result to a file.
#[derive(Debug, Clone)]
pub struct DatalogWriter {
    file: Arc<Mutex<std::fs::File>>,
    path: String,
    lines_written: Arc<Mutex<u64>>,
}

impl DatalogWriter {
    pub fn new(path: &str) -> Result<Self> {
        info!("Opening datalog file at {}", path);

        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to open datalog file {}: {}", path, e);
                return Err(e.into());
            }
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)) {
                error!("Failed to set permissions on datalog file {}: {}", path, e);
                return Err(e.into());
            }
        }

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: path.to_string(),
            lines_written: Arc::new(Mutex::new(0)),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn write(&self, device: &str, result: &CommandResult, formatter: &Formatter) -> Result<()> {
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

        let mut json_data = serde_json::Map::new();
        json_data.insert("utc_timestamp".to_string(), serde_json::Value::Number(timestamp.into()));
        json_data.insert("device".to_string(), serde_json::Value::String(device.to_string()));
        json_data.insert("command".to_string(), serde_json::Value::String(result.command.clone()));
        if result.error {
            json_data.insert("errors".to_string(), result.error_messages.clone().into());
        }
        json_data.insert(
            "readings".to_string(),
            serde_json::Value::Object(formatter.readings(result)?),
        );

        let json_string = serde_json::to_string(&serde_json::Value::Object(json_data))?;

        let mut file = self.file.lock().map_err(|_| anyhow!("Failed to lock datalog file"))?;
        if let Err(e) = writeln!(file, "{}", json_string).and_then(|_| file.flush()) {
            error!("Failed to write to datalog file {}: {}", self.path, e);
            return Err(e.into());
        }

        let mut lines_written = self
            .lines_written
            .lock()
            .map_err(|_| anyhow!("Failed to lock lines counter"))?;
        *lines_written += 1;
        debug!("{} results stored in {}", *lines_written, self.path);

        Ok(())
    }
}
