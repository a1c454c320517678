//! Append-only JSON-lines log of pin decisions
//!
//! Written only when `PINPROBE_DEBUG_LOG_PATH` is set, so a test run can
//! collect every accept/reject decision across stacks in one file.

use once_cell::sync::Lazy;
use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Environment variable naming the log file
pub const DEBUG_LOG_ENV: &str = "PINPROBE_DEBUG_LOG_PATH";

static LOG_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

fn debug_log_path() -> Option<PathBuf> {
    let path = PathBuf::from(env::var_os(DEBUG_LOG_ENV)?);
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    Some(path)
}

fn event_line(ts: u128, location: &str, message: &str, data: &str) -> String {
    serde_json::json!({
        "id": format!("pin_{:08x}", ts),
        "timestamp": ts,
        "location": location,
        "message": message,
        "data": data,
    })
    .to_string()
}

pub fn log_pin_event(location: &str, message: &str, data: &str) {
    let Some(path) = debug_log_path() else {
        return;
    };
    let _guard = LOG_LOCK.lock().ok();
    if let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let _ = writeln!(file, "{}", event_line(ts, location, message, data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_line_escapes_values() {
        let line = event_line(0x1234, "platform.rs:post_connect", "reject", "reason=\"x\"\nnext");
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], "pin_00001234");
        assert_eq!(value["data"], "reason=\"x\"\nnext");
        assert!(!line.contains('\n'));
    }
}
