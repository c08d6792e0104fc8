//! Per-command audit records handed to the registered observer.

use chrono::{DateTime, Local};

use crate::stats::TIMESTAMP_FORMAT;

/// Human-readable name for a Modbus function code.
///
/// Names the whole standard set so audit records stay readable even for
/// codes this emulator only answers with an exception.
pub fn function_name(function: u8) -> String {
    match function {
        0x01 => "Read Coils".to_string(),
        0x02 => "Read Discrete Inputs".to_string(),
        0x03 => "Read Holding Registers".to_string(),
        0x04 => "Read Input Registers".to_string(),
        0x05 => "Write Single Coil".to_string(),
        0x06 => "Write Single Register".to_string(),
        0x0F => "Write Multiple Coils".to_string(),
        0x10 => "Write Multiple Registers".to_string(),
        other => format!("Unknown (0x{other:02X})"),
    }
}

/// One successfully dispatched command, exception responses included.
#[derive(Debug, Clone)]
pub struct CommandLogEntry {
    pub timestamp: DateTime<Local>,
    pub device_address: u8,
    pub function_code: u8,
    pub function_name: String,
    pub raw_request: Vec<u8>,
    pub raw_response: Vec<u8>,
    pub parameters: String,
    pub result: String,
}

impl CommandLogEntry {
    pub fn format_log(&self) -> String {
        let mut lines = vec![format!(
            "[{}] Device 0x{:02X} - {} (0x{:02X})",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.device_address,
            self.function_name,
            self.function_code
        )];
        if !self.raw_request.is_empty() {
            lines.push(format!(
                "  Request:  {}",
                hex::encode_upper(&self.raw_request)
            ));
        }
        if !self.raw_response.is_empty() {
            lines.push(format!(
                "  Response: {}",
                hex::encode_upper(&self.raw_response)
            ));
        }
        if !self.parameters.is_empty() {
            lines.push(format!("  Parameters: {}", self.parameters));
        }
        if !self.result.is_empty() {
            lines.push(format!("  Result: {}", self.result));
        }
        lines.push("-".repeat(70));
        lines.join("\n")
    }
}
