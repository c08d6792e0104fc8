//! Counters, the bounded recent-error history and their text reports.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Local};

use crate::command_log::function_name;

/// How many errors the recent-error history retains.
pub const ERROR_HISTORY_CAPACITY: usize = 5;

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Framing,
    Crc,
    Unsupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Framing => write!(f, "FRAMING"),
            ErrorKind::Crc => write!(f, "CRC"),
            ErrorKind::Unsupported => write!(f, "UNSUPPORTED"),
        }
    }
}

/// One recorded frame fault.
#[derive(Debug, Clone)]
pub struct ErrorDetail {
    pub timestamp: DateTime<Local>,
    pub kind: ErrorKind,
    pub frame: Vec<u8>,
    pub description: String,
    /// For CRC faults: the correctly computed checksum, wire order.
    pub expected_crc: Option<[u8; 2]>,
    /// Byte offset most relevant to the fault: CRC start for CRC faults,
    /// function-code offset for unsupported functions.
    pub error_position: Option<usize>,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, frame: &[u8], description: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            kind,
            frame: frame.to_vec(),
            description: description.into(),
            expected_crc: None,
            error_position: None,
        }
    }

    /// Multi-line report with a hex dump and a marker under the fault byte.
    pub fn format_detailed(&self) -> String {
        let mut lines = vec![
            format!(
                "[{}] {} ERROR",
                self.timestamp.format(TIMESTAMP_FORMAT),
                self.kind
            ),
            format!("Description: {}", self.description),
        ];
        if let Some(expected) = self.expected_crc {
            lines.push(format!(
                "Expected CRC: {:02X} {:02X}",
                expected[0], expected[1]
            ));
        }
        lines.push(String::new());
        lines.push(format!("Received Frame ({} bytes):", self.frame.len()));

        let mut hex_line = String::from("  ");
        let mut marker_line = String::from("  ");
        for (i, byte) in self.frame.iter().enumerate() {
            if self.error_position == Some(i) {
                hex_line.push_str(&format!("[{byte:02X}] "));
                marker_line.push_str(" ^^  ");
            } else {
                hex_line.push_str(&format!(" {byte:02X}  "));
                marker_line.push_str("     ");
            }
        }
        lines.push(hex_line);
        if let Some(position) = self.error_position {
            lines.push(marker_line);
            lines.push(format!("  Error at byte position {position}"));
        }
        lines.push("=".repeat(70));
        lines.join("\n")
    }
}

/// Session counters plus the bounded error history.
///
/// Counters only ever increase within a session; `reset` starts a new one.
pub struct Statistics {
    pub total_requests: u64,
    pub valid_requests: u64,
    pub invalid_requests: u64,
    pub crc_errors: u64,
    pub framing_errors: u64,
    pub unsupported_function: u64,
    pub responses_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub locks_unlocked: u64,
    pub locks_locked: u64,
    pub device_requests: BTreeMap<u8, u64>,
    pub function_counts: BTreeMap<u8, u64>,
    recent_errors: VecDeque<ErrorDetail>,
    start_time: Instant,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            total_requests: 0,
            valid_requests: 0,
            invalid_requests: 0,
            crc_errors: 0,
            framing_errors: 0,
            unsupported_function: 0,
            responses_sent: 0,
            bytes_received: 0,
            bytes_sent: 0,
            locks_unlocked: 0,
            locks_locked: 0,
            device_requests: BTreeMap::new(),
            function_counts: BTreeMap::new(),
            recent_errors: VecDeque::with_capacity(ERROR_HISTORY_CAPACITY),
            start_time: Instant::now(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Append to the history, evicting the oldest entry once full.
    pub fn add_error(&mut self, error: ErrorDetail) {
        if self.recent_errors.len() == ERROR_HISTORY_CAPACITY {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(error);
    }

    /// Recorded errors, oldest first.
    pub fn recent_errors(&self) -> impl Iterator<Item = &ErrorDetail> {
        self.recent_errors.iter()
    }

    pub fn clear_errors(&mut self) {
        self.recent_errors.clear();
    }

    /// Operator-facing counter report.
    pub fn get_summary(&self) -> String {
        let mut lines = vec![
            "=".repeat(60),
            "MODBUS RTU SLAVE EMULATOR - STATISTICS (CU48)".to_string(),
            "=".repeat(60),
            format!("Runtime: {:.1} seconds", self.start_time.elapsed().as_secs_f64()),
            String::new(),
            "REQUESTS:".to_string(),
            format!("  Total Requests:     {}", self.total_requests),
            format!("  Valid Requests:     {}", self.valid_requests),
            format!("  Invalid Requests:   {}", self.invalid_requests),
            format!("  Responses Sent:     {}", self.responses_sent),
            String::new(),
            "ERRORS:".to_string(),
            format!("  CRC Errors:         {}", self.crc_errors),
            format!("  Framing Errors:     {}", self.framing_errors),
            format!("  Unsupported Func:   {}", self.unsupported_function),
            String::new(),
            "CU48 LOCK OPERATIONS:".to_string(),
            format!("  Locks Unlocked:     {}", self.locks_unlocked),
            format!("  Locks Locked:       {}", self.locks_locked),
            String::new(),
            "DATA TRANSFER:".to_string(),
            format!("  Bytes Received:     {}", self.bytes_received),
            format!("  Bytes Sent:         {}", self.bytes_sent),
            String::new(),
            "PER-DEVICE REQUESTS:".to_string(),
        ];
        for (device, count) in &self.device_requests {
            lines.push(format!("  Device {device:02}:          {count}"));
        }
        lines.push(String::new());
        lines.push("FUNCTION CODE USAGE:".to_string());
        for (function, count) in &self.function_counts {
            lines.push(format!("  {:25}: {count}", function_name(*function)));
        }
        lines.push("=".repeat(60));
        lines.join("\n")
    }

    /// Detailed dump of the bounded history, most recent first.
    pub fn get_recent_errors_summary(&self) -> String {
        if self.recent_errors.is_empty() {
            return "No recent errors".to_string();
        }
        let mut lines = vec![
            format!("LAST {ERROR_HISTORY_CAPACITY} ERRORS (Most Recent First)"),
            "=".repeat(70),
            String::new(),
        ];
        for error in self.recent_errors.iter().rev() {
            lines.push(error.format_detailed());
            lines.push(String::new());
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_evicts_oldest_fifo() {
        let mut stats = Statistics::new();
        for i in 0..7u8 {
            stats.add_error(ErrorDetail::new(
                ErrorKind::Framing,
                &[i],
                format!("error {i}"),
            ));
        }
        let frames: Vec<u8> = stats.recent_errors().map(|e| e.frame[0]).collect();
        assert_eq!(frames, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_format_detailed_marks_position() {
        let mut error = ErrorDetail::new(ErrorKind::Crc, &[0x01, 0x03, 0xAA, 0xBB], "CRC mismatch");
        error.expected_crc = Some([0x12, 0x34]);
        error.error_position = Some(2);
        let report = error.format_detailed();
        assert!(report.contains("CRC ERROR"));
        assert!(report.contains("Expected CRC: 12 34"));
        assert!(report.contains("[AA]"));
        assert!(report.contains("Error at byte position 2"));
    }

    #[test]
    fn test_summaries_label_sections() {
        let mut stats = Statistics::new();
        stats.total_requests = 3;
        stats.device_requests.insert(1, 3);
        stats.function_counts.insert(0x05, 2);
        let summary = stats.get_summary();
        assert!(summary.contains("Total Requests:     3"));
        assert!(summary.contains("Device 01"));
        assert!(summary.contains("Write Single Coil"));

        assert_eq!(stats.get_recent_errors_summary(), "No recent errors");
        stats.add_error(ErrorDetail::new(ErrorKind::Framing, &[0x00], "too short"));
        assert!(stats.get_recent_errors_summary().contains("LAST 5 ERRORS"));
    }
}
