//! Frame routing, response assembly and bookkeeping for a set of emulated
//! slaves sharing one bus.

use std::collections::BTreeMap;

use chrono::Local;
use log::{debug, warn};

use crate::EmulatorError;
use crate::command_log::{CommandLogEntry, function_name};
use crate::crc::crc16_bytes;
use crate::device::{
    COIL_OFF, COIL_ON, EX_ILLEGAL_FUNCTION, FC_READ_COILS, FC_READ_HOLDING_REGISTERS,
    FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER, SlaveDevice,
};
use crate::frame::{self, FrameBuffer, FrameError};
use crate::stats::{ErrorDetail, ErrorKind, Statistics};

/// Single-slot command-log observer. Registering a new one replaces the old.
pub type CommandObserver = Box<dyn FnMut(&CommandLogEntry) + Send>;

/// The byte-channel collaborator: something that delivers complete inbound
/// frames and accepts response bytes for transmission. Framing (silence
/// detection, buffering) lives behind this trait, not in the emulator.
pub trait ByteChannel {
    type Error;

    /// Deliver the next complete frame, or `None` when nothing is pending.
    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Accept response bytes for transmission.
    fn send(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;
}

pub struct EmulatorBuilder {
    devices: Vec<SlaveDevice>,
    track_error_history: bool,
    observer: Option<CommandObserver>,
}

impl EmulatorBuilder {
    /// Add a slave to the bus. Repeatable; addresses must be unique.
    pub fn device(mut self, device: SlaveDevice) -> Self {
        self.devices.push(device);
        self
    }

    /// Keep (or drop) the bounded recent-error history. Counters are always
    /// maintained.
    pub fn error_history(mut self, enabled: bool) -> Self {
        self.track_error_history = enabled;
        self
    }

    pub fn command_observer(
        mut self,
        observer: impl FnMut(&CommandLogEntry) + Send + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn build(self) -> Result<Emulator, EmulatorError> {
        if self.devices.is_empty() {
            return Err(EmulatorError::NoDevices);
        }
        let mut devices = BTreeMap::new();
        for device in self.devices {
            let address = device.address();
            if devices.insert(address, device).is_some() {
                return Err(EmulatorError::DuplicateDeviceAddress(address));
            }
        }
        Ok(Emulator {
            devices,
            stats: Statistics::new(),
            observer: self.observer,
            track_error_history: self.track_error_history,
            buffer: FrameBuffer::new(),
        })
    }
}

/// Owns the emulated devices, the statistics and the command-log slot.
///
/// Frame handling is synchronous: one frame is fully validated, dispatched
/// and logged before the next is accepted. Wrap the whole emulator in a
/// mutex if it must be shared across threads.
pub struct Emulator {
    devices: BTreeMap<u8, SlaveDevice>,
    stats: Statistics,
    observer: Option<CommandObserver>,
    track_error_history: bool,
    buffer: FrameBuffer,
}

impl Emulator {
    pub fn builder() -> EmulatorBuilder {
        EmulatorBuilder {
            devices: Vec::new(),
            track_error_history: true,
            observer: None,
        }
    }

    pub fn device(&self, address: u8) -> Option<&SlaveDevice> {
        self.devices.get(&address)
    }

    pub fn device_mut(&mut self, address: u8) -> Option<&mut SlaveDevice> {
        self.devices.get_mut(&address)
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut Statistics {
        &mut self.stats
    }

    pub fn reset_statistics(&mut self) {
        self.stats.reset();
    }

    pub fn set_command_observer(
        &mut self,
        observer: impl FnMut(&CommandLogEntry) + Send + 'static,
    ) {
        self.observer = Some(Box::new(observer));
    }

    pub fn clear_command_observer(&mut self) {
        self.observer = None;
    }

    /// Process one complete frame and return the response bytes, if any.
    ///
    /// Invalid frames and frames addressed to devices this emulator does not
    /// own produce no response; on a multi-drop bus every slave overhears
    /// every frame and only the addressed one answers.
    pub fn handle_frame(&mut self, raw: &[u8]) -> Option<Vec<u8>> {
        self.stats.total_requests += 1;
        self.stats.bytes_received += raw.len() as u64;

        let parsed = match frame::decode(raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.record_decode_error(raw, err);
                return None;
            }
        };
        self.stats.valid_requests += 1;

        let address = parsed.address;
        let function = parsed.function;
        let Some(device) = self.devices.get_mut(&address) else {
            debug!("frame for address 0x{address:02X}: device not emulated, staying silent");
            return None;
        };
        *self.stats.device_requests.entry(address).or_insert(0) += 1;
        *self.stats.function_counts.entry(function).or_insert(0) += 1;

        let body = device.process_request(function, parsed.payload);
        let is_exception = body.len() == 3 && (body[1] & 0x80) != 0;

        if is_exception && body[2] == EX_ILLEGAL_FUNCTION {
            self.stats.unsupported_function += 1;
            let mut detail = ErrorDetail::new(
                ErrorKind::Unsupported,
                raw,
                format!("Unsupported function 0x{function:02X}"),
            );
            detail.error_position = Some(1);
            self.record_error(detail);
        }
        if function == FC_WRITE_SINGLE_COIL && !is_exception {
            // Payload length was validated by the device before it echoed.
            let value = u16::from_be_bytes([parsed.payload[2], parsed.payload[3]]);
            if value == COIL_ON {
                self.stats.locks_unlocked += 1;
            } else {
                self.stats.locks_locked += 1;
            }
        }

        let mut response = body;
        response.extend_from_slice(&crc16_bytes(&response));
        self.stats.responses_sent += 1;
        self.stats.bytes_sent += response.len() as u64;

        if let Some(observer) = self.observer.as_mut() {
            let (parameters, result) = render_exchange(function, parsed.payload, &response);
            let entry = CommandLogEntry {
                timestamp: Local::now(),
                device_address: address,
                function_code: function,
                function_name: function_name(function),
                raw_request: raw.to_vec(),
                raw_response: response.clone(),
                parameters,
                result,
            };
            observer(&entry);
        }

        debug!(
            "device 0x{address:02X} answered fc 0x{function:02X} with {} bytes",
            response.len()
        );
        Some(response)
    }

    /// Feed raw bytes through the built-in frame-boundary detector and
    /// handle every complete frame found. Returns the responses in order.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        if let Err(err) = self.buffer.extend(data) {
            warn!("{err}");
            self.stats.framing_errors += 1;
            self.stats.invalid_requests += 1;
            let detail = ErrorDetail::new(ErrorKind::Framing, data, err.to_string());
            self.record_error(detail);
            return Vec::new();
        }
        let mut responses = Vec::new();
        while let Some(frame) = self.buffer.next_frame() {
            if let Some(response) = self.handle_frame(&frame) {
                responses.push(response);
            }
        }
        responses
    }

    /// Serve one pending frame from the channel collaborator.
    ///
    /// Returns `Ok(true)` when a frame was handled, `Ok(false)` when the
    /// channel had nothing pending.
    pub fn poll<C: ByteChannel>(&mut self, channel: &mut C) -> Result<bool, C::Error> {
        let Some(frame) = channel.recv_frame()? else {
            return Ok(false);
        };
        if let Some(response) = self.handle_frame(&frame) {
            channel.send(&response)?;
        }
        Ok(true)
    }

    fn record_decode_error(&mut self, raw: &[u8], err: FrameError) {
        warn!("dropping invalid frame ({} bytes): {err}", raw.len());
        self.stats.invalid_requests += 1;
        let detail = match err {
            FrameError::CrcMismatch {
                expected, position, ..
            } => {
                self.stats.crc_errors += 1;
                let mut detail = ErrorDetail::new(ErrorKind::Crc, raw, err.to_string());
                detail.expected_crc = Some(expected);
                detail.error_position = Some(position);
                detail
            }
            FrameError::TooShort { .. } | FrameError::BufferOverflow => {
                self.stats.framing_errors += 1;
                ErrorDetail::new(ErrorKind::Framing, raw, err.to_string())
            }
        };
        self.record_error(detail);
    }

    fn record_error(&mut self, detail: ErrorDetail) {
        if self.track_error_history {
            self.stats.add_error(detail);
        }
    }
}

/// Render the operator-facing parameter and result strings for one exchange.
fn render_exchange(function: u8, payload: &[u8], response: &[u8]) -> (String, String) {
    let body = &response[..response.len() - 2];
    let exception_code = if body.len() == 3 && (body[1] & 0x80) != 0 {
        Some(body[2])
    } else {
        None
    };

    let Some((first, second)) = fields(payload) else {
        let parameters = format!("Raw payload: {}", hex_spaced(payload));
        let result = match exception_code {
            Some(code) => format!("Exception: 0x{code:02X}"),
            None => "Success".to_string(),
        };
        return (parameters, result);
    };

    match function {
        FC_READ_COILS => {
            let parameters = format!("Start: 0x{first:04X} ({first}), Count: {second}");
            let result = match exception_code {
                Some(code) => format!("Exception: 0x{code:02X}"),
                None => {
                    let byte_count = body[2];
                    format!("Returned {byte_count} bytes: {}", hex_spaced(&body[3..]))
                }
            };
            (parameters, result)
        }
        FC_READ_HOLDING_REGISTERS => {
            let parameters = format!("Start: 0x{first:04X} ({first}), Count: {second}");
            let result = match exception_code {
                Some(code) => format!("Exception: 0x{code:02X}"),
                None => {
                    let byte_count = body[2];
                    format!("Returned {} registers ({byte_count} bytes)", byte_count / 2)
                }
            };
            (parameters, result)
        }
        FC_WRITE_SINGLE_COIL => {
            let value = match second {
                COIL_ON => "UNLOCK (0xFF00)".to_string(),
                COIL_OFF => "CLOSED/LOCK (0x0000)".to_string(),
                other => format!("Invalid (0x{other:04X})"),
            };
            // Lock numbering is one-based; widen first so address 0xFFFF
            // cannot overflow the addition.
            let lock = u32::from(first) + 1;
            let parameters = format!("Lock #{lock} (0x{first:04X}), Value: {value}");
            let result = match exception_code {
                Some(code) => format!("Exception: 0x{code:02X}"),
                None if second == COIL_ON => format!("Lock #{lock} UNLOCK"),
                None => format!("Lock #{lock} CLOSED/LOCK"),
            };
            (parameters, result)
        }
        FC_WRITE_SINGLE_REGISTER => {
            let parameters =
                format!("Register: 0x{first:04X} ({first}), Value: 0x{second:04X} ({second})");
            let result = match exception_code {
                Some(code) => format!("Exception: 0x{code:02X}"),
                None => "Success".to_string(),
            };
            (parameters, result)
        }
        _ => {
            let result = match exception_code {
                Some(code) => format!("Exception: 0x{code:02X}"),
                None => "Success".to_string(),
            };
            ("Unsupported function".to_string(), result)
        }
    }
}

fn fields(payload: &[u8]) -> Option<(u16, u16)> {
    if payload.len() != 4 {
        return None;
    }
    Some((
        u16::from_be_bytes([payload[0], payload[1]]),
        u16::from_be_bytes([payload[2], payload[3]]),
    ))
}

fn hex_spaced(data: &[u8]) -> String {
    data.iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
