//! A single emulated slave: coil bank, holding registers and the
//! function-code dispatch table.

use crate::EmulatorError;

/// Highest slave address the RTU wire format allows.
pub const MAX_DEVICE_ADDRESS: u8 = 247;

/// Coils fitted to a CU48 lock controller bank.
pub const CU48_COIL_COUNT: usize = 48;

pub const FC_READ_COILS: u8 = 0x01;
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

pub const EX_ILLEGAL_FUNCTION: u8 = 0x01;
pub const EX_ILLEGAL_DATA_ADDRESS: u8 = 0x02;
pub const EX_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Write Single Coil payload value for ON (unlock).
pub const COIL_ON: u16 = 0xFF00;
/// Write Single Coil payload value for OFF (lock).
pub const COIL_OFF: u16 = 0x0000;

pub struct SlaveDeviceBuilder {
    address: Option<u8>,
    coil_count: usize,
    register_count: usize,
    coil_presets: Vec<(usize, bool)>,
    register_presets: Vec<(usize, u16)>,
}

impl SlaveDeviceBuilder {
    pub fn address(mut self, address: u8) -> Self {
        self.address = Some(address);
        self
    }

    pub fn coil_count(mut self, count: usize) -> Self {
        self.coil_count = count;
        self
    }

    pub fn register_count(mut self, count: usize) -> Self {
        self.register_count = count;
        self
    }

    /// Preset one coil in the initial memory image.
    pub fn coil(mut self, index: usize, value: bool) -> Self {
        self.coil_presets.push((index, value));
        self
    }

    /// Preset one holding register in the initial memory image.
    pub fn register(mut self, index: usize, value: u16) -> Self {
        self.register_presets.push((index, value));
        self
    }

    /// Register image captured from live CU48 controller traffic.
    pub fn cu48_defaults(self) -> Self {
        self.register(0x0F, 0xE230)
            .register(0xF5, 0x0002)
            .register(0xF6, 0x0004)
    }

    pub fn build(self) -> Result<SlaveDevice, EmulatorError> {
        let address = self.address.ok_or(EmulatorError::DeviceAddressMissing)?;
        if address > MAX_DEVICE_ADDRESS {
            return Err(EmulatorError::InvalidDeviceAddress(address));
        }

        let mut coils = vec![false; self.coil_count];
        for (index, value) in self.coil_presets {
            if index >= coils.len() {
                return Err(EmulatorError::CoilOutOfRange {
                    index,
                    count: coils.len(),
                });
            }
            coils[index] = value;
        }

        let mut holding_registers = vec![0u16; self.register_count];
        for (index, value) in self.register_presets {
            if index >= holding_registers.len() {
                return Err(EmulatorError::RegisterOutOfRange {
                    index,
                    count: holding_registers.len(),
                });
            }
            holding_registers[index] = value;
        }

        Ok(SlaveDevice {
            address,
            coils,
            holding_registers,
        })
    }
}

/// One addressable slave on the emulated bus.
///
/// Owns its coil and register storage; nothing is shared between devices.
pub struct SlaveDevice {
    address: u8,
    coils: Vec<bool>,
    holding_registers: Vec<u16>,
}

impl SlaveDevice {
    pub fn builder() -> SlaveDeviceBuilder {
        SlaveDeviceBuilder {
            address: None,
            coil_count: CU48_COIL_COUNT,
            register_count: 256,
            coil_presets: Vec::new(),
            register_presets: Vec::new(),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn coil(&self, index: usize) -> Option<bool> {
        self.coils.get(index).copied()
    }

    pub fn holding_register(&self, index: usize) -> Option<u16> {
        self.holding_registers.get(index).copied()
    }

    /// Flip a coil out-of-band, the way the operator UI does.
    pub fn set_coil(&mut self, index: usize, value: bool) -> Result<(), EmulatorError> {
        let count = self.coils.len();
        match self.coils.get_mut(index) {
            Some(coil) => {
                *coil = value;
                Ok(())
            }
            None => Err(EmulatorError::CoilOutOfRange { index, count }),
        }
    }

    pub fn set_holding_register(&mut self, index: usize, value: u16) -> Result<(), EmulatorError> {
        let count = self.holding_registers.len();
        match self.holding_registers.get_mut(index) {
            Some(register) => {
                *register = value;
                Ok(())
            }
            None => Err(EmulatorError::RegisterOutOfRange { index, count }),
        }
    }

    /// Execute one already-validated request against this device.
    ///
    /// Always answers: range and value faults become exception responses,
    /// unknown function codes become exception 0x01. The returned body runs
    /// from address byte through data; the dispatcher appends the CRC.
    pub fn process_request(&mut self, function: u8, payload: &[u8]) -> Vec<u8> {
        match function {
            FC_READ_COILS | FC_READ_HOLDING_REGISTERS | FC_WRITE_SINGLE_COIL
            | FC_WRITE_SINGLE_REGISTER => {
                // All four carry exactly two big-endian u16 fields.
                let Some((first, second)) = split_payload(payload) else {
                    return self.exception(function, EX_ILLEGAL_DATA_VALUE);
                };
                match function {
                    FC_READ_COILS => self.read_coils(first, second),
                    FC_READ_HOLDING_REGISTERS => self.read_holding_registers(first, second),
                    FC_WRITE_SINGLE_COIL => self.write_single_coil(first, second, payload),
                    _ => self.write_single_register(first, second, payload),
                }
            }
            _ => self.exception(function, EX_ILLEGAL_FUNCTION),
        }
    }

    fn read_coils(&self, start: u16, quantity: u16) -> Vec<u8> {
        if quantity == 0 {
            return self.exception(FC_READ_COILS, EX_ILLEGAL_DATA_VALUE);
        }
        let start = start as usize;
        let quantity = quantity as usize;
        if start + quantity > self.coils.len() {
            return self.exception(FC_READ_COILS, EX_ILLEGAL_DATA_ADDRESS);
        }
        let byte_count = quantity.div_ceil(8);
        if byte_count > u8::MAX as usize {
            return self.exception(FC_READ_COILS, EX_ILLEGAL_DATA_VALUE);
        }

        let mut response = vec![self.address, FC_READ_COILS, byte_count as u8];
        response.resize(3 + byte_count, 0);
        for (i, &coil) in self.coils[start..start + quantity].iter().enumerate() {
            if coil {
                // LSB-first within each data byte
                response[3 + i / 8] |= 1 << (i % 8);
            }
        }
        response
    }

    fn read_holding_registers(&self, start: u16, quantity: u16) -> Vec<u8> {
        if quantity == 0 {
            return self.exception(FC_READ_HOLDING_REGISTERS, EX_ILLEGAL_DATA_VALUE);
        }
        let start = start as usize;
        let quantity = quantity as usize;
        if start + quantity > self.holding_registers.len() {
            return self.exception(FC_READ_HOLDING_REGISTERS, EX_ILLEGAL_DATA_ADDRESS);
        }
        let byte_count = quantity * 2;
        if byte_count > u8::MAX as usize {
            return self.exception(FC_READ_HOLDING_REGISTERS, EX_ILLEGAL_DATA_VALUE);
        }

        let mut response = Vec::with_capacity(3 + byte_count);
        response.push(self.address);
        response.push(FC_READ_HOLDING_REGISTERS);
        response.push(byte_count as u8);
        for &register in &self.holding_registers[start..start + quantity] {
            response.extend_from_slice(&register.to_be_bytes());
        }
        response
    }

    fn write_single_coil(&mut self, address: u16, value: u16, payload: &[u8]) -> Vec<u8> {
        if address as usize >= self.coils.len() {
            return self.exception(FC_WRITE_SINGLE_COIL, EX_ILLEGAL_DATA_ADDRESS);
        }
        let state = match value {
            COIL_ON => true,
            COIL_OFF => false,
            _ => return self.exception(FC_WRITE_SINGLE_COIL, EX_ILLEGAL_DATA_VALUE),
        };
        self.coils[address as usize] = state;
        self.echo(FC_WRITE_SINGLE_COIL, payload)
    }

    fn write_single_register(&mut self, address: u16, value: u16, payload: &[u8]) -> Vec<u8> {
        if address as usize >= self.holding_registers.len() {
            return self.exception(FC_WRITE_SINGLE_REGISTER, EX_ILLEGAL_DATA_ADDRESS);
        }
        self.holding_registers[address as usize] = value;
        self.echo(FC_WRITE_SINGLE_REGISTER, payload)
    }

    /// Single-write responses echo the request bytes unchanged.
    fn echo(&self, function: u8, payload: &[u8]) -> Vec<u8> {
        let mut response = Vec::with_capacity(2 + payload.len());
        response.push(self.address);
        response.push(function);
        response.extend_from_slice(payload);
        response
    }

    fn exception(&self, function: u8, code: u8) -> Vec<u8> {
        vec![self.address, function | 0x80, code]
    }
}

fn split_payload(payload: &[u8]) -> Option<(u16, u16)> {
    if payload.len() != 4 {
        return None;
    }
    Some((
        u16::from_be_bytes([payload[0], payload[1]]),
        u16::from_be_bytes([payload[2], payload[3]]),
    ))
}
