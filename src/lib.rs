// lib.rs
//
// Modbus RTU slave emulator for CU48-style coil-operated lock controllers.
// Impersonates one or more addressable devices on a shared serial bus so a
// master application can be exercised without real hardware.

mod command_log;
mod crc;
mod device;
mod emulator;
mod frame;
mod stats;

pub use command_log::{CommandLogEntry, function_name};
pub use crc::{crc16, crc16_bytes, verify_crc};
pub use device::{
    COIL_OFF, COIL_ON, CU48_COIL_COUNT, EX_ILLEGAL_DATA_ADDRESS, EX_ILLEGAL_DATA_VALUE,
    EX_ILLEGAL_FUNCTION, FC_READ_COILS, FC_READ_HOLDING_REGISTERS, FC_WRITE_SINGLE_COIL,
    FC_WRITE_SINGLE_REGISTER, MAX_DEVICE_ADDRESS, SlaveDevice, SlaveDeviceBuilder,
};
pub use emulator::{ByteChannel, CommandObserver, Emulator, EmulatorBuilder};
pub use frame::{FrameBuffer, FrameError, MAX_BUFFER_LEN, MIN_FRAME_LEN, ParsedFrame, decode};
pub use stats::{ERROR_HISTORY_CAPACITY, ErrorDetail, ErrorKind, Statistics};

#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    #[error("device address {0} exceeds the RTU limit of 247")]
    InvalidDeviceAddress(u8),

    #[error("device address is not set")]
    DeviceAddressMissing,

    #[error("duplicate device address {0}")]
    DuplicateDeviceAddress(u8),

    #[error("emulator has no devices configured")]
    NoDevices,

    #[error("coil index {index} out of range: device has {count} coils")]
    CoilOutOfRange { index: usize, count: usize },

    #[error("register index {index} out of range: device has {count} registers")]
    RegisterOutOfRange { index: usize, count: usize },
}
