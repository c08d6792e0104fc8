//! CRC-16 for Modbus RTU frames.

/// Calculate the Modbus RTU CRC-16 over `data`.
///
/// Initial register 0xFFFF, right-shift algorithm, polynomial tap 0xA001.
/// An empty slice yields 0xFFFF.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// CRC-16 in wire order: low byte first.
pub fn crc16_bytes(data: &[u8]) -> [u8; 2] {
    let crc = crc16(data);
    [crc as u8, (crc >> 8) as u8]
}

/// Recompute the CRC over everything but the trailing two bytes and compare.
///
/// Frames shorter than 4 bytes can never carry a valid CRC.
pub fn verify_crc(frame: &[u8]) -> bool {
    if frame.len() < 4 {
        return false;
    }
    let expected = crc16_bytes(&frame[..frame.len() - 2]);
    frame[frame.len() - 2..] == expected
}
