//! Frame checksums — CRC-16/XMODEM and the reflected CRC-32.
//!
//! Both are fixed by the protocol: 16-bit poly 0x1021 seeded with zero,
//! MSB first; 32-bit reflected poly 0xEDB88320 with inverted seed and
//! final inversion. Inputs are the raw wire bytes after the two pads,
//! still in escaped form.

const CRC16_POLY: u16 = 0x1021;
const CRC32_POLY: u32 = 0xEDB88320;

/// CRC-16/XMODEM over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in data {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Reflected CRC-32 over `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &b in data {
        crc ^= b as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ CRC32_POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc ^ 0xFFFF_FFFF
}
