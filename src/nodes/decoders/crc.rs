//! CRC-32 over packet contents
//!
//! Reflected polynomial 0xEDB88320, initial value and final XOR 0xFFFFFFFF
//! (the Ethernet/zlib CRC). Covers the header and data objects in wire order,
//! little-endian.

const POLY: u32 = 0xEDB8_8320;

const TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Running CRC-32 state
#[derive(Debug, Clone, Copy)]
pub struct Crc32 {
    state: u32,
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc32 {
    pub fn new() -> Self {
        Self { state: 0xFFFF_FFFF }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            let index = ((self.state ^ u32::from(byte)) & 0xFF) as usize;
            self.state = (self.state >> 8) ^ TABLE[index];
        }
    }

    pub fn finish(&self) -> u32 {
        self.state ^ 0xFFFF_FFFF
    }
}

pub fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(bytes);
    crc.finish()
}

/// Checksum a packet would carry for this header and data objects
pub fn frame_crc(header: u16, words: &[u32]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(&header.to_le_bytes());
    for word in words {
        crc.update(&word.to_le_bytes());
    }
    crc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn test_frame_crc_matches_byte_crc() {
        let bytes = [0x63, 0x05, 0x2C, 0x91, 0x01, 0x00];
        assert_eq!(frame_crc(0x0563, &[0x0001_912C]), crc32(&bytes));
    }

    #[test]
    fn test_incremental_update() {
        let mut crc = Crc32::new();
        crc.update(b"1234");
        crc.update(b"56789");
        assert_eq!(crc.finish(), crc32(b"123456789"));
    }
}
