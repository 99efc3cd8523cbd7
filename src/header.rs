//! The 512-byte on-card header block: parsing, serialization, serial-number
//! obfuscation and checksum validation (SPEC_FULL.md §3, §4.6).
//!
//! Deliberately hand-written big-endian field accessors rather than a
//! `#[repr(C)]` overlay (DESIGN.md, "Big-endian structure overlay"): Rust
//! gives no cross-platform layout guarantee equivalent to the original's
//! `ctypes.BigEndianStructure`, so every field is read and written
//! explicitly.

use crate::checksum;
use crate::error::{DriverError, Result};

pub const HEADER_SIZE: usize = 512;
const SERIAL_LEN: usize = 12;
const PADDING_LEN: usize = 0x1d6;
const CHECKSUM_REGION_LEN: usize = 508;

/// The GameCube memory card filesystem header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub serial: [u8; SERIAL_LEN],
    pub time: u64,
    pub bias: u32,
    pub lang: u32,
    pub unk: u32,
    pub device_id: u16,
    pub size_megabits: u16,
    pub encoding: u16,
    pub checksum1: u16,
    pub checksum2: u16,
}

impl Header {
    /// Parses a 512-byte header block.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HEADER_SIZE {
            return Err(DriverError::InvalidArgument(format!(
                "header block must be {HEADER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut serial = [0u8; SERIAL_LEN];
        serial.copy_from_slice(&bytes[0..12]);
        let time = be_u64(&bytes[12..20]);
        let bias = be_u32(&bytes[20..24]);
        let lang = be_u32(&bytes[24..28]);
        let unk = be_u32(&bytes[28..32]);
        let device_id = be_u16(&bytes[32..34]);
        let size_megabits = be_u16(&bytes[34..36]);
        let encoding = be_u16(&bytes[36..38]);
        // bytes[38..38+PADDING_LEN] is the 0xff padding region, not stored.
        let checksum_off = 38 + PADDING_LEN;
        let checksum1 = be_u16(&bytes[checksum_off..checksum_off + 2]);
        let checksum2 = be_u16(&bytes[checksum_off + 2..checksum_off + 4]);
        Ok(Header {
            serial,
            time,
            bias,
            lang,
            unk,
            device_id,
            size_megabits,
            encoding,
            checksum1,
            checksum2,
        })
    }

    /// Serializes the header back into its 512-byte wire form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..12].copy_from_slice(&self.serial);
        out[12..20].copy_from_slice(&self.time.to_be_bytes());
        out[20..24].copy_from_slice(&self.bias.to_be_bytes());
        out[24..28].copy_from_slice(&self.lang.to_be_bytes());
        out[28..32].copy_from_slice(&self.unk.to_be_bytes());
        out[32..34].copy_from_slice(&self.device_id.to_be_bytes());
        out[34..36].copy_from_slice(&self.size_megabits.to_be_bytes());
        out[36..38].copy_from_slice(&self.encoding.to_be_bytes());
        let checksum_off = 38 + PADDING_LEN;
        for b in &mut out[38..checksum_off] {
            *b = 0xff;
        }
        out[checksum_off..checksum_off + 2].copy_from_slice(&self.checksum1.to_be_bytes());
        out[checksum_off + 2..checksum_off + 4].copy_from_slice(&self.checksum2.to_be_bytes());
        out
    }

    /// Computes the checksum pair over this header's first 508 bytes.
    pub fn compute_checksum(&self) -> Result<(u16, u16)> {
        let bytes = self.to_bytes();
        checksum::compute(&bytes[..CHECKSUM_REGION_LEN])
    }

    /// Whether the stored checksums match a fresh computation.
    pub fn checksum_is_consistent(&self) -> Result<bool> {
        let (c1, c2) = self.compute_checksum()?;
        Ok(c1 == self.checksum1 && c2 == self.checksum2)
    }

    /// Decodes the raw `serial` field using the LFSR-family keystream seeded
    /// from this header's `time` field (SPEC_FULL.md §4.6).
    pub fn decoded_serial(&self) -> [u8; SERIAL_LEN] {
        let mut out = [0u8; SERIAL_LEN];
        let mut key_value = self.time as u32;
        for (i, byte) in self.serial.iter().enumerate() {
            let (yielded, carry) = serial_key_iter(key_value);
            out[i] = byte.wrapping_sub(yielded as u8);
            key_value = carry;
        }
        out
    }

    /// Encodes `serial` under the keystream seeded from `time`, and sets
    /// `self.time` to `time` as the encoding also does on a real card.
    pub fn set_encoded_serial(&mut self, serial: [u8; SERIAL_LEN], time: u64) {
        self.time = time;
        let mut key_value = time as u32;
        for (i, byte) in serial.iter().enumerate() {
            let (yielded, carry) = serial_key_iter(key_value);
            self.serial[i] = byte.wrapping_add(yielded as u8);
            key_value = carry;
        }
    }
}

/// One full iteration of the serial keystream generator: advances past the
/// seed once (unmasked, 32-bit) to produce the value consumed against the
/// current byte, then advances once more (masked to 15 bits) to produce the
/// carry seed for the next byte. Both sub-steps run on every iteration,
/// mirroring the source generator's `while True: step(); yield; step()&mask`
/// loop exactly (SPEC_FULL.md §4.6, grounded in the original Python source).
fn serial_key_iter(seed: u32) -> (u32, u32) {
    let yielded = lcg_step(seed);
    let carry = lcg_step(yielded) & 0x7fff;
    (yielded, carry)
}

fn lcg_step(key_value: u32) -> u32 {
    (key_value.wrapping_mul(0x41c6_4e6d).wrapping_add(0x3039)) >> 16
}

fn be_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    u64::from_be_bytes(arr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            serial: [0u8; 12],
            time: 0x1122_3344_5566_7788,
            bias: 1,
            lang: 0,
            unk: 0,
            device_id: 1,
            size_megabits: 64,
            encoding: 0,
            checksum1: 0,
            checksum2: 0,
        }
    }

    #[test]
    fn parse_round_trips_to_bytes() {
        let mut header = sample_header();
        let (c1, c2) = header.compute_checksum().unwrap();
        header.checksum1 = c1;
        header.checksum2 = c2;
        let bytes = header.to_bytes();
        let parsed = Header::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!(Header::parse(&[0u8; 10]).is_err());
    }

    #[test]
    fn freshly_formatted_header_checksum_is_consistent() {
        let mut header = sample_header();
        let (c1, c2) = header.compute_checksum().unwrap();
        header.checksum1 = c1;
        header.checksum2 = c2;
        assert!(header.checksum_is_consistent().unwrap());
    }

    #[test]
    fn tampered_checksum_is_inconsistent() {
        let mut header = sample_header();
        let (c1, c2) = header.compute_checksum().unwrap();
        header.checksum1 = c1.wrapping_add(1);
        header.checksum2 = c2;
        assert!(!header.checksum_is_consistent().unwrap());
    }

    #[test]
    fn encode_then_decode_serial_round_trips() {
        let mut header = sample_header();
        let serial = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        header.set_encoded_serial(serial, 0xdead_beef_1234);
        assert_eq!(header.time, 0xdead_beef_1234);
        assert_eq!(header.decoded_serial(), serial);
    }

    #[test]
    fn set_encoded_serial_overwrites_time() {
        let mut header = sample_header();
        header.set_encoded_serial([0u8; 12], 42);
        assert_eq!(header.time, 42);
    }
}
