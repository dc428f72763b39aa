//! The DNP3 CRC (polynomial 0x3D65, reversed, complemented output).

use crc::{Crc, CRC_16_DNP};

const CRC_DNP: Crc<u16> = Crc::<u16>::new(&CRC_16_DNP);

/// Compute the CRC of a byte run.
pub fn checksum(data: &[u8]) -> u16 {
    CRC_DNP.checksum(data)
}

/// Append the CRC of `data`, low byte first.
pub fn append(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&checksum(data).to_le_bytes());
}

/// Verify a trailing little-endian CRC against the preceding data.
pub fn verify(data: &[u8], crc_bytes: [u8; 2]) -> bool {
    checksum(data) == u16::from_le_bytes(crc_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // Header of a reset-link frame from 1 to 1024.
        let header = [0x05, 0x64, 0x05, 0xC0, 0x01, 0x00, 0x00, 0x04];
        let crc = checksum(&header);
        let mut out = header.to_vec();
        append(&mut out, &header);
        assert_eq!(out[8..10], crc.to_le_bytes());
        assert!(verify(&header, [out[8], out[9]]));
    }

    #[test]
    fn corruption_is_detected() {
        let data = [1u8, 2, 3, 4, 5];
        let crc = checksum(&data).to_le_bytes();
        let mut corrupted = data;
        corrupted[2] ^= 0x01;
        assert!(!verify(&corrupted, crc));
    }
}
