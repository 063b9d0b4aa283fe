// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crc_any::CRCu8;

/// Checksum stored in the last byte of every rollback space.
///
/// poly: 0x07 (x^8 + x^2 + x + 1)
/// initial: 0x00
/// final xor: 0x00
/// reflected: no (left shifting)
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = CRCu8::crc8();
    crc.digest(data);
    crc.get_crc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(crc8(b"123456789"), 0xf4);
    }

    #[test]
    fn empty() {
        assert_eq!(crc8(&[]), 0);
    }

    #[test]
    fn every_single_bit_flip_changes_the_crc() {
        let data = [0x02, 0x01, 0x78, 0x56, 0x34, 0x12, 0x00, 0x00, 0x00];
        let good = crc8(&data);
        for bit in 0..data.len() * 8 {
            let mut bad = data;
            bad[bit / 8] ^= 1 << (bit % 8);
            assert_ne!(crc8(&bad), good, "flip of bit {bit} went unnoticed");
        }
    }
}
