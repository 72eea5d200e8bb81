//! Checksums used by the supported device families.

const PI30_TABLE: [u16; 16] = [
    0x0000, 0x1021, 0x2042, 0x3063, 0x4084, 0x50a5, 0x60c6, 0x70e7, 0x8108, 0x9129, 0xa14a, 0xb16b,
    0xc18c, 0xd1ad, 0xe1ce, 0xf1ef,
];

// bytes the inverters reserve as frame delimiters: '(' CR LF
const PI30_RESERVED: [u8; 3] = [0x28, 0x0d, 0x0a];

/// Nibble-wise CRC-16/XMODEM as computed by the Voltronic firmware, before escaping.
pub fn pi30_raw(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        for nibble in [byte >> 4, byte & 0x0f] {
            let da = ((crc >> 8) as u8) >> 4;
            crc <<= 4;
            crc ^= PI30_TABLE[(da ^ nibble) as usize];
        }
    }
    crc
}

/// PI30/PI18 frame CRC as `[high, low]`, with delimiter bytes bumped by one.
pub fn pi30(data: &[u8]) -> [u8; 2] {
    let [mut high, mut low] = pi30_raw(data).to_be_bytes();
    if PI30_RESERVED.contains(&high) {
        high += 1;
    }
    if PI30_RESERVED.contains(&low) {
        low += 1;
    }
    [high, low]
}

/// Byte-wise table-driven CRC-16/XMODEM (poly 0x1021, init 0), no escaping.
pub fn xmodem(data: &[u8]) -> u16 {
    crc16::State::<crc16::XMODEM>::calculate(data)
}

/// JK BMS RS232/RS485 checksum: 16 bit sum of the bytes, `[high, low]`.
pub fn jk232(data: &[u8]) -> [u8; 2] {
    let sum = data.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16));
    sum.to_be_bytes()
}

/// JK BMS BLE record checksum: 8 bit sum of the bytes.
pub fn crc8_sum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Victron VE.Direct HEX checksum: the byte that makes the frame sum to 0x55.
pub fn ved_hex(data: &[u8]) -> u8 {
    0x55u8.wrapping_sub(crc8_sum(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pi30_known_vectors() {
        assert_eq!(pi30(b"QPIGS"), [0xb7, 0xa9]);
        assert_eq!(pi30(b"QPIRI"), [0xf8, 0x54]);
        assert_eq!(pi30(b"PSDV56.4"), [0xf9, 0xe0]);
        assert_eq!(pi30(b"(ACK"), [0x39, 0x20]);
        assert_eq!(pi30(b"(NAK"), [0x73, 0x73]);
    }

    #[test]
    fn pi30_is_deterministic() {
        for cmd in ["QPI", "QMOD", "QPGS0", "POP02", "MUCHGC130"] {
            assert_eq!(pi30(cmd.as_bytes()), pi30(cmd.as_bytes()));
        }
    }

    #[test]
    fn pi30_escapes_reserved_bytes() {
        // raw crc of "QPGS0" is 0x3fda, nothing to escape
        assert_eq!(pi30(b"QPGS0"), [0x3f, 0xda]);

        for data in [&b"QPIGS"[..], b"QMCHGCR", b"^P005PI", b"(S"] {
            let [high, low] = pi30(data);
            assert!(!PI30_RESERVED.contains(&high));
            assert!(!PI30_RESERVED.contains(&low));
        }
    }

    #[test]
    fn nibble_and_table_forms_agree() {
        for data in [&b"QPIGS"[..], b"QPIRI", b"PSDV56.4", b"", b"^P009EY2023"] {
            assert_eq!(pi30_raw(data), xmodem(data));
        }
        assert_eq!(xmodem(b"123456789"), 0x31c3);
    }

    #[test]
    fn jk_checksums() {
        assert_eq!(jk232(&[0x4e, 0x57, 0x00, 0x13, 0x06, 0x03, 0x68]), [0x01, 0x29]);
        assert_eq!(crc8_sum(&[0xaa, 0x55, 0x90, 0xeb, 0x97]), 0x11);
    }

    #[test]
    fn ved_checksum_balances_frame() {
        let frame = [0x07, 0x00, 0x10, 0x00];
        let check = ved_hex(&frame);
        assert_eq!(check, 0x3e);
        assert_eq!(crc8_sum(&[&frame[..], &[check]].concat()), 0x55);
    }
}
