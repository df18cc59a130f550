//! Wire codec for the heater protocol.
//!
//! Every frame starts with the marker `0xAA` and a reserved `0x00` byte, followed by a
//! command id. Outbound frames end with a big-endian checksum over everything before it.
//!
//! Command packet (8 bytes):
//!
//! Offset | Meaning
//! 0      | Marker `0xAA`
//! 1      | Reserved `0x00`
//! 2      | Command id
//! 3..=5  | Three argument bytes
//! 6..=7  | Checksum over bytes 0-5, high byte first
//!
//! Bind response (12 bytes):
//!
//! Offset | Meaning
//! 0..=2  | Marker, reserved, [`CMD_BIND`]
//! 3..=8  | The six MAC address bytes, reversed
//! 9      | Magic byte, equal to the last MAC byte
//! 10..=11| Checksum over bytes 0-9, high byte first

use crc16::{State, XMODEM};

/// First byte of every frame in either direction
pub const MARKER: u8 = 0xAA;

/// Press a virtual button, see the `BTN_*` codes
pub const CMD_BUTTON: u8 = 0x61;
pub const CMD_MANUAL_PUMP: u8 = 0x62;
pub const CMD_GET_REG_ADDR: u8 = 0x63;
pub const CMD_GET_REG_VAL: u8 = 0x64;
/// Ask the heater to push status broadcasts periodically. Doubles as the keepalive.
pub const CMD_AUTO_UPDATE: u8 = 0x65;
/// Write a one byte parameter, see the `PARA_*` selectors
pub const CMD_SHORT_PARA: u8 = 0x66;
pub const CMD_BIND: u8 = 0x91;

pub const BTN_POWER_ON: u8 = 1;
pub const BTN_POWER_OFF: u8 = 2;
pub const BTN_UP: u8 = 3;
pub const BTN_DOWN: u8 = 4;
pub const BTN_CLEAR_ERROR: u8 = 5;
pub const BTN_RF_PAIR: u8 = 6;
pub const BTN_OK: u8 = 7;
pub const BTN_SWITCH_TEMP_FC: u8 = 8;
pub const BTN_VENTILATION: u8 = 9;
pub const BTN_SWITCH_TEMP_CF: u8 = 10;

pub const PARA_RUN_MODE: u8 = 0;
pub const PARA_TARGET_TEMP: u8 = 1;
pub const PARA_TARGET_GEAR: u8 = 2;
pub const PARA_TIMER: u8 = 3;
pub const PARA_TEMP_DIFF: u8 = 4;

/// Arguments of the auto-update command: mode 2, 20 unit interval, threshold 99
pub const AUTO_UPDATE_ARGS: [u8; 3] = [2, 20, 99];

pub const COMMAND_PACKET_LEN: usize = 8;
pub const BIND_PACKET_LEN: usize = 12;

/// The 4 bit table the heater firmware feeds each nibble through. It is the upper-nibble
/// slice of the CCITT (0x1021) table, so the heater's checksum is CRC-16/XMODEM.
pub const CRC16_TABLE: [u16; 16] = [
    0, 4129, 8258, 12387, 16516, 20645, 24774, 28903, 33032, 37161, 41290, 45419, 49548, 53677,
    57806, 61935,
];

/// Compute the checksum the heater expects over the first `length` bytes of `bytes`
pub fn checksum(bytes: &[u8], length: usize) -> u16 {
    State::<XMODEM>::calculate(&bytes[..length])
}

/// Assemble an 8 byte command packet
pub fn build_command(command_id: u8, arg0: u8, arg1: u8, arg2: u8) -> [u8; COMMAND_PACKET_LEN] {
    let mut packet = [MARKER, 0x00, command_id, arg0, arg1, arg2, 0, 0];
    let crc = checksum(&packet, COMMAND_PACKET_LEN - 2);
    packet[6..].copy_from_slice(&crc.to_be_bytes());
    packet
}

/// Assemble the 12 byte bind response that identifies this client to the heater
pub fn build_bind_response(mac: &[u8; 6]) -> [u8; BIND_PACKET_LEN] {
    let mut packet = [0u8; BIND_PACKET_LEN];
    packet[0] = MARKER;
    packet[2] = CMD_BIND;
    for (i, &b) in mac.iter().rev().enumerate() {
        packet[3 + i] = b;
    }
    packet[9] = mac[5];
    let crc = checksum(&packet, BIND_PACKET_LEN - 2);
    packet[10..].copy_from_slice(&crc.to_be_bytes());
    packet
}

/// The keepalive / enable-stream packet
pub fn build_auto_update() -> [u8; COMMAND_PACKET_LEN] {
    let [a, b, c] = AUTO_UPDATE_ARGS;
    build_command(CMD_AUTO_UPDATE, a, b, c)
}

pub fn read_u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

/// Values above 32767 are negative in two's complement
pub fn read_i16_le(buf: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([buf[offset], buf[offset + 1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The heater's own algorithm: high nibble first, then low nibble, through the table
    fn nibble_checksum(bytes: &[u8]) -> u16 {
        let mut crc: u16 = 0;
        for &byte in bytes {
            for nibble in [byte >> 4, byte & 0x0F] {
                let top = (crc >> 12) as u8;
                crc <<= 4;
                crc ^= CRC16_TABLE[((top ^ nibble) & 0x0F) as usize];
            }
        }
        crc
    }

    #[test]
    fn test_build_command_button() {
        let packet = build_command(CMD_BUTTON, 1, 200, 0);
        assert_eq!(hex::encode(packet), "aa006101c800e081");
    }

    #[test]
    fn test_build_auto_update() {
        assert_eq!(hex::encode(build_auto_update()), "aa00650214637faf");
    }

    #[test]
    fn test_embedded_checksum_matches_recomputed() {
        let packet = build_command(CMD_SHORT_PARA, PARA_TARGET_TEMP, 0, 22);
        let embedded = u16::from_be_bytes([packet[6], packet[7]]);
        assert_eq!(embedded, checksum(&packet, 6));
        assert_eq!(hex::encode(packet), "aa00660100165ca6");
    }

    #[test]
    fn test_checksum_matches_nibble_table() {
        assert_eq!(checksum(b"123456789", 9), 0x31c3);
        assert_eq!(nibble_checksum(b"123456789"), 0x31c3);

        let mut frames = vec![
            hex::decode("aa006101c800").unwrap(),
            hex::decode("aa0091ffeeddccbbaaff").unwrap(),
            hex::decode("00ff10f0").unwrap(),
        ];
        frames.extend((0..=255u8).map(|b| vec![b, !b, b.rotate_left(3)]));
        for frame in frames {
            assert_eq!(checksum(&frame, frame.len()), nibble_checksum(&frame), "{}", hex::encode(&frame));
        }
    }

    #[test]
    fn test_checksum_only_covers_length() {
        let data = hex::decode("aa006101c800ffff").unwrap();
        assert_eq!(checksum(&data, 6), 0xe081);
        assert_eq!(checksum(&data, 0), 0);
    }

    #[test]
    fn test_build_bind_response() {
        let packet = build_bind_response(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(&packet[..3], &[0xAA, 0x00, 0x91]);
        assert_eq!(&packet[3..9], &[0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(packet[9], 0xFF);
        assert_eq!(u16::from_be_bytes([packet[10], packet[11]]), checksum(&packet, 10));
        assert_eq!(hex::encode(packet), "aa0091ffeeddccbbaaff68b1");
    }

    #[test]
    fn test_read_le() {
        let buf = [0x88, 0xff, 0xf8, 0x7f, 0xd3, 0x00];
        assert_eq!(read_u16_le(&buf, 0), 65416);
        assert_eq!(read_i16_le(&buf, 0), -120);
        assert_eq!(read_i16_le(&buf, 2), 32760);
        assert_eq!(read_u16_le(&buf, 4), 211);
    }
}
