//! Wire framing for the rangefinder UART protocol.
//!
//! Every exchange uses a fixed 8-byte frame:
//!
//! ```text
//! request:  55 AA | cmd    | p0 p1 p2 p3    | sum(cmd, p0..p3)
//! response: 55 AA | echo   | status | d0 hi lo | sum(echo, d0, hi, lo)
//! ```
//!
//! The status byte of a response is not covered by its checksum. Nothing in
//! this module performs I/O.

use crate::error::ProtocolError;

/// Frame header bytes
pub const HEADER: [u8; 2] = [0x55, 0xAA];

/// Length of every request and response frame
pub const FRAME_LEN: usize = 8;

/// Single measurement command
pub const CMD_SINGLE: u8 = 0x88;

/// Start continuous measurement command
pub const CMD_START_CONTINUOUS: u8 = 0x89;

/// Stop continuous measurement command
pub const CMD_STOP_CONTINUOUS: u8 = 0x8E;

/// Status byte signalling a successful measurement
pub const STATUS_OK: u8 = 0x01;

/// Payload sent with every command unless a caller provides one
pub const DEFAULT_PAYLOAD: [u8; 4] = [0xFF; 4];

/// A validated response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Echoed command code (byte 2)
    pub command: u8,
    /// Device status (byte 3)
    pub status: u8,
    /// Data bytes 4..7
    pub data: [u8; 3],
}

impl ResponseFrame {
    /// Raw distance in decimeters, big-endian in bytes 5 and 6.
    pub fn distance_raw(&self) -> u16 {
        u16::from_be_bytes([self.data[1], self.data[2]])
    }

    /// Whether the device reported a successful measurement.
    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Sum of `bytes` modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Build a request frame for `code` carrying `payload`.
pub fn encode_command(code: u8, payload: [u8; 4]) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[..2].copy_from_slice(&HEADER);
    frame[2] = code;
    frame[3..7].copy_from_slice(&payload);
    frame[7] = checksum(&frame[2..7]);
    frame
}

/// Validate and decode a response frame.
///
/// Only the first [`FRAME_LEN`] bytes are considered; anything shorter is a
/// [`ProtocolError::ShortRead`].
pub fn decode_response(bytes: &[u8]) -> Result<ResponseFrame, ProtocolError> {
    let frame = decode_header_only(bytes)?;

    let expected = response_checksum(bytes);
    let actual = bytes[7];
    if expected != actual {
        return Err(ProtocolError::BadChecksum { expected, actual });
    }

    Ok(frame)
}

/// Decode a response checking only its length and header.
///
/// Availability probing uses this weaker check so that a wired but noisy
/// device is still recognised.
pub fn decode_header_only(bytes: &[u8]) -> Result<ResponseFrame, ProtocolError> {
    if bytes.len() < FRAME_LEN {
        return Err(ProtocolError::ShortRead { got: bytes.len() });
    }
    if bytes[..2] != HEADER {
        return Err(ProtocolError::BadHeader {
            found: [bytes[0], bytes[1]],
        });
    }

    Ok(ResponseFrame {
        command: bytes[2],
        status: bytes[3],
        data: [bytes[4], bytes[5], bytes[6]],
    })
}

/// Checksum of a response: byte 2 plus bytes 4..7, skipping the status.
fn response_checksum(bytes: &[u8]) -> u8 {
    bytes[2].wrapping_add(checksum(&bytes[4..7]))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A well-formed response for `raw` decimeters.
    fn response(command: u8, status: u8, raw: u16) -> [u8; FRAME_LEN] {
        let [hi, lo] = raw.to_be_bytes();
        let mut frame = [0x55, 0xAA, command, status, 0x00, hi, lo, 0];
        frame[7] = response_checksum(&frame);
        frame
    }

    #[test]
    fn test_encode_single_shot() {
        let frame = encode_command(CMD_SINGLE, DEFAULT_PAYLOAD);
        // 0x88 + 4 * 0xFF = 0x484 -> 0x84
        assert_eq!(frame, [0x55, 0xAA, 0x88, 0xFF, 0xFF, 0xFF, 0xFF, 0x84]);
    }

    #[test]
    fn test_encode_stop_continuous() {
        let frame = encode_command(CMD_STOP_CONTINUOUS, DEFAULT_PAYLOAD);
        assert_eq!(frame[2], 0x8E);
        assert_eq!(frame[7], 0x8A);
    }

    #[test]
    fn test_decode_valid_response() {
        let frame = decode_response(&response(CMD_SINGLE, STATUS_OK, 350)).unwrap();
        assert_eq!(frame.command, CMD_SINGLE);
        assert!(frame.is_success());
        assert_eq!(frame.distance_raw(), 350);
    }

    #[test]
    fn test_status_is_not_checksummed() {
        let mut bytes = response(CMD_SINGLE, STATUS_OK, 1234);
        bytes[3] = 0x7F;
        let frame = decode_response(&bytes).unwrap();
        assert_eq!(frame.status, 0x7F);
        assert!(!frame.is_success());
    }

    #[test]
    fn test_checksum_echo_property() {
        for code in [CMD_SINGLE, CMD_START_CONTINUOUS, CMD_STOP_CONTINUOUS] {
            for payload in [[0x00; 4], [0xFF; 4], [0x12, 0x34, 0x56, 0x78]] {
                let sent = encode_command(code, payload);
                // The device echoes the command with its own status byte.
                let mut echoed = sent;
                echoed[3] = STATUS_OK;
                echoed[7] = response_checksum(&echoed);
                let frame = decode_response(&echoed).unwrap();
                assert_eq!(frame.command, code);
                assert_eq!(frame.data, [payload[1], payload[2], payload[3]]);
            }
        }
    }

    #[test]
    fn test_flipped_checksum_is_rejected() {
        for raw in [0u16, 1, 350, 6000, u16::MAX] {
            let mut bytes = response(CMD_SINGLE, STATUS_OK, raw);
            bytes[7] ^= 0xFF;
            assert!(matches!(
                decode_response(&bytes),
                Err(ProtocolError::BadChecksum { .. })
            ));
        }
    }

    #[test]
    fn test_short_buffers_are_rejected() {
        let full = response(CMD_SINGLE, STATUS_OK, 350);
        for len in 0..FRAME_LEN {
            assert_eq!(
                decode_response(&full[..len]),
                Err(ProtocolError::ShortRead { got: len })
            );
        }
    }

    #[test]
    fn test_bad_header_is_rejected() {
        let mut bytes = response(CMD_SINGLE, STATUS_OK, 350);
        bytes[0] = 0xAA;
        bytes[1] = 0x55;
        assert_eq!(
            decode_response(&bytes),
            Err(ProtocolError::BadHeader {
                found: [0xAA, 0x55]
            })
        );
    }

    #[test]
    fn test_header_only_tolerates_bad_checksum() {
        let mut bytes = response(CMD_SINGLE, STATUS_OK, 350);
        bytes[7] = bytes[7].wrapping_add(1);
        assert!(decode_response(&bytes).is_err());
        assert!(decode_header_only(&bytes).is_ok());
    }
}
