//! Acknowledgment notifications.
//!
//! The device notifies one message per data packet it processed:
//! `u16 packet_number (LE) | u8 status`. Anything after the third byte
//! is ignored.

use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt;
use std::io::Cursor;
use thiserror::Error;

use super::constants::{ACK_MIN_LEN, ACK_STATUS_OK};

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Device verdict for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Ok,
    Error,
}

impl AckStatus {
    pub fn from_byte(b: u8) -> Self {
        if b == ACK_STATUS_OK {
            AckStatus::Ok
        } else {
            AckStatus::Error
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, AckStatus::Ok)
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckStatus::Ok => write!(f, "OK"),
            AckStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Parsed acknowledgment notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckMessage {
    pub packet_number: u16,
    pub status: AckStatus,
}

impl AckMessage {
    pub fn new(packet_number: u16, status: AckStatus) -> Self {
        Self {
            packet_number,
            status,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < ACK_MIN_LEN {
            return Err(FrameError::BufferTooSmall {
                expected: ACK_MIN_LEN,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        let packet_number = cursor.read_u16::<LittleEndian>()?;
        let status = AckStatus::from_byte(cursor.read_u8()?);
        Ok(Self {
            packet_number,
            status,
        })
    }

    pub fn to_bytes(&self) -> [u8; ACK_MIN_LEN] {
        let n = self.packet_number.to_le_bytes();
        let status = match self.status {
            AckStatus::Ok => ACK_STATUS_OK,
            AckStatus::Error => 0x00,
        };
        [n[0], n[1], status]
    }
}

impl fmt::Display for AckMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Packet {} - {}", self.packet_number, self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ok() {
        let ack = AckMessage::from_bytes(&[0x05, 0x00, 0x01]).unwrap();
        assert_eq!(ack, AckMessage::new(5, AckStatus::Ok));
    }

    #[test]
    fn test_decode_error() {
        let ack = AckMessage::from_bytes(&[0x05, 0x00, 0x00]).unwrap();
        assert_eq!(ack.packet_number, 5);
        assert_eq!(ack.status, AckStatus::Error);
    }

    #[test]
    fn test_any_non_one_status_is_error() {
        for b in [0x00, 0x02, 0x7F, 0xFF] {
            assert_eq!(AckStatus::from_byte(b), AckStatus::Error);
        }
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let ack = AckMessage::from_bytes(&[0x34, 0x12, 0x01, 0xAA, 0xBB]).unwrap();
        assert_eq!(ack.packet_number, 0x1234);
        assert!(ack.status.is_ok());
    }

    #[test]
    fn test_short_notification_rejected() {
        let err = AckMessage::from_bytes(&[0x05, 0x00]).unwrap_err();
        assert!(matches!(
            err,
            FrameError::BufferTooSmall {
                expected: 3,
                actual: 2
            }
        ));
        assert!(AckMessage::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_encode_matches_device_layout() {
        assert_eq!(
            AckMessage::new(0x0102, AckStatus::Ok).to_bytes(),
            [0x02, 0x01, 0x01]
        );
        assert_eq!(AckMessage::new(7, AckStatus::Error).to_bytes(), [0x07, 0x00, 0x00]);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            AckMessage::new(12, AckStatus::Error).to_string(),
            "Packet 12 - ERROR"
        );
    }
}
