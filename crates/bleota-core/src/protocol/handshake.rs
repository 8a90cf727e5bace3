//! Transfer header sent once per session before any data packet.

use super::constants::HANDSHAKE_LEN;

/// Handshake (6 bytes, little-endian).
///
/// | offset | size | field         |
/// |--------|------|---------------|
/// | 0      | 4    | total size    |
/// | 4      | 2    | total packets |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandshakeMessage {
    pub total_size: u32,
    pub total_packets: u16,
}

impl HandshakeMessage {
    pub fn new(total_size: u32, total_packets: u16) -> Self {
        Self {
            total_size,
            total_packets,
        }
    }

    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0..4].copy_from_slice(&self.total_size.to_le_bytes());
        buf[4..6].copy_from_slice(&self.total_packets.to_le_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_vector() {
        let hs = HandshakeMessage::new(1000, 2);
        assert_eq!(hs.to_bytes(), [0xE8, 0x03, 0x00, 0x00, 0x02, 0x00]);
    }

    #[test]
    fn test_encode_odd_sized_image() {
        let hs = HandshakeMessage::new(1025, 3);
        assert_eq!(hs.to_bytes(), [0x01, 0x04, 0x00, 0x00, 0x03, 0x00]);
    }
}
