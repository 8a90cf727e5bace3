//! Fixed-size packet chunking.
//!
//! Packets are numbered from 1. Every packet carries exactly
//! `max_packet_size` bytes except the last, which carries the remainder
//! (or a full packet when the image length divides evenly).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Invalid packet size: {0} (must be positive)")]
    InvalidPacketSize(usize),
}

/// One framed chunk of the firmware image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    /// 1-based position in transmission order.
    pub index: usize,
    pub payload: &'a [u8],
}

impl Packet<'_> {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Result of [`split`]: image totals plus a restartable packet sequence.
#[derive(Debug, Clone, Copy)]
pub struct Chunks<'a> {
    data: &'a [u8],
    max_packet_size: usize,
}

impl<'a> Chunks<'a> {
    pub fn total_size(&self) -> usize {
        self.data.len()
    }

    pub fn total_packets(&self) -> usize {
        self.data.len().div_ceil(self.max_packet_size)
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Fresh iterator starting at packet 1.
    pub fn packets(&self) -> PacketIter<'a> {
        PacketIter {
            data: self.data,
            max_packet_size: self.max_packet_size,
            offset: 0,
            next_index: 1,
        }
    }
}

impl<'a> IntoIterator for Chunks<'a> {
    type Item = Packet<'a>;
    type IntoIter = PacketIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.packets()
    }
}

/// Lazy iterator over packets in ascending index order.
#[derive(Debug, Clone)]
pub struct PacketIter<'a> {
    data: &'a [u8],
    max_packet_size: usize,
    offset: usize,
    next_index: usize,
}

impl<'a> Iterator for PacketIter<'a> {
    type Item = Packet<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }

        let remaining = self.data.len() - self.offset;
        let len = remaining.min(self.max_packet_size);

        let packet = Packet {
            index: self.next_index,
            payload: &self.data[self.offset..self.offset + len],
        };
        self.offset += len;
        self.next_index += 1;

        Some(packet)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.data.len() - self.offset).div_ceil(self.max_packet_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PacketIter<'_> {}

/// Split `data` into packets of at most `max_packet_size` bytes.
pub fn split(data: &[u8], max_packet_size: usize) -> Result<Chunks<'_>, ChunkError> {
    if max_packet_size == 0 {
        return Err(ChunkError::InvalidPacketSize(max_packet_size));
    }
    Ok(Chunks {
        data,
        max_packet_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::MAX_PACKET_SIZE;
    use proptest::prelude::*;

    #[test]
    fn test_empty_image() {
        let chunks = split(&[], MAX_PACKET_SIZE).unwrap();
        assert_eq!(chunks.total_size(), 0);
        assert_eq!(chunks.total_packets(), 0);
        assert_eq!(chunks.packets().count(), 0);
    }

    #[test]
    fn test_exact_multiple_keeps_full_last_packet() {
        let data = vec![0xAB; 1024];
        let chunks = split(&data, 512).unwrap();
        let lens: Vec<_> = chunks.packets().map(|p| p.len()).collect();
        assert_eq!(lens, vec![512, 512]);
    }

    #[test]
    fn test_remainder_packet() {
        let data = vec![0u8; 1025];
        let chunks = split(&data, 512).unwrap();
        assert_eq!(chunks.total_packets(), 3);

        let packets: Vec<_> = chunks.packets().collect();
        assert_eq!(
            packets.iter().map(|p| p.len()).collect::<Vec<_>>(),
            vec![512, 512, 1]
        );
        assert_eq!(
            packets.iter().map(|p| p.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_restartable() {
        let data: Vec<u8> = (0..=255).collect();
        let chunks = split(&data, 100).unwrap();

        let mut first = chunks.packets();
        first.next();
        first.next();

        let again: Vec<_> = chunks.packets().map(|p| p.index).collect();
        assert_eq!(again, vec![1, 2, 3]);
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_zero_packet_size_rejected() {
        assert_eq!(
            split(b"abc", 0).unwrap_err(),
            ChunkError::InvalidPacketSize(0)
        );
    }

    proptest! {
        #[test]
        fn prop_split_round_trips(
            data in prop::collection::vec(any::<u8>(), 0..4096),
            max in 1..700usize
        ) {
            let chunks = split(&data, max).unwrap();
            let packets: Vec<_> = chunks.packets().collect();

            prop_assert_eq!(chunks.total_size(), data.len());
            prop_assert_eq!(packets.len(), data.len().div_ceil(max));
            prop_assert_eq!(chunks.total_packets(), packets.len());

            let joined: Vec<u8> = packets.iter().flat_map(|p| p.payload.iter().copied()).collect();
            prop_assert_eq!(&joined, &data);

            let short = packets.iter().filter(|p| p.len() < max).count();
            prop_assert!(short <= 1);
            for (i, p) in packets.iter().enumerate() {
                prop_assert_eq!(p.index, i + 1);
                prop_assert!(p.len() <= max);
                prop_assert!(!p.is_empty());
                if i + 1 < packets.len() {
                    prop_assert_eq!(p.len(), max);
                }
            }
        }
    }
}
