//! Payload handling module.
//!
//! Loads firmware images and splits them into data packets.

pub mod chunker;
pub mod image;

pub use chunker::{ChunkError, Chunks, Packet, PacketIter, split};
pub use image::{FileLoadError, FirmwareImage};
