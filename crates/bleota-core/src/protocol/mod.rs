//! Protocol module - wire formats of the firmware update service.

pub mod ack;
pub mod constants;
pub mod gatt;
pub mod handshake;

pub use ack::{AckMessage, AckStatus, FrameError};
pub use constants::*;
pub use gatt::CharacteristicIds;
pub use handshake::HandshakeMessage;
