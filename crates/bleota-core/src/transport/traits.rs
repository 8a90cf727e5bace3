//! BLE transport layer abstraction.
//!
//! Defines the `BleTransport` trait consumed by the protocol engine,
//! allowing different implementations (btleplug, mock, etc.).

use std::sync::mpsc::Sender;

use thiserror::Error;
use tracing::trace;
use uuid::Uuid;

use crate::device::DeviceHandle;
use crate::protocol::AckMessage;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No BLE adapter available: {0}")]
    AdapterUnavailable(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("Service {0} not present on device")]
    ServiceNotFound(Uuid),

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("Write to {characteristic} failed: {message}")]
    WriteFailed { characteristic: Uuid, message: String },

    #[error("Subscribe to {characteristic} failed: {message}")]
    SubscribeFailed { characteristic: Uuid, message: String },

    #[error("Failed to disconnect: {0}")]
    DisconnectFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sending half of the acknowledgment channel.
///
/// Transports push raw notification payloads here; they are decoded and
/// forwarded to the single consumer owned by the engine.
#[derive(Debug, Clone)]
pub struct AckSink {
    tx: Sender<AckMessage>,
}

impl AckSink {
    pub fn new(tx: Sender<AckMessage>) -> Self {
        Self { tx }
    }

    /// Decode and forward one notification. Returns `false` once the
    /// consumer is gone.
    pub fn deliver(&self, payload: &[u8]) -> bool {
        match AckMessage::from_bytes(payload) {
            Ok(ack) => self.send(ack),
            Err(e) => {
                trace!(len = payload.len(), error = %e, "Dropping malformed notification");
                true
            }
        }
    }

    fn send(&self, ack: AckMessage) -> bool {
        self.tx.send(ack).is_ok()
    }
}

/// Abstract BLE transport interface.
///
/// All writes issued by the engine request confirmation: a successful
/// return means the peer acknowledged the write at the link layer.
pub trait BleTransport: Send {
    /// Open a connection to the device and resolve its GATT services.
    fn connect(&mut self, device: &DeviceHandle) -> Result<(), TransportError>;

    /// Close the connection. Drops any registered notification sinks.
    fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Write `data` to a characteristic, optionally waiting for the
    /// peer's write response.
    fn write_characteristic(
        &mut self,
        characteristic: Uuid,
        data: &[u8],
        confirm: bool,
    ) -> Result<(), TransportError>;

    /// Enable notifications on a characteristic and route them to `sink`.
    fn subscribe_notifications(
        &mut self,
        characteristic: Uuid,
        sink: AckSink,
    ) -> Result<(), TransportError>;

    /// Check if the link is still up.
    fn is_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AckStatus;
    use std::sync::mpsc;

    #[test]
    fn test_sink_decodes_and_forwards() {
        let (tx, rx) = mpsc::channel();
        let sink = AckSink::new(tx);

        assert!(sink.deliver(&[0x02, 0x00, 0x01]));
        assert!(sink.deliver(&[0x02]));
        assert!(sink.deliver(&[0x03, 0x00, 0x00]));

        let acks: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            acks,
            vec![
                AckMessage::new(2, AckStatus::Ok),
                AckMessage::new(3, AckStatus::Error)
            ]
        );
    }

    #[test]
    fn test_sink_reports_closed_consumer() {
        let (tx, rx) = mpsc::channel();
        let sink = AckSink::new(tx);
        drop(rx);
        assert!(!sink.deliver(&[0x01, 0x00, 0x01]));
    }
}
