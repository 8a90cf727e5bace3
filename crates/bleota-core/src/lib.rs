//! bleota-core: firmware update over BLE GATT.
//!
//! Pushes a firmware image to an embedded device exposing the update
//! service: a 6-byte handshake announcing size and packet count, then the
//! image in fixed-size confirmed writes, while per-packet acknowledgments
//! are logged from a notification characteristic.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: UUIDs, constants, handshake and ack framing
//! - **Payload**: Firmware loading and packet chunking
//! - **Transport**: BLE communication abstraction (btleplug, mock)
//! - **State**: Session lifecycle state machine
//! - **Engine**: Handshake, transfer loop and ack consumer
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator and configuration
//!
//! # Example
//!
//! ```no_run
//! use bleota_core::device::DeviceHandle;
//! use bleota_core::session::{SessionConfig, UpdateSession};
//! use bleota_core::transport::BtleplugTransport;
//!
//! let transport = BtleplugTransport::open().expect("no BLE adapter");
//! let device = DeviceHandle::new("ESP32FirmwareUpdate", "24:0A:C4:12:34:56");
//!
//! let session = UpdateSession::new(SessionConfig::default(), transport, device, "app.bin");
//! let report = session.run();
//! assert!(report.is_success());
//! ```

pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod session_log;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use device::{DeviceFilter, DeviceHandle, select_first};
pub use engine::{AckMonitor, AckStats, ProtocolEngine, handshake_for};
pub use error::UpdateError;
pub use events::{LogLevel, NullObserver, TracingObserver, UpdateEvent, UpdateObserver};
pub use payload::{Chunks, FirmwareImage, Packet, split};
pub use protocol::{AckMessage, AckStatus, CharacteristicIds, HandshakeMessage};
pub use session::{SessionConfig, SessionReport, UpdateSession};
pub use session_log::{SessionLog, log_path_for};
pub use state::{SessionMachine, SessionState};
pub use transport::{BleTransport, BtleplugTransport, MockTransport, TransportError};
