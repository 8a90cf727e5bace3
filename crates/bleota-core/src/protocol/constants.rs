//! Protocol constants: GATT identifiers, framing sizes and timing.

use std::time::Duration;

use uuid::Uuid;

/// Firmware update GATT service.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_1234_1234_1234567890ab);
/// Handshake characteristic (write with response).
pub const HANDSHAKE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_1234_1234_1234567890ac);
/// Data characteristic (write with response).
pub const DATA_UUID: Uuid = Uuid::from_u128(0x12345678_1234_1234_1234_1234567890ad);
/// Acknowledgment characteristic (notify).
pub const ACK_UUID: Uuid = Uuid::from_u128(0x12345678_1234_1234_1234_1234567890ae);

/// Advertised name fragment of devices running the updater.
pub const DEVICE_NAME_FILTER: &str = "ESP32FirmwareUpdate";

/// Maximum payload per data write.
pub const MAX_PACKET_SIZE: usize = 512;

pub const HANDSHAKE_LEN: usize = 6;
pub const ACK_MIN_LEN: usize = 3;

/// Status byte the device sends for a packet it accepted.
pub const ACK_STATUS_OK: u8 = 0x01;

pub const INTER_PACKET_DELAY_MS: u64 = 50;
pub const INTER_PACKET_DELAY: Duration = Duration::from_millis(INTER_PACKET_DELAY_MS);

pub const SCAN_TIMEOUT_SECS: u64 = 5;
pub const CONNECT_TIMEOUT_SECS: u64 = 15;
