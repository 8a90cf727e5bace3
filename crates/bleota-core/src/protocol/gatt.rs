//! GATT identifiers of the update service.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::constants::{ACK_UUID, DATA_UUID, HANDSHAKE_UUID, SERVICE_UUID};

/// Service and characteristic UUIDs used by one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacteristicIds {
    pub service: Uuid,
    pub handshake: Uuid,
    pub data: Uuid,
    pub ack: Uuid,
}

impl Default for CharacteristicIds {
    fn default() -> Self {
        Self {
            service: SERVICE_UUID,
            handshake: HANDSHAKE_UUID,
            data: DATA_UUID,
            ack: ACK_UUID,
        }
    }
}
