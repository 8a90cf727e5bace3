//! Session-level error taxonomy.
//!
//! Every variant is terminal for the session that produced it.

use thiserror::Error;

use crate::payload::{ChunkError, FileLoadError};
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("No device matching '{filter}' found")]
    Discovery { filter: String },

    #[error("Scan failed: {0}")]
    Scan(#[source] TransportError),

    #[error("Connection failed: {0}")]
    Connection(#[source] TransportError),

    #[error("Handshake failed: {0}")]
    Handshake(#[source] TransportError),

    #[error("Transfer failed at packet {packet_index}: {source}")]
    Transfer {
        packet_index: usize,
        #[source]
        source: TransportError,
    },

    #[error("Disconnection failed: {0}")]
    Disconnection(#[source] TransportError),

    #[error(transparent)]
    FileLoad(#[from] FileLoadError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<ChunkError> for UpdateError {
    fn from(e: ChunkError) -> Self {
        UpdateError::InvalidInput(e.to_string())
    }
}

impl UpdateError {
    /// Index of the failed packet for transfer errors.
    pub fn packet_index(&self) -> Option<usize> {
        match self {
            UpdateError::Transfer { packet_index, .. } => Some(*packet_index),
            _ => None,
        }
    }
}
