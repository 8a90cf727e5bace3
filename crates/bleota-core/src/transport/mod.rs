//! Transport layer module.

pub mod btle;
pub mod mock;
pub mod traits;

pub use btle::BtleplugTransport;
pub use mock::MockTransport;
pub use traits::{AckSink, BleTransport, TransportError};
