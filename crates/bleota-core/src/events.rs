//! Event system for UI decoupling.
//!
//! Allows a CLI, log file or GUI to follow an update session without
//! tight coupling to the protocol engine.

use std::fmt;

use crate::device::DeviceHandle;
use crate::protocol::AckMessage;
use crate::state::SessionState;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted during an update session.
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    /// Session state changed.
    StateChanged { from: SessionState, to: SessionState },
    /// Link established with the device.
    DeviceConnected { device: DeviceHandle },
    /// Link closed.
    DeviceDisconnected,
    /// Data packet confirmed by the transport.
    Progress { current: usize, total: usize },
    /// Acknowledgment notified by the device.
    AckReceived { ack: AckMessage },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Terminal failure of the session.
    Error { message: String },
    /// All packets delivered.
    Complete,
}

impl UpdateEvent {
    /// Human-readable line for operation logs, if the event warrants one.
    pub fn message(&self) -> Option<String> {
        match self {
            UpdateEvent::Log { message, .. } => Some(message.clone()),
            UpdateEvent::AckReceived { ack } => Some(format!("Device ack: {ack}")),
            UpdateEvent::Error { message } => Some(format!("Error: {message}")),
            UpdateEvent::Complete => Some("Update process complete.".to_string()),
            UpdateEvent::StateChanged { .. }
            | UpdateEvent::DeviceConnected { .. }
            | UpdateEvent::DeviceDisconnected
            | UpdateEvent::Progress { .. } => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Observer trait for receiving session events.
///
/// Events may arrive from the acknowledgment consumer thread as well as
/// from the session thread.
pub trait UpdateObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &UpdateEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl UpdateObserver for NullObserver {
    fn on_event(&self, _event: &UpdateEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl UpdateObserver for TracingObserver {
    fn on_event(&self, event: &UpdateEvent) {
        match event {
            UpdateEvent::StateChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "State changed");
            }
            UpdateEvent::DeviceConnected { device } => {
                tracing::info!(device = %device, "Device connected");
            }
            UpdateEvent::DeviceDisconnected => {
                tracing::info!("Device disconnected");
            }
            UpdateEvent::Progress { current, total } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    100
                };
                tracing::debug!(current, total, progress = %format!("{}%", pct), "Progress");
            }
            UpdateEvent::AckReceived { ack } => {
                tracing::debug!(packet = ack.packet_number, status = %ack.status, "ACK received");
            }
            UpdateEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            UpdateEvent::Error { message } => {
                tracing::error!("Error: {}", message);
            }
            UpdateEvent::Complete => {
                tracing::info!("Update complete");
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AckStatus;

    #[test]
    fn test_messages_for_log_lines() {
        let ack = UpdateEvent::AckReceived {
            ack: AckMessage::new(4, AckStatus::Ok),
        };
        assert_eq!(ack.message().as_deref(), Some("Device ack: Packet 4 - OK"));

        let progress = UpdateEvent::Progress {
            current: 1,
            total: 2,
        };
        assert!(progress.message().is_none());
    }
}
