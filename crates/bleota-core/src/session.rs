//! Update session - owns one update attempt end to end.
//!
//! connect → subscribe to acks → load image → handshake → transfer →
//! disconnect. Once connected, disconnect is attempted exactly once on
//! every exit path; its failure never changes the update outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::device::{DeviceFilter, DeviceHandle};
use crate::engine::{AckMonitor, AckStats, ProtocolEngine, handshake_for};
use crate::error::UpdateError;
use crate::events::{LogLevel, TracingObserver, UpdateEvent, UpdateObserver};
use crate::payload::{FirmwareImage, split};
use crate::protocol::constants::{
    CONNECT_TIMEOUT_SECS, DEVICE_NAME_FILTER, INTER_PACKET_DELAY_MS, MAX_PACKET_SIZE,
    SCAN_TIMEOUT_SECS,
};
use crate::protocol::CharacteristicIds;
use crate::state::{SessionMachine, SessionState};
use crate::transport::BleTransport;

/// Configuration for an update session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Path to the firmware binary.
    pub firmware_path: Option<PathBuf>,
    /// Device address; when unset the first device matching the name filter is used.
    pub device_address: Option<String>,
    /// Advertised-name fragment used during discovery.
    pub device_name_filter: String,
    /// Maximum payload per data write.
    pub packet_size: usize,
    /// Pause after every confirmed data write.
    pub inter_packet_delay_ms: u64,
    pub scan_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Save the operation log beside the firmware file.
    pub save_log: bool,
    pub characteristics: CharacteristicIds,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            firmware_path: None,
            device_address: None,
            device_name_filter: DEVICE_NAME_FILTER.to_string(),
            packet_size: MAX_PACKET_SIZE,
            inter_packet_delay_ms: INTER_PACKET_DELAY_MS,
            scan_timeout_secs: SCAN_TIMEOUT_SECS,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            save_log: true,
            characteristics: CharacteristicIds::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the device cannot accept. Data writes never exceed
    /// [`MAX_PACKET_SIZE`] bytes.
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.packet_size > MAX_PACKET_SIZE {
            return Err(UpdateError::InvalidInput(format!(
                "packet size {} exceeds the {} byte limit",
                self.packet_size, MAX_PACKET_SIZE
            )));
        }
        Ok(())
    }

    pub fn device_filter(&self) -> DeviceFilter {
        DeviceFilter::by_name(&self.device_name_filter)
    }

    pub fn inter_packet_delay(&self) -> Duration {
        Duration::from_millis(self.inter_packet_delay_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Terminal status of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    pub device: DeviceHandle,
    /// `Completed` or `Failed`.
    pub status: SessionState,
    /// State after the disconnect step.
    pub final_state: SessionState,
    pub error: Option<UpdateError>,
    /// Logged only; never affects `status`.
    pub disconnect_error: Option<UpdateError>,
    pub total_packets: usize,
    pub packets_sent: usize,
    pub acks: AckStats,
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
}

impl SessionReport {
    pub fn is_success(&self) -> bool {
        self.status == SessionState::Completed
    }

    pub fn into_result(self) -> Result<Self, UpdateError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

#[derive(Debug, Default)]
struct Progress {
    total_packets: usize,
    packets_sent: usize,
}

/// One complete update attempt. Consumed by [`UpdateSession::run`].
pub struct UpdateSession<T: BleTransport, O: UpdateObserver> {
    config: SessionConfig,
    transport: T,
    observer: Arc<O>,
    device: DeviceHandle,
    firmware_path: PathBuf,
    machine: SessionMachine,
    ack_monitor: Option<AckMonitor>,
    started_at: DateTime<Local>,
}

impl<T: BleTransport> UpdateSession<T, TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(
        config: SessionConfig,
        transport: T,
        device: DeviceHandle,
        firmware_path: impl Into<PathBuf>,
    ) -> Self {
        Self::with_observer(
            config,
            transport,
            device,
            firmware_path,
            Arc::new(TracingObserver),
        )
    }
}

impl<T: BleTransport, O: UpdateObserver + 'static> UpdateSession<T, O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(
        config: SessionConfig,
        transport: T,
        device: DeviceHandle,
        firmware_path: impl Into<PathBuf>,
        observer: Arc<O>,
    ) -> Self {
        Self {
            config,
            transport,
            observer,
            device,
            firmware_path: firmware_path.into(),
            machine: SessionMachine::new(),
            ack_monitor: None,
            started_at: Local::now(),
        }
    }

    fn emit(&self, event: UpdateEvent) {
        self.observer.on_event(&event);
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(UpdateEvent::Log {
            level,
            message: message.into(),
        });
    }

    fn goto(&mut self, to: SessionState) {
        if let Some(from) = self.machine.goto_state(to) {
            self.emit(UpdateEvent::StateChanged { from, to });
        }
    }

    fn engine(&mut self) -> ProtocolEngine<'_, T, O> {
        ProtocolEngine::new(
            &mut self.transport,
            self.observer.clone(),
            self.config.characteristics,
            self.config.inter_packet_delay(),
        )
    }

    /// Run the complete update session.
    #[instrument(skip(self), fields(device = %self.device))]
    pub fn run(mut self) -> SessionReport {
        self.started_at = Local::now();
        let clock = Instant::now();
        let mut progress = Progress::default();

        self.goto(SessionState::Connecting);
        self.log(
            LogLevel::Info,
            format!("Connecting to device at {}...", self.device.address),
        );

        if let Err(e) = self.transport.connect(&self.device) {
            self.log(LogLevel::Error, format!("Connection failed: {e}"));
            let error = UpdateError::Connection(e);
            self.fail(&error);
            // Nothing to release: the link never came up.
            return self.report(progress, Some(error), None, clock);
        }

        self.goto(SessionState::Connected);
        self.log(LogLevel::Info, "Connected successfully.");
        self.emit(UpdateEvent::DeviceConnected {
            device: self.device.clone(),
        });

        let error = match self.run_connected(&mut progress) {
            Ok(()) => {
                self.goto(SessionState::Completed);
                self.emit(UpdateEvent::Complete);
                None
            }
            Err(e) => {
                self.fail(&e);
                Some(e)
            }
        };

        let disconnect_error = self.disconnect();
        self.report(progress, error, disconnect_error, clock)
    }

    fn run_connected(&mut self, progress: &mut Progress) -> Result<(), UpdateError> {
        let monitor = self.engine().subscribe_acks()?;
        self.ack_monitor = Some(monitor);

        let image = FirmwareImage::load(&self.firmware_path).map_err(|e| {
            self.log(LogLevel::Error, format!("Failed to load file: {e}"));
            UpdateError::from(e)
        })?;
        self.config.validate()?;
        let chunks = split(image.bytes(), self.config.packet_size)?;
        let handshake = handshake_for(&chunks)?;
        progress.total_packets = chunks.total_packets();
        if image.is_empty() {
            warn!("Firmware image is empty, only the handshake will be sent");
        }
        self.log(
            LogLevel::Info,
            format!(
                "File loaded: {} bytes, {} packets.",
                image.len(),
                chunks.total_packets()
            ),
        );

        self.engine().handshake(handshake)?;
        self.goto(SessionState::HandshakeSent);

        self.goto(SessionState::Transferring);
        match self.engine().send_all(chunks.packets()) {
            Ok(sent) => {
                progress.packets_sent = sent;
                Ok(())
            }
            Err(e) => {
                progress.packets_sent = e.packet_index().map_or(0, |i| i - 1);
                Err(e)
            }
        }
    }

    fn fail(&mut self, error: &UpdateError) {
        warn!(error = %error, "Update failed");
        self.goto(SessionState::Failed);
        self.emit(UpdateEvent::Error {
            message: error.to_string(),
        });
    }

    /// Best-effort release of the link.
    fn disconnect(&mut self) -> Option<UpdateError> {
        self.log(LogLevel::Info, "Disconnecting device...");
        match self.transport.disconnect() {
            Ok(()) => {
                self.log(LogLevel::Info, "Disconnected successfully.");
                self.emit(UpdateEvent::DeviceDisconnected);
                self.goto(SessionState::Disconnected);
                None
            }
            Err(e) => {
                warn!(error = %e, "Disconnect failed");
                self.log(LogLevel::Warn, format!("Disconnection error: {e}"));
                Some(UpdateError::Disconnection(e))
            }
        }
    }

    fn report(
        mut self,
        progress: Progress,
        error: Option<UpdateError>,
        disconnect_error: Option<UpdateError>,
        clock: Instant,
    ) -> SessionReport {
        let acks = self
            .ack_monitor
            .take()
            .map(AckMonitor::finish)
            .unwrap_or_default();
        let status = self.machine.outcome().unwrap_or(SessionState::Failed);
        info!(
            status = %status,
            sent = progress.packets_sent,
            total = progress.total_packets,
            acks_ok = acks.ok,
            acks_error = acks.error,
            "Session finished"
        );

        SessionReport {
            device: self.device,
            status,
            final_state: self.machine.state(),
            error,
            disconnect_error,
            total_packets: progress.total_packets,
            packets_sent: progress.packets_sent,
            acks,
            started_at: self.started_at,
            elapsed: clock.elapsed(),
        }
    }
}
