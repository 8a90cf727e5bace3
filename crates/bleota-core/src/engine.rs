//! Protocol engine: handshake, packet transfer loop and acknowledgment
//! consumer.
//!
//! The transfer loop is strictly sequential. A packet is written only
//! after the previous confirmed write returned, followed by a fixed
//! pause. Acknowledgments are telemetry: they are consumed on their own
//! thread and never gate, validate or abort the transfer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::error::UpdateError;
use crate::events::{LogLevel, UpdateEvent, UpdateObserver};
use crate::payload::{Chunks, Packet};
use crate::protocol::{AckMessage, AckStatus, CharacteristicIds, HandshakeMessage};
use crate::transport::{AckSink, BleTransport};

const ACK_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Counters collected by the acknowledgment consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckStats {
    pub ok: usize,
    pub error: usize,
    pub last_packet: Option<u16>,
}

impl AckStats {
    fn record(&mut self, ack: &AckMessage) {
        match ack.status {
            AckStatus::Ok => self.ok += 1,
            AckStatus::Error => self.error += 1,
        }
        self.last_packet = Some(ack.packet_number);
    }

    pub fn total(&self) -> usize {
        self.ok + self.error
    }
}

/// Single consumer of the acknowledgment channel.
pub struct AckMonitor {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<AckStats>>,
}

impl AckMonitor {
    pub fn spawn<O: UpdateObserver + 'static>(rx: Receiver<AckMessage>, observer: Arc<O>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = thread::Builder::new()
            .name("ack-monitor".into())
            .spawn(move || {
                let mut stats = AckStats::default();
                let mut on_ack = |ack: AckMessage| {
                    stats.record(&ack);
                    if !ack.status.is_ok() {
                        debug!(packet = ack.packet_number, "Device reported packet error");
                    }
                    observer.on_event(&UpdateEvent::AckReceived { ack });
                };

                loop {
                    match rx.recv_timeout(ACK_POLL_INTERVAL) {
                        Ok(ack) => on_ack(ack),
                        Err(RecvTimeoutError::Timeout) => {
                            if stop_flag.load(Ordering::Acquire) {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                // Anything that raced the stop flag.
                while let Ok(ack) = rx.try_recv() {
                    on_ack(ack);
                }
                stats
            });

        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                warn!(error = %e, "Failed to spawn ack monitor; acknowledgments will not be logged");
                None
            }
        };

        Self { stop, handle }
    }

    /// Stop after draining queued acknowledgments and return the counters.
    pub fn finish(mut self) -> AckStats {
        self.stop.store(true, Ordering::Release);
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                warn!("Ack monitor panicked");
                AckStats::default()
            }
            None => AckStats::default(),
        }
    }
}

impl Drop for AckMonitor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Build the handshake for an image, rejecting images the 6-byte
/// header cannot describe.
pub fn handshake_for(chunks: &Chunks<'_>) -> Result<HandshakeMessage, UpdateError> {
    let total_size = u32::try_from(chunks.total_size()).map_err(|_| {
        UpdateError::InvalidInput(format!(
            "firmware is {} bytes, maximum is {}",
            chunks.total_size(),
            u32::MAX
        ))
    })?;
    let total_packets = u16::try_from(chunks.total_packets()).map_err(|_| {
        UpdateError::InvalidInput(format!(
            "firmware needs {} packets, maximum is {}",
            chunks.total_packets(),
            u16::MAX
        ))
    })?;
    Ok(HandshakeMessage::new(total_size, total_packets))
}

/// Drives the update protocol over a borrowed transport.
pub struct ProtocolEngine<'a, T: BleTransport, O: UpdateObserver> {
    transport: &'a mut T,
    observer: Arc<O>,
    ids: CharacteristicIds,
    inter_packet_delay: Duration,
}

impl<'a, T: BleTransport, O: UpdateObserver + 'static> ProtocolEngine<'a, T, O> {
    pub fn new(
        transport: &'a mut T,
        observer: Arc<O>,
        ids: CharacteristicIds,
        inter_packet_delay: Duration,
    ) -> Self {
        Self {
            transport,
            observer,
            ids,
            inter_packet_delay,
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

    /// Route acknowledgment notifications to a new consumer thread.
    #[instrument(skip(self), fields(ack = %self.ids.ack))]
    pub fn subscribe_acks(&mut self) -> Result<AckMonitor, UpdateError> {
        let (tx, rx) = mpsc::channel();
        self.transport
            .subscribe_notifications(self.ids.ack, AckSink::new(tx))
            .map_err(UpdateError::Connection)?;
        Ok(AckMonitor::spawn(rx, self.observer.clone()))
    }

    /// Announce size and packet count. No retry.
    #[instrument(skip(self), fields(size = msg.total_size, packets = msg.total_packets))]
    pub fn handshake(&mut self, msg: HandshakeMessage) -> Result<(), UpdateError> {
        self.log(LogLevel::Info, "Sending handshake...");
        self.transport
            .write_characteristic(self.ids.handshake, &msg.to_bytes(), true)
            .map_err(|e| {
                self.log(LogLevel::Error, format!("Handshake failed: {e}"));
                UpdateError::Handshake(e)
            })?;
        self.log(LogLevel::Info, "Handshake sent.");
        Ok(())
    }

    /// Send every packet in order. Stops at the first failed write and
    /// returns the number of packets delivered on success.
    pub fn send_all<'p, I>(&mut self, packets: I) -> Result<usize, UpdateError>
    where
        I: IntoIterator<Item = Packet<'p>>,
        I::IntoIter: ExactSizeIterator,
    {
        let packets = packets.into_iter();
        let total = packets.len();
        info!(total, "Starting transfer");

        let mut sent = 0;
        for packet in packets {
            self.send_packet(&packet, total)?;
            sent += 1;
            self.emit(UpdateEvent::Progress {
                current: sent,
                total,
            });
            thread::sleep(self.inter_packet_delay);
        }

        self.log(LogLevel::Info, "All packets sent.");
        Ok(sent)
    }

    fn send_packet(&mut self, packet: &Packet<'_>, total: usize) -> Result<(), UpdateError> {
        self.log(
            LogLevel::Info,
            format!("Sending packet {}/{}...", packet.index, total),
        );
        self.transport
            .write_characteristic(self.ids.data, packet.payload, true)
            .map_err(|source| {
                warn!(index = packet.index, error = %source, "Packet write failed");
                self.log(
                    LogLevel::Error,
                    format!("Error sending packet {}, aborting update.", packet.index),
                );
                UpdateError::Transfer {
                    packet_index: packet.index,
                    source,
                }
            })?;
        debug!(index = packet.index, len = packet.len(), "Packet confirmed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceHandle;
    use crate::events::NullObserver;
    use crate::events::testing::RecordingObserver;
    use crate::payload::split;
    use crate::protocol::constants::{DATA_UUID, HANDSHAKE_UUID};
    use crate::transport::MockTransport;

    const FAST: Duration = Duration::from_millis(1);

    fn connected_mock() -> MockTransport {
        let mut mock = MockTransport::new();
        mock.connect(&DeviceHandle::new("ESP32FirmwareUpdate", "AA:BB:CC:DD:EE:FF"))
            .unwrap();
        mock
    }

    #[test]
    fn test_handshake_bytes_on_wire() {
        let mut mock = connected_mock();
        let observer = Arc::new(RecordingObserver::default());
        let mut engine =
            ProtocolEngine::new(&mut mock, observer, CharacteristicIds::default(), FAST);

        engine.handshake(HandshakeMessage::new(1000, 2)).unwrap();

        let writes = mock.writes_to(HANDSHAKE_UUID);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].data, vec![0xE8, 0x03, 0x00, 0x00, 0x02, 0x00]);
        assert!(writes[0].confirm);
    }

    #[test]
    fn test_handshake_failure_maps_to_handshake_error() {
        let mut mock = connected_mock();
        mock.fail_handshake();
        let mut engine = ProtocolEngine::new(
            &mut mock,
            Arc::new(NullObserver),
            CharacteristicIds::default(),
            FAST,
        );

        let err = engine.handshake(HandshakeMessage::new(10, 1)).unwrap_err();
        assert!(matches!(err, UpdateError::Handshake(_)));
    }

    #[test]
    fn test_handshake_for_rejects_oversized_packet_count() {
        let data = vec![0u8; (u16::MAX as usize) + 1];
        let chunks = split(&data, 1).unwrap();
        let err = handshake_for(&chunks).unwrap_err();
        assert!(matches!(err, UpdateError::InvalidInput(_)));
    }

    #[test]
    fn test_send_all_in_order() {
        let mut mock = connected_mock();
        let data: Vec<u8> = (0..1300).map(|i| i as u8).collect();
        let chunks = split(&data, 512).unwrap();
        let mut engine = ProtocolEngine::new(
            &mut mock,
            Arc::new(NullObserver),
            CharacteristicIds::default(),
            FAST,
        );

        assert_eq!(engine.send_all(chunks.packets()).unwrap(), 3);

        let payloads: Vec<Vec<u8>> = mock
            .writes_to(DATA_UUID)
            .into_iter()
            .map(|w| w.data)
            .collect();
        assert_eq!(payloads.concat(), data);
        assert_eq!(payloads[2].len(), 1300 - 1024);
    }

    #[test]
    fn test_stops_at_first_failure() {
        let mut mock = connected_mock();
        mock.fail_data_write_at(7);
        let data = vec![0x5A; 10 * 512];
        let chunks = split(&data, 512).unwrap();
        let mut engine = ProtocolEngine::new(
            &mut mock,
            Arc::new(NullObserver),
            CharacteristicIds::default(),
            FAST,
        );

        let err = engine.send_all(chunks.packets()).unwrap_err();
        assert_eq!(err.packet_index(), Some(7));
        // Packets 1..=6 delivered; 7 failed; 8..=10 never attempted.
        assert_eq!(mock.writes_to(DATA_UUID).len(), 6);
    }

    #[test]
    fn test_error_acks_do_not_abort() {
        let mut mock = connected_mock();
        mock.auto_ack(AckStatus::Error);
        let observer = Arc::new(RecordingObserver::default());
        let data = vec![1u8; 2048];
        let chunks = split(&data, 512).unwrap();

        let mut engine = ProtocolEngine::new(
            &mut mock,
            observer.clone(),
            CharacteristicIds::default(),
            FAST,
        );
        let monitor = engine.subscribe_acks().unwrap();
        assert_eq!(engine.send_all(chunks.packets()).unwrap(), 4);

        let stats = monitor.finish();
        assert_eq!(stats.error, 4);
        assert_eq!(stats.ok, 0);
        assert_eq!(stats.last_packet, Some(4));
        assert_eq!(observer.acks().len(), 4);
    }

    #[test]
    fn test_monitor_tolerates_unrelated_and_out_of_order_acks() {
        let mut mock = connected_mock();
        let observer = Arc::new(RecordingObserver::default());
        let mut engine = ProtocolEngine::new(
            &mut mock,
            observer.clone(),
            CharacteristicIds::default(),
            FAST,
        );
        let monitor = engine.subscribe_acks().unwrap();

        mock.notify(crate::protocol::constants::ACK_UUID, &[0x09, 0x00, 0x01]);
        mock.notify(crate::protocol::constants::ACK_UUID, &[0x02, 0x00, 0x00]);
        mock.notify(crate::protocol::constants::ACK_UUID, &[0x02]);

        let stats = monitor.finish();
        assert_eq!(stats.total(), 2);
        assert_eq!(
            observer.acks(),
            vec![
                AckMessage::new(9, AckStatus::Ok),
                AckMessage::new(2, AckStatus::Error)
            ]
        );
    }
}
