//! Mock BLE transport for testing.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use uuid::Uuid;

use super::traits::{AckSink, BleTransport, TransportError};
use crate::device::DeviceHandle;
use crate::protocol::constants::{ACK_UUID, DATA_UUID, HANDSHAKE_UUID};
use crate::protocol::{AckMessage, AckStatus};

/// One captured characteristic write.
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub characteristic: Uuid,
    pub data: Vec<u8>,
    pub confirm: bool,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    connected_to: Option<DeviceHandle>,
    connect_calls: usize,
    disconnect_calls: usize,
    writes: Vec<WriteRecord>,
    data_writes: usize,
    sinks: Vec<(Uuid, AckSink)>,
    fail_connect: bool,
    fail_subscribe: bool,
    fail_handshake: bool,
    fail_disconnect: bool,
    /// 1-based data write that fails.
    fail_data_write_at: Option<usize>,
    /// Notify an ack for every accepted data write.
    auto_ack: Option<AckStatus>,
}

/// Mock transport for unit testing engine and session logic.
///
/// Clones share state, so a test can keep a probe handle after moving
/// the transport into a session.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `connect` fail.
    pub fn fail_connect(&self) {
        self.state.lock().unwrap().fail_connect = true;
    }

    /// Make `subscribe_notifications` fail.
    pub fn fail_subscribe(&self) {
        self.state.lock().unwrap().fail_subscribe = true;
    }

    /// Make writes to the handshake characteristic fail.
    pub fn fail_handshake(&self) {
        self.state.lock().unwrap().fail_handshake = true;
    }

    /// Make the `n`th data write (1-based) fail.
    pub fn fail_data_write_at(&self, n: usize) {
        self.state.lock().unwrap().fail_data_write_at = Some(n);
    }

    /// Make `disconnect` fail.
    pub fn fail_disconnect(&self) {
        self.state.lock().unwrap().fail_disconnect = true;
    }

    /// Emit an ack with `status` for every accepted data write.
    pub fn auto_ack(&self, status: AckStatus) {
        self.state.lock().unwrap().auto_ack = Some(status);
    }

    /// Push a raw notification to every sink registered on `characteristic`.
    pub fn notify(&self, characteristic: Uuid, payload: &[u8]) {
        let state = self.state.lock().unwrap();
        for (uuid, sink) in &state.sinks {
            if *uuid == characteristic {
                sink.deliver(payload);
            }
        }
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<WriteRecord> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Captured writes to one characteristic.
    pub fn writes_to(&self, characteristic: Uuid) -> Vec<WriteRecord> {
        self.get_writes()
            .into_iter()
            .filter(|w| w.characteristic == characteristic)
            .collect()
    }

    pub fn connect_calls(&self) -> usize {
        self.state.lock().unwrap().connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.lock().unwrap().disconnect_calls
    }

    pub fn connected_to(&self) -> Option<DeviceHandle> {
        self.state.lock().unwrap().connected_to.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().unwrap().sinks.len()
    }
}

impl BleTransport for MockTransport {
    fn connect(&mut self, device: &DeviceHandle) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.connect_calls += 1;
        if state.fail_connect {
            return Err(TransportError::ConnectFailed(format!(
                "{} unreachable",
                device.address
            )));
        }
        state.connected = true;
        state.connected_to = Some(device.clone());
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.disconnect_calls += 1;
        state.sinks.clear();
        if state.fail_disconnect {
            return Err(TransportError::DisconnectFailed("link busy".into()));
        }
        state.connected = false;
        Ok(())
    }

    fn write_characteristic(
        &mut self,
        characteristic: Uuid,
        data: &[u8],
        confirm: bool,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }

        if characteristic == HANDSHAKE_UUID && state.fail_handshake {
            return Err(TransportError::WriteFailed {
                characteristic,
                message: "handshake rejected".into(),
            });
        }

        if characteristic == DATA_UUID {
            state.data_writes += 1;
            if state.fail_data_write_at == Some(state.data_writes) {
                return Err(TransportError::WriteFailed {
                    characteristic,
                    message: "GATT write error".into(),
                });
            }
        }

        state.writes.push(WriteRecord {
            characteristic,
            data: data.to_vec(),
            confirm,
            at: Instant::now(),
        });

        if characteristic == DATA_UUID
            && let Some(status) = state.auto_ack
        {
            let frame = AckMessage::new(state.data_writes as u16, status).to_bytes();
            for (uuid, sink) in &state.sinks {
                if *uuid == ACK_UUID {
                    sink.deliver(&frame);
                }
            }
        }

        Ok(())
    }

    fn subscribe_notifications(
        &mut self,
        characteristic: Uuid,
        sink: AckSink,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.fail_subscribe {
            return Err(TransportError::SubscribeFailed {
                characteristic,
                message: "CCCD write refused".into(),
            });
        }
        state.sinks.push((characteristic, sink));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn device() -> DeviceHandle {
        DeviceHandle::new("ESP32FirmwareUpdate", "24:0A:C4:00:00:01")
    }

    #[test]
    fn test_mock_write_capture() {
        let mut mock = MockTransport::new();
        mock.connect(&device()).unwrap();
        mock.write_characteristic(DATA_UUID, b"Hello", true).unwrap();
        mock.write_characteristic(DATA_UUID, b"World", true).unwrap();

        let writes = mock.writes_to(DATA_UUID);
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].data, b"Hello");
        assert_eq!(writes[1].data, b"World");
        assert!(writes.iter().all(|w| w.confirm));
    }

    #[test]
    fn test_mock_requires_connection() {
        let mut mock = MockTransport::new();
        assert!(matches!(
            mock.write_characteristic(DATA_UUID, b"x", true),
            Err(TransportError::NotConnected)
        ));
    }

    #[test]
    fn test_mock_nth_data_write_fails() {
        let mut mock = MockTransport::new();
        mock.fail_data_write_at(2);
        mock.connect(&device()).unwrap();

        assert!(mock.write_characteristic(DATA_UUID, b"1", true).is_ok());
        assert!(mock.write_characteristic(DATA_UUID, b"2", true).is_err());
        assert_eq!(mock.writes_to(DATA_UUID).len(), 1);
    }

    #[test]
    fn test_mock_notifications_reach_sink() {
        let mut mock = MockTransport::new();
        mock.connect(&device()).unwrap();

        let (tx, rx) = mpsc::channel();
        mock.subscribe_notifications(ACK_UUID, AckSink::new(tx))
            .unwrap();
        mock.notify(ACK_UUID, &[0x07, 0x00, 0x01]);

        assert_eq!(rx.try_recv().unwrap(), AckMessage::new(7, AckStatus::Ok));
    }

    #[test]
    fn test_mock_auto_ack_goes_through_decoder() {
        let mut mock = MockTransport::new();
        mock.auto_ack(AckStatus::Error);
        mock.connect(&device()).unwrap();

        let (tx, rx) = mpsc::channel();
        mock.subscribe_notifications(ACK_UUID, AckSink::new(tx))
            .unwrap();
        mock.write_characteristic(HANDSHAKE_UUID, &[0; 6], true)
            .unwrap();
        mock.write_characteristic(DATA_UUID, b"a", true).unwrap();
        mock.write_characteristic(DATA_UUID, b"b", true).unwrap();

        let acks: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            acks,
            vec![
                AckMessage::new(1, AckStatus::Error),
                AckMessage::new(2, AckStatus::Error)
            ]
        );
    }

    #[test]
    fn test_failed_disconnect_keeps_link() {
        let mut mock = MockTransport::new();
        mock.fail_disconnect();
        mock.connect(&device()).unwrap();

        assert!(mock.disconnect().is_err());
        assert!(mock.is_connected());
        assert_eq!(mock.disconnect_calls(), 1);
    }

    #[test]
    fn test_mock_disconnect_drops_sinks() {
        let mut mock = MockTransport::new();
        mock.connect(&device()).unwrap();

        let (tx, rx) = mpsc::channel();
        mock.subscribe_notifications(ACK_UUID, AckSink::new(tx))
            .unwrap();
        mock.disconnect().unwrap();

        assert!(!mock.is_connected());
        assert_eq!(mock.subscriber_count(), 0);
        assert!(rx.recv().is_err());
    }
}
