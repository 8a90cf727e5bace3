//! btleplug-based BLE transport implementation.
//!
//! btleplug is async-only; the transport owns a small tokio runtime and
//! blocks on it so the engine can stay synchronous. Do not call these
//! methods from inside another tokio runtime.

use std::time::Duration;

use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::traits::{AckSink, BleTransport, TransportError};
use crate::device::{DeviceFilter, DeviceHandle};
use crate::protocol::constants::{CONNECT_TIMEOUT_SECS, SERVICE_UUID};

/// btleplug-based BLE transport.
pub struct BtleplugTransport {
    runtime: Runtime,
    adapter: Adapter,
    service: Uuid,
    connect_timeout: Duration,
    peripheral: Option<Peripheral>,
    notify_tasks: Vec<JoinHandle<()>>,
}

impl BtleplugTransport {
    /// Open the first BLE adapter on the system.
    #[instrument(level = "info")]
    pub fn open() -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("bleota-btle")
            .enable_all()
            .build()?;

        let adapter = runtime.block_on(async {
            let manager = Manager::new()
                .await
                .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?;
            let adapters = manager
                .adapters()
                .await
                .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?;
            adapters
                .into_iter()
                .next()
                .ok_or_else(|| TransportError::AdapterUnavailable("no adapter found".into()))
        })?;

        info!("BLE adapter ready");

        Ok(Self {
            runtime,
            adapter,
            service: SERVICE_UUID,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            peripheral: None,
            notify_tasks: Vec::new(),
        })
    }

    /// Service that must be present after connecting.
    pub fn with_service(mut self, service: Uuid) -> Self {
        self.service = service;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Scan for `timeout` and return devices whose name matches `filter`.
    #[instrument(skip(self, filter), fields(filter = %filter.name_contains))]
    pub fn discover(
        &self,
        filter: &DeviceFilter,
        timeout: Duration,
    ) -> Result<Vec<DeviceHandle>, TransportError> {
        self.runtime.block_on(async {
            self.adapter
                .start_scan(ScanFilter::default())
                .await
                .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?;
            tokio::time::sleep(timeout).await;
            if let Err(e) = self.adapter.stop_scan().await {
                warn!(error = %e, "Failed to stop scan");
            }

            let peripherals = self
                .adapter
                .peripherals()
                .await
                .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?;

            let mut found = Vec::new();
            for peripheral in peripherals {
                let Some(props) = peripheral.properties().await.ok().flatten() else {
                    continue;
                };
                if !filter.matches(props.local_name.as_deref()) {
                    continue;
                }
                let device = DeviceHandle::new(
                    props.local_name.unwrap_or_default(),
                    peripheral.id().to_string(),
                );
                debug!(device = %device, rssi = ?props.rssi, "Matched device");
                found.push(device);
            }
            Ok::<_, TransportError>(found)
        })
    }

    fn find_characteristic(
        &self,
        uuid: Uuid,
    ) -> Result<(Peripheral, Characteristic), TransportError> {
        let peripheral = self
            .peripheral
            .clone()
            .ok_or(TransportError::NotConnected)?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))?;
        Ok((peripheral, characteristic))
    }

    async fn lookup(
        adapter: &Adapter,
        address: &str,
    ) -> Result<Option<Peripheral>, TransportError> {
        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?;
        Ok(peripherals
            .into_iter()
            .find(|p| p.id().to_string() == address || p.address().to_string() == address))
    }

    fn stop_notify_tasks(&mut self) {
        for task in self.notify_tasks.drain(..) {
            task.abort();
        }
    }
}

impl BleTransport for BtleplugTransport {
    #[instrument(skip(self, device), fields(device = %device))]
    fn connect(&mut self, device: &DeviceHandle) -> Result<(), TransportError> {
        let adapter = self.adapter.clone();
        let service = self.service;
        let connect_timeout = self.connect_timeout;
        let address = device.address.clone();

        let peripheral = self.runtime.block_on(async move {
            let peripheral = match Self::lookup(&adapter, &address).await? {
                Some(p) => p,
                None => {
                    // Not in the adapter cache; a short rescan usually brings it back.
                    debug!(address = %address, "Device not cached, rescanning");
                    adapter
                        .start_scan(ScanFilter::default())
                        .await
                        .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?;
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    if let Err(e) = adapter.stop_scan().await {
                        warn!(error = %e, "Failed to stop scan");
                    }
                    Self::lookup(&adapter, &address)
                        .await?
                        .ok_or_else(|| TransportError::DeviceNotFound(address.clone()))?
                }
            };

            match tokio::time::timeout(connect_timeout, peripheral.connect()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(TransportError::ConnectFailed(e.to_string())),
                Err(_) => {
                    let _ = peripheral.disconnect().await;
                    return Err(TransportError::Timeout {
                        timeout_ms: connect_timeout.as_millis() as u64,
                    });
                }
            }

            if let Err(e) = peripheral.discover_services().await {
                let _ = peripheral.disconnect().await;
                return Err(TransportError::ConnectFailed(format!(
                    "service discovery failed: {e}"
                )));
            }

            if !peripheral.services().iter().any(|s| s.uuid == service) {
                let _ = peripheral.disconnect().await;
                return Err(TransportError::ServiceNotFound(service));
            }

            Ok(peripheral)
        })?;

        info!("Connected");
        self.peripheral = Some(peripheral);
        Ok(())
    }

    #[instrument(skip(self))]
    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.stop_notify_tasks();
        let peripheral = self.peripheral.as_ref().ok_or(TransportError::NotConnected)?;
        self.runtime
            .block_on(peripheral.disconnect())
            .map_err(|e| TransportError::DisconnectFailed(e.to_string()))?;
        // Forget the link only once it is really down.
        self.peripheral = None;
        info!("Disconnected");
        Ok(())
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write_characteristic(
        &mut self,
        characteristic: Uuid,
        data: &[u8],
        confirm: bool,
    ) -> Result<(), TransportError> {
        let (peripheral, target) = self.find_characteristic(characteristic)?;
        let write_type = if confirm {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        self.runtime
            .block_on(peripheral.write(&target, data, write_type))
            .map_err(|e| TransportError::WriteFailed {
                characteristic,
                message: e.to_string(),
            })?;

        debug!(bytes_written = data.len(), "Write complete");
        Ok(())
    }

    #[instrument(skip(self, sink))]
    fn subscribe_notifications(
        &mut self,
        characteristic: Uuid,
        sink: AckSink,
    ) -> Result<(), TransportError> {
        let (peripheral, target) = self.find_characteristic(characteristic)?;
        if !target.properties.contains(CharPropFlags::NOTIFY) {
            return Err(TransportError::SubscribeFailed {
                characteristic,
                message: format!("no NOTIFY property ({:?})", target.properties),
            });
        }

        let subscribe_err = |e: btleplug::Error| TransportError::SubscribeFailed {
            characteristic,
            message: e.to_string(),
        };

        let mut stream = self.runtime.block_on(async {
            peripheral.subscribe(&target).await.map_err(subscribe_err)?;
            peripheral.notifications().await.map_err(subscribe_err)
        })?;

        // The notification stream is shared by every subscribed
        // characteristic; filter on ours.
        let task = self.runtime.spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != characteristic {
                    continue;
                }
                if !sink.deliver(&notification.value) {
                    break;
                }
            }
            debug!(%characteristic, "Notification stream closed");
        });
        self.notify_tasks.push(task);

        info!("Subscribed to notifications");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.peripheral
            .as_ref()
            .is_some_and(|p| self.runtime.block_on(p.is_connected()).unwrap_or(false))
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        self.stop_notify_tasks();
    }
}
