//! [`Transport`] over the platform Bluetooth stack via `bluest`

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, ConnectionEvent, Device, Uuid};
use futures_util::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::transport::{Link, NotificationSink, Transport, SERVICE_UUID};

pub struct BluestTransport {
    adapter: Adapter,
}

impl BluestTransport {
    /// Open the default adapter and wait for it to be powered on
    pub async fn new() -> Result<Self> {
        let adapter = Adapter::default().await.ok_or(Error::AdapterNotFound)?;
        adapter.wait_available().await?;
        Ok(Self { adapter })
    }

    /// Find the heater among already connected devices, so that a link held by the OS
    /// is reused rather than waiting for an advertisement.
    async fn resolve_device(&self, address: &str) -> Result<Option<Device>> {
        let devices = self.adapter.connected_devices().await?;
        Ok(devices.into_iter().find(|d| id_matches(d, address)))
    }

    async fn discover_device(&self, address: &str) -> Result<Device> {
        let required_services = [SERVICE_UUID];
        let mut adapter_events = self.adapter.scan(&required_services).await?;
        while let Some(device) = adapter_events.next().await {
            if id_matches(&device.device, address) {
                return Ok(device.device);
            }
            trace!(id = ?device.device.id(), "Ignoring advertisement");
        }

        Err(Error::DeviceNotFound(address.to_string()))
    }
}

/// Platforms render device ids differently (`AA:BB:..`, `BluetoothLE#..-aa:bb:..`), so
/// compare the hex digits only.
fn id_matches(device: &Device, address: &str) -> bool {
    let hex_digits = |s: &str| -> String {
        s.chars().filter(char::is_ascii_hexdigit).collect::<String>().to_ascii_lowercase()
    };
    let wanted = hex_digits(address);
    !wanted.is_empty() && hex_digits(&format!("{:?}", device.id())).ends_with(&wanted)
}

/// A failed lookup among connected devices is not fatal, the scan still finds the heater
fn known_or_scan<D>(resolved: Result<Option<D>>) -> Option<D> {
    resolved.unwrap_or_else(|err| {
        debug!("Cannot list connected devices: {err}");
        None
    })
}

/// Runs `disconnect` when dropped, unless disarmed first
struct DisconnectGuard<F: FnOnce()> {
    disconnect: Option<F>,
}

impl<F: FnOnce()> DisconnectGuard<F> {
    fn new(disconnect: F) -> Self {
        Self { disconnect: Some(disconnect) }
    }

    fn disarm(mut self) {
        self.disconnect = None;
    }
}

impl<F: FnOnce()> Drop for DisconnectGuard<F> {
    fn drop(&mut self) {
        if let Some(disconnect) = self.disconnect.take() {
            disconnect();
        }
    }
}

async fn discover_characteristics(device: &Device) -> Result<HashMap<Uuid, Characteristic>> {
    let mut characteristics = HashMap::new();
    for service in device.discover_services().await? {
        for characteristic in service.discover_characteristics().await? {
            characteristics.insert(characteristic.uuid(), characteristic);
        }
    }
    Ok(characteristics)
}

#[async_trait]
impl Transport for BluestTransport {
    type Link = BluestLink;

    async fn connect(&self, address: &str, connect_timeout: Duration) -> Result<BluestLink> {
        let deadline = Instant::now() + connect_timeout;

        let device = match known_or_scan(self.resolve_device(address).await) {
            Some(device) => device,
            None => {
                debug!(address, "Heater not known to the adapter, scanning");
                tokio::time::timeout_at(deadline, self.discover_device(address))
                    .await
                    .map_err(|_| Error::DeviceNotFound(address.to_string()))??
            }
        };

        // Dropped on error or when the caller gives up, which closes the OS level link
        let guard = DisconnectGuard::new({
            let adapter = self.adapter.clone();
            let device = device.clone();
            move || {
                tokio::spawn(async move {
                    if let Err(err) = adapter.disconnect_device(&device).await {
                        debug!("Disconnect after failed connect: {err}");
                    }
                });
            }
        });

        tokio::time::timeout_at(deadline, self.adapter.connect_device(&device)).await??;
        info!(address, "Bluetooth link up");
        let characteristics = tokio::time::timeout_at(deadline, discover_characteristics(&device)).await??;
        guard.disarm();

        Ok(BluestLink {
            adapter: self.adapter.clone(),
            device,
            characteristics,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

pub struct BluestLink {
    adapter: Adapter,
    device: Device,
    characteristics: HashMap<Uuid, Characteristic>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BluestLink {
    fn characteristic(&self, uuid: Uuid) -> Result<&Characteristic> {
        self.characteristics.get(&uuid).ok_or(Error::CharacteristicNotFound(uuid))
    }

    fn abort_tasks(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl Link for BluestLink {
    async fn subscribe(&self, uuid: Uuid, sink: NotificationSink) -> Result<()> {
        let characteristic = self.characteristic(uuid)?.clone();
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut reader = match characteristic.notify().await {
                Ok(reader) => {
                    let _ = ready_tx.send(Ok(()));
                    reader
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            while let Some(notification) = reader.next().await {
                match notification {
                    Ok(data) => {
                        if sink.send(data).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        debug!(%uuid, "Notification error: {err}");
                        break;
                    }
                }
            }
            trace!(%uuid, "Notification stream ended");
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }

        ready_rx
            .await
            .map_err(|_| Error::Transport(format!("subscription to {uuid} was dropped")))??;
        Ok(())
    }

    async fn write(&self, uuid: Uuid, data: &[u8], with_response: bool) -> Result<()> {
        let characteristic = self.characteristic(uuid)?;
        if with_response {
            characteristic.write(data).await?;
        } else {
            characteristic.write_without_response(data).await?;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.abort_tasks();
        self.adapter.disconnect_device(&self.device).await?;
        Ok(())
    }

    async fn closed(&self) {
        let mut events = match self.adapter.device_connection_events(&self.device).await {
            Ok(events) => events,
            Err(err) => {
                warn!("Cannot watch connection events: {err}");
                return std::future::pending().await;
            }
        };
        while let Some(event) = events.next().await {
            if matches!(event, ConnectionEvent::Disconnected) {
                return;
            }
        }
    }
}

impl Drop for BluestLink {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn counting_guard(count: &Arc<AtomicUsize>) -> DisconnectGuard<impl FnOnce()> {
        let count = count.clone();
        DisconnectGuard::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_disconnects_when_connect_is_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let connect = async {
            let guard = counting_guard(&count);
            // Service discovery that outlives the caller's timeout
            std::future::pending::<()>().await;
            guard.disarm();
        };

        assert!(tokio::time::timeout(Duration::from_secs(30), connect).await.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_disconnects_on_error() {
        let count = Arc::new(AtomicUsize::new(0));
        let connect = async {
            let guard = counting_guard(&count);
            tokio::time::timeout(Duration::from_secs(1), std::future::pending::<()>()).await?;
            guard.disarm();
            Ok::<_, Error>(())
        };

        assert!(matches!(connect.await, Err(Error::Timeout(_))));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_guard_disarmed_after_success() {
        let count = Arc::new(AtomicUsize::new(0));
        counting_guard(&count).disarm();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_lookup_falls_back_to_scan() {
        assert_eq!(known_or_scan(Ok(Some(7))), Some(7));
        assert_eq!(known_or_scan::<u8>(Ok(None)), None);
        assert_eq!(known_or_scan::<u8>(Err(Error::Transport("no adapter".to_string()))), None);
    }
}
