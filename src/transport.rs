//! The seam between the session and the Bluetooth stack.
//!
//! The heater exposes one GATT service with a notify characteristic (status broadcasts,
//! bind traffic, acks) and a write characteristic (commands). The standard "service
//! changed" characteristic is subscribed best effort.

use std::time::Duration;

use async_trait::async_trait;
use bluest::Uuid;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::Result;

pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000181a_0000_1000_8000_00805f9b34fb);
pub const NOTIFY_CHAR_UUID: Uuid = Uuid::from_u128(0x00003a00_0000_1000_8000_00805f9b34fb);
pub const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x00003a01_0000_1000_8000_00805f9b34fb);
pub const SERVICE_CHANGED_UUID: Uuid = Uuid::from_u128(0x00002a05_0000_1000_8000_00805f9b34fb);

/// Receives one `Vec<u8>` per notification
pub type NotificationSink = UnboundedSender<Vec<u8>>;

/// Opens connections to peripherals
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Link: Link;

    /// Connect to the peripheral with the given address, giving up after `timeout`
    async fn connect(&self, address: &str, timeout: Duration) -> Result<Self::Link>;
}

/// One open connection to a peripheral
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// Forward every notification on `characteristic` into `sink` until the link closes or
    /// the sink is dropped. Returns once the subscription is active.
    async fn subscribe(&self, characteristic: Uuid, sink: NotificationSink) -> Result<()>;

    async fn write(&self, characteristic: Uuid, data: &[u8], with_response: bool) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Resolves when the peripheral drops the connection
    async fn closed(&self);
}
