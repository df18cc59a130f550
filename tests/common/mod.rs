//! In-memory transport for driving a session without a radio

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bluest::Uuid;
use nordkapp_heater::transport::{Link, NotificationSink, Transport, NOTIFY_CHAR_UUID, SERVICE_CHANGED_UUID};
use nordkapp_heater::{Error, Result, Session, SessionConfig};
use tokio::sync::watch;

pub const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";
pub const MAC: [u8; 6] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];

#[derive(Default)]
pub struct MockState {
    pub connects: usize,
    pub disconnects: usize,
    pub fail_connect: bool,
    pub hang_connect: bool,
    pub fail_notify: bool,
    pub fail_service_changed: bool,
    pub fail_writes: bool,
    /// Every write, as (characteristic, data, with_response)
    pub writes: Vec<(Uuid, Vec<u8>, bool)>,
    sinks: HashMap<Uuid, NotificationSink>,
    closed: Option<watch::Sender<bool>>,
}

#[derive(Clone, Default)]
pub struct MockTransport(Arc<Mutex<MockState>>);

impl MockTransport {
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.iter().map(|(_, data, _)| data.clone()).collect()
    }

    pub fn connects(&self) -> usize {
        self.state().connects
    }

    /// Push a notification on the heater's notify characteristic
    pub fn notify(&self, data: &[u8]) {
        let state = self.state();
        let sink = state.sinks.get(&NOTIFY_CHAR_UUID).expect("not subscribed");
        sink.send(data.to_vec()).expect("session stopped listening");
    }

    /// Simulate the heater dropping the link
    pub fn drop_link(&self) {
        if let Some(closed) = self.state().closed.as_ref() {
            let _ = closed.send(true);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Link = MockLink;

    async fn connect(&self, address: &str, _timeout: Duration) -> Result<MockLink> {
        tokio::task::yield_now().await;
        let hang = {
            let mut state = self.state();
            state.connects += 1;
            if state.fail_connect {
                return Err(Error::DeviceNotFound(address.to_string()));
            }
            state.hang_connect
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let (closed_tx, closed_rx) = watch::channel(false);
        let mut state = self.state();
        state.sinks.clear();
        state.closed = Some(closed_tx);
        Ok(MockLink { transport: self.clone(), closed: closed_rx })
    }
}

pub struct MockLink {
    transport: MockTransport,
    closed: watch::Receiver<bool>,
}

#[async_trait]
impl Link for MockLink {
    async fn subscribe(&self, characteristic: Uuid, sink: NotificationSink) -> Result<()> {
        let mut state = self.transport.state();
        let failing = match characteristic {
            c if c == NOTIFY_CHAR_UUID => state.fail_notify,
            c if c == SERVICE_CHANGED_UUID => state.fail_service_changed,
            _ => false,
        };
        if failing {
            return Err(Error::CharacteristicNotFound(characteristic));
        }
        state.sinks.insert(characteristic, sink);
        Ok(())
    }

    async fn write(&self, characteristic: Uuid, data: &[u8], with_response: bool) -> Result<()> {
        let mut state = self.transport.state();
        if state.fail_writes {
            return Err(Error::Transport("write failed".to_string()));
        }
        state.writes.push((characteristic, data.to_vec(), with_response));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.transport.state().disconnects += 1;
        Ok(())
    }

    async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

pub fn new_session() -> (MockTransport, Session<MockTransport>) {
    let transport = MockTransport::default();
    let session = Session::new(transport.clone(), SessionConfig::new(ADDRESS)).unwrap();
    (transport, session)
}

/// A 52 byte status broadcast: auto run, manual mode, 12.6 V, 21.1 °C ambient, no shell sensor
pub fn status_broadcast() -> Vec<u8> {
    let mut data = vec![0u8; 52];
    data[0] = 0xAA;
    data[2] = 0xFF;
    data[8] = 0x02;
    data[9] = 0x25;
    data[10..12].copy_from_slice(&126u16.to_le_bytes());
    data[14..16].copy_from_slice(&211u16.to_le_bytes());
    data[16..18].copy_from_slice(&32760u16.to_le_bytes());
    data[22..24].copy_from_slice(&3200u16.to_le_bytes());
    data[40] = 6;
    data[41] = 22;
    data
}

/// Let spawned tasks run until everything is idle
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
