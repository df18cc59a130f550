//! The connection life cycle of one heater.
//!
//! ```text
//! Disconnected --refresh--> Connecting --link up, subscribed--> Connected(unbound)
//!      ^                        |                                   | enable stream, settle, bind
//!      |                        | failure                           v
//!      +------------------------+------ link dropped ------- Connected(bound) <--refresh: keepalive
//! ```
//!
//! Inbound traffic (notifications, the transport's disconnect signal, deferred rebinds) is
//! funnelled through one channel into a single control loop, so it is handled in order and
//! never waits for a connect attempt. Connect attempts are serialized by `connect_lock`.
//! Every connection gets a generation number and events from an older connection are
//! ignored.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, trace, warn};

use crate::codec::{build_auto_update, build_bind_response};
use crate::error::{Error, Result};
use crate::heater_state::HeaterSnapshot;
use crate::message::Notification;
use crate::transport::{Link, Transport, NOTIFY_CHAR_UUID, SERVICE_CHANGED_UUID, WRITE_CHAR_UUID};

/// Settings for one heater session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bluetooth address of the heater, `AA:BB:CC:DD:EE:FF`
    pub address: String,
    /// Upper bound for opening the link, including discovery
    pub connect_timeout: Duration,
    /// Pause between enabling the status stream and the first bind
    pub settle_delay: Duration,
    /// Pause before answering a bind request
    pub bind_delay: Duration,
    /// How often the owner should call [`Session::refresh`]. The session never refreshes by
    /// itself.
    pub poll_interval: Duration,
}

impl SessionConfig {
    const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);
    const DEFAULT_BIND_DELAY: Duration = Duration::from_millis(500);
    const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            settle_delay: Self::DEFAULT_SETTLE_DELAY,
            bind_delay: Self::DEFAULT_BIND_DELAY,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn with_bind_delay(mut self, bind_delay: Duration) -> Self {
        self.bind_delay = bind_delay;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// A Bluetooth device address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress(pub [u8; 6]);

impl FromStr for MacAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidAddress(s.to_string());
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 || parts.iter().any(|p| p.len() != 2) {
            return Err(invalid());
        }
        let bytes = hex::decode(parts.concat()).map_err(|_| invalid())?;
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&bytes);
        Ok(Self(mac))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|b| format!("{b:02X}")).collect();
        write!(f, "{}", parts.join(":"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    Disconnected,
    Connecting,
    /// `bound` is set once the first bind response went out. It is not an acknowledgement.
    Connected { bound: bool },
}

enum Event {
    Notification { generation: u64, data: Vec<u8> },
    Disconnected { generation: u64 },
    RebindDue { generation: u64 },
}

struct Connection<L> {
    link: Arc<L>,
    generation: u64,
    /// Watcher, forwarders and pending rebinds. Aborted with the connection.
    tasks: Vec<JoinHandle<()>>,
}

impl<L> Drop for Connection<L> {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

struct Slot<L> {
    state: SessionState,
    connection: Option<Connection<L>>,
    bind_accepted: bool,
    last_generation: u64,
}

impl<L> Slot<L> {
    fn clear(&mut self) -> Option<Connection<L>> {
        self.state = SessionState::Disconnected;
        self.bind_accepted = false;
        self.connection.take()
    }
}

struct Shared<T: Transport> {
    transport: T,
    config: SessionConfig,
    mac: MacAddress,
    connect_lock: tokio::sync::Mutex<()>,
    slot: Mutex<Slot<T::Link>>,
    snapshot: watch::Sender<HeaterSnapshot>,
    events: mpsc::UnboundedSender<Event>,
}

/// A self-healing session with one heater.
///
/// Call [`Session::refresh`] periodically: it connects when disconnected and sends a
/// keepalive otherwise. Status broadcasts update the snapshot returned by
/// [`Session::snapshot`] as they arrive.
pub struct Session<T: Transport> {
    shared: Arc<Shared<T>>,
    control_loop: JoinHandle<()>,
}

impl<T: Transport> Session<T> {
    /// Create a disconnected session. Must be called within a tokio runtime.
    pub fn new(transport: T, config: SessionConfig) -> Result<Self> {
        let mac = config.address.parse()?;
        let (events, inbox) = mpsc::unbounded_channel();
        let (snapshot, _) = watch::channel(HeaterSnapshot::default());

        let shared = Arc::new(Shared {
            transport,
            config,
            mac,
            connect_lock: tokio::sync::Mutex::new(()),
            slot: Mutex::new(Slot {
                state: SessionState::Disconnected,
                connection: None,
                bind_accepted: false,
                last_generation: 0,
            }),
            snapshot,
            events,
        });
        let control_loop = tokio::spawn(control_loop(Arc::downgrade(&shared), inbox));

        Ok(Self { shared, control_loop })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Connect if disconnected, otherwise send a keepalive. Failures are logged and leave the
    /// session disconnected, ready for the next attempt.
    pub async fn refresh(&self) {
        if self.is_connected() {
            if let Err(err) = self.send(&build_auto_update()).await {
                debug!(address = %self.shared.config.address, "Keepalive failed: {err}");
                self.shared.teardown().await;
            }
            return;
        }
        self.shared.connect().await;
    }

    /// Write a raw packet to the heater without waiting for an acknowledgement
    pub async fn send(&self, packet: &[u8]) -> Result<()> {
        let link = self.shared.connected_link().ok_or(Error::NotConnected)?;
        self.shared.write(&link, packet).await
    }

    /// Drop the link regardless of state. The session may be refreshed again afterwards.
    pub async fn shutdown(&self) {
        let _guard = self.shared.connect_lock.lock().await;
        self.shared.teardown().await;
    }

    /// The latest decoded state
    pub fn snapshot(&self) -> HeaterSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Observe the snapshot. Every status broadcast and every disconnect republishes it.
    pub fn subscribe(&self) -> watch::Receiver<HeaterSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.shared.slot().state, SessionState::Connected { .. })
    }

    /// Whether a bind response was sent on the current connection
    pub fn is_bound(&self) -> bool {
        self.shared.slot().state == SessionState::Connected { bound: true }
    }

    /// Whether the heater confirmed the bind on the current connection
    pub fn bind_accepted(&self) -> bool {
        self.shared.slot().bind_accepted
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.control_loop.abort();
    }
}

impl<T: Transport> Shared<T> {
    fn slot(&self) -> MutexGuard<'_, Slot<T::Link>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.slot().connection.as_ref().is_some_and(|c| c.generation == generation)
    }

    fn connected_link(&self) -> Option<Arc<T::Link>> {
        let slot = self.slot();
        match slot.state {
            SessionState::Connected { .. } => slot.connection.as_ref().map(|c| c.link.clone()),
            _ => None,
        }
    }

    fn set_state(&self, generation: u64, state: SessionState) -> Result<()> {
        let mut slot = self.slot();
        if slot.connection.as_ref().map(|c| c.generation) != Some(generation) {
            return Err(Error::NotConnected);
        }
        slot.state = state;
        Ok(())
    }

    /// Attach a task to connection `generation`, or abort it if that connection is gone
    fn track(&self, generation: u64, task: JoinHandle<()>) {
        match self.slot().connection.as_mut() {
            Some(connection) if connection.generation == generation => {
                connection.tasks.retain(|t| !t.is_finished());
                connection.tasks.push(task);
            }
            _ => task.abort(),
        }
    }

    /// Return to `Disconnected` and hand back the connection so the caller can close it
    fn reset(&self) -> Option<Connection<T::Link>> {
        let connection = self.slot().clear();
        self.snapshot.send_modify(HeaterSnapshot::mark_unavailable);
        connection
    }

    /// Like [`Shared::reset`], but only while connection `generation` is current
    fn reset_generation(&self, generation: u64) -> Option<Connection<T::Link>> {
        let connection = {
            let mut slot = self.slot();
            if slot.connection.as_ref().map(|c| c.generation) != Some(generation) {
                return None;
            }
            slot.clear()
        };
        self.snapshot.send_modify(HeaterSnapshot::mark_unavailable);
        connection
    }

    async fn teardown(&self) {
        if let Some(connection) = self.reset() {
            info!(address = %self.config.address, "Disconnecting from heater");
            if let Err(err) = connection.link.disconnect().await {
                debug!("Disconnect failed: {err}");
            }
        }
    }

    async fn write(&self, link: &T::Link, data: &[u8]) -> Result<()> {
        trace!("TX: {}", hex::encode(data));
        link.write(WRITE_CHAR_UUID, data, false).await
    }

    async fn connect(&self) {
        let _guard = self.connect_lock.lock().await;
        if matches!(self.slot().state, SessionState::Connected { .. }) {
            return;
        }
        self.slot().state = SessionState::Connecting;

        let mut attempt = ConnectAttempt { shared: self, armed: true };
        match self.establish().await {
            Ok(()) => attempt.armed = false,
            Err(err) => debug!(address = %self.config.address, "Cannot connect: {err}"),
        }
    }

    /// Open the link and run the post-connect handshake. Whatever is left half open on
    /// failure is closed by the caller's [`ConnectAttempt`].
    async fn establish(&self) -> Result<()> {
        let address = &self.config.address;
        let limit = self.config.connect_timeout;
        let link = Arc::new(timeout(limit, self.transport.connect(address, limit)).await??);
        let generation = self.install(link.clone());
        info!(%address, generation, "Connected to heater");

        let (service_changed_tx, mut service_changed_rx) = mpsc::unbounded_channel();
        match link.subscribe(SERVICE_CHANGED_UUID, service_changed_tx).await {
            Ok(()) => self.track(
                generation,
                tokio::spawn(async move {
                    while let Some(data) = service_changed_rx.recv().await {
                        trace!("Service changed: {}", hex::encode(data));
                    }
                }),
            ),
            Err(err) => debug!("Service changed subscription failed: {err}"),
        }

        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        link.subscribe(NOTIFY_CHAR_UUID, notify_tx).await?;
        let events = self.events.clone();
        self.track(
            generation,
            tokio::spawn(async move {
                while let Some(data) = notify_rx.recv().await {
                    if events.send(Event::Notification { generation, data }).is_err() {
                        break;
                    }
                }
            }),
        );

        self.set_state(generation, SessionState::Connected { bound: false })?;
        self.write(&link, &build_auto_update()).await?;
        tokio::time::sleep(self.config.settle_delay).await;

        self.send_bind(generation).await;
        self.set_state(generation, SessionState::Connected { bound: true })
    }

    fn install(&self, link: Arc<T::Link>) -> u64 {
        let mut slot = self.slot();
        slot.last_generation += 1;
        let generation = slot.last_generation;

        let watcher = {
            let link = link.clone();
            let events = self.events.clone();
            tokio::spawn(async move {
                link.closed().await;
                let _ = events.send(Event::Disconnected { generation });
            })
        };

        slot.bind_accepted = false;
        slot.connection = Some(Connection { link, generation, tasks: vec![watcher] });
        generation
    }

    /// Send the bind response on connection `generation` if it is still connected. Failures
    /// are only logged.
    async fn send_bind(&self, generation: u64) {
        let Some(link) = self.connected_link().filter(|_| self.is_current(generation)) else {
            return;
        };
        match self.write(&link, &build_bind_response(&self.mac.0)).await {
            Ok(()) => debug!("Bind response sent"),
            Err(err) => debug!("Bind failed: {err}"),
        }
    }

    fn schedule_rebind(&self, generation: u64) {
        let events = self.events.clone();
        let delay = self.config.bind_delay;
        self.track(
            generation,
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(Event::RebindDue { generation });
            }),
        );
    }

    async fn handle_event(&self, event: Event) {
        match event {
            Event::Notification { generation, data } => {
                if !self.is_current(generation) {
                    trace!(generation, "Dropping notification from a stale connection");
                    return;
                }
                trace!("RX: {}", hex::encode(&data));
                self.handle_notification(generation, &data);
            }
            Event::Disconnected { generation } => {
                if let Some(connection) = self.reset_generation(generation) {
                    info!(address = %self.config.address, generation, "Heater disconnected");
                    drop(connection);
                }
            }
            Event::RebindDue { generation } => self.send_bind(generation).await,
        }
    }

    fn handle_notification(&self, generation: u64, data: &[u8]) {
        let Some(notification) = Notification::parse(data) else {
            return;
        };
        match notification {
            Notification::Status(status) => {
                self.snapshot.send_modify(|snapshot| status.apply_to(snapshot));
            }
            Notification::BindRequest => {
                debug!("Bind request from heater");
                self.schedule_rebind(generation);
            }
            Notification::BindAccepted => {
                debug!("Bind accepted");
                self.slot().bind_accepted = true;
            }
            Notification::BindRejected => {
                warn!(address = %self.config.address, "Heater rejected the bind");
                self.slot().bind_accepted = false;
            }
            Notification::CommandAck { button } => debug!(?button, "Command ACK"),
            Notification::Parameter { kind, value } => debug!(?kind, ?value, "Parameter response"),
            Notification::Other(id) => trace!(id, "Unhandled notification"),
        }
    }
}

/// Closes the half-open connection when a connect attempt fails or is cancelled
struct ConnectAttempt<'a, T: Transport> {
    shared: &'a Shared<T>,
    armed: bool,
}

impl<T: Transport> Drop for ConnectAttempt<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(connection) = self.shared.reset() {
            tokio::spawn(async move {
                let _ = connection.link.disconnect().await;
            });
        }
    }
}

async fn control_loop<T: Transport>(shared: Weak<Shared<T>>, mut inbox: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = inbox.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.handle_event(event).await;
    }
}
