//! Control Nordkapp diesel heaters over Bluetooth Low Energy
//!
//! The heater's controller speaks a small proprietary protocol over one GATT service: the
//! client writes 8 byte command packets to a write characteristic and the heater pushes
//! status broadcasts, bind requests and acknowledgements on a notify characteristic. The
//! protocol was reverse engineered from the vendor app.
//!
//! The heater only accepts commands from a client that has "bound" itself by echoing its
//! own MAC address back in a bind response, and it stops streaming status unless it is
//! periodically reminded to. [`Session`] takes care of both and reconnects lazily when the
//! radio link drops.
//!
//! Currently the following data can be read:
//!
//! - Machine status and run mode
//! - Supply voltage (V) and altitude (m)
//! - Ambient and heat exchanger temperature (°C)
//! - Pump frequency (Hz), ignition power, fan speed (RPM)
//! - Error code, gear, target temperature
//! - Pump, fan and glow plug activity
//!
//! # Example
//!
//! ```no_run
//! # use std::time::Duration;
//! #
//! # #[tokio::main]
//! # pub async fn main(){
//!     let config = nordkapp_heater::SessionConfig::new("AA:BB:CC:DD:EE:FF");
//!     let heater = nordkapp_heater::HeaterClient::bluetooth(config).await.unwrap();
//!     loop {
//!         heater.refresh().await;
//!         println!("{:?}", heater.snapshot());
//!         tokio::time::sleep(Duration::from_secs(15)).await;
//!     }
//! # }
//! ```

pub mod bluest_transport;
pub mod codec;
mod commands;
mod error;
mod heater_state;
pub mod message;
mod session;
pub mod transport;

pub use bluest_transport::BluestTransport;
pub use error::{Error, Result};
pub use heater_state::{HeaterSnapshot, MachineStatus, RunMode, GEAR_MAX, GEAR_MIN, TEMP_MAX_C, TEMP_MIN_C};
pub use message::{Command, Notification};
pub use session::{MacAddress, Session, SessionConfig};
pub use transport::{Link, Transport};

/// A [`Session`] over the platform Bluetooth stack
pub type HeaterClient = Session<BluestTransport>;

impl Session<BluestTransport> {
    /// Create a session using the default Bluetooth adapter
    pub async fn bluetooth(config: SessionConfig) -> Result<Self> {
        let transport = BluestTransport::new().await?;
        Session::new(transport, config)
    }
}
