use bluest::Uuid;
use thiserror::Error;

/// The error type for the `nordkapp-heater` library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not connected to the heater")]
    NotConnected,

    #[error("Timeout during Bluetooth operation: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] bluest::Error),

    #[error("Default Bluetooth adapter not found")]
    AdapterNotFound,

    #[error("Heater {0} not found")]
    DeviceNotFound(String),

    #[error("The heater does not expose characteristic {0}")]
    CharacteristicNotFound(Uuid),

    #[error("Invalid Bluetooth address: {0}")]
    InvalidAddress(String),

    #[error("{what} {value} out of range {min}..={max}")]
    OutOfRange {
        what: &'static str,
        value: u8,
        min: u8,
        max: u8,
    },

    #[error("Transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
