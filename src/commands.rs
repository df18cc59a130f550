//! User-facing heater commands.
//!
//! Each command is written to the heater without waiting for an acknowledgement. They fail
//! with [`Error::NotConnected`] while the session is down.

use rand::Rng;
use tracing::debug;

use crate::error::{Error, Result};
use crate::heater_state::{RunMode, GEAR_MAX, GEAR_MIN, TEMP_MAX_C, TEMP_MIN_C};
use crate::message::Command;
use crate::session::Session;
use crate::transport::Transport;

impl<T: Transport> Session<T> {
    pub async fn power_on(&self) -> Result<()> {
        self.send_command(Command::PowerOn).await
    }

    pub async fn power_off(&self) -> Result<()> {
        self.send_command(Command::PowerOff).await
    }

    /// Set the target temperature in °C
    pub async fn set_temperature(&self, celsius: u8) -> Result<()> {
        check_range("temperature", celsius, TEMP_MIN_C, TEMP_MAX_C)?;
        self.send_command(Command::SetTemperature(celsius)).await
    }

    /// Set the gear used in manual mode
    pub async fn set_gear(&self, gear: u8) -> Result<()> {
        check_range("gear", gear, GEAR_MIN, GEAR_MAX)?;
        self.send_command(Command::SetGear(gear)).await
    }

    pub async fn set_mode(&self, mode: RunMode) -> Result<()> {
        self.send_command(Command::SetMode(mode)).await
    }

    pub async fn clear_error(&self) -> Result<()> {
        self.send_command(Command::ClearError).await
    }

    /// Run the fan without burning fuel
    pub async fn ventilation(&self) -> Result<()> {
        self.send_command(Command::Ventilation).await
    }

    /// Encode and send any [`Command`]. Button presses get a fresh random nonce.
    pub async fn send_command(&self, command: Command) -> Result<()> {
        let nonce = if command.is_button() { rand::thread_rng().gen_range(0..=254) } else { 0 };
        debug!(?command, nonce, "Sending command");
        self.send(&command.to_packet(nonce)).await
    }
}

fn check_range(what: &'static str, value: u8, min: u8, max: u8) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(Error::OutOfRange { what, value, min, max })
    }
}
