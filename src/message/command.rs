use crate::codec::*;
use crate::heater_state::RunMode;

/// An outbound request to the heater
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    PowerOn,
    PowerOff,
    ClearError,
    Ventilation,
    /// Target temperature in °C
    SetTemperature(u8),
    SetGear(u8),
    SetMode(RunMode),
    /// Start the status stream, also used as keepalive
    AutoUpdate,
}

impl Command {
    /// Encode the command. Button presses carry `nonce` so the heater does not drop a
    /// repeated press as a duplicate; other commands ignore it.
    pub fn to_packet(self, nonce: u8) -> [u8; COMMAND_PACKET_LEN] {
        match self {
            Self::PowerOn => build_command(CMD_BUTTON, BTN_POWER_ON, nonce, 0),
            Self::PowerOff => build_command(CMD_BUTTON, BTN_POWER_OFF, nonce, 0),
            Self::ClearError => build_command(CMD_BUTTON, BTN_CLEAR_ERROR, nonce, 0),
            Self::Ventilation => build_command(CMD_BUTTON, BTN_VENTILATION, nonce, 0),
            Self::SetTemperature(temp) => build_command(CMD_SHORT_PARA, PARA_TARGET_TEMP, 0, temp),
            Self::SetGear(gear) => build_command(CMD_SHORT_PARA, PARA_TARGET_GEAR, 0, gear),
            Self::SetMode(mode) => build_command(CMD_SHORT_PARA, PARA_RUN_MODE, 0, mode.into()),
            Self::AutoUpdate => build_auto_update(),
        }
    }

    pub fn is_button(self) -> bool {
        matches!(self, Self::PowerOn | Self::PowerOff | Self::ClearError | Self::Ventilation)
    }
}
