use num_enum::{IntoPrimitive, TryFromPrimitive};

pub const TEMP_MIN_C: u8 = 8;
pub const TEMP_MAX_C: u8 = 36;
pub const GEAR_MIN: u8 = 1;
pub const GEAR_MAX: u8 = 10;

/// The operating state reported in the low nibble of the status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MachineStatus {
    Booting = 0,
    Igniting = 1,
    AutoRun = 2,
    ManualRun = 3,
    ResidualBurn = 4,
    Standby = 5,
    /// Shows an error code, see `HeaterSnapshot::error_code`
    Fault = 6,
    ManualPump = 7,
    Ventilation = 8,
    StartStopRun = 9,
    SettingStartStop = 10,
}

impl MachineStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Booting => "booting",
            Self::Igniting => "igniting",
            Self::AutoRun => "auto_run",
            Self::ManualRun => "manual_run",
            Self::ResidualBurn => "residual_burn",
            Self::Standby => "standby",
            Self::Fault => "error",
            Self::ManualPump => "manual_pump",
            Self::Ventilation => "ventilation",
            Self::StartStopRun => "start_stop_run",
            Self::SettingStartStop => "setting_start_stop",
        }
    }

    /// The heater is switched on in some form
    pub fn is_running(self) -> bool {
        !matches!(self, Self::ResidualBurn | Self::Standby | Self::Fault)
    }

    /// The heater is burning fuel to reach or hold a temperature
    pub fn is_heating(self) -> bool {
        matches!(
            self,
            Self::Booting
                | Self::Igniting
                | Self::AutoRun
                | Self::ManualRun
                | Self::StartStopRun
                | Self::SettingStartStop
        )
    }
}

/// How the heater regulates its output
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum RunMode {
    /// Follow the target temperature
    Auto = 0,
    /// Run at a fixed gear
    Manual = 1,
    StartStop = 2,
}

/// The reported state of the heater
#[derive(Debug, Clone, PartialEq)]
pub struct HeaterSnapshot {
    /// Whether the last communication succeeded. False while disconnected.
    pub available: bool,
    /// Raw machine status, see [`MachineStatus`]
    pub machine_status: u8,
    /// Raw run mode, see [`RunMode`]
    pub run_mode: u8,
    /// Supply voltage in V
    pub voltage: f32,
    /// Altitude in m
    pub altitude: u16,
    /// Ambient temperature in °C. None when the heater has no sensor reading.
    pub ambient_temp: Option<f32>,
    /// Heat exchanger shell temperature in °C. None when the heater has no sensor reading.
    pub shell_temp: Option<f32>,
    /// Fuel pump frequency in Hz
    pub pump_freq: f32,
    pub ignition_power: f32,
    pub fan_rpm: u16,
    pub error_code: u16,
    pub gear: u8,
    /// Target temperature in °C
    pub target_temp: u8,
    pub pump_active: bool,
    pub fan_active: bool,
    pub glow_plug_active: bool,
    pub temp_unit_fahrenheit: bool,
}

impl Default for HeaterSnapshot {
    fn default() -> Self {
        Self {
            available: false,
            machine_status: MachineStatus::Standby.into(),
            run_mode: RunMode::Auto.into(),
            voltage: 0.0,
            altitude: 0,
            ambient_temp: None,
            shell_temp: None,
            pump_freq: 0.0,
            ignition_power: 0.0,
            fan_rpm: 0,
            error_code: 0,
            gear: 0,
            target_temp: 0,
            pump_active: false,
            fan_active: false,
            glow_plug_active: false,
            temp_unit_fahrenheit: false,
        }
    }
}

impl HeaterSnapshot {
    pub fn status(&self) -> Option<MachineStatus> {
        MachineStatus::try_from(self.machine_status).ok()
    }

    pub fn mode(&self) -> Option<RunMode> {
        RunMode::try_from(self.run_mode).ok()
    }

    pub fn is_running(&self) -> bool {
        self.status().is_some_and(MachineStatus::is_running)
    }

    pub fn is_heating(&self) -> bool {
        self.status().is_some_and(MachineStatus::is_heating)
    }

    /// Forget everything that describes live operation. Analog readings and settings are
    /// kept at their last decoded values.
    pub(crate) fn mark_unavailable(&mut self) {
        self.available = false;
        self.machine_status = MachineStatus::Standby.into();
        self.pump_active = false;
        self.fan_active = false;
        self.glow_plug_active = false;
    }
}
