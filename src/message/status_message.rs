use crate::codec::{read_i16_le, read_u16_le};
use crate::heater_state::HeaterSnapshot;

/// Status broadcasts shorter than this are not decoded
pub const STATUS_PACKET_MIN_LENGTH: usize = 50;

/// Raw value of a 16 bit sensor field when the sensor is not available
pub const SENSOR_NA_VALUE: u16 = 32760;

/// A periodic status broadcast from the heater.
///
/// Byte offsets into the notification:
///
/// Offset | Width | Meaning
/// 8      | 1     | Status byte, low nibble is the machine status
/// 9      | 1     | Flags: bits 0-1 pump, 2 fan, 3 glow plug, 4 °F, 5-6 run mode
/// 10     | 2     | Voltage in V/10
/// 12     | 2     | Altitude in m
/// 14     | 2     | Ambient temperature in °C/10, signed
/// 16     | 2     | Shell temperature in °C/10, signed
/// 18     | 2     | Pump frequency in Hz/10
/// 20     | 2     | Ignition power /10
/// 22     | 2     | Fan RPM
/// 28     | 2     | Error code
/// 40     | 1     | Gear
/// 41     | 1     | Target temperature in °C
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage(Vec<u8>);

impl StatusMessage {
    /// Wrap a broadcast, or `None` if it is too short to hold every field
    pub fn new(data: &[u8]) -> Option<Self> {
        (data.len() >= STATUS_PACKET_MIN_LENGTH).then(|| Self(data.to_vec()))
    }

    pub fn machine_status(&self) -> u8 {
        self.0[8] & 0x0F
    }

    fn flags(&self) -> u8 {
        self.0[9]
    }

    pub fn run_mode(&self) -> u8 {
        (self.flags() >> 5) & 0x03
    }

    pub fn pump_active(&self) -> bool {
        self.flags() & 0x03 != 0
    }

    pub fn fan_active(&self) -> bool {
        (self.flags() >> 2) & 1 != 0
    }

    pub fn glow_plug_active(&self) -> bool {
        (self.flags() >> 3) & 1 != 0
    }

    pub fn temp_unit_fahrenheit(&self) -> bool {
        (self.flags() >> 4) & 1 != 0
    }

    pub fn voltage(&self) -> f32 {
        read_u16_le(&self.0, 10) as f32 / 10.0
    }

    pub fn altitude(&self) -> u16 {
        read_u16_le(&self.0, 12)
    }

    pub fn ambient_temp(&self) -> Option<f32> {
        self.temperature(14)
    }

    pub fn shell_temp(&self) -> Option<f32> {
        self.temperature(16)
    }

    pub fn pump_freq(&self) -> f32 {
        read_u16_le(&self.0, 18) as f32 / 10.0
    }

    pub fn ignition_power(&self) -> f32 {
        read_u16_le(&self.0, 20) as f32 / 10.0
    }

    pub fn fan_rpm(&self) -> u16 {
        read_u16_le(&self.0, 22)
    }

    pub fn error_code(&self) -> u16 {
        read_u16_le(&self.0, 28)
    }

    pub fn gear(&self) -> u8 {
        self.0[40]
    }

    pub fn target_temp(&self) -> u8 {
        self.0[41]
    }

    fn temperature(&self, offset: usize) -> Option<f32> {
        if read_u16_le(&self.0, offset) == SENSOR_NA_VALUE {
            return None;
        }
        Some(read_i16_le(&self.0, offset) as f32 / 10.0)
    }

    /// Write every decoded field into `snapshot` and mark it available
    pub fn apply_to(&self, snapshot: &mut HeaterSnapshot) {
        snapshot.available = true;
        snapshot.machine_status = self.machine_status();
        snapshot.run_mode = self.run_mode();
        snapshot.pump_active = self.pump_active();
        snapshot.fan_active = self.fan_active();
        snapshot.glow_plug_active = self.glow_plug_active();
        snapshot.temp_unit_fahrenheit = self.temp_unit_fahrenheit();
        snapshot.voltage = self.voltage();
        snapshot.altitude = self.altitude();
        snapshot.ambient_temp = self.ambient_temp();
        snapshot.shell_temp = self.shell_temp();
        snapshot.pump_freq = self.pump_freq();
        snapshot.ignition_power = self.ignition_power();
        snapshot.fan_rpm = self.fan_rpm();
        snapshot.error_code = self.error_code();
        snapshot.gear = self.gear();
        snapshot.target_temp = self.target_temp();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::heater_state::{MachineStatus, RunMode};

    /// A 52 byte broadcast of a heater in auto mode at 21.1 °C with no shell sensor
    pub(crate) fn sample_broadcast() -> Vec<u8> {
        let mut data = vec![0u8; 52];
        data[0] = 0xAA;
        data[2] = 0xFF;
        data[8] = 0xA2;
        data[9] = 0x25;
        data[10..12].copy_from_slice(&126u16.to_le_bytes());
        data[12..14].copy_from_slice(&350u16.to_le_bytes());
        data[14..16].copy_from_slice(&211u16.to_le_bytes());
        data[16..18].copy_from_slice(&SENSOR_NA_VALUE.to_le_bytes());
        data[18..20].copy_from_slice(&45u16.to_le_bytes());
        data[20..22].copy_from_slice(&0u16.to_le_bytes());
        data[22..24].copy_from_slice(&3200u16.to_le_bytes());
        data[28..30].copy_from_slice(&0u16.to_le_bytes());
        data[40] = 6;
        data[41] = 22;
        data
    }

    #[test]
    fn test_too_short() {
        assert_eq!(StatusMessage::new(&[0xAA, 0x00, 0xFF]), None);
        assert_eq!(StatusMessage::new(&[0u8; 49]), None);
        assert!(StatusMessage::new(&[0u8; 50]).is_some());
    }

    #[test]
    fn test_decode_sample() {
        let mut snapshot = HeaterSnapshot::default();
        StatusMessage::new(&sample_broadcast()).unwrap().apply_to(&mut snapshot);

        assert!(snapshot.available);
        assert_eq!(snapshot.status(), Some(MachineStatus::AutoRun));
        assert_eq!(snapshot.mode(), Some(RunMode::Manual));
        assert_eq!(snapshot.voltage, 12.6);
        assert_eq!(snapshot.altitude, 350);
        assert_eq!(snapshot.ambient_temp, Some(21.1));
        assert_eq!(snapshot.shell_temp, None);
        assert_eq!(snapshot.pump_freq, 4.5);
        assert_eq!(snapshot.fan_rpm, 3200);
        assert_eq!(snapshot.gear, 6);
        assert_eq!(snapshot.target_temp, 22);
    }

    #[test]
    fn test_flags() {
        let msg = StatusMessage::new(&sample_broadcast()).unwrap();
        assert_eq!(msg.run_mode(), 1);
        assert!(msg.pump_active());
        assert!(msg.fan_active());
        assert!(!msg.glow_plug_active());
        assert!(!msg.temp_unit_fahrenheit());

        let mut data = sample_broadcast();
        data[9] = 0b0101_1010;
        let msg = StatusMessage::new(&data).unwrap();
        assert_eq!(msg.run_mode(), 2);
        assert!(msg.pump_active());
        assert!(!msg.fan_active());
        assert!(msg.glow_plug_active());
        assert!(msg.temp_unit_fahrenheit());
    }

    #[test]
    fn test_negative_and_sentinel_temperatures() {
        let mut data = sample_broadcast();
        data[14..16].copy_from_slice(&SENSOR_NA_VALUE.to_le_bytes());
        data[16..18].copy_from_slice(&65416u16.to_le_bytes());
        let msg = StatusMessage::new(&data).unwrap();
        assert_eq!(msg.ambient_temp(), None);
        assert_eq!(msg.shell_temp(), Some(-12.0));
    }

    #[test]
    fn test_decode_overwrites_previous_state() {
        let mut snapshot = HeaterSnapshot {
            ambient_temp: Some(5.0),
            shell_temp: Some(80.0),
            error_code: 3,
            ..Default::default()
        };
        StatusMessage::new(&sample_broadcast()).unwrap().apply_to(&mut snapshot);
        assert_eq!(snapshot.shell_temp, None);
        assert_eq!(snapshot.error_code, 0);
    }
}
