//! Telemetry decoding
//!
//! Asynchronous frames arrive on the response characteristic. Only power
//! notifications are decoded; everything else is ignored.

use tracing::trace;

/// SOP2 marking an asynchronous (unsolicited) frame
pub const ASYNC_SOP2: u8 = 0xFE;

/// Async id code of power notifications
pub const POWER_NOTIFICATION_ID: u8 = 0x01;

/// Default voltage treated as an empty battery
pub const DEFAULT_MIN_VOLTAGE: f32 = 3.3;

/// Default voltage treated as a full battery
pub const DEFAULT_MAX_VOLTAGE: f32 = 4.2;

/// Charger / battery state reported alongside the voltage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Charging,
    Ok,
    Low,
    Critical,
    Unknown(u8),
}

impl From<u8> for PowerState {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::Charging,
            0x02 => Self::Ok,
            0x03 => Self::Low,
            0x04 => Self::Critical,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryReading {
    /// Battery voltage in volts
    pub voltage: f32,
    /// Charge estimate, 0-100
    pub percent: u8,
    pub power_state: PowerState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryEvent {
    Battery(BatteryReading),
}

/// Decodes power notifications into battery readings
#[derive(Debug, Clone)]
pub struct TelemetryDecoder {
    min_voltage: f32,
    max_voltage: f32,
}

impl Default for TelemetryDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_VOLTAGE, DEFAULT_MAX_VOLTAGE)
    }
}

impl TelemetryDecoder {
    pub fn new(min_voltage: f32, max_voltage: f32) -> Self {
        Self {
            min_voltage,
            max_voltage,
        }
    }

    /// Decode one notification
    ///
    /// # Async Frame Structure
    ///
    /// ```text
    /// [0]      : SOP1 (0xFF)
    /// [1]      : SOP2 (0xFE)
    /// [2]      : ID code (0x01 = power notification)
    /// [3-4]    : Data length incl. checksum (u16 big-endian)
    /// [5]      : Power state
    /// [6-7]    : Battery voltage in 1/100 V (u16 big-endian)
    /// [..n-1]  : Further data (ignored)
    /// [n-1]    : Checksum over bytes 2..n-1
    /// ```
    pub fn decode(&self, bytes: &[u8]) -> Option<TelemetryEvent> {
        let Some(data) = async_payload(bytes, POWER_NOTIFICATION_ID) else {
            trace!("Ignoring notification: {:02X?}", bytes);
            return None;
        };
        if data.len() < 3 {
            trace!("Power notification too short: {:02X?}", bytes);
            return None;
        }

        let centivolts = u16::from_be_bytes([data[1], data[2]]);
        let voltage = centivolts as f32 / 100.0;

        Some(TelemetryEvent::Battery(BatteryReading {
            voltage,
            percent: self.percent(voltage),
            power_state: PowerState::from(data[0]),
        }))
    }

    /// Linear map between the configured voltages, clamped to 0-100
    pub fn percent(&self, voltage: f32) -> u8 {
        let span = self.max_voltage - self.min_voltage;
        if span <= 0.0 {
            return 0;
        }
        let fraction = (voltage - self.min_voltage) / span;
        (fraction * 100.0).clamp(0.0, 100.0).round() as u8
    }
}

/// Validate an async frame with the given id code and return its data bytes
fn async_payload(bytes: &[u8], id_code: u8) -> Option<&[u8]> {
    if bytes.len() < 6 || bytes[0] != 0xFF || bytes[1] != ASYNC_SOP2 || bytes[2] != id_code {
        return None;
    }

    let declared = u16::from_be_bytes([bytes[3], bytes[4]]) as usize;
    if declared == 0 || bytes.len() != 5 + declared {
        return None;
    }

    let sum = bytes[2..bytes.len() - 1]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b));
    if !sum != bytes[bytes.len() - 1] {
        return None;
    }

    Some(&bytes[5..bytes.len() - 1])
}

#[cfg(test)]
pub(crate) fn power_frame(state: u8, centivolts: u16) -> Vec<u8> {
    let [hi, lo] = centivolts.to_be_bytes();
    let mut frame = vec![0xFF, ASYNC_SOP2, POWER_NOTIFICATION_ID, 0x00, 0x04, state, hi, lo];
    let sum = frame[2..].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    frame.push(!sum);
    frame
}
