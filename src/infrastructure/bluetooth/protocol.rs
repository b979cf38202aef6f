//! Ollie Protocol
//!
//! This module contains the wire format and command catalogue for talking
//! to the robot over its control characteristic.

use thiserror::Error;

/// Radio configuration service (anti-DoS, TX power, wake characteristics)
pub const RADIO_SERVICE_UUID: &str = "22bb746f-2bb0-7554-2d6f-726568705327";

/// Robot control service (command and response characteristics)
pub const ROBOT_SERVICE_UUID: &str = "22bb746f-2ba0-7554-2d6f-726568705327";

/// Command characteristic - framed commands are written here
pub const CONTROL_CHAR_UUID: &str = "22bb746f-2ba1-7554-2d6f-726568705327";

/// Response characteristic - responses and async notifications arrive here
pub const RESPONSE_CHAR_UUID: &str = "22bb746f-2ba6-7554-2d6f-726568705327";

/// Anti-DoS characteristic - must receive the unlock string first
pub const ANTI_DOS_CHAR_UUID: &str = "22bb746f-2bbd-7554-2d6f-726568705327";

/// TX power characteristic
pub const TX_POWER_CHAR_UUID: &str = "22bb746f-2bb2-7554-2d6f-726568705327";

/// Wake CPU characteristic
pub const WAKE_CPU_CHAR_UUID: &str = "22bb746f-2bbf-7554-2d6f-726568705327";

/// Unlock payload for the anti-DoS characteristic ("011i3" in ASCII)
pub const UNLOCK_PAYLOAD: &[u8] = b"011i3";

/// Byte written to the wake characteristic
pub const WAKE_CPU_PAYLOAD: u8 = 0x01;

/// Default TX power level
pub const DEFAULT_TX_POWER: u8 = 0x07;

/// Start-of-packet byte shared by every frame
pub const SOP1: u8 = 0xFF;

/// SOP2 base value; the low two bits carry flags
pub const SOP2_BASE: u8 = 0xFC;

/// SOP2 flag: ask the robot to answer this command
pub const SOP2_ANSWER: u8 = 0x01;

/// SOP2 flag: reset the robot's client inactivity timeout
pub const SOP2_RESET_TIMEOUT: u8 = 0x02;

/// SOP2 used when no explicit flags are given
pub const SOP2_DEFAULT: u8 = SOP2_BASE | SOP2_ANSWER | SOP2_RESET_TIMEOUT;

/// Header bytes in front of the payload
pub const HEADER_SIZE: usize = 6;

/// Largest payload whose length byte (`len + 1`) still fits in a `u8`
pub const MAX_PAYLOAD: usize = 254;

/// Errors produced while encoding or parsing command frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("frame too short ({0} bytes)")]
    Truncated(usize),

    #[error("invalid start of packet {0:#04X}")]
    InvalidSop(u8),

    #[error("length byte {declared} does not match frame size {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("checksum mismatch (expected {expected:#04X}, got {actual:#04X})")]
    Checksum { expected: u8, actual: u8 },
}

/// Motor mode for raw motor commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MotorMode {
    Off = 0x00,
    Forward = 0x01,
    Reverse = 0x02,
    Brake = 0x03,
    Ignore = 0x04,
}

/// Left/right raw motor configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMotors {
    pub left_mode: MotorMode,
    pub left_power: u8,
    pub right_mode: MotorMode,
    pub right_power: u8,
}

impl RawMotors {
    /// Both motors off
    pub const OFF: RawMotors = RawMotors {
        left_mode: MotorMode::Off,
        left_power: 0,
        right_mode: MotorMode::Off,
        right_power: 0,
    };

    pub const fn new(left_mode: MotorMode, left_power: u8, right_mode: MotorMode, right_power: u8) -> Self {
        Self {
            left_mode,
            left_power,
            right_mode,
            right_power,
        }
    }
}

/// RGB colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Scale every channel by `factor` (clamped to `[0, 1]`)
    pub fn scaled(&self, factor: f32) -> Self {
        let factor = factor.clamp(0.0, 1.0);
        let scale = |c: u8| (c as f32 * factor).round() as u8;
        Self::new(scale(self.r), scale(self.g), scale(self.b))
    }
}

/// Commands understood by the robot
///
/// | Command        | DID  | CID  | Payload                          |
/// |----------------|------|------|----------------------------------|
/// | Wake           | 0x00 | 0x13 | -                                |
/// | SetPowerNotify | 0x00 | 0x21 | enabled                          |
/// | Sleep          | 0x00 | 0x22 | wake(2) macro(1) orbBasic(2)     |
/// | SetHeading     | 0x02 | 0x01 | heading (u16 BE)                 |
/// | SetColor       | 0x02 | 0x20 | r, g, b, persist flag            |
/// | SetBackLed     | 0x02 | 0x21 | brightness                       |
/// | Roll           | 0x02 | 0x30 | speed, heading (u16 BE), state   |
/// | SetRawMotors   | 0x02 | 0x33 | lmode, lpower, rmode, rpower     |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Wake,
    SetPowerNotify(bool),
    Sleep,
    SetHeading(u16),
    SetColor(Color),
    SetBackLed(u8),
    Roll { heading: u16, speed: u8 },
    SetRawMotors(RawMotors),
}

/// Core device
pub const DID_CORE: u8 = 0x00;
/// Sphero device
pub const DID_SPHERO: u8 = 0x02;

impl Command {
    pub fn device_id(&self) -> u8 {
        match self {
            Self::Wake | Self::SetPowerNotify(_) | Self::Sleep => DID_CORE,
            _ => DID_SPHERO,
        }
    }

    pub fn command_id(&self) -> u8 {
        match self {
            Self::Wake => 0x13,
            Self::SetPowerNotify(_) => 0x21,
            Self::Sleep => 0x22,
            Self::SetHeading(_) => 0x01,
            Self::SetColor(_) => 0x20,
            Self::SetBackLed(_) => 0x21,
            Self::Roll { .. } => 0x30,
            Self::SetRawMotors(_) => 0x33,
        }
    }

    /// Payload bytes for this command
    pub fn payload(&self) -> Vec<u8> {
        match *self {
            Self::Wake => Vec::new(),
            Self::SetPowerNotify(enabled) => vec![enabled as u8],
            // No auto-wake, no macro, no orbBasic program
            Self::Sleep => vec![0, 0, 0, 0, 0],
            Self::SetHeading(heading) => heading.to_be_bytes().to_vec(),
            // Persist flag stays 0, the robot must not remember the colour
            Self::SetColor(c) => vec![c.r, c.g, c.b, 0],
            Self::SetBackLed(brightness) => vec![brightness],
            Self::Roll { heading, speed } => {
                let [hi, lo] = heading.to_be_bytes();
                vec![speed, hi, lo, 1]
            }
            Self::SetRawMotors(m) => vec![
                m.left_mode as u8,
                m.left_power,
                m.right_mode as u8,
                m.right_power,
            ],
        }
    }

    /// Encode this command into a wire frame
    pub fn encode(&self, sop2: u8, sequence: u8) -> Result<Vec<u8>, FrameError> {
        encode_with_sop2(
            sop2,
            self.device_id(),
            self.command_id(),
            sequence,
            &self.payload(),
        )
    }
}

/// One's-complement checksum over everything between SOP2 and the checksum byte
pub fn checksum(device_id: u8, command_id: u8, sequence: u8, payload: &[u8]) -> u8 {
    let length = payload.len() as u32 + 1;
    let sum = payload.iter().map(|&b| b as u32).sum::<u32>()
        + device_id as u32
        + command_id as u32
        + sequence as u32
        + length;
    !(sum as u8)
}

/// Encode a command frame with the default SOP2 flags
///
/// # Frame Structure
///
/// ```text
/// [0]      : SOP1 (0xFF)
/// [1]      : SOP2 (0xFC | flags)
/// [2]      : Device ID
/// [3]      : Command ID
/// [4]      : Sequence number
/// [5]      : Length (payload + checksum)
/// [6..n-1] : Payload
/// [n-1]    : Checksum
/// ```
pub fn encode(
    device_id: u8,
    command_id: u8,
    sequence: u8,
    payload: &[u8],
) -> Result<Vec<u8>, FrameError> {
    encode_with_sop2(SOP2_DEFAULT, device_id, command_id, sequence, payload)
}

/// Encode a command frame with explicit SOP2 flag bits
pub fn encode_with_sop2(
    sop2: u8,
    device_id: u8,
    command_id: u8,
    sequence: u8,
    payload: &[u8],
) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + 1);
    frame.extend_from_slice(&[
        SOP1,
        sop2,
        device_id,
        command_id,
        sequence,
        payload.len() as u8 + 1,
    ]);
    frame.extend_from_slice(payload);
    frame.push(checksum(device_id, command_id, sequence, payload));
    Ok(frame)
}

/// A parsed command frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub sop2: u8,
    pub device_id: u8,
    pub command_id: u8,
    pub sequence: u8,
    pub payload: Vec<u8>,
    pub checksum: u8,
}

impl CommandFrame {
    /// Parse and verify a command frame produced by [`encode`]
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE + 1 {
            return Err(FrameError::Truncated(bytes.len()));
        }
        if bytes[0] != SOP1 {
            return Err(FrameError::InvalidSop(bytes[0]));
        }
        if bytes[1] & SOP2_BASE != SOP2_BASE {
            return Err(FrameError::InvalidSop(bytes[1]));
        }

        let declared = bytes[5] as usize;
        let actual = bytes.len() - HEADER_SIZE;
        if declared != actual {
            return Err(FrameError::LengthMismatch { declared, actual });
        }

        let payload = bytes[HEADER_SIZE..bytes.len() - 1].to_vec();
        let received = bytes[bytes.len() - 1];
        let expected = checksum(bytes[2], bytes[3], bytes[4], &payload);
        if received != expected {
            return Err(FrameError::Checksum {
                expected,
                actual: received,
            });
        }

        Ok(Self {
            sop2: bytes[1],
            device_id: bytes[2],
            command_id: bytes[3],
            sequence: bytes[4],
            payload,
            checksum: received,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_golden_roll_frame() {
        let frame = encode(0x02, 0x30, 5, &[100, 0, 90, 1]).unwrap();
        assert_eq!(
            frame,
            vec![0xFF, 0xFF, 0x02, 0x30, 0x05, 0x05, 0x64, 0x00, 0x5A, 0x01, 0x04]
        );
    }

    #[test]
    fn test_checksum_matches_formula() {
        let payloads: [&[u8]; 4] = [&[], &[0xFF; 8], &[1, 2, 3], &[200, 100, 50, 25]];
        for payload in payloads {
            let frame = encode(0x02, 0x20, 250, payload).unwrap();
            let sum: u32 = payload.iter().map(|&b| b as u32).sum::<u32>()
                + 0x02
                + 0x20
                + 250
                + payload.len() as u32
                + 1;
            assert_eq!(*frame.last().unwrap(), !(sum as u8));

            let parsed = CommandFrame::parse(&frame).unwrap();
            assert_eq!(parsed.payload, payload);
            assert_eq!(parsed.sequence, 250);
        }
    }

    #[test]
    fn test_payload_too_large() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        assert_eq!(
            encode(0x02, 0x30, 0, &payload),
            Err(FrameError::PayloadTooLarge {
                size: MAX_PAYLOAD + 1,
                max: MAX_PAYLOAD
            })
        );
        assert!(encode(0x02, 0x30, 0, &payload[..MAX_PAYLOAD]).is_ok());
    }

    #[test]
    fn test_parse_rejects_corruption() {
        let mut frame = Command::SetBackLed(127).encode(SOP2_DEFAULT, 9).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x01;
        assert!(matches!(
            CommandFrame::parse(&frame),
            Err(FrameError::Checksum { .. })
        ));
        assert_eq!(CommandFrame::parse(&[0xFF, 0xFF]), Err(FrameError::Truncated(2)));
    }

    #[test]
    fn test_command_payloads() {
        assert_eq!(
            Command::Roll { heading: 300, speed: 85 }.payload(),
            vec![85, 0x01, 0x2C, 1]
        );
        assert_eq!(Command::SetHeading(0).payload(), vec![0, 0]);
        assert_eq!(
            Command::SetRawMotors(RawMotors::new(MotorMode::Reverse, 200, MotorMode::Forward, 200))
                .payload(),
            vec![0x02, 200, 0x01, 200]
        );
        assert_eq!(Command::SetBackLed(7).command_id(), 0x21);
        assert_eq!(Command::SetBackLed(7).device_id(), DID_SPHERO);
        assert_eq!(Command::SetPowerNotify(true).device_id(), DID_CORE);
        assert_eq!(Command::Sleep.command_id(), 0x22);
        assert_eq!(Command::Wake.command_id(), 0x13);
    }

    #[test]
    fn test_explicit_sop2_flags() {
        let frame = Command::Wake.encode(SOP2_BASE | SOP2_RESET_TIMEOUT, 0).unwrap();
        assert_eq!(frame[1], 0xFE);
        assert_eq!(frame.len(), HEADER_SIZE + 1);
        assert_eq!(CommandFrame::parse(&frame).unwrap().sop2, 0xFE);
    }

    #[test]
    fn test_color_scaling() {
        assert_eq!(Color::new(255, 0, 100).scaled(0.5), Color::new(128, 0, 50));
        assert_eq!(Color::new(10, 20, 30).scaled(2.0), Color::new(10, 20, 30));
    }
}
