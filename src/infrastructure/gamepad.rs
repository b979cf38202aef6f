//! Windows.Gaming.Input gamepad source
//!
//! Readings are mapped onto the standard gamepad layout used by
//! [`InputTranslator`](crate::domain::input::InputTranslator):
//!
//! ```text
//! buttons: A B X Y LB RB LT RT View Menu LS RS Up Down Left Right
//! axes:    left X, left Y (down positive), right X, right Y (down positive)
//! ```

use crate::domain::input::{ButtonState, ControllerSnapshot, InputSource};
use tracing::{debug, warn};
use windows::Gaming::Input::{Gamepad, GamepadButtons, GamepadReading};

const DIGITAL: [Option<GamepadButtons>; 16] = [
    Some(GamepadButtons::A),
    Some(GamepadButtons::B),
    Some(GamepadButtons::X),
    Some(GamepadButtons::Y),
    Some(GamepadButtons::LeftShoulder),
    Some(GamepadButtons::RightShoulder),
    None,
    None,
    Some(GamepadButtons::View),
    Some(GamepadButtons::Menu),
    Some(GamepadButtons::LeftThumbstick),
    Some(GamepadButtons::RightThumbstick),
    Some(GamepadButtons::DPadUp),
    Some(GamepadButtons::DPadDown),
    Some(GamepadButtons::DPadLeft),
    Some(GamepadButtons::DPadRight),
];

/// Polls the first connected gamepad
#[derive(Default)]
pub struct GamepadSource {
    connected: bool,
}

impl GamepadSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> windows::core::Result<Option<GamepadReading>> {
        let gamepads = Gamepad::Gamepads()?;
        if gamepads.Size()? == 0 {
            return Ok(None);
        }
        Ok(Some(gamepads.GetAt(0)?.GetCurrentReading()?))
    }
}

impl InputSource for GamepadSource {
    fn poll(&mut self) -> Option<ControllerSnapshot> {
        let reading = match self.read() {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Gamepad read failed: {}", e);
                None
            }
        };

        if reading.is_some() != self.connected {
            self.connected = reading.is_some();
            debug!("Gamepad connected: {}", self.connected);
        }
        reading.map(|r| snapshot(&r))
    }
}

fn snapshot(reading: &GamepadReading) -> ControllerSnapshot {
    let buttons = DIGITAL
        .iter()
        .enumerate()
        .map(|(index, flag)| match (index, flag) {
            (6, _) => analog(reading.LeftTrigger),
            (7, _) => analog(reading.RightTrigger),
            (_, Some(flag)) => {
                let pressed = reading.Buttons.0 & flag.0 != 0;
                ButtonState {
                    pressed,
                    value: if pressed { 1.0 } else { 0.0 },
                }
            }
            (_, None) => ButtonState::default(),
        })
        .collect();

    let axes = vec![
        reading.LeftThumbstickX as f32,
        -reading.LeftThumbstickY as f32,
        reading.RightThumbstickX as f32,
        -reading.RightThumbstickY as f32,
    ];
    ControllerSnapshot::new(buttons, axes)
}

fn analog(value: f64) -> ButtonState {
    ButtonState {
        pressed: false,
        value: value as f32,
    }
}
