//! Input translation
//!
//! Turns one polled controller snapshot into drive intents and button
//! events. Button indices follow the standard gamepad layout:
//!
//! ```text
//! 0 A    1 B    2 X    3 Y
//! 4 LB   5 RB   6 LT   7 RT   (6/7 analog)
//! 8 View 9 Menu
//! axes: 0 left X, 1 left Y (down is positive)
//! ```

use crate::domain::settings::DriveSettings;
use crate::infrastructure::bluetooth::protocol::Color;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ButtonState {
    pub pressed: bool,
    /// Analog value in [0, 1]
    pub value: f32,
}

/// One immutable sample of the controller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerSnapshot {
    pub buttons: Vec<ButtonState>,
    /// Axis values in [-1, 1]
    pub axes: Vec<f32>,
}

impl ControllerSnapshot {
    pub fn new(buttons: Vec<ButtonState>, axes: Vec<f32>) -> Self {
        Self { buttons, axes }
    }

    /// Nothing pressed, sticks centred
    pub fn neutral(buttons: usize, axes: usize) -> Self {
        Self::new(vec![ButtonState::default(); buttons], vec![0.0; axes])
    }

    pub fn axis(&self, index: usize) -> f32 {
        self.axes.get(index).copied().unwrap_or(0.0)
    }
}

/// Something that can be polled once per tick
pub trait InputSource {
    /// Latest snapshot, or `None` when no controller is attached
    fn poll(&mut self) -> Option<ControllerSnapshot>;
}

/// Stick magnitude from which `speed` applies
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedBand {
    pub threshold: f32,
    pub speed: u8,
}

impl SpeedBand {
    pub const fn new(threshold: f32, speed: u8) -> Self {
        Self { threshold, speed }
    }
}

/// Button assignments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonMap {
    /// Colour buttons in Normal/Expert, trick buttons in Trick
    pub face: [usize; 4],
    pub face_colors: [Color; 4],
    /// Hold to aim; a short press applies its face colour
    pub aim: usize,
    pub speed_down: usize,
    pub speed_up: usize,
    /// Pressing both toggles Trick mode
    pub combo: (usize, usize),
    pub cycle_mode: usize,
    pub sleep: usize,
    /// Buttons read through their analog value
    pub analog: Vec<usize>,
}

impl Default for ButtonMap {
    fn default() -> Self {
        Self {
            face: [0, 1, 2, 3],
            face_colors: [
                Color::new(255, 0, 0),
                Color::new(0, 0, 255),
                Color::new(0, 255, 0),
                Color::new(255, 255, 0),
            ],
            aim: 3,
            speed_down: 4,
            speed_up: 5,
            combo: (4, 6),
            cycle_mode: 9,
            sleep: 8,
            analog: vec![6, 7],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveIntent {
    /// Absolute heading in [0, 360)
    pub heading: u16,
    pub magnitude: f32,
    /// Banded speed before the mode's speed fraction is applied
    pub speed: u8,
}

/// Everything the control loop needs from one tick of input
#[derive(Debug, Clone, Default)]
pub struct InputFrame {
    pub drive: Option<DriveIntent>,
    /// Raw lateral axis, used for in-place rotation
    pub lateral: f32,
    /// Debounced press edges
    pub pressed: Vec<usize>,
    pub released: Vec<usize>,
    pub held: Vec<bool>,
    pub combo: bool,
}

impl InputFrame {
    pub fn pressed(&self, button: usize) -> bool {
        self.pressed.contains(&button)
    }

    pub fn released(&self, button: usize) -> bool {
        self.released.contains(&button)
    }

    pub fn is_held(&self, button: usize) -> bool {
        self.held.get(button).copied().unwrap_or(false)
    }
}

pub struct InputTranslator {
    deadzone: f32,
    speed_bands: Vec<SpeedBand>,
    analog_threshold: f32,
    analog_buttons: Vec<usize>,
    combo: (usize, usize),
    debounce: Duration,

    previous: Vec<bool>,
    last_edge: Vec<Option<Instant>>,
    last_combo: Option<Instant>,
}

impl InputTranslator {
    pub fn new(drive: &DriveSettings, buttons: &ButtonMap) -> Self {
        Self {
            deadzone: drive.deadzone,
            speed_bands: drive.speed_bands.clone(),
            analog_threshold: drive.analog_threshold,
            analog_buttons: buttons.analog.clone(),
            combo: buttons.combo,
            debounce: Duration::from_millis(drive.debounce_ms),
            previous: Vec::new(),
            last_edge: Vec::new(),
            last_combo: None,
        }
    }

    /// Translate one snapshot; the snapshot then becomes the previous one
    pub fn translate(&mut self, snapshot: &ControllerSnapshot, now: Instant) -> InputFrame {
        let mut held: Vec<bool> = snapshot
            .buttons
            .iter()
            .enumerate()
            .map(|(index, button)| self.is_pressed(index, button))
            .collect();

        // A release inside the debounce window of the last press is contact bounce
        for (index, state) in held.iter_mut().enumerate() {
            let was = self.previous.get(index).copied().unwrap_or(false);
            let last = self.last_edge.get(index).copied().flatten();
            if was && !*state && !Self::debounced(last, now, self.debounce) {
                *state = true;
            }
        }

        let now_held = |i: usize| held.get(i).copied().unwrap_or(false);
        let was_held = |i: usize| self.previous.get(i).copied().unwrap_or(false);

        let (a, b) = self.combo;
        let combo = now_held(a)
            && now_held(b)
            && !(was_held(a) && was_held(b))
            && Self::debounced(self.last_combo, now, self.debounce);

        let mut pressed = Vec::new();
        let mut released = Vec::new();
        for index in 0..held.len().max(self.previous.len()) {
            match (now_held(index), was_held(index)) {
                (true, false) => {
                    // A combo swallows its constituents' single edges
                    if combo && (index == a || index == b) {
                        continue;
                    }
                    let last = self.last_edge.get(index).copied().flatten();
                    if Self::debounced(last, now, self.debounce) {
                        pressed.push(index);
                    }
                }
                (false, true) => released.push(index),
                _ => {}
            }
        }

        if combo {
            self.last_combo = Some(now);
        }
        for &index in &pressed {
            if self.last_edge.len() <= index {
                self.last_edge.resize(index + 1, None);
            }
            self.last_edge[index] = Some(now);
        }

        let x = snapshot.axis(0);
        let y = -snapshot.axis(1);
        let frame = InputFrame {
            drive: self.drive_intent(x, y),
            lateral: x,
            pressed,
            released,
            held: held.clone(),
            combo,
        };
        self.previous = held;
        frame
    }

    /// Drive intent for a stick vector; `None` inside the deadzone
    ///
    /// The deadzone boundary itself counts as intentional motion.
    pub fn drive_intent(&self, x: f32, y: f32) -> Option<DriveIntent> {
        let magnitude = x.hypot(y);
        if magnitude < self.deadzone || !magnitude.is_finite() {
            return None;
        }
        Some(DriveIntent {
            heading: heading_degrees(x, y),
            magnitude,
            speed: self.band_speed(magnitude),
        })
    }

    /// Highest band reached; magnitudes under the first band use the first band
    pub fn band_speed(&self, magnitude: f32) -> u8 {
        self.speed_bands
            .iter()
            .rev()
            .find(|band| magnitude >= band.threshold)
            .or(self.speed_bands.first())
            .map_or(0, |band| band.speed)
    }

    fn is_pressed(&self, index: usize, button: &ButtonState) -> bool {
        if self.analog_buttons.contains(&index) {
            button.pressed || button.value > self.analog_threshold
        } else {
            button.pressed
        }
    }

    fn debounced(last: Option<Instant>, now: Instant, window: Duration) -> bool {
        last.map_or(true, |last| now.saturating_duration_since(last) > window)
    }
}

/// Compass heading of a stick vector: 0 is forward, 90 is right
pub fn heading_degrees(x: f32, y: f32) -> u16 {
    let mut degrees = x.atan2(y).to_degrees();
    if degrees < 0.0 {
        degrees += 360.0;
    }
    (degrees.round() as u16) % 360
}

#[cfg(test)]
pub(crate) fn snapshot_with(pressed: &[usize], x: f32, y: f32) -> ControllerSnapshot {
    let mut snapshot = ControllerSnapshot::neutral(16, 4);
    for &index in pressed {
        snapshot.buttons[index] = ButtonState {
            pressed: true,
            value: 1.0,
        };
    }
    snapshot.axes[0] = x;
    snapshot.axes[1] = y;
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator() -> InputTranslator {
        InputTranslator::new(&DriveSettings::default(), &ButtonMap::default())
    }

    fn at(start: Instant, ms: u64) -> Instant {
        start + Duration::from_millis(ms)
    }

    #[test]
    fn test_lateral_stick_scenario() {
        let mut translator = translator();
        let frame = translator.translate(&snapshot_with(&[], 0.6, 0.0), Instant::now());
        let intent = frame.drive.unwrap();
        assert_eq!(intent.heading, 90);
        assert_eq!(intent.speed, 85);
        assert!((intent.magnitude - 0.6).abs() < 1e-6);
        assert_eq!(frame.lateral, 0.6);
    }

    #[test]
    fn test_deadzone_boundary_is_inclusive() {
        let translator = translator();
        assert!(translator.drive_intent(0.1499, 0.0).is_none());
        assert!(translator.drive_intent(0.0, 0.0).is_none());
        let boundary = translator.drive_intent(0.15, 0.0).unwrap();
        assert_eq!(boundary.speed, 85);
    }

    #[test]
    fn test_non_finite_stick_does_not_drive() {
        let mut translator = translator();
        assert!(translator.drive_intent(f32::NAN, 0.0).is_none());
        assert!(translator.drive_intent(0.5, f32::INFINITY).is_none());

        let frame = translator.translate(&snapshot_with(&[], f32::NAN, f32::NAN), Instant::now());
        assert!(frame.drive.is_none());
    }

    #[test]
    fn test_headings_follow_stick() {
        let mut translator = translator();
        let now = Instant::now();
        let heading = |t: &mut InputTranslator, x, y| {
            t.translate(&snapshot_with(&[], x, y), now).drive.unwrap().heading
        };
        // Stick up is negative on the Y axis
        assert_eq!(heading(&mut translator, 0.0, -1.0), 0);
        assert_eq!(heading(&mut translator, 1.0, 0.0), 90);
        assert_eq!(heading(&mut translator, 0.0, 1.0), 180);
        assert_eq!(heading(&mut translator, -1.0, 0.0), 270);
        assert_eq!(heading(&mut translator, -0.001, -1.0), 0);
    }

    #[test]
    fn test_speed_bands() {
        let translator = translator();
        assert_eq!(translator.band_speed(0.17), 85);
        assert_eq!(translator.band_speed(0.6), 85);
        assert_eq!(translator.band_speed(0.65), 170);
        assert_eq!(translator.band_speed(0.89), 170);
        assert_eq!(translator.band_speed(1.0), 255);
    }

    #[test]
    fn test_press_and_release_edges() {
        let mut translator = translator();
        let start = Instant::now();

        let frame = translator.translate(&snapshot_with(&[0], 0.0, 0.0), at(start, 0));
        assert_eq!(frame.pressed, vec![0]);
        assert!(frame.is_held(0));

        let frame = translator.translate(&snapshot_with(&[0], 0.0, 0.0), at(start, 100));
        assert!(frame.pressed.is_empty());

        let frame = translator.translate(&snapshot_with(&[], 0.0, 0.0), at(start, 200));
        assert_eq!(frame.released, vec![0]);
        assert!(!frame.is_held(0));
    }

    #[test]
    fn test_bouncing_press_is_ignored() {
        let mut translator = translator();
        let start = Instant::now();

        assert!(translator
            .translate(&snapshot_with(&[1], 0.0, 0.0), at(start, 0))
            .pressed(1));
        translator.translate(&snapshot_with(&[], 0.0, 0.0), at(start, 10));
        assert!(!translator
            .translate(&snapshot_with(&[1], 0.0, 0.0), at(start, 20))
            .pressed(1));
        translator.translate(&snapshot_with(&[], 0.0, 0.0), at(start, 60));
        assert!(translator
            .translate(&snapshot_with(&[1], 0.0, 0.0), at(start, 120))
            .pressed(1));
    }

    #[test]
    fn test_bouncing_release_is_ignored() {
        let mut translator = translator();
        let start = Instant::now();

        translator.translate(&snapshot_with(&[3], 0.0, 0.0), at(start, 0));
        let frame = translator.translate(&snapshot_with(&[], 0.0, 0.0), at(start, 10));
        assert!(frame.released.is_empty());
        assert!(frame.is_held(3));

        let frame = translator.translate(&snapshot_with(&[3], 0.0, 0.0), at(start, 20));
        assert!(frame.pressed.is_empty());

        let frame = translator.translate(&snapshot_with(&[], 0.0, 0.0), at(start, 300));
        assert_eq!(frame.released, vec![3]);
    }

    #[test]
    fn test_combo_fires_once_and_swallows_edges() {
        let mut translator = translator();
        let start = Instant::now();

        let frame = translator.translate(&snapshot_with(&[4, 6], 0.0, 0.0), at(start, 0));
        assert!(frame.combo);
        assert!(!frame.pressed(4));
        assert!(!frame.pressed(6));

        let frame = translator.translate(&snapshot_with(&[4, 6], 0.0, 0.0), at(start, 100));
        assert!(!frame.combo);

        translator.translate(&snapshot_with(&[6], 0.0, 0.0), at(start, 200));
        let frame = translator.translate(&snapshot_with(&[4, 6], 0.0, 0.0), at(start, 300));
        assert!(frame.combo);
        assert!(!frame.pressed(4));
    }

    #[test]
    fn test_analog_trigger_threshold() {
        let mut translator = translator();
        let mut snapshot = ControllerSnapshot::neutral(16, 4);
        snapshot.buttons[6] = ButtonState {
            pressed: false,
            value: 0.4,
        };
        let frame = translator.translate(&snapshot, Instant::now());
        assert!(!frame.is_held(6));

        snapshot.buttons[6].value = 0.6;
        let frame = translator.translate(&snapshot, Instant::now() + Duration::from_millis(100));
        assert!(frame.pressed(6));
    }
}
