//! Mode state machine and speed profile
//!
//! ```text
//! Normal --cycle--> Expert --cycle--> Trick --cycle--> Normal
//! Normal/Expert <--combo--> Trick
//! Normal/Expert --hold aim--> Aiming --release--> previous mode
//! ```

use crate::domain::models::Mode;
use crate::domain::settings::DriveSettings;

pub struct ModeMachine {
    mode: Mode,
    /// Last of Normal/Expert, restored after Trick or Aiming
    driving: Mode,
}

impl Default for ModeMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeMachine {
    pub fn new() -> Self {
        Self {
            mode: Mode::Normal,
            driving: Mode::Normal,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Mode whose speed cap applies
    pub fn speed_mode(&self) -> Mode {
        match self.mode {
            Mode::Aiming => self.driving,
            mode => mode,
        }
    }

    /// Trick and back; ignored while aiming
    pub fn toggle_trick(&mut self) -> Option<Mode> {
        let next = match self.mode {
            Mode::Aiming => return None,
            Mode::Trick => self.driving,
            Mode::Normal | Mode::Expert => Mode::Trick,
        };
        self.mode = next;
        Some(next)
    }

    pub fn cycle(&mut self) -> Option<Mode> {
        let next = match self.mode {
            Mode::Aiming => return None,
            Mode::Normal => Mode::Expert,
            Mode::Expert => Mode::Trick,
            Mode::Trick => Mode::Normal,
        };
        if next.is_driving() {
            self.driving = next;
        }
        self.mode = next;
        Some(next)
    }

    pub fn enter_aiming(&mut self) -> bool {
        if !self.mode.is_driving() {
            return false;
        }
        self.driving = self.mode;
        self.mode = Mode::Aiming;
        true
    }

    /// Leave Aiming, returning the restored mode
    pub fn exit_aiming(&mut self) -> Option<Mode> {
        if self.mode != Mode::Aiming {
            return None;
        }
        self.mode = self.driving;
        Some(self.mode)
    }
}

/// Speed fraction applied to every banded drive speed
pub struct SpeedProfile {
    fraction: f32,
    min: f32,
    step: f32,
    normal_cap: f32,
    expert_cap: f32,
}

impl SpeedProfile {
    pub fn new(settings: &DriveSettings) -> Self {
        Self {
            fraction: settings.normal_cap,
            min: settings.min_speed_fraction,
            step: settings.speed_step,
            normal_cap: settings.normal_cap,
            expert_cap: settings.expert_cap,
        }
    }

    pub fn fraction(&self) -> f32 {
        self.fraction
    }

    pub fn cap(&self, mode: Mode) -> f32 {
        match mode {
            Mode::Normal | Mode::Aiming => self.normal_cap,
            Mode::Expert => self.expert_cap,
            Mode::Trick => 1.0,
        }
    }

    /// Move one step up or down within `[min, cap]`; true if it changed
    pub fn step(&mut self, up: bool, mode: Mode) -> bool {
        let delta = if up { self.step } else { -self.step };
        self.set(self.fraction + delta, mode)
    }

    /// Pull the fraction back under the mode's cap
    pub fn clamp_to(&mut self, mode: Mode) -> bool {
        self.set(self.fraction, mode)
    }

    /// Scale a banded speed by the current fraction
    pub fn apply(&self, speed: u8) -> u8 {
        (speed as f32 * self.fraction).round().clamp(0.0, 255.0) as u8
    }

    fn set(&mut self, value: f32, mode: Mode) -> bool {
        // Two decimals keep repeated steps from drifting
        let value = ((value * 100.0).round() / 100.0).clamp(self.min, self.cap(mode));
        if (value - self.fraction).abs() < f32::EPSILON {
            return false;
        }
        self.fraction = value;
        true
    }
}
