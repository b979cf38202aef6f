//! Control Loop
//!
//! Runs once per poll tick: translates the controller snapshot, drives the
//! mode machine and turns the result into robot commands.
//!
//! Motion commands are never queued; a roll dropped on a busy link is simply
//! superseded by the next tick. One-shot state commands (colour, back LED,
//! heading) go through a small outbox that retries one command per tick
//! until the channel accepts it. A stop issued when the stick returns to
//! centre is repeated on a watchdog interval so a dropped stop can not leave
//! the robot rolling.

use crate::domain::gestures::{HoldEvent, HoldTracker};
use crate::domain::input::{ButtonMap, ControllerSnapshot, InputFrame, InputTranslator};
use crate::domain::models::{AppEvent, Mode};
use crate::domain::modes::{ModeMachine, SpeedProfile};
use crate::domain::settings::{AimSettings, Settings};
use crate::infrastructure::bluetooth::channel::SendOutcome;
use crate::infrastructure::bluetooth::error::SessionError;
use crate::infrastructure::bluetooth::protocol::{Color, Command, MotorMode, RawMotors};
use crate::infrastructure::bluetooth::session::DeviceSession;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Timed raw-motor manoeuvres available in Trick mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trick {
    SpinLeft,
    FlipForward,
    FlipBackward,
    SpinRight,
}

impl Trick {
    /// Trick bound to face button slot `slot` (A, B, X, Y)
    pub fn for_slot(slot: usize) -> Option<Self> {
        match slot {
            0 => Some(Self::SpinLeft),
            1 => Some(Self::FlipForward),
            2 => Some(Self::FlipBackward),
            3 => Some(Self::SpinRight),
            _ => None,
        }
    }

    pub fn motors(&self) -> RawMotors {
        use MotorMode::{Forward, Reverse};
        match self {
            Self::SpinLeft => RawMotors::new(Reverse, 200, Forward, 200),
            Self::FlipForward => RawMotors::new(Forward, 255, Forward, 255),
            Self::FlipBackward => RawMotors::new(Reverse, 255, Reverse, 255),
            Self::SpinRight => RawMotors::new(Forward, 200, Reverse, 200),
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Self::SpinLeft | Self::SpinRight => Duration::from_millis(500),
            Self::FlipForward | Self::FlipBackward => Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Motion {
    Idle,
    Driving,
    /// Stick released; the stop is repeated at `next_resend`
    Stopping { next_resend: Instant },
}

/// Pending state commands, one per (device, command) pair
#[derive(Default)]
struct Outbox {
    pending: VecDeque<Command>,
}

impl Outbox {
    fn push(&mut self, command: Command) {
        let key = (command.device_id(), command.command_id());
        self.pending
            .retain(|c| (c.device_id(), c.command_id()) != key);
        self.pending.push_back(command);
    }

    fn flush(&mut self, session: &DeviceSession) {
        let Some(&command) = self.pending.front() else {
            return;
        };
        match session.send(command, false) {
            SendOutcome::Dispatched { .. } => {
                self.pending.pop_front();
            }
            SendOutcome::Dropped => {}
            SendOutcome::Closed | SendOutcome::NotReady => self.pending.clear(),
        }
    }
}

pub struct ControlLoop {
    session: DeviceSession,
    events: mpsc::UnboundedSender<AppEvent>,

    translator: InputTranslator,
    modes: ModeMachine,
    speed: SpeedProfile,
    aim_hold: HoldTracker,
    buttons: ButtonMap,
    aim: AimSettings,
    deadzone: f32,
    watchdog: Duration,

    color: Color,
    motion: Motion,
    aim_heading: f32,
    aim_spinning: bool,
    outbox: Outbox,
    last_tick: Option<Instant>,
    sleep_requested: bool,
}

impl ControlLoop {
    pub fn new(
        settings: &Settings,
        session: DeviceSession,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let mut control = Self {
            session,
            events,
            translator: InputTranslator::new(&settings.drive, &settings.buttons),
            modes: ModeMachine::new(),
            speed: SpeedProfile::new(&settings.drive),
            aim_hold: HoldTracker::new(Duration::from_millis(settings.aim.hold_ms)),
            buttons: settings.buttons.clone(),
            aim: settings.aim.clone(),
            deadzone: settings.drive.deadzone,
            watchdog: Duration::from_millis(settings.drive.stop_watchdog_ms),
            color: settings.drive.color,
            motion: Motion::Idle,
            aim_heading: 0.0,
            aim_spinning: false,
            outbox: Outbox::default(),
            last_tick: None,
            sleep_requested: false,
        };
        control.refresh_led();
        control
    }

    pub fn mode(&self) -> Mode {
        self.modes.mode()
    }

    pub fn speed_fraction(&self) -> f32 {
        self.speed.fraction()
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// Sleep button seen since the last `sleep`
    pub fn sleep_requested(&self) -> bool {
        self.sleep_requested
    }

    /// Wait until the link has no write in flight
    pub async fn idle(&self) {
        self.session.idle().await;
    }

    /// Swap in a freshly connected session, returning the old one
    ///
    /// Aiming is abandoned and the current colour is re-applied.
    pub fn replace_session(&mut self, session: DeviceSession) -> DeviceSession {
        let old = std::mem::replace(&mut self.session, session);
        self.session.wake();
        self.outbox = Outbox::default();
        self.motion = Motion::Idle;
        self.aim_hold.cancel();
        self.aim_spinning = false;
        if let Some(mode) = self.modes.exit_aiming() {
            self.emit(AppEvent::ModeChanged(mode));
        }
        self.refresh_led();
        old
    }

    /// Put the robot to sleep and disconnect
    pub async fn sleep(&mut self) -> Result<(), SessionError> {
        self.sleep_requested = false;
        self.outbox = Outbox::default();
        self.motion = Motion::Idle;
        self.session.sleep().await
    }

    /// Run one poll tick; a missing snapshot counts as a neutral controller
    pub fn tick(&mut self, snapshot: Option<&ControllerSnapshot>, now: Instant) {
        let neutral = ControllerSnapshot::default();
        let frame = self
            .translator
            .translate(snapshot.unwrap_or(&neutral), now);
        let dt = self
            .last_tick
            .map_or(Duration::ZERO, |last| now.saturating_duration_since(last));
        self.last_tick = Some(now);

        self.handle_mode_buttons(&frame);
        self.handle_aim_button(&frame, now);
        self.handle_actions(&frame);
        self.outbox.flush(&self.session);

        match self.modes.mode() {
            Mode::Normal | Mode::Expert => self.drive(&frame, now),
            Mode::Aiming => self.steer_aim(&frame, dt),
            Mode::Trick => {}
        }
    }

    fn handle_mode_buttons(&mut self, frame: &InputFrame) {
        if frame.pressed(self.buttons.sleep) {
            info!("Sleep requested");
            self.sleep_requested = true;
        }

        let changed = if frame.combo {
            self.modes.toggle_trick()
        } else if frame.pressed(self.buttons.cycle_mode) {
            self.modes.cycle()
        } else {
            None
        };
        if let Some(mode) = changed {
            self.on_mode_changed(mode);
        }
    }

    fn on_mode_changed(&mut self, mode: Mode) {
        info!("Mode -> {:?}", mode);
        self.emit(AppEvent::ModeChanged(mode));
        self.aim_hold.cancel();

        if mode == Mode::Trick {
            self.session.stop();
            self.motion = Motion::Idle;
        } else if self.speed.clamp_to(mode) {
            self.emit(AppEvent::SpeedChanged(self.speed.fraction()));
        }
        self.refresh_led();
    }

    fn handle_aim_button(&mut self, frame: &InputFrame, now: Instant) {
        let mode = self.modes.mode();
        if !(mode.is_driving() || mode == Mode::Aiming) {
            return;
        }
        let aim = self.buttons.aim;
        match self
            .aim_hold
            .process(frame.pressed(aim), frame.released(aim), now)
        {
            Some(HoldEvent::Activated) => self.enter_aiming(),
            Some(HoldEvent::Released) => self.exit_aiming(),
            Some(HoldEvent::ShortPress) => {
                if let Some(slot) = self.buttons.face.iter().position(|&b| b == aim) {
                    self.apply_color(self.buttons.face_colors[slot]);
                }
            }
            None => {}
        }
    }

    fn handle_actions(&mut self, frame: &InputFrame) {
        let mode = self.modes.mode();
        if mode == Mode::Aiming {
            return;
        }

        let face = self.buttons.face;
        for (slot, &button) in face.iter().enumerate() {
            if !frame.pressed(button) {
                continue;
            }
            if mode == Mode::Trick {
                if let Some(trick) = Trick::for_slot(slot) {
                    self.perform(trick);
                }
            } else if button != self.buttons.aim {
                self.apply_color(self.buttons.face_colors[slot]);
            }
        }

        if frame.pressed(self.buttons.speed_down) {
            self.adjust_speed(false);
        }
        if frame.pressed(self.buttons.speed_up) {
            self.adjust_speed(true);
        }
    }

    fn perform(&mut self, trick: Trick) {
        let outcome = self.session.pulse(trick.motors(), trick.duration());
        debug!("Trick {:?}: {:?}", trick, outcome);
    }

    fn adjust_speed(&mut self, up: bool) {
        if self.speed.step(up, self.modes.speed_mode()) {
            let fraction = self.speed.fraction();
            debug!("Speed fraction -> {:.2}", fraction);
            self.emit(AppEvent::SpeedChanged(fraction));
            self.refresh_led();
        }
    }

    fn apply_color(&mut self, color: Color) {
        self.color = color;
        self.refresh_led();
    }

    /// The main LED shows the colour dimmed by the speed fraction
    fn refresh_led(&mut self) {
        let scaled = self.color.scaled(self.speed.fraction());
        self.outbox.push(Command::SetColor(scaled));
    }

    fn enter_aiming(&mut self) {
        if !self.modes.enter_aiming() {
            return;
        }
        info!("Aiming");
        self.emit(AppEvent::ModeChanged(Mode::Aiming));
        self.session.stop();
        self.motion = Motion::Idle;
        self.aim_heading = self.session.heading() as f32;
        self.aim_spinning = false;
        self.outbox
            .push(Command::SetBackLed(self.aim.back_led_brightness));
    }

    fn exit_aiming(&mut self) {
        let Some(mode) = self.modes.exit_aiming() else {
            return;
        };
        let heading = (self.aim_heading.round() as u16) % 360;
        info!("Aim committed at {} degrees", heading);
        self.session.stop();
        self.aim_spinning = false;
        self.outbox.push(Command::SetHeading(heading));
        self.outbox.push(Command::SetBackLed(0));
        self.emit(AppEvent::ModeChanged(mode));
    }

    /// Rotate in place with the lateral axis while aiming
    fn steer_aim(&mut self, frame: &InputFrame, dt: Duration) {
        let x = frame.lateral;
        if x.abs() >= self.deadzone {
            self.aim_heading = (self.aim_heading + x * self.aim.turn_rate * dt.as_secs_f32())
                .rem_euclid(360.0);
            let power = self.aim.spin_power;
            let motors = if x > 0.0 {
                RawMotors::new(MotorMode::Forward, power, MotorMode::Reverse, power)
            } else {
                RawMotors::new(MotorMode::Reverse, power, MotorMode::Forward, power)
            };
            self.session.set_raw_motors(motors, false);
            self.aim_spinning = true;
        } else if self.aim_spinning {
            self.session.stop();
            self.aim_spinning = false;
        }
    }

    fn drive(&mut self, frame: &InputFrame, now: Instant) {
        match (frame.drive, self.motion) {
            (Some(intent), _) => {
                let speed = self.speed.apply(intent.speed);
                let outcome = self.session.drive(intent.heading, speed);
                trace!("Roll {} @ {}: {:?}", intent.heading, speed, outcome);
                self.motion = Motion::Driving;
            }
            (None, Motion::Driving) => self.send_stop(now),
            (None, Motion::Stopping { next_resend }) if now >= next_resend => self.send_stop(now),
            (None, _) => {}
        }
    }

    fn send_stop(&mut self, now: Instant) {
        let heading = self.session.heading();
        let outcome = self.session.drive(heading, 0);
        trace!("Stop at {}: {:?}", heading, outcome);
        self.motion = Motion::Stopping {
            next_resend: now + self.watchdog,
        };
    }

    fn emit(&self, event: AppEvent) {
        let _ = self.events.send(event);
    }

    #[cfg(test)]
    fn has_pending(&self) -> bool {
        !self.outbox.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::input::snapshot_with;
    use crate::domain::models::SessionState;
    use crate::infrastructure::bluetooth::protocol::CommandFrame;
    use crate::infrastructure::bluetooth::testing::MockConnector;

    struct Rig {
        control: ControlLoop,
        connector: MockConnector,
        events: mpsc::UnboundedReceiver<AppEvent>,
        start: Instant,
    }

    impl Rig {
        async fn new() -> Self {
            let connector = MockConnector::new();
            let (tx, mut events) = mpsc::unbounded_channel();
            let settings = Settings::default();
            let mut session = DeviceSession::new(settings.session_config(), tx.clone());
            session.connect(&connector).await.unwrap();

            let mut control = ControlLoop::new(&settings, session, tx);
            let start = Instant::now();
            control.tick(None, start);
            control.idle().await;
            assert!(!control.has_pending());

            connector.link.clear();
            while events.try_recv().is_ok() {}
            Self {
                control,
                connector,
                events,
                start,
            }
        }

        async fn step(&mut self, pressed: &[usize], x: f32, y: f32, at_ms: u64) {
            let snapshot = snapshot_with(pressed, x, y);
            self.control
                .tick(Some(&snapshot), self.start + Duration::from_millis(at_ms));
            self.control.idle().await;
        }

        fn frames(&self) -> Vec<CommandFrame> {
            self.connector.link.frames()
        }

        fn modes(&mut self) -> Vec<Mode> {
            std::iter::from_fn(|| self.events.try_recv().ok())
                .filter_map(|e| match e {
                    AppEvent::ModeChanged(mode) => Some(mode),
                    _ => None,
                })
                .collect()
        }

        fn speeds(&mut self) -> Vec<f32> {
            std::iter::from_fn(|| self.events.try_recv().ok())
                .filter_map(|e| match e {
                    AppEvent::SpeedChanged(fraction) => Some(fraction),
                    _ => None,
                })
                .collect()
        }
    }

    fn of(frames: &[CommandFrame], command_id: u8) -> Vec<Vec<u8>> {
        frames
            .iter()
            .filter(|f| f.device_id == 0x02 && f.command_id == command_id)
            .map(|f| f.payload.clone())
            .collect()
    }

    fn scaled_payload(color: Color, fraction: f32) -> Vec<u8> {
        let c = color.scaled(fraction);
        vec![c.r, c.g, c.b, 0]
    }

    #[tokio::test]
    async fn test_initial_colour_is_scaled() {
        let connector = MockConnector::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let settings = Settings::default();
        let mut session = DeviceSession::new(settings.session_config(), tx.clone());
        session.connect(&connector).await.unwrap();
        connector.link.clear();

        let mut control = ControlLoop::new(&settings, session, tx);
        control.tick(None, Instant::now());
        control.idle().await;

        assert_eq!(
            of(&connector.link.frames(), 0x20),
            vec![scaled_payload(settings.drive.color, 0.6)]
        );
    }

    #[tokio::test]
    async fn test_stick_right_rolls_at_banded_speed() {
        let mut rig = Rig::new().await;
        rig.step(&[], 0.6, 0.0, 100).await;

        let expected = (85.0f32 * 0.6).round() as u8;
        assert_eq!(of(&rig.frames(), 0x30), vec![vec![expected, 0, 90, 1]]);
        assert_eq!(rig.control.session().heading(), 90);
    }

    #[tokio::test]
    async fn test_missing_snapshot_stops() {
        let mut rig = Rig::new().await;
        rig.step(&[], 0.0, -1.0, 100).await;
        rig.control.tick(None, rig.start + Duration::from_millis(116));
        rig.control.idle().await;

        let rolls = of(&rig.frames(), 0x30);
        assert_eq!(rolls.len(), 2);
        assert_eq!(rolls[1], vec![0, 0, 0, 1]);
    }

    #[tokio::test]
    async fn test_dropped_stop_is_repeated_by_watchdog() {
        let mut rig = Rig::new().await;
        rig.connector.link.pause();
        rig.control
            .tick(Some(&snapshot_with(&[], 0.6, 0.0)), rig.start + Duration::from_millis(100));
        // Link still busy with the roll, the stop is dropped
        rig.control
            .tick(Some(&snapshot_with(&[], 0.0, 0.0)), rig.start + Duration::from_millis(116));
        rig.connector.link.resume();
        rig.control.idle().await;
        assert_eq!(of(&rig.frames(), 0x30).len(), 1);

        rig.step(&[], 0.0, 0.0, 200).await;
        assert_eq!(of(&rig.frames(), 0x30).len(), 1);

        rig.step(&[], 0.0, 0.0, 366).await;
        let rolls = of(&rig.frames(), 0x30);
        assert_eq!(rolls.len(), 2);
        assert_eq!(rolls[1], vec![0, 0, 90, 1]);

        // Keeps repeating while idle
        rig.step(&[], 0.0, 0.0, 500).await;
        assert_eq!(of(&rig.frames(), 0x30).len(), 2);
        rig.step(&[], 0.0, 0.0, 616).await;
        assert_eq!(of(&rig.frames(), 0x30).len(), 3);

        // A fresh intent supersedes the watchdog
        rig.step(&[], 0.0, -1.0, 700).await;
        rig.step(&[], 0.0, 0.0, 716).await;
        let rolls = of(&rig.frames(), 0x30);
        assert_eq!(rolls.len(), 5);
        assert_eq!(rolls[4], vec![0, 0, 0, 1]);
    }

    #[tokio::test]
    async fn test_combo_toggles_trick_mode() {
        let mut rig = Rig::new().await;

        rig.step(&[4, 6], 0.0, 0.0, 100).await;
        assert_eq!(rig.control.mode(), Mode::Trick);
        assert_eq!(rig.control.speed_fraction(), 0.6);
        assert_eq!(of(&rig.frames(), 0x33), vec![vec![0, 0, 0, 0]]);

        rig.step(&[4, 6], 0.0, 0.0, 200).await;
        rig.step(&[], 0.0, 0.0, 300).await;
        assert_eq!(rig.control.mode(), Mode::Trick);

        rig.step(&[4, 6], 0.0, 0.0, 400).await;
        assert_eq!(rig.control.mode(), Mode::Normal);
        assert_eq!(rig.modes(), vec![Mode::Trick, Mode::Normal]);
        assert!(rig.speeds().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trick_pulses_then_brakes() {
        let mut rig = Rig::new().await;
        rig.step(&[4, 6], 0.0, 0.0, 100).await;
        rig.step(&[], 0.0, 0.0, 200).await;
        rig.connector.link.clear();

        rig.step(&[0], 0.0, 0.0, 300).await;
        assert_eq!(of(&rig.frames(), 0x33), vec![vec![0x02, 200, 0x01, 200]]);

        tokio::time::sleep(Duration::from_millis(600)).await;
        rig.control.idle().await;
        assert_eq!(
            of(&rig.frames(), 0x33),
            vec![vec![0x02, 200, 0x01, 200], vec![0, 0, 0, 0]]
        );

        // The stick does nothing in Trick mode
        rig.step(&[], 1.0, 0.0, 400).await;
        assert!(of(&rig.frames(), 0x30).is_empty());
    }

    #[tokio::test]
    async fn test_short_press_applies_colour_once() {
        let mut rig = Rig::new().await;
        let yellow = ButtonMap::default().face_colors[3];

        rig.step(&[3], 0.0, 0.0, 100).await;
        assert!(of(&rig.frames(), 0x20).is_empty());
        rig.step(&[3], 0.0, 0.0, 200).await;
        rig.step(&[], 0.0, 0.0, 400).await;
        rig.step(&[], 0.0, 0.0, 2500).await;

        assert_eq!(of(&rig.frames(), 0x20), vec![scaled_payload(yellow, 0.6)]);
        assert_eq!(rig.control.mode(), Mode::Normal);
        assert!(rig.modes().is_empty());
    }

    #[tokio::test]
    async fn test_outbox_keeps_latest_colour_while_busy() {
        let mut rig = Rig::new().await;
        let blue = ButtonMap::default().face_colors[1];

        rig.connector.link.pause();
        rig.control
            .tick(Some(&snapshot_with(&[], 0.6, 0.0)), rig.start + Duration::from_millis(100));
        rig.control
            .tick(Some(&snapshot_with(&[0], 0.0, 0.0)), rig.start + Duration::from_millis(200));
        rig.control
            .tick(Some(&snapshot_with(&[1], 0.0, 0.0)), rig.start + Duration::from_millis(300));
        rig.connector.link.resume();
        rig.control.idle().await;
        assert!(of(&rig.frames(), 0x20).is_empty());

        rig.step(&[], 0.0, 0.0, 400).await;
        rig.step(&[], 0.0, 0.0, 420).await;
        assert_eq!(of(&rig.frames(), 0x20), vec![scaled_payload(blue, 0.6)]);
    }

    #[tokio::test]
    async fn test_colour_button_fires_on_press() {
        let mut rig = Rig::new().await;
        let red = ButtonMap::default().face_colors[0];

        rig.step(&[0], 0.0, 0.0, 100).await;
        rig.step(&[0], 0.0, 0.0, 200).await;
        assert_eq!(of(&rig.frames(), 0x20), vec![scaled_payload(red, 0.6)]);
    }

    #[tokio::test]
    async fn test_hold_to_aim() {
        let mut rig = Rig::new().await;

        for at in [0, 500, 1000, 1999] {
            rig.step(&[3], 0.0, 0.0, at).await;
            assert_eq!(rig.control.mode(), Mode::Normal);
        }
        rig.step(&[3], 0.0, 0.0, 2000).await;
        assert_eq!(rig.control.mode(), Mode::Aiming);
        assert_eq!(of(&rig.frames(), 0x33), vec![vec![0, 0, 0, 0]]);

        // Mode buttons are ignored while aiming
        rig.step(&[3, 9], 1.0, 0.0, 2100).await;
        assert_eq!(rig.control.mode(), Mode::Aiming);

        for at in [2200, 2300, 2400, 2500] {
            rig.step(&[3], 1.0, 0.0, at).await;
        }
        assert_eq!(rig.modes(), vec![Mode::Aiming]);
        let frames = rig.frames();
        assert!(of(&frames, 0x21).contains(&vec![255]));
        assert!(of(&frames, 0x33).contains(&vec![0x01, 60, 0x02, 60]));
        assert!(of(&frames, 0x30).is_empty());

        rig.connector.link.clear();
        rig.step(&[], 0.0, 0.0, 2600).await;
        assert_eq!(rig.control.mode(), Mode::Normal);
        rig.step(&[], 0.0, 0.0, 2700).await;
        rig.step(&[], 0.0, 0.0, 2800).await;

        let frames = rig.frames();
        assert_eq!(of(&frames, 0x33), vec![vec![0, 0, 0, 0]]);
        assert_eq!(of(&frames, 0x01), vec![vec![0, 60]]);
        assert_eq!(of(&frames, 0x21), vec![vec![0]]);
        assert_eq!(rig.modes(), vec![Mode::Normal]);
    }

    #[tokio::test]
    async fn test_bouncing_aim_button_still_aims() {
        let mut rig = Rig::new().await;

        rig.step(&[3], 0.0, 0.0, 0).await;
        rig.step(&[], 0.0, 0.0, 10).await;
        for at in (20..=2000).step_by(100) {
            rig.step(&[3], 0.0, 0.0, at).await;
        }
        rig.step(&[3], 0.0, 0.0, 2000).await;

        assert_eq!(rig.control.mode(), Mode::Aiming);
        assert_eq!(rig.modes(), vec![Mode::Aiming]);
        assert!(of(&rig.frames(), 0x20).is_empty());
    }

    #[tokio::test]
    async fn test_replaced_session_is_woken() {
        let mut rig = Rig::new().await;
        let connector = MockConnector::new();
        let (tx, _events) = mpsc::unbounded_channel();
        let mut session = DeviceSession::new(Settings::default().session_config(), tx);
        session.connect(&connector).await.unwrap();
        connector.link.clear();

        let old = rig.control.replace_session(session);
        rig.control.idle().await;
        assert_eq!(old.state(), SessionState::Ready);

        let wakes = connector
            .link
            .frames()
            .iter()
            .filter(|f| f.device_id == 0x00 && f.command_id == 0x13)
            .count();
        assert_eq!(wakes, 1);
        assert!(rig.frames().is_empty());
    }

    #[tokio::test]
    async fn test_speed_buttons_and_mode_caps() {
        let mut rig = Rig::new().await;
        let base = Settings::default().drive.color;

        rig.step(&[4], 0.0, 0.0, 100).await;
        assert_eq!(rig.control.speed_fraction(), 0.5);
        assert_eq!(of(&rig.frames(), 0x20), vec![scaled_payload(base, 0.5)]);
        rig.step(&[], 0.0, 0.0, 200).await;
        rig.step(&[5], 0.0, 0.0, 300).await;
        rig.step(&[], 0.0, 0.0, 400).await;
        rig.step(&[5], 0.0, 0.0, 500).await;
        assert_eq!(rig.control.speed_fraction(), 0.6);
        assert_eq!(rig.speeds(), vec![0.5, 0.6]);

        rig.step(&[9], 0.0, 0.0, 600).await;
        assert_eq!(rig.control.mode(), Mode::Expert);
        rig.step(&[5], 0.0, 0.0, 700).await;
        rig.step(&[], 0.0, 0.0, 800).await;
        rig.step(&[5], 0.0, 0.0, 900).await;
        assert_eq!(rig.control.speed_fraction(), 0.8);

        rig.step(&[9], 0.0, 0.0, 1000).await;
        rig.step(&[], 0.0, 0.0, 1100).await;
        assert_eq!(rig.control.mode(), Mode::Trick);
        rig.step(&[9], 0.0, 0.0, 1200).await;
        assert_eq!(rig.control.mode(), Mode::Normal);
        assert_eq!(rig.control.speed_fraction(), 0.6);
    }

    #[tokio::test]
    async fn test_sleep_button() {
        let mut rig = Rig::new().await;
        rig.step(&[8], 0.0, 0.0, 100).await;
        assert!(rig.control.sleep_requested());

        rig.control.sleep().await.unwrap();
        assert!(!rig.control.sleep_requested());
        assert_eq!(rig.control.session().state(), SessionState::Disconnected);
        assert!(of(&rig.frames(), 0x21).contains(&vec![0]));
    }
}
