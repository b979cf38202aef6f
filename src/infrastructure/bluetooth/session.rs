//! Device Session
//!
//! Owns one connection attempt from device selection to teardown:
//!
//! ```text
//! Idle -> Requesting -> Connecting -> Initializing -> Ready
//!   \__________\_____________\____________\____________\__> Disconnected
//! ```
//!
//! A session is never reused once it reaches `Disconnected`; reconnecting
//! means building a new session and with it a new [`CommandChannel`].

use super::channel::{CommandChannel, SendOutcome};
use super::error::{ConnectionError, InitStep, InitializationError, SessionError, TransmitError};
use super::link::{Characteristic, LinkEvent, RobotConnector, RobotLink};
use super::protocol::{self, Color, Command, RawMotors};
use super::telemetry::{TelemetryDecoder, TelemetryEvent};
use crate::domain::models::{AppEvent, MessageSeverity, SessionState, StatusMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long `sleep` waits for an outstanding write before giving up on it
const SLEEP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for the wake sequence and framing
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub tx_power: u8,
    pub subscribe_telemetry: bool,
    pub sop2: u8,
    pub min_voltage: f32,
    pub max_voltage: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tx_power: protocol::DEFAULT_TX_POWER,
            subscribe_telemetry: true,
            sop2: protocol::SOP2_DEFAULT,
            min_voltage: super::telemetry::DEFAULT_MIN_VOLTAGE,
            max_voltage: super::telemetry::DEFAULT_MAX_VOLTAGE,
        }
    }
}

pub struct DeviceSession {
    config: SessionConfig,
    state: Arc<watch::Sender<SessionState>>,
    events: mpsc::UnboundedSender<AppEvent>,
    link: Option<Arc<dyn RobotLink>>,
    channel: Option<CommandChannel>,
    monitor: Option<JoinHandle<()>>,
    heading: u16,
    pulse_generation: Arc<AtomicU64>,
}

impl DeviceSession {
    pub fn new(config: SessionConfig, events: mpsc::UnboundedSender<AppEvent>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            state: Arc::new(state),
            events,
            link: None,
            channel: None,
            monitor: None,
            heading: 0,
            pulse_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
            && self.channel.as_ref().is_some_and(|c| !c.is_closed())
    }

    /// Heading of the last dispatched roll
    pub fn heading(&self) -> u16 {
        self.heading
    }

    pub fn is_busy(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_busy())
    }

    /// Wait until no command is in flight
    pub async fn idle(&self) {
        if let Some(channel) = &self.channel {
            channel.idle().await;
        }
    }

    /// Select a device, connect and run the wake sequence
    pub async fn connect(&mut self, connector: &dyn RobotConnector) -> Result<(), SessionError> {
        let current = self.state();
        if current != SessionState::Idle {
            return Err(SessionError::AlreadyUsed(current));
        }

        self.transition(SessionState::Requesting);
        let device = match connector.request().await {
            Ok(device) => device,
            Err(e) => return Err(self.connection_failed(e)),
        };
        info!("Selected device {} ({:#X})", device.name, device.address);

        self.transition(SessionState::Connecting);
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let link = match connector.connect(&device, link_tx).await {
            Ok(link) => link,
            Err(e) => return Err(self.connection_failed(e)),
        };

        let channel = CommandChannel::new(link.clone(), self.config.sop2);
        self.monitor = Some(self.spawn_monitor(link_rx, channel.clone()));
        self.link = Some(link.clone());
        self.channel = Some(channel.clone());

        self.transition(SessionState::Initializing);
        if let Err(e) = self.initialize(link.as_ref(), &channel).await {
            error!("{}", e);
            self.send_log(format!("Initialization failed: {}", e), MessageSeverity::Error);
            self.teardown().await;
            return Err(e.into());
        }

        if !self.transition(SessionState::Ready) {
            // Link dropped during the wake sequence
            self.teardown().await;
            return Err(ConnectionError::Link(super::error::LinkError::Closed).into());
        }
        self.send_log(format!("Connected to {}", device.name), MessageSeverity::Success);
        Ok(())
    }

    async fn initialize(
        &self,
        link: &dyn RobotLink,
        channel: &CommandChannel,
    ) -> Result<(), InitializationError> {
        let failed = |step: InitStep| {
            move |source: TransmitError| InitializationError { step, source }
        };

        info!("Initializing robot...");
        link.write(Characteristic::AntiDos, protocol::UNLOCK_PAYLOAD)
            .await
            .map_err(|e| failed(InitStep::Unlock)(e.into()))?;
        debug!("Wrote anti-DoS characteristic");

        link.write(Characteristic::TxPower, &[self.config.tx_power])
            .await
            .map_err(|e| failed(InitStep::TxPower)(e.into()))?;
        debug!("Wrote TX power characteristic");

        link.write(Characteristic::WakeCpu, &[protocol::WAKE_CPU_PAYLOAD])
            .await
            .map_err(|e| failed(InitStep::WakeCpu)(e.into()))?;
        debug!("Wrote wake CPU characteristic");

        if self.config.subscribe_telemetry {
            link.subscribe(Characteristic::Response)
                .await
                .map_err(|e| failed(InitStep::SubscribeTelemetry)(e.into()))?;
            channel
                .transmit(Command::SetPowerNotify(true))
                .await
                .map_err(failed(InitStep::SubscribeTelemetry))?;
            debug!("Telemetry notifications enabled");
        }

        channel
            .transmit(Command::SetBackLed(0))
            .await
            .map_err(failed(InitStep::BackLed))?;
        channel
            .transmit(Command::SetHeading(0))
            .await
            .map_err(failed(InitStep::Heading))?;

        info!("Robot initialized");
        Ok(())
    }

    /// Send any command; a no-op unless the session is Ready
    pub fn send(&self, command: Command, priority: bool) -> SendOutcome {
        match &self.channel {
            Some(channel) if self.is_ready() => channel.send(command, priority),
            _ => SendOutcome::NotReady,
        }
    }

    /// Roll towards an absolute heading in degrees
    pub fn drive(&mut self, heading: u16, speed: u8) -> SendOutcome {
        let heading = heading % 360;
        let outcome = self.send(Command::Roll { heading, speed }, false);
        if outcome.is_dispatched() {
            self.heading = heading;
        }
        outcome
    }

    pub fn set_color(&self, color: Color) -> SendOutcome {
        self.send(Command::SetColor(color), false)
    }

    pub fn wake(&self) -> SendOutcome {
        self.send(Command::Wake, false)
    }

    pub fn set_back_led(&self, brightness: u8) -> SendOutcome {
        self.send(Command::SetBackLed(brightness), false)
    }

    pub fn set_heading(&self, heading: u16) -> SendOutcome {
        self.send(Command::SetHeading(heading % 360), false)
    }

    pub fn set_raw_motors(&self, motors: RawMotors, priority: bool) -> SendOutcome {
        self.send(Command::SetRawMotors(motors), priority)
    }

    /// Brake both motors; always bypasses the busy gate
    pub fn stop(&self) -> SendOutcome {
        self.set_raw_motors(RawMotors::OFF, true)
    }

    /// Run the motors for `duration`, then brake
    ///
    /// A newer pulse supersedes the pending brake of an older one.
    pub fn pulse(&self, motors: RawMotors, duration: Duration) -> SendOutcome {
        let outcome = self.set_raw_motors(motors, false);
        if let (true, Some(channel)) = (outcome.is_dispatched(), self.channel.clone()) {
            let generation = self.pulse_generation.fetch_add(1, Ordering::SeqCst) + 1;
            let current = self.pulse_generation.clone();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                if current.load(Ordering::SeqCst) == generation {
                    channel.send(Command::SetRawMotors(RawMotors::OFF), true);
                }
            });
        }
        outcome
    }

    /// Turn the back LED off, put the robot to sleep and disconnect
    pub async fn sleep(&mut self) -> Result<(), SessionError> {
        let Some(channel) = self.channel.clone().filter(|_| self.is_ready()) else {
            self.disconnect().await;
            return Ok(());
        };

        if tokio::time::timeout(SLEEP_DRAIN_TIMEOUT, channel.idle())
            .await
            .is_err()
        {
            warn!("Outstanding write did not finish before sleep");
        }

        info!("Putting robot to sleep");
        let result = async {
            channel.transmit(Command::SetBackLed(0)).await?;
            channel.transmit(Command::Sleep).await
        }
        .await;

        self.disconnect().await;
        result.map(|_| ()).map_err(SessionError::from)
    }

    pub async fn disconnect(&mut self) {
        if self.state() == SessionState::Disconnected && self.link.is_none() {
            return;
        }
        info!("Disconnecting from robot");
        self.teardown().await;
        self.send_log("Disconnected from robot".to_string(), MessageSeverity::Info);
    }

    /// Invalidate every handle and enter Disconnected
    async fn teardown(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.transition(SessionState::Disconnected);
        if let Some(link) = self.link.take() {
            link.disconnect().await;
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
    }

    fn connection_failed(&mut self, e: ConnectionError) -> SessionError {
        error!("Connection failed: {}", e);
        self.send_log(format!("Connection failed: {}", e), MessageSeverity::Error);
        self.transition(SessionState::Disconnected);
        e.into()
    }

    fn transition(&self, next: SessionState) -> bool {
        set_state(&self.state, &self.events, next)
    }

    /// Route link events: telemetry to the app, link loss to the state machine
    fn spawn_monitor(
        &self,
        mut link_events: mpsc::UnboundedReceiver<LinkEvent>,
        channel: CommandChannel,
    ) -> JoinHandle<()> {
        let state = self.state.clone();
        let events = self.events.clone();
        let decoder = TelemetryDecoder::new(self.config.min_voltage, self.config.max_voltage);

        tokio::spawn(async move {
            while let Some(event) = link_events.recv().await {
                match event {
                    LinkEvent::Notification(bytes) => {
                        if let Some(TelemetryEvent::Battery(reading)) = decoder.decode(&bytes) {
                            debug!(
                                "Battery {}% ({:.2} V, {:?})",
                                reading.percent, reading.voltage, reading.power_state
                            );
                            let _ = events.send(AppEvent::Battery(reading));
                        }
                    }
                    LinkEvent::Disconnected => {
                        warn!("Link to robot lost");
                        channel.close();
                        set_state(&state, &events, SessionState::Disconnected);
                        break;
                    }
                }
            }
        })
    }

    fn send_log(&self, message: String, severity: MessageSeverity) {
        let _ = self
            .events
            .send(AppEvent::LogMessage(StatusMessage { message, severity }));
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
    }
}

/// Move to `next` unless already there; Disconnected is terminal
fn set_state(
    state: &watch::Sender<SessionState>,
    events: &mpsc::UnboundedSender<AppEvent>,
    next: SessionState,
) -> bool {
    let changed = state.send_if_modified(|current| {
        if *current == next || *current == SessionState::Disconnected {
            return false;
        }
        *current = next;
        true
    });
    if changed {
        info!("Session state -> {:?}", next);
        let _ = events.send(AppEvent::ConnectionState(next));
    }
    changed
}
