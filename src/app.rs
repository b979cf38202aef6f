//! Application runner
//!
//! Connects a session, then polls the input source on a fixed interval and
//! feeds every snapshot to the control loop. Observer events are drained
//! into the log. On shutdown (or the sleep button) the robot is put to
//! sleep before the runner returns.

use crate::domain::control::ControlLoop;
use crate::domain::input::InputSource;
use crate::domain::models::{AppEvent, MessageSeverity, SessionState};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::error::SessionError;
use crate::infrastructure::bluetooth::link::RobotConnector;
use crate::infrastructure::bluetooth::session::DeviceSession;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub struct App {
    settings: Settings,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    event_receiver: mpsc::UnboundedReceiver<AppEvent>,
}

impl App {
    pub fn new(settings: Settings) -> Self {
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        Self {
            settings,
            event_sender,
            event_receiver,
        }
    }

    /// Sender for backends that report their own status messages
    pub fn event_sender(&self) -> mpsc::UnboundedSender<AppEvent> {
        self.event_sender.clone()
    }

    pub async fn run<I, S>(
        mut self,
        connector: &dyn RobotConnector,
        mut input: I,
        shutdown: S,
    ) -> anyhow::Result<()>
    where
        I: InputSource,
        S: Future<Output = ()>,
    {
        let session = loop {
            match self.connect(connector).await {
                Ok(session) => break session,
                Err(e) if self.settings.auto_reconnect => {
                    warn!("Connection failed: {}, retrying", e);
                    self.drain_events();
                    tokio::time::sleep(self.reconnect_delay()).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let mut control = ControlLoop::new(&self.settings, session, self.event_sender.clone());
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.settings.poll_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
                Some(event) = self.event_receiver.recv() => report(&event),
                _ = interval.tick() => {
                    let snapshot = input.poll();
                    control.tick(snapshot.as_ref(), Instant::now());

                    if control.sleep_requested() {
                        break;
                    }
                    if control.session().state() == SessionState::Disconnected {
                        if !self.settings.auto_reconnect {
                            warn!("Robot disconnected");
                            self.drain_events();
                            return Ok(());
                        }
                        tokio::time::sleep(self.reconnect_delay()).await;
                        match self.connect(connector).await {
                            Ok(session) => {
                                let mut old = control.replace_session(session);
                                old.disconnect().await;
                                info!("Reconnected");
                            }
                            Err(e) => warn!("Reconnect failed: {}", e),
                        }
                    }
                }
            }
        }

        if let Err(e) = control.sleep().await {
            error!("Failed to put robot to sleep: {}", e);
        }
        self.drain_events();
        Ok(())
    }

    async fn connect(&self, connector: &dyn RobotConnector) -> Result<DeviceSession, SessionError> {
        let mut session =
            DeviceSession::new(self.settings.session_config(), self.event_sender.clone());
        session.connect(connector).await?;
        Ok(session)
    }

    fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.settings.reconnect_delay_ms)
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.event_receiver.try_recv() {
            report(&event);
        }
    }
}

fn report(event: &AppEvent) {
    match event {
        AppEvent::ConnectionState(state) => debug!("Connection state: {:?}", state),
        AppEvent::ModeChanged(mode) => info!("Mode: {:?}", mode),
        AppEvent::SpeedChanged(fraction) => info!("Speed: {:.0}%", fraction * 100.0),
        AppEvent::Battery(reading) => info!(
            "Battery: {}% ({:.2} V, {:?})",
            reading.percent, reading.voltage, reading.power_state
        ),
        AppEvent::LogMessage(msg) => match msg.severity {
            MessageSeverity::Error => error!("{}", msg.message),
            MessageSeverity::Warning => warn!("{}", msg.message),
            MessageSeverity::Info | MessageSeverity::Success => info!("{}", msg.message),
        },
    }
}
