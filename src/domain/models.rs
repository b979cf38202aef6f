use crate::infrastructure::bluetooth::telemetry::BatteryReading;

/// Lifecycle of one device session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Requesting,
    Connecting,
    Initializing,
    Ready,
    Disconnected,
}

/// Driving mode of the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Expert,
    Trick,
    /// Transient overlay entered from Normal/Expert
    Aiming,
}

impl Mode {
    /// Modes that steer with the stick
    pub fn is_driving(&self) -> bool {
        matches!(self, Self::Normal | Self::Expert)
    }
}

/// Notifications for the UI or any other observer
#[derive(Debug, Clone)]
pub enum AppEvent {
    ConnectionState(SessionState),
    ModeChanged(Mode),
    SpeedChanged(f32),
    Battery(BatteryReading),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
