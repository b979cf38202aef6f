use crate::domain::models::SessionState;
use thiserror::Error;

/// Failure reported by a link backend for a single GATT operation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("link is closed")]
    Closed,

    #[error("characteristic {0} not available")]
    MissingCharacteristic(&'static str),

    #[error("GATT operation failed: {0}")]
    Gatt(String),
}

#[cfg(windows)]
impl From<windows::core::Error> for LinkError {
    fn from(e: windows::core::Error) -> Self {
        Self::Gatt(e.to_string())
    }
}

/// Device selection or link establishment failed
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("no device selected")]
    NoDeviceSelected,

    #[error("no device found within {0} ms")]
    ScanTimeout(u64),

    #[error("service {0} not found")]
    ServiceNotFound(&'static str),

    #[error("link establishment failed: {0}")]
    Link(#[from] LinkError),
}

#[cfg(windows)]
impl From<windows::core::Error> for ConnectionError {
    fn from(e: windows::core::Error) -> Self {
        Self::Link(e.into())
    }
}

/// Initialization steps, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    Unlock,
    TxPower,
    WakeCpu,
    SubscribeTelemetry,
    BackLed,
    Heading,
}

/// A step of the wake sequence failed
#[derive(Debug, Error)]
#[error("initialization failed at {step:?}: {source}")]
pub struct InitializationError {
    pub step: InitStep,
    #[source]
    pub source: TransmitError,
}

/// A single framed write failed
#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("channel closed")]
    Closed,

    #[error("frame encoding failed: {0}")]
    Frame(#[from] super::protocol::FrameError),

    #[error("write failed: {0}")]
    Link(#[from] LinkError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already used (state {0:?}); create a new session")]
    AlreadyUsed(SessionState),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Initialization(#[from] InitializationError),

    #[error("sleep command failed: {0}")]
    Transmit(#[from] TransmitError),
}
