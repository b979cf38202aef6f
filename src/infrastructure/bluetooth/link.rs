//! Link boundary
//!
//! The session talks to the radio through these traits so the protocol
//! and control code never depend on a particular BLE stack.

use super::error::{ConnectionError, LinkError};
use super::protocol;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// GATT characteristics used by the robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Radio service, write-only
    AntiDos,
    /// Radio service, write-only
    TxPower,
    /// Radio service, write-only
    WakeCpu,
    /// Robot service, framed commands
    Control,
    /// Robot service, notifications
    Response,
}

impl Characteristic {
    pub fn uuid(&self) -> &'static str {
        match self {
            Self::AntiDos => protocol::ANTI_DOS_CHAR_UUID,
            Self::TxPower => protocol::TX_POWER_CHAR_UUID,
            Self::WakeCpu => protocol::WAKE_CPU_CHAR_UUID,
            Self::Control => protocol::CONTROL_CHAR_UUID,
            Self::Response => protocol::RESPONSE_CHAR_UUID,
        }
    }

    pub fn service_uuid(&self) -> &'static str {
        match self {
            Self::AntiDos | Self::TxPower | Self::WakeCpu => protocol::RADIO_SERVICE_UUID,
            Self::Control | Self::Response => protocol::ROBOT_SERVICE_UUID,
        }
    }
}

/// Events pushed by a link backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Raw notification bytes from the response characteristic
    Notification(Vec<u8>),
    /// The link dropped
    Disconnected,
}

/// A device picked during the request step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub address: u64,
}

/// An established link to one robot
#[async_trait]
pub trait RobotLink: Send + Sync {
    /// Write a value to a characteristic and wait for the acknowledgement
    async fn write(&self, characteristic: Characteristic, value: &[u8]) -> Result<(), LinkError>;

    /// Enable notifications; values are delivered as [`LinkEvent::Notification`]
    async fn subscribe(&self, characteristic: Characteristic) -> Result<(), LinkError>;

    /// Tear the link down
    async fn disconnect(&self);
}

/// Finds robots and establishes links to them
#[async_trait]
pub trait RobotConnector: Send + Sync {
    /// Select a device to connect to
    async fn request(&self) -> Result<DeviceInfo, ConnectionError>;

    /// Establish a link; the backend reports notifications and link loss on `events`
    async fn connect(
        &self,
        device: &DeviceInfo,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn RobotLink>, ConnectionError>;
}
