//! Bluetooth Module
//!
//! BLE communication with a Sphero Ollie.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                DeviceSession                 │
//! │  (wake sequence, lifecycle, robot commands)  │
//! └───────┬──────────────────────────┬───────────┘
//!         │                          │
//!         ▼                          ▼
//! ┌────────────────┐        ┌─────────────────┐
//! │ CommandChannel │        │ TelemetryDecoder│
//! │ - busy gate    │        │ - power frames  │
//! │ - sequencing   │        └─────────────────┘
//! └───────┬────────┘
//!         ▼
//! ┌────────────────┐   RobotLink / RobotConnector
//! │    Protocol    │   (WinRT backend on Windows)
//! └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UUIDs, commands and frame encoding
//! - [`channel`] - Drop-on-busy command serialization
//! - [`session`] - Connection lifecycle and the wake sequence
//! - [`telemetry`] - Asynchronous power notifications
//! - [`link`] - Backend traits
//! - `scanner`, `connection` - WinRT discovery and GATT access

pub mod channel;
#[cfg(windows)]
pub mod connection;
pub mod error;
pub mod link;
pub mod protocol;
#[cfg(windows)]
pub mod scanner;
pub mod session;
pub mod telemetry;
#[cfg(test)]
pub(crate) mod testing;

pub use session::{DeviceSession, SessionConfig};
