//! BLE Scanner Module
//!
//! Finds the first robot whose advertised name starts with the configured
//! prefix ("2B-" for Ollie).

use crate::domain::models::{AppEvent, MessageSeverity, StatusMessage};
use crate::infrastructure::bluetooth::error::{ConnectionError, LinkError};
use crate::infrastructure::bluetooth::link::DeviceInfo;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Foundation::TypedEventHandler;

pub struct BleScanner {
    name_prefix: String,
    timeout: Duration,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl BleScanner {
    pub fn new(
        name_prefix: String,
        timeout: Duration,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            name_prefix,
            timeout,
            event_sender,
        }
    }

    /// Scan until a matching advertisement arrives or the timeout passes
    pub async fn find(&self) -> Result<DeviceInfo, ConnectionError> {
        info!("Scanning for devices named {}*", self.name_prefix);
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: "Scanning for robot...".to_string(),
            severity: MessageSeverity::Info,
        }));

        let (found_tx, mut found_rx) = mpsc::unbounded_channel();
        let watcher = self.start(found_tx).map_err(LinkError::from)?;

        let result = tokio::time::timeout(self.timeout, found_rx.recv()).await;
        let _ = watcher.Stop();

        match result {
            Ok(Some(device)) => {
                info!("Found {} ({:#X})", device.name, device.address);
                Ok(device)
            }
            Ok(None) => Err(ConnectionError::NoDeviceSelected),
            Err(_) => Err(ConnectionError::ScanTimeout(self.timeout.as_millis() as u64)),
        }
    }

    fn start(
        &self,
        found: mpsc::UnboundedSender<DeviceInfo>,
    ) -> windows::core::Result<BluetoothLEAdvertisementWatcher> {
        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let prefix = self.name_prefix.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let name = args.Advertisement()?.LocalName()?.to_string();
                    if name.starts_with(&prefix) {
                        let address = args.BluetoothAddress()?;
                        debug!("Advertisement from {} ({:#X})", name, address);
                        let _ = found.send(DeviceInfo { name, address });
                    }
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;
        Ok(watcher)
    }
}
