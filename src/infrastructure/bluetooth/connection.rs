//! BLE Connection Module
//!
//! WinRT implementation of the link traits. Resolves the radio and robot
//! services, forwards response notifications and reports connection loss.

use crate::domain::models::{AppEvent, MessageSeverity, StatusMessage};
use crate::domain::settings::LinkSettings;
use crate::infrastructure::bluetooth::error::{ConnectionError, LinkError};
use crate::infrastructure::bluetooth::link::{
    Characteristic, DeviceInfo, LinkEvent, RobotConnector, RobotLink,
};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::scanner::BleScanner;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use windows::core::GUID;
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattDeviceService, GattSession, GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

const CHARACTERISTICS: [Characteristic; 5] = [
    Characteristic::AntiDos,
    Characteristic::TxPower,
    Characteristic::WakeCpu,
    Characteristic::Control,
    Characteristic::Response,
];

/// Parse a dashed UUID string into a GUID
pub fn parse_uuid(uuid: &str) -> Result<GUID, LinkError> {
    let hex = uuid.replace('-', "");
    if hex.len() != 32 {
        return Err(LinkError::Gatt(format!("invalid UUID {}", uuid)));
    }
    u128::from_str_radix(&hex, 16)
        .map(GUID::from_u128)
        .map_err(|_| LinkError::Gatt(format!("invalid UUID {}", uuid)))
}

/// Scans for the robot and opens WinRT GATT links to it
pub struct WinRtConnector {
    scanner: BleScanner,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl WinRtConnector {
    pub fn new(settings: &LinkSettings, event_sender: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            scanner: BleScanner::new(
                settings.device_name_prefix.clone(),
                Duration::from_millis(settings.scan_timeout_ms),
                event_sender.clone(),
            ),
            event_sender,
        }
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

#[async_trait]
impl RobotConnector for WinRtConnector {
    async fn request(&self) -> Result<DeviceInfo, ConnectionError> {
        self.scanner.find().await
    }

    async fn connect(
        &self,
        device: &DeviceInfo,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn RobotLink>, ConnectionError> {
        info!("Connecting to {} ({:#X})", device.name, device.address);
        self.send_log("Connecting to robot...", MessageSeverity::Info);

        let ble = BluetoothLEDevice::FromBluetoothAddressAsync(device.address)?.await?;

        let session = match create_gatt_session(&ble).await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Failed to create GattSession: {}, continuing anyway", e);
                None
            }
        };

        let radio = find_service(&ble, protocol::RADIO_SERVICE_UUID).await?;
        let robot = find_service(&ble, protocol::ROBOT_SERVICE_UUID).await?;

        let mut characteristics = HashMap::new();
        for characteristic in CHARACTERISTICS {
            let service = if characteristic.service_uuid() == protocol::RADIO_SERVICE_UUID {
                &radio
            } else {
                &robot
            };
            let gatt = find_characteristic(service, characteristic).await?;
            characteristics.insert(characteristic, gatt);
        }
        debug!("Resolved {} characteristics", characteristics.len());

        let status_token = watch_connection(&ble, events.clone())?;

        Ok(Arc::new(WinRtLink {
            device: ble,
            session,
            characteristics,
            events,
            status_token,
            notify_tokens: Mutex::new(Vec::new()),
        }))
    }
}

/// Keep the connection up while the link is in use
async fn create_gatt_session(device: &BluetoothLEDevice) -> windows::core::Result<GattSession> {
    let device_id = device.BluetoothDeviceId()?;
    let session = GattSession::FromDeviceIdAsync(&device_id)?.await?;
    session.SetMaintainConnection(true)?;
    Ok(session)
}

async fn find_service(
    device: &BluetoothLEDevice,
    uuid: &'static str,
) -> Result<GattDeviceService, ConnectionError> {
    let guid = parse_uuid(uuid)?;
    let result = device.GetGattServicesForUuidAsync(guid)?.await?;
    if result.Status()? != GattCommunicationStatus::Success {
        warn!("Service lookup for {} returned {:?}", uuid, result.Status()?);
        return Err(ConnectionError::ServiceNotFound(uuid));
    }

    let services = result.Services()?;
    if services.Size()? == 0 {
        return Err(ConnectionError::ServiceNotFound(uuid));
    }
    let service = services.GetAt(0)?;

    let access = service.RequestAccessAsync()?.await?;
    debug!("Service {} access status: {:?}", uuid, access);
    Ok(service)
}

async fn find_characteristic(
    service: &GattDeviceService,
    characteristic: Characteristic,
) -> Result<GattCharacteristic, ConnectionError> {
    let guid = parse_uuid(characteristic.uuid())?;
    let result = service.GetCharacteristicsForUuidAsync(guid)?.await?;
    let found = result.Characteristics()?;
    if result.Status()? != GattCommunicationStatus::Success || found.Size()? == 0 {
        return Err(LinkError::MissingCharacteristic(characteristic.uuid()).into());
    }
    Ok(found.GetAt(0)?)
}

fn watch_connection(
    device: &BluetoothLEDevice,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> windows::core::Result<i64> {
    let handler = TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
        if let Some(dev) = dev.as_ref() {
            if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                let _ = events.send(LinkEvent::Disconnected);
            }
        }
        Ok(())
    });
    device.ConnectionStatusChanged(&handler)
}

fn read_buffer(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

struct WinRtLink {
    device: BluetoothLEDevice,
    session: Option<GattSession>,
    characteristics: HashMap<Characteristic, GattCharacteristic>,
    events: mpsc::UnboundedSender<LinkEvent>,
    status_token: i64,
    notify_tokens: Mutex<Vec<(Characteristic, i64)>>,
}

impl WinRtLink {
    fn characteristic(&self, characteristic: Characteristic) -> Result<&GattCharacteristic, LinkError> {
        self.characteristics
            .get(&characteristic)
            .ok_or(LinkError::MissingCharacteristic(characteristic.uuid()))
    }
}

#[async_trait]
impl RobotLink for WinRtLink {
    async fn write(&self, characteristic: Characteristic, value: &[u8]) -> Result<(), LinkError> {
        let target = self.characteristic(characteristic)?;
        let operation = {
            let writer = DataWriter::new()?;
            writer.WriteBytes(value)?;
            let buffer = writer.DetachBuffer()?;
            target.WriteValueAsync(&buffer)?
        };

        let status = operation.await?;
        if status != GattCommunicationStatus::Success {
            return Err(LinkError::Gatt(format!(
                "write to {:?} returned {:?}",
                characteristic, status
            )));
        }
        Ok(())
    }

    async fn subscribe(&self, characteristic: Characteristic) -> Result<(), LinkError> {
        let target = self.characteristic(characteristic)?;

        let token = {
            let events = self.events.clone();
            let handler = TypedEventHandler::new(
                move |_: windows::core::Ref<GattCharacteristic>,
                      args: windows::core::Ref<GattValueChangedEventArgs>| {
                    if let Some(args) = args.as_ref() {
                        let bytes = read_buffer(&args.CharacteristicValue()?)?;
                        let _ = events.send(LinkEvent::Notification(bytes));
                    }
                    Ok(())
                },
            );
            target.ValueChanged(&handler)?
        };
        if let Ok(mut tokens) = self.notify_tokens.lock() {
            tokens.push((characteristic, token));
        }

        let status = target
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::Notify,
            )?
            .await?;
        if status != GattCommunicationStatus::Success {
            return Err(LinkError::Gatt(format!(
                "subscribe to {:?} returned {:?}",
                characteristic, status
            )));
        }
        info!("Notifications enabled on {:?}", characteristic);
        Ok(())
    }

    async fn disconnect(&self) {
        let tokens = self
            .notify_tokens
            .lock()
            .map(|mut tokens| std::mem::take(&mut *tokens))
            .unwrap_or_default();
        for (characteristic, token) in tokens {
            if let Some(target) = self.characteristics.get(&characteristic) {
                let _ = target.RemoveValueChanged(token);
            }
        }
        let _ = self.device.RemoveConnectionStatusChanged(self.status_token);
        if let Some(session) = &self.session {
            let _ = session.Close();
        }
        let _ = self.device.Close();
        info!("Closed BLE device");
    }
}
