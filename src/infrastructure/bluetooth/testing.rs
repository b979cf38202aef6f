//! In-memory link used by the unit tests

use super::error::{ConnectionError, LinkError};
use super::link::{Characteristic, DeviceInfo, LinkEvent, RobotConnector, RobotLink};
use super::protocol::CommandFrame;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

/// Let spawned write tasks run
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Records every write; can be paused to keep writes in flight
pub(crate) struct MockLink {
    writes: Mutex<Vec<(Characteristic, Vec<u8>)>>,
    subscriptions: Mutex<Vec<Characteristic>>,
    failing: Mutex<HashSet<Characteristic>>,
    fail_subscribe: AtomicBool,
    open: watch::Sender<bool>,
    disconnects: AtomicUsize,
}

impl MockLink {
    pub fn new() -> Arc<Self> {
        let (open, _) = watch::channel(true);
        Arc::new(Self {
            writes: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            fail_subscribe: AtomicBool::new(false),
            open,
            disconnects: AtomicUsize::new(0),
        })
    }

    pub fn pause(&self) {
        self.open.send_replace(false);
    }

    pub fn resume(&self) {
        self.open.send_replace(true);
    }

    pub fn fail_writes_to(&self, characteristic: Characteristic) {
        self.failing.lock().unwrap().insert(characteristic);
    }

    pub fn fail_subscribe(&self) {
        self.fail_subscribe.store(true, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<(Characteristic, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }

    /// Parsed frames written to the control characteristic
    pub fn frames(&self) -> Vec<CommandFrame> {
        self.writes()
            .into_iter()
            .filter(|(c, _)| *c == Characteristic::Control)
            .map(|(_, bytes)| CommandFrame::parse(&bytes).unwrap())
            .collect()
    }

    pub fn clear(&self) {
        self.writes.lock().unwrap().clear();
    }

    pub fn subscriptions(&self) -> Vec<Characteristic> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RobotLink for MockLink {
    async fn write(&self, characteristic: Characteristic, value: &[u8]) -> Result<(), LinkError> {
        self.writes
            .lock()
            .unwrap()
            .push((characteristic, value.to_vec()));

        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;

        if self.failing.lock().unwrap().contains(&characteristic) {
            return Err(LinkError::Gatt("injected failure".to_string()));
        }
        Ok(())
    }

    async fn subscribe(&self, characteristic: Characteristic) -> Result<(), LinkError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(LinkError::Gatt("subscribe refused".to_string()));
        }
        self.subscriptions.lock().unwrap().push(characteristic);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out a shared [`MockLink`] and keeps the event sender for injection
pub(crate) struct MockConnector {
    pub link: Arc<MockLink>,
    events: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
    fail_request: AtomicBool,
    fail_connect: AtomicBool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            link: MockLink::new(),
            events: Mutex::new(None),
            fail_request: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
        }
    }

    pub fn fail_request(&self) {
        self.fail_request.store(true, Ordering::SeqCst);
    }

    pub fn fail_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    /// Push an event as if the backend produced it
    pub fn emit(&self, event: LinkEvent) {
        if let Some(sender) = self.events.lock().unwrap().as_ref() {
            let _ = sender.send(event);
        }
    }
}

#[async_trait]
impl RobotConnector for MockConnector {
    async fn request(&self) -> Result<DeviceInfo, ConnectionError> {
        if self.fail_request.load(Ordering::SeqCst) {
            return Err(ConnectionError::NoDeviceSelected);
        }
        Ok(DeviceInfo {
            name: "2B-MOCK".to_string(),
            address: 0xA1B2_C3D4_E5F6,
        })
    }

    async fn connect(
        &self,
        _device: &DeviceInfo,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn RobotLink>, ConnectionError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ConnectionError::Link(LinkError::Gatt(
                "connection refused".to_string(),
            )));
        }
        *self.events.lock().unwrap() = Some(events);
        let link: Arc<dyn RobotLink> = self.link.clone();
        Ok(link)
    }
}
