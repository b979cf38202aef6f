//! Command Channel
//!
//! Serializes framed commands onto the control characteristic. At most one
//! ordinary write is in flight; a command issued while the link is busy is
//! dropped rather than queued so stale motion never replays once the link
//! catches up. Priority commands (brakes) bypass the gate.

use super::error::TransmitError;
use super::link::{Characteristic, RobotLink};
use super::protocol::Command;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{trace, warn};

/// Gate decision for one send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Send,
    Drop,
}

/// Whether a command may go out given the current in-flight state
pub fn admit(busy: bool, priority: bool) -> Admission {
    if busy && !priority {
        Admission::Drop
    } else {
        Admission::Send
    }
}

/// Result of a non-blocking send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the link with this sequence number
    Dispatched { sequence: u8 },
    /// Link busy, command discarded
    Dropped,
    /// Channel invalidated by a disconnect
    Closed,
    /// Session not in the Ready state
    NotReady,
}

impl SendOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, Self::Dispatched { .. })
    }
}

#[derive(Clone)]
pub struct CommandChannel {
    inner: Arc<Inner>,
}

struct Inner {
    link: Arc<dyn RobotLink>,
    sop2: u8,
    sequence: AtomicU8,
    in_flight: watch::Sender<usize>,
    closed: AtomicBool,
}

impl Inner {
    async fn write_frame(&self, frame: &[u8]) -> Result<(), TransmitError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransmitError::Closed);
        }
        trace!("TX {:02X?}", frame);
        self.link.write(Characteristic::Control, frame).await?;
        Ok(())
    }
}

/// Marks one write as in flight until dropped, including on panic
struct InFlight(Arc<Inner>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl CommandChannel {
    pub fn new(link: Arc<dyn RobotLink>, sop2: u8) -> Self {
        let (in_flight, _) = watch::channel(0usize);
        Self {
            inner: Arc::new(Inner {
                link,
                sop2,
                sequence: AtomicU8::new(0),
                in_flight,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Send a command without waiting for the write to finish
    pub fn send(&self, command: Command, priority: bool) -> SendOutcome {
        if self.is_closed() {
            return SendOutcome::Closed;
        }

        let Some(guard) = self.acquire(priority) else {
            trace!("Link busy, dropping {:?}", command);
            return SendOutcome::Dropped;
        };

        let sequence = self.next_sequence();
        let frame = match command.encode(self.inner.sop2, sequence) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode {:?}: {}", command, e);
                return SendOutcome::Dropped;
            }
        };

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = inner.write_frame(&frame).await {
                warn!("Failed to send {:?}: {}", command, e);
            }
        });

        SendOutcome::Dispatched { sequence }
    }

    /// Send a command and wait for the write; used where ordering matters
    pub async fn transmit(&self, command: Command) -> Result<u8, TransmitError> {
        if self.is_closed() {
            return Err(TransmitError::Closed);
        }
        let _guard = self.acquire(true).ok_or(TransmitError::Closed)?;
        let sequence = self.next_sequence();
        let frame = command.encode(self.inner.sop2, sequence)?;
        self.inner.write_frame(&frame).await?;
        Ok(sequence)
    }

    /// Wait until no write is in flight
    pub async fn idle(&self) {
        let mut rx = self.inner.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn is_busy(&self) -> bool {
        *self.inner.in_flight.borrow() > 0
    }

    /// Invalidate the channel; every later send is a no-op
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn acquire(&self, priority: bool) -> Option<InFlight> {
        let mut admitted = false;
        self.inner.in_flight.send_if_modified(|n| {
            admitted = admit(*n > 0, priority) == Admission::Send;
            if admitted {
                *n += 1;
            }
            admitted
        });
        admitted.then(|| InFlight(self.inner.clone()))
    }

    fn next_sequence(&self) -> u8 {
        // fetch_add wraps at 256
        self.inner.sequence.fetch_add(1, Ordering::Relaxed)
    }
}
