//! Cancellable location stream.
//!
//! The platform side pushes fixes, compass readings and errors into a
//! [`LocationFeed`]; the session side pulls them from the paired
//! [`LocationSubscription`]. Stopping is synchronous: once
//! [`LocationSubscription::stop`] or [`StopHandle::stop`] returns, no
//! further event is delivered, including events already queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::fusion::{compass_heading_from_alpha, RawSample};

/// Why the location provider failed to deliver a fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationErrorKind {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
}

impl LocationErrorKind {
    /// Map a W3C geolocation error code (1, 2, 3).
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(Self::PermissionDenied),
            2 => Some(Self::PositionUnavailable),
            3 => Some(Self::Timeout),
            _ => None,
        }
    }

    /// Whether the driver has to be told about this error.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::Timeout)
    }
}

/// One event from the location provider.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    Sample(RawSample),
    /// Compass heading in degrees, 0 = north, clockwise
    Orientation(f64),
    Error(LocationErrorKind),
}

/// Channel payload. `Wake` unblocks a pending `next()` after a stop.
#[derive(Debug)]
enum Envelope {
    Event(LocationEvent),
    Wake,
}

/// Producer half, held by the platform location provider.
#[derive(Debug, Clone)]
pub struct LocationFeed {
    tx: mpsc::UnboundedSender<Envelope>,
    stopped: Arc<AtomicBool>,
}

impl LocationFeed {
    /// Push an event. Returns `false` once the subscription is stopped.
    pub fn send(&self, event: LocationEvent) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(Envelope::Event(event)).is_ok()
    }

    /// Push a raw device-orientation `alpha` reading as a compass heading.
    pub fn send_device_orientation(&self, alpha: f64, counter_clockwise: bool) -> bool {
        self.send(LocationEvent::Orientation(compass_heading_from_alpha(
            alpha,
            counter_clockwise,
        )))
    }

    /// Push a W3C geolocation error code. Unknown codes count as an
    /// unavailable position.
    pub fn send_error_code(&self, code: u16) -> bool {
        let kind = LocationErrorKind::from_code(code).unwrap_or_else(|| {
            warn!("[LocationFeed] Unknown location error code {}", code);
            LocationErrorKind::PositionUnavailable
        });
        self.send(LocationEvent::Error(kind))
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

/// Stops a subscription that is owned elsewhere (e.g. by a running loop).
#[derive(Debug, Clone)]
pub struct StopHandle {
    wake: mpsc::WeakUnboundedSender<Envelope>,
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    /// Stop the subscription. No event is delivered after this returns.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(tx) = self.wake.upgrade() {
            let _ = tx.send(Envelope::Wake);
        }
        debug!("[LocationSubscription] Stop requested");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Consumer half, owned by whoever drives the session.
#[derive(Debug)]
pub struct LocationSubscription {
    rx: mpsc::UnboundedReceiver<Envelope>,
    wake: mpsc::WeakUnboundedSender<Envelope>,
    stopped: Arc<AtomicBool>,
}

impl LocationSubscription {
    /// Create a connected feed/subscription pair.
    pub fn channel() -> (LocationFeed, LocationSubscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stopped = Arc::new(AtomicBool::new(false));
        let subscription = LocationSubscription {
            rx,
            wake: tx.downgrade(),
            stopped: Arc::clone(&stopped),
        };
        (LocationFeed { tx, stopped }, subscription)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            wake: self.wake.clone(),
            stopped: Arc::clone(&self.stopped),
        }
    }

    /// Next event in arrival order, or `None` once stopped or disconnected.
    pub async fn next(&mut self) -> Option<LocationEvent> {
        loop {
            if self.is_stopped() {
                return None;
            }
            match self.rx.recv().await? {
                Envelope::Event(event) if !self.is_stopped() => return Some(event),
                _ => continue,
            }
        }
    }

    /// Unregister from the provider and discard queued events.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        self.rx.close();
        let mut dropped = 0usize;
        while let Ok(envelope) = self.rx.try_recv() {
            if matches!(envelope, Envelope::Event(_)) {
                dropped += 1;
            }
        }
        debug!("[LocationSubscription] Stopped, {} queued events dropped", dropped);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Drop for LocationSubscription {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Release);
    }
}
