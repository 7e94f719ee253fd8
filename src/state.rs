//! Latest known device state and the per-session connection state machine.
//!
//! Everything lives behind `watch` channels: readers observe whole snapshots,
//! never a half-applied one.

use tokio::sync::watch;
use tracing::{debug, info};

use crate::constants::Unit;
use crate::decoding::WeightReading;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceState {
    pub connected: bool,
    pub stable: bool,
    pub unit: Unit,
    /// Signed weight in grams.
    pub weight: f64,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            connected: false,
            stable: false,
            unit: Unit::Gram,
            weight: 0.0,
        }
    }
}

impl From<&WeightReading> for DeviceState {
    fn from(reading: &WeightReading) -> Self {
        Self {
            connected: true,
            stable: reading.stable,
            unit: reading.unit,
            weight: reading.grams(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Notifying,
    Active,
}

impl SessionState {
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (*self, next),
            (SessionState::Disconnected, SessionState::Connected)
                | (SessionState::Connected, SessionState::Notifying)
                | (SessionState::Notifying, SessionState::Active)
                | (_, SessionState::Disconnected)
        )
    }
}

pub struct StateCell {
    device: watch::Sender<DeviceState>,
    session: watch::Sender<SessionState>,
    unit: watch::Sender<Unit>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        let (device, _) = watch::channel(DeviceState::default());
        let (session, _) = watch::channel(SessionState::Disconnected);
        let (unit, _) = watch::channel(Unit::Gram);
        Self {
            device,
            session,
            unit,
        }
    }

    pub fn current(&self) -> DeviceState {
        *self.device.borrow()
    }

    /// Replaces the snapshot as a whole and wakes every waiting reader.
    pub fn publish(&self, state: DeviceState) {
        self.device.send_replace(state);
    }

    /// A receiver positioned at the current snapshot; `changed()` resolves on the next one.
    pub fn subscribe(&self) -> watch::Receiver<DeviceState> {
        self.device.subscribe()
    }

    pub fn session(&self) -> SessionState {
        *self.session.borrow()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    /// Display unit as last confirmed by the scale, either through a weight
    /// report or an acknowledged unit write.
    pub fn unit(&self) -> Unit {
        *self.unit.borrow()
    }

    pub fn set_unit(&self, unit: Unit) {
        self.unit.send_if_modified(|current| {
            if *current == unit {
                return false;
            }
            debug!(from = %current, to = %unit, "display unit changed");
            *current = unit;
            true
        });
    }

    /// Moves the session forward if `next` is reachable from the current state.
    pub fn transition(&self, next: SessionState) -> bool {
        self.session.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                debug!(from = ?current, to = ?next, "ignoring session transition");
                return false;
            }
            info!(from = ?current, to = ?next, "session state changed");
            *current = next;
            true
        })
    }
}
