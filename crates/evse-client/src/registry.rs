//! Host-side entity registry seam.
//!
//! The client publishes edge-triggered state changes and link connectivity to
//! whatever the host uses to present entities.

use evse_at_protocol::{EntityId, Value};

/// A decoded value differs from the previously known one.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChanged {
    pub id: EntityId,
    pub key: String,
    pub value: Value,
}

/// Receiver of client notifications.
pub trait EntityRegistry {
    /// Called once per actual change of an entity's value.
    fn state_changed(&mut self, change: &StateChanged);

    /// Called when the link is declared lost or comes back.
    fn connectivity_changed(&mut self, _connected: bool) {}
}

/// Discards all notifications.
impl EntityRegistry for () {
    fn state_changed(&mut self, _change: &StateChanged) {}
}

/// Records every change in order.
impl EntityRegistry for Vec<StateChanged> {
    fn state_changed(&mut self, change: &StateChanged) {
        self.push(change.clone());
    }
}

impl<R: EntityRegistry + ?Sized> EntityRegistry for Box<R> {
    fn state_changed(&mut self, change: &StateChanged) {
        (**self).state_changed(change)
    }

    fn connectivity_changed(&mut self, connected: bool) {
        (**self).connectivity_changed(connected)
    }
}
