//! Subscription manager.
//!
//! Tracks per entity whether the controller should push its value, and turns
//! changes into `AT+SUB`/`AT+UNSUB` commands. Entities sharing a mnemonic share
//! one controller-side subscription. Requests are collected in an outbox and
//! only become commands when [`flush`](SubscriptionManager::flush) runs on the
//! next tick, so a subscribe cancelled before that costs nothing on the wire.

use std::collections::HashMap;

use evse_at_protocol::{Catalog, Command, EntityId};
use tracing::debug;

/// Subscription state of one entity. `period_ms == 0` means unsubscribed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionState {
    pub period_ms: u32,
    /// The subscribe command for this entity has been handed to the dispatcher.
    pub active: bool,
}

impl SubscriptionState {
    pub fn is_subscribed(&self) -> bool {
        self.period_ms > 0
    }
}

/// Owns every entity's [`SubscriptionState`].
#[derive(Debug)]
pub struct SubscriptionManager {
    states: Vec<SubscriptionState>,
    /// Period last sent to the controller, per mnemonic.
    remote: HashMap<String, u32>,
    /// Mnemonics whose desired state changed since the last flush, in request order.
    outbox: Vec<String>,
}

impl SubscriptionManager {
    /// Create a manager for `len` entities, all unsubscribed.
    pub fn new(len: usize) -> Self {
        SubscriptionManager {
            states: vec![SubscriptionState::default(); len],
            remote: HashMap::new(),
            outbox: Vec::new(),
        }
    }

    pub fn state(&self, id: EntityId) -> SubscriptionState {
        self.states.get(id.0).copied().unwrap_or_default()
    }

    pub fn is_subscribed(&self, id: EntityId) -> bool {
        self.state(id).is_subscribed()
    }

    /// Whether pushes for this entity's mnemonic are requested by it or a sibling.
    pub fn is_covered(&self, catalog: &Catalog, id: EntityId) -> bool {
        catalog
            .entities_for(&catalog.get(id).command)
            .iter()
            .any(|&sibling| self.is_subscribed(sibling))
    }

    /// Entities currently subscribed, in ascending key order.
    pub fn subscribed(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_subscribed())
            .map(|(i, _)| EntityId(i))
    }

    /// Whether subscription commands are waiting for the next flush.
    pub fn has_pending(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Request pushes every `period_ms`. A period of zero unsubscribes.
    pub fn subscribe(&mut self, catalog: &Catalog, id: EntityId, period_ms: u32) {
        if period_ms == 0 {
            self.unsubscribe(catalog, id);
            return;
        }
        self.states[id.0].period_ms = period_ms;
        self.touch(&catalog.get(id).command);
    }

    /// Cancel pushes for an entity. Siblings keep the shared subscription alive.
    pub fn unsubscribe(&mut self, catalog: &Catalog, id: EntityId) {
        self.states[id.0] = SubscriptionState::default();
        self.touch(&catalog.get(id).command);
    }

    /// Cancel every subscription. One `AT+UNSUB` per mnemonic currently
    /// subscribed on the controller, in ascending key order.
    pub fn unsubscribe_all(&mut self, catalog: &Catalog) {
        self.outbox.clear();
        for (id, descriptor) in catalog.iter() {
            self.states[id.0] = SubscriptionState::default();
            if !self.outbox.contains(&descriptor.command) {
                self.outbox.push(descriptor.command.clone());
            }
        }
    }

    /// Convert the outbox into commands and mark them as handed over.
    pub fn flush(&mut self, catalog: &Catalog) -> Vec<Command> {
        let outbox = std::mem::take(&mut self.outbox);
        let mut commands = Vec::with_capacity(outbox.len());

        for mnemonic in outbox {
            let desired = self.desired_period(catalog, &mnemonic);
            let remote = self.remote.get(&mnemonic).copied();
            let command = match (desired, remote) {
                (Some(period_ms), Some(current)) if period_ms == current => continue,
                (Some(period_ms), _) => {
                    self.remote.insert(mnemonic.clone(), period_ms);
                    Command::Subscribe { mnemonic: mnemonic.clone(), period_ms }
                }
                (None, Some(_)) => {
                    self.remote.remove(&mnemonic);
                    Command::Unsubscribe { mnemonic: mnemonic.clone() }
                }
                (None, None) => continue,
            };
            self.set_active(catalog, &mnemonic, desired.is_some());
            debug!("Subscription change: {}", command);
            commands.push(command);
        }

        commands
    }

    /// Re-issue the subscribe command of every subscribed entity, in ascending
    /// key order, one per mnemonic. Used after the link was reset.
    pub fn resync(&mut self, catalog: &Catalog) -> Vec<Command> {
        let mut commands: Vec<Command> = Vec::new();

        let ids: Vec<EntityId> = self.subscribed().collect();
        for id in ids {
            let mnemonic = &catalog.get(id).command;
            if commands.iter().any(|c| c.mnemonic() == Some(mnemonic.as_str())) {
                continue;
            }
            let Some(period_ms) = self.desired_period(catalog, mnemonic) else {
                continue;
            };
            self.outbox.retain(|m| m != mnemonic);
            self.remote.insert(mnemonic.clone(), period_ms);
            self.set_active(catalog, mnemonic, true);
            commands.push(Command::Subscribe { mnemonic: mnemonic.clone(), period_ms });
        }

        commands
    }

    fn touch(&mut self, mnemonic: &str) {
        self.outbox.retain(|m| m != mnemonic);
        self.outbox.push(mnemonic.to_string());
    }

    /// Fastest period requested by any entity fed by `mnemonic`.
    fn desired_period(&self, catalog: &Catalog, mnemonic: &str) -> Option<u32> {
        catalog
            .entities_for(mnemonic)
            .iter()
            .map(|&id| self.states[id.0].period_ms)
            .filter(|&p| p > 0)
            .min()
    }

    fn set_active(&mut self, catalog: &Catalog, mnemonic: &str, active: bool) {
        for &id in catalog.entities_for(mnemonic) {
            let state = &mut self.states[id.0];
            state.active = active && state.is_subscribed();
        }
    }
}
