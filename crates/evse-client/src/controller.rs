//! The EVSE controller client.
//!
//! [`EvseController`] owns the transport and every piece of client state and
//! is driven by [`tick`](EvseController::tick) from the host's control loop.
//! One tick:
//!
//! 1. processes at most one incoming line,
//! 2. expires a timed-out request,
//! 3. runs the liveness check and flushes subscription changes,
//! 4. queues polls for entities that are due,
//! 5. sends at most one command.
//!
//! Nothing blocks; all I/O goes through the non-blocking [`Transport`].

use std::time::Instant;

use evse_at_protocol::{Catalog, Command, EntityId, Value};
use tracing::{debug, info, trace, warn};

use crate::config::{ClientConfig, Timing};
use crate::dispatcher::{CommandDispatcher, PendingRequest};
use crate::error::{ClientError, ClientResult};
use crate::metrics::{self, ClientStats};
use crate::parser::{Inbound, ResponseParser};
use crate::registry::EntityRegistry;
use crate::scheduler::PollingScheduler;
use crate::subscription::{SubscriptionManager, SubscriptionState};
use crate::transport::Transport;

/// Entity used by the fast power preset.
pub const FAST_POWER_ENTITY: &str = "emeter_power";
/// Push period of the fast power preset.
pub const FAST_POWER_PERIOD_MS: u32 = 500;

/// Cooperative AT client for one EVSE controller.
pub struct EvseController<T, R> {
    catalog: Catalog,
    transport: T,
    registry: R,
    parser: ResponseParser,
    subscriptions: SubscriptionManager,
    dispatcher: CommandDispatcher,
    scheduler: PollingScheduler,
    timing: Timing,
    /// Time of the last received line; armed on the first tick.
    last_rx: Option<Instant>,
    link_up: bool,
    stats: ClientStats,
}

impl<T: Transport, R: EntityRegistry> EvseController<T, R> {
    /// Create a controller with every catalog entity enabled.
    pub fn new(catalog: Catalog, transport: T, registry: R, timing: Timing) -> Self {
        let enabled = vec![true; catalog.len()];
        Self::with_enabled(catalog, transport, registry, timing, enabled)
    }

    /// Create a controller with only the entities flagged in `enabled`
    /// (indexed by entity id).
    pub fn with_enabled(
        catalog: Catalog,
        transport: T,
        registry: R,
        timing: Timing,
        mut enabled: Vec<bool>,
    ) -> Self {
        let len = catalog.len();
        enabled.resize(len, false);
        EvseController {
            catalog,
            transport,
            registry,
            parser: ResponseParser::new(enabled),
            subscriptions: SubscriptionManager::new(len),
            dispatcher: CommandDispatcher::new(timing.response_timeout),
            scheduler: PollingScheduler::new(len, timing.update_interval),
            timing,
            last_rx: None,
            link_up: true,
            stats: ClientStats::default(),
        }
    }

    /// Build a controller from a validated configuration and request its
    /// startup subscriptions.
    pub fn from_config(config: &ClientConfig, transport: T, registry: R) -> ClientResult<Self> {
        let catalog = config.build_catalog()?;
        config.validate(&catalog)?;
        let timing = config.timing()?;
        let enabled = config.enabled_mask(&catalog)?;

        let mut controller = Self::with_enabled(catalog, transport, registry, timing, enabled);
        for (key, &period_ms) in &config.subscriptions {
            controller.subscribe(key, period_ms)?;
        }
        Ok(controller)
    }

    // ========================================================================
    // Control loop
    // ========================================================================

    /// Advance the client by one step.
    ///
    /// A transport failure is returned after the rest of the tick ran; the
    /// client recovers on its own through the liveness resync.
    pub fn tick(&mut self, now: Instant) -> ClientResult<()> {
        let mut result = Ok(());
        if self.last_rx.is_none() {
            self.last_rx = Some(now);
        }

        match self.transport.poll_incoming() {
            Ok(Some(line)) => self.handle_line(now, &line),
            Ok(None) => {}
            Err(e) => {
                warn!("Read from controller failed: {}", e);
                self.stats.transport_error(1);
                result = Err(ClientError::from(e));
            }
        }

        if let Some(dropped) = self.dispatcher.check_timeout(now) {
            self.on_timeout(dropped);
        }

        self.check_liveness(now);
        for command in self.subscriptions.flush(&self.catalog) {
            self.dispatcher.enqueue(command, None);
        }

        self.enqueue_due_polls(now);

        match self.dispatcher.dispatch(now, &mut self.transport) {
            Ok(Some(_)) => self.stats.command_sent(1),
            Ok(None) => {}
            Err(e) => {
                self.stats.transport_error(1);
                if result.is_ok() {
                    result = Err(ClientError::from(e));
                }
            }
        }

        metrics::set_queue_depth(self.dispatcher.queue_len());
        result
    }

    fn handle_line(&mut self, now: Instant, line: &str) {
        trace!("Received: {}", line);
        self.stats.line_received(1);
        self.mark_alive(now);

        match self.parser.handle_line(&self.catalog, line, &mut self.registry) {
            Ok(Inbound::Ack(ok)) => self.on_ack(ok),
            Ok(Inbound::Data { mnemonic, changed, failed, .. }) => {
                self.dispatcher.note_data(&mnemonic);
                self.stats.state_changed(changed as u64);
                self.stats.decode_error(failed as u64);
            }
            Ok(Inbound::Ignored) => {}
            Err(e) => {
                warn!("Dropping line {:?}: {}", line, e);
                self.stats.decode_error(1);
            }
        }
    }

    fn on_ack(&mut self, ok: bool) {
        match self.dispatcher.complete() {
            None => debug!("{} with no request in flight", if ok { "OK" } else { "ERROR" }),
            Some(request) if ok => {
                trace!("'{}' acknowledged", request.text);
                self.stats.command_acked(1);
            }
            Some(request) => {
                warn!("Controller rejected '{}'", request.text);
                self.stats.command_rejected(1);
                self.rollback(&request);
            }
        }
    }

    fn on_timeout(&mut self, request: PendingRequest) {
        if request.awaiting_response {
            warn!("Command '{}' timed out", request.text);
        } else {
            warn!("Command '{}' timed out waiting for OK", request.text);
        }
        self.stats.command_timed_out(1);
        self.rollback(&request);
    }

    /// Re-read an entity after a failed write so its state converges.
    fn rollback(&mut self, request: &PendingRequest) {
        let Some(id) = request.entity.filter(|_| request.is_write()) else {
            return;
        };
        if let Ok(query) = self.catalog.query_command(id) {
            debug!("Re-reading {} after failed write", self.catalog.get(id).key);
            self.dispatcher.enqueue(query, Some(id));
        }
    }

    fn mark_alive(&mut self, now: Instant) {
        self.last_rx = Some(now);
        if !self.link_up {
            info!("Controller link restored");
            self.link_up = true;
            metrics::set_link_up(true);
            self.registry.connectivity_changed(true);
        }
        self.dispatcher.resume();
    }

    fn check_liveness(&mut self, now: Instant) {
        let Some(last_rx) = self.last_rx else {
            return;
        };
        if now.saturating_duration_since(last_rx) < self.timing.liveness_timeout {
            return;
        }

        if self.link_up {
            warn!(
                "No traffic from controller for {:?}, assuming link reset",
                self.timing.liveness_timeout
            );
            self.link_up = false;
            metrics::set_link_up(false);
            self.registry.connectivity_changed(false);
        }

        self.stats.resync(1);
        self.last_rx = Some(now);
        self.dispatcher.resume();

        let commands = self.subscriptions.resync(&self.catalog);
        if !commands.is_empty() {
            info!("Re-issuing {} subscription(s)", commands.len());
        }
        self.dispatcher
            .enqueue_front(commands.into_iter().map(|c| (c, None)).collect());
    }

    fn enqueue_due_polls(&mut self, now: Instant) {
        let candidates: Vec<EntityId> = self
            .catalog
            .iter()
            .filter(|(id, descriptor)| {
                descriptor.direction.is_queryable()
                    && self.parser.is_enabled(*id)
                    && !self.subscriptions.is_covered(&self.catalog, *id)
            })
            .map(|(id, _)| id)
            .collect();

        for id in self.scheduler.take_due(now, candidates) {
            if let Ok(query) = self.catalog.query_command(id) {
                self.dispatcher.enqueue(query, Some(id));
            }
        }
    }

    // ========================================================================
    // Host requests
    // ========================================================================

    fn enabled_id(&self, key: &str) -> ClientResult<EntityId> {
        let id = self.catalog.id_of(key)?;
        if !self.parser.is_enabled(id) {
            return Err(ClientError::Disabled(key.to_string()));
        }
        Ok(id)
    }

    /// Queue a write. Takes effect on a later tick.
    pub fn request_set(&mut self, key: &str, value: impl Into<Value>) -> ClientResult<()> {
        self.enabled_id(key)?;
        let value = value.into();
        debug!("Set {} = {}", key, value);
        self.dispatcher.enqueue_set(&self.catalog, key, &value)?;
        Ok(())
    }

    /// Queue a one-shot read.
    pub fn request_query(&mut self, key: &str) -> ClientResult<()> {
        self.enabled_id(key)?;
        self.dispatcher.enqueue_query(&self.catalog, key)?;
        Ok(())
    }

    /// Trigger an action entity (`reset`, `authorize`).
    pub fn press(&mut self, key: &str) -> ClientResult<()> {
        let id = self.enabled_id(key)?;
        let command = self.catalog.action_command(id)?;
        debug!("Press {}", key);
        self.dispatcher.enqueue(command, Some(id));
        Ok(())
    }

    /// Ask the controller to push `key` every `period_ms` (0 unsubscribes).
    pub fn subscribe(&mut self, key: &str, period_ms: u32) -> ClientResult<()> {
        let id = self.enabled_id(key)?;
        if !self.catalog.get(id).direction.is_queryable() {
            return Err(ClientError::NotQueryable { key: key.to_string() });
        }
        self.subscriptions.subscribe(&self.catalog, id, period_ms);
        Ok(())
    }

    /// Stop pushes for `key`. Entities polled again from their next due time.
    pub fn unsubscribe(&mut self, key: &str) -> ClientResult<()> {
        let id = self.enabled_id(key)?;
        self.subscriptions.unsubscribe(&self.catalog, id);
        Ok(())
    }

    /// Cancel every subscription on the next tick.
    pub fn unsubscribe_all(&mut self) {
        self.subscriptions.unsubscribe_all(&self.catalog);
    }

    /// Subscribe to fast power readings.
    pub fn subscribe_fast_power(&mut self) -> ClientResult<()> {
        self.subscribe(FAST_POWER_ENTITY, FAST_POWER_PERIOD_MS)
    }

    pub fn unsubscribe_fast_power(&mut self) -> ClientResult<()> {
        self.unsubscribe(FAST_POWER_ENTITY)
    }

    /// Queue a raw command line.
    pub fn send_raw(&mut self, command: &str) {
        self.dispatcher.enqueue(Command::Raw { command: command.to_string() }, None);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Last known value of an entity.
    pub fn value(&self, key: &str) -> Option<&Value> {
        let id = self.catalog.id_of(key).ok()?;
        self.parser.value(id)
    }

    pub fn subscription(&self, key: &str) -> Option<SubscriptionState> {
        let id = self.catalog.id_of(key).ok()?;
        Some(self.subscriptions.state(id))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn stats(&self) -> ClientStats {
        self.stats
    }

    /// Whether the controller answered within the liveness window.
    pub fn is_connected(&self) -> bool {
        self.link_up
    }

    /// Nothing queued, in flight or waiting in the subscription outbox.
    pub fn is_idle(&self) -> bool {
        self.dispatcher.is_idle() && !self.subscriptions.has_pending()
    }

    /// The request currently in flight.
    pub fn pending(&self) -> Option<&PendingRequest> {
        self.dispatcher.pending()
    }

    /// Queued command texts, head first.
    pub fn queued(&self) -> Vec<String> {
        self.dispatcher.queued().map(str::to_string).collect()
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut R {
        &mut self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
