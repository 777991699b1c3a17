//! Command dispatcher.
//!
//! Serializes every outbound command through one FIFO and keeps at most one
//! request in flight on the half-duplex link. A request is completed by an
//! `OK`/`ERROR` line or dropped when the response timeout expires.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use evse_at_protocol::{Catalog, Command, EntityId, Value};
use tracing::{debug, trace, warn};

use crate::error::{ClientResult, TransportError};
use crate::transport::Transport;

/// A command waiting for its turn on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedCommand {
    pub command: Command,
    /// Entity the command targets, used for write rollback.
    pub entity: Option<EntityId>,
    text: String,
}

impl QueuedCommand {
    pub fn new(command: Command, entity: Option<EntityId>) -> Self {
        let text = command.to_command_string();
        QueuedCommand { command, entity, text }
    }

    /// Wire text without terminator.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// The single outstanding request.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub command: Command,
    pub text: String,
    pub entity: Option<EntityId>,
    pub issued_at: Instant,
    /// No data line for this command's mnemonic has arrived yet.
    pub awaiting_response: bool,
}

impl PendingRequest {
    pub fn is_write(&self) -> bool {
        self.command.is_write()
    }
}

/// FIFO of outbound commands with one-in-flight discipline.
#[derive(Debug)]
pub struct CommandDispatcher {
    queue: VecDeque<QueuedCommand>,
    pending: Option<PendingRequest>,
    response_timeout: Duration,
    paused: bool,
}

impl CommandDispatcher {
    pub fn new(response_timeout: Duration) -> Self {
        CommandDispatcher {
            queue: VecDeque::new(),
            pending: None,
            response_timeout,
            paused: false,
        }
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Queue a write of `value` to `key`.
    pub fn enqueue_set(
        &mut self,
        catalog: &Catalog,
        key: &str,
        value: &Value,
    ) -> ClientResult<bool> {
        let id = catalog.id_of(key)?;
        let command = catalog.set_command(id, value)?;
        Ok(self.enqueue(command, Some(id)))
    }

    /// Queue a one-shot read of `key`.
    pub fn enqueue_query(&mut self, catalog: &Catalog, key: &str) -> ClientResult<bool> {
        let id = catalog.id_of(key)?;
        let command = catalog.query_command(id)?;
        Ok(self.enqueue(command, Some(id)))
    }

    /// Append a command.
    ///
    /// A write replaces any write to the same mnemonic still waiting in the
    /// queue, so the last requested value is the one sent. Other commands are
    /// skipped (returning `false`) if identical text is already queued.
    pub fn enqueue(&mut self, command: Command, entity: Option<EntityId>) -> bool {
        let queued = QueuedCommand::new(command, entity);
        if let Command::Set { mnemonic, .. } = &queued.command {
            let before = self.queue.len();
            self.queue.retain(|q| {
                !matches!(&q.command, Command::Set { mnemonic: m, .. } if m == mnemonic)
            });
            if self.queue.len() != before {
                debug!("Superseding queued write to {}", mnemonic);
            }
            trace!("Queueing command: {}", queued.text);
            self.queue.push_back(queued);
            return true;
        }
        if self.queue.iter().any(|q| q.text == queued.text) {
            trace!("Already queued: {}", queued.text);
            return false;
        }
        trace!("Queueing command: {}", queued.text);
        self.queue.push_back(queued);
        true
    }

    /// Put commands at the head of the queue, keeping their relative order.
    pub fn enqueue_front(&mut self, commands: Vec<(Command, Option<EntityId>)>) {
        for (command, entity) in commands.into_iter().rev() {
            let queued = QueuedCommand::new(command, entity);
            self.queue.retain(|q| q.text != queued.text);
            self.queue.push_front(queued);
        }
    }

    /// Complete the in-flight request with an acknowledgement.
    pub fn complete(&mut self) -> Option<PendingRequest> {
        self.pending.take()
    }

    /// Record that a data line for `mnemonic` arrived.
    pub fn note_data(&mut self, mnemonic: &str) {
        if let Some(pending) = self.pending.as_mut() {
            if pending.command.mnemonic() == Some(mnemonic) {
                pending.awaiting_response = false;
            }
        }
    }

    /// Drop the in-flight request if its response window has passed.
    pub fn check_timeout(&mut self, now: Instant) -> Option<PendingRequest> {
        let expired = self
            .pending
            .as_ref()
            .is_some_and(|p| now.saturating_duration_since(p.issued_at) >= self.response_timeout);
        if expired {
            self.pending.take()
        } else {
            None
        }
    }

    /// Send the next queued command if the link is free.
    ///
    /// Returns the text sent. On a transport error every queued command is
    /// dropped and the dispatcher pauses until [`resume`](Self::resume).
    pub fn dispatch<T: Transport + ?Sized>(
        &mut self,
        now: Instant,
        transport: &mut T,
    ) -> Result<Option<String>, TransportError> {
        if self.paused || self.pending.is_some() {
            return Ok(None);
        }
        let Some(next) = self.queue.pop_front() else {
            return Ok(None);
        };

        if let Err(e) = transport.send(&next.text) {
            warn!(
                "Failed to send '{}': {}; dropping {} queued command(s)",
                next.text,
                e,
                self.queue.len()
            );
            self.queue.clear();
            self.paused = true;
            return Err(e);
        }

        trace!("Sent: {}", next.text);
        self.pending = Some(PendingRequest {
            command: next.command,
            text: next.text.clone(),
            entity: next.entity,
            issued_at: now,
            awaiting_response: true,
        });
        Ok(Some(next.text))
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        if self.paused {
            debug!("Dispatcher resumed with {} queued command(s)", self.queue.len());
        }
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queued command texts, head first.
    pub fn queued(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(QueuedCommand::text)
    }

    /// Nothing queued and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.pending.is_none()
    }
}
