//! Metrics for the EVSE client.
//!
//! Every metric is declared once as a [`Metric`] constant in [`metric_defs`].
//! Counters are emitted through the `metrics` facade (no-ops until the host
//! installs a recorder) and mirrored in [`ClientStats`] so the host can read
//! them without one.
//!
//! # Example
//!
//! ```rust,ignore
//! use evse_client::{describe_metrics, metric_defs};
//!
//! // Register descriptions once at startup
//! describe_metrics();
//!
//! metrics::counter!(metric_defs::COMMANDS_SENT.name).increment(1);
//! ```

use ::metrics::{counter, describe_counter, describe_gauge, gauge, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
}

/// A metric declaration with its metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "evse.commands.sent").
    pub name: &'static str,
    pub kind: MetricKind,
    /// Human-readable description of the metric.
    pub description: &'static str,
    pub unit: Unit,
}

impl Metric {
    /// Creates a new counter metric with the given name.
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description: "",
            unit: Unit::Count,
        }
    }

    /// Creates a new gauge metric with the given name.
    pub const fn gauge(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            description: "",
            unit: Unit::Count,
        }
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Register the metric description with the installed recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => describe_counter!(self.name, self.unit, self.description),
            MetricKind::Gauge => describe_gauge!(self.name, self.unit, self.description),
        }
    }
}

pub mod metric_defs {
    use super::Metric;

    // ========================================================================
    // Commands
    // ========================================================================

    pub const COMMANDS_SENT: Metric = Metric::counter("evse.commands.sent")
        .with_description("Commands written to the link");

    pub const COMMANDS_ACKED: Metric = Metric::counter("evse.commands.acked")
        .with_description("Commands answered with OK");

    pub const COMMANDS_REJECTED: Metric = Metric::counter("evse.commands.rejected")
        .with_description("Commands answered with ERROR");

    pub const COMMANDS_TIMEOUT: Metric = Metric::counter("evse.commands.timeout")
        .with_description("Commands dropped after the response timeout");

    pub const QUEUE_DEPTH: Metric = Metric::gauge("evse.commands.queued")
        .with_description("Commands waiting in the dispatcher queue");

    // ========================================================================
    // Inbound
    // ========================================================================

    pub const LINES_RECEIVED: Metric = Metric::counter("evse.lines.received")
        .with_description("Lines received from the controller");

    pub const DECODE_ERRORS: Metric = Metric::counter("evse.lines.decode_errors")
        .with_description("Lines or fields dropped because they failed to decode");

    pub const STATE_CHANGES: Metric = Metric::counter("evse.state.changes")
        .with_description("Entity value changes published to the registry");

    // ========================================================================
    // Link
    // ========================================================================

    pub const RESYNCS: Metric = Metric::counter("evse.link.resyncs")
        .with_description("Liveness timeouts that triggered a subscription resync");

    pub const LINK_UP: Metric = Metric::gauge("evse.link.up")
        .with_description("1 while the controller is considered reachable");

    pub const TRANSPORT_ERRORS: Metric = Metric::counter("evse.transport.errors")
        .with_description("Failed reads or writes on the link");

    /// Every metric declared by this crate.
    pub const ALL: &[Metric] = &[
        COMMANDS_SENT,
        COMMANDS_ACKED,
        COMMANDS_REJECTED,
        COMMANDS_TIMEOUT,
        QUEUE_DEPTH,
        LINES_RECEIVED,
        DECODE_ERRORS,
        STATE_CHANGES,
        RESYNCS,
        LINK_UP,
        TRANSPORT_ERRORS,
    ];
}

/// Register descriptions for every client metric.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

/// Plain counters kept by the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub commands_sent: u64,
    pub commands_acked: u64,
    pub commands_rejected: u64,
    pub commands_timed_out: u64,
    pub lines_received: u64,
    pub decode_errors: u64,
    pub state_changes: u64,
    pub resyncs: u64,
    pub transport_errors: u64,
}

macro_rules! record {
    ($fn_name:ident, $field:ident, $metric:ident) => {
        pub(crate) fn $fn_name(&mut self, n: u64) {
            self.$field += n;
            counter!(metric_defs::$metric.name).increment(n);
        }
    };
}

impl ClientStats {
    record!(command_sent, commands_sent, COMMANDS_SENT);
    record!(command_acked, commands_acked, COMMANDS_ACKED);
    record!(command_rejected, commands_rejected, COMMANDS_REJECTED);
    record!(command_timed_out, commands_timed_out, COMMANDS_TIMEOUT);
    record!(line_received, lines_received, LINES_RECEIVED);
    record!(decode_error, decode_errors, DECODE_ERRORS);
    record!(state_changed, state_changes, STATE_CHANGES);
    record!(resync, resyncs, RESYNCS);
    record!(transport_error, transport_errors, TRANSPORT_ERRORS);
}

pub(crate) fn set_queue_depth(depth: usize) {
    gauge!(metric_defs::QUEUE_DEPTH.name).set(depth as f64);
}

pub(crate) fn set_link_up(up: bool) {
    gauge!(metric_defs::LINK_UP.name).set(if up { 1.0 } else { 0.0 });
}
