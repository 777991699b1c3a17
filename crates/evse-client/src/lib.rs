//! ESP32 EVSE client
//!
//! A single-threaded, poll-driven client that keeps a typed view of an EVSE
//! charging controller reached over a serial AT-command link.
//!
//! # Components
//!
//! - [`Transport`]: non-blocking line I/O ([`SerialTransport`], [`MemoryTransport`])
//! - [`ResponseParser`]: decodes lines and owns the entity state table
//! - [`SubscriptionManager`]: controller-side push subscriptions
//! - [`CommandDispatcher`]: FIFO with at most one request in flight
//! - [`PollingScheduler`]: periodic refresh of entities without pushes
//! - [`EvseController`]: owns all of the above and exposes `tick()`
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Instant;
//! use evse_client::{ClientConfig, EvseController, MemoryTransport, StateChanged};
//!
//! let config = ClientConfig::from_yaml_str("update_interval_ms: 30000")?;
//! let registry = Vec::<StateChanged>::new();
//! let mut evse = EvseController::from_config(&config, MemoryTransport::new(), registry)?;
//!
//! evse.request_set("charging_current", 16.0)?;
//! loop {
//!     evse.tick(Instant::now())?;
//! }
//! ```

mod config;
mod controller;
mod dispatcher;
mod error;
mod metrics;
mod parser;
mod registry;
mod scheduler;
mod subscription;
mod transport;

pub use config::*;
pub use controller::*;
pub use dispatcher::*;
pub use error::*;
pub use self::metrics::{describe_metrics, metric_defs, ClientStats, Metric, MetricKind};
pub use parser::*;
pub use registry::*;
pub use scheduler::*;
pub use subscription::*;
pub use transport::*;

pub use evse_at_protocol as protocol;
