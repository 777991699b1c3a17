//! ESP32 EVSE AT Protocol
//!
//! This crate provides types and utilities for talking to an ESP32 EVSE
//! charging controller over its UART AT command interface.
//!
//! # Protocol Overview
//!
//! The protocol is a line-based ASCII interface:
//!
//! - **Commands** (host → controller): `AT+<MNEMONIC>[=<value>]` or
//!   `AT+<MNEMONIC>?`, terminated with `\r\n`
//! - **Responses** (controller → host): `+<MNEMONIC>=<value>` data lines,
//!   followed by `OK` or `ERROR`
//! - **Pushes**: subscribed mnemonics are pushed periodically with the same
//!   `+<MNEMONIC>=<value>` form; a bare `+<MNEMONIC>` means boolean true
//!
//! Numeric values travel as scaled integers. The [`Catalog`] knows the scale of
//! every entity and converts between wire and engineering units.
//!
//! # Example
//!
//! ```rust,ignore
//! use evse_at_protocol::{Catalog, Response, Value};
//!
//! let catalog = Catalog::evse();
//! let line = catalog.format_set("charging_current", &Value::Float(16.0))?;
//! assert_eq!(line, "AT+CHCUR=160");
//!
//! if let Response::Data { mnemonic, payload } = Response::parse("+CHCUR=65") {
//!     for id in catalog.entities_for(&mnemonic) {
//!         let value = catalog.get(*id).decode(payload.as_deref())?;
//!     }
//! }
//! ```

mod catalog;
mod codec;
mod commands;
mod error;
mod responses;
mod value;

pub use catalog::*;
pub use codec::*;
pub use commands::*;
pub use error::*;
pub use responses::*;
pub use value::*;
