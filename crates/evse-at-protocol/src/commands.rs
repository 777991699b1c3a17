//! Commands that can be sent to the EVSE controller.
//!
//! Every command is an `AT+` line:
//! - Queries: `AT+CHCUR?`
//! - Writes: `AT+CHCUR=160`
//! - Actions: `AT+RST`
//! - Subscriptions: `AT+SUB="+EMETERPOWER",500` / `AT+UNSUB="+EMETERPOWER"`

use std::fmt;

use crate::codec::LineCodec;

/// Prefix of every outbound command.
pub const COMMAND_PREFIX: &str = "AT+";

/// An outbound AT command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Read the current value.
    Query {
        /// Mnemonic without prefix (`CHCUR`).
        mnemonic: String,
    },

    /// Write an already scaled and rendered value.
    Set {
        mnemonic: String,
        /// Wire representation of the value.
        value: String,
    },

    /// Trigger an action (`AT+RST`).
    Action { mnemonic: String },

    /// Ask the controller to push `+MNEMONIC=...` every `period_ms`.
    Subscribe { mnemonic: String, period_ms: u32 },

    /// Cancel a push subscription.
    Unsubscribe { mnemonic: String },

    /// Send a raw command string.
    Raw {
        /// The raw command text, without terminator.
        command: String,
    },
}

impl Command {
    /// Encode the command as a line to send to the controller.
    /// Returns the bytes to send (including the `\r\n` terminator).
    pub fn encode(&self) -> Vec<u8> {
        LineCodec::encode_command(&self.to_command_string())
    }

    /// Get the command string without the terminator.
    pub fn to_command_string(&self) -> String {
        match self {
            Command::Query { mnemonic } => format!("{}{}?", COMMAND_PREFIX, mnemonic),
            Command::Set { mnemonic, value } => format!("{}{}={}", COMMAND_PREFIX, mnemonic, value),
            Command::Action { mnemonic } => format!("{}{}", COMMAND_PREFIX, mnemonic),
            Command::Subscribe { mnemonic, period_ms } => {
                format!("{}SUB=\"+{}\",{}", COMMAND_PREFIX, mnemonic, period_ms)
            }
            Command::Unsubscribe { mnemonic } => {
                format!("{}UNSUB=\"+{}\"", COMMAND_PREFIX, mnemonic)
            }
            Command::Raw { command } => command.clone(),
        }
    }

    /// Mnemonic this command targets, if any.
    pub fn mnemonic(&self) -> Option<&str> {
        match self {
            Command::Query { mnemonic }
            | Command::Set { mnemonic, .. }
            | Command::Action { mnemonic }
            | Command::Subscribe { mnemonic, .. }
            | Command::Unsubscribe { mnemonic } => Some(mnemonic),
            Command::Raw { .. } => None,
        }
    }

    /// Whether this command writes state on the controller.
    pub fn is_write(&self) -> bool {
        matches!(self, Command::Set { .. })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_command_string())
    }
}
