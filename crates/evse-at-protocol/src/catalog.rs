//! Command catalog: which AT mnemonic backs which entity.
//!
//! Descriptors are stored sorted by key, so an [`EntityId`] order is the
//! ascending key order. Lookups by key and by mnemonic are O(1).

use std::collections::HashMap;
use std::fmt;

use crate::commands::Command;
use crate::error::{DecodeError, ProtocolError, ProtocolResult};
use crate::value::{Value, ValueKind};

/// Index of an entity inside a [`Catalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(pub usize);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which operations an entity supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Read-only (sensors).
    Query,
    /// Write-only.
    Set,
    /// Readable and writable (switches, numbers).
    Both,
    /// Stateless trigger (buttons).
    Action,
}

impl Direction {
    pub fn is_queryable(&self) -> bool {
        matches!(self, Direction::Query | Direction::Both)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Direction::Set | Direction::Both)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Query => "query",
            Direction::Set => "set",
            Direction::Both => "both",
            Direction::Action => "action",
        }
    }
}

/// Static description of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    /// Unique key (`charging_current`).
    pub key: String,
    /// AT mnemonic without prefix (`CHCUR`).
    pub command: String,
    pub direction: Direction,
    pub value_kind: ValueKind,
    /// Multiplier applied when encoding, divisor when decoding.
    pub scale: f64,
    /// Index into a comma-separated payload, if the mnemonic carries several values.
    pub field: Option<usize>,
    /// Field holding a sensor count. A count of zero or less means no reading.
    pub count_field: Option<usize>,
}

impl EntityDescriptor {
    /// Create a read-only descriptor.
    pub fn query(key: &str, command: &str, value_kind: ValueKind) -> Self {
        EntityDescriptor {
            key: key.to_string(),
            command: command.to_string(),
            direction: Direction::Query,
            value_kind,
            scale: 1.0,
            field: None,
            count_field: None,
        }
    }

    /// Create a readable and writable descriptor.
    pub fn read_write(key: &str, command: &str, value_kind: ValueKind) -> Self {
        EntityDescriptor {
            direction: Direction::Both,
            ..Self::query(key, command, value_kind)
        }
    }

    /// Create an action (button) descriptor.
    pub fn action(key: &str, command: &str) -> Self {
        EntityDescriptor {
            direction: Direction::Action,
            ..Self::query(key, command, ValueKind::Boolean)
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_field(mut self, field: usize) -> Self {
        self.field = Some(field);
        self
    }

    pub fn with_count_field(mut self, field: usize) -> Self {
        self.count_field = Some(field);
        self
    }

    /// Topic used by `AT+SUB`/`AT+UNSUB` (`+CHCUR`).
    pub fn topic(&self) -> String {
        format!("+{}", self.command)
    }

    /// Decode the payload of a `+MNEMONIC[=payload]` line for this entity.
    pub fn decode(&self, payload: Option<&str>) -> Result<Value, DecodeError> {
        let Some(payload) = payload else {
            return match self.value_kind {
                ValueKind::Boolean => Ok(Value::Bool(true)),
                _ => Err(DecodeError::MissingPayload(self.command.clone())),
            };
        };

        if let Some(index) = self.count_field {
            let count = self.select(payload, index)?.trim();
            let count: i64 = count
                .parse()
                .map_err(|_| DecodeError::InvalidNumber(count.to_string()))?;
            if count <= 0 {
                return Ok(Value::Unknown);
            }
        }

        let raw = match self.field {
            Some(index) => self.select(payload, index)?,
            None => payload,
        };

        self.value_kind.decode(raw, self.scale, &self.command)
    }

    fn select<'a>(&self, payload: &'a str, index: usize) -> Result<&'a str, DecodeError> {
        payload.split(',').nth(index).ok_or_else(|| DecodeError::MissingField {
            mnemonic: self.command.clone(),
            field: index,
        })
    }

    fn validate(&self) -> ProtocolResult<()> {
        let invalid = |reason: &str| ProtocolError::InvalidDescriptor {
            key: self.key.clone(),
            reason: reason.to_string(),
        };

        if self.key.is_empty() {
            return Err(invalid("empty key"));
        }
        if self.command.is_empty()
            || !self.command.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(invalid("mnemonic must be non-empty ASCII alphanumerics"));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(invalid("scale must be finite and positive"));
        }
        if matches!(self.value_kind, ValueKind::Integer | ValueKind::Enum(_) | ValueKind::Bit(_))
            && self.scale != 1.0
        {
            return Err(invalid("integer kinds cannot be scaled"));
        }
        Ok(())
    }
}

/// Immutable table of entity descriptors with key and mnemonic indexes.
#[derive(Debug, Clone)]
pub struct Catalog {
    entities: Vec<EntityDescriptor>,
    by_key: HashMap<String, EntityId>,
    by_command: HashMap<String, Vec<EntityId>>,
}

impl Catalog {
    /// Build a catalog, validating every descriptor.
    pub fn new(descriptors: Vec<EntityDescriptor>) -> ProtocolResult<Catalog> {
        for descriptor in &descriptors {
            descriptor.validate()?;
        }
        let catalog = Self::build(descriptors);
        if catalog.by_key.len() != catalog.entities.len() {
            let duplicate = catalog
                .entities
                .windows(2)
                .find(|pair| pair[0].key == pair[1].key)
                .map(|pair| pair[0].key.clone())
                .unwrap_or_default();
            return Err(ProtocolError::InvalidDescriptor {
                key: duplicate,
                reason: "duplicate key".to_string(),
            });
        }
        Ok(catalog)
    }

    /// The canonical ESP32 EVSE catalog.
    pub fn evse() -> Catalog {
        Self::build(evse_descriptors())
    }

    fn build(mut entities: Vec<EntityDescriptor>) -> Catalog {
        entities.sort_by(|a, b| a.key.cmp(&b.key));

        let mut by_key = HashMap::with_capacity(entities.len());
        let mut by_command: HashMap<String, Vec<EntityId>> = HashMap::new();
        for (index, descriptor) in entities.iter().enumerate() {
            let id = EntityId(index);
            by_key.insert(descriptor.key.clone(), id);
            by_command.entry(descriptor.command.clone()).or_default().push(id);
        }

        Catalog { entities, by_key, by_command }
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Look up a descriptor by key.
    pub fn lookup(&self, key: &str) -> ProtocolResult<&EntityDescriptor> {
        self.id_of(key).map(|id| &self.entities[id.0])
    }

    /// Resolve a key to its id.
    pub fn id_of(&self, key: &str) -> ProtocolResult<EntityId> {
        self.by_key
            .get(key)
            .copied()
            .ok_or_else(|| ProtocolError::UnknownEntity(key.to_string()))
    }

    /// Descriptor for an id handed out by this catalog.
    pub fn get(&self, id: EntityId) -> &EntityDescriptor {
        &self.entities[id.0]
    }

    /// Entities fed by a mnemonic (empty if unknown).
    pub fn entities_for(&self, command: &str) -> &[EntityId] {
        self.by_command.get(command).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All entities in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &EntityDescriptor)> {
        self.entities.iter().enumerate().map(|(i, d)| (EntityId(i), d))
    }

    /// Override the scale of one entity (configured multipliers).
    pub fn set_scale(&mut self, key: &str, scale: f64) -> ProtocolResult<()> {
        let id = self.id_of(key)?;
        let descriptor = &mut self.entities[id.0];
        let previous = descriptor.scale;
        descriptor.scale = scale;
        if let Err(e) = descriptor.validate() {
            descriptor.scale = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Render `AT+<MNEMONIC>=<value * scale>`.
    pub fn format_set(&self, key: &str, value: &Value) -> ProtocolResult<String> {
        self.set_command(self.id_of(key)?, value)
            .map(|cmd| cmd.to_command_string())
    }

    /// Render `AT+<MNEMONIC>?`.
    pub fn format_query(&self, key: &str) -> ProtocolResult<String> {
        self.query_command(self.id_of(key)?)
            .map(|cmd| cmd.to_command_string())
    }

    /// Render `AT+<MNEMONIC>` for an action.
    pub fn format_action(&self, key: &str) -> ProtocolResult<String> {
        self.action_command(self.id_of(key)?)
            .map(|cmd| cmd.to_command_string())
    }

    /// Build the set command for an entity.
    pub fn set_command(&self, id: EntityId, value: &Value) -> ProtocolResult<Command> {
        let descriptor = self.get(id);
        if !descriptor.direction.is_writable() {
            return Err(unsupported(descriptor, "set"));
        }
        let rendered = descriptor
            .value_kind
            .encode(value, descriptor.scale)
            .ok_or_else(|| ProtocolError::InvalidValue {
                key: descriptor.key.clone(),
                reason: format!("cannot encode {} as {}", value, descriptor.value_kind.name()),
            })?;
        Ok(Command::Set {
            mnemonic: descriptor.command.clone(),
            value: rendered,
        })
    }

    /// Build the query command for an entity.
    pub fn query_command(&self, id: EntityId) -> ProtocolResult<Command> {
        let descriptor = self.get(id);
        if !descriptor.direction.is_queryable() {
            return Err(unsupported(descriptor, "query"));
        }
        Ok(Command::Query { mnemonic: descriptor.command.clone() })
    }

    /// Build the command for an action entity.
    pub fn action_command(&self, id: EntityId) -> ProtocolResult<Command> {
        let descriptor = self.get(id);
        if descriptor.direction != Direction::Action {
            return Err(unsupported(descriptor, "press"));
        }
        Ok(Command::Action { mnemonic: descriptor.command.clone() })
    }
}

fn unsupported(descriptor: &EntityDescriptor, operation: &'static str) -> ProtocolError {
    ProtocolError::UnsupportedOperation {
        key: descriptor.key.clone(),
        operation,
    }
}

/// Pilot states reported by `+STATE`.
pub const EVSE_STATES: &[(i64, &str)] = &[
    (0, "A"),
    (1, "B1"),
    (2, "B2"),
    (3, "C1"),
    (4, "C2"),
    (5, "D1"),
    (6, "D2"),
    (7, "E"),
    (8, "F"),
];

/// Fault bits reported by `+ERROR`.
pub const EVSE_FAULT_BITS: &[(&str, u8)] = &[
    ("pilot_fault", 0),
    ("diode_short", 1),
    ("lock_fault", 2),
    ("unlock_fault", 3),
    ("rcm_triggered_fault", 4),
    ("rcm_self_test_fault", 5),
    ("temperature_high_fault", 6),
    ("temperature_fault", 7),
];

/// Descriptors of the canonical ESP32 EVSE catalog.
///
/// Currents travel in tenths of an ampere, energy limits in Wh, time limits
/// in seconds and power limits in W.
pub fn evse_descriptors() -> Vec<EntityDescriptor> {
    use EntityDescriptor as D;
    use ValueKind::*;

    const WIRE_INT: ValueKind = Float { precision: 0 };
    const ONE_DECIMAL: ValueKind = Float { precision: 1 };
    const CENTI: ValueKind = Float { precision: 2 };

    let mut entities = vec![
        D::query("state", "STATE", Enum(EVSE_STATES)),
        D::read_write("enable", "ENABLE", Boolean),
        D::read_write("available", "AVAILABLE", Boolean),
        D::read_write("request_authorization", "REQAUTH", Boolean),
        D::query("pending_authorization", "PENDAUTH", Boolean),
        D::query("charging_limit_reached", "LIMREACH", Boolean),
        D::query("three_phase_meter", "EMETERTHREEPHASE", Boolean),
        D::read_write("charging_current", "CHCUR", WIRE_INT).with_scale(10.0),
        D::read_write("default_charging_current", "DEFCHCUR", WIRE_INT).with_scale(10.0),
        D::read_write("maximum_charging_current", "MAXCHCUR", Integer),
        D::read_write("consumption_limit", "CONSUMLIM", WIRE_INT).with_scale(1000.0),
        D::read_write("default_consumption_limit", "DEFCONSUMLIM", WIRE_INT).with_scale(1000.0),
        D::read_write("charging_time_limit", "CHTIMELIM", WIRE_INT).with_scale(3600.0),
        D::read_write("default_charging_time_limit", "DEFCHTIMELIM", WIRE_INT).with_scale(3600.0),
        D::read_write("under_power_limit", "UNDERPOWERLIM", WIRE_INT).with_scale(1000.0),
        D::read_write("default_under_power_limit", "DEFUNDERPOWERLIM", WIRE_INT).with_scale(1000.0),
        D::query("emeter_power", "EMETERPOWER", Integer),
        D::query("emeter_session_time", "EMETERSESTIME", Integer),
        D::query("emeter_charging_time", "EMETERCHTIME", Integer),
        D::query("energy_consumption", "EMETERCONSUM", ONE_DECIMAL),
        D::query("total_energy_consumption", "EMETERTOTCONSUM", ONE_DECIMAL),
        D::query("voltage_l1", "EMETERVOLTAGE", ONE_DECIMAL).with_field(0),
        D::query("voltage_l2", "EMETERVOLTAGE", ONE_DECIMAL).with_field(1),
        D::query("voltage_l3", "EMETERVOLTAGE", ONE_DECIMAL).with_field(2),
        D::query("current_l1", "EMETERCURRENT", ONE_DECIMAL).with_field(0),
        D::query("current_l2", "EMETERCURRENT", ONE_DECIMAL).with_field(1),
        D::query("current_l3", "EMETERCURRENT", ONE_DECIMAL).with_field(2),
        D::query("temperature_high", "TEMP", CENTI)
            .with_scale(100.0)
            .with_field(1)
            .with_count_field(0),
        D::query("temperature_low", "TEMP", CENTI)
            .with_scale(100.0)
            .with_field(2)
            .with_count_field(0),
        D::query("heap_used", "HEAP", Integer).with_field(0),
        D::query("heap_total", "HEAP", Integer).with_field(1),
        D::query("wifi_connected", "WIFISTACONN", Boolean).with_field(0),
        D::query("wifi_rssi", "WIFISTACONN", Integer).with_field(1),
        D::query("wifi_sta_ssid", "WIFISTACFG", Text).with_field(1),
        D::query("wifi_sta_ip", "WIFISTAIP", Text),
        D::query("wifi_sta_mac", "WIFISTAMAC", Text),
        D::query("chip", "CHIP", ChipInfo),
        D::query("version", "VER", Text),
        D::query("idf_version", "IDFVER", Text),
        D::query("build_time", "BUILDTIME", Text),
        D::query("device_name", "DEVNAME", Text),
        D::query("device_time", "TIME", Timestamp),
        D::query("uptime", "UPTIME", Integer),
        D::action("reset", "RST"),
        D::action("authorize", "AUTH"),
    ];

    entities.extend(
        EVSE_FAULT_BITS
            .iter()
            .map(|(key, bit)| D::query(key, "ERROR", Bit(*bit))),
    );

    entities
}
