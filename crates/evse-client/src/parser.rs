//! Response parser and entity state table.
//!
//! Turns inbound lines into acknowledgements or entity updates. The state
//! table is indexed by [`EntityId`]; a change is published to the registry only
//! when the decoded value differs from the stored one.

use evse_at_protocol::{Catalog, DecodeError, EntityId, Response, Value};
use tracing::{debug, warn};

use crate::registry::{EntityRegistry, StateChanged};

/// Last known state of one entity.
#[derive(Debug, Clone, Default)]
pub struct EntityState {
    /// Whether the host registered this entity.
    pub enabled: bool,
    /// Last decoded value, if any was received.
    pub value: Option<Value>,
}

/// What an inbound line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// `OK` (`true`) or `ERROR` (`false`).
    Ack(bool),
    /// Data applied to the entities fed by `mnemonic`.
    Data {
        mnemonic: String,
        /// Entities whose stored value was written.
        applied: usize,
        /// Entities whose value actually changed.
        changed: usize,
        /// Entities whose field failed to decode.
        failed: usize,
    },
    /// Echo, or data for entities the host did not enable.
    Ignored,
}

/// Decodes lines against the catalog and owns the entity state table.
#[derive(Debug)]
pub struct ResponseParser {
    states: Vec<EntityState>,
}

impl ResponseParser {
    /// Create a parser for `enabled.len()` entities.
    pub fn new(enabled: Vec<bool>) -> Self {
        ResponseParser {
            states: enabled
                .into_iter()
                .map(|enabled| EntityState { enabled, value: None })
                .collect(),
        }
    }

    pub fn is_enabled(&self, id: EntityId) -> bool {
        self.states.get(id.0).map(|s| s.enabled).unwrap_or(false)
    }

    /// Last decoded value of an entity.
    pub fn value(&self, id: EntityId) -> Option<&Value> {
        self.states.get(id.0).and_then(|s| s.value.as_ref())
    }

    /// Parse one line and apply it.
    ///
    /// A decode error leaves the affected entity unchanged. When a mnemonic
    /// feeds several entities, the fields that decode are still applied and
    /// an error is only returned if none of them did.
    pub fn handle_line<R: EntityRegistry + ?Sized>(
        &mut self,
        catalog: &Catalog,
        line: &str,
        registry: &mut R,
    ) -> Result<Inbound, DecodeError> {
        match Response::parse(line) {
            Response::Ok => Ok(Inbound::Ack(true)),
            Response::Error => Ok(Inbound::Ack(false)),
            Response::Echo(_) => Ok(Inbound::Ignored),
            Response::Unknown(text) => Err(DecodeError::NotAResponse(text)),
            Response::Data { mnemonic, payload } => {
                self.apply(catalog, mnemonic, payload.as_deref(), registry)
            }
        }
    }

    fn apply<R: EntityRegistry + ?Sized>(
        &mut self,
        catalog: &Catalog,
        mnemonic: String,
        payload: Option<&str>,
        registry: &mut R,
    ) -> Result<Inbound, DecodeError> {
        let ids = catalog.entities_for(&mnemonic);
        if ids.is_empty() {
            return Err(DecodeError::UnknownCommand(mnemonic));
        }

        let mut applied = 0;
        let mut changed = 0;
        let mut first_error = None;
        let mut failed = 0;

        for &id in ids {
            if !self.is_enabled(id) {
                continue;
            }
            let descriptor = catalog.get(id);
            match descriptor.decode(payload) {
                Ok(value) => {
                    applied += 1;
                    if self.store(id, value.clone()) {
                        changed += 1;
                        debug!("{} -> {}", descriptor.key, value);
                        registry.state_changed(&StateChanged {
                            id,
                            key: descriptor.key.clone(),
                            value,
                        });
                    }
                }
                Err(e) => {
                    warn!("Dropping update for {}: {}", descriptor.key, e);
                    failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if applied == 0 => Err(e),
            _ if applied == 0 => Ok(Inbound::Ignored),
            _ => Ok(Inbound::Data { mnemonic, applied, changed, failed }),
        }
    }

    /// Store a value, returning whether it differs from the previous one.
    fn store(&mut self, id: EntityId, value: Value) -> bool {
        let slot = &mut self.states[id.0].value;
        let changed = slot.as_ref() != Some(&value);
        *slot = Some(value);
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evse_at_protocol::{EntityDescriptor, ValueKind};

    const STATES: &[(i64, &str)] = &[(0, "Idle"), (1, "Charging"), (2, "Error")];

    fn catalog() -> Catalog {
        const AMPS: ValueKind = ValueKind::Float { precision: 0 };
        const VOLTS: ValueKind = ValueKind::Float { precision: 1 };
        Catalog::new(vec![
            EntityDescriptor::read_write("charging_current", "CHCUR", AMPS).with_scale(10.0),
            EntityDescriptor::query("state", "STATE", ValueKind::Enum(STATES)),
            EntityDescriptor::query("voltage_l1", "EMETERVOLTAGE", VOLTS).with_field(0),
            EntityDescriptor::query("voltage_l2", "EMETERVOLTAGE", VOLTS).with_field(1),
        ])
        .unwrap()
    }

    fn parser(catalog: &Catalog) -> ResponseParser {
        ResponseParser::new(vec![true; catalog.len()])
    }

    #[test]
    fn test_decode_scaled_value() {
        let catalog = catalog();
        let mut parser = parser(&catalog);
        let mut changes: Vec<StateChanged> = Vec::new();

        let inbound = parser.handle_line(&catalog, "+CHCUR=65", &mut changes).unwrap();
        assert!(matches!(inbound, Inbound::Data { changed: 1, .. }));
        let id = catalog.id_of("charging_current").unwrap();
        assert_eq!(parser.value(id), Some(&Value::Float(6.5)));
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn test_enum_and_unknown_command() {
        let catalog = catalog();
        let mut parser = parser(&catalog);
        let mut changes: Vec<StateChanged> = Vec::new();

        parser.handle_line(&catalog, "+STATE=2", &mut changes).unwrap();
        assert_eq!(changes[0].value, Value::Text("Error".to_string()));

        assert_eq!(
            parser.handle_line(&catalog, "+UNKNOWNCMD=1", &mut changes),
            Err(DecodeError::UnknownCommand("UNKNOWNCMD".to_string()))
        );
        assert_eq!(changes.len(), 1);

        parser.handle_line(&catalog, "+STATE=1", &mut changes).unwrap();
        assert_eq!(changes[1].value, Value::Text("Charging".to_string()));
    }

    #[test]
    fn test_bad_enum_leaves_state_unchanged() {
        let catalog = catalog();
        let mut parser = parser(&catalog);
        let id = catalog.id_of("state").unwrap();

        parser.handle_line(&catalog, "+STATE=0", &mut ()).unwrap();
        assert!(parser.handle_line(&catalog, "+STATE=9", &mut ()).is_err());
        assert_eq!(parser.value(id), Some(&Value::Text("Idle".to_string())));
    }

    #[test]
    fn test_changes_are_edge_triggered() {
        let catalog = catalog();
        let mut parser = parser(&catalog);
        let mut changes: Vec<StateChanged> = Vec::new();

        parser.handle_line(&catalog, "+CHCUR=160", &mut changes).unwrap();
        let inbound = parser.handle_line(&catalog, "+CHCUR=160", &mut changes).unwrap();
        assert!(matches!(inbound, Inbound::Data { applied: 1, changed: 0, .. }));
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn test_multi_field_partial_payload() {
        let catalog = catalog();
        let mut parser = parser(&catalog);
        let mut changes: Vec<StateChanged> = Vec::new();

        let inbound = parser
            .handle_line(&catalog, "+EMETERVOLTAGE=230.5", &mut changes)
            .unwrap();
        assert!(matches!(inbound, Inbound::Data { applied: 1, failed: 1, .. }));
        assert_eq!(changes[0].key, "voltage_l1");
    }

    #[test]
    fn test_acks_echoes_and_garbage() {
        let catalog = catalog();
        let mut parser = parser(&catalog);

        assert_eq!(parser.handle_line(&catalog, "OK", &mut ()), Ok(Inbound::Ack(true)));
        assert_eq!(parser.handle_line(&catalog, "ERROR", &mut ()), Ok(Inbound::Ack(false)));
        assert_eq!(parser.handle_line(&catalog, "AT+STATE?", &mut ()), Ok(Inbound::Ignored));
        assert!(matches!(
            parser.handle_line(&catalog, "garbage", &mut ()),
            Err(DecodeError::NotAResponse(_))
        ));
    }

    #[test]
    fn test_disabled_entities_are_ignored() {
        let catalog = catalog();
        let mut enabled = vec![true; catalog.len()];
        enabled[catalog.id_of("state").unwrap().0] = false;
        let mut parser = ResponseParser::new(enabled);

        assert_eq!(parser.handle_line(&catalog, "+STATE=1", &mut ()), Ok(Inbound::Ignored));
    }
}
