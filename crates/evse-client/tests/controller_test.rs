//! End-to-end behavior of the EVSE client against a scripted controller.
//!
//! Time is synthetic: every test drives `tick` with explicit instants.

use std::time::{Duration, Instant};

use evse_at_protocol::{Catalog, Direction, EntityDescriptor, ProtocolError, Value, ValueKind};
use evse_client::{
    ClientConfig, ClientError, EntityRegistry, EvseController, MemoryTransport, PollingScheduler,
    StateChanged, SubscriptionState, Timing,
};

const STATES: &[(i64, &str)] = &[(0, "Idle"), (1, "Charging"), (2, "Error")];

fn catalog() -> Catalog {
    Catalog::new(vec![
        EntityDescriptor::read_write("a_current", "CHCUR", ValueKind::Float { precision: 0 })
            .with_scale(10.0),
        EntityDescriptor::query("b_power", "EMETERPOWER", ValueKind::Integer),
        EntityDescriptor::query("c_state", "STATE", ValueKind::Enum(STATES)),
        EntityDescriptor::read_write("d_enable", "ENABLE", ValueKind::Boolean)
            .with_direction(Direction::Set),
        EntityDescriptor::read_write("e_limit", "CONSUMLIM", ValueKind::Float { precision: 0 })
            .with_scale(1000.0)
            .with_direction(Direction::Set),
        EntityDescriptor::action("f_reset", "RST"),
    ])
    .unwrap()
}

#[derive(Debug, Default)]
struct Recorder {
    changes: Vec<StateChanged>,
    connectivity: Vec<bool>,
}

impl EntityRegistry for Recorder {
    fn state_changed(&mut self, change: &StateChanged) {
        self.changes.push(change.clone());
    }

    fn connectivity_changed(&mut self, connected: bool) {
        self.connectivity.push(connected);
    }
}

struct Harness {
    evse: EvseController<MemoryTransport, Recorder>,
    now: Instant,
}

impl Harness {
    fn new() -> Self {
        Harness {
            evse: EvseController::new(
                catalog(),
                MemoryTransport::new(),
                Recorder::default(),
                Timing::default(),
            ),
            now: Instant::now(),
        }
    }

    /// Create and answer the startup refresh.
    fn started() -> Self {
        let mut h = Self::new();
        h.settle();
        h.sent();
        h
    }

    fn tick(&mut self) {
        self.evse.tick(self.now).unwrap();
    }

    fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    fn reply(&mut self, line: &str) {
        self.evse.transport_mut().feed_line(line);
    }

    fn sent(&mut self) -> Vec<String> {
        self.evse.transport_mut().take_sent()
    }

    /// Acknowledge every command until the client is idle.
    fn settle(&mut self) {
        for _ in 0..64 {
            self.tick();
            if self.evse.is_idle() {
                return;
            }
            if self.evse.pending().is_some() {
                self.reply("OK");
            }
        }
        panic!("client did not settle: {:?}", self.evse.queued());
    }
}

// ============================================================================
// Decoding
// ============================================================================

#[test]
fn test_scale_ten_round_trip_through_client() {
    let mut h = Harness::started();

    for n in [0, 5, 65, 99, 160, 320] {
        h.reply(&format!("+CHCUR={}", n));
        h.tick();
        let value = h.evse.value("a_current").cloned().unwrap();
        assert!((value.as_f64().unwrap() - n as f64 / 10.0).abs() < 1e-9);

        h.evse.request_set("a_current", value).unwrap();
        h.tick();
        assert_eq!(h.sent(), vec![format!("AT+CHCUR={}", n)]);
        h.reply("OK");
        h.tick();
    }
}

#[test]
fn test_decode_lines_and_survive_bad_ones() {
    let mut h = Harness::started();

    h.reply("+CHCUR=65");
    h.tick();
    assert_eq!(h.evse.value("a_current"), Some(&Value::Float(6.5)));

    h.reply("+STATE=2");
    h.tick();
    assert_eq!(h.evse.value("c_state"), Some(&Value::Text("Error".to_string())));
    let changes = h.evse.registry().changes.len();

    h.reply("+UNKNOWNCMD=1");
    h.tick();
    assert_eq!(h.evse.stats().decode_errors, 1);
    assert_eq!(h.evse.value("c_state"), Some(&Value::Text("Error".to_string())));
    assert_eq!(h.evse.registry().changes.len(), changes);

    h.reply("+STATE=7");
    h.reply("\u{1}\u{2}garbage");
    h.reply("+STATE=banana");
    for _ in 0..3 {
        h.tick();
    }
    assert_eq!(h.evse.stats().decode_errors, 4);
    assert_eq!(h.evse.value("c_state"), Some(&Value::Text("Error".to_string())));

    h.reply("+STATE=1");
    h.tick();
    assert_eq!(h.evse.value("c_state"), Some(&Value::Text("Charging".to_string())));
}

#[test]
fn test_temperature_without_sensors_reads_unknown() {
    let catalog = Catalog::evse();
    let mut enabled = vec![false; catalog.len()];
    enabled[catalog.id_of("temperature_high").unwrap().0] = true;
    let mut evse = EvseController::with_enabled(
        catalog,
        MemoryTransport::new(),
        Vec::new(),
        Timing::default(),
        enabled,
    );
    let now = Instant::now();

    evse.transport_mut().feed_line("+TEMP=1,4250,3100");
    evse.tick(now).unwrap();
    assert_eq!(evse.value("temperature_high"), Some(&Value::Float(42.5)));

    evse.transport_mut().feed_line("+TEMP=0,0,0");
    evse.tick(now).unwrap();
    assert_eq!(evse.value("temperature_high"), Some(&Value::Unknown));
    assert_eq!(evse.registry().last().map(|c| &c.value), Some(&Value::Unknown));
    assert_eq!(evse.stats().decode_errors, 0);
}

#[test]
fn test_state_changes_are_edge_triggered() {
    let mut h = Harness::started();

    let lines = ["+EMETERPOWER=0", "+EMETERPOWER=0", "+EMETERPOWER=7200", "+EMETERPOWER=7200"];
    for line in lines {
        h.reply(line);
        h.tick();
    }

    let power: Vec<&Value> = h
        .evse
        .registry()
        .changes
        .iter()
        .filter(|c| c.key == "b_power")
        .map(|c| &c.value)
        .collect();
    assert_eq!(power, vec![&Value::Integer(0), &Value::Integer(7200)]);
    assert_eq!(h.evse.stats().lines_received, 4 + 3);
}

// ============================================================================
// Dispatcher
// ============================================================================

#[test]
fn test_one_request_in_flight_then_fifo() {
    let mut h = Harness::started();

    h.evse.request_query("c_state").unwrap();
    h.tick();
    assert_eq!(h.sent(), vec!["AT+STATE?"]);

    h.evse.request_set("d_enable", true).unwrap();
    h.evse.request_set("e_limit", 12.5).unwrap();
    h.evse.request_query("b_power").unwrap();
    for _ in 0..5 {
        h.tick();
    }
    assert!(h.sent().is_empty());

    h.reply("+STATE=0");
    h.reply("OK");
    h.tick();
    h.tick();
    assert_eq!(h.sent(), vec!["AT+ENABLE=1"]);

    // No answer: the write is abandoned after the response timeout.
    h.advance(Duration::from_secs(5));
    h.tick();
    assert_eq!(h.sent(), vec!["AT+CONSUMLIM=12500"]);
    assert_eq!(h.evse.stats().commands_timed_out, 1);

    h.reply("OK");
    h.tick();
    assert_eq!(h.sent(), vec!["AT+EMETERPOWER?"]);
}

#[test]
fn test_last_queued_write_wins() {
    let mut h = Harness::started();

    h.evse.request_query("c_state").unwrap();
    h.tick();
    h.evse.request_set("d_enable", true).unwrap();
    h.evse.request_set("d_enable", false).unwrap();
    h.evse.request_set("d_enable", true).unwrap();
    assert_eq!(h.evse.queued(), vec!["AT+ENABLE=1"]);

    h.settle();
    assert_eq!(h.sent(), vec!["AT+STATE?", "AT+ENABLE=1"]);
}

#[test]
fn test_acknowledged_writes_are_sent_in_order() {
    let mut h = Harness::started();

    for value in [true, false, true] {
        h.evse.request_set("d_enable", value).unwrap();
        h.settle();
    }
    assert_eq!(h.sent(), vec!["AT+ENABLE=1", "AT+ENABLE=0", "AT+ENABLE=1"]);
}

#[test]
fn test_out_of_range_write_is_rejected() {
    let mut h = Harness::started();

    let result = h.evse.request_set("a_current", 1e300);
    assert!(matches!(
        result,
        Err(ClientError::Protocol(ProtocolError::InvalidValue { .. }))
    ));
    assert!(h.evse.queued().is_empty());
}

#[test]
fn test_timed_out_write_is_reread() {
    let mut h = Harness::started();

    h.evse.request_set("a_current", 32.0).unwrap();
    h.tick();
    assert_eq!(h.sent(), vec!["AT+CHCUR=320"]);

    h.advance(Duration::from_secs(5));
    h.tick();
    assert_eq!(h.sent(), vec!["AT+CHCUR?"]);
}

#[test]
fn test_duplicate_requests_are_coalesced() {
    let mut h = Harness::started();

    h.evse.request_query("b_power").unwrap();
    h.evse.request_query("c_state").unwrap();
    h.evse.request_query("c_state").unwrap();
    assert_eq!(h.evse.queued(), vec!["AT+EMETERPOWER?", "AT+STATE?"]);
}

#[test]
fn test_press_action() {
    let mut h = Harness::started();

    h.evse.press("f_reset").unwrap();
    h.tick();
    assert_eq!(h.sent(), vec!["AT+RST"]);
    assert!(matches!(h.evse.press("c_state"), Err(ClientError::NotAnAction { .. })));
}

#[test]
fn test_stray_acks_are_ignored() {
    let mut h = Harness::started();

    h.reply("OK");
    h.reply("ERROR");
    h.tick();
    h.tick();
    assert_eq!(h.evse.stats().commands_acked, 3);
    assert_eq!(h.evse.stats().commands_rejected, 0);
    assert!(h.evse.is_idle());
}

// ============================================================================
// Subscriptions
// ============================================================================

#[test]
fn test_subscribe_then_unsubscribe_before_tick_sends_nothing() {
    let mut h = Harness::started();

    h.evse.subscribe("b_power", 1000).unwrap();
    h.evse.unsubscribe("b_power").unwrap();
    for _ in 0..3 {
        h.tick();
    }
    assert!(h.sent().is_empty());
}

#[test]
fn test_unsubscribe_after_flush_is_sent() {
    let mut h = Harness::started();

    h.evse.subscribe("b_power", 1000).unwrap();
    h.tick();
    assert_eq!(h.sent(), vec!["AT+SUB=\"+EMETERPOWER\",1000"]);
    assert!(h.evse.subscription("b_power").unwrap().active);

    h.evse.unsubscribe("b_power").unwrap();
    h.reply("OK");
    h.tick();
    assert_eq!(h.sent(), vec!["AT+UNSUB=\"+EMETERPOWER\""]);
}

#[test]
fn test_zero_period_unsubscribes() {
    let mut h = Harness::started();

    h.evse.subscribe("c_state", 2000).unwrap();
    h.settle();
    h.evse.subscribe("c_state", 0).unwrap();
    h.settle();
    assert_eq!(
        h.sent(),
        vec!["AT+SUB=\"+STATE\",2000", "AT+UNSUB=\"+STATE\""]
    );
    assert!(!h.evse.subscription("c_state").unwrap().is_subscribed());
}

#[test]
fn test_unsubscribe_all_in_key_order() {
    let mut h = Harness::started();

    h.evse.subscribe("c_state", 2000).unwrap();
    h.evse.subscribe("a_current", 1000).unwrap();
    h.evse.subscribe("b_power", 500).unwrap();
    h.settle();
    h.sent();

    h.evse.unsubscribe_all();
    assert!(h.sent().is_empty());
    h.settle();
    assert_eq!(
        h.sent(),
        vec![
            "AT+UNSUB=\"+CHCUR\"",
            "AT+UNSUB=\"+EMETERPOWER\"",
            "AT+UNSUB=\"+STATE\"",
        ]
    );
}

#[test]
fn test_subscribed_entities_are_not_polled() {
    let mut h = Harness::started();

    h.evse.subscribe("b_power", 500).unwrap();
    h.settle();
    h.sent();

    h.advance(Duration::from_secs(60));
    h.settle();
    assert_eq!(h.sent(), vec!["AT+CHCUR?", "AT+STATE?"]);
}

#[test]
fn test_liveness_timeout_resyncs_subscriptions_in_key_order() {
    let mut h = Harness::started();

    h.evse.subscribe("c_state", 2000).unwrap();
    h.evse.subscribe("a_current", 1000).unwrap();
    h.evse.subscribe("b_power", 500).unwrap();
    h.settle();
    h.evse.unsubscribe("b_power").unwrap();
    h.settle();
    h.sent();

    // Silent controller: no line for longer than the liveness window.
    h.advance(Duration::from_secs(126));
    h.settle();

    assert_eq!(
        h.sent(),
        vec![
            "AT+SUB=\"+CHCUR\",1000",
            "AT+SUB=\"+STATE\",2000",
            "AT+EMETERPOWER?",
        ]
    );
    assert_eq!(h.evse.stats().resyncs, 1);
    assert_eq!(h.evse.registry().connectivity, vec![false, true]);
    assert!(h.evse.is_connected());
}

#[test]
fn test_resync_repeats_while_silent() {
    let mut h = Harness::started();
    h.evse.subscribe("c_state", 2000).unwrap();
    h.settle();
    h.sent();

    h.advance(Duration::from_secs(125));
    h.tick();
    assert!(!h.evse.is_connected());
    assert_eq!(h.sent(), vec!["AT+SUB=\"+STATE\",2000"]);

    h.advance(Duration::from_secs(125));
    h.tick();
    assert_eq!(h.evse.stats().resyncs, 2);
    assert_eq!(h.evse.registry().connectivity, vec![false]);
}

// ============================================================================
// Transport failures
// ============================================================================

#[test]
fn test_transport_error_pauses_until_traffic_returns() {
    let mut h = Harness::started();

    h.evse.transport_mut().set_fail_writes(true);
    h.evse.request_query("c_state").unwrap();
    h.evse.request_query("b_power").unwrap();
    let result = h.evse.tick(h.now);
    assert!(matches!(result, Err(ClientError::Transport(_))));
    assert_eq!(h.evse.stats().transport_errors, 1);
    assert!(h.evse.queued().is_empty());

    h.evse.transport_mut().set_fail_writes(false);
    h.evse.request_query("c_state").unwrap();
    h.tick();
    assert!(h.sent().is_empty());

    h.reply("+STATE=1");
    h.tick();
    assert_eq!(h.sent(), vec!["AT+STATE?"]);
}

#[test]
fn test_failed_subscribe_is_reissued_on_resync() {
    let mut h = Harness::started();

    h.evse.transport_mut().set_fail_writes(true);
    h.evse.subscribe("b_power", 500).unwrap();
    assert!(matches!(h.evse.tick(h.now), Err(ClientError::Transport(_))));
    assert!(h.sent().is_empty());
    assert_eq!(
        h.evse.subscription("b_power"),
        Some(SubscriptionState { period_ms: 500, active: true })
    );

    h.evse.transport_mut().set_fail_writes(false);
    h.advance(Duration::from_secs(126));
    h.tick();
    assert_eq!(h.sent(), vec!["AT+SUB=\"+EMETERPOWER\",500"]);
    assert_eq!(h.evse.stats().resyncs, 1);
}

// ============================================================================
// Polling
// ============================================================================

#[test]
fn test_startup_refresh_then_interval() {
    let mut h = Harness::new();
    h.settle();
    assert_eq!(h.sent(), vec!["AT+CHCUR?", "AT+EMETERPOWER?", "AT+STATE?"]);

    h.advance(Duration::from_secs(59));
    h.settle();
    assert!(h.sent().is_empty());

    h.advance(Duration::from_secs(1));
    h.settle();
    assert_eq!(h.sent(), vec!["AT+CHCUR?", "AT+EMETERPOWER?", "AT+STATE?"]);
}

#[test]
fn test_scheduler_enqueues_only_due_entities_in_order() {
    let catalog = catalog();
    let a = catalog.id_of("a_current").unwrap();
    let b = catalog.id_of("b_power").unwrap();
    let c = catalog.id_of("c_state").unwrap();

    let start = Instant::now();
    let mut scheduler = PollingScheduler::new(catalog.len(), Duration::from_secs(60));
    scheduler.take_due(start, [b]);

    assert_eq!(scheduler.take_due(start + Duration::from_secs(1), [a, b, c]), vec![a, c]);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_from_config_subscribes_at_startup() {
    let yaml = r#"
update_interval_ms: 30000
entities: [state, emeter_power, charging_current]
subscriptions:
  emeter_power: 500
"#;
    let config = ClientConfig::from_yaml_str(yaml).unwrap();
    let mut evse =
        EvseController::from_config(&config, MemoryTransport::new(), Vec::new()).unwrap();
    let now = Instant::now();

    evse.tick(now).unwrap();
    assert_eq!(evse.transport().sent(), ["AT+SUB=\"+EMETERPOWER\",500"]);
    assert_eq!(evse.queued(), vec!["AT+CHCUR?", "AT+STATE?"]);
    assert_eq!(evse.timing().response_timeout, Duration::from_millis(2500));
    assert!(matches!(evse.request_set("enable", true), Err(ClientError::Disabled(_))));
}
