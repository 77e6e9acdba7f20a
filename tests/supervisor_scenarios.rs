//! End-to-end supervisor scenarios on a simulated board
//!
//! All fakes share one [`Board`]: a virtual clock, an ordered event log and a
//! watchdog that records when its deadline passes without a feed.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::rc::Rc;

use embassy_futures::block_on;
use embassy_time::{Duration, Instant};
use sensor_node::system::clock::Clock;
use sensor_node::system::config::{NodeConfig, RawConfig};
use sensor_node::system::context::{MacAddress, NetworkIdentity, NodeContext};
use sensor_node::system::error::{Fault, SensorError, SessionError};
use sensor_node::system::state::SupervisorState;
use sensor_node::task::link_health::{HealthStatus, LinkProbe};
use sensor_node::task::message::{Category, LineMessage};
use sensor_node::task::publisher::BrokerSession;
use sensor_node::task::sensor::{Measurements, SensorSource, SIMULATED_MEASUREMENTS};
use sensor_node::task::supervisor::{Components, Supervisor, WaitReport};
use sensor_node::task::watchdog::Watchdog;

use HealthStatus::{Reachable, Unreachable};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Arm(Duration),
    Open,
    Send(String),
    Probe(HealthStatus),
    Feed,
    Close,
    Reset,
    /// Watchdog deadline passed without a feed
    Expired,
}

#[derive(Default)]
struct Board {
    now: Cell<u64>,
    deadline: Cell<Option<u64>>,
    timeout: Cell<u64>,
    events: RefCell<Vec<Event>>,
}

impl Board {
    fn record(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }

    fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    fn count(&self, wanted: impl Fn(&Event) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| wanted(e)).count()
    }

    fn expired(&self) -> bool {
        self.count(|e| *e == Event::Expired) > 0
    }

    fn sends(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Send(body) => Some(body.clone()),
                _ => None,
            })
            .collect()
    }

    /// Moves virtual time forward, tripping the watchdog if its deadline passes
    fn advance(&self, duration: Duration) {
        let now = self.now.get() + duration.as_millis();
        self.now.set(now);
        if let Some(deadline) = self.deadline.get() {
            if now > deadline && !self.expired() {
                self.record(Event::Expired);
            }
        }
    }
}

struct SimSession {
    board: Rc<Board>,
    refuse_open: bool,
    fail_send_at: Option<usize>,
    sends: usize,
}

impl BrokerSession for SimSession {
    async fn open(&mut self) -> Result<(), SessionError> {
        self.board.record(Event::Open);
        if self.refuse_open {
            Err(SessionError::Tcp)
        } else {
            Ok(())
        }
    }

    async fn send(&mut self, _topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        let index = self.sends;
        self.sends += 1;
        if self.fail_send_at == Some(index) {
            return Err(SessionError::Send);
        }
        let body = String::from_utf8(payload.to_vec()).expect("utf8 payload");
        self.board.record(Event::Send(body));
        Ok(())
    }

    async fn close(&mut self) {
        self.board.record(Event::Close);
    }
}

struct SimProbe {
    board: Rc<Board>,
    script: VecDeque<HealthStatus>,
}

impl LinkProbe for SimProbe {
    async fn probe(&mut self, _host: &str, _port: u16) -> HealthStatus {
        let status = self.script.pop_front().unwrap_or(Reachable);
        self.board.record(Event::Probe(status));
        status
    }
}

struct SimWatchdog(Rc<Board>);

impl Watchdog for SimWatchdog {
    fn start(&mut self, timeout: Duration) {
        self.0.timeout.set(timeout.as_millis());
        self.0.deadline.set(Some(self.0.now.get() + timeout.as_millis()));
        self.0.record(Event::Arm(timeout));
    }

    fn feed(&mut self) {
        if !self.0.expired() {
            self.0.deadline.set(Some(self.0.now.get() + self.0.timeout.get()));
        }
        self.0.record(Event::Feed);
    }

    fn trigger_reset(&mut self) {
        self.0.record(Event::Reset);
    }
}

struct SimClock(Rc<Board>);

impl Clock for SimClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.0.now.get())
    }

    async fn sleep(&mut self, duration: Duration) {
        self.0.advance(duration);
    }
}

struct SimSensors {
    environment: Result<Measurements, SensorError>,
}

impl SensorSource for SimSensors {
    async fn measurements(&mut self) -> Result<Measurements, SensorError> {
        self.environment
    }

    async fn internal_temperature(&mut self) -> Result<f32, SensorError> {
        Ok(26.4)
    }
}

struct Scenario {
    interval: u32,
    watchdog_ms: &'static str,
    probe_timeout_ms: &'static str,
    probes: Vec<HealthStatus>,
    refuse_open: bool,
    fail_send_at: Option<usize>,
    environment: Result<Measurements, SensorError>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            interval: 3,
            watchdog_ms: "5000",
            probe_timeout_ms: "2000",
            probes: Vec::new(),
            refuse_open: false,
            fail_send_at: None,
            environment: Ok(SIMULATED_MEASUREMENTS),
        }
    }
}

type SimSupervisor<'a> = Supervisor<'a, SimSession, SimProbe, SimWatchdog, SimSensors, SimClock>;

impl Scenario {
    fn context(&self) -> NodeContext {
        let raw = RawConfig {
            wifi_ssid: Some("field-ap"),
            mqtt_broker: Some("broker.lan"),
            client_id: Some("solar-3"),
            watchdog_ms: Some(self.watchdog_ms),
            probe_timeout_ms: Some(self.probe_timeout_ms),
            ..RawConfig::default()
        };
        let mut config = NodeConfig::parse(&raw).expect("valid scenario config");
        config.publish_interval = self.interval;
        let network = NetworkIdentity {
            mac: MacAddress([0x28, 0xcd, 0xc1, 0x0e, 0x51, 0x7a]),
            ip: Ipv4Addr::new(192, 168, 4, 17),
        };
        NodeContext::new(config, Instant::from_millis(0), network)
    }

    fn supervisor<'a>(&self, ctx: &'a NodeContext, board: &Rc<Board>) -> SimSupervisor<'a> {
        Supervisor::new(
            ctx,
            Components {
                session: SimSession {
                    board: board.clone(),
                    refuse_open: self.refuse_open,
                    fail_send_at: self.fail_send_at,
                    sends: 0,
                },
                probe: SimProbe {
                    board: board.clone(),
                    script: self.probes.iter().copied().collect(),
                },
                watchdog: SimWatchdog(board.clone()),
                sensors: SimSensors {
                    environment: self.environment,
                },
                clock: SimClock(board.clone()),
            },
        )
    }
}

fn start(sup: &mut SimSupervisor<'_>) {
    sup.boot();
    block_on(sup.connect()).expect("broker accepts");
}

#[test]
fn wait_cycle_runs_exactly_the_configured_ticks() {
    for interval in 1..=12 {
        let scenario = Scenario {
            interval,
            ..Scenario::default()
        };
        let ctx = scenario.context();
        let board = Rc::new(Board::default());
        let mut sup = scenario.supervisor(&ctx, &board);
        start(&mut sup);
        block_on(sup.publish_cycle()).unwrap();

        let report = block_on(sup.wait_cycle());
        assert_eq!(report.ticks, interval);
        assert_eq!(board.count(|e| matches!(e, Event::Probe(_))), interval as usize);
        assert_eq!(board.now.get(), u64::from(interval) * 1_000);
        assert_eq!(sup.state(), SupervisorState::Publishing);
    }
}

#[test]
fn healthy_link_feeds_every_tick_and_repeats_the_cycle() {
    let scenario = Scenario::default();
    let ctx = scenario.context();
    let board = Rc::new(Board::default());
    let mut sup = scenario.supervisor(&ctx, &board);
    start(&mut sup);

    for _ in 0..2 {
        block_on(sup.publish_cycle()).unwrap();
        let report = block_on(sup.wait_cycle());
        assert_eq!(
            report,
            WaitReport {
                ticks: 3,
                feeds: 3,
                unreachable: 0
            }
        );
    }
    block_on(sup.publish_cycle()).unwrap();

    let events = board.events();
    assert_eq!(events[0], Event::Arm(Duration::from_millis(5_000)));
    assert_eq!(events[1], Event::Open);
    let cycle = [
        Event::Probe(Reachable),
        Event::Feed,
        Event::Probe(Reachable),
        Event::Feed,
        Event::Probe(Reachable),
        Event::Feed,
    ];
    assert_eq!(events[4..10], cycle);
    assert_eq!(events[12..18], cycle);
    assert_eq!(board.count(|e| *e == Event::Feed), 6);
    assert!(!board.expired());

    let sends = board.sends();
    assert_eq!(sends.len(), 6);
    for pair in sends.chunks(2) {
        assert!(pair[0].starts_with("telemetry,"));
        assert!(pair[1].starts_with("measurement,"));
    }
}

#[test]
fn feeds_only_follow_reachable_probes() {
    let pattern = [
        Reachable,
        Unreachable,
        Unreachable,
        Reachable,
        Reachable,
        Unreachable,
        Reachable,
    ];
    let scenario = Scenario {
        interval: pattern.len() as u32,
        probes: pattern.to_vec(),
        ..Scenario::default()
    };
    let ctx = scenario.context();
    let board = Rc::new(Board::default());
    let mut sup = scenario.supervisor(&ctx, &board);
    start(&mut sup);
    block_on(sup.publish_cycle()).unwrap();
    let report = block_on(sup.wait_cycle());
    assert_eq!(report.feeds, 4);
    assert_eq!(report.unreachable, 3);

    let events = board.events();
    let mut last_probe = None;
    for event in &events {
        match event {
            Event::Probe(status) => last_probe = Some(*status),
            Event::Feed => {
                assert_eq!(last_probe.take(), Some(Reachable), "feed without a reachable probe");
            }
            _ => {}
        }
    }
}

#[test]
fn short_outage_is_absorbed_by_the_watchdog_window() {
    let scenario = Scenario {
        probes: vec![Reachable, Unreachable, Unreachable],
        ..Scenario::default()
    };
    let ctx = scenario.context();
    let board = Rc::new(Board::default());
    let mut sup = scenario.supervisor(&ctx, &board);
    start(&mut sup);
    block_on(sup.publish_cycle()).unwrap();

    let report = block_on(sup.wait_cycle());
    assert_eq!(report.feeds, 1);
    // two seconds without a feed stay inside the five second window
    assert!(!board.expired());
    block_on(sup.publish_cycle()).unwrap();
    assert_eq!(board.sends().len(), 4);
}

#[test]
fn outage_longer_than_the_watchdog_window_resets_mid_cycle() {
    let scenario = Scenario {
        watchdog_ms: "1500",
        probe_timeout_ms: "400",
        probes: vec![Reachable, Unreachable, Unreachable],
        ..Scenario::default()
    };
    let ctx = scenario.context();
    let board = Rc::new(Board::default());
    let mut sup = scenario.supervisor(&ctx, &board);
    start(&mut sup);
    block_on(sup.publish_cycle()).unwrap();

    let report = block_on(sup.wait_cycle());
    assert_eq!(report.feeds, 1);
    assert!(board.expired());

    // the hardware reset lands before the cycle's last probe
    let events = board.events();
    let expired = events.iter().position(|e| *e == Event::Expired).unwrap();
    let last_probe = events.iter().rposition(|e| matches!(e, Event::Probe(_))).unwrap();
    assert!(expired < last_probe);
}

#[test]
fn refused_connection_at_boot_resets_once_without_publishing() {
    let scenario = Scenario {
        refuse_open: true,
        ..Scenario::default()
    };
    let ctx = scenario.context();
    let board = Rc::new(Board::default());
    let mut sup = scenario.supervisor(&ctx, &board);

    let fault = block_on(sup.run());
    assert!(matches!(fault, Fault::Connection(e) if e.cause == SessionError::Tcp));
    assert_eq!(sup.state(), SupervisorState::Faulted);
    assert_eq!(
        board.events(),
        vec![
            Event::Arm(Duration::from_millis(5_000)),
            Event::Open,
            Event::Close,
            Event::Reset
        ]
    );
    assert!(board.sends().is_empty());
}

#[test]
fn publish_failure_mid_run_disconnects_then_resets_once() {
    // the third send is the second cycle's telemetry
    let scenario = Scenario {
        fail_send_at: Some(2),
        ..Scenario::default()
    };
    let ctx = scenario.context();
    let board = Rc::new(Board::default());
    let mut sup = scenario.supervisor(&ctx, &board);

    let fault = block_on(sup.run());
    match fault {
        Fault::Publish(e) => assert_eq!(e.category(), Category::Telemetry),
        other => panic!("unexpected fault {other:?}"),
    }
    assert_eq!(sup.state(), SupervisorState::Faulted);
    assert_eq!(board.count(|e| *e == Event::Reset), 1);
    assert_eq!(board.sends().len(), 2);

    let events = board.events();
    let n = events.len();
    assert_eq!(events[n - 2..], [Event::Close, Event::Reset]);
    assert_eq!(events[n - 3], Event::Feed);
}

#[test]
fn sensor_failure_is_a_fault() {
    let scenario = Scenario {
        environment: Err(SensorError::Bus),
        ..Scenario::default()
    };
    let ctx = scenario.context();
    let board = Rc::new(Board::default());
    let mut sup = scenario.supervisor(&ctx, &board);

    assert_eq!(block_on(sup.run()), Fault::Sensor(SensorError::Bus));
    assert_eq!(board.count(|e| *e == Event::Reset), 1);
}

#[test]
fn published_measurement_parses_back() {
    let scenario = Scenario::default();
    let ctx = scenario.context();
    let board = Rc::new(Board::default());
    let mut sup = scenario.supervisor(&ctx, &board);
    start(&mut sup);
    block_on(sup.publish_cycle()).unwrap();

    let sends = board.sends();
    assert_eq!(
        sends[1],
        "measurement,deviceId=solar-3,deviceType=PicoW,deviceVersion=1.4 temperature=21.0,humidity=50.0"
    );
    let parsed = LineMessage::parse(&sends[1]).unwrap();
    assert_eq!(parsed.category, Category::Measurement);
    assert_eq!(parsed.number("temperature"), Some(21.0));
    assert_eq!(parsed.number("humidity"), Some(50.0));

    let telemetry = LineMessage::parse(&sends[0]).unwrap();
    assert_eq!(telemetry.tag("deviceId"), Some("solar-3"));
    assert_eq!(telemetry.text("MAC_address"), Some("28cdc10e517a"));
    assert_eq!(telemetry.text("IP_address"), Some("192.168.4.17"));
    assert_eq!(telemetry.number("internal_temperature"), Some(26.4));
}
