//! Supervisor Loop
//!
//! Interleaves the publish cadence with link supervision:
//!
//! 1. Boot: arm the watchdog
//! 2. Connecting: open the broker session, no retry
//! 3. Publishing: send `telemetry` then `measurement`
//! 4. Waiting: `publish_interval` ticks of one second, each probing the broker
//!    and feeding the watchdog only when the probe succeeded
//! 5. back to Publishing
//!
//! Any connect, publish or sensor failure ends in `Faulted`: the session is
//! torn down and the hardware reset is requested exactly once.
//!
//! An unreachable broker never interrupts the wait. It only withholds the
//! feed, so an outage that outlasts the watchdog timeout resets the node while
//! a short one passes unnoticed.

use core::convert::Infallible;

use crate::system::clock::Clock;
use crate::system::config::{Verbosity, TICK};
use crate::system::context::NodeContext;
use crate::system::error::Fault;
use crate::system::state::SupervisorState;
use crate::task::link_health::{LinkHealthMonitor, LinkProbe};
use crate::task::message::TelemetryRecord;
use crate::task::publisher::{BrokerSession, TelemetryPublisher};
use crate::task::sensor::SensorSource;
use crate::task::watchdog::{Watchdog, WatchdogService};

/// Every n-th wait tick reports the tick count instead of a dot
const PROGRESS_EVERY: u32 = 5;

/// Console line printed after a wait tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Silent,
    Dot,
    Count,
    /// Probe result of the tick
    Status,
}

impl Progress {
    fn at(verbosity: Verbosity, tick: u32) -> Self {
        if verbosity.allows(Verbosity::TRACE) {
            Progress::Status
        } else if verbosity == Verbosity::QUIET {
            Progress::Silent
        } else if tick % PROGRESS_EVERY == 0 {
            Progress::Count
        } else {
            Progress::Dot
        }
    }
}

/// Counters of one wait cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WaitReport {
    pub ticks: u32,
    pub feeds: u32,
    pub unreachable: u32,
}

/// The components the supervisor owns exclusively
pub struct Components<S, P, W, T, C> {
    pub session: S,
    pub probe: P,
    pub watchdog: W,
    pub sensors: T,
    pub clock: C,
}

pub struct Supervisor<'a, S, P, W, T, C> {
    ctx: &'a NodeContext,
    publisher: TelemetryPublisher<'a, S>,
    monitor: LinkHealthMonitor<'a, P>,
    watchdog: WatchdogService<W>,
    sensors: T,
    clock: C,
    state: SupervisorState,
    cycles: u32,
}

impl<'a, S, P, W, T, C> Supervisor<'a, S, P, W, T, C>
where
    S: BrokerSession,
    P: LinkProbe,
    W: Watchdog,
    T: SensorSource,
    C: Clock,
{
    pub fn new(ctx: &'a NodeContext, parts: Components<S, P, W, T, C>) -> Self {
        let config = &ctx.config;
        Self {
            ctx,
            publisher: TelemetryPublisher::new(
                parts.session,
                config.broker.topic,
                ctx.identity(),
                config.verbosity,
            ),
            monitor: LinkHealthMonitor::new(parts.probe, config.broker.host, config.broker.port),
            watchdog: WatchdogService::new(parts.watchdog),
            sensors: parts.sensors,
            clock: parts.clock,
            state: SupervisorState::Boot,
            cycles: 0,
        }
    }

    /// Runs the loop until it faults
    ///
    /// The reset has already been requested when this returns; on hardware
    /// it never does.
    pub async fn run(&mut self) -> Fault {
        let fault = match self.supervise().await {
            Ok(never) => match never {},
            Err(fault) => fault,
        };
        self.fail(fault).await;
        fault
    }

    async fn supervise(&mut self) -> Result<Infallible, Fault> {
        self.boot();
        self.connect().await?;
        loop {
            self.publish_cycle().await?;
            let report = self.wait_cycle().await;
            if self.verbose(Verbosity::DETAIL) {
                debug!(
                    "wait cycle done: {} ticks, {} feeds, {} unreachable",
                    report.ticks,
                    report.feeds,
                    report.unreachable
                );
            }
        }
    }

    /// Arms the watchdog; the countdown runs from here on
    pub fn boot(&mut self) {
        self.watchdog.arm(self.ctx.config.watchdog_timeout);
        self.transition(SupervisorState::Connecting);
    }

    /// Opens the broker session
    pub async fn connect(&mut self) -> Result<(), Fault> {
        self.publisher.connect().await?;
        self.transition(SupervisorState::Publishing);
        Ok(())
    }

    /// Reads the sensors and sends both records
    pub async fn publish_cycle(&mut self) -> Result<(), Fault> {
        self.cycles = self.cycles.wrapping_add(1);

        let internal_temperature = self.sensors.internal_temperature().await?;
        let uptime = self.ctx.uptime(self.clock.now());
        if self.verbose(Verbosity::INFO) {
            info!(
                "cycle {}: uptime {}s, internal temperature {}",
                self.cycles,
                uptime.as_secs(),
                internal_temperature
            );
        }
        let node = TelemetryRecord::Node {
            uptime,
            internal_temperature,
            mac: self.ctx.network.mac,
            ip: self.ctx.network.ip,
        };
        self.publisher.publish(&node).await?;

        let measurements = self.sensors.measurements().await?;
        if self.verbose(Verbosity::INFO) {
            info!(
                "temperature {} C, humidity {} %",
                measurements.temperature,
                measurements.humidity
            );
        }
        self.publisher
            .publish(&TelemetryRecord::Measurement(measurements))
            .await?;

        self.transition(SupervisorState::Waiting);
        Ok(())
    }

    /// Ticks through one publish interval
    ///
    /// Each tick sleeps, probes the broker and feeds the watchdog only on a
    /// reachable result. Always runs to the end of the interval.
    pub async fn wait_cycle(&mut self) -> WaitReport {
        let ticks = self.ctx.config.publish_interval;
        let mut report = WaitReport::default();

        for tick in 1..=ticks {
            self.clock.sleep(TICK).await;
            let check = self.monitor.check(&self.clock).await;
            report.ticks += 1;

            if check.status.is_reachable() {
                self.watchdog.feed();
                report.feeds += 1;
            } else {
                report.unreachable += 1;
                if self.verbose(Verbosity::INFO) {
                    warn!("broker unreachable, watchdog not fed");
                }
            }

            // Runtime verbosity is the filter; none of these sit below DEFMT_LOG
            match Progress::at(self.ctx.config.verbosity, tick) {
                Progress::Silent => {}
                Progress::Dot => info!("."),
                Progress::Count => info!("{}", tick),
                Progress::Status => debug!("tick {}/{}: {}", tick, ticks, check.status),
            }
        }

        self.transition(SupervisorState::Publishing);
        report
    }

    /// Terminal path: tear down, then reset
    async fn fail(&mut self, fault: Fault) {
        if self.state.is_terminal() {
            return;
        }
        error!("supervisor fault: {}", fault);
        self.transition(SupervisorState::Faulted);
        self.publisher.disconnect().await;
        self.watchdog.trigger_reset();
    }

    fn transition(&mut self, next: SupervisorState) {
        if self.verbose(Verbosity::DETAIL) {
            debug!("{} -> {}", self.state, next);
        }
        self.state.set(next);
    }

    fn verbose(&self, level: Verbosity) -> bool {
        self.ctx.config.verbosity.allows(level)
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Completed or started publish cycles since boot
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn watchdog(&self) -> &WatchdogService<W> {
        &self.watchdog
    }

    pub fn publisher(&self) -> &TelemetryPublisher<'a, S> {
        &self.publisher
    }

    pub fn monitor(&self) -> &LinkHealthMonitor<'a, P> {
        &self.monitor
    }
}
