use log::{info, warn};

use crate::{
    config::NodeConfig,
    identity::{DeviceIdentity, NameInbox},
    liveness::{LivenessTask, PingReport},
    ports::{Board, Connection, Listener},
    registration::{RegistrationOutcome, RegistrationTask},
    status::{StatusOutcome, StatusTask},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Serving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TickReport {
    pub transition: Option<Transition>,
    pub status: Option<StatusOutcome>,
    pub ping: Option<PingReport>,
    pub registration: RegistrationOutcome,
}

pub struct ConnectionLoop<L: Listener> {
    listener: L,
    board: Board,
    identity: DeviceIdentity,
    names: NameInbox,
    session: Option<L::Connection>,
    status: StatusTask,
    liveness: LivenessTask,
    registration: RegistrationTask,
    tick_interval_ms: u32,
}

impl<L: Listener> ConnectionLoop<L> {
    pub fn new(config: &NodeConfig, listener: L, board: Board, names: NameInbox) -> Self {
        Self {
            listener,
            board,
            identity: DeviceIdentity::new(),
            names,
            session: None,
            status: StatusTask::new(
                config.status_interval_secs,
                config.gating,
                config.indicator_settle_ms,
            ),
            liveness: LivenessTask::new(
                config.ping_interval_secs,
                config.gating,
                &config.firmware_version,
                config.server_port,
            ),
            registration: RegistrationTask::new(config),
            tick_interval_ms: config.tick_interval_ms,
        }
    }

    pub fn state(&self) -> LoopState {
        if self.session.is_some() {
            LoopState::Serving
        } else {
            LoopState::Idle
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn tick(&mut self) -> TickReport {
        // External events only ever land here, between tasks.
        self.names.apply_to(&mut self.identity);

        let mut report = TickReport::default();
        let now = self.board.clock.now_secs();

        if self.session.is_none() {
            self.accept(now, &mut report);
        }

        let mut lost = false;
        if let Some(connection) = self.session.as_mut() {
            if connection.is_connected() {
                let outcome = self.status.run(
                    now,
                    self.board.clock.as_ref(),
                    self.board.sensor.as_mut(),
                    self.board.indicator.as_mut(),
                    connection,
                );
                lost = matches!(outcome, Some(StatusOutcome::WriteFailed(_)));
                report.status = outcome;
            } else {
                lost = true;
            }
        }
        if lost {
            self.session = None;
            info!("Client disconnected.");
            report.transition = Some(Transition::Disconnected);
        }

        let connected = self.session.is_some();
        report.ping = self.liveness.run(
            now,
            &self.identity,
            self.board.network.as_ref(),
            connected,
        );
        report.registration = self.registration.run(
            now,
            &self.identity,
            self.board.network.as_ref(),
            self.board.registrar.as_mut(),
        );

        report
    }

    pub fn run(mut self) -> ! {
        info!(
            "scheduler running, tick every {} ms",
            self.tick_interval_ms
        );
        loop {
            self.tick();
            self.board.clock.delay_ms(self.tick_interval_ms);
        }
    }

    fn accept(&mut self, now: i64, report: &mut TickReport) {
        match self.listener.accept() {
            Ok(Some(mut connection)) => {
                if !connection.is_connected() {
                    return;
                }
                match connection.peer() {
                    Some(peer) => info!("Client connected. ({peer})"),
                    None => info!("Client connected."),
                }
                self.status.rearm(now);
                self.session = Some(connection);
                report.transition = Some(Transition::Connected);
            }
            Ok(None) => {}
            Err(err) => warn!("accept failed: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        identity::{name_channel, NameAnnouncer},
        periodic::GateMode,
        testing::{FakeBoard, FakeConnection, FakeListener},
        types::SensorError,
    };

    struct Harness {
        fakes: FakeBoard,
        listener: FakeListener,
        announcer: NameAnnouncer,
        node: ConnectionLoop<FakeListener>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(&NodeConfig::default())
        }

        fn with_config(config: &NodeConfig) -> Self {
            let fakes = FakeBoard::online();
            let listener = FakeListener::default();
            let (announcer, inbox) = name_channel();
            let node = ConnectionLoop::new(
                config,
                listener.clone(),
                fakes.board(),
                inbox,
            );
            Self {
                fakes,
                listener,
                announcer,
                node,
            }
        }

        fn tick_at(&mut self, now: i64) -> TickReport {
            self.fakes.clock.set(now);
            self.node.tick()
        }

        fn connect(&self) -> FakeConnection {
            let connection = FakeConnection::live();
            self.listener.queue(connection.clone());
            connection
        }
    }

    #[test]
    fn status_lines_follow_the_interval_from_connect() {
        let mut harness = Harness::new();
        let client = harness.connect();

        let mut sent_at = Vec::new();
        for now in 0..=12 {
            let report = harness.tick_at(now);
            if now == 0 {
                assert_eq!(report.transition, Some(Transition::Connected));
            }
            if let Some(StatusOutcome::Sent(_)) = report.status {
                sent_at.push(now);
            }
        }

        assert_eq!(sent_at, vec![5, 10]);
        assert_eq!(client.lines().len(), 2);
        assert_eq!(client.lines()[0], "temp:21.50\thumidity:40.00");
    }

    #[test]
    fn one_transition_each_way_per_session() {
        let mut harness = Harness::new();
        let client = harness.connect();

        let mut transitions = Vec::new();
        for now in 0..40 {
            if now == 17 {
                client.hang_up();
            }
            if let Some(transition) = harness.tick_at(now).transition {
                transitions.push((now, transition));
            }
        }

        assert_eq!(
            transitions,
            vec![(0, Transition::Connected), (17, Transition::Disconnected)]
        );
        assert_eq!(harness.node.state(), LoopState::Idle);
    }

    #[test]
    fn no_status_after_mid_interval_disconnect() {
        let mut harness = Harness::new();
        let client = harness.connect();

        harness.tick_at(0);
        harness.tick_at(1);
        client.hang_up();

        for now in 2..30 {
            let report = harness.tick_at(now);
            assert_eq!(report.status, None, "status fired at {now}");
        }
        assert!(client.lines().is_empty());
        assert_eq!(client.writes_while_closed(), 0);
        assert_eq!(harness.fakes.sensor.reads(), 0);
    }

    #[test]
    fn status_only_runs_while_serving() {
        let mut harness = Harness::new();
        for now in 0..60 {
            assert_eq!(harness.tick_at(now).status, None);
            assert_eq!(harness.node.state(), LoopState::Idle);
        }
        assert!(harness.fakes.indicator.history().is_empty());
    }

    #[test]
    fn second_client_waits_until_the_first_leaves() {
        let mut harness = Harness::new();
        let first = harness.connect();
        let second = harness.connect();

        for now in 0..10 {
            harness.tick_at(now);
        }
        assert_eq!(harness.listener.accepted(), 1);
        assert_eq!(harness.listener.pending(), 1);

        first.hang_up();
        assert_eq!(
            harness.tick_at(10).transition,
            Some(Transition::Disconnected)
        );
        assert_eq!(harness.tick_at(11).transition, Some(Transition::Connected));

        for now in 12..=16 {
            harness.tick_at(now);
        }
        assert_eq!(first.lines().len(), 1);
        assert_eq!(second.lines().len(), 1);
    }

    #[test]
    fn write_failure_ends_the_session() {
        let mut harness = Harness::new();
        let client = harness.connect();
        client.fail_writes();

        for now in 0..5 {
            harness.tick_at(now);
        }
        let report = harness.tick_at(5);
        assert!(matches!(report.status, Some(StatusOutcome::WriteFailed(_))));
        assert_eq!(report.transition, Some(Transition::Disconnected));
        assert_eq!(harness.node.state(), LoopState::Idle);
    }

    #[test]
    fn sensor_failure_keeps_the_session() {
        let mut harness = Harness::new();
        let client = harness.connect();
        harness.fakes.sensor.push(Err(SensorError::Checksum));

        for now in 0..=10 {
            harness.tick_at(now);
        }
        assert_eq!(harness.node.state(), LoopState::Serving);
        assert_eq!(client.lines().len(), 1);
    }

    #[test]
    fn registration_waits_for_the_name_then_keeps_cadence() {
        let mut harness = Harness::new();

        for now in 0..100 {
            assert_eq!(
                harness.tick_at(now).registration,
                RegistrationOutcome::AwaitingName
            );
        }
        assert!(harness.fakes.registrar.requests().is_empty());

        harness.announcer.announce("sensor-1");
        let mut posted_at = Vec::new();
        for now in 100..=165 {
            if let RegistrationOutcome::Registered { .. } = harness.tick_at(now).registration {
                posted_at.push(now);
            }
        }
        assert_eq!(posted_at, vec![130, 160]);
        assert_eq!(harness.node.identity().name(), Some("sensor-1"));
    }

    #[test]
    fn registration_keeps_running_while_serving() {
        let mut harness = Harness::new();
        harness.announcer.announce("sensor-1");
        harness.connect();

        let mut posted_at = Vec::new();
        for now in 0..=61 {
            let report = harness.tick_at(now);
            assert_eq!(harness.node.state(), LoopState::Serving);
            if let RegistrationOutcome::Registered { .. } = report.registration {
                posted_at.push(now);
            }
        }
        assert_eq!(posted_at, vec![30, 60]);
    }

    #[test]
    fn pings_report_connection_state() {
        let mut harness = Harness::new();
        harness.announcer.announce("porch");

        let idle_ping = (0..=10)
            .filter_map(|now| harness.tick_at(now).ping)
            .last()
            .expect("ping after ten seconds");
        assert!(!idle_ping.client_connected);
        assert_eq!(idle_ping.device, "porch");

        harness.connect();
        let serving_ping = (11..=20)
            .filter_map(|now| harness.tick_at(now).ping)
            .last()
            .expect("ping after twenty seconds");
        assert!(serving_ping.client_connected);
        assert_eq!(serving_ping.ip_label(), "10.0.0.7");
    }

    #[test]
    fn name_changes_apply_between_ticks() {
        let mut harness = Harness::new();
        harness.announcer.announce("first");
        harness.tick_at(0);

        harness.announcer.announce("second");
        assert_eq!(harness.node.identity().name(), Some("first"));
        harness.tick_at(1);
        assert_eq!(harness.node.identity().name(), Some("second"));

        for now in 2..=30 {
            harness.tick_at(now);
        }
        let requests = harness.fakes.registrar.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].body.starts_with("name=second&"));
    }

    fn tick_gated() -> Harness {
        Harness::with_config(&NodeConfig {
            gating: GateMode::Ticks { tick_rate_hz: 1 },
            ..NodeConfig::default()
        })
    }

    #[test]
    fn tick_gated_loop_waits_for_counter_and_clock() {
        let mut harness = tick_gated();
        harness.announcer.announce("sensor-1");
        harness.connect();

        let mut status_at = Vec::new();
        let mut registered_at = Vec::new();
        for now in 0..=63 {
            let report = harness.tick_at(now);
            if let Some(StatusOutcome::Sent(_)) = report.status {
                status_at.push(now);
            }
            if let RegistrationOutcome::Registered { .. } = report.registration {
                registered_at.push(now);
            }
        }

        // Threshold of interval * 1 Hz polls, then the clock must be past due.
        assert_eq!(status_at, vec![6, 13, 20, 27, 34, 41, 48, 55, 62]);
        assert_eq!(registered_at, vec![31, 63]);
    }

    #[test]
    fn tick_gated_status_restarts_its_count_when_the_clock_lags() {
        let mut harness = tick_gated();
        let client = harness.connect();
        for now in 0..=6 {
            harness.tick_at(now);
        }
        assert_eq!(client.lines().len(), 1);

        // The loop outruns the clock: seven polls inside second 7, next due at 11.
        for _ in 0..7 {
            assert_eq!(harness.tick_at(7).status, None);
        }

        // The counter was dropped on the seventh poll, so it has to climb past
        // the threshold again even though the clock is now past due.
        let mut fired_on_poll = None;
        for poll in 1..=10 {
            if harness.tick_at(12).status.is_some() {
                fired_on_poll = Some(poll);
                break;
            }
        }
        assert_eq!(fired_on_poll, Some(7));
    }
}
