use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    io,
    net::Ipv4Addr,
    rc::Rc,
};

use crate::{
    http::{FormPost, RegistrationError},
    ports::{Board, Clock, Connection, Indicator, Listener, NetworkInfo, Registrar, SensorReader},
    types::{Reading, SensorError},
};

#[derive(Clone, Default)]
pub(crate) struct FakeClock {
    now: Rc<Cell<i64>>,
    delays: Rc<RefCell<Vec<u32>>>,
}

impl FakeClock {
    pub(crate) fn at(now: i64) -> Self {
        let clock = Self::default();
        clock.now.set(now);
        clock
    }

    pub(crate) fn set(&self, now: i64) {
        self.now.set(now);
    }

    pub(crate) fn delays(&self) -> Vec<u32> {
        self.delays.borrow().clone()
    }
}

impl Clock for FakeClock {
    fn now_secs(&self) -> i64 {
        self.now.get()
    }

    fn delay_ms(&self, ms: u32) {
        self.delays.borrow_mut().push(ms);
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeSensor {
    queued: Rc<RefCell<VecDeque<Result<Reading, SensorError>>>>,
    reads: Rc<Cell<usize>>,
}

impl FakeSensor {
    pub(crate) fn push(&self, result: Result<Reading, SensorError>) {
        self.queued.borrow_mut().push_back(result);
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.get()
    }
}

impl SensorReader for FakeSensor {
    fn read(&mut self) -> Result<Reading, SensorError> {
        self.reads.set(self.reads.get() + 1);
        self.queued
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Reading::new(21.5, 40.0))
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeIndicator {
    history: Rc<RefCell<Vec<bool>>>,
}

impl FakeIndicator {
    pub(crate) fn history(&self) -> Vec<bool> {
        self.history.borrow().clone()
    }
}

impl Indicator for FakeIndicator {
    fn set(&mut self, on: bool) {
        self.history.borrow_mut().push(on);
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeNetwork {
    address: Rc<Cell<Option<Ipv4Addr>>>,
}

impl FakeNetwork {
    pub(crate) fn online(ip: Ipv4Addr) -> Self {
        let network = Self::default();
        network.set(Some(ip));
        network
    }

    pub(crate) fn offline() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self, address: Option<Ipv4Addr>) {
        self.address.set(address);
    }
}

impl NetworkInfo for FakeNetwork {
    fn local_address(&self) -> Option<Ipv4Addr> {
        self.address.get()
    }
}

/// Answers 201 unless told otherwise.
#[derive(Clone, Default)]
pub(crate) struct FakeRegistrar {
    requests: Rc<RefCell<Vec<FormPost>>>,
    responses: Rc<RefCell<VecDeque<Result<u16, RegistrationError>>>>,
}

impl FakeRegistrar {
    pub(crate) fn respond(&self, response: Result<u16, RegistrationError>) {
        self.responses.borrow_mut().push_back(response);
    }

    pub(crate) fn requests(&self) -> Vec<FormPost> {
        self.requests.borrow().clone()
    }
}

impl Registrar for FakeRegistrar {
    fn post_form(&mut self, request: &FormPost) -> Result<u16, RegistrationError> {
        self.requests.borrow_mut().push(request.clone());
        self.responses.borrow_mut().pop_front().unwrap_or(Ok(201))
    }
}

#[derive(Clone)]
pub(crate) struct FakeConnection {
    alive: Rc<Cell<bool>>,
    failing: Rc<Cell<bool>>,
    lines: Rc<RefCell<Vec<String>>>,
    writes_while_closed: Rc<Cell<usize>>,
}

impl FakeConnection {
    pub(crate) fn live() -> Self {
        Self {
            alive: Rc::new(Cell::new(true)),
            failing: Rc::new(Cell::new(false)),
            lines: Rc::default(),
            writes_while_closed: Rc::default(),
        }
    }

    pub(crate) fn hang_up(&self) {
        self.alive.set(false);
    }

    pub(crate) fn fail_writes(&self) {
        self.failing.set(true);
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    pub(crate) fn writes_while_closed(&self) -> usize {
        self.writes_while_closed.get()
    }
}

impl Connection for FakeConnection {
    fn is_connected(&mut self) -> bool {
        self.alive.get()
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        if !self.alive.get() {
            self.writes_while_closed.set(self.writes_while_closed.get() + 1);
            return Err(io::ErrorKind::NotConnected.into());
        }
        if self.failing.get() {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.lines.borrow_mut().push(line.to_string());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeListener {
    pending: Rc<RefCell<VecDeque<FakeConnection>>>,
    accepted: Rc<Cell<usize>>,
}

impl FakeListener {
    pub(crate) fn queue(&self, connection: FakeConnection) {
        self.pending.borrow_mut().push_back(connection);
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    pub(crate) fn accepted(&self) -> usize {
        self.accepted.get()
    }
}

impl Listener for FakeListener {
    type Connection = FakeConnection;

    fn accept(&mut self) -> io::Result<Option<FakeConnection>> {
        let next = self.pending.borrow_mut().pop_front();
        if next.is_some() {
            self.accepted.set(self.accepted.get() + 1);
        }
        Ok(next)
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeBoard {
    pub(crate) clock: FakeClock,
    pub(crate) sensor: FakeSensor,
    pub(crate) indicator: FakeIndicator,
    pub(crate) network: FakeNetwork,
    pub(crate) registrar: FakeRegistrar,
}

impl FakeBoard {
    pub(crate) fn online() -> Self {
        Self {
            network: FakeNetwork::online(Ipv4Addr::new(10, 0, 0, 7)),
            ..Self::default()
        }
    }

    pub(crate) fn board(&self) -> Board {
        Board {
            clock: Box::new(self.clock.clone()),
            sensor: Box::new(self.sensor.clone()),
            indicator: Box::new(self.indicator.clone()),
            network: Box::new(self.network.clone()),
            registrar: Box::new(self.registrar.clone()),
        }
    }
}
