// Shared fake meter for integration tests. Each unit on the fake bus answers with a scripted reply,
// and the bus counts how many sessions are open at once.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    io,
    sync::{
        atomic::{AtomicUsize, Ordering::SeqCst},
        Arc, Mutex,
    },
    time::Duration,
};

use pm3p::modbus::connection::Connect;
use tokio_modbus::{
    client::{Client, Context},
    prelude::{Request, Response},
    slave::{Slave, SlaveContext},
};

pub const NOMINAL: [u16; 10] = [2300, 1000, 0, 5000, 0, 0, 0, 500, 80, 0];

#[derive(Clone, Debug)]
pub enum Reply {
    Registers(Vec<u16>),
    Fail(io::ErrorKind),
    Stall,
}

/// Traffic seen by the bus, in the order it happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusEvent {
    Open,
    Read(u8),
    Close,
}

#[derive(Debug, Default)]
pub struct Counters {
    active: AtomicUsize,
    max_active: AtomicUsize,
    sessions: AtomicUsize,
    requests: AtomicUsize,
    events: Mutex<Vec<BusEvent>>,
}

impl Counters {
    fn record(&self, event: BusEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[derive(Clone, Debug)]
pub struct FakeBus {
    replies: Arc<HashMap<u8, Reply>>,
    counters: Arc<Counters>,
    latency: Duration,
    timeout: Duration,
    refuse: bool,
}

impl FakeBus {
    pub fn healthy() -> Self {
        let replies = (1..=3)
            .map(|unit| (unit, Reply::Registers(NOMINAL.to_vec())))
            .collect();
        Self {
            replies: Arc::new(replies),
            counters: Default::default(),
            latency: Duration::ZERO,
            timeout: Duration::from_millis(100),
            refuse: false,
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::healthy()
        }
    }

    pub fn with_reply(mut self, unit: u8, reply: Reply) -> Self {
        Arc::make_mut(&mut self.replies).insert(unit, reply);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn max_active(&self) -> usize {
        self.counters.max_active.load(SeqCst)
    }

    pub fn active(&self) -> usize {
        self.counters.active.load(SeqCst)
    }

    pub fn sessions(&self) -> usize {
        self.counters.sessions.load(SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.counters.requests.load(SeqCst)
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.counters
            .events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Connect for FakeBus {
    async fn connect(&self) -> pm3p::Result<Context> {
        if self.refuse {
            return Err(pm3p::Error::Session(io::Error::new(
                io::ErrorKind::NotFound,
                "No such file or directory",
            )));
        }

        let active = self.counters.active.fetch_add(1, SeqCst) + 1;
        self.counters.max_active.fetch_max(active, SeqCst);
        self.counters.sessions.fetch_add(1, SeqCst);
        self.counters.record(BusEvent::Open);

        let meter: Box<dyn Client> = Box::new(FakeMeter {
            bus: self.clone(),
            slave: Slave::broadcast(),
        });
        Ok(Context::from(meter))
    }

    fn transaction_timeout(&self) -> Duration {
        self.timeout
    }
}

#[derive(Debug)]
struct FakeMeter {
    bus: FakeBus,
    slave: Slave,
}

impl Drop for FakeMeter {
    fn drop(&mut self) {
        self.bus.counters.record(BusEvent::Close);
        self.bus.counters.active.fetch_sub(1, SeqCst);
    }
}

impl SlaveContext for FakeMeter {
    fn set_slave(&mut self, slave: Slave) {
        self.slave = slave;
    }
}

#[async_trait::async_trait]
impl Client for FakeMeter {
    async fn call(&mut self, request: Request) -> Result<Response, io::Error> {
        match request {
            Request::ReadInputRegisters(0, 10) => {
                self.bus.counters.requests.fetch_add(1, SeqCst);
                self.bus.counters.record(BusEvent::Read(self.slave.0));
                tokio::time::sleep(self.bus.latency).await;

                match self.bus.replies.get(&self.slave.0) {
                    Some(Reply::Registers(words)) => Ok(Response::ReadInputRegisters(words.clone())),
                    Some(Reply::Fail(kind)) => Err(io::Error::new(*kind, "scripted failure")),
                    Some(Reply::Stall) => std::future::pending().await,
                    None => Err(io::Error::new(io::ErrorKind::TimedOut, "no such unit")),
                }
            }
            Request::Disconnect => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "disconnected",
            )),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "meter only serves input registers",
            )),
        }
    }
}
