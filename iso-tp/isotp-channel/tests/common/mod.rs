#![allow(dead_code)]

use std::cell::Cell;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_can::{Frame, Id, StandardId};
use isotp_channel::{
    Channel, Direction, IsoTpConfig, IsoTpError, IsoTpEvents, LinkFrameSink, MicrosClock,
    Progress,
};

pub type TestClock = MicrosClock<Box<dyn Fn() -> u64>>;
pub type TestChannel = Channel<'static, TestClock, Recorder>;

pub fn sid(id: u16) -> Id {
    Id::Standard(StandardId::new(id).unwrap())
}

/// Tester (0x7E0 -> 0x7E8) and ECU (0x7E8 -> 0x7E0) configs.
pub fn pair_cfgs() -> (IsoTpConfig, IsoTpConfig) {
    (
        IsoTpConfig::new(sid(0x7E0), sid(0x7E8)),
        IsoTpConfig::new(sid(0x7E8), sid(0x7E0)),
    )
}

/// Clock reading a hand-driven microsecond counter.
pub fn manual_clock() -> (Rc<Cell<u64>>, TestClock) {
    let time = Rc::new(Cell::new(0));
    (time.clone(), clock_on(&time))
}

pub fn clock_on(time: &Rc<Cell<u64>>) -> TestClock {
    let time = time.clone();
    let source: Box<dyn Fn() -> u64> = Box::new(move || time.get());
    MicrosClock::new(source)
}

pub fn channel(cfg: IsoTpConfig) -> (Rc<Cell<u64>>, TestChannel) {
    let (time, clock) = manual_clock();
    let ch = Channel::new(cfg, clock)
        .unwrap()
        .with_events(Recorder::default());
    (time, ch)
}

/// Sink that records every accepted frame and can be told to refuse.
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Vec<(Id, Vec<u8>)>,
    pub refuse: bool,
    pub delivered: usize,
}

impl RecordingSink {
    /// Frames not yet handed to the peer.
    pub fn undelivered(&mut self) -> Vec<(Id, Vec<u8>)> {
        let out = self.sent[self.delivered..].to_vec();
        self.delivered = self.sent.len();
        out
    }

    /// Frames whose PCI type nibble is `kind` (0 = SF, 1 = FF, 2 = CF, 3 = FC).
    pub fn of_kind(&self, kind: u8) -> Vec<&[u8]> {
        self.sent
            .iter()
            .filter(|(_, data)| data[0] >> 4 == kind)
            .map(|(_, data)| data.as_slice())
            .collect()
    }

    pub fn last(&self) -> &[u8] {
        &self.sent.last().unwrap().1
    }
}

impl LinkFrameSink for RecordingSink {
    type Error = ();

    fn transmit(&mut self, id: Id, data: &[u8]) -> Result<(), ()> {
        if self.refuse {
            return Err(());
        }
        self.sent.push((id, data.to_vec()));
        Ok(())
    }
}

#[derive(Default, Debug)]
pub struct Recorder {
    pub sent: Vec<usize>,
    pub received: Vec<Vec<u8>>,
    pub errors: Vec<(Direction, IsoTpError<Infallible>)>,
}

impl IsoTpEvents for Recorder {
    fn on_send_complete(&mut self, len: usize) {
        self.sent.push(len);
    }

    fn on_receive_complete(&mut self, data: &[u8]) {
        self.received.push(data.to_vec());
    }

    fn on_error(&mut self, direction: Direction, error: IsoTpError<Infallible>) {
        self.errors.push((direction, error));
    }
}

#[derive(Debug, Clone)]
pub struct TestFrame {
    id: Id,
    data: [u8; 64],
    len: usize,
    remote: bool,
}

impl Frame for TestFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > 64 {
            return None;
        }
        let mut buf = [0u8; 64];
        buf[..data.len()].copy_from_slice(data);
        Some(Self {
            id: id.into(),
            data: buf,
            len: data.len(),
            remote: false,
        })
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > 8 {
            return None;
        }
        Some(Self {
            id: id.into(),
            data: [0; 64],
            len: dlc,
            remote: true,
        })
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.len
    }

    fn data(&self) -> &[u8] {
        if self.remote { &[] } else { &self.data[..self.len] }
    }
}

/// Two channels wired back to back, sharing one clock.
pub struct Pair {
    pub time: Rc<Cell<u64>>,
    pub a: TestChannel,
    pub a_sink: RecordingSink,
    pub b: TestChannel,
    pub b_sink: RecordingSink,
}

impl Pair {
    pub fn new(a_cfg: IsoTpConfig, b_cfg: IsoTpConfig) -> Self {
        let time = Rc::new(Cell::new(0));
        let a = Channel::new(a_cfg, clock_on(&time))
            .unwrap()
            .with_events(Recorder::default());
        let b = Channel::new(b_cfg, clock_on(&time))
            .unwrap()
            .with_events(Recorder::default());
        Self {
            time,
            a,
            a_sink: RecordingSink::default(),
            b,
            b_sink: RecordingSink::default(),
        }
    }

    pub fn deliver(&mut self) {
        for (id, data) in self.a_sink.undelivered() {
            self.b.on_frame_data(&mut self.b_sink, id, &data).unwrap();
        }
        for (id, data) in self.b_sink.undelivered() {
            self.a.on_frame_data(&mut self.a_sink, id, &data).unwrap();
        }
    }

    pub fn tick(&mut self) {
        let now = self.time.get();
        self.a.tick(&mut self.a_sink, now);
        self.b.tick(&mut self.b_sink, now);
    }

    /// Pump frames and ticks until `a` finishes its transfer.
    pub fn run(&mut self, step_us: u64, max_steps: usize) -> Progress {
        for _ in 0..max_steps {
            self.deliver();
            self.tick();
            let progress = self.a.tx_progress();
            if matches!(progress, Progress::Completed | Progress::Failed(_)) {
                self.deliver();
                return progress;
            }
            self.time.set(self.time.get() + step_us);
        }
        panic!("transfer did not finish within {max_steps} steps");
    }
}
