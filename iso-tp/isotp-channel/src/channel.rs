//! One ISO-TP conversation: a transmit and a receive state machine sharing a pair of identifiers.

use core::convert::Infallible;

use embedded_can::{Frame, Id};

use crate::config::IsoTpConfig;
use crate::errors::IsoTpError;
use crate::flow::{FlowControlState, RxFlowControl};
use crate::link::LinkFrameSink;
use crate::pdu::{Pdu, classify, encode};
use crate::rx::{RxMachine, RxOutcome, RxState};
use crate::storage::Storage;
use crate::timer::Clock;
use crate::tx::{Progress, TxEvent, TxMachine};

/// Which half of the channel an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Transmit side.
    Send,
    /// Receive side.
    Receive,
}

/// Completion and error hooks, invoked synchronously at the transition that triggers them.
///
/// Every method defaults to a no-op. `on_receive_complete` may run from the inbound-frame path
/// (possibly interrupt context), so implementations must not block.
pub trait IsoTpEvents {
    /// A `len`-byte message has been fully transmitted.
    fn on_send_complete(&mut self, _len: usize) {}
    /// A message has been fully reassembled; it stays available to [`Channel::receive`].
    fn on_receive_complete(&mut self, _data: &[u8]) {}
    /// A transfer was aborted.
    fn on_error(&mut self, _direction: Direction, _error: IsoTpError<Infallible>) {}
}

impl IsoTpEvents for () {}

/// ISO-TP endpoint for one (`tx_id`, `rx_id`) pair.
///
/// The channel owns its buffers and both state machines; the link is borrowed per call through a
/// [`LinkFrameSink`]. It carries at most one outbound and one inbound message at a time, tracked
/// independently.
///
/// Two call paths drive it: [`Channel::on_frame`] for every inbound frame, and
/// [`Channel::tick`] on a periodic cadence (5–10 ms is typical; STmin is never undercut, but
/// coarse ticks stretch it). Neither blocks nor allocates. Both take `&mut self`, so the two paths
/// cannot overlap on one channel; when frames arrive in an interrupt handler, put the channel
/// behind whatever lock the platform offers (a critical-section mutex, or masking the CAN
/// interrupt around `tick`).
pub struct Channel<'a, C: Clock, E = ()> {
    cfg: IsoTpConfig,
    clock: C,
    rx_flow_control: RxFlowControl,
    tx: TxMachine<'a, C::Instant>,
    rx: RxMachine<'a, C::Instant>,
    events: E,
}

impl<C: Clock> Channel<'static, C> {
    /// Validate `cfg` and allocate the transmit and receive buffers.
    ///
    /// Allocation failure is reported as [`IsoTpError::AllocFailed`].
    pub fn new(cfg: IsoTpConfig, clock: C) -> Result<Self, IsoTpError<()>> {
        cfg.validate().map_err(|_| IsoTpError::InvalidConfig)?;
        let tx = Storage::allocate(cfg.tx_capacity)?;
        let rx = Storage::allocate(cfg.rx_capacity)?;
        Self::with_storage(cfg, clock, tx, rx)
    }
}

impl<'a, C: Clock> Channel<'a, C> {
    /// Validate `cfg` and use caller-provided buffers.
    ///
    /// Each buffer must hold at least the configured capacity.
    pub fn with_storage(
        cfg: IsoTpConfig,
        clock: C,
        tx_storage: Storage<'a>,
        rx_storage: Storage<'a>,
    ) -> Result<Self, IsoTpError<()>> {
        cfg.validate().map_err(|_| IsoTpError::InvalidConfig)?;
        if tx_storage.capacity() < cfg.tx_capacity || rx_storage.capacity() < cfg.rx_capacity {
            return Err(IsoTpError::InvalidConfig);
        }
        tracing::debug!(
            tx_id = ?cfg.tx_id,
            rx_id = ?cfg.rx_id,
            tx_capacity = cfg.tx_capacity,
            rx_capacity = cfg.rx_capacity,
            "channel created"
        );
        Ok(Self {
            rx_flow_control: RxFlowControl::from_config(&cfg),
            tx: TxMachine::new(tx_storage, cfg.tx_capacity),
            rx: RxMachine::new(rx_storage, cfg.rx_capacity),
            cfg,
            clock,
            events: (),
        })
    }
}

impl<'a, C: Clock, E: IsoTpEvents> Channel<'a, C, E> {
    /// Install completion/error hooks.
    pub fn with_events<E2: IsoTpEvents>(self, events: E2) -> Channel<'a, C, E2> {
        Channel {
            cfg: self.cfg,
            clock: self.clock,
            rx_flow_control: self.rx_flow_control,
            tx: self.tx,
            rx: self.rx,
            events,
        }
    }

    /// The installed hooks.
    pub fn events(&self) -> &E {
        &self.events
    }

    /// Mutable access to the installed hooks.
    pub fn events_mut(&mut self) -> &mut E {
        &mut self.events
    }

    /// Configuration the channel was created with.
    pub fn config(&self) -> &IsoTpConfig {
        &self.cfg
    }

    /// Get the current receive-side FlowControl parameters (BS/STmin).
    pub fn rx_flow_control(&self) -> RxFlowControl {
        self.rx_flow_control
    }

    /// Update receive-side FlowControl parameters (BS/STmin).
    ///
    /// Takes effect at the next FlowControl frame the channel emits, including block boundaries
    /// of a reception already in progress.
    pub fn set_rx_flow_control(&mut self, fc: RxFlowControl) {
        self.rx_flow_control = fc;
    }

    /// Begin transmitting `payload`.
    ///
    /// Single-frame payloads are on the link when this returns. Longer payloads send their First
    /// Frame now and the rest from [`Channel::tick`]. Fails with `Busy` while a transfer is in
    /// flight, `InvalidArgument` for an empty payload and `TooLarge` beyond `tx_capacity`.
    pub fn send<S: LinkFrameSink>(
        &mut self,
        sink: &mut S,
        payload: &[u8],
    ) -> Result<(), IsoTpError<S::Error>> {
        let id = self.cfg.tx_id;
        self.start_send(sink, id, payload)
    }

    /// Like [`Channel::send`], but every frame of the message carries `id` instead of `tx_id`.
    ///
    /// FlowControl for a segmented message is still expected on `rx_id`.
    pub fn send_with_id<S: LinkFrameSink>(
        &mut self,
        sink: &mut S,
        id: impl Into<Id>,
        payload: &[u8],
    ) -> Result<(), IsoTpError<S::Error>> {
        self.start_send(sink, id.into(), payload)
    }

    fn start_send<S: LinkFrameSink>(
        &mut self,
        sink: &mut S,
        id: Id,
        payload: &[u8],
    ) -> Result<(), IsoTpError<S::Error>> {
        let now = self.clock.now();
        let event = self
            .tx
            .start(&self.cfg, &self.clock, sink, id, payload, now)?;
        self.dispatch_tx(event);
        Ok(())
    }

    /// Abandon the outbound transfer in flight, if any.
    pub fn abort_send(&mut self) {
        self.tx.abort();
    }

    /// Feed one inbound CAN frame.
    ///
    /// Frames with an identifier other than `rx_id`, remote frames and malformed frames are
    /// ignored. Transmits at most one FlowControl frame; an error is returned only if that
    /// transmit fails (it is retried from `tick` until N_Ar expires).
    pub fn on_frame<S, F>(&mut self, sink: &mut S, frame: &F) -> Result<(), IsoTpError<S::Error>>
    where
        S: LinkFrameSink,
        F: Frame,
    {
        if frame.is_remote_frame() {
            return Ok(());
        }
        self.on_frame_data(sink, frame.id(), frame.data())
    }

    /// Feed one inbound frame given as identifier and payload bytes.
    pub fn on_frame_data<S: LinkFrameSink>(
        &mut self,
        sink: &mut S,
        id: Id,
        data: &[u8],
    ) -> Result<(), IsoTpError<S::Error>> {
        if id != self.cfg.rx_id {
            return Ok(());
        }
        let now = self.clock.now();
        match classify(data) {
            Pdu::FlowControl {
                status,
                block_size,
                st_min,
            } => {
                let fc = FlowControlState::from_peer(status, block_size, st_min);
                let event = self.tx.on_flow_control(&self.cfg, &self.clock, fc, now);
                self.dispatch_tx(event);
                Ok(())
            }
            Pdu::Invalid => {
                tracing::trace!(len = data.len(), "malformed frame ignored");
                Ok(())
            }
            pdu => {
                let outcome =
                    self.rx
                        .on_pdu(&self.cfg, &self.clock, &self.rx_flow_control, pdu, now);
                self.handle_rx_outcome(sink, outcome, now)
            }
        }
    }

    /// Advance timers and drive pending segmentation at time `now`.
    ///
    /// Retries a deferred FlowControl, expires N_Ar/N_Cr on the receive side, expires N_Bs/N_Cs
    /// and sends at most one Consecutive Frame on the transmit side. Returns the transmit
    /// progress afterwards.
    pub fn tick<S: LinkFrameSink>(&mut self, sink: &mut S, now: C::Instant) -> Progress {
        if let Some(fc) = self.rx.pending_flow_control()
            && self.transmit_flow_control(sink, fc).is_ok()
        {
            let deadline = self.clock.add(now, self.cfg.n_cr);
            self.rx.flow_control_sent(deadline);
        }
        if let Some(err) = self.rx.on_tick(now) {
            self.events.on_error(Direction::Receive, err);
        }

        let event = self.tx.on_tick(&self.cfg, &self.clock, sink, now);
        self.dispatch_tx(event);
        self.tx.progress()
    }

    /// [`Channel::tick`] at the channel clock's current time.
    pub fn poll<S: LinkFrameSink>(&mut self, sink: &mut S) -> Progress {
        let now = self.clock.now();
        self.tick(sink, now)
    }

    /// Collect a completed inbound message into `out`, returning its length.
    ///
    /// - `WouldBlock`: nothing complete yet.
    /// - `BufferTooSmall`: `out` cannot hold the message; it is kept for a retry.
    /// - any other error: the last reception was aborted for that reason; the channel is idle
    ///   again.
    ///
    /// Partial messages are never returned.
    pub fn receive(&mut self, out: &mut [u8]) -> Result<usize, IsoTpError<Infallible>> {
        self.rx.take(out)
    }

    /// Progress of the current (or last) outbound transfer.
    pub fn tx_progress(&self) -> Progress {
        self.tx.progress()
    }

    /// State of the receive side.
    pub fn rx_state(&self) -> RxState {
        self.rx.state()
    }

    fn handle_rx_outcome<S: LinkFrameSink>(
        &mut self,
        sink: &mut S,
        outcome: RxOutcome,
        now: C::Instant,
    ) -> Result<(), IsoTpError<S::Error>> {
        match outcome {
            RxOutcome::None => Ok(()),
            RxOutcome::SendFlowControl(fc) => {
                let sent = self.transmit_flow_control(sink, fc);
                if sent.is_err() {
                    let deadline = self.clock.add(now, self.cfg.n_ar);
                    self.rx.defer_flow_control(fc, deadline);
                }
                sent
            }
            RxOutcome::Rejected(fc) => {
                self.events
                    .on_error(Direction::Receive, IsoTpError::Overflow);
                self.transmit_flow_control(sink, fc)
            }
            RxOutcome::Completed(_) => {
                self.events.on_receive_complete(self.rx.completed());
                Ok(())
            }
            RxOutcome::Aborted(err) => {
                self.events.on_error(Direction::Receive, err);
                Ok(())
            }
        }
    }

    fn transmit_flow_control<S: LinkFrameSink>(
        &mut self,
        sink: &mut S,
        fc: FlowControlState,
    ) -> Result<(), IsoTpError<S::Error>> {
        let pdu = Pdu::FlowControl {
            status: fc.status,
            block_size: fc.block_size,
            st_min: fc.st_min_raw(),
        };
        let frame = encode(&pdu, self.cfg.frame_len, self.cfg.padding)
            .map_err(|_| IsoTpError::InvalidFrame)?;
        tracing::trace!(status = ?fc.status, block_size = fc.block_size, "flow control sent");
        sink.transmit(self.cfg.tx_id, frame.as_bytes())
            .map_err(IsoTpError::Link)
    }

    fn dispatch_tx(&mut self, event: Option<TxEvent>) {
        match event {
            Some(TxEvent::Completed(len)) => self.events.on_send_complete(len),
            Some(TxEvent::Aborted(err)) => self.events.on_error(Direction::Send, err),
            None => {}
        }
    }
}
