//! Transmit-side segmentation and pacing.

use core::convert::Infallible;
use core::mem;
use core::time::Duration;

use embedded_can::Id;

use crate::config::IsoTpConfig;
use crate::errors::{IsoTpError, TimeoutKind};
use crate::flow::FlowControlState;
use crate::link::LinkFrameSink;
use crate::pdu::{FlowStatus, Pdu, encode};
use crate::storage::Storage;
use crate::timer::Clock;

/// Progress indicator for the transmit side.
///
/// Reported by [`crate::Channel::tick`] and [`crate::Channel::tx_progress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// No transfer has been started.
    Idle,
    /// Consecutive Frames are being sent.
    InFlight,
    /// Waiting for a flow control frame.
    WaitingForFlowControl,
    /// The link refused the last Consecutive Frame; it is retried on the next tick.
    WouldBlock,
    /// Transfer finished.
    Completed,
    /// Transfer aborted.
    Failed(IsoTpError<Infallible>),
}

/// Transition worth reporting to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEvent {
    /// Every byte of a `len`-byte message is on the link.
    Completed(usize),
    /// The transfer was aborted.
    Aborted(IsoTpError<Infallible>),
}

/// Bookkeeping for an in-flight segmented transfer.
#[derive(Debug)]
pub struct TxSession<I> {
    /// Identifier the transfer is sent with.
    pub tx_id: Id,
    /// Full payload length.
    pub payload_len: usize,
    /// Current offset into payload.
    pub offset: usize,
    /// Next sequence number nibble.
    pub next_sn: u8,
    /// Block size granted by the receiver (0 = unlimited).
    pub block_size: u8,
    /// Frames remaining before next FC.
    pub block_remaining: u8,
    /// Separation time between CFs.
    pub st_min: Duration,
    /// Count of Wait responses seen in a row.
    pub wait_count: u8,
    /// When the last CF went out; the next one waits for the current STmin from here.
    pub last_cf_at: Option<I>,
    /// When the link first refused the pending CF.
    pub stalled_since: Option<I>,
}

impl<I> TxSession<I> {
    /// Build a new session for a `payload_len`-byte message.
    pub fn new(tx_id: Id, payload_len: usize) -> Self {
        Self {
            tx_id,
            payload_len,
            offset: 0,
            next_sn: 1,
            block_size: 0,
            block_remaining: 0,
            st_min: Duration::ZERO,
            wait_count: 0,
            last_cf_at: None,
            stalled_since: None,
        }
    }
}

/// Transmit state.
#[derive(Debug)]
pub enum TxState<I> {
    /// No active transfer.
    Idle,
    /// Sent First Frame (or finished a block); waiting for FC until deadline (N_Bs).
    WaitingForFc { session: TxSession<I>, deadline: I },
    /// Sending consecutive frames of the current block.
    Sending { session: TxSession<I> },
    /// Last message fully sent.
    Done { len: usize },
    /// Last message aborted.
    Failed(IsoTpError<Infallible>),
}

/// Transmit state machine.
///
/// [`TxMachine::start`] puts the Single or First Frame on the link right away; Consecutive Frames
/// go out one per [`TxMachine::on_tick`], gated by the FlowControl state delivered through
/// [`TxMachine::on_flow_control`].
pub struct TxMachine<'a, I> {
    state: TxState<I>,
    buffer: Storage<'a>,
    capacity: usize,
}

impl<'a, I: Copy + PartialOrd> TxMachine<'a, I> {
    /// Create a machine copying outbound payloads into `buffer`, up to `capacity` bytes.
    pub fn new(buffer: Storage<'a>, capacity: usize) -> Self {
        let capacity = capacity.min(buffer.capacity());
        Self {
            state: TxState::Idle,
            buffer,
            capacity,
        }
    }

    /// Current state.
    pub fn state(&self) -> &TxState<I> {
        &self.state
    }

    /// Largest payload accepted by [`TxMachine::start`].
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Progress of the current (or last) transfer.
    pub fn progress(&self) -> Progress {
        match &self.state {
            TxState::Idle => Progress::Idle,
            TxState::WaitingForFc { .. } => Progress::WaitingForFlowControl,
            TxState::Sending { session } => match session.stalled_since {
                Some(_) => Progress::WouldBlock,
                None => Progress::InFlight,
            },
            TxState::Done { .. } => Progress::Completed,
            TxState::Failed(err) => Progress::Failed(*err),
        }
    }

    /// Whether a transfer is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(
            self.state,
            TxState::WaitingForFc { .. } | TxState::Sending { .. }
        )
    }

    /// Drop the in-flight transfer, if any.
    pub fn abort(&mut self) {
        if self.is_busy() {
            tracing::debug!("transmission abandoned");
            self.state = TxState::Idle;
        }
    }

    /// Begin sending `payload` with identifier `tx_id`.
    ///
    /// Rejected with `Busy` while a transfer is in flight. On a link error nothing is sent and the
    /// machine stays as it was.
    pub fn start<C, S>(
        &mut self,
        cfg: &IsoTpConfig,
        clock: &C,
        sink: &mut S,
        tx_id: Id,
        payload: &[u8],
        now: I,
    ) -> Result<Option<TxEvent>, IsoTpError<S::Error>>
    where
        C: Clock<Instant = I>,
        S: LinkFrameSink,
    {
        if self.is_busy() {
            return Err(IsoTpError::Busy);
        }
        if payload.is_empty() {
            return Err(IsoTpError::InvalidArgument);
        }
        if payload.len() > self.capacity {
            return Err(IsoTpError::TooLarge {
                len: payload.len(),
                capacity: self.capacity,
            });
        }

        if payload.len() <= cfg.max_single_frame_payload() {
            let pdu = Pdu::SingleFrame {
                len: payload.len() as u8,
                data: payload,
            };
            transmit(cfg, sink, tx_id, &pdu)?;
            tracing::debug!(len = payload.len(), "single frame sent");
            self.state = TxState::Done { len: payload.len() };
            return Ok(Some(TxEvent::Completed(payload.len())));
        }

        let len = payload.len();
        let total = u32::try_from(len).map_err(|_| IsoTpError::TooLarge {
            len,
            capacity: self.capacity,
        })?;
        let chunk = len.min(cfg.max_first_frame_payload(len));
        let pdu = Pdu::FirstFrame {
            len: total,
            data: &payload[..chunk],
        };
        transmit(cfg, sink, tx_id, &pdu)?;

        self.buffer.as_mut()[..len].copy_from_slice(payload);
        let mut session = TxSession::new(tx_id, len);
        session.offset = chunk;
        let deadline = clock.add(now, cfg.n_bs);
        tracing::debug!(len, first_chunk = chunk, "first frame sent");
        self.state = TxState::WaitingForFc { session, deadline };
        Ok(None)
    }

    /// Apply a FlowControl frame from the receiver.
    ///
    /// Only meaningful while waiting for one; ignored otherwise.
    pub fn on_flow_control<C>(
        &mut self,
        cfg: &IsoTpConfig,
        clock: &C,
        fc: FlowControlState,
        now: I,
    ) -> Option<TxEvent>
    where
        C: Clock<Instant = I>,
    {
        let mut session = match mem::replace(&mut self.state, TxState::Idle) {
            TxState::WaitingForFc { session, .. } => session,
            other => {
                tracing::trace!(status = ?fc.status, "flow control ignored, not waiting for one");
                self.state = other;
                return None;
            }
        };

        match fc.status {
            FlowStatus::ClearToSend => {
                session.wait_count = 0;
                session.block_size = fc.block_size;
                session.block_remaining = fc.block_size;
                session.st_min = fc.st_min;
                tracing::trace!(block_size = fc.block_size, st_min = ?fc.st_min, "clear to send");
                self.state = TxState::Sending { session };
                None
            }
            FlowStatus::Wait => {
                session.wait_count = session.wait_count.saturating_add(1);
                if let Some(max) = cfg.wft_max
                    && session.wait_count > max
                {
                    tracing::warn!(waits = session.wait_count, "flow control wait limit exceeded");
                    return Some(self.fail(IsoTpError::WaitLimit));
                }
                let deadline = clock.add(now, cfg.n_bs);
                self.state = TxState::WaitingForFc { session, deadline };
                None
            }
            FlowStatus::Overflow => {
                tracing::warn!(len = session.payload_len, "receiver refused message (overflow)");
                Some(self.fail(IsoTpError::PeerAbort))
            }
        }
    }

    /// Advance timers and send at most one Consecutive Frame.
    pub fn on_tick<C, S>(
        &mut self,
        cfg: &IsoTpConfig,
        clock: &C,
        sink: &mut S,
        now: I,
    ) -> Option<TxEvent>
    where
        C: Clock<Instant = I>,
        S: LinkFrameSink,
    {
        let state = mem::replace(&mut self.state, TxState::Idle);
        match state {
            TxState::WaitingForFc { deadline, .. } if now >= deadline => {
                tracing::warn!("no flow control from receiver");
                Some(self.fail(IsoTpError::Timeout(TimeoutKind::NBs)))
            }
            TxState::Sending { session } => self.continue_send(cfg, clock, sink, session, now),
            other => {
                self.state = other;
                None
            }
        }
    }

    fn continue_send<C, S>(
        &mut self,
        cfg: &IsoTpConfig,
        clock: &C,
        sink: &mut S,
        mut session: TxSession<I>,
        now: I,
    ) -> Option<TxEvent>
    where
        C: Clock<Instant = I>,
        S: LinkFrameSink,
    {
        if session.offset >= session.payload_len {
            return Some(self.complete(session.payload_len));
        }
        if let Some(since) = session.stalled_since
            && now >= clock.add(since, cfg.n_cs)
        {
            tracing::warn!(stalled = ?clock.elapsed(since), "link refused consecutive frames");
            return Some(self.fail(IsoTpError::Timeout(TimeoutKind::NCs)));
        }
        if let Some(last) = session.last_cf_at
            && now < clock.add(last, session.st_min)
        {
            self.state = TxState::Sending { session };
            return None;
        }

        let remaining = session.payload_len - session.offset;
        let chunk = remaining.min(cfg.max_consecutive_frame_payload());
        let data = &self.buffer.as_ref()[session.offset..session.offset + chunk];
        let pdu = Pdu::ConsecutiveFrame {
            sn: session.next_sn,
            data,
        };
        if transmit(cfg, sink, session.tx_id, &pdu).is_err() {
            session.stalled_since.get_or_insert(now);
            self.state = TxState::Sending { session };
            return None;
        }
        tracing::trace!(sn = session.next_sn, len = chunk, "consecutive frame sent");

        session.stalled_since = None;
        session.offset += chunk;
        session.next_sn = (session.next_sn + 1) & 0x0F;
        session.last_cf_at = Some(now);

        if session.offset >= session.payload_len {
            return Some(self.complete(session.payload_len));
        }

        if session.block_size > 0 {
            session.block_remaining = session.block_remaining.saturating_sub(1);
            if session.block_remaining == 0 {
                let deadline = clock.add(now, cfg.n_bs);
                self.state = TxState::WaitingForFc { session, deadline };
                return None;
            }
        }

        self.state = TxState::Sending { session };
        None
    }

    fn complete(&mut self, len: usize) -> TxEvent {
        tracing::debug!(len, "transmission complete");
        self.state = TxState::Done { len };
        TxEvent::Completed(len)
    }

    fn fail(&mut self, err: IsoTpError<Infallible>) -> TxEvent {
        self.state = TxState::Failed(err);
        TxEvent::Aborted(err)
    }
}

fn transmit<S: LinkFrameSink>(
    cfg: &IsoTpConfig,
    sink: &mut S,
    id: Id,
    pdu: &Pdu<'_>,
) -> Result<(), IsoTpError<S::Error>> {
    let frame = encode(pdu, cfg.frame_len, cfg.padding).map_err(|_| IsoTpError::InvalidFrame)?;
    sink.transmit(id, frame.as_bytes()).map_err(IsoTpError::Link)
}
