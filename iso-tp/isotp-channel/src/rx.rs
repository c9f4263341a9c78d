//! Receive-side reassembly and flow-control decisions.

use core::cmp::min;
use core::convert::Infallible;

use crate::config::IsoTpConfig;
use crate::errors::{IsoTpError, TimeoutKind};
use crate::flow::{FlowControlState, RxFlowControl};
use crate::pdu::{FlowStatus, Pdu};
use crate::storage::Storage;
use crate::timer::Clock;

/// High-level receive state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    /// No transfer active.
    Idle,
    /// First Frame accepted; waiting for Consecutive Frames.
    Receiving,
    /// Complete message waiting to be collected.
    Done,
    /// Reception aborted; the error is reported by the next collect.
    Error,
}

/// Outcome after processing a PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOutcome {
    /// Nothing to send back.
    None,
    /// Emit a flow control frame.
    SendFlowControl(FlowControlState),
    /// Emit FlowControl(Overflow); the reception failed.
    Rejected(FlowControlState),
    /// Payload complete with length.
    Completed(usize),
    /// Reception aborted.
    Aborted(IsoTpError<Infallible>),
}

struct Reception<I> {
    expected_len: usize,
    next_sn: u8,
    block_size: u8,
    block_remaining: u8,
    /// N_Cr deadline, or N_Ar while `pending_fc` is set.
    deadline: I,
    pending_fc: Option<FlowControlState>,
}

enum Phase<I> {
    Idle,
    Receiving(Reception<I>),
    Done,
    Failed(IsoTpError<Infallible>),
}

/// Receive state machine.
///
/// Transitions are driven by [`RxMachine::on_pdu`] (inbound frames) and [`RxMachine::on_tick`]
/// (timer expiry). The machine never transmits; FlowControl frames are returned as
/// [`RxOutcome`]s for the caller to put on the link.
pub struct RxMachine<'a, I> {
    phase: Phase<I>,
    buffer: Storage<'a>,
    capacity: usize,
    written: usize,
}

impl<'a, I: Copy + PartialOrd> RxMachine<'a, I> {
    /// Create a machine reassembling into `buffer`, accepting messages up to `capacity` bytes.
    pub fn new(buffer: Storage<'a>, capacity: usize) -> Self {
        let capacity = min(capacity, buffer.capacity());
        Self {
            phase: Phase::Idle,
            buffer,
            capacity,
            written: 0,
        }
    }

    /// Largest message this machine accepts.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current state.
    pub fn state(&self) -> RxState {
        match self.phase {
            Phase::Idle => RxState::Idle,
            Phase::Receiving(_) => RxState::Receiving,
            Phase::Done => RxState::Done,
            Phase::Failed(_) => RxState::Error,
        }
    }

    /// Clear state to idle, dropping any completed or partial message.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.written = 0;
    }

    /// The completed message, or an empty slice if none is ready.
    pub fn completed(&self) -> &[u8] {
        match self.phase {
            Phase::Done => &self.buffer.as_ref()[..self.written],
            _ => &[],
        }
    }

    /// Handle an inbound PDU and return the action to take.
    ///
    /// A Single or First Frame arriving mid-reception abandons the current message and starts the
    /// new one. FlowControl and invalid PDUs are not for the receive side and are ignored.
    pub fn on_pdu<C>(
        &mut self,
        cfg: &IsoTpConfig,
        clock: &C,
        flow: &RxFlowControl,
        pdu: Pdu<'_>,
        now: I,
    ) -> RxOutcome
    where
        C: Clock<Instant = I>,
    {
        match (&self.phase, pdu) {
            (_, Pdu::FlowControl { .. } | Pdu::Invalid) => RxOutcome::None,
            (Phase::Done, Pdu::SingleFrame { len, .. }) => {
                tracing::debug!(len, "single frame dropped, previous message not collected");
                RxOutcome::None
            }
            (Phase::Done, Pdu::FirstFrame { len, .. }) => {
                tracing::debug!(len, "first frame refused, previous message not collected");
                RxOutcome::SendFlowControl(FlowControlState {
                    status: FlowStatus::Overflow,
                    block_size: 0,
                    st_min: core::time::Duration::ZERO,
                })
            }
            (phase, Pdu::SingleFrame { len, data }) => {
                if matches!(phase, Phase::Receiving(_)) {
                    tracing::debug!("reception abandoned for new single frame");
                }
                self.start_single(len as usize, data)
            }
            (phase, Pdu::FirstFrame { len, data }) => {
                if matches!(phase, Phase::Receiving(_)) {
                    tracing::debug!("reception abandoned for new first frame");
                }
                let deadline = clock.add(now, cfg.n_cr);
                self.start_first(flow, len, data, deadline)
            }
            (Phase::Receiving(_), Pdu::ConsecutiveFrame { sn, data }) => {
                let deadline = clock.add(now, cfg.n_cr);
                self.continue_consecutive(flow, sn, data, deadline)
            }
            (_, Pdu::ConsecutiveFrame { sn, .. }) => {
                tracing::trace!(sn, "consecutive frame outside a reception ignored");
                RxOutcome::None
            }
        }
    }

    fn start_single(&mut self, len: usize, data: &[u8]) -> RxOutcome {
        if len > self.capacity {
            tracing::warn!(len, capacity = self.capacity, "single frame exceeds receive capacity");
            return self.fail(IsoTpError::Overflow);
        }
        self.buffer.as_mut()[..len].copy_from_slice(&data[..len]);
        self.written = len;
        self.phase = Phase::Done;
        RxOutcome::Completed(len)
    }

    fn start_first(
        &mut self,
        flow: &RxFlowControl,
        len: u32,
        data: &[u8],
        deadline: I,
    ) -> RxOutcome {
        let total = usize::try_from(len).unwrap_or(usize::MAX);
        let decision = flow.decide_for_incoming(total, self.capacity);
        if decision.status == FlowStatus::Overflow {
            tracing::warn!(len = total, capacity = self.capacity, "first frame exceeds receive capacity");
            self.fail(IsoTpError::Overflow);
            return RxOutcome::Rejected(decision);
        }

        let copy_len = min(data.len(), total);
        self.buffer.as_mut()[..copy_len].copy_from_slice(&data[..copy_len]);
        self.written = copy_len;
        self.phase = Phase::Receiving(Reception {
            expected_len: total,
            next_sn: 1,
            block_size: decision.block_size,
            block_remaining: decision.block_size,
            deadline,
            pending_fc: None,
        });
        tracing::debug!(len = total, block_size = decision.block_size, "reception started");
        RxOutcome::SendFlowControl(decision)
    }

    fn continue_consecutive(
        &mut self,
        flow: &RxFlowControl,
        sn: u8,
        data: &[u8],
        deadline: I,
    ) -> RxOutcome {
        let Phase::Receiving(rx) = &mut self.phase else {
            return RxOutcome::None;
        };
        if sn != rx.next_sn {
            let expected = rx.next_sn;
            tracing::warn!(expected, got = sn, "consecutive frame out of sequence");
            return self.fail(IsoTpError::SequenceError { expected, got: sn });
        }

        let remaining = rx.expected_len - self.written;
        let chunk = min(data.len(), remaining);
        let end = self.written + chunk;
        self.buffer.as_mut()[self.written..end].copy_from_slice(&data[..chunk]);
        self.written = end;
        rx.next_sn = (rx.next_sn + 1) & 0x0F;
        rx.deadline = deadline;

        if self.written >= rx.expected_len {
            let len = self.written;
            self.phase = Phase::Done;
            tracing::debug!(len, "reception complete");
            return RxOutcome::Completed(len);
        }

        if rx.block_size > 0 {
            rx.block_remaining = rx.block_remaining.saturating_sub(1);
            if rx.block_remaining == 0 {
                let next = flow.clear_to_send();
                rx.block_size = next.block_size;
                rx.block_remaining = next.block_size;
                return RxOutcome::SendFlowControl(next);
            }
        }

        RxOutcome::None
    }

    fn fail(&mut self, err: IsoTpError<Infallible>) -> RxOutcome {
        self.phase = Phase::Failed(err);
        self.written = 0;
        RxOutcome::Aborted(err)
    }

    /// Keep a FlowControl the link refused, to be retried until `deadline` (N_Ar).
    pub fn defer_flow_control(&mut self, fc: FlowControlState, deadline: I) {
        if let Phase::Receiving(rx) = &mut self.phase {
            rx.pending_fc = Some(fc);
            rx.deadline = deadline;
        }
    }

    /// FlowControl waiting for a retry, if any.
    pub fn pending_flow_control(&self) -> Option<FlowControlState> {
        match &self.phase {
            Phase::Receiving(rx) => rx.pending_fc,
            _ => None,
        }
    }

    /// A deferred FlowControl made it onto the link; wait for the sender again until `deadline`.
    pub fn flow_control_sent(&mut self, deadline: I) {
        if let Phase::Receiving(rx) = &mut self.phase {
            rx.pending_fc = None;
            rx.deadline = deadline;
        }
    }

    /// Check the reception deadline; returns the error if the reception just timed out.
    pub fn on_tick(&mut self, now: I) -> Option<IsoTpError<Infallible>> {
        let Phase::Receiving(rx) = &self.phase else {
            return None;
        };
        if now < rx.deadline {
            return None;
        }
        let kind = if rx.pending_fc.is_some() {
            TimeoutKind::NAr
        } else {
            TimeoutKind::NCr
        };
        tracing::warn!(%kind, received = self.written, "reception timed out");
        match self.fail(IsoTpError::Timeout(kind)) {
            RxOutcome::Aborted(err) => Some(err),
            _ => None,
        }
    }

    /// Collect a completed message into `out`, or report why there is none.
    ///
    /// `Done` and `Error` both return to `Idle`. If `out` is too small the message is kept.
    pub fn take(&mut self, out: &mut [u8]) -> Result<usize, IsoTpError<Infallible>> {
        match self.phase {
            Phase::Done => {
                let len = self.written;
                if out.len() < len {
                    return Err(IsoTpError::BufferTooSmall { needed: len });
                }
                out[..len].copy_from_slice(&self.buffer.as_ref()[..len]);
                self.reset();
                Ok(len)
            }
            Phase::Failed(err) => {
                self.reset();
                Err(err)
            }
            Phase::Idle | Phase::Receiving(_) => Err(IsoTpError::WouldBlock),
        }
    }
}
