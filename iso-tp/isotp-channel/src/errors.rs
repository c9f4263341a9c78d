//! Transport-layer error types.

use core::convert::Infallible;
use core::fmt;

/// Timeout category identifiers (ISO-TP naming).
///
/// - `N_Ar` bounds how long the receiver may take to get a FlowControl frame onto the link.
/// - `N_Bs` bounds how long the sender waits for a FlowControl frame.
/// - `N_Cs` bounds how long the sender may be unable to place its next Consecutive Frame.
/// - `N_Cr` bounds the gap between Consecutive Frames seen by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// FlowControl could not be transmitted in time.
    NAr,
    /// No FlowControl arrived from the receiver.
    NBs,
    /// Consecutive Frame transmission stalled on the link.
    NCs,
    /// No Consecutive Frame arrived from the sender.
    NCr,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimeoutKind::NAr => "N_Ar",
            TimeoutKind::NBs => "N_Bs",
            TimeoutKind::NCs => "N_Cs",
            TimeoutKind::NCr => "N_Cr",
        })
    }
}

/// Transport-layer errors surfaced by the ISO-TP implementation.
///
/// `E` is the error type of the [`crate::LinkFrameSink`] in use. Errors recorded by the state
/// machines themselves never involve the link and are stored as `IsoTpError<Infallible>`; see
/// [`IsoTpError::widen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IsoTpError<E> {
    /// Empty payload, or a request the channel cannot express (e.g. multi-frame `send_with_id`).
    #[error("invalid argument")]
    InvalidArgument,
    /// A transmission is already in flight.
    #[error("a transmission is already in progress")]
    Busy,
    /// Outbound payload exceeds the transmit buffer.
    #[error("payload of {len} bytes exceeds the transmit capacity of {capacity}")]
    TooLarge {
        /// Requested payload length.
        len: usize,
        /// Configured transmit capacity.
        capacity: usize,
    },
    /// Inbound message exceeds the receive buffer.
    #[error("inbound message exceeds the receive capacity")]
    Overflow,
    /// Consecutive Frame sequence number mismatch.
    #[error("sequence number mismatch (expected {expected}, got {got})")]
    SequenceError {
        /// Sequence number the receiver was waiting for.
        expected: u8,
        /// Sequence number carried by the frame.
        got: u8,
    },
    /// Deadline exceeded for the indicated phase.
    #[error("{0} timeout")]
    Timeout(TimeoutKind),
    /// Peer answered with FlowControl(Overflow) while we were sending.
    #[error("peer aborted the transfer (FlowControl overflow)")]
    PeerAbort,
    /// Peer sent more FlowControl(Wait) frames in a row than allowed.
    #[error("peer exceeded the FlowControl wait limit")]
    WaitLimit,
    /// Malformed frame content or an unencodable PDU.
    #[error("malformed ISO-TP frame")]
    InvalidFrame,
    /// Configuration rejected at construction time.
    #[error("invalid configuration")]
    InvalidConfig,
    /// Buffer allocation failed at construction time.
    #[error("buffer allocation failed")]
    AllocFailed,
    /// Caller buffer cannot hold the completed message; the message is kept.
    #[error("output buffer too small ({needed} bytes needed)")]
    BufferTooSmall {
        /// Length of the completed message.
        needed: usize,
    },
    /// No completed message yet.
    #[error("no completed message available")]
    WouldBlock,
    /// Wrapper around sink-specific errors.
    #[error("link error: {0:?}")]
    Link(E),
}

impl IsoTpError<Infallible> {
    /// Re-type a link-free error so it can be returned alongside sink errors.
    pub fn widen<E>(self) -> IsoTpError<E> {
        match self {
            IsoTpError::InvalidArgument => IsoTpError::InvalidArgument,
            IsoTpError::Busy => IsoTpError::Busy,
            IsoTpError::TooLarge { len, capacity } => IsoTpError::TooLarge { len, capacity },
            IsoTpError::Overflow => IsoTpError::Overflow,
            IsoTpError::SequenceError { expected, got } => {
                IsoTpError::SequenceError { expected, got }
            }
            IsoTpError::Timeout(kind) => IsoTpError::Timeout(kind),
            IsoTpError::PeerAbort => IsoTpError::PeerAbort,
            IsoTpError::WaitLimit => IsoTpError::WaitLimit,
            IsoTpError::InvalidFrame => IsoTpError::InvalidFrame,
            IsoTpError::InvalidConfig => IsoTpError::InvalidConfig,
            IsoTpError::AllocFailed => IsoTpError::AllocFailed,
            IsoTpError::BufferTooSmall { needed } => IsoTpError::BufferTooSmall { needed },
            IsoTpError::WouldBlock => IsoTpError::WouldBlock,
            IsoTpError::Link(never) => match never {},
        }
    }
}
