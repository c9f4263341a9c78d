//! Flow-control policy: what a receiver advertises, and how a sender reads the peer's answer.

use core::time::Duration;

use crate::config::IsoTpConfig;
use crate::pdu::{FlowStatus, duration_to_st_min, st_min_to_duration};

/// STmin applied when a peer sends a reserved STmin byte (0x7F, the longest defined gap).
pub const RESERVED_ST_MIN: Duration = Duration::from_millis(0x7F);

/// Pacing negotiated through a FlowControl frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControlState {
    /// Flow status.
    pub status: FlowStatus,
    /// Consecutive Frames allowed before the next FlowControl (0 = unlimited).
    pub block_size: u8,
    /// Minimum gap between Consecutive Frames. Never a deadline.
    pub st_min: Duration,
}

impl FlowControlState {
    /// Interpret the fields of a FlowControl frame received from a peer.
    ///
    /// Reserved STmin bytes map to [`RESERVED_ST_MIN`].
    pub fn from_peer(status: FlowStatus, block_size: u8, st_min: u8) -> Self {
        Self {
            status,
            block_size,
            st_min: st_min_to_duration(st_min).unwrap_or(RESERVED_ST_MIN),
        }
    }

    /// STmin in its on-wire byte form.
    pub fn st_min_raw(&self) -> u8 {
        duration_to_st_min(self.st_min)
    }
}

/// Receive-side ISO-TP flow-control parameters (BS/STmin).
///
/// These values are advertised to the remote sender in FlowControl (FC) frames. Updating them at
/// runtime allows shaping the sender's rate based on backpressure; a change takes effect at the
/// next FlowControl the channel emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxFlowControl {
    /// Block size (0 = unlimited).
    pub block_size: u8,
    /// Minimum separation time between consecutive frames.
    pub st_min: Duration,
}

impl RxFlowControl {
    /// Build flow-control parameters from a channel's static configuration.
    pub fn from_config(cfg: &IsoTpConfig) -> Self {
        Self {
            block_size: cfg.block_size,
            st_min: cfg.st_min,
        }
    }

    /// Decide the FlowControl answer to a First Frame announcing `total_len` bytes.
    ///
    /// The only veto is Overflow, when the message cannot fit `capacity`.
    pub fn decide_for_incoming(&self, total_len: usize, capacity: usize) -> FlowControlState {
        if total_len > capacity {
            return FlowControlState {
                status: FlowStatus::Overflow,
                block_size: 0,
                st_min: Duration::ZERO,
            };
        }
        self.clear_to_send()
    }

    /// ClearToSend with the current parameters.
    pub fn clear_to_send(&self) -> FlowControlState {
        FlowControlState {
            status: FlowStatus::ClearToSend,
            block_size: self.block_size,
            st_min: self.st_min,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_only_when_message_exceeds_capacity() {
        let policy = RxFlowControl {
            block_size: 4,
            st_min: Duration::from_millis(5),
        };
        let fc = policy.decide_for_incoming(64, 64);
        assert_eq!(fc.status, FlowStatus::ClearToSend);
        assert_eq!(fc.block_size, 4);
        assert_eq!(fc.st_min_raw(), 5);

        let fc = policy.decide_for_incoming(65, 64);
        assert_eq!(fc.status, FlowStatus::Overflow);
        assert_eq!(fc.block_size, 0);
    }

    #[test]
    fn peer_flow_control_interpretation() {
        let fc = FlowControlState::from_peer(FlowStatus::ClearToSend, 0, 0xF5);
        assert_eq!(fc.block_size, 0);
        assert_eq!(fc.st_min, Duration::from_micros(500));

        let fc = FlowControlState::from_peer(FlowStatus::Wait, 2, 0x90);
        assert_eq!(fc.st_min, RESERVED_ST_MIN);
    }
}
