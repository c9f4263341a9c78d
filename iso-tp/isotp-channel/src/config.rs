//! ISO-TP channel configuration container.

use core::time::Duration;
use embedded_can::{Id, StandardId};

use crate::pdu::{FF_ESCAPE_HEADER_LEN, FF_HEADER_LEN, is_valid_frame_len, max_single_frame_payload};

/// Default padding byte (`0xCC`, the value most ISO-TP stacks use).
pub const DEFAULT_PADDING: u8 = 0xCC;

/// Longest STmin a receiver can advertise.
pub const MAX_ST_MIN: Duration = Duration::from_millis(0x7F);

/// Configuration for an ISO-TP channel.
#[derive(Debug, Clone)]
pub struct IsoTpConfig {
    /// CAN identifier used when transmitting ISO-TP frames (including FlowControl replies).
    pub tx_id: Id,
    /// CAN identifier accepted when receiving; frames with other identifiers are ignored.
    pub rx_id: Id,
    /// Largest outbound message accepted by `send`.
    pub tx_capacity: usize,
    /// Largest inbound message that can be reassembled; larger First Frames get FC(Overflow).
    pub rx_capacity: usize,
    /// Block size advertised to senders (0 = unlimited).
    pub block_size: u8,
    /// Minimum separation time advertised to senders.
    pub st_min: Duration,
    /// Maximum number of consecutive FlowControl(Wait) frames accepted while sending
    /// (`None` = unlimited).
    pub wft_max: Option<u8>,
    /// Padding byte for transmitted frames (`None` = send minimal-length frames).
    pub padding: Option<u8>,
    /// CAN payload size of the link.
    ///
    /// - Classic CAN uses 8 bytes.
    /// - CAN FD can carry 12, 16, 20, 24, 32, 48 or 64 bytes.
    pub frame_len: usize,
    /// Time allowed for a FlowControl frame to get onto the link.
    pub n_ar: Duration,
    /// Time to wait for FlowControl after a First Frame or a completed block.
    pub n_bs: Duration,
    /// Time the sender may be unable to place its next Consecutive Frame.
    pub n_cs: Duration,
    /// Time to wait for the next Consecutive Frame while receiving.
    pub n_cr: Duration,
}

impl Default for IsoTpConfig {
    /// Zeroed IDs, 4095-byte buffers, BS 8, STmin 0, 100 ms timers, `0xCC` padding.
    fn default() -> Self {
        Self {
            tx_id: Id::Standard(StandardId::ZERO),
            rx_id: Id::Standard(StandardId::ZERO),
            tx_capacity: 4095,
            rx_capacity: 4095,
            block_size: 8,
            st_min: Duration::ZERO,
            wft_max: None,
            padding: Some(DEFAULT_PADDING),
            frame_len: 8,
            n_ar: Duration::from_millis(100),
            n_bs: Duration::from_millis(100),
            n_cs: Duration::from_millis(100),
            n_cr: Duration::from_millis(100),
        }
    }
}

impl IsoTpConfig {
    /// Config for the given transmit/receive identifiers, everything else default.
    pub fn new(tx_id: impl Into<Id>, rx_id: impl Into<Id>) -> Self {
        Self {
            tx_id: tx_id.into(),
            rx_id: rx_id.into(),
            ..Self::default()
        }
    }

    /// Use one response timeout for every protocol timer (N_Ar, N_Bs, N_Cs, N_Cr).
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.n_ar = timeout;
        self.n_bs = timeout;
        self.n_cs = timeout;
        self.n_cr = timeout;
        self
    }

    /// Reject empty buffers, mirrored IDs, unsupported frame sizes, STmin above 127 ms and zero
    /// timers.
    #[allow(clippy::result_unit_err)]
    pub fn validate(&self) -> Result<(), ()> {
        if self.tx_capacity == 0 || self.rx_capacity == 0 {
            return Err(());
        }
        if u32::try_from(self.tx_capacity).is_err() {
            return Err(());
        }
        if !is_valid_frame_len(self.frame_len) {
            return Err(());
        }
        if self.tx_id == self.rx_id {
            return Err(());
        }
        // STmin travels as one byte; 127 ms is the longest gap it can express.
        if self.st_min > MAX_ST_MIN {
            return Err(());
        }
        if [self.n_ar, self.n_bs, self.n_cs, self.n_cr].contains(&Duration::ZERO) {
            return Err(());
        }
        Ok(())
    }

    /// Max application bytes in a Single Frame (7 on classic CAN, `frame_len - 2` on CAN FD).
    pub fn max_single_frame_payload(&self) -> usize {
        max_single_frame_payload(self.frame_len)
    }

    /// Max application bytes carried in the First Frame of a `total_len` message.
    ///
    /// Messages above 4095 bytes need the 6-byte escape header.
    pub fn max_first_frame_payload(&self, total_len: usize) -> usize {
        let header = if total_len > 0x0FFF {
            FF_ESCAPE_HEADER_LEN
        } else {
            FF_HEADER_LEN
        };
        self.frame_len.saturating_sub(header)
    }

    /// Max application bytes carried in a Consecutive Frame.
    pub fn max_consecutive_frame_payload(&self) -> usize {
        self.frame_len.saturating_sub(1)
    }
}
