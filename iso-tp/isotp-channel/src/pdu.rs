//! Encode and decode ISO-TP protocol control information.
//!
//! Only normal addressing is supported: the PCI always starts at byte 0 of the CAN payload.

use core::time::Duration;

use crate::errors::IsoTpError;

/// Largest CAN FD payload.
pub const MAX_FRAME_LEN: usize = 64;
/// First Frame header length for messages up to 4095 bytes.
pub const FF_HEADER_LEN: usize = 2;
/// First Frame header length when the 32-bit length escape is used.
pub const FF_ESCAPE_HEADER_LEN: usize = 6;

const CLASSIC_FRAME_LEN: usize = 8;
const FF_DL_12BIT_MAX: u32 = 0x0FFF;

/// Flow control status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    /// Clear to send more consecutive frames.
    ClearToSend,
    /// Wait before resuming.
    Wait,
    /// Abort due to overflow.
    Overflow,
}

impl FlowStatus {
    fn nibble(self) -> u8 {
        match self {
            FlowStatus::ClearToSend => 0x0,
            FlowStatus::Wait => 0x1,
            FlowStatus::Overflow => 0x2,
        }
    }
}

/// Classified ISO-TP Protocol Data Unit (PDU).
///
/// Produced by [`classify`] and consumed by [`encode`] and the send/receive state machines.
/// Payload slices borrow from the frame they were classified from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu<'a> {
    /// Single Frame payload.
    SingleFrame { len: u8, data: &'a [u8] },
    /// First Frame with total message length and the first chunk.
    FirstFrame { len: u32, data: &'a [u8] },
    /// Consecutive Frame carrying sequence and bytes.
    ConsecutiveFrame { sn: u8, data: &'a [u8] },
    /// Flow Control feedback.
    FlowControl {
        /// Flow status from receiver to sender.
        status: FlowStatus,
        /// Block size requested by receiver (0 = unlimited).
        block_size: u8,
        /// STmin (encoded byte form, not a `Duration`).
        st_min: u8,
    },
    /// Unrecognised PCI or a frame too short for its PCI.
    Invalid,
}

/// One encoded CAN payload, at most [`MAX_FRAME_LEN`] bytes.
#[derive(Clone, Copy)]
pub struct RawFrame {
    buf: [u8; MAX_FRAME_LEN],
    len: usize,
}

impl RawFrame {
    /// Encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl core::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("RawFrame").field(&self.as_bytes()).finish()
    }
}

/// CAN / CAN FD payload sizes a frame can be encoded into.
pub fn is_valid_frame_len(len: usize) -> bool {
    matches!(len, 8 | 12 | 16 | 20 | 24 | 32 | 48 | 64)
}

/// Smallest valid CAN FD payload size that holds `used` bytes.
fn fd_dlc_len(used: usize) -> usize {
    match used {
        0..=8 => used,
        9..=12 => 12,
        13..=16 => 16,
        17..=20 => 20,
        21..=24 => 24,
        25..=32 => 32,
        33..=48 => 48,
        _ => 64,
    }
}

/// Largest payload a Single Frame can carry on a link with `frame_len`-byte frames.
pub fn max_single_frame_payload(frame_len: usize) -> usize {
    if frame_len > CLASSIC_FRAME_LEN {
        frame_len.saturating_sub(2)
    } else {
        frame_len.saturating_sub(1)
    }
}

/// Encode a PDU into a CAN payload of at most `frame_len` bytes.
///
/// With `padding = Some(b)` the frame is filled with `b` up to `frame_len`. Without padding the
/// frame is as short as possible, except on CAN FD where it is rounded up to the next valid
/// payload size (filled with [`crate::config::DEFAULT_PADDING`]).
pub fn encode(
    pdu: &Pdu<'_>,
    frame_len: usize,
    padding: Option<u8>,
) -> Result<RawFrame, IsoTpError<()>> {
    if !is_valid_frame_len(frame_len) {
        return Err(IsoTpError::InvalidFrame);
    }
    let mut buf = [0u8; MAX_FRAME_LEN];

    let used = match pdu {
        Pdu::SingleFrame { len, data } => {
            let payload_len = *len as usize;
            if payload_len == 0 || payload_len > data.len() {
                return Err(IsoTpError::InvalidFrame);
            }

            // A frame padded past 8 bytes must carry the escape form.
            let escape = payload_len > 7 || (padding.is_some() && frame_len > CLASSIC_FRAME_LEN);
            if !escape {
                buf[0] = *len & 0x0F;
                let used = 1 + payload_len;
                buf[1..used].copy_from_slice(&data[..payload_len]);
                used
            } else {
                // CAN FD escape: SF_DL nibble = 0, next byte is the length.
                if payload_len > max_single_frame_payload(frame_len) {
                    return Err(IsoTpError::InvalidFrame);
                }
                let used = 2 + payload_len;
                buf[0] = 0x00;
                buf[1] = *len;
                buf[2..used].copy_from_slice(&data[..payload_len]);
                used
            }
        }
        Pdu::FirstFrame { len, data } => {
            if (*len as usize) <= max_single_frame_payload(frame_len) || data.is_empty() {
                return Err(IsoTpError::InvalidFrame);
            }
            let header = if *len > FF_DL_12BIT_MAX {
                buf[0] = 0x10;
                buf[1] = 0x00;
                buf[2..6].copy_from_slice(&len.to_be_bytes());
                FF_ESCAPE_HEADER_LEN
            } else {
                buf[0] = 0x10 | ((*len >> 8) as u8 & 0x0F);
                buf[1] = (*len & 0xFF) as u8;
                FF_HEADER_LEN
            };
            let data_len = data
                .len()
                .min(frame_len - header)
                .min(*len as usize);
            buf[header..header + data_len].copy_from_slice(&data[..data_len]);
            header + data_len
        }
        Pdu::ConsecutiveFrame { sn, data } => {
            if data.len() > frame_len - 1 {
                return Err(IsoTpError::InvalidFrame);
            }
            buf[0] = 0x20 | (*sn & 0x0F);
            let used = 1 + data.len();
            buf[1..used].copy_from_slice(data);
            used
        }
        Pdu::FlowControl {
            status,
            block_size,
            st_min,
        } => {
            buf[0] = 0x30 | status.nibble();
            buf[1] = *block_size;
            buf[2] = *st_min;
            3
        }
        Pdu::Invalid => return Err(IsoTpError::InvalidFrame),
    };

    let len = match padding {
        Some(pad) => {
            buf[used..frame_len].fill(pad);
            frame_len
        }
        None if used > CLASSIC_FRAME_LEN => {
            let len = fd_dlc_len(used);
            buf[used..len].fill(crate::config::DEFAULT_PADDING);
            len
        }
        None => used,
    };

    Ok(RawFrame { buf, len })
}

/// Classify a raw CAN payload.
///
/// Total: every byte pattern maps to a variant, with [`Pdu::Invalid`] as the catch-all. Bytes
/// beyond the PCI-declared length (padding) are ignored.
pub fn classify(data: &[u8]) -> Pdu<'_> {
    let Some(&pci) = data.first() else {
        return Pdu::Invalid;
    };
    let frame_len = data.len();

    match pci >> 4 {
        0x0 => {
            let nibble = (pci & 0x0F) as usize;
            let (payload_len, payload_start) = if nibble == 0 {
                // Escape form only exists on CAN FD sized frames.
                if frame_len <= CLASSIC_FRAME_LEN {
                    return Pdu::Invalid;
                }
                (data[1] as usize, 2)
            } else {
                if nibble > 7 && frame_len <= CLASSIC_FRAME_LEN {
                    return Pdu::Invalid;
                }
                (nibble, 1)
            };
            if payload_len == 0 || frame_len < payload_start + payload_len {
                return Pdu::Invalid;
            }
            Pdu::SingleFrame {
                len: payload_len as u8,
                data: &data[payload_start..payload_start + payload_len],
            }
        }
        0x1 => {
            if frame_len < FF_HEADER_LEN {
                return Pdu::Invalid;
            }
            let short_len = (((pci & 0x0F) as u32) << 8) | data[1] as u32;
            let (len, header) = if short_len == 0 {
                if frame_len < FF_ESCAPE_HEADER_LEN {
                    return Pdu::Invalid;
                }
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&data[2..6]);
                (u32::from_be_bytes(raw), FF_ESCAPE_HEADER_LEN)
            } else {
                (short_len, FF_HEADER_LEN)
            };
            if (len as usize) <= max_single_frame_payload(frame_len) {
                return Pdu::Invalid;
            }
            Pdu::FirstFrame {
                len,
                data: &data[header..],
            }
        }
        0x2 => Pdu::ConsecutiveFrame {
            sn: pci & 0x0F,
            data: &data[1..],
        },
        0x3 => {
            if frame_len < 3 {
                return Pdu::Invalid;
            }
            let status = match pci & 0x0F {
                0x0 => FlowStatus::ClearToSend,
                0x1 => FlowStatus::Wait,
                0x2 => FlowStatus::Overflow,
                _ => return Pdu::Invalid,
            };
            Pdu::FlowControl {
                status,
                block_size: data[1],
                st_min: data[2],
            }
        }
        _ => Pdu::Invalid,
    }
}

/// Convert STmin byte to a Duration, returning None for reserved values.
pub fn st_min_to_duration(raw: u8) -> Option<Duration> {
    match raw {
        0x00..=0x7F => Some(Duration::from_millis(raw as u64)),
        0xF1..=0xF9 => Some(Duration::from_micros((raw as u64 - 0xF0) * 100)),
        _ => None,
    }
}

/// Encode a Duration into an STmin byte, rounding up to the next representable value.
///
/// Sub-millisecond values use the 100 µs steps (`0xF1..=0xF9`); anything above 127 ms clamps to
/// `0x7F`.
pub fn duration_to_st_min(duration: Duration) -> u8 {
    let micros = duration.as_micros();
    if micros == 0 {
        return 0;
    }
    if micros <= 900 {
        return 0xF0 + micros.div_ceil(100) as u8;
    }
    let millis = micros.div_ceil(1000);
    if millis <= 0x7F { millis as u8 } else { 0x7F }
}
