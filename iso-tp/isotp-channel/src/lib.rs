//! `isotp-channel`: a polled ISO-TP (ISO 15765-2) channel for CAN and CAN-FD.
//!
//! ISO-TP carries messages of up to 4095 bytes (more with the 32-bit length escape) over CAN by
//! segmenting them into:
//! - a **Single Frame** (small payloads),
//! - a **First Frame** + multiple **Consecutive Frames** (larger payloads), and
//! - **Flow Control** frames the receiver uses to regulate pacing and batching.
//!
//! This crate provides a [`Channel`]: one transmit and one receive state machine bound to a
//! (`tx_id`, `rx_id`) pair. It does no I/O of its own. The host feeds inbound frames with
//! [`Channel::on_frame`], advances timers with [`Channel::tick`], and lends the channel a
//! [`LinkFrameSink`] on every call that may transmit. [`CanSink`] adapts any non-blocking
//! `embedded-can` controller.
//!
//! # Feature flags
//! - `std` (default): exports [`StdClock`] and enables `std` support in `thiserror`/`tracing`.
//!
//! Without `std` the crate is `no_std` + `alloc`. Buffers may still be caller-provided through
//! [`Channel::with_storage`]; [`Channel::new`] allocates them once, up front.
//!
//! # Concurrency
//! Every operation takes `&mut self`, so the inbound-frame path and the tick path never run at the
//! same time on one channel. If frames are delivered from an interrupt handler, guard the channel
//! with the platform's critical section (or mask the CAN interrupt while ticking). Neither path
//! blocks or allocates. `on_frame` transmits at most one FlowControl; `tick` transmits at most a
//! retried FlowControl and one Consecutive Frame.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use core::time::Duration;
//! use embedded_can::{Id, StandardId};
//! use isotp_channel::{CanSink, Channel, IsoTpConfig, MicrosClock, Progress};
//!
//! let cfg = IsoTpConfig {
//!     block_size: 8,
//!     st_min: Duration::from_millis(20),
//!     ..IsoTpConfig::new(StandardId::new(0x7E0).unwrap(), StandardId::new(0x7E8).unwrap())
//! };
//! let mut channel = Channel::new(cfg, MicrosClock::new(board::micros))?;
//! let mut sink = CanSink::new(can);
//!
//! channel.send(&mut sink, &request)?;
//! loop {
//!     if let Ok(frame) = sink.inner_mut().receive() {
//!         channel.on_frame(&mut sink, &frame)?;
//!     }
//!     if let Progress::Completed | Progress::Failed(_) = channel.poll(&mut sink) {
//!         break;
//!     }
//! }
//!
//! let mut response = [0u8; 4095];
//! let len = channel.receive(&mut response)?;
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod channel;
pub mod config;
pub mod errors;
pub mod flow;
pub mod link;
pub mod pdu;
pub mod rx;
pub mod storage;
pub mod timer;
pub mod tx;

pub use channel::{Channel, Direction, IsoTpEvents};
pub use config::IsoTpConfig;
pub use errors::{IsoTpError, TimeoutKind};
pub use flow::{FlowControlState, RxFlowControl};
pub use link::{CanSink, LinkFrameSink, SinkError};
pub use pdu::FlowStatus;
pub use rx::RxState;
pub use storage::Storage;
pub use timer::{Clock, MicrosClock};
#[cfg(feature = "std")]
pub use timer::StdClock;
pub use tx::Progress;

/// CAN identifier, standard (11-bit) or extended (29-bit).
pub use embedded_can::Id;
