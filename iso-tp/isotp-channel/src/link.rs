//! Link-layer transmit seam.

use embedded_can::nb::Can;
use embedded_can::{Frame, Id};

/// Capability to put one frame on the link.
///
/// Implementations must not block: queue the frame or fail. A failed transmit of a Consecutive
/// Frame is retried by the channel on a later tick (bounded by N_Cs); a failed FlowControl is
/// retried until N_Ar expires.
pub trait LinkFrameSink {
    /// Sink-specific error type.
    type Error;

    /// Transmit `data` (at most 64 bytes) with identifier `id`.
    fn transmit(&mut self, id: Id, data: &[u8]) -> Result<(), Self::Error>;
}

impl<S: LinkFrameSink + ?Sized> LinkFrameSink for &mut S {
    type Error = S::Error;

    fn transmit(&mut self, id: Id, data: &[u8]) -> Result<(), Self::Error> {
        (**self).transmit(id, data)
    }
}

/// Errors from [`CanSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError<E> {
    /// Controller mailboxes are full; retry later.
    WouldBlock,
    /// The controller's frame type cannot represent this identifier/length.
    InvalidFrame,
    /// Controller error.
    Can(E),
}

/// [`LinkFrameSink`] over any non-blocking `embedded-can` controller.
///
/// If the controller displaces a lower-priority pending frame to make room, the displaced frame
/// is dropped.
pub struct CanSink<T> {
    can: T,
}

impl<T: Can> CanSink<T> {
    /// Wrap a controller.
    pub fn new(can: T) -> Self {
        Self { can }
    }

    /// Borrow the controller (e.g. to poll for received frames).
    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.can
    }

    /// Release the controller.
    pub fn into_inner(self) -> T {
        self.can
    }
}

impl<T: Can> LinkFrameSink for CanSink<T> {
    type Error = SinkError<T::Error>;

    fn transmit(&mut self, id: Id, data: &[u8]) -> Result<(), Self::Error> {
        let frame = T::Frame::new(id, data).ok_or(SinkError::InvalidFrame)?;
        match self.can.transmit(&frame) {
            Ok(displaced) => {
                if displaced.is_some() {
                    tracing::trace!("pending frame displaced by ISO-TP transmit");
                }
                Ok(())
            }
            Err(nb::Error::WouldBlock) => Err(SinkError::WouldBlock),
            Err(nb::Error::Other(e)) => Err(SinkError::Can(e)),
        }
    }
}
