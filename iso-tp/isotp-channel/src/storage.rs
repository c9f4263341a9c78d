//! Message buffers owned by a channel.

use alloc::vec::Vec;

use crate::errors::IsoTpError;

/// Storage for an outbound or reassembled payload.
///
/// A channel works with either:
/// - caller-provided buffers (common on targets without an allocator, or with static buffers), or
/// - owned buffers allocated once when the channel is created.
pub enum Storage<'a> {
    /// Caller-provided slice.
    Borrowed(&'a mut [u8]),
    /// Owned buffer.
    Owned(Vec<u8>),
}

impl Storage<'static> {
    /// Allocate a zeroed owned buffer, reporting allocation failure instead of aborting.
    pub fn allocate(capacity: usize) -> Result<Self, IsoTpError<()>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| IsoTpError::AllocFailed)?;
        buf.resize(capacity, 0);
        Ok(Storage::Owned(buf))
    }
}

impl<'a> Storage<'a> {
    /// Total writable capacity.
    pub fn capacity(&self) -> usize {
        match self {
            Storage::Borrowed(buf) => buf.len(),
            Storage::Owned(buf) => buf.len(),
        }
    }
}

impl<'a> AsRef<[u8]> for Storage<'a> {
    fn as_ref(&self) -> &[u8] {
        match self {
            Storage::Borrowed(buf) => buf,
            Storage::Owned(buf) => buf.as_slice(),
        }
    }
}

impl<'a> AsMut<[u8]> for Storage<'a> {
    fn as_mut(&mut self) -> &mut [u8] {
        match self {
            Storage::Borrowed(buf) => buf,
            Storage::Owned(buf) => buf.as_mut_slice(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_and_borrowed_report_capacity() {
        let owned = Storage::allocate(16).unwrap();
        assert_eq!(owned.capacity(), 16);
        assert!(owned.as_ref().iter().all(|b| *b == 0));

        let mut backing = [0u8; 4];
        let mut borrowed = Storage::Borrowed(&mut backing);
        borrowed.as_mut()[0] = 0xAB;
        assert_eq!(borrowed.capacity(), 4);
        assert_eq!(borrowed.as_ref()[0], 0xAB);
    }
}
