//! Owned outbound buffer values.
//!
//! The reactor core only moves opaque byte buffers around; `IoBuf` is the
//! value type it queues and writes. It owns a refcounted [`Bytes`] plus a
//! read cursor, so a partially written buffer can sit at the head of a
//! message queue across writable events without copying. Cloning is cheap
//! and is the explicit "retain": callers that queue a buffer hand over an
//! owned value, never a borrowed alias.

use bytes::Bytes;
use std::io::{self, Write};

#[derive(Clone, Debug)]
pub struct IoBuf {
    data: Bytes,
    pos: usize,
}

impl IoBuf {
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    /// Unwritten bytes left in this buffer.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_drained(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// The unwritten tail as a slice.
    pub fn bytes(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    /// Writes as much of the remaining content as `w` accepts, advancing the
    /// cursor. Returns bytes moved; `WouldBlock` is the caller's to handle.
    pub fn write_to<W: Write>(&mut self, w: &mut W) -> io::Result<usize> {
        if self.is_drained() {
            return Ok(0);
        }
        let n = w.write(&self.data[self.pos..])?;
        self.pos += n;
        Ok(n)
    }
}

impl From<Bytes> for IoBuf {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl From<Vec<u8>> for IoBuf {
    fn from(data: Vec<u8>) -> Self {
        Self::new(Bytes::from(data))
    }
}

impl From<&'static [u8]> for IoBuf {
    fn from(data: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writer that accepts at most `limit` bytes per call.
    struct Throttled {
        sink: Vec<u8>,
        limit: usize,
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.sink.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_partial_writes_advance_cursor() {
        let mut buf = IoBuf::from(b"hello world".to_vec());
        let mut w = Throttled { sink: Vec::new(), limit: 4 };

        assert_eq!(buf.write_to(&mut w).unwrap(), 4);
        assert_eq!(buf.remaining(), 7);
        assert_eq!(buf.bytes(), b"o world");

        while !buf.is_drained() {
            buf.write_to(&mut w).unwrap();
        }
        assert_eq!(w.sink, b"hello world");
        assert_eq!(buf.write_to(&mut w).unwrap(), 0);
    }

    #[test]
    fn test_clone_retains_position_independently() {
        let mut buf = IoBuf::from(b"abcd".to_vec());
        let mut w = Throttled { sink: Vec::new(), limit: 2 };
        buf.write_to(&mut w).unwrap();

        let retained = buf.clone();
        assert_eq!(retained.bytes(), b"cd");
        assert_eq!(retained.remaining(), 2);
    }
}
