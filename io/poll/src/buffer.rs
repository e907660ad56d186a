//! Growable read/write buffer with single-syscall scatter reads.
//!
//! The buffer keeps three indices into one allocation:
//!
//! ```text
//! | consumed | readable | writable |
//! 0       read_pos   write_pos   capacity
//! ```
//!
//! Appending compacts (shifting unread bytes to the front) before it grows,
//! and growth at least doubles the allocation. `read_from` pairs the spare
//! tail with a 64 KiB stack buffer in one `readv`, so a single syscall can
//! drain an edge-triggered socket regardless of the buffer's current
//! capacity; overflow landing in the stack buffer is appended afterwards.

use std::io::{self, IoSliceMut, Read};

/// Size of the auxiliary stack buffer used by [`Buffer::read_from`].
const STACK_BUF_SIZE: usize = 65536;

/// Default initial capacity.
const INITIAL_CAPACITY: usize = 1024;

/// A growable byte buffer with separate read and write cursors.
pub struct Buffer {
    data: Vec<u8>,
    /// Bytes before this have been consumed.
    read_pos: usize,
    /// Bytes have been written up to here.
    write_pos: usize,
}

impl Buffer {
    /// Create a buffer with the default initial capacity.
    pub fn new() -> Buffer {
        Buffer::with_capacity(INITIAL_CAPACITY)
    }

    /// Create a buffer with the given initial capacity.
    pub fn with_capacity(capacity: usize) -> Buffer {
        Buffer {
            data: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Total capacity of the underlying allocation.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The unread bytes. Valid until the next mutation.
    pub fn readable(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    /// Number of unread bytes.
    pub fn readable_len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Number of bytes that can be written without compacting or growing.
    pub fn writable_len(&self) -> usize {
        self.data.len() - self.write_pos
    }

    /// Number of already-consumed bytes at the front.
    pub fn prependable_len(&self) -> usize {
        self.read_pos
    }

    /// True if there is nothing to read.
    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// Copy `bytes` into the buffer, compacting or growing as needed.
    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        self.data[self.write_pos..self.write_pos + bytes.len()].copy_from_slice(bytes);
        self.write_pos += bytes.len();
    }

    /// Advance the read cursor by `n`.
    ///
    /// # Panics
    /// Panics if `n` exceeds the readable length.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.readable_len());
        self.read_pos += n;
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        }
    }

    /// Advance the read cursor to `offset` within the readable region.
    ///
    /// The offset form of retrieve-until: offsets stay valid when the buffer
    /// compacts, unlike pointers into the readable slice.
    pub fn consume_until(&mut self, offset: usize) {
        self.consume(offset);
    }

    /// Discard everything and reset both cursors.
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Move the contents out as an owned string and reset the cursors.
    pub fn take_all_string(&mut self) -> String {
        let s = String::from_utf8_lossy(self.readable()).into_owned();
        self.clear();
        s
    }

    /// Read once from `reader` into (spare tail, 64 KiB stack buffer).
    ///
    /// Returns the total bytes received. Overflow that landed in the stack
    /// buffer is appended to the tail afterwards. `WouldBlock` surfaces as
    /// an error; callers treat it as zero progress, not failure.
    pub fn read_from(&mut self, reader: &mut impl Read) -> io::Result<usize> {
        let mut stack = [0u8; STACK_BUF_SIZE];
        let spare_len = self.data.len() - self.write_pos;

        let n = {
            let (_, spare) = self.data.split_at_mut(self.write_pos);
            let mut iovs = [IoSliceMut::new(spare), IoSliceMut::new(&mut stack)];
            reader.read_vectored(&mut iovs)?
        };

        if n <= spare_len {
            self.write_pos += n;
        } else {
            self.write_pos = self.data.len();
            self.append(&stack[..n - spare_len]);
        }
        Ok(n)
    }

    fn ensure_writable(&mut self, n: usize) {
        if self.writable_len() >= n {
            return;
        }
        if self.writable_len() + self.prependable_len() < n {
            let needed = self.readable_len() + n;
            let new_cap = needed.max(self.data.len() * 2);
            self.data.resize(new_cap, 0);
        }
        self.compact();
    }

    fn compact(&mut self) {
        let len = self.readable_len();
        self.data.copy_within(self.read_pos..self.write_pos, 0);
        self.read_pos = 0;
        self.write_pos = len;
    }
}

impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn invariant(buf: &Buffer) {
        assert_eq!(
            buf.readable_len() + buf.writable_len() + buf.prependable_len(),
            buf.capacity()
        );
    }

    #[test]
    fn test_append_then_consume() {
        let mut buf = Buffer::new();
        buf.append(b"hello ");
        buf.append(b"world");
        invariant(&buf);
        assert_eq!(buf.readable(), b"hello world");

        buf.consume(6);
        assert_eq!(buf.readable(), b"world");
        invariant(&buf);

        buf.consume(5);
        assert!(buf.is_empty());
        invariant(&buf);
    }

    #[test]
    fn test_readable_equals_appended_minus_consumed() {
        let mut buf = Buffer::with_capacity(8);
        let mut expected: Vec<u8> = Vec::new();
        for i in 0..32u8 {
            let chunk = [i; 5];
            buf.append(&chunk);
            expected.extend_from_slice(&chunk);
            if i % 3 == 0 {
                buf.consume(4);
                expected.drain(..4);
            }
            assert_eq!(buf.readable(), &expected[..]);
            invariant(&buf);
        }
    }

    #[test]
    fn test_compaction_reclaims_consumed_prefix() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(b"0123456789");
        buf.consume(8);
        // 6 writable at the tail, 8 reclaimable at the front: this append
        // fits only after compaction and must not grow the allocation.
        buf.append(b"abcdefghijkl");
        assert_eq!(buf.capacity(), 16);
        assert_eq!(buf.readable(), b"89abcdefghijkl");
        invariant(&buf);
    }

    #[test]
    fn test_growth_at_least_doubles() {
        let mut buf = Buffer::with_capacity(8);
        buf.append(&[7u8; 64]);
        assert!(buf.capacity() >= 64);
        assert_eq!(buf.readable(), &[7u8; 64][..]);
        invariant(&buf);
    }

    #[test]
    fn test_take_all_string_resets_cursors() {
        let mut buf = Buffer::new();
        buf.append(b"drained");
        assert_eq!(buf.take_all_string(), "drained");
        assert!(buf.is_empty());
        assert_eq!(buf.prependable_len(), 0);
    }

    #[test]
    fn test_read_from_fits_in_spare() {
        let mut buf = Buffer::with_capacity(64);
        let mut src = Cursor::new(b"request bytes".to_vec());
        let n = buf.read_from(&mut src).unwrap();
        assert_eq!(n, 13);
        assert_eq!(buf.readable(), b"request bytes");
        invariant(&buf);
    }

    /// Reader that fills every provided slice, exercising the overflow path.
    struct FloodReader(Vec<u8>);

    impl Read for FloodReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.0.len().min(buf.len());
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0.drain(..n);
            Ok(n)
        }

        fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
            let mut total = 0;
            for buf in bufs {
                total += self.read(buf)?;
            }
            Ok(total)
        }
    }

    #[test]
    fn test_read_from_overflow_lands_in_stack_buffer() {
        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let mut buf = Buffer::with_capacity(100);
        let mut src = FloodReader(payload.clone());
        let n = buf.read_from(&mut src).unwrap();
        assert_eq!(n, 1000);
        assert_eq!(buf.readable(), &payload[..]);
        invariant(&buf);
    }

    #[test]
    fn test_read_from_with_full_buffer_uses_stack_only() {
        let mut buf = Buffer::with_capacity(4);
        buf.append(b"full");
        let mut src = FloodReader(b"overflow".to_vec());
        let n = buf.read_from(&mut src).unwrap();
        assert_eq!(n, 8);
        assert_eq!(buf.readable(), b"fulloverflow");
    }

    #[test]
    fn test_would_block_surfaces_as_error() {
        struct Blocked;
        impl Read for Blocked {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
        }
        let mut buf = Buffer::new();
        let err = buf.read_from(&mut Blocked).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(buf.is_empty());
    }
}
