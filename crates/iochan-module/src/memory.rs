//! Memory buffer channels.
//!
//! `MemoryReader` serves bytes from an owned buffer through a cursor;
//! `MemoryWriter` collects written bytes into a growable buffer. Both
//! support positional I/O and can be bound to an I/O context.
//!
//! Clones of a `MemoryWriter` share one buffer, so a test can hand one
//! clone to a context and inspect the other.

use iochan_core::channel::{Capabilities, Channel};
use iochan_core::error::{IoError, Result};
use iochan_core::shared::Shared;
use parking_lot::Mutex;

struct ReaderState {
    data: Vec<u8>,
    pos: usize,
    closed: bool,
}

/// Readable channel over an owned byte buffer.
pub struct MemoryReader {
    state: Mutex<ReaderState>,
}

impl MemoryReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            state: Mutex::new(ReaderState { data, pos: 0, closed: false }),
        }
    }

    /// Bytes not yet consumed by `read`.
    pub fn remaining(&self) -> usize {
        let state = self.state.lock();
        state.data.len() - state.pos
    }

    pub fn position(&self) -> usize {
        self.state.lock().pos
    }
}

impl From<&[u8]> for MemoryReader {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl Channel for MemoryReader {
    fn capabilities(&self) -> Capabilities {
        Capabilities::READ | Capabilities::SEEK | Capabilities::ASYNC
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(IoError::AlreadyClosed);
        }
        let start = state.pos;
        let n = buf.len().min(state.data.len() - start);
        buf[..n].copy_from_slice(&state.data[start..start + n]);
        state.pos += n;
        Ok(n)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let state = self.state.lock();
        if state.closed {
            return Err(IoError::AlreadyClosed);
        }
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(state.data.len());
        let n = buf.len().min(state.data.len() - start);
        buf[..n].copy_from_slice(&state.data[start..start + n]);
        Ok(n)
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.closed = true;
        state.data = Vec::new();
        state.pos = 0;
        Ok(())
    }
}

struct WriterState {
    data: Vec<u8>,
    closed: bool,
}

/// Writable channel collecting bytes in memory.
#[derive(Clone)]
pub struct MemoryWriter {
    state: Shared<Mutex<WriterState>>,
    /// Maximum buffer size; writes past it are partial, then `WouldBlock`.
    limit: Option<usize>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self {
            state: Shared::new(Mutex::new(WriterState { data: Vec::new(), closed: false })),
            limit: None,
        }
    }

    /// A writer that holds at most `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit), ..Self::new() }
    }

    /// Snapshot of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.state.lock().data.clone()
    }

    /// Take the written bytes, leaving the buffer empty.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().data)
    }

    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many of `wanted` bytes fit if the buffer must end at `end`.
    fn admit(&self, end: usize, wanted: usize) -> usize {
        match self.limit {
            Some(limit) => wanted.min(limit.saturating_sub(end - wanted)),
            None => wanted,
        }
    }
}

impl Default for MemoryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for MemoryWriter {
    fn capabilities(&self) -> Capabilities {
        Capabilities::WRITE | Capabilities::SEEK | Capabilities::ASYNC
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(IoError::AlreadyClosed);
        }
        let n = self.admit(state.data.len() + buf.len(), buf.len());
        if n == 0 && !buf.is_empty() {
            return Err(IoError::WouldBlock);
        }
        state
            .data
            .try_reserve(n)
            .map_err(|_| IoError::ResourceExhausted("memory channel buffer"))?;
        state.data.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(IoError::AlreadyClosed);
        }
        let start = usize::try_from(offset)
            .map_err(|_| IoError::InvalidArgument("offset beyond address space"))?;
        let end = start
            .checked_add(buf.len())
            .ok_or(IoError::InvalidArgument("offset beyond address space"))?;
        let n = self.admit(end, buf.len());
        if n == 0 && !buf.is_empty() {
            return Err(IoError::WouldBlock);
        }
        let new_len = state.data.len().max(start + n);
        if new_len > state.data.len() {
            let grow = new_len - state.data.len();
            state
                .data
                .try_reserve(grow)
                .map_err(|_| IoError::ResourceExhausted("memory channel buffer"))?;
            state.data.resize(new_len, 0);
        }
        state.data[start..start + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }

    fn close(&self) -> Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn test_write_then_read_back() {
        for n in [0usize, 1, 4096, 1 << 20] {
            let src = pattern(n);
            let writer = MemoryWriter::new();
            writer.write_all(&src).unwrap();

            let reader = MemoryReader::new(writer.contents());
            let mut out = Vec::with_capacity(n);
            let mut chunk = [0u8; 1000];
            loop {
                match reader.read(&mut chunk).unwrap() {
                    0 => break,
                    k => out.extend_from_slice(&chunk[..k]),
                }
            }
            assert_eq!(out, src, "length {n}");
        }
    }

    #[test]
    fn test_reader_cursor_and_positional() {
        let r = MemoryReader::from(&b"0123456789"[..]);
        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(r.remaining(), 6);

        assert_eq!(r.read_at(&mut buf, 8).unwrap(), 2);
        assert_eq!(&buf[..2], b"89");
        assert_eq!(r.read_at(&mut buf, 100).unwrap(), 0);
        // positional reads leave the cursor alone
        assert_eq!(r.position(), 4);
    }

    #[test]
    fn test_limit_gives_partial_then_would_block() {
        let w = MemoryWriter::with_limit(5);
        assert_eq!(w.write(b"abc").unwrap(), 3);
        assert_eq!(w.write(b"defg").unwrap(), 2);
        assert_eq!(w.write(b"h"), Err(IoError::WouldBlock));
        assert_eq!(w.write(b"").unwrap(), 0);
        assert_eq!(w.contents(), b"abcde");
    }

    #[test]
    fn test_take_frees_room_under_limit() {
        let w = MemoryWriter::with_limit(4);
        assert_eq!(w.write(b"abcd").unwrap(), 4);
        assert_eq!(w.write(b"e"), Err(IoError::WouldBlock));
        assert_eq!(w.take(), b"abcd");
        assert!(w.is_empty());
        assert_eq!(w.write(b"e").unwrap(), 1);
        assert_eq!(w.contents(), b"e");
    }

    #[test]
    fn test_write_at_extends_with_zeros() {
        let w = MemoryWriter::new();
        assert_eq!(w.write_at(b"xy", 3).unwrap(), 2);
        assert_eq!(w.contents(), b"\0\0\0xy");
        assert_eq!(w.write_at(b"A", 0).unwrap(), 1);
        assert_eq!(w.contents(), b"A\0\0xy");
    }

    #[test]
    fn test_closed_channels_refuse() {
        let r = MemoryReader::new(vec![1, 2]);
        r.close().unwrap();
        r.close().unwrap();
        assert_eq!(r.read(&mut [0u8; 2]), Err(IoError::AlreadyClosed));

        let w = MemoryWriter::new();
        let other = w.clone();
        other.close().unwrap();
        assert_eq!(w.write(b"x"), Err(IoError::AlreadyClosed));
    }

    #[test]
    fn test_wrong_direction() {
        let r = MemoryReader::new(vec![]);
        assert_eq!(r.write(b"x"), Err(IoError::NotWritable));
        let w = MemoryWriter::new();
        assert_eq!(w.read(&mut [0u8; 1]), Err(IoError::NotReadable));
    }
}
