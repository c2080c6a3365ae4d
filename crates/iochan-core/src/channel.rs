//! Byte channel abstraction.
//!
//! A `Channel` is a readable and/or writable endpoint over a byte resource
//! (socket, file, console stream, memory buffer). Calls are synchronous and
//! block the calling thread on the native call; asynchronous use goes
//! through an I/O context, which runs the same calls on its own threads.
//!
//! # Implementors (in `iochan-module`)
//!
//! - `MemoryReader` / `MemoryWriter`: owned byte buffers.
//! - `FileChannel`: regular files, with positional I/O.
//! - `SocketChannel`: connected TCP streams, optionally non-blocking.
//! - `ConsoleChannel`: stdin / stdout / stderr.
//!
//! **Contract:**
//! - Methods take `&self`. A channel may be shared between threads, but
//!   two concurrent `read`s (or two concurrent `write`s) on one channel need
//!   external serialization. A `read` concurrent with a `write` is allowed.
//! - `read` returning `Ok(0)` for a non-empty buffer means end-of-stream.
//! - `write` may transfer fewer bytes than asked; use `write_all` to retry.
//! - Errors are returned, never thrown.

use std::io;
use std::ops::BitOr;

use crate::error::{IoError, Result};
use crate::shared::Shared;

/// Capability bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1 << 0);
    pub const WRITE: Self = Self(1 << 1);
    /// Channel may be bound to an I/O context.
    pub const ASYNC: Self = Self(1 << 2);
    /// Channel supports positional I/O (`read_at` / `write_at`).
    pub const SEEK: Self = Self(1 << 3);
    pub const DUPLEX: Self = Self(Self::READ.0 | Self::WRITE.0);

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn is_readable(self) -> bool {
        self.contains(Self::READ)
    }

    #[inline]
    pub const fn is_writable(self) -> bool {
        self.contains(Self::WRITE)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// A synchronous byte channel.
pub trait Channel: Send + Sync {
    /// What this channel can do. Fixed for the channel's lifetime.
    fn capabilities(&self) -> Capabilities;

    /// Read up to `buf.len()` bytes.
    fn read(&self, _buf: &mut [u8]) -> Result<usize> {
        Err(IoError::NotReadable)
    }

    /// Write up to `buf.len()` bytes; returns how many were taken.
    fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(IoError::NotWritable)
    }

    /// Read at an absolute offset without moving any cursor.
    fn read_at(&self, _buf: &mut [u8], _offset: u64) -> Result<usize> {
        if self.capabilities().is_readable() {
            Err(IoError::Unsupported("positional read"))
        } else {
            Err(IoError::NotReadable)
        }
    }

    /// Write at an absolute offset without moving any cursor.
    fn write_at(&self, _buf: &[u8], _offset: u64) -> Result<usize> {
        if self.capabilities().is_writable() {
            Err(IoError::Unsupported("positional write"))
        } else {
            Err(IoError::NotWritable)
        }
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Release the native resource now instead of at drop.
    ///
    /// Later reads and writes return `AlreadyClosed`. Closing twice is a
    /// no-op.
    fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Write the whole buffer, retrying partial writes.
    ///
    /// A `WouldBlock` from a non-blocking channel is returned as-is; the
    /// bytes written before it are lost to the caller, so non-blocking
    /// users should drive `write` themselves.
    fn write_all(&self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.write(buf)? {
                0 => return Err(IoError::Io(io::ErrorKind::WriteZero)),
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }
}

/// Shared handle to any channel.
pub type ChannelRef = Shared<dyn Channel>;

/// Move a concrete channel behind a `ChannelRef`.
pub fn share<C: Channel + 'static>(channel: C) -> ChannelRef {
    Shared::from_box(Box::new(channel))
}

/// `std::io` view of a channel.
///
/// This is the read/write boundary handed to layers that sit above the
/// channel (TLS, XML, text codecs); they never see the pool or context.
pub struct ChannelIo<'a> {
    channel: &'a dyn Channel,
}

impl<'a> ChannelIo<'a> {
    pub fn new(channel: &'a dyn Channel) -> Self {
        Self { channel }
    }
}

impl io::Read for ChannelIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read(buf).map_err(io::Error::from)
    }
}

impl io::Write for ChannelIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.channel.write(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.channel.flush().map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::Mutex;

    /// Accepts at most `chunk` bytes per write.
    struct TrickleSink {
        chunk: usize,
        data: Mutex<Vec<u8>>,
    }

    impl Channel for TrickleSink {
        fn capabilities(&self) -> Capabilities {
            Capabilities::WRITE
        }

        fn write(&self, buf: &[u8]) -> Result<usize> {
            let n = buf.len().min(self.chunk);
            self.data.lock().unwrap().extend_from_slice(&buf[..n]);
            Ok(n)
        }
    }

    struct Zeros;

    impl Channel for Zeros {
        fn capabilities(&self) -> Capabilities {
            Capabilities::READ
        }

        fn read(&self, buf: &mut [u8]) -> Result<usize> {
            buf.fill(0);
            Ok(buf.len())
        }
    }

    #[test]
    fn test_capability_bits() {
        let caps = Capabilities::READ | Capabilities::ASYNC;
        assert!(caps.is_readable());
        assert!(!caps.is_writable());
        assert!(caps.contains(Capabilities::ASYNC));
        assert!(Capabilities::DUPLEX.contains(Capabilities::READ | Capabilities::WRITE));
        assert!(Capabilities::NONE.contains(Capabilities::NONE));
    }

    #[test]
    fn test_missing_capability_defaults() {
        let z = Zeros;
        assert_eq!(z.write(b"x"), Err(IoError::NotWritable));
        assert_eq!(z.write_at(b"x", 3), Err(IoError::NotWritable));
        assert_eq!(
            z.read_at(&mut [0u8; 4], 0),
            Err(IoError::Unsupported("positional read"))
        );
    }

    #[test]
    fn test_write_all_retries_partial_writes() {
        let sink = TrickleSink { chunk: 3, data: Mutex::new(Vec::new()) };
        sink.write_all(b"hello, channel").unwrap();
        assert_eq!(&*sink.data.lock().unwrap(), b"hello, channel");
    }

    #[test]
    fn test_write_all_reports_write_zero() {
        let sink = TrickleSink { chunk: 0, data: Mutex::new(Vec::new()) };
        assert_eq!(sink.write_all(b"x"), Err(IoError::Io(io::ErrorKind::WriteZero)));
    }

    #[test]
    fn test_std_io_adapter() {
        let zeros = share(Zeros);
        let mut buf = [7u8; 5];
        ChannelIo::new(&*zeros).read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0; 5]);

        let err = ChannelIo::new(&*zeros).write(b"no").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }
}
