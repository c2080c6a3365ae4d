//! Console channels over the process's standard streams.
//!
//! On unix the channel talks to descriptors 0/1/2 directly with no
//! userspace buffering, so bytes written through it interleave with other
//! writers exactly as the kernel sees them. Elsewhere it goes through the
//! std handles.
//!
//! `close` only detaches the channel; the process's standard descriptors
//! stay open.

use std::sync::atomic::{AtomicBool, Ordering};

use iochan_core::channel::{Capabilities, Channel};
use iochan_core::error::{IoError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdin,
    Stdout,
    Stderr,
}

pub struct ConsoleChannel {
    stream: Stream,
    closed: AtomicBool,
}

impl ConsoleChannel {
    pub fn stdin() -> Self {
        Self::on(Stream::Stdin)
    }

    pub fn stdout() -> Self {
        Self::on(Stream::Stdout)
    }

    pub fn stderr() -> Self {
        Self::on(Stream::Stderr)
    }

    fn on(stream: Stream) -> Self {
        Self { stream, closed: AtomicBool::new(false) }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(IoError::AlreadyClosed)
        } else {
            Ok(())
        }
    }
}

impl Channel for ConsoleChannel {
    fn capabilities(&self) -> Capabilities {
        let dir = match self.stream {
            Stream::Stdin => Capabilities::READ,
            Stream::Stdout | Stream::Stderr => Capabilities::WRITE,
        };
        dir | Capabilities::ASYNC
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.stream != Stream::Stdin {
            return Err(IoError::NotReadable);
        }
        self.check_open()?;
        sys::read(buf)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.stream == Stream::Stdin {
            return Err(IoError::NotWritable);
        }
        self.check_open()?;
        sys::write(self.stream, buf)
    }

    fn flush(&self) -> Result<()> {
        self.check_open()?;
        sys::flush(self.stream)
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod sys {
            use super::Stream;
            use iochan_core::error::{IoError, Result};

            fn fd(stream: Stream) -> libc::c_int {
                match stream {
                    Stream::Stdin => libc::STDIN_FILENO,
                    Stream::Stdout => libc::STDOUT_FILENO,
                    Stream::Stderr => libc::STDERR_FILENO,
                }
            }

            /// Map a raw syscall return, retrying on EINTR.
            fn check(mut call: impl FnMut() -> isize) -> Result<usize> {
                loop {
                    let ret = call();
                    if ret >= 0 {
                        return Ok(ret as usize);
                    }
                    let err = std::io::Error::last_os_error();
                    if err.raw_os_error() != Some(libc::EINTR) {
                        return Err(IoError::from(err));
                    }
                }
            }

            pub(super) fn read(buf: &mut [u8]) -> Result<usize> {
                let fd = fd(Stream::Stdin);
                // SAFETY: `buf` is a valid writable region of `buf.len()` bytes.
                check(|| unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) })
            }

            pub(super) fn write(stream: Stream, buf: &[u8]) -> Result<usize> {
                let fd = fd(stream);
                // SAFETY: `buf` is a valid readable region of `buf.len()` bytes.
                check(|| unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) })
            }

            pub(super) fn flush(_stream: Stream) -> Result<()> {
                Ok(())
            }
        }
    } else {
        mod sys {
            use super::Stream;
            use iochan_core::error::Result;
            use std::io::{self, Read, Write};

            pub(super) fn read(buf: &mut [u8]) -> Result<usize> {
                Ok(io::stdin().lock().read(buf)?)
            }

            pub(super) fn write(stream: Stream, buf: &[u8]) -> Result<usize> {
                let n = match stream {
                    Stream::Stderr => io::stderr().lock().write(buf)?,
                    _ => io::stdout().lock().write(buf)?,
                };
                Ok(n)
            }

            pub(super) fn flush(stream: Stream) -> Result<()> {
                match stream {
                    Stream::Stdout => io::stdout().lock().flush()?,
                    Stream::Stderr => io::stderr().lock().flush()?,
                    Stream::Stdin => {}
                }
                Ok(())
            }
        }
    }
}
