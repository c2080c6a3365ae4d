//! iochan error types.
//!
//! Every fallible operation returns `Result<T, IoError>`; nothing panics
//! across a boundary. Callers decide locally whether to retry
//! (`WouldBlock`), surface (`NativeOs`) or give up (`ResourceExhausted`).

use std::io;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    /// Allocation of a channel, task, buffer or thread failed.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),
    /// OS error with a raw error code.
    #[error("OS error {0}: {}", os_description(.0))]
    NativeOs(i32),
    /// OS error that carried no raw code.
    #[error("I/O error: {0:?}")]
    Io(io::ErrorKind),
    /// Non-blocking channel has no data (or no space) right now.
    #[error("operation would block")]
    WouldBlock,
    /// Operation was terminated by cancellation rather than completion.
    #[error("operation cancelled")]
    Cancelled,
    /// Zero-length read on a stream channel.
    #[error("end of stream")]
    EndOfStream,
    /// Channel was shut down by its context.
    #[error("channel already shut down")]
    AlreadyShutdown,
    /// Native resource was already released.
    #[error("channel already closed")]
    AlreadyClosed,
    /// Channel lacks the read capability.
    #[error("channel is not readable")]
    NotReadable,
    /// Channel lacks the write capability.
    #[error("channel is not writable")]
    NotWritable,
    /// Operation not supported by this channel variant.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The thread pool no longer accepts tasks.
    #[error("thread pool shut down")]
    PoolShutdown,
    /// Blocking here would wait on the calling thread itself.
    #[error("operation would deadlock the calling worker")]
    WouldDeadlock,
    /// The channel implementation panicked inside a read or write.
    #[error("channel panicked during I/O")]
    ChannelPanicked,
}

impl IoError {
    /// `Cancelled` and `EndOfStream` are expected ways for an operation to
    /// end; they are delivered to the completion routine but never reported
    /// as a failure of the context.
    #[inline]
    pub fn is_terminal_outcome(&self) -> bool {
        matches!(self, Self::Cancelled | Self::EndOfStream)
    }

    /// Raw OS code, if this error wraps one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::NativeOs(code) => Some(*code),
            _ => None,
        }
    }
}

impl From<io::Error> for IoError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::WouldBlock {
            return Self::WouldBlock;
        }
        match e.raw_os_error() {
            Some(code) => Self::NativeOs(code),
            None => Self::Io(e.kind()),
        }
    }
}

impl From<IoError> for io::Error {
    fn from(e: IoError) -> Self {
        match e {
            IoError::NativeOs(code) => io::Error::from_raw_os_error(code),
            IoError::Io(kind) => io::Error::from(kind),
            IoError::WouldBlock => io::Error::from(io::ErrorKind::WouldBlock),
            IoError::EndOfStream => io::Error::from(io::ErrorKind::UnexpectedEof),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

fn os_description(code: &i32) -> &'static str {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            nix::errno::Errno::from_raw(*code).desc()
        } else {
            let _ = code;
            "platform error"
        }
    }
}

pub type Result<T> = std::result::Result<T, IoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", IoError::Cancelled), "operation cancelled");
        assert_eq!(
            format!("{}", IoError::ResourceExhausted("task")),
            "resource exhausted: task"
        );
        assert!(format!("{}", IoError::NativeOs(2)).starts_with("OS error 2: "));
    }

    #[test]
    fn test_from_io_error() {
        let e: IoError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert_eq!(e, IoError::WouldBlock);

        let e: IoError = io::Error::from_raw_os_error(32).into();
        assert_eq!(e.raw_os_error(), Some(32));

        let e: IoError = io::Error::from(io::ErrorKind::WriteZero).into();
        assert_eq!(e, IoError::Io(io::ErrorKind::WriteZero));
    }

    #[test]
    fn test_terminal_outcomes() {
        assert!(IoError::Cancelled.is_terminal_outcome());
        assert!(IoError::EndOfStream.is_terminal_outcome());
        assert!(!IoError::NativeOs(5).is_terminal_outcome());
        assert!(!IoError::AlreadyShutdown.is_terminal_outcome());
        assert!(!IoError::ChannelPanicked.is_terminal_outcome());
    }

    #[test]
    fn test_round_trip_into_std() {
        let e: io::Error = IoError::NativeOs(104).into();
        assert_eq!(e.raw_os_error(), Some(104));
        let e: io::Error = IoError::EndOfStream.into();
        assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof);
    }
}
