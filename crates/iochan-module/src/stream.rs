//! File and socket channels.
//!
//! Both wrap a std handle in `RwLock<Option<_>>`: I/O runs under the read
//! lock (std implements `Read`/`Write` for `&File` and `&TcpStream`), and
//! `close` takes the handle out under the write lock so the descriptor is
//! released exactly once.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;

use iochan_core::channel::{Capabilities, Channel};
use iochan_core::error::{IoError, Result};
use parking_lot::RwLock;
use tracing::{debug, trace};

/// Retry a native call interrupted by a signal.
fn retry<T>(mut call: impl FnMut() -> io::Result<T>) -> Result<T> {
    loop {
        match call() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other.map_err(IoError::from),
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use std::os::unix::fs::FileExt;

        fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
            file.read_at(buf, offset)
        }

        fn pwrite(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
            file.write_at(buf, offset)
        }
    } else if #[cfg(windows)] {
        use std::os::windows::fs::FileExt;

        fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
            file.seek_read(buf, offset)
        }

        fn pwrite(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
            file.seek_write(buf, offset)
        }
    } else {
        fn pread(_file: &File, _buf: &mut [u8], _offset: u64) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "positional read"))
        }

        fn pwrite(_file: &File, _buf: &[u8], _offset: u64) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "positional write"))
        }
    }
}

// ============================================================================
// FileChannel
// ============================================================================

/// Regular file channel with positional I/O.
pub struct FileChannel {
    file: RwLock<Option<File>>,
    caps: Capabilities,
}

impl FileChannel {
    /// Open an existing file for reading.
    pub fn open_read(path: impl AsRef<Path>) -> Result<Self> {
        let file = retry(|| File::open(path.as_ref()))?;
        Ok(Self::from_file(file, Capabilities::READ))
    }

    /// Create (or truncate) a file for writing.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = retry(|| File::create(path.as_ref()))?;
        Ok(Self::from_file(file, Capabilities::WRITE))
    }

    /// Open for both directions, creating the file if missing.
    pub fn open_read_write(path: impl AsRef<Path>) -> Result<Self> {
        let file = retry(|| {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path.as_ref())
        })?;
        Ok(Self::from_file(file, Capabilities::DUPLEX))
    }

    /// Wrap an already-open file. `access` says which directions it was
    /// opened for; async and positional support are added here.
    pub fn from_file(file: File, access: Capabilities) -> Self {
        Self {
            file: RwLock::new(Some(file)),
            caps: access | Capabilities::ASYNC | Capabilities::SEEK,
        }
    }

    /// Current file length.
    pub fn len(&self) -> Result<u64> {
        let guard = self.file.read();
        let file = guard.as_ref().ok_or(IoError::AlreadyClosed)?;
        Ok(retry(|| file.metadata())?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl Channel for FileChannel {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if !self.caps.is_readable() {
            return Err(IoError::NotReadable);
        }
        let guard = self.file.read();
        let mut file = guard.as_ref().ok_or(IoError::AlreadyClosed)?;
        retry(|| file.read(buf))
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        if !self.caps.is_writable() {
            return Err(IoError::NotWritable);
        }
        let guard = self.file.read();
        let mut file = guard.as_ref().ok_or(IoError::AlreadyClosed)?;
        retry(|| file.write(buf))
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if !self.caps.is_readable() {
            return Err(IoError::NotReadable);
        }
        let guard = self.file.read();
        let file = guard.as_ref().ok_or(IoError::AlreadyClosed)?;
        retry(|| pread(file, buf, offset))
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        if !self.caps.is_writable() {
            return Err(IoError::NotWritable);
        }
        let guard = self.file.read();
        let file = guard.as_ref().ok_or(IoError::AlreadyClosed)?;
        retry(|| pwrite(file, buf, offset))
    }

    fn flush(&self) -> Result<()> {
        let guard = self.file.read();
        let mut file = guard.as_ref().ok_or(IoError::AlreadyClosed)?;
        retry(|| file.flush())
    }

    fn close(&self) -> Result<()> {
        if let Some(file) = self.file.write().take() {
            if self.caps.is_writable() {
                retry(|| file.sync_data())?;
            }
            trace!("file channel closed");
        }
        Ok(())
    }
}

// ============================================================================
// SocketChannel
// ============================================================================

/// Connected TCP stream channel.
pub struct SocketChannel {
    stream: RwLock<Option<TcpStream>>,
    peer: Option<SocketAddr>,
}

impl SocketChannel {
    /// Blocking connect to the first address that accepts.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let channel = Self::from_stream(stream);
        debug!(peer = ?channel.peer, "socket connected");
        Ok(channel)
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            stream: RwLock::new(Some(stream)),
            peer,
        }
    }

    /// Switch the socket between blocking and non-blocking mode. In
    /// non-blocking mode reads and writes that cannot progress return
    /// `WouldBlock`.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        let guard = self.stream.read();
        let stream = guard.as_ref().ok_or(IoError::AlreadyClosed)?;
        stream.set_nonblocking(nonblocking)?;
        Ok(())
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl Channel for SocketChannel {
    fn capabilities(&self) -> Capabilities {
        Capabilities::DUPLEX | Capabilities::ASYNC
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let guard = self.stream.read();
        let mut stream = guard.as_ref().ok_or(IoError::AlreadyClosed)?;
        retry(|| stream.read(buf))
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let guard = self.stream.read();
        let mut stream = guard.as_ref().ok_or(IoError::AlreadyClosed)?;
        retry(|| stream.write(buf))
    }

    fn close(&self) -> Result<()> {
        // Shut down first so a reader blocked under the read lock wakes up
        // and the write lock below can be taken.
        if let Some(stream) = self.stream.read().as_ref() {
            match stream.shutdown(Shutdown::Both) {
                Err(e) if e.kind() != io::ErrorKind::NotConnected => return Err(e.into()),
                _ => {}
            }
        }
        if self.stream.write().take().is_some() {
            debug!(peer = ?self.peer, "socket closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::path::PathBuf;
    use std::thread;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("iochan-{}-{}", tag, std::process::id()))
    }

    #[test]
    fn test_file_write_then_read() {
        let path = temp_path("rw");
        let w = FileChannel::create(&path).unwrap();
        assert!(w.capabilities().contains(Capabilities::WRITE | Capabilities::SEEK));
        assert!(!w.capabilities().is_readable());
        w.write_all(b"hello file").unwrap();
        w.close().unwrap();
        assert_eq!(w.write(b"x"), Err(IoError::AlreadyClosed));

        let r = FileChannel::open_read(&path).unwrap();
        assert_eq!(r.len().unwrap(), 10);
        let mut buf = [0u8; 32];
        assert_eq!(r.read(&mut buf).unwrap(), 10);
        assert_eq!(&buf[..10], b"hello file");
        assert_eq!(r.read(&mut buf).unwrap(), 0);
        assert_eq!(r.write(b"x"), Err(IoError::NotWritable));
        drop(r);
        std::fs::remove_file(&path).unwrap();
    }

    #[cfg(any(unix, windows))]
    #[test]
    fn test_file_positional() {
        let path = temp_path("pos");
        let f = FileChannel::open_read_write(&path).unwrap();
        assert_eq!(f.write_at(b"world", 6).unwrap(), 5);
        assert_eq!(f.write_at(b"hello ", 0).unwrap(), 6);
        let mut buf = [0u8; 5];
        assert_eq!(f.read_at(&mut buf, 6).unwrap(), 5);
        assert_eq!(&buf, b"world");
        assert_eq!(f.read_at(&mut buf, 100).unwrap(), 0);
        f.close().unwrap();
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_open_missing_file() {
        let err = FileChannel::open_read(temp_path("missing-never-created")).err().unwrap();
        assert!(matches!(err, IoError::NativeOs(_) | IoError::Io(io::ErrorKind::NotFound)));
    }

    #[test]
    fn test_socket_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).unwrap();
            conn.write_all(&buf).unwrap();
        });

        let s = SocketChannel::connect(addr).unwrap();
        assert_eq!(s.peer_addr(), Some(addr));
        s.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        let mut got = 0;
        while got < 4 {
            got += s.read(&mut buf[got..]).unwrap();
        }
        assert_eq!(&buf, b"ping");
        server.join().unwrap();

        assert_eq!(s.read(&mut buf).unwrap(), 0);
        s.close().unwrap();
        s.close().unwrap();
        assert_eq!(s.write(b"x"), Err(IoError::AlreadyClosed));
    }

    #[test]
    fn test_socket_nonblocking_would_block() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let s = SocketChannel::connect(listener.local_addr().unwrap()).unwrap();
        let (_conn, _) = listener.accept().unwrap();
        s.set_nonblocking(true).unwrap();
        assert_eq!(s.read(&mut [0u8; 8]), Err(IoError::WouldBlock));
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(SocketChannel::connect(addr).is_err());
    }
}
