//! The byte-stream channel underlying a session.
//!
//! A [`Channel`] is shared, behind an [`Arc`](std::sync::Arc), between the supervisor
//! and both workers: the inbound worker reads while the outbound worker writes, and
//! the supervisor may close it at any time, which aborts any blocking read.

use core::time::Duration;
use std::{
    io::{self, Read, Write},
    net::{self, SocketAddr, TcpStream},
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use crate::{Error, io_err_is_transient};

/// A bidirectional byte stream usable from several threads at once.
pub trait Stream: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Shuts down both directions of the stream.
    fn shutdown(&self) -> io::Result<()>;
}

impl Stream for TcpStream {
    #[inline(always)]
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut &*self, buf)
    }

    #[inline(always)]
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        Write::write(&mut &*self, buf)
    }

    #[inline(always)]
    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, net::Shutdown::Both)
    }
}

/// One session's connection to the server.
#[derive(Debug)]
pub struct Channel<S = TcpStream> {
    stream: S,
    session: u64,
    live: AtomicBool,
    closed: AtomicBool,
    // frames must never interleave on the wire
    write_lock: Mutex<()>,
}

impl Channel {
    /// Connects to `addr`, `timeout` bounds the connection attempt and every
    /// subsequent read and write.
    pub fn open(addr: SocketAddr, timeout: Duration, session: u64) -> Result<Self, Error> {
        let connect_err = |source| Error::Connect { addr, source };

        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(connect_err)?;

        stream
            .set_read_timeout(Some(timeout))
            .map_err(connect_err)?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(connect_err)?;
        stream.set_nodelay(true).map_err(connect_err)?;

        Ok(Self::new(stream, session))
    }
}

impl<S: Stream> Channel<S> {
    /// Pause between retries of a read that hit a transient condition.
    pub const TRANSIENT_PAUSE: Duration = Duration::from_millis(5);

    pub fn new(stream: S, session: u64) -> Self {
        Self {
            stream,
            session,
            live: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        }
    }

    #[inline(always)]
    pub fn session(&self) -> u64 {
        self.session
    }

    #[inline(always)]
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Whether this channel may still be used, i.e. no one has reported it lost.
    #[inline(always)]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Marks this channel as lost. Returns `true` if it was live until now.
    ///
    /// The socket is left open, the supervisor closes it once it notices.
    #[inline(always)]
    pub fn invalidate(&self) -> bool {
        self.live.swap(false, Ordering::AcqRel)
    }

    /// Shuts the underlying stream down. Subsequent calls do nothing.
    pub fn close(&self) {
        self.live.store(false, Ordering::Release);

        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // the peer may well have gone already
        if let Err(e) = self.stream.shutdown() {
            log::debug!("session {}: shutdown: {e}", self.session);
        }
    }

    /// Writes `bytes` in a single write.
    ///
    /// A partial write leaves the stream in the middle of a frame, and is reported as
    /// [`Error::ShortWrite`]. Invalidated channels are not written to, and report
    /// [`Error::Closed`].
    pub fn send(&self, bytes: &[u8]) -> Result<usize, Error> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.is_live() {
            return Err(Error::Closed);
        }

        self.write_once(bytes)
    }

    /// Invalidates this channel, then writes `bytes`, which are the last bytes it will
    /// ever send.
    ///
    /// Concurrent [`send`](Self::send)s either complete before `bytes` are written, or
    /// fail with [`Error::Closed`].
    pub fn send_last(&self, bytes: &[u8]) -> Result<usize, Error> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.invalidate();

        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        self.write_once(bytes)
    }

    fn write_once(&self, bytes: &[u8]) -> Result<usize, Error> {
        loop {
            return match self.stream.write(bytes) {
                Ok(n) if n == bytes.len() => Ok(n),
                Ok(n) => Err(Error::ShortWrite {
                    written: n,
                    expected: bytes.len(),
                }),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e.into()),
            };
        }
    }

    /// Fills `buf` entirely.
    ///
    /// Timeouts and interruptions are retried until the channel is invalidated. A
    /// stream reaching its end is reported as [`Error::Closed`].
    pub fn receive_exact(&self, mut buf: &mut [u8]) -> Result<(), Error> {
        while !buf.is_empty() {
            match self.stream.read(buf) {
                Ok(0) => return Err(Error::Closed),
                Ok(n) => buf = &mut core::mem::take(&mut buf)[n..],
                Err(e) if io_err_is_transient(e.kind()) => {
                    if !self.is_live() {
                        return Err(Error::Closed);
                    }

                    log::trace!("session {}: transient read error: {e}", self.session);
                    thread::sleep(Self::TRANSIENT_PAUSE);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    /// Reads whatever is available into `buf`, at least one byte.
    ///
    /// Unlike [`receive_exact`](Self::receive_exact), timeouts are reported.
    pub fn receive(&self, buf: &mut [u8]) -> Result<usize, Error> {
        loop {
            return match self.stream.read(buf) {
                Ok(0) if !buf.is_empty() => Err(Error::Closed),
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e.into()),
            };
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::{collections::VecDeque, sync::atomic::AtomicUsize};

    /// A stream replaying a script of reads and recording writes.
    ///
    /// Once the script runs out, reads report the end of the stream.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedStream {
        reads: Mutex<VecDeque<io::Result<Vec<u8>>>>,
        written: Mutex<Vec<u8>>,
        max_write: Option<usize>,
        shutdowns: AtomicUsize,
    }

    impl ScriptedStream {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn with_max_write(mut self, max: usize) -> Self {
            self.max_write = Some(max);
            self
        }

        pub(crate) fn then_read(self, bytes: impl Into<Vec<u8>>) -> Self {
            self.reads.lock().unwrap().push_back(Ok(bytes.into()));
            self
        }

        pub(crate) fn then_fail(self, kind: io::ErrorKind) -> Self {
            self.reads.lock().unwrap().push_back(Err(kind.into()));
            self
        }

        pub(crate) fn then_fail_n(self, kind: io::ErrorKind, n: usize) -> Self {
            (0..n).fold(self, |s, _| s.then_fail(kind))
        }

        pub(crate) fn written(&self) -> Vec<u8> {
            self.written.lock().unwrap().clone()
        }

        pub(crate) fn shutdowns(&self) -> usize {
            self.shutdowns.load(Ordering::Relaxed)
        }
    }

    impl Stream for ScriptedStream {
        fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
            if self.shutdowns() > 0 {
                return Ok(0);
            }

            let mut reads = self.reads.lock().unwrap();

            match reads.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(mut bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);

                    if n < bytes.len() {
                        reads.push_front(Ok(bytes.split_off(n)));
                    }

                    Ok(n)
                }
            }
        }

        fn write(&self, buf: &[u8]) -> io::Result<usize> {
            let n = self.max_write.map_or(buf.len(), |max| max.min(buf.len()));
            self.written.lock().unwrap().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn shutdown(&self) -> io::Result<()> {
            self.shutdowns.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{mock::ScriptedStream, *};

    #[test]
    fn receive_exact_retries_transient_errors() {
        let stream = ScriptedStream::new()
            .then_fail_n(io::ErrorKind::WouldBlock, 3)
            .then_read([1, 2])
            .then_fail(io::ErrorKind::TimedOut)
            .then_fail(io::ErrorKind::Interrupted)
            .then_read([3, 4, 5, 6]);

        let channel = Channel::new(stream, 1);

        let mut buf = [0; 5];
        channel.receive_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5]);

        // leftovers stay available for the next read
        let mut buf = [0; 1];
        channel.receive_exact(&mut buf).unwrap();
        assert_eq!(buf, [6]);
    }

    #[test]
    fn receive_exact_reports_closed_stream() {
        let channel = Channel::new(ScriptedStream::new().then_read([1]), 1);

        let mut buf = [0; 2];
        assert!(matches!(channel.receive_exact(&mut buf), Err(Error::Closed)));
    }

    #[test]
    fn receive_exact_surfaces_fatal_errors() {
        let stream = ScriptedStream::new().then_fail(io::ErrorKind::ConnectionReset);
        let channel = Channel::new(stream, 1);

        let mut buf = [0; 2];
        match channel.receive_exact(&mut buf) {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn nothing_is_sent_after_the_last_frame() {
        let channel = Channel::new(ScriptedStream::new(), 1);

        assert_eq!(channel.send(&[1, 2]).unwrap(), 2);
        assert_eq!(channel.send_last(&[0x88, 0x80]).unwrap(), 2);

        assert!(!channel.is_live());
        assert!(matches!(channel.send(&[3, 4]), Err(Error::Closed)));
        assert_eq!(channel.get_ref().written(), [1, 2, 0x88, 0x80]);

        channel.close();
        assert!(matches!(channel.send_last(&[0x88, 0x80]), Err(Error::Closed)));
    }

    #[test]
    fn receive_exact_abandons_invalidated_channel() {
        let stream = ScriptedStream::new()
            .then_fail(io::ErrorKind::WouldBlock)
            .then_read([1, 2]);
        let channel = Channel::new(stream, 1);

        assert!(channel.invalidate());
        assert!(!channel.invalidate());

        let mut buf = [0; 2];
        assert!(matches!(channel.receive_exact(&mut buf), Err(Error::Closed)));
    }

    #[test]
    fn short_write_is_an_error() {
        let channel = Channel::new(ScriptedStream::new().with_max_write(3), 1);

        assert_eq!(channel.send(&[1, 2, 3]).unwrap(), 3);
        assert!(matches!(
            channel.send(&[1, 2, 3, 4]),
            Err(Error::ShortWrite {
                written: 3,
                expected: 4
            })
        ));
    }

    #[test]
    fn close_is_idempotent() {
        let channel = Channel::new(ScriptedStream::new().then_read([1]), 7);
        assert_eq!(channel.session(), 7);
        assert!(channel.is_live());

        channel.close();
        channel.close();

        assert!(!channel.is_live());
        assert_eq!(channel.get_ref().shutdowns(), 1);

        let mut buf = [0; 1];
        assert!(matches!(channel.receive(&mut buf), Err(Error::Closed)));
    }

    #[test]
    fn receive_returns_partial_data() {
        let channel = Channel::new(ScriptedStream::new().then_read(*b"HTTP"), 1);

        let mut buf = [0; 16];
        assert_eq!(channel.receive(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"HTTP");
    }

    #[test]
    fn loopback_open() {
        let listener = net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0; 4];
            stream.read_exact(&mut buf).unwrap();
            stream.write_all(&buf).unwrap();
        });

        let channel = Channel::open(addr, Duration::from_secs(5), 1).unwrap();
        channel.send(b"ping").unwrap();

        let mut buf = [0; 4];
        channel.receive_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        server.join().unwrap();
        channel.close();
    }
}
