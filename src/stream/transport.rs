use crate::limits::ExchangeLimits;
use std::{
    fmt,
    future::Future,
    io::{self, Read, Write},
    net,
    pin::Pin,
    time::{Duration, Instant},
};

/// A boxed future that can be handed to another task.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Readiness a suspended machine waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

/// A bidirectional byte stream an exchange runs over.
///
/// Blocking transports block inside `read`/`write`. Non-blocking transports
/// report [`io::ErrorKind::WouldBlock`] instead and resolve [`ready`](Self::ready)
/// once the operation may be retried; this is what the cooperative executor relies on.
pub trait Transport: Read + Write + Send + 'static {
    /// Resolves when the transport is ready for `interest`.
    ///
    /// The default resolves immediately, which is correct for blocking transports.
    fn ready(&mut self, interest: Interest) -> BoxFuture<'_, io::Result<()>> {
        let _ = interest;
        Box::pin(std::future::ready(Ok::<(), io::Error>(())))
    }

    /// Applies socket-level timeouts, if the transport has any.
    fn set_timeouts(&self, read: Duration, write: Duration) -> io::Result<()> {
        let _ = (read, write);
        Ok(())
    }
}

impl Transport for net::TcpStream {
    fn set_timeouts(&self, read: Duration, write: Duration) -> io::Result<()> {
        self.set_read_timeout(Some(read))?;
        self.set_write_timeout(Some(write))
    }
}

/// A tokio socket driven through non-blocking `try_read`/`try_write`.
#[derive(Debug)]
pub struct TokioStream(tokio::net::TcpStream);

impl TokioStream {
    #[inline]
    pub fn new(stream: tokio::net::TcpStream) -> Self {
        Self(stream)
    }

    #[inline]
    pub fn get_ref(&self) -> &tokio::net::TcpStream {
        &self.0
    }
}

impl Read for TokioStream {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }
}

impl Write for TokioStream {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for TokioStream {
    fn ready(&mut self, interest: Interest) -> BoxFuture<'_, io::Result<()>> {
        let interest = match interest {
            Interest::Readable => tokio::io::Interest::READABLE,
            Interest::Writable => tokio::io::Interest::WRITABLE,
        };

        Box::pin(async move { self.0.ready(interest).await.map(|_| ()) })
    }
}

/// An opaque connection: the transport plus the bookkeeping the keep-alive loop needs.
///
/// Only one exchange at a time may read from or write to it.
pub struct ConnectionHandle {
    stream: Box<dyn Transport>,
    created: Instant,
    request_count: usize,
}

impl ConnectionHandle {
    #[inline]
    pub fn new<T: Transport>(stream: T) -> Self {
        Self {
            stream: Box::new(stream),
            created: Instant::now(),
            request_count: 0,
        }
    }

    /// Number of exchanges completed on this connection.
    #[inline]
    pub fn request_count(&self) -> usize {
        self.request_count
    }

    #[inline]
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    #[inline]
    pub fn transport(&mut self) -> &mut dyn Transport {
        &mut *self.stream
    }

    #[inline]
    pub fn into_transport(self) -> Box<dyn Transport> {
        self.stream
    }

    /// Rewraps a non-blocking transport so `read`/`write` wait for readiness on
    /// `runtime` instead of reporting [`io::ErrorKind::WouldBlock`].
    ///
    /// Must not be used from inside an async task of that runtime.
    pub(crate) fn into_blocking(self, runtime: tokio::runtime::Handle) -> Self {
        Self {
            stream: Box::new(Blocking {
                inner: self.stream,
                runtime,
            }),
            created: self.created,
            request_count: self.request_count,
        }
    }

    #[inline]
    pub(crate) fn record_exchange(&mut self) {
        self.request_count += 1;
    }

    /// Whether the exchange currently running is the last one allowed.
    #[inline]
    pub(crate) fn is_expiring(&self, limits: &ExchangeLimits) -> bool {
        self.request_count + 1 >= limits.max_requests_per_connection
            || self.created.elapsed() > limits.connection_lifetime
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("created", &self.created)
            .field("request_count", &self.request_count)
            .finish_non_exhaustive()
    }
}

struct Blocking {
    inner: Box<dyn Transport>,
    runtime: tokio::runtime::Handle,
}

impl Blocking {
    fn retry<T>(&mut self, interest: Interest, mut op: impl FnMut(&mut dyn Transport) -> io::Result<T>) -> io::Result<T> {
        loop {
            match op(&mut *self.inner) {
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.runtime.block_on(self.inner.ready(interest))?;
                }
                other => return other,
            }
        }
    }
}

impl Read for Blocking {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.retry(Interest::Readable, |inner| inner.read(buf))
    }
}

impl Write for Blocking {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.retry(Interest::Writable, |inner| inner.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.retry(Interest::Writable, |inner| inner.flush())
    }
}

impl Transport for Blocking {}

impl Read for ConnectionHandle {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for ConnectionHandle {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockStream;

    #[test]
    fn expiry_by_request_count() {
        let limits = ExchangeLimits {
            max_requests_per_connection: 2,
            ..ExchangeLimits::default()
        };
        let mut conn = ConnectionHandle::new(MockStream::new());

        assert!(!conn.is_expiring(&limits));
        conn.record_exchange();
        assert!(conn.is_expiring(&limits));
        assert_eq!(conn.request_count(), 1);
    }

    #[test]
    fn expiry_by_lifetime() {
        let limits = ExchangeLimits {
            connection_lifetime: Duration::ZERO,
            ..ExchangeLimits::default()
        };
        let conn = ConnectionHandle::new(MockStream::new());

        std::thread::sleep(Duration::from_millis(2));
        assert!(conn.is_expiring(&limits));
    }

    #[test]
    fn handle_delegates_io() {
        let mock = MockStream::new().chunk("abc");
        let written = mock.written();
        let mut conn = ConnectionHandle::new(mock);

        let mut buf = [0; 8];
        assert_eq!(conn.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");

        conn.write_all(b"xyz").unwrap();
        assert_eq!(&*written.lock().unwrap(), b"xyz");
    }

    #[test]
    fn blocking_wrapper_waits_out_would_block() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let mock = MockStream::new().block().chunk("ab").block().block().chunk("c").block_writes(2);
        let written = mock.written();

        let mut conn = ConnectionHandle::new(mock);
        conn.record_exchange();
        let mut conn = conn.into_blocking(runtime.handle().clone());

        let mut read = Vec::new();
        conn.read_to_end(&mut read).unwrap();
        assert_eq!(read, b"abc");

        conn.write_all(b"ok").unwrap();
        assert_eq!(&*written.lock().unwrap(), b"ok");
        assert_eq!(conn.request_count(), 1);
    }
}
