use crate::stream::transport::{BoxFuture, ConnectionHandle, TokioStream};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::{
    io,
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};
use tracing::debug;

/// Where client executors get their connections from.
///
/// Pooling, TLS and proxies live behind this trait; the executors only ever see
/// a [`ConnectionHandle`].
pub trait ConnectionProvider: Send + Sync + 'static {
    /// Returns a connection, blocking for at most `timeout`.
    fn acquire(&self, timeout: Duration) -> io::Result<ConnectionHandle>;

    /// Returns a connection without blocking the calling task, failing with
    /// [`io::ErrorKind::TimedOut`] once `timeout` has passed.
    ///
    /// The handle should wrap a non-blocking transport when it is meant for the
    /// cooperative executor.
    fn acquire_async(&self, timeout: Duration) -> BoxFuture<'static, io::Result<ConnectionHandle>>;

    /// Named properties of the target, e.g. `host` for the default `Host` header.
    fn property(&self, name: &str) -> Option<String> {
        let _ = name;
        None
    }
}

/// Opens a fresh TCP connection for every acquisition.
///
/// # Examples
/// ```no_run
/// use maker_h1::{ConnectionProvider, TcpConnector};
/// use std::time::Duration;
///
/// let connector = TcpConnector::new("127.0.0.1:8080")?.with_host("example.local");
///
/// assert_eq!(connector.property("host").as_deref(), Some("example.local"));
/// let conn = connector.acquire(Duration::from_secs(1))?;
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: SocketAddr,
    host: String,
}

impl TcpConnector {
    /// Resolves `addr` once; the `host` property defaults to the address as written.
    pub fn new<A: ToSocketAddrs + ToString>(addr: A) -> io::Result<Self> {
        let resolved = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing"))?;

        Ok(Self {
            addr: resolved,
            host: addr.to_string(),
        })
    }

    pub fn with_host<H: Into<String>>(mut self, host: H) -> Self {
        self.host = host.into();
        self
    }

    #[inline]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl ConnectionProvider for TcpConnector {
    fn acquire(&self, timeout: Duration) -> io::Result<ConnectionHandle> {
        let socket = Socket::new(Domain::for_address(self.addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.connect_timeout(&SockAddr::from(self.addr), timeout)?;

        let stream = TcpStream::from(socket);
        stream.set_nodelay(true)?;

        debug!(addr = %self.addr, "Connected");
        Ok(ConnectionHandle::new(stream))
    }

    fn acquire_async(&self, timeout: Duration) -> BoxFuture<'static, io::Result<ConnectionHandle>> {
        let addr = self.addr;

        Box::pin(async move {
            let stream = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
            stream.set_nodelay(true)?;

            debug!(%addr, "Connected");
            Ok(ConnectionHandle::new(TokioStream::new(stream)))
        })
    }

    fn property(&self, name: &str) -> Option<String> {
        match name {
            "host" => Some(self.host.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Read, net::TcpListener};

    #[test]
    fn blocking_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let connector = TcpConnector::new(addr).unwrap();
        assert_eq!(connector.property("host"), Some(addr.to_string()));
        assert_eq!(connector.property("scheme"), None);

        let mut conn = connector.acquire(Duration::from_secs(1)).unwrap();
        let (mut accepted, _) = listener.accept().unwrap();

        std::io::Write::write_all(&mut conn, b"ping").unwrap();
        let mut buf = [0; 4];
        accepted.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn refused_connection_is_an_error() {
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        // The listener is gone by now.
        let connector = TcpConnector::new(addr).unwrap();

        assert!(connector.acquire(Duration::from_millis(200)).is_err());
    }

    #[tokio::test]
    async fn async_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connector = TcpConnector::new(addr).unwrap().with_host("svc");
        assert_eq!(connector.property("host").as_deref(), Some("svc"));

        let (conn, accepted) = tokio::join!(connector.acquire_async(Duration::from_secs(1)), listener.accept());
        assert!(conn.is_ok());
        assert!(accepted.is_ok());
    }
}
