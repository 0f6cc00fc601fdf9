use crate::{
    errors::ReadError,
    http::{
        reader::{HeadReader, ReadStatus, RequestLine},
        response::Upgraded,
        state::ConnectionState,
    },
    limits::ExchangeLimits,
    server::dispatch::{Concluded, Dispatcher, Origin},
    stream::{proxy::Duplex, transport::ConnectionHandle},
};
use std::{io, sync::Arc};
use tracing::debug;

/// The blocking server executor.
///
/// One connection occupies the calling thread from the first request to the
/// last response. Obtained from [`Server::executor`](crate::Server::executor).
///
/// # Examples
/// ```no_run
/// use maker_h1::{ConnectionHandle, ExactRouter, Response, Server, StatusCode};
/// use std::net::TcpListener;
///
/// let executor = Server::builder()
///     .router(ExactRouter::new().get("/", |_: &mut maker_h1::Request| {
///         Ok(Response::new(StatusCode::Ok).body("hi"))
///     }))
///     .build()
///     .executor();
///
/// let listener = TcpListener::bind("127.0.0.1:8080")?;
/// for stream in listener.incoming() {
///     executor.serve(ConnectionHandle::new(stream?))?;
/// }
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Clone)]
pub struct ServerExecutor {
    dispatcher: Arc<Dispatcher>,
    limits: ExchangeLimits,
}

impl ServerExecutor {
    #[inline]
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, limits: ExchangeLimits) -> Self {
        Self { dispatcher, limits }
    }

    /// Runs the keep-alive loop on `conn` until the connection is closed,
    /// handed to an upgrade handler, or dropped.
    pub fn serve(&self, mut conn: ConnectionHandle) -> io::Result<()> {
        conn.transport()
            .set_timeouts(self.limits.socket_read_timeout, self.limits.socket_write_timeout)?;

        let mut duplex = Duplex::new(conn, self.limits.scratch_capacity());

        loop {
            let Some(concluded) = self.process(duplex) else {
                return Ok(());
            };

            let Concluded {
                state,
                duplex: mut next,
                mut outbound,
                carry,
                upgrade,
            } = concluded;

            outbound.send(&mut next.output())?;
            next.conn.record_exchange();

            match (state, upgrade) {
                (ConnectionState::KeepAlive, _) => {
                    debug!(requests = next.connection().request_count(), "Keep-alive, awaiting next request");
                    duplex = next;
                }
                (ConnectionState::Upgrade, Some(handler)) => {
                    let (connection, _) = next.into_parts();
                    handler.handle(Upgraded {
                        connection,
                        read_buf: carry,
                    });
                    return Ok(());
                }
                _ => return Ok(()),
            }
        }
    }

    /// One exchange: reads a request and forms the response for it.
    ///
    /// `None` means the connection is dropped without a response.
    pub(crate) fn process(&self, mut duplex: Duplex) -> Option<Concluded> {
        let mut reader = HeadReader::new(self.limits.max_header_size);

        let head = match reader.read::<RequestLine, _>(&mut duplex.scratch, &mut duplex.conn) {
            Ok(ReadStatus::Complete(head)) => head,
            Ok(ReadStatus::Pending) => {
                debug!("Read timed out before request headers, dropping connection");
                return None;
            }
            Err(ReadError::Parse(err)) => {
                let response = self.dispatcher.on_parse_error(err);
                return Some(self.dispatcher.conclude(response, Origin::Bare(duplex), &self.limits));
            }
            Err(ReadError::PeerClosed) => {
                debug!(requests = duplex.connection().request_count(), "Peer closed connection");
                return None;
            }
            Err(ReadError::Io(err)) => {
                debug!(%err, "Failed to read request headers, dropping connection");
                return None;
            }
        };

        let (mut request, endpoint) = match self.dispatcher.open(head, duplex) {
            Ok(opened) => opened,
            Err((err, duplex)) => {
                let response = self.dispatcher.on_parse_error(err);
                return Some(self.dispatcher.conclude(response, Origin::Bare(duplex), &self.limits));
            }
        };

        let outcome = match endpoint {
            None => Ok(self.dispatcher.not_found()),
            Some(endpoint) => match self.dispatcher.intercept(&mut request) {
                Ok(Some(response)) => Ok(response),
                Ok(None) => self.dispatcher.invoke(&endpoint, &mut request),
                Err(fault) => Err(fault),
            },
        };

        let response = outcome.unwrap_or_else(|fault| self.dispatcher.on_error(&fault));
        Some(self.dispatcher.conclude(response, Origin::Request(request), &self.limits))
    }

    /// Answers `503` and closes, for connections the server has no room for.
    pub(crate) fn reject(&self, mut conn: ConnectionHandle) -> io::Result<()> {
        conn.transport()
            .set_timeouts(self.limits.socket_read_timeout, self.limits.socket_write_timeout)?;

        let duplex = Duplex::new(conn, self.limits.scratch_capacity());
        let response = self.dispatcher.unavailable();

        let mut concluded = self.dispatcher.conclude(response, Origin::Bare(duplex), &self.limits);
        concluded.outbound.send(&mut concluded.duplex.output())
    }
}
