use crate::{
    client::{machine::ClientMachine, provider::ConnectionProvider},
    engine::{
        coroutine::{run, AbortHandle, Coroutine},
        scheduler::Scheduler,
    },
    errors::ClientError,
    http::{
        reader::{HeadReader, ParseResult, ReadStatus, StatusLine},
        request::ClientRequest,
        response::ClientResponse,
        state::Negotiation,
    },
    limits::ClientLimits,
    stream::{
        body::{BodyLength, Incoming},
        proxy::{Duplex, Outbound},
        transport::ConnectionHandle,
    },
};
use std::{io, sync::Arc};
use tokio::sync::oneshot;
use tracing::{debug, trace};

pub(crate) type Reply = oneshot::Sender<Result<ClientResponse, ClientError>>;

/// Sends requests and reads response heads over connections from a
/// [`ConnectionProvider`].
///
/// Every call either reuses the connection it is given or acquires a new one.
/// Failures are returned to the caller and never retried.
///
/// # Examples
/// ```no_run
/// use maker_h1::{ClientRequest, RequestExecutor, TcpConnector};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let executor = RequestExecutor::new(TcpConnector::new("127.0.0.1:8080")?);
///
/// let mut response = executor.execute(ClientRequest::get("/hello"), None)?;
/// let body = response.body().read_all(1024)?;
/// println!("{} {}", response.status(), String::from_utf8_lossy(&body));
///
/// // Same connection, if the server keeps it open.
/// let conn = response.into_connection();
/// let response = executor.execute(ClientRequest::get("/hello"), conn)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RequestExecutor {
    provider: Arc<dyn ConnectionProvider>,
    limits: ClientLimits,
}

impl RequestExecutor {
    pub fn new<P: ConnectionProvider>(provider: P) -> Self {
        Self {
            provider: Arc::new(provider),
            limits: ClientLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ClientLimits) -> Self {
        self.limits = limits;
        self
    }

    #[inline]
    pub fn limits(&self) -> &ClientLimits {
        &self.limits
    }

    /// Runs one exchange, blocking the calling thread.
    ///
    /// Returns once the response head is read; the body stays on the connection
    /// and is read through [`ClientResponse::body`].
    pub fn execute(
        &self,
        mut request: ClientRequest,
        reuse: Option<ConnectionHandle>,
    ) -> Result<ClientResponse, ClientError> {
        let mut conn = match reuse {
            Some(conn) => conn,
            None => self
                .provider
                .acquire(self.limits.connect_timeout)
                .map_err(ClientError::Connect)?,
        };
        conn.transport()
            .set_timeouts(self.limits.read_timeout, self.limits.write_timeout)?;

        prepare(self.provider.as_ref(), &mut request);
        let mut duplex = Duplex::new(conn, self.limits.scratch_capacity());

        Outbound::new(request.encode_head(), request.take_body()).send(&mut duplex.output())?;

        let mut reader = HeadReader::new(self.limits.max_header_size);
        let head = match reader.read::<StatusLine, _>(&mut duplex.scratch, &mut duplex.conn)? {
            ReadStatus::Complete(head) => head,
            ReadStatus::Pending => {
                debug!("Response headers did not arrive in time");
                return Err(io::Error::from(io::ErrorKind::TimedOut).into());
            }
        };

        respond(&request, head, duplex)
    }

    /// Runs one exchange as a state machine on the current task.
    ///
    /// Connections should be non-blocking (e.g. from
    /// [`ConnectionProvider::acquire_async`]), otherwise the task blocks on I/O.
    pub async fn execute_async(
        &self,
        request: ClientRequest,
        reuse: Option<ConnectionHandle>,
    ) -> Result<ClientResponse, ClientError> {
        let (tx, rx) = oneshot::channel();
        let mut machine = self.machine(request, reuse, tx);

        run(&mut machine).await;
        rx.await.unwrap_or(Err(ClientError::Aborted))
    }

    /// Hands the exchange to `scheduler` and returns at once.
    pub fn submit(
        &self,
        scheduler: &Scheduler,
        request: ClientRequest,
        reuse: Option<ConnectionHandle>,
    ) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        let machine = self.machine(request, reuse, tx);
        let abort = machine.abort_handle().clone();

        scheduler.submit(machine);
        PendingResponse { rx, abort }
    }

    fn machine(&self, request: ClientRequest, reuse: Option<ConnectionHandle>, reply: Reply) -> ClientMachine {
        ClientMachine::new(self.provider.clone(), self.limits.clone(), request, reuse, reply)
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// An exchange running on a [`Scheduler`].
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<Result<ClientResponse, ClientError>>,
    abort: AbortHandle,
}

impl PendingResponse {
    /// Aborting resolves [`wait`](Self::wait) with [`ClientError::Aborted`].
    #[inline]
    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }

    pub async fn wait(self) -> Result<ClientResponse, ClientError> {
        self.rx.await.unwrap_or(Err(ClientError::Aborted))
    }
}

/// Fills in `host` and `connection: keep-alive` unless present, and the body length.
pub(crate) fn prepare(provider: &dyn ConnectionProvider, request: &mut ClientRequest) {
    if let Some(host) = provider.property("host") {
        request.headers_mut().put_if_absent("host", host);
    }
    request.headers_mut().put_if_absent("connection", "keep-alive");
    request.finalize();
}

/// Wraps a parsed response head and the connection it came from.
pub(crate) fn respond(
    request: &ClientRequest,
    head: ParseResult<StatusLine>,
    mut duplex: Duplex,
) -> Result<ClientResponse, ClientError> {
    let ParseResult { line, headers, .. } = head;
    let length = BodyLength::of_response(request.method(), line.code, &headers)?;

    let state = Negotiation {
        request_version: request.http_version(),
        request_headers: request.headers(),
        response_version: line.version,
        status: line.code,
        response_headers: &headers,
        upgrade_handler: true,
    }
    .classify();

    duplex.conn.record_exchange();
    trace!(status = line.code, ?length, ?state, "Response head received");

    Ok(ClientResponse::new(line, headers, Incoming::new(duplex, length), state))
}
