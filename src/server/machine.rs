use crate::{
    engine::coroutine::{AbortHandle, Action, Coroutine, Wake},
    errors::{Fault, HandlerError, ReadError},
    http::{
        reader::{HeadReader, ParseResult, ReadStatus, RequestLine},
        request::Request,
        response::{Response, UpgradeHandler, Upgraded},
        state::ConnectionState,
    },
    limits::ExchangeLimits,
    server::dispatch::{Dispatcher, Endpoint, Origin},
    stream::{
        proxy::{Duplex, Outbound},
        transport::ConnectionHandle,
    },
    BoxFuture, Interest,
};
use std::{
    io::{self, Write},
    sync::Arc,
    time::Duration,
};
use tokio::sync::oneshot;
use tracing::{debug, error, trace};

type HandlerOutcome = (Request, Result<Response, HandlerError>);

enum State {
    AwaitHeaders,
    HeadersParsed(ParseResult<RequestLine>),
    InterceptorShortCircuit(Response),
    RouteDispatch(Arc<dyn Endpoint>),
    /// An async endpoint owns the request on its own task.
    AwaitHandler(oneshot::Receiver<HandlerOutcome>),
    ResponseReady(Response),
    AwaitFlush,
    Loop,
    Upgrade,
    Done,
    Abort,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::AwaitHeaders => "AwaitHeaders",
            Self::HeadersParsed(_) => "HeadersParsed",
            Self::InterceptorShortCircuit(_) => "InterceptorShortCircuit",
            Self::RouteDispatch(_) => "RouteDispatch",
            Self::AwaitHandler(_) => "AwaitHandler",
            Self::ResponseReady(_) => "ResponseReady",
            Self::AwaitFlush => "AwaitFlush",
            Self::Loop => "Loop",
            Self::Upgrade => "Upgrade",
            Self::Done => "Done",
            Self::Abort => "Abort",
        }
    }
}

/// The server side of one connection as a resumable state machine.
///
/// ```text
/// AwaitHeaders -> HeadersParsed -> InterceptorShortCircuit -> ResponseReady -> AwaitFlush -> Loop | Done | Upgrade
///                               \-> RouteDispatch [-> AwaitHandler] -/
/// ```
///
/// `Loop` goes back to `AwaitHeaders` on the same scratch buffer. `Abort` can be
/// reached from anywhere and drops the connection.
pub(crate) struct ServerMachine {
    state: State,
    dispatcher: Arc<Dispatcher>,
    limits: ExchangeLimits,
    reader: HeadReader,

    /// The connection while no request owns it.
    duplex: Option<Duplex>,
    request: Option<Request>,

    outbound: Outbound,
    next: ConnectionState,
    carry: Vec<u8>,
    upgrade: Option<Box<dyn UpgradeHandler>>,
    /// Set once a response has been formed for the current exchange.
    responded: bool,

    abort: AbortHandle,
}

impl ServerMachine {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, limits: ExchangeLimits, conn: ConnectionHandle) -> Self {
        Self {
            state: State::AwaitHeaders,
            reader: HeadReader::new(limits.max_header_size),
            duplex: Some(Duplex::new(conn, limits.scratch_capacity())),
            request: None,
            outbound: Outbound::default(),
            next: ConnectionState::Close,
            carry: Vec::new(),
            upgrade: None,
            responded: false,
            abort: AbortHandle::new(),
            dispatcher,
            limits,
        }
    }

    /// A machine that only answers `503` and closes.
    pub(crate) fn reject(dispatcher: Arc<Dispatcher>, limits: ExchangeLimits, conn: ConnectionHandle) -> Self {
        let response = dispatcher.unavailable();
        let mut machine = Self::new(dispatcher, limits, conn);
        machine.state = State::ResponseReady(response);
        machine
    }

    /// Runs one state. `None` continues with the next one; a state that finds
    /// its connection gone leaves the machine in `Abort`.
    fn step(&mut self) -> Result<Option<Action>, Fault> {
        let state = std::mem::replace(&mut self.state, State::Abort);
        trace!(state = state.name(), "Server machine step");

        match state {
            State::AwaitHeaders => {
                let Some(duplex) = self.duplex.as_mut() else {
                    return Ok(None);
                };
                self.state = State::AwaitHeaders;

                match self.reader.read::<RequestLine, _>(&mut duplex.scratch, &mut duplex.conn) {
                    Ok(ReadStatus::Pending) => return Ok(Some(Action::Wait(Interest::Readable))),
                    Ok(ReadStatus::Complete(head)) => self.state = State::HeadersParsed(head),
                    Err(ReadError::Parse(err)) => {
                        self.state = State::ResponseReady(self.dispatcher.on_parse_error(err));
                    }
                    Err(ReadError::PeerClosed) => {
                        debug!(requests = duplex.connection().request_count(), "Peer closed connection");
                        self.state = State::Done;
                    }
                    Err(ReadError::Io(err)) => return Err(err.into()),
                }
            }

            State::HeadersParsed(head) => {
                let Some(duplex) = self.duplex.take() else {
                    return Ok(None);
                };

                match self.dispatcher.open(head, duplex) {
                    Err((err, duplex)) => {
                        self.duplex = Some(duplex);
                        self.state = State::ResponseReady(self.dispatcher.on_parse_error(err));
                    }
                    Ok((request, None)) => {
                        self.request = Some(request);
                        self.state = State::ResponseReady(self.dispatcher.not_found());
                    }
                    Ok((mut request, Some(endpoint))) => {
                        let intercepted = self.dispatcher.intercept(&mut request);
                        self.request = Some(request);

                        self.state = match intercepted? {
                            Some(response) => State::InterceptorShortCircuit(response),
                            None => State::RouteDispatch(endpoint),
                        };
                    }
                }
            }

            State::InterceptorShortCircuit(response) => self.state = State::ResponseReady(response),

            State::RouteDispatch(endpoint) => {
                let Some(mut request) = self.request.take() else {
                    return Ok(None);
                };

                if endpoint.suspends() {
                    let (tx, rx) = oneshot::channel();
                    self.state = State::AwaitHandler(rx);

                    return Ok(Some(Action::WaitFor(Box::pin(async move {
                        let result = endpoint.invoke_async(&mut request).await;
                        let _ = tx.send((request, result));
                        Wake::Ready
                    }))));
                }

                let outcome = self.dispatcher.invoke(&endpoint, &mut request);
                self.request = Some(request);
                self.state = State::ResponseReady(outcome?);
            }

            State::AwaitHandler(mut rx) => {
                let (request, result) = rx.try_recv().map_err(|_| Fault::Panicked)?;
                self.request = Some(request);
                self.state = State::ResponseReady(result?);
            }

            State::ResponseReady(response) => {
                let origin = match (self.request.take(), self.duplex.take()) {
                    (Some(request), _) => Origin::Request(request),
                    (None, Some(duplex)) => Origin::Bare(duplex),
                    (None, None) => return Ok(None),
                };

                let concluded = self.dispatcher.conclude(response, origin, &self.limits);
                self.responded = true;

                self.duplex = Some(concluded.duplex);
                self.outbound = concluded.outbound;
                self.next = concluded.state;
                self.carry = concluded.carry;
                self.upgrade = concluded.upgrade;
                self.state = State::AwaitFlush;
            }

            State::AwaitFlush => {
                let Some(duplex) = self.duplex.as_mut() else {
                    return Ok(None);
                };
                self.state = State::AwaitFlush;

                let mut out = duplex.output();
                match self.outbound.stage(&mut out).and_then(|()| out.flush()) {
                    Ok(()) => {}
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(Some(Action::Wait(Interest::Writable)));
                    }
                    Err(err) => return Err(err.into()),
                }

                duplex.conn.record_exchange();
                self.state = match self.next {
                    ConnectionState::KeepAlive => State::Loop,
                    ConnectionState::Close => State::Done,
                    ConnectionState::Upgrade => State::Upgrade,
                };
            }

            State::Loop => {
                self.reader.reset();
                self.outbound = Outbound::default();
                self.responded = false;
                self.state = State::AwaitHeaders;

                if let Some(duplex) = self.duplex.as_mut() {
                    duplex.scratch.reset();
                    debug!(requests = duplex.connection().request_count(), "Keep-alive, awaiting next request");
                }
                return Ok(Some(Action::Yield));
            }

            State::Upgrade => {
                if let (Some(duplex), Some(handler)) = (self.duplex.take(), self.upgrade.take()) {
                    let (mut connection, _) = duplex.into_parts();
                    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                        connection = connection.into_blocking(runtime);
                    }
                    let upgraded = Upgraded {
                        connection,
                        read_buf: std::mem::take(&mut self.carry),
                    };
                    // The handler may block for as long as the new protocol runs.
                    tokio::task::spawn_blocking(move || handler.handle(upgraded));
                }
                self.state = State::Done;
            }

            State::Done => {
                self.state = State::Done;
                return Ok(Some(Action::Done));
            }

            State::Abort => {
                debug!(responded = self.responded, "Aborting connection");
                self.request = None;
                self.duplex = None;
                self.state = State::Done;
                return Ok(Some(Action::Done));
            }
        }

        Ok(None)
    }
}

impl Coroutine for ServerMachine {
    fn name(&self) -> &'static str {
        "server"
    }

    fn resume(&mut self, wake: Wake) -> Result<Action, Fault> {
        match wake {
            Wake::Start | Wake::Ready => {}
            Wake::Failed(err) => return Err(err.into()),
            Wake::TimedOut => {
                debug!(state = self.state.name(), "Connection timed out");
                self.state = State::Abort;
            }
            Wake::Aborted => self.state = State::Abort,
        }

        loop {
            if let Some(action) = self.step()? {
                return Ok(action);
            }
        }
    }

    fn recover(&mut self, fault: Fault) -> Action {
        if self.responded {
            error!(%fault, "Failure after the response was formed, aborting connection");
            self.state = State::Abort;
            return Action::Yield;
        }

        if matches!(self.state, State::AwaitHeaders) || (self.request.is_none() && self.duplex.is_none()) {
            debug!(%fault, state = self.state.name(), "Connection lost, aborting");
            self.state = State::Abort;
            return Action::Yield;
        }

        self.state = State::ResponseReady(self.dispatcher.on_error(&fault));
        Action::Yield
    }

    fn ready(&mut self, interest: Interest) -> BoxFuture<'_, io::Result<()>> {
        match self.duplex.as_mut() {
            Some(duplex) => duplex.ready(interest),
            None => Box::pin(std::future::ready(Ok::<(), io::Error>(()))),
        }
    }

    fn timeout(&self, interest: Interest) -> Option<Duration> {
        Some(match interest {
            Interest::Readable => self.limits.socket_read_timeout,
            Interest::Writable => self.limits.socket_write_timeout,
        })
    }

    fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }
}
