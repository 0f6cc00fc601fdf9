use crate::{
    client::{
        executor::{prepare, respond, Reply},
        provider::ConnectionProvider,
    },
    engine::coroutine::{AbortHandle, Action, Coroutine, Wake},
    errors::{ClientError, Fault},
    http::{
        reader::{HeadReader, ParseResult, ReadStatus, StatusLine},
        request::ClientRequest,
        response::ClientResponse,
    },
    limits::ClientLimits,
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
use tracing::{debug, trace};

enum State {
    AcquireConnection,
    AwaitConnection(oneshot::Receiver<io::Result<ConnectionHandle>>),
    Send,
    AwaitFlush,
    AwaitHeaders,
    HeadersParsed(ParseResult<StatusLine>),
    Return,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::AcquireConnection => "AcquireConnection",
            Self::AwaitConnection(_) => "AwaitConnection",
            Self::Send => "Send",
            Self::AwaitFlush => "AwaitFlush",
            Self::AwaitHeaders => "AwaitHeaders",
            Self::HeadersParsed(_) => "HeadersParsed",
            Self::Return => "Return",
        }
    }
}

/// The client side of one exchange as a resumable state machine.
///
/// ```text
/// AcquireConnection -> Send -> AwaitFlush -> AwaitHeaders -> HeadersParsed -> Return
/// ```
///
/// Every path ends in `Return`, which hands the outcome to the reply channel.
pub(crate) struct ClientMachine {
    state: State,
    provider: Arc<dyn ConnectionProvider>,
    limits: ClientLimits,
    request: ClientRequest,
    reader: HeadReader,

    reuse: Option<ConnectionHandle>,
    duplex: Option<Duplex>,
    outbound: Outbound,

    reply: Option<Reply>,
    abort: AbortHandle,
}

impl ClientMachine {
    pub(crate) fn new(
        provider: Arc<dyn ConnectionProvider>,
        limits: ClientLimits,
        request: ClientRequest,
        reuse: Option<ConnectionHandle>,
        reply: Reply,
    ) -> Self {
        Self {
            state: State::AcquireConnection,
            reader: HeadReader::new(limits.max_header_size),
            duplex: None,
            outbound: Outbound::default(),
            reply: Some(reply),
            abort: AbortHandle::new(),
            provider,
            limits,
            request,
            reuse,
        }
    }

    /// Delivers the outcome and drops the connection unless the response took it.
    fn finish(&mut self, outcome: Result<ClientResponse, ClientError>) {
        if let Err(err) = &outcome {
            debug!(%err, "Client exchange failed");
        }
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(outcome);
        }

        self.duplex = None;
        self.reuse = None;
        self.state = State::Return;
    }

    fn step(&mut self) -> Result<Option<Action>, Fault> {
        let state = std::mem::replace(&mut self.state, State::Return);
        trace!(state = state.name(), "Client machine step");

        match state {
            State::AcquireConnection => match self.reuse.take() {
                Some(conn) => {
                    self.duplex = Some(Duplex::new(conn, self.limits.scratch_capacity()));
                    self.state = State::Send;
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    let acquire = self.provider.acquire_async(self.limits.connect_timeout);
                    self.state = State::AwaitConnection(rx);

                    return Ok(Some(Action::WaitFor(Box::pin(async move {
                        let _ = tx.send(acquire.await);
                        Wake::Ready
                    }))));
                }
            },

            State::AwaitConnection(mut rx) => match rx.try_recv().map_err(|_| Fault::Panicked)? {
                Ok(conn) => {
                    self.duplex = Some(Duplex::new(conn, self.limits.scratch_capacity()));
                    self.state = State::Send;
                }
                Err(err) => self.finish(Err(ClientError::Connect(err))),
            },

            State::Send => {
                prepare(self.provider.as_ref(), &mut self.request);
                self.outbound = Outbound::new(self.request.encode_head(), self.request.take_body());
                self.state = State::AwaitFlush;
            }

            State::AwaitFlush => {
                let Some(duplex) = self.duplex.as_mut() else {
                    self.finish(Err(ClientError::Aborted));
                    return Ok(None);
                };
                self.state = State::AwaitFlush;

                let mut out = duplex.output();
                match self.outbound.stage(&mut out).and_then(|()| out.flush()) {
                    Ok(()) => self.state = State::AwaitHeaders,
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(Some(Action::Wait(Interest::Writable)));
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            State::AwaitHeaders => {
                let Some(duplex) = self.duplex.as_mut() else {
                    self.finish(Err(ClientError::Aborted));
                    return Ok(None);
                };
                self.state = State::AwaitHeaders;

                match self.reader.read::<StatusLine, _>(&mut duplex.scratch, &mut duplex.conn) {
                    Ok(ReadStatus::Pending) => return Ok(Some(Action::Wait(Interest::Readable))),
                    Ok(ReadStatus::Complete(head)) => self.state = State::HeadersParsed(head),
                    Err(err) => self.finish(Err(err.into())),
                }
            }

            State::HeadersParsed(head) => match self.duplex.take() {
                Some(duplex) => {
                    let outcome = respond(&self.request, head, duplex);
                    self.finish(outcome);
                }
                None => self.finish(Err(ClientError::Aborted)),
            },

            State::Return => return Ok(Some(Action::Done)),
        }

        Ok(None)
    }
}

impl Coroutine for ClientMachine {
    fn name(&self) -> &'static str {
        "client"
    }

    fn resume(&mut self, wake: Wake) -> Result<Action, Fault> {
        match wake {
            Wake::Start | Wake::Ready => {}
            Wake::Failed(err) => return Err(err.into()),
            Wake::TimedOut => self.finish(Err(io::Error::from(io::ErrorKind::TimedOut).into())),
            Wake::Aborted => self.finish(Err(ClientError::Aborted)),
        }

        loop {
            if let Some(action) = self.step()? {
                return Ok(action);
            }
        }
    }

    fn recover(&mut self, fault: Fault) -> Action {
        self.finish(Err(fault.into()));
        Action::Done
    }

    fn ready(&mut self, interest: Interest) -> BoxFuture<'_, io::Result<()>> {
        match self.duplex.as_mut() {
            Some(duplex) => duplex.ready(interest),
            None => Box::pin(std::future::ready(Ok::<(), io::Error>(()))),
        }
    }

    fn timeout(&self, interest: Interest) -> Option<Duration> {
        Some(match interest {
            Interest::Readable => self.limits.read_timeout,
            Interest::Writable => self.limits.write_timeout,
        })
    }

    fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }
}
