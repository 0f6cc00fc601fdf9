use crate::{
    engine::{
        coroutine::{AbortHandle, Coroutine},
        scheduler::Scheduler,
    },
    limits::{ExchangeLimits, ServerLimits},
    server::{
        connection::ServerExecutor,
        dispatch::{DefaultErrorHandler, Dispatcher, ErrorHandler, Interceptor, Router},
        machine::ServerMachine,
    },
    stream::transport::{ConnectionHandle, TokioStream},
};
use crossbeam::channel::{self, TrySendError};
use std::{
    io, net,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// An HTTP/1.1 server over a [`Router`].
///
/// The same server can run in either scheduling model:
/// - [`launch`](Self::launch): connections become state machines on a
///   cooperative [`Scheduler`] with [`ServerLimits::workers`] worker tasks.
/// - [`launch_blocking`](Self::launch_blocking): each connection occupies one of
///   [`ServerLimits::workers`] threads from its first request to its last.
///
/// # Examples
///
/// ```no_run
/// use maker_h1::{ExactRouter, Request, Response, Server, StatusCode};
/// use tokio::net::TcpListener;
///
/// #[tokio::main]
/// async fn main() -> std::io::Result<()> {
///     let router = ExactRouter::new().get("/hello", |_: &mut Request| {
///         Ok(Response::new(StatusCode::Ok).body("Hello world!"))
///     });
///
///     Server::builder()
///         .router(router)
///         .build()
///         .launch(TcpListener::bind("127.0.0.1:8080").await?)
///         .await
/// }
/// ```
pub struct Server {
    dispatcher: Arc<Dispatcher>,
    server_limits: ServerLimits,
    exchange_limits: ExchangeLimits,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            router: None,
            interceptors: Vec::new(),
            error_handler: None,
            server_limits: None,
            exchange_limits: None,
        }
    }

    /// Accepts connections forever, serving them on a cooperative [`Scheduler`].
    ///
    /// Must be called inside a tokio runtime. Connections beyond
    /// [`ServerLimits::max_pending_connections`] are answered with `503`.
    ///
    /// # Errors
    /// Only fails when the listener has no local address.
    pub async fn launch(self, listener: TcpListener) -> io::Result<()> {
        info!(addr = %listener.local_addr()?, workers = self.server_limits.workers, "Cooperative server listening");

        let scheduler = Scheduler::new(self.server_limits.wait_strategy);
        scheduler.start(self.server_limits.workers);

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    debug!(%err, "Failed to accept connection");
                    continue;
                }
            };

            if let Err(err) = stream.set_nodelay(true) {
                debug!(%peer, %err, "Failed to set TCP_NODELAY");
            }
            let conn = ConnectionHandle::new(TokioStream::new(stream));

            match scheduler.live() < self.server_limits.max_pending_connections {
                true => {
                    self.spawn(&scheduler, conn);
                }
                false => {
                    warn!(%peer, live = scheduler.live(), "Connection limit reached, answering 503");
                    scheduler.submit(ServerMachine::reject(
                        self.dispatcher.clone(),
                        self.exchange_limits.clone(),
                        conn,
                    ));
                }
            }
        }
    }

    /// Accepts connections forever on the calling thread, serving each one on a
    /// worker thread.
    ///
    /// Accepted connections wait in a bounded queue of
    /// [`ServerLimits::max_pending_connections`]; when it is full the connection is
    /// answered with `503` right away.
    ///
    /// # Errors
    /// Fails when a worker thread cannot be spawned or every worker has stopped.
    ///
    /// # Examples
    /// ```no_run
    /// use maker_h1::{ExactRouter, Request, Response, Server, StatusCode};
    /// use std::net::TcpListener;
    ///
    /// let router = ExactRouter::new().get("/", |_: &mut Request| {
    ///     Ok(Response::new(StatusCode::Ok).body("blocking"))
    /// });
    ///
    /// Server::builder()
    ///     .router(router)
    ///     .build()
    ///     .launch_blocking(TcpListener::bind("127.0.0.1:8080")?)?;
    /// # Ok::<(), std::io::Error>(())
    /// ```
    pub fn launch_blocking(self, listener: net::TcpListener) -> io::Result<()> {
        info!(addr = %listener.local_addr()?, workers = self.server_limits.workers, "Blocking server listening");

        let executor = self.executor();
        let (tx, rx) = channel::bounded::<(net::TcpStream, net::SocketAddr)>(
            self.server_limits.max_pending_connections.max(1),
        );

        for id in 0..self.server_limits.workers.max(1) {
            let (rx, executor) = (rx.clone(), executor.clone());

            thread::Builder::new()
                .name(format!("maker_h1-worker-{id}"))
                .spawn(move || {
                    for (stream, peer) in rx {
                        if let Err(err) = stream.set_nodelay(true) {
                            debug!(%peer, %err, "Failed to set TCP_NODELAY");
                        }

                        match panic::catch_unwind(AssertUnwindSafe(|| executor.serve(ConnectionHandle::new(stream)))) {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => debug!(%peer, %err, "Connection ended with an error"),
                            Err(_) => error!(%peer, "Connection panicked outside a handler"),
                        }
                    }
                })?;
        }

        loop {
            let (stream, peer) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(err) => {
                    debug!(%err, "Failed to accept connection");
                    continue;
                }
            };

            match tx.try_send((stream, peer)) {
                Ok(()) => {}
                Err(TrySendError::Full((stream, peer))) => {
                    warn!(%peer, "Connection queue full, answering 503");
                    if let Err(err) = executor.reject(ConnectionHandle::new(stream)) {
                        debug!(%peer, %err, "Failed to send 503");
                    }
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(io::Error::other("every worker thread has stopped"));
                }
            }
        }
    }

    /// The blocking executor for driving connections by hand.
    #[inline]
    pub fn executor(&self) -> ServerExecutor {
        ServerExecutor::new(self.dispatcher.clone(), self.exchange_limits.clone())
    }

    /// Serves `conn` on `scheduler` and returns the handle that aborts it.
    ///
    /// The connection should be non-blocking, e.g. a [`TokioStream`].
    pub fn spawn(&self, scheduler: &Scheduler, conn: ConnectionHandle) -> AbortHandle {
        let machine = ServerMachine::new(self.dispatcher.clone(), self.exchange_limits.clone(), conn);
        let abort = machine.abort_handle().clone();

        scheduler.submit(machine);
        abort
    }

    #[inline]
    pub fn server_limits(&self) -> &ServerLimits {
        &self.server_limits
    }

    #[inline]
    pub fn exchange_limits(&self) -> &ExchangeLimits {
        &self.exchange_limits
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder {
    router: Option<Arc<dyn Router>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,

    server_limits: Option<ServerLimits>,
    exchange_limits: Option<ExchangeLimits>,
}

impl ServerBuilder {
    /// Sets the router requests are matched against.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn router<R: Router>(mut self, router: R) -> Self {
        self.router = Some(Arc::new(router));
        self
    }

    /// Appends an interceptor. Interceptors run in the order they were added,
    /// and the first one returning a response short-circuits routing.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use maker_h1::{ExactRouter, HandlerError, Request, Response, Server, StatusCode};
    ///
    /// let server = Server::builder()
    ///     .router(ExactRouter::new())
    ///     .interceptor(|req: &mut Request| -> Result<Option<Response>, HandlerError> {
    ///         match req.header("authorization") {
    ///             Some(_) => Ok(None),
    ///             None => Err(HandlerError::new(StatusCode::Unauthorized, "Missing credentials")),
    ///         }
    ///     })
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn interceptor<I: Interceptor>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Replaces the [`DefaultErrorHandler`].
    #[inline(always)]
    pub fn error_handler<E: ErrorHandler>(mut self, handler: E) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Configures worker count, admission bound and error format.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use maker_h1::{limits::ServerLimits, ExactRouter, Server};
    ///
    /// let server = Server::builder()
    ///     .router(ExactRouter::new())
    ///     .server_limits(ServerLimits {
    ///         // Your changes
    ///         workers: 2,
    ///         max_pending_connections: 10_000,
    ///         ..ServerLimits::default() // Required line
    ///     })
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures buffer sizes, timeouts and connection expiry.
    #[inline(always)]
    pub fn exchange_limits(mut self, limits: ExchangeLimits) -> Self {
        self.exchange_limits = Some(limits);
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// Error message: ``The `router` method must be called to create``
    ///
    /// Panics when the `router` method was not called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let router = self
            .router
            .expect("The `router` method must be called to create");
        let server_limits = self.server_limits.unwrap_or_default();
        let exchange_limits = self.exchange_limits.unwrap_or_default();

        let error_handler = self.error_handler.unwrap_or_else(|| {
            Arc::new(DefaultErrorHandler {
                json: server_limits.json_errors,
            })
        });

        let dispatcher = Dispatcher::new(
            router,
            self.interceptors,
            error_handler,
            server_limits.server_name.clone(),
        );

        Server {
            dispatcher: Arc::new(dispatcher),
            server_limits,
            exchange_limits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        limits::WaitStrategy, ClientRequest, ExactRouter, HandlerError, Request, RequestExecutor, Response,
        StatusCode, TcpConnector,
    };
    use std::{
        io::{Read, Write},
        time::Duration,
    };

    fn server(limits: ServerLimits) -> Server {
        let router = ExactRouter::new()
            .get("/hello", |_: &mut Request| Ok(Response::new(StatusCode::Ok).body("hi")))
            .get("/users/:id", |req: &mut Request| {
                let id = req.path_param("id").unwrap_or_default().to_string();
                Ok(Response::new(StatusCode::Ok).body(id))
            })
            .post("/echo", |req: &mut Request| {
                let body = req.body().read_all(1024)?;
                Ok(Response::new(StatusCode::Ok).body(body))
            });

        Server::builder()
            .router(router)
            .interceptor(|req: &mut Request| -> Result<Option<Response>, HandlerError> {
                match req.header("x-block") {
                    Some(_) => Ok(Some(Response::new(StatusCode::Forbidden).close())),
                    None => Ok(None),
                }
            })
            .server_limits(limits)
            .build()
    }

    /// Sends `raw` and reads one response: the head plus `content-length` body bytes.
    fn exchange(stream: &mut net::TcpStream, raw: &str) -> String {
        stream.write_all(raw.as_bytes()).unwrap();

        let mut out = Vec::new();
        let mut byte = [0; 1];
        while !out.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).unwrap();
            out.push(byte[0]);
        }

        let head = String::from_utf8(out).unwrap();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length: "))
            .map_or(0, |len| len.parse().unwrap());

        let mut body = vec![0; length];
        stream.read_exact(&mut body).unwrap();
        head + &String::from_utf8(body).unwrap()
    }

    #[test]
    #[should_panic(expected = "The `router` method must be called to create")]
    fn router_is_required() {
        let _ = Server::builder().build();
    }

    #[test]
    fn builder_defaults() {
        let server = server(ServerLimits::default());
        assert_eq!(server.server_limits().workers, 4);
        assert_eq!(server.exchange_limits().max_header_size, 4096);
    }

    #[test]
    fn blocking_loopback() {
        let listener = net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = server(ServerLimits {
            workers: 2,
            ..ServerLimits::default()
        });
        thread::spawn(move || server.launch_blocking(listener));

        let mut stream = net::TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let first = exchange(&mut stream, "GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(first.contains("server: maker_h1/"));

        let second = exchange(&mut stream, "GET /users/7 HTTP/1.1\r\n\r\n");
        assert!(second.ends_with("\r\n\r\n7"));

        let last = exchange(&mut stream, "GET /hello HTTP/1.1\r\nx-block: 1\r\n\r\n");
        assert!(last.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(last.contains("connection: close\r\n"));
        assert_eq!(stream.read(&mut [0; 8]).unwrap(), 0);
    }

    #[test]
    fn blocking_client_against_blocking_server() {
        let listener = net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = server(ServerLimits::default());
        thread::spawn(move || server.launch_blocking(listener));

        let client = RequestExecutor::new(TcpConnector::new(addr).unwrap());

        let mut response = client
            .execute(ClientRequest::new(crate::Method::Post, "/echo").body("ping"), None)
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.body().read_all(64).unwrap(), b"ping");

        let conn = response.into_connection();
        assert!(conn.is_some());

        let mut response = client.execute(ClientRequest::get("/missing"), conn).unwrap();
        assert_eq!(response.status(), 404);
        assert_eq!(
            response.body().read_all(256).unwrap(),
            br#"{"code":404,"error":"Current url has no mapping"}"#
        );
        assert!(response.into_connection().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cooperative_loopback_with_async_client() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = server(ServerLimits {
            workers: 2,
            wait_strategy: WaitStrategy::Yield,
            ..ServerLimits::default()
        });
        tokio::spawn(server.launch(listener));

        let client = RequestExecutor::new(TcpConnector::new(addr).unwrap().with_host("loopback"));

        let mut response = client.execute_async(ClientRequest::get("/hello"), None).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.header("server").map(|s| s.starts_with("maker_h1/")), Some(true));
        assert_eq!(response.body().read_all_async(16).await.unwrap(), b"hi");

        let conn = response.into_connection();
        assert!(conn.is_some());

        let request = ClientRequest::new(crate::Method::Post, "/echo").body("abc");
        let mut response = client.execute_async(request, conn).await.unwrap();
        assert_eq!(response.body().read_all_async(16).await.unwrap(), b"abc");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cooperative_overflow_answers_503() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = server(ServerLimits {
            workers: 1,
            max_pending_connections: 1,
            wait_strategy: WaitStrategy::Yield,
            ..ServerLimits::default()
        });
        tokio::spawn(server.launch(listener));

        // Holds the only slot while waiting for its request.
        let _idle = tokio::net::TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = RequestExecutor::new(TcpConnector::new(addr).unwrap());
        let mut response = client.execute_async(ClientRequest::get("/hello"), None).await.unwrap();

        assert_eq!(response.status(), 503);
        assert_eq!(
            response.body().read_all_async(256).await.unwrap(),
            br#"{"code":503,"error":"Service temporarily unavailable"}"#
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawn_returns_abort_handle() {
        let scheduler = Scheduler::new(WaitStrategy::Yield);
        scheduler.start(1);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(tokio::net::TcpStream::connect(addr), listener.accept());
        let (client, (stream, _)) = (client.unwrap(), accepted.unwrap());

        let server = server(ServerLimits::default());
        let abort = server.spawn(&scheduler, ConnectionHandle::new(TokioStream::new(stream)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(scheduler.live(), 1);
        abort.abort();

        for _ in 0..100 {
            if scheduler.live() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(scheduler.live(), 0);

        // The server side is gone, so the peer sees EOF.
        let mut buf = [0; 8];
        client.readable().await.unwrap();
        assert_eq!(client.try_read(&mut buf).unwrap(), 0);
        scheduler.shutdown();
    }
}
