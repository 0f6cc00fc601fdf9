use crate::{
    errors::{Fault, HandlerError, ParseError},
    http::{
        reader::{ParseResult, RequestLine},
        request::{split_target, PathParams, Request},
        response::{Response, UpgradeHandler},
        state::{ConnectionState, Negotiation},
        types::{Method, StatusCode, Version},
    },
    limits::ExchangeLimits,
    stream::{
        body::{BodyLength, Incoming},
        proxy::{Duplex, Outbound},
    },
    BoxFuture,
};
use serde_json::json;
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tracing::debug;

/// Application logic behind a route.
///
/// Plain closures taking `&mut Request` are endpoints already. The blocking
/// executor calls [`invoke`](Self::invoke); the cooperative one awaits
/// [`invoke_async`](Self::invoke_async) when [`suspends`](Self::suspends) says so
/// and calls `invoke` otherwise.
///
/// # Examples
/// ```
/// use maker_h1::{Endpoint, HandlerError, Request, Response, StatusCode};
///
/// struct Health;
///
/// impl Endpoint for Health {
///     fn invoke(&self, _: &mut Request) -> Result<Response, HandlerError> {
///         Ok(Response::new(StatusCode::Ok).body("up"))
///     }
/// }
/// ```
pub trait Endpoint: Send + Sync + 'static {
    fn invoke(&self, request: &mut Request) -> Result<Response, HandlerError>;

    fn invoke_async<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Result<Response, HandlerError>> {
        let result = self.invoke(request);
        Box::pin(std::future::ready(result))
    }

    /// Whether the endpoint may suspend, i.e. has a real `invoke_async`.
    fn suspends(&self) -> bool {
        false
    }
}

impl<F> Endpoint for F
where
    F: Fn(&mut Request) -> Result<Response, HandlerError> + Send + Sync + 'static,
{
    #[inline]
    fn invoke(&self, request: &mut Request) -> Result<Response, HandlerError> {
        self(request)
    }
}

/// An endpoint written as an async function, see [`suspending`].
pub struct Suspending<F>(F);

/// Wraps an async handler into an [`Endpoint`].
///
/// Under the cooperative executor the returned future runs on its own task while
/// the connection's machine is suspended. The blocking executor drives it to
/// completion on a private single-threaded runtime.
///
/// # Examples
/// ```
/// use maker_h1::{suspending, ExactRouter, HandlerError, Response, StatusCode};
///
/// let router = ExactRouter::new().add(
///     maker_h1::Method::Post,
///     "/echo",
///     suspending(|req| {
///         Box::pin(async move {
///             let body = req.body().read_all_async(1024).await?;
///             Ok::<_, HandlerError>(Response::new(StatusCode::Ok).body(body))
///         })
///     }),
/// );
/// # drop(router);
/// ```
pub fn suspending<F>(handler: F) -> Suspending<F>
where
    F: for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Result<Response, HandlerError>> + Send + Sync + 'static,
{
    Suspending(handler)
}

impl<F> Endpoint for Suspending<F>
where
    F: for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Result<Response, HandlerError>> + Send + Sync + 'static,
{
    fn invoke(&self, request: &mut Request) -> Result<Response, HandlerError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        runtime.block_on((self.0)(request))
    }

    #[inline]
    fn invoke_async<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Result<Response, HandlerError>> {
        (self.0)(request)
    }

    #[inline]
    fn suspends(&self) -> bool {
        true
    }
}

/// A matched route: the endpoint plus the values captured from the path.
#[derive(Clone)]
pub struct Route {
    pub endpoint: Arc<dyn Endpoint>,
    pub params: PathParams,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route").field("params", &self.params).finish_non_exhaustive()
    }
}

/// Route lookup. Shared read-only by every exchange.
pub trait Router: Send + Sync + 'static {
    fn route(&self, method: Method, path: &str) -> Option<Route>;
}

/// Gets the first chance to answer a request before it is routed.
///
/// Interceptors run in registration order; the first one returning a response
/// short-circuits the rest of the chain and the endpoint.
///
/// # Examples
/// ```
/// use maker_h1::{HandlerError, Request, Response, StatusCode};
///
/// let auth = |req: &mut Request| -> Result<Option<Response>, HandlerError> {
///     match req.header("authorization") {
///         Some(_) => Ok(None),
///         None => Err(HandlerError::new(StatusCode::Unauthorized, "Missing credentials")),
///     }
/// };
/// # let _ = auth;
/// ```
pub trait Interceptor: Send + Sync + 'static {
    fn intercept(&self, request: &mut Request) -> Result<Option<Response>, HandlerError>;
}

impl<F> Interceptor for F
where
    F: Fn(&mut Request) -> Result<Option<Response>, HandlerError> + Send + Sync + 'static,
{
    #[inline]
    fn intercept(&self, request: &mut Request) -> Result<Option<Response>, HandlerError> {
        self(request)
    }
}

/// Turns a status and message into a response. Must not fail.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, status: StatusCode, message: &str) -> Response;
}

impl<F> ErrorHandler for F
where
    F: Fn(StatusCode, &str) -> Response + Send + Sync + 'static,
{
    #[inline]
    fn handle(&self, status: StatusCode, message: &str) -> Response {
        self(status, message)
    }
}

/// Error responses used unless the server is given its own handler.
///
/// Closes the connection and, with `json` set, renders
/// `{"code":<status>,"error":<message>}`.
#[derive(Debug, Clone, Copy)]
pub struct DefaultErrorHandler {
    pub json: bool,
}

impl ErrorHandler for DefaultErrorHandler {
    fn handle(&self, status: StatusCode, message: &str) -> Response {
        let response = Response::new(status).header("connection", "close");

        match self.json {
            true => response
                .header("content-type", "application/json")
                .body(json!({ "error": message, "code": status.as_u16() }).to_string()),
            false => response,
        }
    }
}

enum Segment {
    Literal(String),
    Capture(String),
}

/// A `(method, path)` table with `:name` captures.
///
/// # Examples
/// ```
/// use maker_h1::{ExactRouter, Method, Request, Response, Router, StatusCode};
///
/// let router = ExactRouter::new().get("/users/:id", |req: &mut Request| {
///     Ok(Response::new(StatusCode::Ok).body(req.path_param("id").unwrap_or_default().to_string()))
/// });
///
/// let route = router.route(Method::Get, "/users/42").unwrap();
/// assert_eq!(route.params["id"], "42");
/// assert!(router.route(Method::Post, "/users/42").is_none());
/// ```
#[derive(Default)]
pub struct ExactRouter {
    routes: Vec<(Method, Vec<Segment>, Arc<dyn Endpoint>)>,
}

impl ExactRouter {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `endpoint` for `method` and `pattern`; earlier registrations win.
    pub fn add<E: Endpoint>(mut self, method: Method, pattern: &str, endpoint: E) -> Self {
        let segments = pattern
            .split('/')
            .map(|part| match part.strip_prefix(':') {
                Some(name) => Segment::Capture(name.to_string()),
                None => Segment::Literal(part.to_string()),
            })
            .collect();

        self.routes.push((method, segments, Arc::new(endpoint)));
        self
    }

    #[inline]
    pub fn get<F>(self, pattern: &str, endpoint: F) -> Self
    where
        F: Fn(&mut Request) -> Result<Response, HandlerError> + Send + Sync + 'static,
    {
        self.add(Method::Get, pattern, endpoint)
    }

    #[inline]
    pub fn post<F>(self, pattern: &str, endpoint: F) -> Self
    where
        F: Fn(&mut Request) -> Result<Response, HandlerError> + Send + Sync + 'static,
    {
        self.add(Method::Post, pattern, endpoint)
    }

    #[inline]
    pub fn put<F>(self, pattern: &str, endpoint: F) -> Self
    where
        F: Fn(&mut Request) -> Result<Response, HandlerError> + Send + Sync + 'static,
    {
        self.add(Method::Put, pattern, endpoint)
    }

    #[inline]
    pub fn delete<F>(self, pattern: &str, endpoint: F) -> Self
    where
        F: Fn(&mut Request) -> Result<Response, HandlerError> + Send + Sync + 'static,
    {
        self.add(Method::Delete, pattern, endpoint)
    }
}

impl Router for ExactRouter {
    fn route(&self, method: Method, path: &str) -> Option<Route> {
        'routes: for (route_method, segments, endpoint) in &self.routes {
            if *route_method != method {
                continue;
            }

            let mut params = PathParams::new();
            let mut parts = path.split('/');

            for segment in segments {
                let Some(part) = parts.next() else {
                    continue 'routes;
                };

                match segment {
                    Segment::Literal(literal) if literal == part => {}
                    Segment::Capture(name) if !part.is_empty() => {
                        params.insert(name.clone(), part.to_string());
                    }
                    _ => continue 'routes,
                }
            }

            if parts.next().is_none() {
                return Some(Route {
                    endpoint: endpoint.clone(),
                    params,
                });
            }
        }

        None
    }
}

/// Where the response of an exchange goes.
pub(crate) enum Origin {
    /// The request was parsed; its headers take part in the negotiation.
    Request(Request),
    /// Only the connection is left, e.g. after a parse failure.
    Bare(Duplex),
}

/// Everything needed to finish an exchange once its response is decided.
pub(crate) struct Concluded {
    pub(crate) state: ConnectionState,
    pub(crate) duplex: Duplex,
    pub(crate) outbound: Outbound,
    /// Already-read bytes of the protocol taking over after an upgrade.
    pub(crate) carry: Vec<u8>,
    pub(crate) upgrade: Option<Box<dyn UpgradeHandler>>,
}

/// The read-only routing and error-recovery setup shared by every exchange.
pub(crate) struct Dispatcher {
    router: Arc<dyn Router>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    error_handler: Arc<dyn ErrorHandler>,
    server_name: String,
}

impl Dispatcher {
    pub(crate) fn new(
        router: Arc<dyn Router>,
        interceptors: Vec<Arc<dyn Interceptor>>,
        error_handler: Arc<dyn ErrorHandler>,
        server_name: String,
    ) -> Self {
        Self {
            router,
            interceptors,
            error_handler,
            server_name,
        }
    }

    /// Builds the request around the connection and looks up its route.
    ///
    /// `None` as endpoint means there is no route. An undeterminable body length
    /// gives the connection back with the error.
    pub(crate) fn open(
        &self,
        head: ParseResult<RequestLine>,
        duplex: Duplex,
    ) -> Result<(Request, Option<Arc<dyn Endpoint>>), (ParseError, Duplex)> {
        let length = match BodyLength::of_request(&head.headers) {
            Ok(length) => length,
            Err(err) => return Err((err, duplex)),
        };

        let (path, _) = split_target(&head.line.target);
        let (endpoint, params) = match self.router.route(head.line.method, path) {
            Some(route) => (Some(route.endpoint), route.params),
            None => (None, PathParams::new()),
        };

        let body = Incoming::new(duplex, length);
        Ok((Request::new(head.line, head.headers, params, body), endpoint))
    }

    /// Runs the interceptor chain, stopping at the first response.
    pub(crate) fn intercept(&self, request: &mut Request) -> Result<Option<Response>, Fault> {
        for interceptor in &self.interceptors {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| interceptor.intercept(request)))
                .map_err(|_| Fault::Panicked)?;

            if let Some(response) = outcome? {
                return Ok(Some(response));
            }
        }

        Ok(None)
    }

    pub(crate) fn invoke(&self, endpoint: &Arc<dyn Endpoint>, request: &mut Request) -> Result<Response, Fault> {
        panic::catch_unwind(AssertUnwindSafe(|| endpoint.invoke(request)))
            .map_err(|_| Fault::Panicked)?
            .map_err(Fault::from)
    }

    pub(crate) fn on_error(&self, fault: &Fault) -> Response {
        let (status, message) = fault.describe();
        debug!(%status, %fault, "Converting failure into an error response");
        self.error_handler.handle(status, &message)
    }

    pub(crate) fn on_parse_error(&self, err: ParseError) -> Response {
        debug!(%err, "Rejecting unparsable request");
        self.error_handler.handle(err.status(), "Invalid request headers")
    }

    pub(crate) fn not_found(&self) -> Response {
        self.error_handler.handle(StatusCode::NotFound, "Current url has no mapping")
    }

    pub(crate) fn unavailable(&self) -> Response {
        self.error_handler
            .handle(StatusCode::ServiceUnavailable, "Service temporarily unavailable")
    }

    /// Settles the connection state and prepares the response bytes.
    ///
    /// Adds the `server` header if absent, classifies the exchange and downgrades
    /// KEEP_ALIVE to CLOSE when the connection is not positioned at a request
    /// boundary or has reached its limits. The scratch buffer is reset and ready to
    /// stage the returned [`Outbound`]. Bodies of HEAD requests and of 1xx, 204
    /// and 304 responses never reach the wire.
    pub(crate) fn conclude(&self, mut response: Response, origin: Origin, limits: &ExchangeLimits) -> Concluded {
        response.put_header_if_absent("server", self.server_name.as_str());
        response.finalize();

        let mut bodiless = StatusCode::forbids_body(response.status().as_u16());

        let (mut state, version, mut duplex) = match origin {
            Origin::Bare(duplex) => (ConnectionState::Close, Version::Http11, duplex),
            Origin::Request(request) => {
                let (line, headers, mut body) = request.into_parts();
                bodiless |= line.method == Method::Head;

                let mut state = Negotiation {
                    request_version: line.version,
                    request_headers: &headers,
                    response_version: Version::Http11,
                    status: response.status().as_u16(),
                    response_headers: response.headers(),
                    upgrade_handler: response.has_upgrade_handler(),
                }
                .classify();

                body.settle();
                if state == ConnectionState::KeepAlive
                    && (!body.is_settled() || !body.duplex().scratch().window().is_empty())
                {
                    debug!(
                        unread = body.remaining(),
                        "Request body or pipelined bytes left unread, closing connection"
                    );
                    state = ConnectionState::Close;
                }

                (state, line.version, body.into_duplex())
            }
        };

        if state == ConnectionState::KeepAlive && duplex.connection().is_expiring(limits) {
            debug!(
                requests = duplex.connection().request_count() + 1,
                "Connection reached its limits, closing"
            );
            state = ConnectionState::Close;
        }

        let carry = match state {
            ConnectionState::Upgrade => duplex.scratch().window().to_vec(),
            _ => Vec::new(),
        };

        match state {
            ConnectionState::Close => {
                response.headers_mut().insert("connection", "close");
            }
            ConnectionState::KeepAlive if version == Version::Http10 => {
                response.put_header_if_absent("connection", "keep-alive");
            }
            _ => {}
        }

        duplex.scratch.reset();

        let upgrade = response.take_upgrade();
        // HEAD keeps the content-length of the body it would have sent.
        let body = match bodiless {
            true => Vec::new(),
            false => response.take_body(),
        };
        let outbound = Outbound::new(response.encode_head(), body);

        Concluded {
            state,
            duplex,
            outbound,
            carry,
            upgrade,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        http::reader::{HeadReader, ReadStatus},
        testing::{text, MockStream},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dispatcher(router: ExactRouter, interceptors: Vec<Arc<dyn Interceptor>>) -> Dispatcher {
        Dispatcher::new(
            Arc::new(router),
            interceptors,
            Arc::new(DefaultErrorHandler { json: true }),
            "test-server".into(),
        )
    }

    fn parsed(raw: &str) -> (ParseResult<RequestLine>, Duplex) {
        let mut duplex = Duplex::new(MockStream::new().chunk(raw).into_handle(), 1024);
        let mut reader = HeadReader::new(1024);

        match reader.read(&mut duplex.scratch, &mut duplex.conn).unwrap() {
            ReadStatus::Complete(head) => (head, duplex),
            ReadStatus::Pending => panic!("incomplete head"),
        }
    }

    fn finish(concluded: Concluded) -> (ConnectionState, String) {
        let Concluded {
            state,
            mut duplex,
            mut outbound,
            ..
        } = concluded;

        let mock = MockStream::new();
        let written = mock.written();
        duplex.conn = mock.into_handle();
        outbound.send(&mut duplex.output()).unwrap();

        (state, text(&written))
    }

    #[test]
    fn router_matches_exact_paths_and_captures() {
        let ok = |_: &mut Request| -> Result<Response, HandlerError> { Ok(Response::new(StatusCode::Ok)) };
        let router = ExactRouter::new()
            .get("/", ok)
            .get("/users/:id/posts/:post", ok)
            .post("/users", ok);

        #[rustfmt::skip]
        let cases: [(Method, &str, Option<&[(&str, &str)]>); 8] = [
            (Method::Get,  "/",                   Some(&[])),
            (Method::Get,  "/users/7/posts/abc",  Some(&[("id", "7"), ("post", "abc")])),
            (Method::Get,  "/users/7/posts",      None),
            (Method::Get,  "/users/7/posts/a/b",  None),
            (Method::Get,  "/users//posts/a",     None),
            (Method::Post, "/users",              Some(&[])),
            (Method::Put,  "/users",              None),
            (Method::Get,  "/nothing",            None),
        ];

        for (method, path, expected) in cases {
            let route = router.route(method, path);
            match expected {
                None => assert!(route.is_none(), "{method} {path}"),
                Some(params) => {
                    let route = route.unwrap_or_else(|| panic!("{method} {path}"));
                    assert_eq!(route.params.len(), params.len());
                    for (name, value) in params {
                        assert_eq!(route.params[*name], *value);
                    }
                }
            }
        }
    }

    #[test]
    fn default_error_handler_renders_json() {
        let resp = DefaultErrorHandler { json: true }.handle(StatusCode::NotFound, "Current url has no mapping");
        assert_eq!(resp.body_bytes(), br#"{"code":404,"error":"Current url has no mapping"}"#);
        assert_eq!(resp.headers().get("content-type"), Some("application/json"));
        assert_eq!(resp.headers().get("connection"), Some("close"));

        let resp = DefaultErrorHandler { json: false }.handle(StatusCode::BadRequest, "nope");
        assert!(resp.body_bytes().is_empty());
    }

    #[test]
    fn interceptor_short_circuits_the_chain() {
        let calls = Arc::new(AtomicUsize::new(0));

        let counting = |answer: bool, calls: Arc<AtomicUsize>| -> Arc<dyn Interceptor> {
            Arc::new(move |_: &mut Request| -> Result<Option<Response>, HandlerError> {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(answer.then(|| Response::new(StatusCode::Forbidden)))
            })
        };

        let dispatcher = dispatcher(
            ExactRouter::new(),
            vec![
                counting(false, calls.clone()),
                counting(true, calls.clone()),
                counting(true, calls.clone()),
            ],
        );

        let (head, duplex) = parsed("GET / HTTP/1.1\r\n\r\n");
        let (mut request, _) = dispatcher.open(head, duplex).ok().unwrap();

        let response = dispatcher.intercept(&mut request).unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::Forbidden);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failures_become_responses() {
        let dispatcher = dispatcher(ExactRouter::new(), Vec::new());
        let (head, duplex) = parsed("GET / HTTP/1.1\r\n\r\n");
        let (mut request, _) = dispatcher.open(head, duplex).ok().unwrap();

        let failing: Arc<dyn Endpoint> = Arc::new(|_: &mut Request| -> Result<Response, HandlerError> {
            Err(HandlerError::new(StatusCode::Conflict, "taken"))
        });
        let fault = dispatcher.invoke(&failing, &mut request).unwrap_err();
        assert_eq!(dispatcher.on_error(&fault).status(), StatusCode::Conflict);

        let panicking: Arc<dyn Endpoint> = Arc::new(|_: &mut Request| -> Result<Response, HandlerError> {
            panic!("bug")
        });
        let fault = dispatcher.invoke(&panicking, &mut request).unwrap_err();
        let response = dispatcher.on_error(&fault);
        assert_eq!(response.status(), StatusCode::InternalServerError);
        assert_eq!(response.body_bytes(), br#"{"code":500,"error":"Unknown error"}"#);
    }

    #[test]
    fn not_found_closes_and_names_the_server() {
        let dispatcher = dispatcher(ExactRouter::new(), Vec::new());
        let (head, duplex) = parsed("GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");

        let (request, endpoint) = dispatcher.open(head, duplex).ok().unwrap();
        assert!(endpoint.is_none());

        let concluded = dispatcher.conclude(
            dispatcher.not_found(),
            Origin::Request(request),
            &ExchangeLimits::default(),
        );
        let (state, written) = finish(concluded);

        assert_eq!(state, ConnectionState::Close);
        assert_eq!(
            written,
            "HTTP/1.1 404 Not Found\r\nconnection: close\r\ncontent-type: application/json\r\n\
             server: test-server\r\ncontent-length: 49\r\n\r\n\
             {\"code\":404,\"error\":\"Current url has no mapping\"}"
        );
    }

    #[test]
    fn conclude_states() {
        let dispatcher = dispatcher(ExactRouter::new(), Vec::new());
        let limits = ExchangeLimits::default();

        let conclude = |raw: &str, response: Response| {
            let (head, duplex) = parsed(raw);
            let (request, _) = dispatcher.open(head, duplex).ok().unwrap();
            finish(dispatcher.conclude(response, Origin::Request(request), &limits))
        };

        // Plain persistent exchange.
        let (state, written) = conclude("GET / HTTP/1.1\r\n\r\n", Response::new(StatusCode::Ok).body("hi"));
        assert_eq!(state, ConnectionState::KeepAlive);
        assert_eq!(written, "HTTP/1.1 200 OK\r\nserver: test-server\r\ncontent-length: 2\r\n\r\nhi");

        // Explicit close on the response.
        let (state, _) = conclude("GET / HTTP/1.1\r\n\r\n", Response::new(StatusCode::Ok).close());
        assert_eq!(state, ConnectionState::Close);

        // HTTP/1.0 keep-alive is echoed back.
        let (state, written) = conclude(
            "GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n",
            Response::new(StatusCode::NoContent),
        );
        assert_eq!(state, ConnectionState::KeepAlive);
        assert!(written.contains("connection: keep-alive\r\n"));

        // A fully buffered body is discarded and the connection stays usable.
        let (state, _) = conclude(
            "POST / HTTP/1.1\r\ncontent-length: 3\r\n\r\nabc",
            Response::new(StatusCode::Ok),
        );
        assert_eq!(state, ConnectionState::KeepAlive);

        // Part of the body still on the wire.
        let (state, written) = conclude(
            "POST / HTTP/1.1\r\ncontent-length: 10\r\n\r\nabc",
            Response::new(StatusCode::Ok),
        );
        assert_eq!(state, ConnectionState::Close);
        assert!(written.contains("connection: close\r\n"));

        // Pipelined bytes after the request.
        let (state, _) = conclude(
            "GET / HTTP/1.1\r\n\r\nGET /next HTTP/1.1\r\n\r\n",
            Response::new(StatusCode::Ok),
        );
        assert_eq!(state, ConnectionState::Close);
    }

    #[test]
    fn upgrade_carries_early_bytes() {
        let dispatcher = dispatcher(ExactRouter::new(), Vec::new());
        let (head, duplex) = parsed("GET /ws HTTP/1.1\r\nUpgrade: echo\r\nConnection: upgrade\r\n\r\nhello");
        let (request, _) = dispatcher.open(head, duplex).ok().unwrap();

        let response = Response::new(StatusCode::SwitchingProtocols)
            .header("connection", "upgrade")
            .header("upgrade", "echo")
            .upgrade(|_: crate::Upgraded| {});

        let concluded = dispatcher.conclude(response, Origin::Request(request), &ExchangeLimits::default());
        assert_eq!(concluded.state, ConnectionState::Upgrade);
        assert_eq!(concluded.carry, b"hello");
        assert!(concluded.upgrade.is_some());
    }

    #[test]
    fn bare_origin_always_closes() {
        let dispatcher = dispatcher(ExactRouter::new(), Vec::new());
        let duplex = Duplex::new(MockStream::new().into_handle(), 64);

        let response = dispatcher.on_parse_error(ParseError::HeadersTooLarge);
        let (state, written) = finish(dispatcher.conclude(response, Origin::Bare(duplex), &ExchangeLimits::default()));

        assert_eq!(state, ConnectionState::Close);
        assert!(written.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"));
        assert!(written.ends_with(r#"{"code":431,"error":"Invalid request headers"}"#));
    }

    #[test]
    fn invalid_content_length_is_rejected() {
        let dispatcher = dispatcher(ExactRouter::new(), Vec::new());
        let (head, duplex) = parsed("POST / HTTP/1.1\r\ncontent-length: ten\r\n\r\n");

        let Err((err, _)) = dispatcher.open(head, duplex) else {
            panic!("accepted a bad content-length");
        };
        assert_eq!(err, ParseError::InvalidContentLength);
    }
}
