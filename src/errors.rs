use crate::StatusCode;
use std::{error, io};

macro_rules! parse_errors {
    ($(
        $(#[$docs:meta])*
        $name:ident: $status:ident => $message:literal;
    )*) => {
        /// Malformed starting line or header block.
        ///
        /// On the client side this is surfaced to the caller; on the server side it is
        /// turned into a response with [`status`](ParseError::status) and the
        /// connection is closed.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
        pub enum ParseError { $(
            $(#[$docs])*
            #[error($message)]
            $name,
        )* }

        impl ParseError {
            /// Status code used when this error is answered on the server side.
            #[inline]
            pub const fn status(&self) -> StatusCode {
                match self { $(
                    Self::$name => StatusCode::$status,
                )* }
            }
        }
    };
}

parse_errors! {
    /// The header terminator was not found within the configured bound.
    HeadersTooLarge: RequestHeaderFieldsTooLarge => "header block exceeds the size bound";
    /// The first line has fewer or more tokens than the protocol allows.
    InvalidStartingLine: BadRequest => "malformed starting line";
    InvalidMethod: BadRequest => "unknown request method";
    UnsupportedVersion: HttpVersionNotSupported => "unsupported protocol version";
    InvalidStatus: BadGateway => "malformed status code";
    /// A header line without a colon, with an empty name or stray line breaks.
    InvalidHeader: BadRequest => "malformed header line";
    InvalidEncoding: BadRequest => "header block is not valid UTF-8";
    InvalidContentLength: BadRequest => "invalid content-length";
}

/// Outcome of a failed attempt to read a header block.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Zero bytes where headers were expected.
    #[error("connection closed before headers")]
    PeerClosed,
    #[error("i/o error while reading headers: {0}")]
    Io(#[from] io::Error),
}

/// Failure raised by an interceptor or an endpoint.
///
/// A failure that already carries protocol semantics keeps its status and message
/// when it is converted into a response; anything else collapses to
/// `500 Internal Server Error` with the failure's description.
///
/// # Examples
/// ```
/// use maker_h1::{HandlerError, StatusCode};
///
/// let denied = HandlerError::new(StatusCode::Forbidden, "token expired");
/// assert_eq!(denied.status(), StatusCode::Forbidden);
///
/// let broken = HandlerError::other(std::io::Error::other("disk on fire"));
/// assert_eq!(broken.status(), StatusCode::InternalServerError);
/// assert_eq!(broken.message(), "disk on fire");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{status}: {message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl HandlerError {
    #[inline]
    pub fn new<M: Into<String>>(status: StatusCode, message: M) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    #[inline]
    pub fn other<E: Into<Box<dyn error::Error + Send + Sync>>>(err: E) -> Self {
        Self::Other(err.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Http { status, .. } => *status,
            Self::Other(_) => StatusCode::InternalServerError,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Http { message, .. } => message.clone(),
            Self::Other(err) => err.to_string(),
        }
    }
}

impl From<io::Error> for HandlerError {
    fn from(err: io::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

/// A failed resumption step of a cooperative machine.
///
/// The scheduler hands it to [`Coroutine::recover`](crate::Coroutine::recover).
#[derive(Debug, thiserror::Error)]
pub enum Fault {
    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
    #[error("task panicked")]
    Panicked,
}

impl Fault {
    /// Status and message used when the fault is answered with an error response.
    pub(crate) fn describe(&self) -> (StatusCode, String) {
        match self {
            Self::Handler(err) => (err.status(), err.message()),
            Self::Io(err) => (StatusCode::InternalServerError, err.to_string()),
            Self::Panicked => (StatusCode::InternalServerError, "Unknown error".into()),
        }
    }
}

/// Failure of a client-side exchange. Fatal for the call; never retried internally.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection provider failed to provide a connection: {0}")]
    Connect(#[source] io::Error),
    #[error("failed to parse response: {0}")]
    Protocol(#[from] ParseError),
    #[error("connection closed before response headers")]
    PeerClosed,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("request execution aborted")]
    Aborted,
}

impl From<ReadError> for ClientError {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::Parse(err) => Self::Protocol(err),
            ReadError::PeerClosed => Self::PeerClosed,
            ReadError::Io(err) => Self::Io(err),
        }
    }
}

impl From<Fault> for ClientError {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::Io(err) => Self::Io(err),
            Fault::Handler(err) => Self::Io(io::Error::other(err)),
            Fault::Panicked => Self::Aborted,
        }
    }
}
