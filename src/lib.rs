//! maker_h1 - HTTP/1.1 request/response execution engine
//!
//! One exchange engine, two scheduling models. The same header reader,
//! connection-state classifier and dispatch glue drive a blocking executor (one
//! exchange per thread) and a cooperative one (many exchanges as explicit state
//! machines on a few worker tasks).
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: persistent connections, keep-alive loop, `101` upgrade handoff
//! - **HTTP/1.0**: closes by default, persistent with `Connection: keep-alive`
//!
//! # Characteristics
//!
//! - **One scratch buffer per connection** - holds the header block, the first body
//!   bytes and the staged response, reset between keep-alive exchanges
//! - **Explicit suspension points** - a machine only waits for transport readiness,
//!   connection acquisition or an async handler
//! - **Failures become responses** - handler errors and panics are answered once
//!   through the [`ErrorHandler`], never twice
//! - **Client and server** - [`RequestExecutor`] runs the mirrored client exchange
//!
//! # Examples
//!
//! Cooperative server:
//! ```no_run
//! use maker_h1::{ExactRouter, Request, Response, Server, StatusCode};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let router = ExactRouter::new()
//!         .get("/hello", |_: &mut Request| Ok(Response::new(StatusCode::Ok).body("Hello World!")))
//!         .get("/users/:id", |req: &mut Request| {
//!             let id = req.path_param("id").unwrap_or_default().to_string();
//!             Ok(Response::new(StatusCode::Ok).body(id))
//!         });
//!
//!     Server::builder()
//!         .router(router)
//!         .build()
//!         .launch(TcpListener::bind("127.0.0.1:8080").await?)
//!         .await
//! }
//! ```
//! Blocking client with connection reuse:
//! ```no_run
//! use maker_h1::{ClientRequest, RequestExecutor, TcpConnector};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RequestExecutor::new(TcpConnector::new("127.0.0.1:8080")?);
//!
//! let mut conn = None;
//! for path in ["/hello", "/users/7"] {
//!     let mut response = client.execute(ClientRequest::get(path), conn.take())?;
//!     let body = response.body().read_all(64 * 1024)?;
//!     println!("{path}: {} {:?}", response.status(), String::from_utf8_lossy(&body));
//!
//!     conn = response.into_connection();
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Logging
//!
//! The crate logs through [`tracing`] and installs no subscriber.

pub(crate) mod stream {
    pub(crate) mod body;
    pub(crate) mod buffer;
    pub(crate) mod proxy;
    pub(crate) mod transport;
}
pub(crate) mod http {
    pub(crate) mod headers;
    pub(crate) mod reader;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod state;
    pub(crate) mod types;
}
pub(crate) mod engine {
    pub(crate) mod coroutine;
    pub(crate) mod scheduler;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod dispatch;
    pub(crate) mod machine;
    pub(crate) mod server_impl;
}
pub(crate) mod client {
    pub(crate) mod executor;
    pub(crate) mod machine;
    pub(crate) mod provider;
}
pub(crate) mod errors;
pub mod limits;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::{
    client::{
        executor::{PendingResponse, RequestExecutor},
        provider::{ConnectionProvider, TcpConnector},
    },
    engine::{
        coroutine::{run, AbortHandle, Action, Coroutine, Wake},
        scheduler::Scheduler,
    },
    errors::{ClientError, Fault, HandlerError, ParseError, ReadError},
    http::{
        headers::HeaderMap,
        reader::{HeadReader, ParseResult, ReadStatus, RequestLine, StartingLine, StatusLine},
        request::{ClientRequest, PathParams, Request},
        response::{
            write::{BodyWriter, WriteBuffer},
            ClientResponse, Response, UpgradeHandler, Upgraded,
        },
        state::{ConnectionState, Negotiation},
        types::{Method, StatusCode, Version},
    },
    server::{
        connection::ServerExecutor,
        dispatch::{
            suspending, DefaultErrorHandler, Endpoint, ErrorHandler, ExactRouter, Interceptor, Route, Router,
            Suspending,
        },
        server_impl::{Server, ServerBuilder},
    },
    stream::{
        body::{BodyLength, Incoming},
        buffer::ScratchBuffer,
        proxy::{Duplex, InputProxy, OutputProxy},
        transport::{BoxFuture, ConnectionHandle, Interest, TokioStream, Transport},
    },
};
