//! Engine configuration limits and timeouts
//!
//! # Memory Consumption
//!
//! Each active connection owns exactly one scratch buffer of
//! [`ExchangeLimits::scratch_capacity`] bytes. The same buffer holds the incoming
//! header block, the first bytes of the body and, once the response is formed, the
//! staged outgoing bytes.
//!
//! # Examples
//!
//! ```no_run
//! use maker_h1::{ExactRouter, Response, Server, StatusCode};
//! use maker_h1::limits::{ExchangeLimits, ServerLimits};
//! use std::time::Duration;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let router = ExactRouter::new().get("/", |_: &mut maker_h1::Request| {
//!         Ok(Response::new(StatusCode::Ok).body("hi"))
//!     });
//!
//!     Server::builder()
//!         .router(router)
//!         .server_limits(ServerLimits {
//!             workers: 8,
//!             ..ServerLimits::default()
//!         })
//!         .exchange_limits(ExchangeLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             max_requests_per_connection: 10_000,
//!             ..ExchangeLimits::default()
//!         })
//!         .build()
//!         .launch(TcpListener::bind("127.0.0.1:8080").await?)
//!         .await
//! }
//! ```

use std::time::Duration;

/// Per-connection limits shared by the blocking and the cooperative executor.
///
/// Default values balance memory, latency and resistance to stalled peers.
#[derive(Debug, Clone)]
pub struct ExchangeLimits {
    /// Size of the per-connection scratch buffer (default: `8 KiB`)
    ///
    /// Never smaller than [`max_header_size`](Self::max_header_size), see
    /// [`scratch_capacity`](Self::scratch_capacity).
    pub buffer_size: usize,

    /// Upper bound for the whole header block including the terminator (default: `4096 B`)
    ///
    /// A server answers an oversized block with `431`, a client reports
    /// [`ParseError::HeadersTooLarge`](crate::ParseError::HeadersTooLarge).
    pub max_header_size: usize,

    /// Maximum duration to wait for the socket to become readable (default: `2 seconds`)
    ///
    /// The blocking executor applies it as the socket read timeout; the cooperative
    /// scheduler aborts the machine when readiness does not arrive in time.
    pub socket_read_timeout: Duration,

    /// Maximum duration to wait for the socket to become writable (default: `3 seconds`)
    pub socket_write_timeout: Duration,

    /// Maximum number of exchanges on one connection (default: `100`)
    ///
    /// The exchange that reaches the limit is answered with `connection: close`.
    pub max_requests_per_connection: usize,

    /// Maximum lifetime of a connection from establishment to closure (default: `2 minutes`)
    ///
    /// Checked once per exchange, so a running exchange is never cut short by it.
    pub connection_lifetime: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ExchangeLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            buffer_size: 8 * 1024,
            max_header_size: 4096,
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),
            max_requests_per_connection: 100,
            connection_lifetime: Duration::from_secs(120),

            _priv: (),
        }
    }
}

impl ExchangeLimits {
    /// Capacity of the scratch buffer actually allocated per connection.
    ///
    /// # Example
    /// ```
    /// use maker_h1::limits::ExchangeLimits;
    ///
    /// let limits = ExchangeLimits {
    ///     buffer_size: 512,
    ///     max_header_size: 2048,
    ///     ..ExchangeLimits::default()
    /// };
    /// assert_eq!(limits.scratch_capacity(), 2048);
    /// ```
    #[inline]
    pub fn scratch_capacity(&self) -> usize {
        self.buffer_size.max(self.max_header_size)
    }
}

/// Controls server-level concurrency, queueing, and error formatting.
///
/// # Connection management
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  || TCP_STREAM
///                                  \/
/// [--------------]   Yes   /----------------\   No   [-------------]
/// [ Add to queue ] <====== | Queue if full? | =====> [ Sending 503 ]
/// [--------------]         \----------------/        [-------------]
///        ||
///        \/
/// [-----------------]         /---------------------\
/// [ Worker resumes  ] <====== | Machine ready again | <== readiness / handler
/// [ the machine     ]         \---------------------/
/// [-----------------]
/// ```
///
/// In the cooperative model the queue holds runnable machines, not connections, and
/// `workers` tasks resume them. In the blocking model each worker thread owns one
/// connection at a time.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of workers (default: `4`)
    ///
    /// Tokio tasks for [`Server::launch`](crate::Server::launch), OS threads for
    /// [`Server::launch_blocking`](crate::Server::launch_blocking).
    pub workers: usize,

    /// Maximum number of accepted connections held at once (default: `250`)
    ///
    /// Cooperative: connections with a live machine. Blocking: connections queued
    /// for a free worker thread. Connections beyond this bound receive an
    /// immediate `503` and are closed.
    pub max_pending_connections: usize,

    /// Strategy for worker waiting behavior (default: `Sleep(50μs)`)
    ///
    /// Controls how cooperative workers wait when the run queue is empty.
    pub wait_strategy: WaitStrategy,

    /// Format for error responses (default: `true`)
    ///
    /// # Examples
    /// If `true`, then on error the server will return:
    /// ```text
    /// HTTP/1.1 404 Not Found\r
    /// connection: close\r
    /// content-type: application/json\r
    /// server: maker_h1/0.1.0\r
    /// content-length: 49\r
    /// \r
    /// {"code":404,"error":"Current url has no mapping"}
    /// ```
    /// If `false`, the body is empty and `content-length: 0` is sent.
    pub json_errors: bool,

    /// Value of the `server` header added to every response lacking one
    /// (default: `maker_h1/<version>`)
    pub server_name: String,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            workers: 4,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            json_errors: true,
            server_name: concat!("maker_h1/", env!("CARGO_PKG_VERSION")).to_string(),

            _priv: (),
        }
    }
}

/// Strategy for worker task waiting when no machine is runnable
///
/// Different strategies optimize for different workload patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// While waiting, uses [`tokio::task::yield_now()`]
    ///
    /// # Note
    /// Keeps a core busy even when idle.
    ///
    /// Worker operation with this waiting strategy:
    /// ```
    /// # #[tokio::main]
    /// async fn main() {
    /// # let mut queue = vec![1, 2, 3];
    /// #
    /// let value = loop {
    ///     if let Some(value) = queue.pop() {
    ///         break value;
    ///     }
    ///
    ///     tokio::task::yield_now().await;
    /// };
    /// # }
    /// ```
    Yield,

    /// While waiting, uses [`tokio::time::sleep()`]
    ///
    /// Worker operation with this waiting strategy:
    /// ```
    /// # #[tokio::main]
    /// async fn main() {
    /// # let mut queue = vec![1, 2, 3];
    /// # let time = std::time::Duration::from_micros(50);
    /// #
    /// let value = loop {
    ///     if let Some(value) = queue.pop() {
    ///         break value;
    ///     }
    ///
    ///     tokio::time::sleep(time).await;
    /// };
    /// # }
    /// ```
    Sleep(Duration),
}

/// Client-side limits and timeouts.
#[derive(Debug, Clone)]
pub struct ClientLimits {
    /// Maximum duration of a connection attempt (default: `5 seconds`)
    pub connect_timeout: Duration,
    /// Maximum duration to wait for response bytes (default: `10 seconds`)
    pub read_timeout: Duration,
    /// Maximum duration to wait for the socket to accept request bytes (default: `10 seconds`)
    pub write_timeout: Duration,
    /// Size of the per-exchange scratch buffer (default: `8 KiB`)
    pub buffer_size: usize,
    /// Upper bound for the response header block (default: `8 KiB`)
    pub max_header_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ClientLimits {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            buffer_size: 8 * 1024,
            max_header_size: 8 * 1024,

            _priv: (),
        }
    }
}

impl ClientLimits {
    #[inline]
    pub(crate) fn scratch_capacity(&self) -> usize {
        self.buffer_size.max(self.max_header_size)
    }
}
