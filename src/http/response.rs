//! Outgoing server responses and incoming client responses.

use crate::{
    http::{
        headers::HeaderMap,
        reader::StatusLine,
        state::ConnectionState,
        types::{StatusCode, Version},
    },
    stream::{body::Incoming, transport::ConnectionHandle},
    BodyWriter, WriteBuffer,
};
use std::{borrow::Cow, fmt, rc::Rc, sync::Arc};

/// HTTP response built by endpoints, interceptors and error handlers.
///
/// Provides a fluent interface for building HTTP responses with status codes,
/// headers, and body content. `content-length` is calculated automatically, and the
/// `connection` header is settled by the engine once the connection state is known.
///
/// # Examples
/// ```
/// use maker_h1::{Response, StatusCode};
///
/// let resp = Response::new(StatusCode::Ok)
///     .header("content-type", "text/html")
///     .header("x-request-id", 128)
///     .body("<h1>Hello World</h1>");
///
/// assert_eq!(resp.headers().get("X-Request-Id"), Some("128"));
/// assert_eq!(resp.body_bytes(), b"<h1>Hello World</h1>");
/// ```
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    upgrade: Option<Box<dyn UpgradeHandler>>,
}

impl Response {
    #[inline]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
            upgrade: None,
        }
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[inline]
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[inline]
    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Adds a header to the response.
    ///
    /// `content-length` is calculated automatically unless set here.
    ///
    /// # Examples
    /// ```
    /// use maker_h1::{Response, StatusCode};
    ///
    /// let resp = Response::new(StatusCode::Ok)
    ///     .header("content-type", "text/plain")        // &str, &str
    ///     .header("x-custom-id", 128)                  // &str, i32
    ///     .header("x-cache-enabled", true);            // &str, bool
    /// # assert_eq!(resp.headers().len(), 3);
    /// ```
    #[inline]
    pub fn header<N: Into<String>, V: WriteBuffer>(mut self, name: N, value: V) -> Self {
        self.headers.append(name, to_text(value));
        self
    }

    /// Adds a multi-value header joined by `split`.
    ///
    /// # Examples
    /// ```
    /// use maker_h1::{Response, StatusCode};
    ///
    /// let resp = Response::new(StatusCode::Ok)
    ///     .header_multi("accept", "; ", ["text/html", "text/plain"])
    ///     .header_multi("id-users", ", ", vec![123, 234, 345]);
    ///
    /// assert_eq!(resp.headers().get("accept"), Some("text/html; text/plain"));
    /// assert_eq!(resp.headers().get("id-users"), Some("123, 234, 345"));
    /// ```
    pub fn header_multi<N, S, I, V>(mut self, name: N, split: S, values: I) -> Self
    where
        N: Into<String>,
        S: WriteBuffer,
        I: IntoIterator<Item = V>,
        V: WriteBuffer,
    {
        let mut buffer = Vec::new();

        let mut iter = values.into_iter();
        if let Some(first) = iter.next() {
            first.write_to(&mut buffer);

            for value in iter {
                split.write_to(&mut buffer);
                value.write_to(&mut buffer);
            }
        }

        self.headers.append(name, to_text(buffer));
        self
    }

    /// Sets the response body.
    #[inline]
    pub fn body<T: WriteBuffer>(mut self, data: T) -> Self {
        self.body.clear();
        data.write_to(&mut self.body);
        self
    }

    /// Writes the response body via closure.
    ///
    /// # Examples
    /// ```
    /// use maker_h1::{Response, StatusCode};
    /// use std::io::Write;
    ///
    /// let resp = Response::new(StatusCode::Ok)
    ///     .header("content-type", "application/json")
    ///     .body_with(|writer| {
    ///         write!(writer, r#"{{"status": "ok", "id": {}}}"#, 7).unwrap();
    ///     });
    /// assert_eq!(resp.body_bytes(), br#"{"status": "ok", "id": 7}"#);
    /// ```
    #[inline]
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(mut self, f: F) -> Self {
        self.body.clear();
        f(&mut BodyWriter(&mut self.body));
        self
    }

    /// Forces the connection to close after this response.
    #[inline]
    pub fn close(mut self) -> Self {
        self.headers.insert("connection", "close");
        self
    }

    /// Attaches the handler that takes over the connection after a
    /// `101 Switching Protocols` response.
    ///
    /// # Examples
    /// ```
    /// use maker_h1::{Response, StatusCode, Upgraded};
    ///
    /// let resp = Response::new(StatusCode::SwitchingProtocols)
    ///     .header("connection", "upgrade")
    ///     .header("upgrade", "echo")
    ///     .upgrade(|upgraded: Upgraded| drop(upgraded));
    /// assert!(resp.has_upgrade_handler());
    /// ```
    #[inline]
    pub fn upgrade<U: UpgradeHandler>(mut self, handler: U) -> Self {
        self.upgrade = Some(Box::new(handler));
        self
    }

    #[inline]
    pub fn has_upgrade_handler(&self) -> bool {
        self.upgrade.is_some()
    }

    #[inline]
    pub fn put_header_if_absent<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) -> bool {
        self.headers.put_if_absent(name, value)
    }

    /// Adds `content-length` when the message may carry a body and declares no length.
    pub(crate) fn finalize(&mut self) {
        let code = self.status.as_u16();

        if StatusCode::forbids_body(code)
            || self.headers.contains("content-length")
            || self.headers.contains("transfer-encoding")
        {
            return;
        }

        self.headers.insert("content-length", to_text(self.body.len()));
    }

    pub(crate) fn encode_head(&self) -> Vec<u8> {
        let mut head = Vec::with_capacity(128);
        head.extend_from_slice(self.status.into_first_line(Version::Http11));
        self.headers.write_to(&mut head);
        head.extend_from_slice(b"\r\n");
        head
    }

    #[inline]
    pub(crate) fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }

    #[inline]
    pub(crate) fn take_upgrade(&mut self) -> Option<Box<dyn UpgradeHandler>> {
        self.upgrade.take()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("upgrade", &self.upgrade.is_some())
            .finish()
    }
}

fn to_text<T: WriteBuffer>(value: T) -> String {
    let mut buffer = Vec::new();
    value.write_to(&mut buffer);

    match String::from_utf8(buffer) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}

/// The connection handed over after a protocol switch.
///
/// On the server the handler runs on its own blocking thread, and the
/// connection blocks on `read`/`write` in both executors.
#[derive(Debug)]
pub struct Upgraded {
    pub connection: ConnectionHandle,
    /// Bytes of the new protocol that arrived together with the request.
    pub read_buf: Vec<u8>,
}

/// Takes ownership of a connection once the `101` response has been flushed.
pub trait UpgradeHandler: Send + Sync + 'static {
    fn handle(&self, upgraded: Upgraded);
}

impl<F> UpgradeHandler for F
where
    F: Fn(Upgraded) + Send + Sync + 'static,
{
    #[inline]
    fn handle(&self, upgraded: Upgraded) {
        self(upgraded)
    }
}

/// A response received by the client executor.
///
/// The body is read through the same connection; once it is fully read, a
/// persistent connection can be taken back with
/// [`into_connection`](Self::into_connection) and reused.
#[derive(Debug)]
pub struct ClientResponse {
    line: StatusLine,
    headers: HeaderMap,
    body: Incoming,
    state: ConnectionState,
}

impl ClientResponse {
    #[inline]
    pub(crate) fn new(line: StatusLine, headers: HeaderMap, body: Incoming, state: ConnectionState) -> Self {
        Self {
            line,
            headers,
            body,
            state,
        }
    }

    #[inline]
    pub fn status(&self) -> u16 {
        self.line.code
    }

    #[inline]
    pub fn reason(&self) -> &str {
        &self.line.reason
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.line.version
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[inline]
    pub fn body(&mut self) -> &mut Incoming {
        &mut self.body
    }

    /// What happens to the connection after this response.
    #[inline]
    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    /// Gives the connection back for the next exchange.
    ///
    /// `None` unless the connection is persistent and positioned right after this
    /// body, i.e. the body was read to its end and nothing else arrived.
    pub fn into_connection(mut self) -> Option<ConnectionHandle> {
        self.body.settle();

        let reusable = self.state == ConnectionState::KeepAlive
            && self.body.is_settled()
            && self.body.duplex().scratch().window().is_empty();

        match reusable {
            true => Some(self.body.into_duplex().into_parts().0),
            false => None,
        }
    }

    /// Takes over the connection after `101 Switching Protocols`.
    pub fn into_upgraded(self) -> Option<Upgraded> {
        if self.state != ConnectionState::Upgrade {
            return None;
        }

        let (connection, scratch) = self.body.into_duplex().into_parts();

        Some(Upgraded {
            connection,
            read_buf: scratch.window().to_vec(),
        })
    }
}

pub mod write {
    use super::*;

    /// Writer for constructing the HTTP response body.
    /// Used in [body_with](Response::body_with).
    ///
    /// # Examples
    ///
    /// With [WriteBuffer]:
    /// ```
    /// use maker_h1::{Response, StatusCode};
    ///
    /// let resp = Response::new(StatusCode::Ok).body_with(|w| {
    ///     w.write("This goes in the response body; ");
    ///     w.write(true);
    /// });
    /// assert_eq!(resp.body_bytes(), b"This goes in the response body; true");
    /// ```
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends content to the response body.
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Trait for writing data to a [`Response`] header value or body.
    ///
    /// Implemented for common types like strings, bytes, booleans
    /// and numeric types (excluding floating-point numbers)
    ///
    /// # Note on Floating-Point
    /// Floating-point numbers are not implemented to avoid locale-dependent
    /// formatting and precision issues in protocol headers.
    ///
    /// # Example
    /// ```
    /// use maker_h1::WriteBuffer;
    ///
    /// struct MyString(String);
    ///
    /// impl WriteBuffer for MyString {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         buffer.extend_from_slice(self.0.as_bytes())
    ///     }
    /// }
    /// ```
    pub trait WriteBuffer {
        /// Writes the value's representation directly to the buffer.
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let closure = $conn;
                    closure(self, buffer);
                }
            })*
        };
        (number($type:ty), $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(*self as $type, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer + ?Sized> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => str, String, Box<str>, Cow<'_, str>, Arc<str>, Rc<str>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => [u8], Vec<u8>, Box<[u8]>, Cow<'_, [u8]>, Arc<[u8]>, Rc<[u8]>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        number(u128), impl_write_buffer_u128 => u8, u16, u32, u64, u128, usize
    }
    impl_write_buffer! {
        number(i128), impl_write_buffer_i128 => i8, i16, i32, i64, i128, isize
    }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }

    #[inline]
    const fn number_to_bytes(mut n: u128) -> ([u8; 39], usize) {
        let mut buffer = [b'0'; 39];
        let mut i = 39;

        if n == 0 {
            return (buffer, 38);
        }

        while n > 0 {
            i -= 1;
            buffer[i] = b'0' + (n % 10) as u8;
            n /= 10;
        }

        (buffer, i)
    }

    #[inline(always)]
    fn impl_write_buffer_u128(value: u128, buffer: &mut Vec<u8>) {
        let (arr, start) = number_to_bytes(value);
        buffer.extend_from_slice(&arr[start..]);
    }

    #[inline(always)]
    fn impl_write_buffer_i128(value: i128, buffer: &mut Vec<u8>) {
        if value < 0 {
            buffer.push(b'-');
        }

        let (arr, start) = number_to_bytes(value.unsigned_abs());
        buffer.extend_from_slice(&arr[start..]);
    }
}
