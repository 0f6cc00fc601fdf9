use crate::{
    http::{
        headers::HeaderMap,
        reader::RequestLine,
        types::{Method, Version},
    },
    stream::body::Incoming,
    WriteBuffer,
};
use std::collections::HashMap;

/// Values captured from `:name` segments of a route pattern.
pub type PathParams = HashMap<String, String>;

/// A request received by the server, handed to interceptors and endpoints.
///
/// # Input data requirements
///
/// #### Character encoding
///
/// The starting line and headers must be `UTF-8`; otherwise the request is rejected
/// with `400 Bad Request`. The body is opaque bytes.
///
/// #### General designations
/// - `SP`: ASCII space (0x20)
/// - `CRLF`: Carriage return + line feed (`"\r\n"`) - **exactly this sequence required**
///
/// ## First line
/// | Template                                       | Example                       |
/// |------------------------------------------------|-------------------------------|
/// | `[METHOD] SP [TARGET] SP "HTTP/" [VERSION] CRLF` | `GET /api/users HTTP/1.1\r\n` |
///
/// Where:
/// - `[METHOD]`: See the values in [Method](crate::Method)
/// - `[VERSION]`: `1.0` or `1.1`
///
/// ## Header
///
/// ```text
/// [NAME]: [VALUE] CRLF
/// ```
/// Surrounding spaces of `[VALUE]` are trimmed, an empty value is allowed.
/// Names compare case-insensitively and repeated fields are kept in order, except
/// for singular ones such as `Host` or `Content-Length`, where the last one wins.
///
/// ## Body
///
/// Read through [`body`](Request::body). A `Content-Length` body is bounded by its
/// length; a `Transfer-Encoding: chunked` body is delivered raw and closes the
/// connection after the exchange.
#[derive(Debug)]
pub struct Request {
    line: RequestLine,
    headers: HeaderMap,
    params: PathParams,
    body: Incoming,
}

impl Request {
    #[inline]
    pub(crate) fn new(line: RequestLine, headers: HeaderMap, params: PathParams, body: Incoming) -> Self {
        Self {
            line,
            headers,
            params,
            body,
        }
    }

    #[inline]
    pub fn method(&self) -> Method {
        self.line.method
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.line.version
    }

    /// The raw request target, query included.
    #[inline]
    pub fn target(&self) -> &str {
        &self.line.target
    }

    /// The target without its query string.
    ///
    /// For `/api/users/123?sort=name` this is `/api/users/123`.
    #[inline]
    pub fn path(&self) -> &str {
        split_target(&self.line.target).0
    }

    /// The query string without the leading `?`.
    #[inline]
    pub fn query(&self) -> Option<&str> {
        split_target(&self.line.target).1
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Value captured by the route pattern, e.g. `id` for `/users/:id`.
    #[inline]
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    #[inline]
    pub fn params(&self) -> &PathParams {
        &self.params
    }

    #[inline]
    pub fn body(&mut self) -> &mut Incoming {
        &mut self.body
    }

    #[inline]
    pub(crate) fn into_parts(self) -> (RequestLine, HeaderMap, Incoming) {
        (self.line, self.headers, self.body)
    }
}

#[inline]
pub(crate) fn split_target(target: &str) -> (&str, Option<&str>) {
    match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    }
}

/// A request sent by the client executor.
///
/// `Host` (from the connection provider) and `Connection: keep-alive` are added on
/// execution unless set here.
///
/// # Examples
/// ```
/// use maker_h1::{ClientRequest, Method};
///
/// let req = ClientRequest::new(Method::Post, "/orders")
///     .header("content-type", "application/json")
///     .body(r#"{"id":1}"#);
///
/// assert_eq!(req.headers().get("Content-Type"), Some("application/json"));
/// ```
#[derive(Debug, Clone)]
pub struct ClientRequest {
    method: Method,
    target: String,
    version: Version,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ClientRequest {
    pub fn new<T: Into<String>>(method: Method, target: T) -> Self {
        Self {
            method,
            target: target.into(),
            version: Version::Http11,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    #[inline]
    pub fn get<T: Into<String>>(target: T) -> Self {
        Self::new(Method::Get, target)
    }

    #[inline]
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn header<N: Into<String>, V: WriteBuffer>(mut self, name: N, value: V) -> Self {
        let mut buffer = Vec::new();
        value.write_to(&mut buffer);
        self.headers
            .append(name, String::from_utf8_lossy(&buffer).into_owned());
        self
    }

    pub fn body<T: WriteBuffer>(mut self, data: T) -> Self {
        self.body.clear();
        data.write_to(&mut self.body);
        self
    }

    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    #[inline]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[inline]
    pub fn http_version(&self) -> Version {
        self.version
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Adds `content-length` for a non-empty body that declares no length.
    pub(crate) fn finalize(&mut self) {
        if !self.body.is_empty()
            && !self.headers.contains("content-length")
            && !self.headers.contains("transfer-encoding")
        {
            self.headers
                .insert("content-length", self.body.len().to_string());
        }
    }

    pub(crate) fn encode_head(&self) -> Vec<u8> {
        let mut head = Vec::with_capacity(128);

        for part in [self.method.as_str(), " ", &self.target, " ", self.version.as_str(), "\r\n"] {
            head.extend_from_slice(part.as_bytes());
        }
        self.headers.write_to(&mut head);
        head.extend_from_slice(b"\r\n");

        head
    }

    /// Moves the body out for sending; the request keeps its head.
    #[inline]
    pub(crate) fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }
}
