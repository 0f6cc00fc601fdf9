use crate::http::{headers::HeaderMap, types::Version};
use tracing::warn;

/// What happens to a connection once the current exchange has been flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Read the next request (server) or hand the connection back (client).
    KeepAlive,
    Close,
    /// Hand the raw connection to the upgrade handler.
    Upgrade,
}

/// Both sides of one exchange, as far as the connection outcome is concerned.
#[derive(Debug, Clone, Copy)]
pub struct Negotiation<'a> {
    pub request_version: Version,
    pub request_headers: &'a HeaderMap,
    pub response_version: Version,
    pub status: u16,
    pub response_headers: &'a HeaderMap,
    /// Whether someone is ready to take over the connection after a protocol switch.
    pub upgrade_handler: bool,
}

impl Negotiation<'_> {
    /// Decides the connection outcome.
    ///
    /// Rules, first match wins:
    /// 1. `Connection: close` on either side closes.
    /// 2. `101` with an `Upgrade` header upgrades, or closes when nobody takes the
    ///    connection over.
    /// 3. Both sides persistent (HTTP/1.1, or a `keep-alive` token) and the response
    ///    end is determinable keeps the connection alive.
    /// 4. Anything else closes.
    ///
    /// # Examples
    /// ```
    /// use maker_h1::{ConnectionState, HeaderMap, Negotiation, Version};
    ///
    /// let request = HeaderMap::new();
    /// let mut response = HeaderMap::new();
    /// response.append("content-length", "2");
    ///
    /// let state = Negotiation {
    ///     request_version: Version::Http11,
    ///     request_headers: &request,
    ///     response_version: Version::Http11,
    ///     status: 200,
    ///     response_headers: &response,
    ///     upgrade_handler: false,
    /// }
    /// .classify();
    ///
    /// assert_eq!(state, ConnectionState::KeepAlive);
    /// ```
    pub fn classify(&self) -> ConnectionState {
        if self.request_headers.has_token("connection", "close")
            || self.response_headers.has_token("connection", "close")
        {
            return ConnectionState::Close;
        }

        if self.status == 101 && self.response_headers.contains("upgrade") {
            if self.upgrade_handler {
                return ConnectionState::Upgrade;
            }

            warn!(
                upgrade = self.response_headers.get("upgrade"),
                "Switching protocols without an upgrade handler, closing connection"
            );
            return ConnectionState::Close;
        }

        let persistent = |version: Version, headers: &HeaderMap| {
            version >= Version::Http11 || headers.has_token("connection", "keep-alive")
        };

        if persistent(self.request_version, self.request_headers)
            && persistent(self.response_version, self.response_headers)
            && self.body_determinable()
        {
            return ConnectionState::KeepAlive;
        }

        ConnectionState::Close
    }

    fn body_determinable(&self) -> bool {
        (100..200).contains(&self.status)
            || self.status == 204
            || self.status == 304
            || self.response_headers.is_chunked()
            || matches!(self.response_headers.content_length(), Ok(Some(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    fn headers(raw: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in raw {
            map.append(*name, *value);
        }
        map
    }

    #[test]
    fn rule_table() {
        const V10: Version = Version::Http10;
        const V11: Version = Version::Http11;

        #[rustfmt::skip]
        let cases: Vec<(Version, &[(&str, &str)], u16, &[(&str, &str)], bool, ConnectionState)> = vec![
            // Explicit close wins over everything.
            (V11, &[("Connection", "close")],        200, &[("content-length", "0")], false, Close),
            (V11, &[],                               200, &[("Connection", "Close"), ("content-length", "0")], false, Close),
            (V11, &[("Connection", "close")],        101, &[("Upgrade", "ws")],       true,  Close),
            // Upgrade.
            (V11, &[("Upgrade", "ws")],              101, &[("Upgrade", "ws")],       true,  Upgrade),
            (V11, &[("Upgrade", "ws")],              101, &[("Upgrade", "ws")],       false, Close),
            (V11, &[],                               200, &[("Upgrade", "ws"), ("content-length", "0")], true, KeepAlive),
            // Persistent defaults.
            (V11, &[],                               200, &[("content-length", "5")], false, KeepAlive),
            (V11, &[],                               200, &[("transfer-encoding", "chunked")], false, KeepAlive),
            (V11, &[],                               204, &[],                        false, KeepAlive),
            (V11, &[],                               304, &[],                        false, KeepAlive),
            (V11, &[],                               200, &[],                        false, Close),
            (V11, &[],                               200, &[("content-length", "x")], false, Close),
            // HTTP/1.0 needs the token.
            (V10, &[],                               200, &[("content-length", "5")], false, Close),
            (V10, &[("Connection", "Keep-Alive")],   200, &[("content-length", "5")], false, KeepAlive),
            (V10, &[("Connection", "keep-alive")],   200, &[],                        false, Close),
        ];

        for (i, (version, request, status, response, handler, expected)) in cases.into_iter().enumerate() {
            let request = headers(request);
            let response = headers(response);

            let negotiation = Negotiation {
                request_version: version,
                request_headers: &request,
                response_version: Version::Http11,
                status,
                response_headers: &response,
                upgrade_handler: handler,
            };

            assert_eq!(negotiation.classify(), expected, "case #{i}");
            // Same inputs, same state.
            assert_eq!(negotiation.classify(), expected, "case #{i} repeated");
        }
    }

    #[test]
    fn http10_response_needs_token() {
        let request = HeaderMap::new();
        let mut response = headers(&[("content-length", "1")]);

        let negotiation = |response: &HeaderMap| Negotiation {
            request_version: Version::Http11,
            request_headers: &request,
            response_version: Version::Http10,
            status: 200,
            response_headers: response,
            upgrade_handler: false,
        }
        .classify();

        assert_eq!(negotiation(&response), Close);
        response.append("connection", "keep-alive");
        assert_eq!(negotiation(&response), KeepAlive);
    }
}
