use crate::{
    errors::{ParseError, ReadError},
    http::{
        headers::HeaderMap,
        types::{Method, Version},
    },
    stream::buffer::ScratchBuffer,
};
use memchr::memmem;
use std::io::{self, Read};

/// The first line of a message.
pub trait StartingLine: Sized {
    fn parse(line: &str) -> Result<Self, ParseError>;
}

/// `METHOD SP target SP version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub target: String,
    pub version: Version,
}

impl StartingLine for RequestLine {
    fn parse(line: &str) -> Result<Self, ParseError> {
        let mut tokens = line.split(' ');

        let (Some(method), Some(target), Some(version), None) =
            (tokens.next(), tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(ParseError::InvalidStartingLine);
        };

        if target.is_empty() {
            return Err(ParseError::InvalidStartingLine);
        }

        Ok(Self {
            method: Method::from_token(method)?,
            target: target.to_string(),
            version: Version::from_token(version)?,
        })
    }
}

/// `version SP code SP reason`; the reason may be empty or contain spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: Version,
    pub code: u16,
    pub reason: String,
}

impl StartingLine for StatusLine {
    fn parse(line: &str) -> Result<Self, ParseError> {
        let mut tokens = line.splitn(3, ' ');

        let (Some(version), Some(code), Some(reason)) = (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(ParseError::InvalidStartingLine);
        };

        let version = Version::from_token(version)?;

        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::InvalidStatus);
        }

        Ok(Self {
            version,
            code: code.parse().map_err(|_| ParseError::InvalidStatus)?,
            reason: reason.to_string(),
        })
    }
}

/// A parsed header block together with the window left in the scratch buffer.
///
/// `[consumed_start, consumed_end)` holds the bytes read past the terminator, i.e.
/// the beginning of the body or of a pipelined message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult<L> {
    pub line: L,
    pub headers: HeaderMap,
    pub consumed_start: usize,
    pub consumed_end: usize,
}

#[derive(Debug)]
pub enum ReadStatus<L> {
    Complete(ParseResult<L>),
    /// The source reported `WouldBlock`; call again once it is readable.
    Pending,
}

/// Accumulates a header block in the scratch buffer.
///
/// Resumable: a `Pending` result keeps the scan position, so bytes already
/// searched are not searched again.
#[derive(Debug, Clone)]
pub struct HeadReader {
    max_header_size: usize,
    scanned: usize,
}

impl HeadReader {
    #[inline]
    pub fn new(max_header_size: usize) -> Self {
        Self {
            max_header_size,
            scanned: 0,
        }
    }

    /// Forgets a partially scanned block. The buffer must be reset alongside.
    #[inline]
    pub fn reset(&mut self) {
        self.scanned = 0;
    }

    /// Reads from `source` into `scratch` until the blank line is found.
    ///
    /// `scratch` must start out empty. Whatever arrives after the terminator stays
    /// in the buffer and becomes its window.
    pub fn read<L: StartingLine, R: Read + ?Sized>(
        &mut self,
        scratch: &mut ScratchBuffer,
        source: &mut R,
    ) -> Result<ReadStatus<L>, ReadError> {
        let bound = self.max_header_size.min(scratch.capacity());

        loop {
            if let Some(end) = self.scan(scratch) {
                self.scanned = 0;
                return Self::finish(scratch, end).map(ReadStatus::Complete);
            }

            if scratch.filled().len() >= bound {
                return Err(ParseError::HeadersTooLarge.into());
            }

            match source.read(scratch.spare_mut()) {
                Ok(0) => return Err(ReadError::PeerClosed),
                Ok(n) => scratch.commit(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadStatus::Pending),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn scan(&mut self, scratch: &ScratchBuffer) -> Option<usize> {
        let filled = scratch.filled();
        let limit = filled.len().min(self.max_header_size);

        // The terminator may straddle two reads.
        let from = self.scanned.saturating_sub(3).min(limit);
        let found = memmem::find(&filled[from..limit], b"\r\n\r\n").map(|i| from + i + 4);

        self.scanned = limit;
        found
    }

    fn finish<L: StartingLine>(
        scratch: &mut ScratchBuffer,
        end: usize,
    ) -> Result<ParseResult<L>, ReadError> {
        let filled_len = scratch.filled().len();
        let block = simdutf8::basic::from_utf8(&scratch.filled()[..end - 4])
            .map_err(|_| ParseError::InvalidEncoding)?;

        let mut lines = block.split("\r\n");
        let line = L::parse(lines.next().unwrap_or_default())?;

        let mut headers = HeaderMap::new();
        for raw in lines {
            let (name, value) = parse_header(raw)?;
            headers.append(name, value);
        }

        scratch.set_window(end, filled_len);

        Ok(ParseResult {
            line,
            headers,
            consumed_start: end,
            consumed_end: filled_len,
        })
    }
}

fn parse_header(raw: &str) -> Result<(&str, &str), ParseError> {
    if memchr::memchr2(b'\r', b'\n', raw.as_bytes()).is_some() {
        return Err(ParseError::InvalidHeader);
    }

    let colon = memchr::memchr(b':', raw.as_bytes()).ok_or(ParseError::InvalidHeader)?;
    let name = &raw[..colon];

    if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(ParseError::InvalidHeader);
    }

    Ok((name, raw[colon + 1..].trim_matches([' ', '\t'])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockStream;

    fn read_all<L: StartingLine>(
        mock: &mut MockStream,
        scratch: &mut ScratchBuffer,
        max: usize,
    ) -> Result<ParseResult<L>, ReadError> {
        let mut reader = HeadReader::new(max);

        loop {
            match reader.read(scratch, mock)? {
                ReadStatus::Complete(result) => return Ok(result),
                ReadStatus::Pending => continue,
            }
        }
    }

    #[test]
    fn request_head_and_window() {
        let raw = "GET /hello?x=1 HTTP/1.1\r\nHost: x\r\nX-Empty:\r\nX-Pad:  v  \r\n\r\nBODY";
        let mut mock = MockStream::new().chunk(raw);
        let mut scratch = ScratchBuffer::new(256);

        let result = read_all::<RequestLine>(&mut mock, &mut scratch, 4096).unwrap();

        assert_eq!(result.line.method, Method::Get);
        assert_eq!(result.line.target, "/hello?x=1");
        assert_eq!(result.line.version, Version::Http11);
        assert_eq!(result.headers.get("host"), Some("x"));
        assert_eq!(result.headers.get("x-empty"), Some(""));
        assert_eq!(result.headers.get("x-pad"), Some("v"));
        assert_eq!(scratch.window(), b"BODY");
        assert_eq!(scratch.bounds(), (result.consumed_start, result.consumed_end));
    }

    #[test]
    fn split_reads_reassemble() {
        let raw = b"POST /a HTTP/1.0\r\nContent-Length: 3\r\n\r\nabcGET";

        // Every split point, including inside the terminator.
        for split in 1..raw.len() {
            let mut mock = MockStream::new().chunk(&raw[..split]).block().chunk(&raw[split..]);
            let mut scratch = ScratchBuffer::new(128);

            let result = read_all::<RequestLine>(&mut mock, &mut scratch, 4096).unwrap();
            let head_len = result.consumed_start;

            let mut rebuilt = scratch.filled()[..head_len].to_vec();
            rebuilt.extend_from_slice(scratch.window());
            let mut chunk = [0; 128];
            loop {
                match mock.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => rebuilt.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => panic!("{e}"),
                }
            }

            assert_eq!(rebuilt, raw, "split at {split}");
            assert_eq!(result.headers.content_length(), Ok(Some(3)));
        }
    }

    #[test]
    fn byte_by_byte() {
        let raw = "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
        let mut mock = MockStream::new().trickle(raw);
        let mut scratch = ScratchBuffer::new(64);

        let result = read_all::<StatusLine>(&mut mock, &mut scratch, 4096).unwrap();
        assert_eq!(result.line.code, 200);
        assert_eq!(result.line.reason, "OK");
        assert_eq!(result.consumed_start, raw.len());
        assert!(scratch.window().is_empty());
    }

    #[test]
    fn pending_is_resumable() {
        let mut mock = MockStream::new().chunk("GET / HTTP/1.1\r\n").block().chunk("\r\n");
        let mut scratch = ScratchBuffer::new(64);
        let mut reader = HeadReader::new(4096);

        assert!(matches!(
            reader.read::<RequestLine, _>(&mut scratch, &mut mock),
            Ok(ReadStatus::Pending)
        ));
        assert!(matches!(
            reader.read::<RequestLine, _>(&mut scratch, &mut mock),
            Ok(ReadStatus::Complete(_))
        ));
    }

    #[test]
    fn size_bound() {
        let mut block = String::from("GET / HTTP/1.1\r\n");
        while block.len() < 100 {
            block.push_str("X-Filler: aaaaaaaa\r\n");
        }
        block.push_str("\r\n");

        let mut scratch = ScratchBuffer::new(1024);
        let err = read_all::<RequestLine>(&mut MockStream::new().chunk(&block), &mut scratch, 64);
        assert!(matches!(err, Err(ReadError::Parse(ParseError::HeadersTooLarge))));

        // A block of exactly the bound fits.
        let mut scratch = ScratchBuffer::new(1024);
        let ok = read_all::<RequestLine>(&mut MockStream::new().chunk(&block), &mut scratch, block.len());
        assert!(ok.is_ok());
    }

    #[test]
    fn peer_closed_before_terminator() {
        let mut scratch = ScratchBuffer::new(64);
        let err = read_all::<RequestLine>(&mut MockStream::new().chunk("GET / HT"), &mut scratch, 4096);
        assert!(matches!(err, Err(ReadError::PeerClosed)));

        let mut scratch = ScratchBuffer::new(64);
        let err = read_all::<RequestLine>(&mut MockStream::new(), &mut scratch, 4096);
        assert!(matches!(err, Err(ReadError::PeerClosed)));
    }

    #[test]
    fn malformed_requests() {
        #[rustfmt::skip]
        let cases: [(&[u8], ParseError); 9] = [
            (b"GET /\r\n\r\n",                       ParseError::InvalidStartingLine),
            (b"GET  / HTTP/1.1\r\n\r\n",             ParseError::InvalidStartingLine),
            (b"GET / HTTP/1.1 extra\r\n\r\n",        ParseError::InvalidStartingLine),
            (b"\r\n\r\n",                            ParseError::InvalidStartingLine),
            (b"FETCH / HTTP/1.1\r\n\r\n",            ParseError::InvalidMethod),
            (b"GET / HTTP/2.0\r\n\r\n",              ParseError::UnsupportedVersion),
            (b"GET / HTTP/1.1\r\nNoColon\r\n\r\n",   ParseError::InvalidHeader),
            (b"GET / HTTP/1.1\r\n: v\r\n\r\n",       ParseError::InvalidHeader),
            (b"GET / HTTP/1.1\r\nX: \xff\r\n\r\n",   ParseError::InvalidEncoding),
        ];

        for (raw, expected) in cases {
            let mut scratch = ScratchBuffer::new(128);
            let result = read_all::<RequestLine>(&mut MockStream::new().chunk(raw), &mut scratch, 4096);

            match result {
                Err(ReadError::Parse(err)) => assert_eq!(err, expected, "{:?}", String::from_utf8_lossy(raw)),
                other => panic!("{:?}: {other:?}", String::from_utf8_lossy(raw)),
            }
        }
    }

    #[test]
    fn status_lines() {
        #[rustfmt::skip]
        let cases = [
            ("HTTP/1.1 200 OK",               Ok((200, "OK"))),
            ("HTTP/1.1 404 Not Found",        Ok((404, "Not Found"))),
            ("HTTP/1.0 204 ",                 Ok((204, ""))),
            ("HTTP/1.1 200",                  Err(ParseError::InvalidStartingLine)),
            ("HTTP/1.1 20x OK",               Err(ParseError::InvalidStatus)),
            ("HTTP/1.1 2000 OK",              Err(ParseError::InvalidStatus)),
            ("HTTP/3 200 OK",                 Err(ParseError::UnsupportedVersion)),
        ];

        for (line, expected) in cases {
            let parsed = StatusLine::parse(line).map(|l| (l.code, l.reason));
            assert_eq!(parsed, expected.map(|(c, r)| (c, r.to_string())), "{line:?}");
        }
    }
}
