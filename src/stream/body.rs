use crate::{
    errors::ParseError,
    http::{headers::HeaderMap, types::Method},
    stream::proxy::Duplex,
    Interest,
};
use std::io::{self, Read};

/// How the end of a message body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    Empty,
    Known(u64),
    /// Delivered raw; the chunk framing is left to the caller.
    Chunked,
    /// Ends when the peer closes the connection.
    CloseDelimited,
}

impl BodyLength {
    pub(crate) fn of_request(headers: &HeaderMap) -> Result<Self, ParseError> {
        if headers.is_chunked() {
            return Ok(Self::Chunked);
        }

        Ok(match headers.content_length()? {
            None | Some(0) => Self::Empty,
            Some(len) => Self::Known(len),
        })
    }

    pub(crate) fn of_response(
        request_method: Method,
        status: u16,
        headers: &HeaderMap,
    ) -> Result<Self, ParseError> {
        if request_method == Method::Head || (100..200).contains(&status) || status == 204 || status == 304 {
            return Ok(Self::Empty);
        }

        if headers.is_chunked() {
            return Ok(Self::Chunked);
        }

        Ok(match headers.content_length()? {
            None => Self::CloseDelimited,
            Some(0) => Self::Empty,
            Some(len) => Self::Known(len),
        })
    }
}

/// The body of a received message.
///
/// Reads come from the scratch-buffer window first (bytes that arrived together
/// with the headers) and then from the connection, never past the declared length.
#[derive(Debug)]
pub struct Incoming {
    duplex: Duplex,
    length: BodyLength,
    remaining: u64,
}

impl Incoming {
    pub(crate) fn new(duplex: Duplex, length: BodyLength) -> Self {
        let remaining = match length {
            BodyLength::Known(len) => len,
            _ => 0,
        };

        Self {
            duplex,
            length,
            remaining,
        }
    }

    #[inline]
    pub fn length(&self) -> BodyLength {
        self.length
    }

    /// Bytes of a `content-length` body not read yet.
    #[inline]
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Whether the connection is positioned right after this body.
    ///
    /// Bodies without a determinable end never are.
    pub fn is_settled(&self) -> bool {
        match self.length {
            BodyLength::Empty => true,
            BodyLength::Known(_) => self.remaining == 0,
            BodyLength::Chunked | BodyLength::CloseDelimited => false,
        }
    }

    /// Discards unread body bytes that are already buffered, without touching the socket.
    pub(crate) fn settle(&mut self) {
        if let BodyLength::Known(_) = self.length {
            let buffered = self.duplex.scratch.window().len() as u64;
            let n = buffered.min(self.remaining);

            self.duplex.scratch.consume(n as usize);
            self.remaining -= n;
        }
    }

    /// Reads the whole body, failing once it grows beyond `limit` bytes.
    pub fn read_all(&mut self, limit: usize) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = [0; 1024];

        loop {
            match self.read(&mut chunk) {
                Ok(0) => return Ok(out),
                Ok(n) => Self::append(&mut out, &chunk[..n], limit)?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Like `read`, but waits for readiness instead of reporting `WouldBlock`.
    pub async fn read_async(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.duplex.ready(Interest::Readable).await?
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    pub async fn read_all_async(&mut self, limit: usize) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = [0; 1024];

        loop {
            match self.read_async(&mut chunk).await? {
                0 => return Ok(out),
                n => Self::append(&mut out, &chunk[..n], limit)?,
            }
        }
    }

    #[inline]
    pub(crate) fn duplex(&self) -> &Duplex {
        &self.duplex
    }

    #[inline]
    pub(crate) fn into_duplex(self) -> Duplex {
        self.duplex
    }

    fn append(out: &mut Vec<u8>, chunk: &[u8], limit: usize) -> io::Result<()> {
        if out.len() + chunk.len() > limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "body exceeds the size limit",
            ));
        }

        out.extend_from_slice(chunk);
        Ok(())
    }
}

impl Read for Incoming {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = match self.length {
            BodyLength::Empty => return Ok(0),
            BodyLength::Known(_) if self.remaining == 0 => return Ok(0),
            BodyLength::Known(_) => buf.len().min(self.remaining.min(usize::MAX as u64) as usize),
            BodyLength::Chunked | BodyLength::CloseDelimited => buf.len(),
        };

        if limit == 0 {
            return Ok(0);
        }

        let n = self.duplex.input().read(&mut buf[..limit])?;

        if let BodyLength::Known(_) = self.length {
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            self.remaining -= n as u64;
        }

        Ok(n)
    }
}
