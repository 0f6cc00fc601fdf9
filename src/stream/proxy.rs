use crate::{
    stream::{buffer::ScratchBuffer, transport::ConnectionHandle},
    BoxFuture, Interest,
};
use std::io::{self, Read, Write};

/// A connection paired with its scratch buffer.
///
/// The input and output proxies are short-lived views over both halves; they
/// never own the connection.
#[derive(Debug)]
pub struct Duplex {
    pub(crate) conn: ConnectionHandle,
    pub(crate) scratch: ScratchBuffer,
}

impl Duplex {
    #[inline]
    pub fn new(conn: ConnectionHandle, capacity: usize) -> Self {
        Self {
            conn,
            scratch: ScratchBuffer::new(capacity),
        }
    }

    /// Reader that yields the window first, then the live connection.
    #[inline]
    pub fn input(&mut self) -> InputProxy<'_> {
        InputProxy {
            scratch: &mut self.scratch,
            conn: &mut self.conn,
        }
    }

    /// Writer that stages into the scratch buffer and spills to the connection.
    #[inline]
    pub fn output(&mut self) -> OutputProxy<'_> {
        OutputProxy {
            scratch: &mut self.scratch,
            conn: &mut self.conn,
        }
    }

    #[inline]
    pub fn connection(&self) -> &ConnectionHandle {
        &self.conn
    }

    #[inline]
    pub fn scratch(&self) -> &ScratchBuffer {
        &self.scratch
    }

    #[inline]
    pub(crate) fn ready(&mut self, interest: Interest) -> BoxFuture<'_, io::Result<()>> {
        self.conn.transport().ready(interest)
    }

    #[inline]
    pub fn into_parts(self) -> (ConnectionHandle, ScratchBuffer) {
        (self.conn, self.scratch)
    }
}

pub struct InputProxy<'a> {
    scratch: &'a mut ScratchBuffer,
    conn: &'a mut ConnectionHandle,
}

impl Read for InputProxy<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let window = self.scratch.window();

        if window.is_empty() {
            return self.conn.read(buf);
        }

        let n = window.len().min(buf.len());
        buf[..n].copy_from_slice(&window[..n]);
        self.scratch.consume(n);

        Ok(n)
    }
}

pub struct OutputProxy<'a> {
    scratch: &'a mut ScratchBuffer,
    conn: &'a mut ConnectionHandle,
}

impl OutputProxy<'_> {
    /// Pushes the staged window to the connection.
    ///
    /// Stops at the first `WouldBlock`, leaving the unsent rest in the window, so
    /// calling it again continues where it left off.
    pub fn flush_pending(&mut self) -> io::Result<()> {
        while !self.scratch.window().is_empty() {
            match self.conn.write(self.scratch.window()) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.scratch.consume(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        self.scratch.reset();
        Ok(())
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.scratch.window().len()
    }
}

impl Write for OutputProxy<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.scratch.is_full() {
            self.flush_pending()?;
        }

        let spare = self.scratch.spare_mut();
        let n = spare.len().min(buf.len());
        spare[..n].copy_from_slice(&buf[..n]);
        self.scratch.commit(n);

        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_pending()?;
        self.conn.flush()
    }
}

/// Bytes of one outgoing message and how many of them are already staged.
#[derive(Debug, Default)]
pub(crate) struct Outbound {
    head: Vec<u8>,
    body: Vec<u8>,
    offset: usize,
}

impl Outbound {
    #[inline]
    pub(crate) fn new(head: Vec<u8>, body: Vec<u8>) -> Self {
        Self {
            head,
            body,
            offset: 0,
        }
    }

    /// Stages the remaining bytes through `out`.
    ///
    /// A `WouldBlock` from a spill keeps the cursor, so the call is resumable.
    pub(crate) fn stage(&mut self, out: &mut OutputProxy<'_>) -> io::Result<()> {
        let total = self.head.len() + self.body.len();

        while self.offset < total {
            let chunk = match self.offset < self.head.len() {
                true => &self.head[self.offset..],
                false => &self.body[self.offset - self.head.len()..],
            };

            match out.write(chunk) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.offset += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Stages everything and flushes, blocking transports only.
    pub(crate) fn send(&mut self, out: &mut OutputProxy<'_>) -> io::Result<()> {
        self.stage(out)?;
        out.flush()
    }
}
