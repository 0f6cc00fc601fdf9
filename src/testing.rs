//! Scripted transports for unit tests.

use crate::{BoxFuture, ConnectionHandle, ConnectionProvider, Transport};
use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::{Arc, Mutex},
    time::Duration,
};

enum Step {
    Data(Vec<u8>),
    Block,
}

/// Replays scripted input chunks and captures everything written.
///
/// Reading past the script returns `Ok(0)`, i.e. the peer closed.
#[derive(Clone, Default)]
pub(crate) struct MockStream {
    input: Arc<Mutex<VecDeque<Step>>>,
    written: Arc<Mutex<Vec<u8>>>,
    write_limit: Option<usize>,
    blocked_writes: Arc<Mutex<usize>>,
    broken: bool,
}

impl MockStream {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn chunk<B: AsRef<[u8]>>(self, bytes: B) -> Self {
        self.push(Step::Data(bytes.as_ref().to_vec()));
        self
    }

    /// Every byte as its own chunk.
    pub(crate) fn trickle<B: AsRef<[u8]>>(self, bytes: B) -> Self {
        for byte in bytes.as_ref() {
            self.push(Step::Data(vec![*byte]));
        }
        self
    }

    /// One `WouldBlock` before the next chunk.
    pub(crate) fn block(self) -> Self {
        self.push(Step::Block);
        self
    }

    pub(crate) fn write_limit(mut self, limit: usize) -> Self {
        self.write_limit = Some(limit);
        self
    }

    pub(crate) fn block_writes(self, count: usize) -> Self {
        *self.blocked_writes.lock().unwrap() = count;
        self
    }

    pub(crate) fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    pub(crate) fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        self.written.clone()
    }

    pub(crate) fn into_handle(self) -> ConnectionHandle {
        ConnectionHandle::new(self)
    }

    fn push(&self, step: Step) {
        self.input.lock().unwrap().push_back(step);
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut input = self.input.lock().unwrap();

        match input.pop_front() {
            None => Ok(0),
            Some(Step::Block) => Err(io::ErrorKind::WouldBlock.into()),
            Some(Step::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);

                if n < data.len() {
                    input.push_front(Step::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.broken {
            return Err(io::ErrorKind::BrokenPipe.into());
        }

        let mut blocked = self.blocked_writes.lock().unwrap();
        if *blocked > 0 {
            *blocked -= 1;
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let n = self.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        self.written.lock().unwrap().extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockStream {}

/// Hands out prepared mock connections in order.
#[derive(Default)]
pub(crate) struct MockProvider {
    streams: Mutex<VecDeque<MockStream>>,
    host: Option<String>,
}

impl MockProvider {
    pub(crate) fn new(host: Option<&str>) -> Self {
        Self {
            streams: Mutex::default(),
            host: host.map(str::to_string),
        }
    }

    pub(crate) fn with(self, stream: MockStream) -> Self {
        self.streams.lock().unwrap().push_back(stream);
        self
    }

    fn next(&self) -> io::Result<ConnectionHandle> {
        self.streams
            .lock()
            .unwrap()
            .pop_front()
            .map(ConnectionHandle::new)
            .ok_or_else(|| io::ErrorKind::ConnectionRefused.into())
    }
}

impl ConnectionProvider for MockProvider {
    fn acquire(&self, _: Duration) -> io::Result<ConnectionHandle> {
        self.next()
    }

    fn acquire_async(&self, _: Duration) -> BoxFuture<'static, io::Result<ConnectionHandle>> {
        let conn = self.next();
        Box::pin(async move { conn })
    }

    fn property(&self, name: &str) -> Option<String> {
        match name {
            "host" => self.host.clone(),
            _ => None,
        }
    }
}

pub(crate) fn text(written: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8_lossy(&written.lock().unwrap()).into_owned()
}
