/// The per-connection scratch buffer.
///
/// One fixed allocation serves three purposes in turn: header accumulation, the
/// window of body bytes that arrived together with the headers, and staging of
/// outgoing bytes. The live region is the window `[start, end)`.
///
/// ```text
///  0            start            end            capacity
///  |  consumed  |     window      |     spare     |
/// ```
pub struct ScratchBuffer {
    data: Box<[u8]>,
    start: usize,
    end: usize,
}

impl ScratchBuffer {
    #[inline]
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes inside the window.
    #[inline]
    pub fn window(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    #[inline]
    pub fn bounds(&self) -> (usize, usize) {
        (self.start, self.end)
    }

    /// Everything written since the last reset, consumed bytes included.
    #[inline]
    pub(crate) fn filled(&self) -> &[u8] {
        &self.data[..self.end]
    }

    #[inline]
    pub(crate) fn set_window(&mut self, start: usize, end: usize) {
        debug_assert!(start <= end && end <= self.data.len());
        self.start = start;
        self.end = end;
    }

    /// Empties the buffer, window becomes `[0, 0)`.
    #[inline]
    pub fn reset(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Drops up to `n` bytes from the front of the window.
    #[inline]
    pub(crate) fn consume(&mut self, n: usize) {
        self.start = (self.start + n).min(self.end);
    }

    #[inline]
    pub(crate) fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.end..]
    }

    #[inline]
    pub(crate) fn commit(&mut self, n: usize) {
        debug_assert!(self.end + n <= self.data.len());
        self.end += n;
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.end == self.data.len()
    }
}

impl std::fmt::Debug for ScratchBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchBuffer")
            .field("capacity", &self.data.len())
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_moves() {
        let mut buf = ScratchBuffer::new(8);
        assert!(buf.window().is_empty());

        buf.spare_mut()[..5].copy_from_slice(b"hello");
        buf.commit(5);
        assert_eq!(buf.window(), b"hello");

        buf.consume(2);
        assert_eq!(buf.window(), b"llo");
        assert_eq!(buf.filled(), b"hello");
        assert_eq!(buf.bounds(), (2, 5));

        buf.consume(100);
        assert!(buf.window().is_empty());
        assert_eq!(buf.bounds(), (5, 5));

        buf.reset();
        assert_eq!(buf.bounds(), (0, 0));
        assert_eq!(buf.spare_mut().len(), 8);
    }

    #[test]
    fn full_buffer() {
        let mut buf = ScratchBuffer::new(3);
        buf.commit(3);
        assert!(buf.is_full());

        buf.set_window(1, 3);
        assert_eq!(buf.window().len(), 2);
        assert!(buf.is_full());
    }
}
