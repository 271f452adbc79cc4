//! The encoder's output buffer (spec §4.C): a contiguous byte sink grown by
//! `(length + need) * 3 / 2` whenever a write would overflow capacity. The
//! buffer is never shrunk mid-encode.

use crate::error::EncodingError;

#[derive(Debug, Default)]
pub struct WriteBuffer {
    data: Vec<u8>,
    reset_baseline: usize,
    reset_cap: usize,
}

impl WriteBuffer {
    pub fn new(initial_capacity: usize, reset_baseline: usize, reset_cap: usize) -> Self {
        Self {
            data: Vec::with_capacity(initial_capacity),
            reset_baseline,
            reset_cap,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn reserve(&mut self, need: usize) -> Result<(), EncodingError> {
        let len = self.data.len();
        if len + need > self.data.capacity() {
            let new_capacity = len
                .checked_add(need)
                .and_then(|n| n.checked_mul(3))
                .map(|n| n / 2)
                .ok_or(EncodingError::Overflow("output buffer capacity overflow"))?;
            tracing::debug!(from = self.data.capacity(), to = new_capacity, "growing output buffer");
            self.data.reserve(new_capacity.saturating_sub(len));
        }
        Ok(())
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), EncodingError> {
        self.reserve(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_u8(&mut self, byte: u8) -> Result<(), EncodingError> {
        self.write(&[byte])
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Discard the last `n` bytes — used by the encoder's cycle-rollback
    /// path (MARK .. POP_MARK, or a run of POPs for short tuples).
    pub fn truncate(&mut self, new_len: usize) {
        self.data.truncate(new_len);
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Reset for the next encode call. Keeps a grown allocation around (up
    /// to `reset_cap`) rather than reallocating from scratch every call
    /// (spec §5's "keeps the grown buffer... unless it exceeds a cap").
    pub fn reset(&mut self) {
        self.data.clear();
        if self.data.capacity() > self.reset_cap {
            self.data.shrink_to(self.reset_baseline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_accumulates_bytes_in_order() {
        let mut buf = WriteBuffer::new(8, 8, 1 << 20);
        buf.write(b"hello").unwrap();
        buf.write(b" world").unwrap();
        assert_eq!(buf.as_slice(), b"hello world");
    }

    #[test]
    fn reset_clears_but_keeps_allocation_under_cap() {
        let mut buf = WriteBuffer::new(8, 8, 1 << 20);
        buf.write(&[0u8; 100]).unwrap();
        let cap_before = buf.data.capacity();
        buf.reset();
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.data.capacity(), cap_before);
    }
}
