//! Circular buffer for scrollback replay on attach.
//!
//! Keeps the last N bytes of driver output so a late-attaching surface can be
//! hydrated without asking the driver for anything.

/// A fixed-capacity circular byte buffer.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Vec<u8>,
    capacity: usize,
    /// Next write position (wraps around).
    write_pos: usize,
    /// Total bytes ever written; doubles as the stream offset of the next byte.
    total_written: u64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            capacity,
            write_pos: 0,
            total_written: 0,
        }
    }

    /// Append `data`, overwriting the oldest bytes once full.
    pub fn write(&mut self, data: &[u8]) {
        self.total_written += data.len() as u64;
        if self.capacity == 0 {
            return;
        }

        // Only the tail that fits can survive.
        let data = if data.len() > self.capacity {
            &data[data.len() - self.capacity..]
        } else {
            data
        };

        let first = data.len().min(self.capacity - self.write_pos);
        self.buf[self.write_pos..self.write_pos + first].copy_from_slice(&data[..first]);
        let rest = data.len() - first;
        if rest > 0 {
            self.buf[..rest].copy_from_slice(&data[first..]);
        }
        self.write_pos = (self.write_pos + data.len()) % self.capacity;
    }

    /// All buffered bytes, oldest first.
    pub fn read_all(&self) -> Vec<u8> {
        let len = self.len();
        let mut result = Vec::with_capacity(len);

        if self.total_written <= self.capacity as u64 {
            result.extend_from_slice(&self.buf[..len]);
        } else {
            // Wrapped: oldest data starts at write_pos.
            result.extend_from_slice(&self.buf[self.write_pos..]);
            result.extend_from_slice(&self.buf[..self.write_pos]);
        }

        result
    }

    /// Number of valid bytes currently stored.
    pub fn len(&self) -> usize {
        if self.total_written >= self.capacity as u64 {
            self.capacity
        } else {
            self.total_written as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total bytes ever written through this buffer.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }
}
