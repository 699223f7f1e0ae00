//! Running checksums over stream bytes

/// Incremental checksum over a byte stream
pub trait Checksum: Send {
    fn update(&mut self, bytes: &[u8]);

    /// Current value; does not reset the state
    fn value(&self) -> u64;

    fn reset(&mut self);
}

/// CRC-32 (IEEE), the algorithm recorded in every footer
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Checksum for Crc32 {
    fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    fn value(&self) -> u64 {
        self.hasher.clone().finalize() as u64
    }

    fn reset(&mut self) {
        self.hasher.reset();
    }
}

pub const DEFAULT_CHECKSUM_BUFFER_SIZE: usize = 256;

/// Batches small updates before handing them to the wrapped checksum
pub struct BufferedChecksum<C: Checksum> {
    inner: C,
    buffer: Vec<u8>,
    capacity: usize,
}

impl<C: Checksum> BufferedChecksum<C> {
    pub fn new(inner: C) -> Self {
        Self::with_capacity(inner, DEFAULT_CHECKSUM_BUFFER_SIZE)
    }

    pub fn with_capacity(inner: C, capacity: usize) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            self.inner.update(&self.buffer);
            self.buffer.clear();
        }
    }

    pub fn update_byte(&mut self, b: u8) {
        if self.buffer.len() == self.capacity {
            self.flush();
        }
        self.buffer.push(b);
    }

    pub fn update(&mut self, bytes: &[u8]) {
        if bytes.len() >= self.capacity {
            self.flush();
            self.inner.update(bytes);
        } else {
            if self.buffer.len() + bytes.len() > self.capacity {
                self.flush();
            }
            self.buffer.extend_from_slice(bytes);
        }
    }

    pub fn value(&mut self) -> u64 {
        self.flush();
        self.inner.value()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.inner.reset();
    }
}
