//! Stream contracts handed out by directories

use std::sync::Arc;

use parking_lot::Mutex;

use super::data_io::{DataInput, DataOutput};
use crate::error::StoreError;
use crate::Result;

/// Random-access reader over one virtual file
pub trait IndexInput: DataInput + Send {
    fn description(&self) -> &str;

    fn file_pointer(&self) -> u64;

    /// Seeking to `length()` is allowed; beyond it fails with `EndOfFile`
    fn seek(&mut self, pos: u64) -> Result<()>;

    fn length(&self) -> u64;

    /// Independent cursor at the current position, sharing the underlying bytes
    fn clone_input(&self) -> Result<Box<dyn IndexInput>>;

    /// Sub-range reader positioned at 0; fails on clones and slices
    fn slice(&self, description: &str, offset: u64, length: u64) -> Result<Box<dyn IndexInput>>;

    /// Idempotent
    fn close(&mut self) -> Result<()>;
}

impl std::fmt::Debug for dyn IndexInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexInput").field("description", &self.description()).finish()
    }
}

/// Sequential writer for one virtual file
pub trait IndexOutput: DataOutput + Send {
    fn name(&self) -> &str;

    fn file_pointer(&self) -> u64;

    fn length(&self) -> u64;

    /// CRC32 of every byte written so far
    fn checksum(&mut self) -> Result<u64>;

    fn flush(&mut self) -> Result<()>;

    /// Idempotent
    fn close(&mut self) -> Result<()>;
}

/// Carves byte-range readers out of one open physical resource
pub trait IndexInputSlicer: Send + Sync {
    fn open_slice(&self, description: &str, offset: u64, length: u64)
        -> Result<Box<dyn IndexInput>>;

    /// Reader over the whole resource
    fn open_full_slice(&self) -> Result<Box<dyn IndexInput>>;

    fn close(&self) -> Result<()>;
}

/// Slicer over an already opened, un-cloned input
pub struct InputSlicer {
    base: Mutex<Box<dyn IndexInput>>,
}

impl InputSlicer {
    pub fn new(base: Box<dyn IndexInput>) -> Self {
        Self {
            base: Mutex::new(base),
        }
    }
}

impl IndexInputSlicer for InputSlicer {
    fn open_slice(
        &self,
        description: &str,
        offset: u64,
        length: u64,
    ) -> Result<Box<dyn IndexInput>> {
        self.base.lock().slice(description, offset, length)
    }

    fn open_full_slice(&self) -> Result<Box<dyn IndexInput>> {
        let base = self.base.lock();
        let mut full = base.clone_input()?;
        full.seek(0)?;
        Ok(full)
    }

    fn close(&self) -> Result<()> {
        self.base.lock().close()
    }
}

/// Sub-window of another slicer, used to nest archives inside archives
pub struct OffsetSlicer {
    inner: Arc<dyn IndexInputSlicer>,
    description: String,
    offset: u64,
    length: u64,
}

impl OffsetSlicer {
    pub fn new(
        inner: Arc<dyn IndexInputSlicer>,
        description: impl Into<String>,
        offset: u64,
        length: u64,
    ) -> Self {
        Self {
            inner,
            description: description.into(),
            offset,
            length,
        }
    }
}

impl IndexInputSlicer for OffsetSlicer {
    fn open_slice(
        &self,
        description: &str,
        offset: u64,
        length: u64,
    ) -> Result<Box<dyn IndexInput>> {
        let end = offset.checked_add(length);
        if end.map_or(true, |end| end > self.length) {
            return Err(StoreError::InvalidArgument(format!(
                "slice offset={} length={} is out of bounds for {} (length {})",
                offset, length, self.description, self.length
            )));
        }
        self.inner
            .open_slice(description, self.offset + offset, length)
    }

    fn open_full_slice(&self) -> Result<Box<dyn IndexInput>> {
        self.inner
            .open_slice(&self.description, self.offset, self.length)
    }

    /// The shared container stays open; it belongs to whoever opened it
    fn close(&self) -> Result<()> {
        Ok(())
    }
}
