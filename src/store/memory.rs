//! RAM-resident directory
//!
//! Files are chunked byte buffers shared between the directory and any
//! reader that opened them. A reader sees the length the file had when it
//! was opened, so bytes appended later by a still-open writer stay invisible
//! to it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::buffered::{BufferedInput, BufferedOutput, RawInput, RawOutput};
use super::data_io::DataOutput;
use super::directory::{CloseGuard, Directory};
use super::index_io::{IndexInput, IndexOutput};
use super::io_context::IoContext;
use super::lock::{Lock, LockFactory, SingleInstanceLockFactory};
use crate::error::StoreError;
use crate::Result;

/// Allocation unit of a memory file
pub const CHUNK_SIZE: usize = 1024;

#[derive(Default)]
struct Chunks {
    chunks: Vec<Box<[u8]>>,
    length: u64,
}

/// Growable chunked byte buffer backing one virtual file
#[derive(Default)]
pub struct MemoryFile {
    data: RwLock<Chunks>,
    size_in_bytes: AtomicU64,
    /// Aggregate counter of the owning directory; detached on delete or replace
    directory_size: Mutex<Option<Arc<AtomicU64>>>,
}

impl MemoryFile {
    pub fn new() -> Self {
        Self::default()
    }

    fn attached(directory_size: Arc<AtomicU64>) -> Self {
        Self {
            directory_size: Mutex::new(Some(directory_size)),
            ..Self::default()
        }
    }

    pub fn length(&self) -> u64 {
        self.data.read().length
    }

    /// Allocated bytes, a multiple of the chunk size
    pub fn size_in_bytes(&self) -> u64 {
        self.size_in_bytes.load(Ordering::Acquire)
    }

    fn detach(&self) {
        let mut directory_size = self.directory_size.lock();
        if let Some(counter) = directory_size.take() {
            counter.fetch_sub(self.size_in_bytes(), Ordering::AcqRel);
        }
    }

    pub fn append(&self, mut bytes: &[u8]) {
        let mut added = 0u64;
        {
            let mut data = self.data.write();
            while !bytes.is_empty() {
                let used = (data.length % CHUNK_SIZE as u64) as usize;
                if used == 0 && data.length as usize == data.chunks.len() * CHUNK_SIZE {
                    data.chunks.push(vec![0u8; CHUNK_SIZE].into_boxed_slice());
                    added += CHUNK_SIZE as u64;
                }
                let n = bytes.len().min(CHUNK_SIZE - used);
                let index = (data.length / CHUNK_SIZE as u64) as usize;
                data.chunks[index][used..used + n].copy_from_slice(&bytes[..n]);
                data.length += n as u64;
                bytes = &bytes[n..];
            }
        }
        if added > 0 {
            let directory_size = self.directory_size.lock();
            self.size_in_bytes.fetch_add(added, Ordering::AcqRel);
            if let Some(counter) = directory_size.as_ref() {
                counter.fetch_add(added, Ordering::AcqRel);
            }
        }
    }

    /// Fill `buf` with bytes starting at `pos`
    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.data.read();
        if pos + buf.len() as u64 > data.length {
            return Err(StoreError::eof("MemoryFile"));
        }
        let mut pos = pos;
        let mut filled = 0;
        while filled < buf.len() {
            let index = (pos / CHUNK_SIZE as u64) as usize;
            let offset = (pos % CHUNK_SIZE as u64) as usize;
            let n = (buf.len() - filled).min(CHUNK_SIZE - offset);
            buf[filled..filled + n].copy_from_slice(&data.chunks[index][offset..offset + n]);
            filled += n;
            pos += n as u64;
        }
        Ok(())
    }

    /// Copy the whole file into `out`, one chunk at a time
    pub fn write_to(&self, out: &mut dyn DataOutput) -> Result<()> {
        let data = self.data.read();
        let mut remaining = data.length;
        for chunk in &data.chunks {
            if remaining == 0 {
                break;
            }
            let n = remaining.min(CHUNK_SIZE as u64) as usize;
            out.write_bytes(&chunk[..n])?;
            remaining -= n as u64;
        }
        Ok(())
    }
}

/// Read window over a memory file, length fixed at open time
#[derive(Clone)]
pub struct MemoryRawInput {
    file: Arc<MemoryFile>,
    offset: u64,
    length: u64,
}

impl MemoryRawInput {
    pub fn new(file: Arc<MemoryFile>) -> Self {
        let length = file.length();
        Self {
            file,
            offset: 0,
            length,
        }
    }
}

impl RawInput for MemoryRawInput {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        if pos + buf.len() as u64 > self.length {
            return Err(StoreError::eof("MemoryRawInput"));
        }
        self.file.read_at(self.offset + pos, buf)
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn slice(&self, offset: u64, length: u64) -> Self {
        Self {
            file: Arc::clone(&self.file),
            offset: self.offset + offset,
            length,
        }
    }
}

pub struct MemoryRawOutput {
    file: Arc<MemoryFile>,
}

impl RawOutput for MemoryRawOutput {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.append(bytes);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct MemoryDirectory {
    files: DashMap<String, Arc<MemoryFile>>,
    size_in_bytes: Arc<AtomicU64>,
    lock_factory: Box<dyn LockFactory>,
    state: CloseGuard,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::with_lock_factory(Box::new(SingleInstanceLockFactory::new()))
    }

    pub fn with_lock_factory(lock_factory: Box<dyn LockFactory>) -> Self {
        Self {
            files: DashMap::new(),
            size_in_bytes: Arc::new(AtomicU64::new(0)),
            lock_factory,
            state: CloseGuard::new("MemoryDirectory"),
        }
    }

    /// Snapshot every file of `other` into a new memory directory
    pub fn from_directory(other: &dyn Directory, context: &IoContext) -> Result<Self> {
        let dir = Self::new();
        for name in other.list_all()? {
            other.copy_to(&dir, &name, &name, context)?;
        }
        debug!(files = dir.files.len(), bytes = dir.size_in_bytes(), "copied directory into memory");
        Ok(dir)
    }

    /// Bytes allocated by all files, in whole chunks
    pub fn size_in_bytes(&self) -> u64 {
        self.size_in_bytes.load(Ordering::Acquire)
    }

    /// Shared handle on a file's buffers
    pub fn file(&self, name: &str) -> Option<Arc<MemoryFile>> {
        self.files.get(name).map(|f| Arc::clone(f.value()))
    }

    fn lookup(&self, name: &str) -> Result<Arc<MemoryFile>> {
        self.file(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }
}

impl Directory for MemoryDirectory {
    fn list_all(&self) -> Result<Vec<String>> {
        self.state.ensure_open()?;
        Ok(self.files.iter().map(|e| e.key().clone()).collect())
    }

    fn file_exists(&self, name: &str) -> Result<bool> {
        self.state.ensure_open()?;
        Ok(self.files.contains_key(name))
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        self.state.ensure_open()?;
        Ok(self.lookup(name)?.length())
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.state.ensure_open()?;
        match self.files.remove(name) {
            Some((_, file)) => {
                file.detach();
                Ok(())
            }
            None => Err(StoreError::NotFound(name.to_string())),
        }
    }

    fn create_output(&self, name: &str, context: &IoContext) -> Result<Box<dyn IndexOutput>> {
        self.state.ensure_open()?;
        let file = Arc::new(MemoryFile::attached(Arc::clone(&self.size_in_bytes)));
        if let Some(previous) = self.files.insert(name.to_string(), Arc::clone(&file)) {
            previous.detach();
        }
        let sink = MemoryRawOutput { file };
        Ok(Box::new(BufferedOutput::with_context(name, sink, context)))
    }

    fn open_input(&self, name: &str, context: &IoContext) -> Result<Box<dyn IndexInput>> {
        self.state.ensure_open()?;
        let file = self.lookup(name)?;
        Ok(Box::new(BufferedInput::new(
            format!("MemoryIndexInput(name={})", name),
            MemoryRawInput::new(file),
            context,
        )))
    }

    fn sync(&self, _names: &[String]) -> Result<()> {
        self.state.ensure_open()
    }

    fn make_lock(&self, name: &str) -> Result<Box<dyn Lock>> {
        self.state.ensure_open()?;
        Ok(self.lock_factory.make_lock(name))
    }

    fn clear_lock(&self, name: &str) -> Result<()> {
        self.state.ensure_open()?;
        self.lock_factory.clear_lock(name)
    }

    fn lock_id(&self) -> String {
        // the size counter is shared with every file and never moves
        format!("MemoryDirectory@{:p}", Arc::as_ptr(&self.size_in_bytes))
    }

    fn close(&self) -> Result<()> {
        if self.state.close() {
            for entry in self.files.iter() {
                entry.value().detach();
            }
            self.files.clear();
        }
        Ok(())
    }
}
