//! Directory keeping one physical file per virtual file
//!
//! Reads go through one of three raw strategies (see [`ReadStrategy`]);
//! writes are buffered appends handed to the OS in bounded chunks. Every
//! closed output is remembered as stale until `sync` fsyncs it.

mod mmap;
mod nio;
mod simple;

pub use mmap::MmapRawInput;
pub use nio::NioFsRawInput;
pub use simple::SimpleFsRawInput;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dashmap::DashSet;
use tracing::{debug, warn};

use super::buffered::{BufferedInput, BufferedOutput, RawOutput};
use super::directory::{CloseGuard, Directory};
use super::index_io::{IndexInput, IndexOutput};
use super::io_context::IoContext;
use super::lock::{
    Lock, LockFactory, NativeFsLockFactory, NoLockFactory, SimpleFsLockFactory,
    SingleInstanceLockFactory,
};
use crate::config::{FsDirectoryConfig, LockStrategy, ReadStrategy};
use crate::error::StoreError;
use crate::Result;

/// Default write chunk and output buffer size
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

const FSYNC_ATTEMPTS: u32 = 5;
const FSYNC_RETRY_PAUSE: Duration = Duration::from_millis(5);

pub struct FsDirectory {
    path: PathBuf,
    read_strategy: ReadStrategy,
    chunk_size: usize,
    stale_files: Arc<DashSet<String>>,
    lock_factory: Box<dyn LockFactory>,
    state: CloseGuard,
}

impl std::fmt::Debug for FsDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsDirectory")
            .field("path", &self.path)
            .field("read_strategy", &self.read_strategy)
            .finish()
    }
}

impl FsDirectory {
    /// Open with the platform's preferred read strategy and native locks
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, &FsDirectoryConfig::default())
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: &FsDirectoryConfig) -> Result<Self> {
        config.validate()?;
        let path = canonical(path.as_ref())?;
        let lock_dir = match &config.lock_dir {
            Some(dir) => canonical(dir)?,
            None => path.clone(),
        };
        let prefix = (lock_dir != path).then(|| lock_id_for(&path));
        let lock_factory: Box<dyn LockFactory> = match config.lock_strategy {
            LockStrategy::Native => {
                Box::new(NativeFsLockFactory::new(lock_dir).with_lock_prefix(prefix))
            }
            LockStrategy::Simple => {
                Box::new(SimpleFsLockFactory::new(lock_dir).with_lock_prefix(prefix))
            }
            LockStrategy::SingleInstance => Box::new(SingleInstanceLockFactory::new()),
            LockStrategy::None => Box::new(NoLockFactory),
        };
        Ok(Self::with_lock_factory(
            path,
            config.read_strategy,
            config.write_chunk_size,
            lock_factory,
        ))
    }

    pub fn with_lock_factory(
        path: PathBuf,
        read_strategy: ReadStrategy,
        chunk_size: usize,
        lock_factory: Box<dyn LockFactory>,
    ) -> Self {
        debug!(path = %path.display(), ?read_strategy, "opening fs directory");
        Self {
            path,
            read_strategy,
            chunk_size: chunk_size.max(super::io_context::MIN_BUFFER_SIZE),
            stale_files: Arc::new(DashSet::new()),
            lock_factory,
            state: CloseGuard::new("FsDirectory"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_strategy(&self) -> ReadStrategy {
        self.read_strategy
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    fn fsync(&self, name: &str) -> Result<()> {
        let path = self.file_path(name);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = OpenOptions::new()
                .write(true)
                .open(&path)
                .and_then(|file| file.sync_all());
            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(StoreError::NotFound(name.to_string()))
                }
                Err(e) if attempt >= FSYNC_ATTEMPTS => return Err(StoreError::Io(e)),
                Err(e) => {
                    debug!(file = name, attempt, error = %e, "fsync failed, retrying");
                    thread::sleep(FSYNC_RETRY_PAUSE);
                }
            }
        }
    }

    fn fsync_directory(&self) {
        #[cfg(unix)]
        {
            let result = File::open(&self.path).and_then(|dir| dir.sync_all());
            if let Err(e) = result {
                debug!(path = %self.path.display(), error = %e, "directory fsync not supported");
            }
        }
    }
}

fn canonical(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        Ok(fs::canonicalize(path)?)
    } else {
        Ok(path.to_path_buf())
    }
}

fn lock_id_for(path: &Path) -> String {
    format!(
        "lucene-{:x}",
        crc32fast::hash(path.to_string_lossy().as_bytes())
    )
}

/// Chunked appends to an OS file; registers the name as stale on close
pub struct FsRawOutput {
    name: String,
    file: Option<File>,
    chunk_size: usize,
    stale_files: Arc<DashSet<String>>,
}

impl RawOutput for FsRawOutput {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StoreError::AlreadyClosed(self.name.clone()))?;
        for chunk in bytes.chunks(self.chunk_size) {
            file.write_all(chunk)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            self.stale_files.insert(self.name.clone());
            drop(file);
        }
        Ok(())
    }
}

impl Directory for FsDirectory {
    fn list_all(&self) -> Result<Vec<String>> {
        self.state.ensure_open()?;
        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NoSuchDirectory(self.path.display().to_string()))
            }
            Err(e) => {
                if self.path.is_file() {
                    return Err(StoreError::NoSuchDirectory(format!(
                        "file '{}' exists but is not a directory",
                        self.path.display()
                    )));
                }
                return Err(e.into());
            }
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    fn file_exists(&self, name: &str) -> Result<bool> {
        self.state.ensure_open()?;
        match fs::metadata(self.file_path(name)) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::from_io(e, name)),
        }
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        self.state.ensure_open()?;
        fs::metadata(self.file_path(name))
            .map(|m| m.len())
            .map_err(|e| StoreError::from_io(e, name))
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.state.ensure_open()?;
        fs::remove_file(self.file_path(name)).map_err(|e| StoreError::from_io(e, name))?;
        self.stale_files.remove(name);
        Ok(())
    }

    fn create_output(&self, name: &str, _context: &IoContext) -> Result<Box<dyn IndexOutput>> {
        self.state.ensure_open()?;
        fs::create_dir_all(&self.path)?;
        let path = self.file_path(name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StoreError::Io(io::Error::new(
                    e.kind(),
                    format!("Cannot overwrite: {}", path.display()),
                )))
            }
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let sink = FsRawOutput {
            name: name.to_string(),
            file: Some(file),
            chunk_size: self.chunk_size,
            stale_files: Arc::clone(&self.stale_files),
        };
        Ok(Box::new(BufferedOutput::new(name, sink, self.chunk_size)?))
    }

    fn open_input(&self, name: &str, context: &IoContext) -> Result<Box<dyn IndexInput>> {
        self.state.ensure_open()?;
        let path = self.file_path(name);
        let file = File::open(&path).map_err(|e| StoreError::from_io(e, name))?;
        let description = |kind: &str| format!("{}(path=\"{}\")", kind, path.display());
        let input: Box<dyn IndexInput> = match self.read_strategy {
            ReadStrategy::Simple => Box::new(BufferedInput::new(
                description("SimpleFSIndexInput"),
                SimpleFsRawInput::open(file)?,
                context,
            )),
            ReadStrategy::Nio => Box::new(BufferedInput::new(
                description("NIOFSIndexInput"),
                NioFsRawInput::open(file)?,
                context,
            )),
            ReadStrategy::Mmap => Box::new(BufferedInput::new(
                description("MMapIndexInput"),
                MmapRawInput::open(&file)?,
                context,
            )),
        };
        Ok(input)
    }

    fn sync(&self, names: &[String]) -> Result<()> {
        self.state.ensure_open()?;
        let mut synced = Vec::new();
        for name in names {
            if !self.stale_files.contains(name.as_str()) || synced.contains(name) {
                continue;
            }
            self.fsync(name)?;
            synced.push(name.clone());
        }
        if !synced.is_empty() {
            self.fsync_directory();
        }
        for name in &synced {
            self.stale_files.remove(name.as_str());
        }
        debug!(path = %self.path.display(), synced = synced.len(), "synced files");
        Ok(())
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
        lock_id_for(&self.path)
    }

    fn close(&self) -> Result<()> {
        if self.state.close() && !self.stale_files.is_empty() {
            warn!(
                path = %self.path.display(),
                unsynced = self.stale_files.len(),
                "closing directory with unsynced files"
            );
        }
        Ok(())
    }
}
