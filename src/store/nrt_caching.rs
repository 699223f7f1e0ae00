//! Near-real-time caching directory
//!
//! Small, short-lived files (fresh flushes, small merges) are written to an
//! in-memory cache in front of a persistent delegate. A cached file moves to
//! the delegate when it is synced or when the directory is closed. At any
//! time a file lives in exactly one of the two.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::directory::{CloseGuard, Directory};
use super::file_names::SEGMENTS_GEN;
use super::index_io::{IndexInput, IndexInputSlicer, IndexOutput};
use super::io_context::IoContext;
use super::lock::Lock;
use super::memory::MemoryDirectory;
use crate::config::NrtCachingConfig;
use crate::error::StoreError;
use crate::Result;

pub struct NrtCachingDirectory {
    delegate: Arc<dyn Directory>,
    cache: MemoryDirectory,
    max_merge_size_bytes: u64,
    max_cached_bytes: u64,
    /// One mutex per file being moved out of the cache
    uncache_locks: DashMap<String, Arc<Mutex<()>>>,
    state: CloseGuard,
}

impl NrtCachingDirectory {
    pub fn new(delegate: Arc<dyn Directory>, max_merge_size_mb: f64, max_cached_mb: f64) -> Result<Self> {
        Self::with_config(delegate, &NrtCachingConfig::new(max_merge_size_mb, max_cached_mb))
    }

    pub fn with_config(delegate: Arc<dyn Directory>, config: &NrtCachingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            delegate,
            cache: MemoryDirectory::new(),
            max_merge_size_bytes: config.max_merge_size_bytes(),
            max_cached_bytes: config.max_cached_bytes(),
            uncache_locks: DashMap::new(),
            state: CloseGuard::new("NrtCachingDirectory"),
        })
    }

    pub fn delegate(&self) -> &Arc<dyn Directory> {
        &self.delegate
    }

    /// Names currently held in memory
    pub fn list_cached_files(&self) -> Result<Vec<String>> {
        self.cache.list_all()
    }

    /// Bytes held in memory
    pub fn cached_bytes(&self) -> u64 {
        self.cache.size_in_bytes()
    }

    /// Whether a new file with this context belongs in the cache
    fn do_cache_write(&self, name: &str, context: &IoContext) -> bool {
        if name == SEGMENTS_GEN {
            return false;
        }
        let bytes = context.estimated_bytes().unwrap_or(0);
        bytes <= self.max_merge_size_bytes
            && bytes.saturating_add(self.cache.size_in_bytes()) <= self.max_cached_bytes
    }

    fn in_cache(&self, name: &str) -> Result<bool> {
        self.cache.file_exists(name)
    }

    /// Move one file from the cache to the delegate
    fn uncache(&self, name: &str) -> Result<()> {
        let lock = Arc::clone(self.uncache_locks.entry(name.to_string()).or_default().value());
        let result = {
            let _guard = lock.lock();
            self.migrate(name)
        };
        drop(lock);
        self.uncache_locks
            .remove_if(name, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    fn migrate(&self, name: &str) -> Result<()> {
        if !self.in_cache(name)? {
            return Ok(());
        }
        if self.delegate.file_exists(name)? {
            return Err(StoreError::IllegalState(format!(
                "file \"{}\" exists in both the cache and the delegate",
                name
            )));
        }
        let copied = self.cache.copy_to(&*self.delegate, name, name, &IoContext::DEFAULT);
        if let Err(e) = copied {
            warn!(file = name, error = %e, "failed to move cached file to delegate");
            return Err(e);
        }
        self.cache.delete_file(name)?;
        debug!(file = name, "moved cached file to delegate");
        Ok(())
    }
}

fn ignore_missing(result: Result<()>, name: &str) {
    if let Err(e) = result {
        if !e.is_not_found() {
            trace!(file = name, error = %e, "ignoring failed delete");
        }
    }
}

impl Directory for NrtCachingDirectory {
    fn list_all(&self) -> Result<Vec<String>> {
        self.state.ensure_open()?;
        let mut names: BTreeSet<String> = self.cache.list_all()?.into_iter().collect();
        match self.delegate.list_all() {
            Ok(files) => names.extend(files),
            // the delegate's path appears on first sync
            Err(StoreError::NoSuchDirectory(path)) => {
                if names.is_empty() {
                    return Err(StoreError::NoSuchDirectory(path));
                }
            }
            Err(e) => return Err(e),
        }
        Ok(names.into_iter().collect())
    }

    fn file_exists(&self, name: &str) -> Result<bool> {
        self.state.ensure_open()?;
        Ok(self.in_cache(name)? || self.delegate.file_exists(name)?)
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        self.state.ensure_open()?;
        if self.in_cache(name)? {
            self.cache.file_length(name)
        } else {
            self.delegate.file_length(name)
        }
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.state.ensure_open()?;
        trace!(file = name, "delete");
        if self.in_cache(name)? {
            self.cache.delete_file(name)
        } else {
            self.delegate.delete_file(name)
        }
    }

    fn create_output(&self, name: &str, context: &IoContext) -> Result<Box<dyn IndexOutput>> {
        self.state.ensure_open()?;
        if self.do_cache_write(name, context) {
            debug!(file = name, estimated = ?context.estimated_bytes(), "caching write in memory");
            ignore_missing(self.delegate.delete_file(name), name);
            self.cache.create_output(name, context)
        } else {
            debug!(file = name, estimated = ?context.estimated_bytes(), "writing to delegate");
            ignore_missing(self.cache.delete_file(name), name);
            self.delegate.create_output(name, context)
        }
    }

    fn open_input(&self, name: &str, context: &IoContext) -> Result<Box<dyn IndexInput>> {
        self.state.ensure_open()?;
        if self.in_cache(name)? {
            self.cache.open_input(name, context)
        } else {
            self.delegate.open_input(name, context)
        }
    }

    fn sync(&self, names: &[String]) -> Result<()> {
        self.state.ensure_open()?;
        for name in names {
            self.uncache(name)?;
        }
        self.delegate.sync(names)
    }

    fn make_lock(&self, name: &str) -> Result<Box<dyn Lock>> {
        self.delegate.make_lock(name)
    }

    fn clear_lock(&self, name: &str) -> Result<()> {
        self.delegate.clear_lock(name)
    }

    fn lock_id(&self) -> String {
        self.delegate.lock_id()
    }

    fn create_slicer(&self, name: &str, context: &IoContext) -> Result<Box<dyn IndexInputSlicer>> {
        self.state.ensure_open()?;
        if self.in_cache(name)? {
            self.cache.create_slicer(name, context)
        } else {
            self.delegate.create_slicer(name, context)
        }
    }

    fn close(&self) -> Result<()> {
        if self.state.is_closed() {
            return Ok(());
        }
        // everything still cached has to survive the close
        for name in self.cache.list_all()? {
            self.uncache(&name)?;
        }
        self.state.close();
        self.cache.close()?;
        self.delegate.close()
    }
}
