use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::store::fs::DEFAULT_CHUNK_SIZE;
use crate::store::io_context::MIN_BUFFER_SIZE;
use crate::Result;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// How a persistent directory reads its files
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStrategy {
    /// Seek + read on a file handle shared under a mutex
    Simple,
    /// Positional reads, no shared cursor
    Nio,
    /// Memory-mapped file
    Mmap,
}

impl Default for ReadStrategy {
    fn default() -> Self {
        if cfg!(target_pointer_width = "64") {
            ReadStrategy::Mmap
        } else if cfg!(unix) {
            ReadStrategy::Nio
        } else {
            ReadStrategy::Simple
        }
    }
}

/// Which lock factory a persistent directory installs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStrategy {
    /// OS advisory lock on the backing file
    #[default]
    Native,
    /// Marker file created with create-new semantics
    Simple,
    /// In-process lock table
    SingleInstance,
    /// Every obtain succeeds
    None,
}

/// Persistent directory configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsDirectoryConfig {
    pub read_strategy: ReadStrategy,
    pub lock_strategy: LockStrategy,
    /// Where lock files live; the directory itself when unset
    pub lock_dir: Option<PathBuf>,
    pub write_chunk_size: usize,
}

impl Default for FsDirectoryConfig {
    fn default() -> Self {
        Self {
            read_strategy: ReadStrategy::default(),
            lock_strategy: LockStrategy::default(),
            lock_dir: None,
            write_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl FsDirectoryConfig {
    pub fn with_read_strategy(mut self, strategy: ReadStrategy) -> Self {
        self.read_strategy = strategy;
        self
    }

    pub fn with_lock_strategy(mut self, strategy: LockStrategy) -> Self {
        self.lock_strategy = strategy;
        self
    }

    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    pub fn with_write_chunk_size(mut self, size: usize) -> Self {
        self.write_chunk_size = size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.write_chunk_size < MIN_BUFFER_SIZE {
            return Err(StoreError::InvalidArgument(format!(
                "write_chunk_size must be >= {} (got {})",
                MIN_BUFFER_SIZE, self.write_chunk_size
            )));
        }
        Ok(())
    }
}

/// Thresholds of the NRT caching directory
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NrtCachingConfig {
    /// Merges estimated above this size bypass the cache
    pub max_merge_size_mb: f64,
    /// Total bytes the cache may hold
    pub max_cached_mb: f64,
}

impl Default for NrtCachingConfig {
    fn default() -> Self {
        Self {
            max_merge_size_mb: 5.0,
            max_cached_mb: 60.0,
        }
    }
}

impl NrtCachingConfig {
    pub fn new(max_merge_size_mb: f64, max_cached_mb: f64) -> Self {
        Self {
            max_merge_size_mb,
            max_cached_mb,
        }
    }

    pub fn max_merge_size_bytes(&self) -> u64 {
        (self.max_merge_size_mb * BYTES_PER_MB) as u64
    }

    pub fn max_cached_bytes(&self) -> u64 {
        (self.max_cached_mb * BYTES_PER_MB) as u64
    }

    pub fn validate(&self) -> Result<()> {
        check_mb("max_merge_size_mb", self.max_merge_size_mb)?;
        check_mb("max_cached_mb", self.max_cached_mb)
    }
}

/// Write throttling per I/O context kind; `None` leaves the kind unthrottled
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub merge_mb_per_sec: Option<f64>,
    pub flush_mb_per_sec: Option<f64>,
    pub default_mb_per_sec: Option<f64>,
}

impl RateLimitConfig {
    pub fn with_merge_mb_per_sec(mut self, mb_per_sec: f64) -> Self {
        self.merge_mb_per_sec = Some(mb_per_sec);
        self
    }

    pub fn with_flush_mb_per_sec(mut self, mb_per_sec: f64) -> Self {
        self.flush_mb_per_sec = Some(mb_per_sec);
        self
    }

    pub fn with_default_mb_per_sec(mut self, mb_per_sec: f64) -> Self {
        self.default_mb_per_sec = Some(mb_per_sec);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let rates = [
            ("merge_mb_per_sec", self.merge_mb_per_sec),
            ("flush_mb_per_sec", self.flush_mb_per_sec),
            ("default_mb_per_sec", self.default_mb_per_sec),
        ];
        for (field, rate) in rates {
            match rate {
                Some(rate) if !(rate.is_finite() && rate > 0.0) => {
                    return Err(StoreError::InvalidArgument(format!(
                        "{} must be a finite, positive number (got {})",
                        field, rate
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Full store configuration, loadable from a JSON file
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub fs: FsDirectoryConfig,
    pub nrt_caching: NrtCachingConfig,
    pub rate_limit: RateLimitConfig,
}

impl StoreConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: StoreConfig = serde_json::from_str(json)
            .map_err(|e| StoreError::InvalidArgument(format!("invalid store config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| StoreError::from_io(e, &path.display().to_string()))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| StoreError::InvalidArgument(format!("cannot encode store config: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        self.fs.validate()?;
        self.nrt_caching.validate()?;
        self.rate_limit.validate()
    }
}

fn check_mb(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(StoreError::InvalidArgument(format!(
            "{} must be a finite, non-negative number (got {})",
            field, value
        )));
    }
    Ok(())
}
