pub mod config;
pub mod error;
pub mod store;

pub use config::{
    FsDirectoryConfig, LockStrategy, NrtCachingConfig, RateLimitConfig, ReadStrategy, StoreConfig,
};
pub use error::{Result, StoreError};
pub use store::{
    CompoundFileDirectory, DataInput, DataOutput, Directory, FsDirectory, IndexInput, IndexOutput,
    IoContext, MemoryDirectory, NrtCachingDirectory, RateLimitedDirectory, TrackingDirectory,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
