//! Pluggable byte-file storage
//!
//! A [`Directory`] is a flat namespace of named files. Writers are
//! [`IndexOutput`]s, readers are [`IndexInput`]s; both speak the
//! big-endian/varint codec of [`DataInput`] and [`DataOutput`].
//!
//! Backends:
//! - [`MemoryDirectory`]: chunked in-memory files
//! - [`FsDirectory`]: one OS file per virtual file
//! - [`CompoundFileDirectory`]: many files packed into one container
//!
//! Wrappers: [`NrtCachingDirectory`], [`RateLimitedDirectory`],
//! [`TrackingDirectory`].

pub mod buffered;
pub mod checksum;
pub mod checksum_input;
pub mod codec_util;
pub mod compound;
pub mod data_io;
pub mod directory;
pub mod file_names;
pub mod fs;
pub mod index_io;
pub mod io_context;
pub mod lock;
pub mod memory;
pub mod nrt_caching;
pub mod rate_limited;
pub mod rate_limiter;
pub mod tracking;

pub use buffered::{BufferedInput, BufferedOutput, RawInput, RawOutput};
pub use checksum::{BufferedChecksum, Checksum, Crc32};
pub use checksum_input::ChecksumIndexInput;
pub use compound::{CompoundFileDirectory, FileEntry};
pub use data_io::{ByteArrayDataInput, DataInput, DataOutput};
pub use directory::Directory;
pub use fs::FsDirectory;
pub use index_io::{IndexInput, IndexInputSlicer, IndexOutput};
pub use io_context::{FlushInfo, IoContext, IoContextKind, MergeInfo};
pub use lock::{Lock, LockFactory};
pub use memory::{MemoryDirectory, MemoryFile};
pub use nrt_caching::NrtCachingDirectory;
pub use rate_limited::RateLimitedDirectory;
pub use rate_limiter::SimpleRateLimiter;
pub use tracking::TrackingDirectory;
