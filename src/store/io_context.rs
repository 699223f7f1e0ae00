//! Caller-declared I/O intent
//!
//! An `IoContext` travels with every `create_output`/`open_input` call. Most
//! directories ignore it; the NRT caching directory reads the size estimates
//! to place writes, the rate-limited directory picks its limiter by kind, and
//! buffered streams size their window from it.

use serde::{Deserialize, Serialize};

/// Default buffer window for point access
pub const BUFFER_SIZE: usize = 1024;

/// Buffer window used for merge reads and writes
pub const MERGE_BUFFER_SIZE: usize = 4096;

/// Smallest buffer a buffered stream accepts
pub const MIN_BUFFER_SIZE: usize = 8;

/// Flush-time size estimate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushInfo {
    pub num_docs: u32,
    pub estimated_segment_size: u64,
}

/// Merge-time size estimate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeInfo {
    pub total_doc_count: u32,
    pub estimated_merge_bytes: u64,
    pub is_external: bool,
    pub merge_max_num_segments: i32,
}

/// What the caller intends to do with a stream
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoContext {
    Default,
    Read { read_once: bool },
    Flush(FlushInfo),
    Merge(MergeInfo),
}

/// Discriminant of an `IoContext`, used to index per-kind tables
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IoContextKind {
    Merge,
    Read,
    Flush,
    Default,
}

impl IoContextKind {
    pub const ALL: [IoContextKind; 4] = [
        IoContextKind::Merge,
        IoContextKind::Read,
        IoContextKind::Flush,
        IoContextKind::Default,
    ];

    pub fn index(self) -> usize {
        match self {
            IoContextKind::Merge => 0,
            IoContextKind::Read => 1,
            IoContextKind::Flush => 2,
            IoContextKind::Default => 3,
        }
    }
}

impl IoContext {
    pub const DEFAULT: IoContext = IoContext::Default;
    pub const READ: IoContext = IoContext::Read { read_once: false };
    pub const READ_ONCE: IoContext = IoContext::Read { read_once: true };

    pub fn flush(num_docs: u32, estimated_segment_size: u64) -> Self {
        IoContext::Flush(FlushInfo {
            num_docs,
            estimated_segment_size,
        })
    }

    pub fn merge(
        total_doc_count: u32,
        estimated_merge_bytes: u64,
        is_external: bool,
        merge_max_num_segments: i32,
    ) -> Self {
        IoContext::Merge(MergeInfo {
            total_doc_count,
            estimated_merge_bytes,
            is_external,
            merge_max_num_segments,
        })
    }

    pub fn kind(&self) -> IoContextKind {
        match self {
            IoContext::Default => IoContextKind::Default,
            IoContext::Read { .. } => IoContextKind::Read,
            IoContext::Flush(_) => IoContextKind::Flush,
            IoContext::Merge(_) => IoContextKind::Merge,
        }
    }

    /// Estimated number of bytes the caller is about to write, if declared
    pub fn estimated_bytes(&self) -> Option<u64> {
        match self {
            IoContext::Merge(info) => Some(info.estimated_merge_bytes),
            IoContext::Flush(info) => Some(info.estimated_segment_size),
            _ => None,
        }
    }

    pub fn is_read_once(&self) -> bool {
        matches!(self, IoContext::Read { read_once: true })
    }

    /// Buffer window a buffered stream should use for this context
    pub fn buffer_size(&self) -> usize {
        match self {
            IoContext::Merge(_) => MERGE_BUFFER_SIZE,
            _ => BUFFER_SIZE,
        }
    }
}

impl Default for IoContext {
    fn default() -> Self {
        IoContext::Default
    }
}
