//! The directory contract: a flat namespace of named byte files

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use super::checksum_input::ChecksumIndexInput;
use super::index_io::{IndexInput, IndexInputSlicer, IndexOutput, InputSlicer};
use super::io_context::IoContext;
use super::lock::Lock;
use crate::error::StoreError;
use crate::Result;

/// Storage backend holding named files
///
/// All methods take `&self`; implementations are shared across threads.
/// After `close` every operation other than `close` fails with
/// `AlreadyClosed`.
pub trait Directory: Send + Sync {
    /// Names of all files, in no particular order
    fn list_all(&self) -> Result<Vec<String>>;

    fn file_exists(&self, name: &str) -> Result<bool>;

    fn file_length(&self, name: &str) -> Result<u64>;

    fn delete_file(&self, name: &str) -> Result<()>;

    /// New empty file; replaces any existing file with the same name
    fn create_output(&self, name: &str, context: &IoContext) -> Result<Box<dyn IndexOutput>>;

    fn open_input(&self, name: &str, context: &IoContext) -> Result<Box<dyn IndexInput>>;

    fn open_checksum_input(&self, name: &str, context: &IoContext) -> Result<ChecksumIndexInput> {
        Ok(ChecksumIndexInput::new(self.open_input(name, context)?))
    }

    /// Make the named files durable
    fn sync(&self, names: &[String]) -> Result<()>;

    fn make_lock(&self, name: &str) -> Result<Box<dyn Lock>>;

    fn clear_lock(&self, name: &str) -> Result<()>;

    /// Identifies the lock namespace of this directory
    fn lock_id(&self) -> String;

    /// Handle that hands out byte-range readers of one file
    fn create_slicer(&self, name: &str, context: &IoContext) -> Result<Box<dyn IndexInputSlicer>> {
        let base = self.open_input(name, context)?;
        Ok(Box::new(InputSlicer::new(base)))
    }

    /// Idempotent
    fn close(&self) -> Result<()>;

    /// Copy `src` into `dest` of another directory, removing a partial copy on failure
    fn copy_to(&self, to: &dyn Directory, src: &str, dest: &str, context: &IoContext) -> Result<()> {
        let result = copy_file(self, to, src, dest, context);
        if result.is_err() {
            match to.delete_file(dest) {
                Err(e) if !e.is_not_found() => {
                    warn!(file = dest, error = %e, "failed to remove partial copy");
                }
                _ => {}
            }
        }
        result
    }
}

fn copy_file<D: Directory + ?Sized>(
    from: &D,
    to: &dyn Directory,
    src: &str,
    dest: &str,
    context: &IoContext,
) -> Result<()> {
    let mut input = from.open_input(src, context)?;
    let mut output = to.create_output(dest, context)?;
    let length = input.length();
    output.copy_bytes(&mut input, length)?;
    output.close()?;
    input.close()
}

/// Open/closed state shared by directory implementations
#[derive(Debug)]
pub(crate) struct CloseGuard {
    closed: AtomicBool,
    name: &'static str,
}

impl CloseGuard {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            closed: AtomicBool::new(false),
            name,
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::AlreadyClosed(self.name.to_string()));
        }
        Ok(())
    }

    /// Mark closed; `true` only for the call that performed the transition
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
