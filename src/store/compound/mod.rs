//! Compound archive: many logical files packed into one physical container
//!
//! Layout of a sealed archive `d.cfs`:
//! - `d.cfs`: codec header, sub-file bytes back to back, codec footer
//! - `d.cfe`: codec header, vint entry count, then `(string id, i64 offset,
//!   i64 length)` per entry, codec footer
//!
//! Ids are file names with the segment prefix stripped, so `_0.fdt` is
//! stored as `.fdt` and listed again as `_0.fdt`.

mod reader;
mod writer;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use self::writer::CompoundWriter;
use super::directory::{CloseGuard, Directory};
use super::file_names::{entries_file_name, parse_segment_name, strip_segment_name};
use super::index_io::{IndexInput, IndexInputSlicer, IndexOutput, OffsetSlicer};
use super::io_context::IoContext;
use super::lock::Lock;
use crate::error::StoreError;
use crate::Result;

pub const DATA_CODEC: &str = "CompoundFileWriterData";
pub const ENTRY_CODEC: &str = "CompoundFileWriterEntries";

pub const VERSION_START: i32 = 0;
pub const VERSION_CHECKSUM: i32 = 1;
pub const VERSION_CURRENT: i32 = VERSION_CHECKSUM;

/// Legacy first value: entry count follows directly, ids carry the segment prefix
pub const FORMAT_PRE_VERSION: i32 = 0;
/// Legacy first value: explicit count follows, ids already stripped
pub const FORMAT_NO_SEGMENT_PREFIX: i32 = -1;

/// Placement of one sub-file inside the container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileEntry {
    pub offset: u64,
    pub length: u64,
}

enum Mode {
    Read {
        handle: Arc<dyn IndexInputSlicer>,
        entries: HashMap<String, FileEntry>,
    },
    Write(CompoundWriter),
}

/// Directory view over a compound archive, opened either for reading or
/// for writing a new archive
pub struct CompoundFileDirectory {
    directory: Arc<dyn Directory>,
    file_name: String,
    mode: Mode,
    state: CloseGuard,
}

impl CompoundFileDirectory {
    /// Open a sealed archive
    pub fn open(
        directory: Arc<dyn Directory>,
        file_name: &str,
        context: &IoContext,
    ) -> Result<Self> {
        let handle: Arc<dyn IndexInputSlicer> =
            Arc::from(directory.create_slicer(file_name, context)?);
        let entries = match reader::read_entries(&*handle, &*directory, file_name) {
            Ok(entries) => entries,
            Err(e) => {
                let _ = handle.close();
                return Err(e);
            }
        };
        Ok(Self {
            directory,
            file_name: file_name.to_string(),
            mode: Mode::Read { handle, entries },
            state: CloseGuard::new("CompoundFileDirectory"),
        })
    }

    /// Start a new archive; nothing is readable until it is closed and reopened
    pub fn create(directory: Arc<dyn Directory>, file_name: &str) -> Result<Self> {
        let writer = CompoundWriter::new(
            Arc::clone(&directory),
            file_name,
            &entries_file_name(file_name),
        );
        debug!(archive = file_name, "creating compound archive");
        Ok(Self {
            directory,
            file_name: file_name.to_string(),
            mode: Mode::Write(writer),
            state: CloseGuard::new("CompoundFileDirectory"),
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Directory holding the physical container
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    fn read_only(&self, op: &str) -> StoreError {
        StoreError::Unsupported(format!("{} on compound archive {}", op, self.file_name))
    }

    fn entry(entries: &HashMap<String, FileEntry>, name: &str) -> Result<FileEntry> {
        let id = strip_segment_name(name);
        entries.get(id).copied().ok_or_else(|| {
            let mut ids: Vec<&str> = entries.keys().map(String::as_str).collect();
            ids.sort_unstable();
            StoreError::NotFound(format!(
                "No sub-file with id {} found (fileName={} files: {:?})",
                id, name, ids
            ))
        })
    }
}

impl Directory for CompoundFileDirectory {
    fn list_all(&self) -> Result<Vec<String>> {
        self.state.ensure_open()?;
        match &self.mode {
            Mode::Read { entries, .. } => {
                let segment = parse_segment_name(&self.file_name);
                Ok(entries
                    .keys()
                    .map(|id| format!("{}{}", segment, id))
                    .collect())
            }
            Mode::Write(writer) => Ok(writer.list_all()),
        }
    }

    fn file_exists(&self, name: &str) -> Result<bool> {
        self.state.ensure_open()?;
        match &self.mode {
            Mode::Read { entries, .. } => Ok(entries.contains_key(strip_segment_name(name))),
            Mode::Write(writer) => Ok(writer.file_exists(name)),
        }
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        self.state.ensure_open()?;
        match &self.mode {
            Mode::Read { entries, .. } => Ok(Self::entry(entries, name)?.length),
            Mode::Write(writer) => writer.file_length(name),
        }
    }

    fn delete_file(&self, _name: &str) -> Result<()> {
        Err(self.read_only("delete_file"))
    }

    fn create_output(&self, name: &str, context: &IoContext) -> Result<Box<dyn IndexOutput>> {
        self.state.ensure_open()?;
        match &self.mode {
            Mode::Write(writer) => writer.create_output(name, context),
            Mode::Read { .. } => Err(self.read_only("create_output")),
        }
    }

    fn open_input(&self, name: &str, _context: &IoContext) -> Result<Box<dyn IndexInput>> {
        self.state.ensure_open()?;
        match &self.mode {
            Mode::Read { handle, entries } => {
                let entry = Self::entry(entries, name)?;
                handle.open_slice(name, entry.offset, entry.length)
            }
            Mode::Write(_) => Err(StoreError::Unsupported(format!(
                "cannot open {} while archive {} is being written",
                name, self.file_name
            ))),
        }
    }

    fn sync(&self, _names: &[String]) -> Result<()> {
        Err(self.read_only("sync"))
    }

    fn make_lock(&self, _name: &str) -> Result<Box<dyn Lock>> {
        Err(self.read_only("make_lock"))
    }

    fn clear_lock(&self, _name: &str) -> Result<()> {
        Err(self.read_only("clear_lock"))
    }

    fn lock_id(&self) -> String {
        format!("CompoundFileDirectory(file=\"{}\")", self.file_name)
    }

    fn create_slicer(&self, name: &str, _context: &IoContext) -> Result<Box<dyn IndexInputSlicer>> {
        self.state.ensure_open()?;
        match &self.mode {
            Mode::Read { handle, entries } => {
                let entry = Self::entry(entries, name)?;
                Ok(Box::new(OffsetSlicer::new(
                    Arc::clone(handle),
                    format!("{} in {}", name, self.file_name),
                    entry.offset,
                    entry.length,
                )))
            }
            Mode::Write(_) => Err(StoreError::Unsupported(format!(
                "cannot slice {} while archive {} is being written",
                name, self.file_name
            ))),
        }
    }

    fn close(&self) -> Result<()> {
        if self.state.is_closed() {
            return Ok(());
        }
        match &self.mode {
            // a refused seal leaves the archive open so it can be retried
            Mode::Write(writer) => writer.close()?,
            Mode::Read { handle, .. } => handle.close()?,
        }
        self.state.close();
        Ok(())
    }
}
