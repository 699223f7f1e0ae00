use std::collections::HashMap;

use tracing::debug;

use super::{
    FileEntry, DATA_CODEC, ENTRY_CODEC, FORMAT_NO_SEGMENT_PREFIX, FORMAT_PRE_VERSION,
    VERSION_CHECKSUM, VERSION_CURRENT, VERSION_START,
};
use crate::error::StoreError;
use crate::store::codec_util::{self, CODEC_MAGIC};
use crate::store::data_io::DataInput;
use crate::store::directory::Directory;
use crate::store::file_names::{entries_file_name, strip_segment_name};
use crate::store::index_io::{IndexInput, IndexInputSlicer};
use crate::store::io_context::IoContext;
use crate::Result;

const MAGIC: [u8; 4] = CODEC_MAGIC.to_be_bytes();

/// Parse the entry table of the archive stored in `file_name`
pub(crate) fn read_entries(
    handle: &dyn IndexInputSlicer,
    directory: &dyn Directory,
    file_name: &str,
) -> Result<HashMap<String, FileEntry>> {
    let mut stream = handle.open_full_slice()?;
    let result = read_entries_from(&mut stream, directory, file_name);
    let closed = stream.close();
    let entries = result?;
    closed?;
    Ok(entries)
}

fn read_entries_from(
    stream: &mut Box<dyn IndexInput>,
    directory: &dyn Directory,
    file_name: &str,
) -> Result<HashMap<String, FileEntry>> {
    // a one-byte vint equal to the first magic byte marks a headered archive
    let first = stream.read_vint()?;
    if first != MAGIC[0] as u32 {
        return read_legacy_entries(stream, first as i32);
    }

    let mut rest = [0u8; 3];
    stream.read_bytes(&mut rest)?;
    if rest != MAGIC[1..] {
        return Err(StoreError::corrupt(
            format!(
                "Illegal/impossible header for CFS file: {},{},{}",
                rest[0], rest[1], rest[2]
            ),
            stream.description(),
        ));
    }
    let version =
        codec_util::check_header_no_magic(stream, DATA_CODEC, VERSION_START, VERSION_CURRENT)?;
    let container_length = stream.length();

    let table_name = entries_file_name(file_name);
    let mut table = directory.open_checksum_input(&table_name, &IoContext::READ_ONCE)?;
    let table_version =
        codec_util::check_header(&mut table, ENTRY_CODEC, VERSION_START, VERSION_CURRENT)?;
    let count = table.read_vint()? as usize;
    let mut entries = HashMap::with_capacity(count.min(1024));
    for _ in 0..count {
        let id = table.read_string()?;
        let offset = table.read_i64()?;
        let length = table.read_i64()?;
        if offset < 0 || length < 0 || (offset as u64).saturating_add(length as u64) > container_length
        {
            return Err(StoreError::corrupt(
                format!(
                    "entry {} (offset={}, length={}) exceeds container length {}",
                    id, offset, length, container_length
                ),
                table.description(),
            ));
        }
        let entry = FileEntry {
            offset: offset as u64,
            length: length as u64,
        };
        if entries.insert(id.clone(), entry).is_some() {
            return Err(StoreError::corrupt(
                format!("Duplicate cfs entry id={} in CFS", id),
                table.description(),
            ));
        }
    }
    if version.min(table_version) >= VERSION_CHECKSUM {
        codec_util::check_footer(&mut table)?;
    } else {
        codec_util::check_eof(&table)?;
    }
    table.close()?;
    debug!(archive = file_name, entries = entries.len(), version, "opened compound archive");
    Ok(entries)
}

/// Inline entry table of archives written before the codec header existed
///
/// A non-negative first value is the entry count and ids carry the segment
/// prefix; `-1` is followed by the count and ids are already stripped.
fn read_legacy_entries(
    stream: &mut Box<dyn IndexInput>,
    first: i32,
) -> Result<HashMap<String, FileEntry>> {
    let (count, strip_segment) = if first < FORMAT_PRE_VERSION {
        if first < FORMAT_NO_SEGMENT_PREFIX {
            return Err(StoreError::corrupt(
                format!(
                    "Incompatible format version: {} expected >= {}",
                    first, FORMAT_NO_SEGMENT_PREFIX
                ),
                stream.description(),
            ));
        }
        (stream.read_vint()? as usize, false)
    } else {
        (first as usize, true)
    };

    let stream_length = stream.length();
    let mut entries: HashMap<String, FileEntry> = HashMap::with_capacity(count.min(1024));
    let mut previous: Option<String> = None;
    for _ in 0..count {
        let offset = stream.read_i64()?;
        if offset < 0 || offset as u64 > stream_length {
            return Err(StoreError::corrupt(
                format!("Invalid CFS entry offset: {}", offset),
                stream.description(),
            ));
        }
        let offset = offset as u64;
        let raw_id = stream.read_string()?;
        let id = if strip_segment {
            strip_segment_name(&raw_id).to_string()
        } else {
            raw_id
        };
        if let Some(prev) = previous.take() {
            close_entry(&mut entries, &prev, offset, stream.description())?;
        }
        let entry = FileEntry { offset, length: 0 };
        if entries.insert(id.clone(), entry).is_some() {
            return Err(StoreError::corrupt(
                format!("Duplicate cfs entry id={} in CFS", id),
                stream.description(),
            ));
        }
        previous = Some(id);
    }
    if let Some(prev) = previous {
        close_entry(&mut entries, &prev, stream_length, stream.description())?;
    }
    debug!(entries = entries.len(), strip_segment, "opened legacy compound archive");
    Ok(entries)
}

/// Set an entry's length from the offset where the next one starts
fn close_entry(
    entries: &mut HashMap<String, FileEntry>,
    id: &str,
    end: u64,
    resource: &str,
) -> Result<()> {
    if let Some(entry) = entries.get_mut(id) {
        if end < entry.offset {
            return Err(StoreError::corrupt(
                format!("CFS entry {} ends at {} before its offset {}", id, end, entry.offset),
                resource,
            ));
        }
        entry.length = end - entry.offset;
    }
    Ok(())
}
