use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{FileEntry, DATA_CODEC, ENTRY_CODEC, VERSION_CURRENT};
use crate::error::StoreError;
use crate::store::buffered::{BufferedOutput, RawOutput};
use crate::store::codec_util;
use crate::store::data_io::DataOutput;
use crate::store::directory::Directory;
use crate::store::file_names::strip_segment_name;
use crate::store::index_io::IndexOutput;
use crate::store::io_context::IoContext;
use crate::Result;

#[derive(Debug, Clone)]
struct WriterEntry {
    entry: FileEntry,
    /// Side file holding the bytes until they are copied into the container
    temp_name: Option<String>,
}

struct WriterState {
    data_out: Option<Box<dyn IndexOutput>>,
    data_created: bool,
    entries: BTreeMap<String, WriterEntry>,
    seen_ids: HashSet<String>,
    /// Closed side files waiting to be copied in, in close order
    pending: VecDeque<String>,
    /// Side-file outputs created but not closed yet
    open_side_outputs: usize,
    closed: bool,
}

struct WriterShared {
    directory: Arc<dyn Directory>,
    data_file_name: String,
    entry_table_name: String,
    /// Held by whichever output currently writes straight into the container
    output_taken: AtomicBool,
    temp_counter: AtomicU64,
    state: Mutex<WriterState>,
}

/// Packs sub-files into one container plus a sealed entry table
pub(crate) struct CompoundWriter {
    shared: Arc<WriterShared>,
}

impl CompoundWriter {
    pub(crate) fn new(
        directory: Arc<dyn Directory>,
        data_file_name: &str,
        entry_table_name: &str,
    ) -> Self {
        Self {
            shared: Arc::new(WriterShared {
                directory,
                data_file_name: data_file_name.to_string(),
                entry_table_name: entry_table_name.to_string(),
                output_taken: AtomicBool::new(false),
                temp_counter: AtomicU64::new(0),
                state: Mutex::new(WriterState {
                    data_out: None,
                    data_created: false,
                    entries: BTreeMap::new(),
                    seen_ids: HashSet::new(),
                    pending: VecDeque::new(),
                    open_side_outputs: 0,
                    closed: false,
                }),
            }),
        }
    }

    pub(crate) fn create_output(
        &self,
        name: &str,
        context: &IoContext,
    ) -> Result<Box<dyn IndexOutput>> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.closed {
            return Err(StoreError::AlreadyClosed(shared.data_file_name.clone()));
        }
        if state.entries.contains_key(name) {
            return Err(StoreError::AlreadyExists(format!("File {} already exists", name)));
        }
        let id = strip_segment_name(name).to_string();
        if state.seen_ids.contains(&id) {
            return Err(StoreError::AlreadyExists(format!(
                "file \"{}\" maps to id \"{}\", which was already written",
                name, id
            )));
        }

        let (target, temp_name) = if shared.try_take_output() {
            match shared.take_data_output(&mut state) {
                Ok(out) => {
                    let start = out.file_pointer();
                    (Target::Direct { out: Some(out), start }, None)
                }
                Err(e) => {
                    shared.release_output();
                    return Err(e);
                }
            }
        } else {
            let n = shared.temp_counter.fetch_add(1, Ordering::Relaxed);
            let temp_name = format!("{}.{}.cfstmp", name, n);
            let out = shared.directory.create_output(&temp_name, context)?;
            debug!(file = name, temp = %temp_name, "container busy, writing side file");
            (Target::Separate { out }, Some(temp_name))
        };

        state.entries.insert(
            name.to_string(),
            WriterEntry {
                entry: FileEntry::default(),
                temp_name,
            },
        );
        state.seen_ids.insert(id);
        if matches!(target, Target::Separate { .. }) {
            state.open_side_outputs += 1;
        }
        drop(state);

        let sink = CompoundEntrySink {
            shared: Arc::clone(shared),
            name: name.to_string(),
            target,
        };
        Ok(Box::new(BufferedOutput::with_context(name, sink, context)))
    }

    /// Names of every sub-file created so far
    pub(crate) fn list_all(&self) -> Vec<String> {
        self.shared.state.lock().entries.keys().cloned().collect()
    }

    pub(crate) fn file_exists(&self, name: &str) -> bool {
        self.shared.state.lock().entries.contains_key(name)
    }

    pub(crate) fn file_length(&self, name: &str) -> Result<u64> {
        self.shared
            .state
            .lock()
            .entries
            .get(name)
            .map(|e| e.entry.length)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    /// Seal the archive: data footer first, then the entry table
    pub(crate) fn close(&self) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.closed {
            return Ok(());
        }
        if !state.pending.is_empty()
            || state.open_side_outputs > 0
            || shared.output_taken.load(Ordering::Acquire)
        {
            return Err(StoreError::IllegalState(
                "CFS has pending open files".to_string(),
            ));
        }
        state.closed = true;

        let mut data_out = shared.take_data_output(&mut state)?;
        let sealed = codec_util::write_footer(&mut *data_out);
        let closed = data_out.close();
        sealed.and(closed)?;

        let mut table = shared
            .directory
            .create_output(&shared.entry_table_name, &IoContext::DEFAULT)?;
        let written = write_entry_table(&state.entries, &mut *table);
        let closed = table.close();
        written.and(closed)?;
        debug!(
            archive = %shared.data_file_name,
            entries = state.entries.len(),
            "sealed compound archive"
        );
        Ok(())
    }
}

fn write_entry_table(
    entries: &BTreeMap<String, WriterEntry>,
    out: &mut dyn IndexOutput,
) -> Result<()> {
    codec_util::write_header(&mut *out, ENTRY_CODEC, VERSION_CURRENT)?;
    out.write_vint(entries.len() as u32)?;
    for (name, e) in entries {
        out.write_string(strip_segment_name(name))?;
        out.write_i64(e.entry.offset as i64)?;
        out.write_i64(e.entry.length as i64)?;
    }
    codec_util::write_footer(&mut *out)
}

impl WriterShared {
    fn try_take_output(&self) -> bool {
        self.output_taken
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release_output(&self) {
        self.output_taken.store(false, Ordering::Release);
    }

    /// Container output, created with its header on first use
    fn take_data_output(&self, state: &mut WriterState) -> Result<Box<dyn IndexOutput>> {
        if let Some(out) = state.data_out.take() {
            return Ok(out);
        }
        if state.data_created {
            return Err(StoreError::IllegalState(format!(
                "{} is in use by another output",
                self.data_file_name
            )));
        }
        let mut out = self
            .directory
            .create_output(&self.data_file_name, &IoContext::DEFAULT)?;
        state.data_created = true;
        codec_util::write_header(&mut *out, DATA_CODEC, VERSION_CURRENT)?;
        Ok(out)
    }

    /// Copy closed side files into the container if nobody else holds it
    fn prune_pending(&self) -> Result<()> {
        loop {
            if !self.try_take_output() {
                return Ok(());
            }
            let result = self.drain_pending();
            self.release_output();
            result?;
            // a side file may have queued up while the token was held
            if self.state.lock().pending.is_empty() {
                return Ok(());
            }
        }
    }

    fn drain_pending(&self) -> Result<()> {
        let mut state = self.state.lock();
        while let Some(name) = state.pending.pop_front() {
            if let Err(e) = self.copy_pending(&mut state, &name) {
                state.pending.push_front(name);
                return Err(e);
            }
        }
        Ok(())
    }

    fn copy_pending(&self, state: &mut WriterState, name: &str) -> Result<()> {
        let (temp_name, length) = match state.entries.get(name) {
            Some(WriterEntry {
                temp_name: Some(temp),
                entry,
            }) => (temp.clone(), entry.length),
            _ => {
                return Err(StoreError::IllegalState(format!(
                    "pending entry {} has no side file",
                    name
                )))
            }
        };
        let mut out = self.take_data_output(state)?;
        let copied = copy_into(&*self.directory, &temp_name, &mut out, length);
        state.data_out = Some(out);
        let start = copied?;

        if let Some(e) = state.entries.get_mut(name) {
            e.entry.offset = start;
            e.temp_name = None;
        }
        if let Err(e) = self.directory.delete_file(&temp_name) {
            warn!(temp = %temp_name, error = %e, "failed to delete copied side file");
        }
        debug!(file = name, offset = start, length, "copied side file into container");
        Ok(())
    }

    fn finish_direct(&self, name: &str, out: Box<dyn IndexOutput>, start: u64) -> Result<()> {
        {
            let mut state = self.state.lock();
            let length = out.file_pointer() - start;
            state.data_out = Some(out);
            if let Some(e) = state.entries.get_mut(name) {
                e.entry = FileEntry {
                    offset: start,
                    length,
                };
            }
        }
        self.release_output();
        self.prune_pending()
    }

    /// `closed` carries the side file's length, or the error closing it
    fn finish_separate(&self, name: &str, closed: Result<u64>) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.open_side_outputs = state.open_side_outputs.saturating_sub(1);
            let length = match closed {
                Ok(length) => length,
                Err(e) => {
                    // nothing usable was written, keep it out of the table
                    if let Some(entry) = state.entries.remove(name) {
                        state.seen_ids.remove(strip_segment_name(name));
                        if let Some(temp) = entry.temp_name {
                            if let Err(err) = self.directory.delete_file(&temp) {
                                warn!(temp = %temp, error = %err, "failed to delete side file");
                            }
                        }
                    }
                    return Err(e);
                }
            };
            if let Some(e) = state.entries.get_mut(name) {
                e.entry.length = length;
            }
            state.pending.push_back(name.to_string());
        }
        self.prune_pending()
    }
}

/// Append the side file to `out`, returning the offset it starts at
fn copy_into(
    directory: &dyn Directory,
    temp_name: &str,
    out: &mut Box<dyn IndexOutput>,
    length: u64,
) -> Result<u64> {
    let start = out.file_pointer();
    let mut input = directory.open_input(temp_name, &IoContext::READ_ONCE)?;
    let copied = out.copy_bytes(&mut input, length);
    let closed = input.close();
    copied?;
    closed?;
    let diff = out.file_pointer() - start;
    if diff != length {
        return Err(StoreError::IllegalState(format!(
            "Difference in the output file offsets {} does not match the original file length {}",
            diff, length
        )));
    }
    Ok(start)
}

enum Target {
    Direct {
        out: Option<Box<dyn IndexOutput>>,
        start: u64,
    },
    Separate {
        out: Box<dyn IndexOutput>,
    },
}

/// Destination of one sub-file: the shared container or a side file
struct CompoundEntrySink {
    shared: Arc<WriterShared>,
    name: String,
    target: Target,
}

impl RawOutput for CompoundEntrySink {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.target {
            Target::Direct { out: Some(out), .. } => out.write_bytes(bytes),
            Target::Direct { out: None, .. } => Err(StoreError::AlreadyClosed(self.name.clone())),
            Target::Separate { out } => out.write_bytes(bytes),
        }
    }

    fn close(&mut self) -> Result<()> {
        match &mut self.target {
            Target::Direct { out, start } => match out.take() {
                Some(out) => self.shared.finish_direct(&self.name, out, *start),
                None => Ok(()),
            },
            Target::Separate { out } => {
                let closed = out.close().map(|()| out.length());
                self.shared.finish_separate(&self.name, closed)
            }
        }
    }
}
