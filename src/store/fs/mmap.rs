use std::fs::File;
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::StoreError;
use crate::store::buffered::RawInput;
use crate::Result;

/// Window over a read-only memory map; empty files are not mapped
#[derive(Clone)]
pub struct MmapRawInput {
    mmap: Option<Arc<Mmap>>,
    offset: usize,
    length: usize,
}

impl MmapRawInput {
    pub fn open(file: &File) -> Result<Self> {
        let length = file.metadata()?.len();
        if length == 0 {
            return Ok(Self {
                mmap: None,
                offset: 0,
                length: 0,
            });
        }
        let length = usize::try_from(length).map_err(|_| {
            StoreError::Unsupported(format!("file of {} bytes is too large to map", length))
        })?;
        // SAFETY: files are immutable once their writer has closed; a file
        // being rewritten under a live reader is a caller error.
        let mmap = unsafe { Mmap::map(file)? };
        Ok(Self {
            mmap: Some(Arc::new(mmap)),
            offset: 0,
            length,
        })
    }
}

impl RawInput for MmapRawInput {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let end = pos as usize + buf.len();
        if end > self.length {
            return Err(StoreError::eof("MMapIndexInput"));
        }
        if let Some(mmap) = &self.mmap {
            let start = self.offset + pos as usize;
            buf.copy_from_slice(&mmap[start..start + buf.len()]);
        }
        Ok(())
    }

    fn length(&self) -> u64 {
        self.length as u64
    }

    fn slice(&self, offset: u64, length: u64) -> Self {
        Self {
            mmap: self.mmap.clone(),
            offset: self.offset + offset as usize,
            length: length as usize,
        }
    }
}
