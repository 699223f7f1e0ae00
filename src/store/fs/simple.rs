use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::StoreError;
use crate::store::buffered::RawInput;
use crate::Result;

/// Seek-then-read under a mutex shared by every clone of the handle
#[derive(Clone)]
pub struct SimpleFsRawInput {
    file: Arc<Mutex<File>>,
    offset: u64,
    length: u64,
}

impl SimpleFsRawInput {
    pub fn open(file: File) -> Result<Self> {
        let length = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            offset: 0,
            length,
        })
    }
}

impl RawInput for SimpleFsRawInput {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        if pos + buf.len() as u64 > self.length {
            return Err(StoreError::eof("SimpleFSIndexInput"));
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(self.offset + pos))?;
        file.read_exact(buf)
            .map_err(|e| StoreError::from_io(e, "SimpleFSIndexInput"))
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn slice(&self, offset: u64, length: u64) -> Self {
        Self {
            file: Arc::clone(&self.file),
            offset: self.offset + offset,
            length,
        }
    }
}
