use std::fs::File;
use std::io;
use std::sync::Arc;

use crate::error::StoreError;
use crate::store::buffered::RawInput;
use crate::Result;

/// Positional reads; concurrent readers never contend on a cursor
#[derive(Clone)]
pub struct NioFsRawInput {
    file: Arc<File>,
    offset: u64,
    length: u64,
}

impl NioFsRawInput {
    pub fn open(file: File) -> Result<Self> {
        let length = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            offset: 0,
            length,
        })
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], pos: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, pos)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut pos: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, pos) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                pos += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl RawInput for NioFsRawInput {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        if pos + buf.len() as u64 > self.length {
            return Err(StoreError::eof("NIOFSIndexInput"));
        }
        read_exact_at(&self.file, buf, self.offset + pos)
            .map_err(|e| StoreError::from_io(e, "NIOFSIndexInput"))
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
