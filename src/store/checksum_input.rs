use super::checksum::{BufferedChecksum, Crc32};
use super::data_io::DataInput;
use super::index_io::IndexInput;
use crate::error::StoreError;
use crate::Result;

/// Forward-only reader accumulating CRC32 over every byte it returns
pub struct ChecksumIndexInput {
    main: Box<dyn IndexInput>,
    digest: BufferedChecksum<Crc32>,
}

impl ChecksumIndexInput {
    pub fn new(main: Box<dyn IndexInput>) -> Self {
        Self {
            main,
            digest: BufferedChecksum::new(Crc32::new()),
        }
    }

    /// Checksum of all bytes read so far
    pub fn checksum(&mut self) -> u64 {
        self.digest.value()
    }

    pub fn file_pointer(&self) -> u64 {
        self.main.file_pointer()
    }

    pub fn length(&self) -> u64 {
        self.main.length()
    }

    pub fn description(&self) -> &str {
        self.main.description()
    }

    /// Forward seeks read through the skipped bytes to keep the checksum whole
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        let current = self.file_pointer();
        if pos < current {
            return Err(StoreError::IllegalState(format!(
                "{}: cannot seek backward (current {}, requested {})",
                self.description(),
                current,
                pos
            )));
        }
        self.skip_bytes(pos - current)
    }

    pub fn close(&mut self) -> Result<()> {
        self.main.close()
    }
}

impl DataInput for ChecksumIndexInput {
    fn read_byte(&mut self) -> Result<u8> {
        let b = self.main.read_byte()?;
        self.digest.update_byte(b);
        Ok(b)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.main.read_bytes(buf)?;
        self.digest.update(buf);
        Ok(())
    }

    fn resource(&self) -> &str {
        self.main.description()
    }
}
