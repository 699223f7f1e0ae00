//! Buffered streams over raw random-access backends
//!
//! Backends implement only [`RawInput`] / [`RawOutput`]; the windowing,
//! typed fast paths, clone and slice bookkeeping live here once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use super::data_io::{
    decode_vint, decode_vlong, invalid_vint, invalid_vlong, DataInput, DataOutput,
};
use super::index_io::{IndexInput, IndexOutput};
use super::io_context::{IoContext, MIN_BUFFER_SIZE};
use crate::error::StoreError;
use crate::Result;

/// Positional read access to a window of a backing file
///
/// Positions are relative to the window, so a slice is just another
/// instance of the same type with a narrower window.
pub trait RawInput: Clone + Send + Sync + 'static {
    /// Fill `buf` from `pos`, failing with `EndOfFile` past the window end
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<()>;

    fn length(&self) -> u64;

    /// Narrow the window; bounds are checked by the caller
    fn slice(&self, offset: u64, length: u64) -> Self;
}

/// Sequential sink receiving flushed buffer contents
pub trait RawOutput: Send {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()>;
}

fn check_buffer_size(size: usize) -> Result<()> {
    if size < MIN_BUFFER_SIZE {
        return Err(StoreError::InvalidArgument(format!(
            "buffer size must be at least {} (got {})",
            MIN_BUFFER_SIZE, size
        )));
    }
    Ok(())
}

pub struct BufferedInput<R: RawInput> {
    description: String,
    raw: R,
    buffer: Vec<u8>,
    buffer_size: usize,
    /// File position of `buffer[0]`
    buffer_start: u64,
    buffer_len: usize,
    buffer_pos: usize,
    is_clone: bool,
    closed: Arc<AtomicBool>,
    /// Closed flag of the original this clone or slice came from
    origin_closed: Option<Arc<AtomicBool>>,
}

impl<R: RawInput> BufferedInput<R> {
    pub fn new(description: impl Into<String>, raw: R, context: &IoContext) -> Self {
        Self::unchecked(description.into(), raw, context.buffer_size())
    }

    pub fn with_buffer_size(
        description: impl Into<String>,
        raw: R,
        buffer_size: usize,
    ) -> Result<Self> {
        check_buffer_size(buffer_size)?;
        Ok(Self::unchecked(description.into(), raw, buffer_size))
    }

    fn unchecked(description: String, raw: R, buffer_size: usize) -> Self {
        Self {
            description,
            raw,
            buffer: Vec::new(),
            buffer_size,
            buffer_start: 0,
            buffer_len: 0,
            buffer_pos: 0,
            is_clone: false,
            closed: Arc::new(AtomicBool::new(false)),
            origin_closed: None,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn ensure_open(&self) -> Result<()> {
        let origin_closed = self
            .origin_closed
            .as_ref()
            .map_or(false, |c| c.load(Ordering::Acquire));
        if origin_closed || self.closed.load(Ordering::Acquire) {
            return Err(StoreError::AlreadyClosed(self.description.clone()));
        }
        Ok(())
    }

    fn origin_flag(&self) -> Arc<AtomicBool> {
        self.origin_closed
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.closed))
    }

    fn derive(&self, description: String, raw: R, start: u64) -> Self {
        Self {
            description,
            raw,
            buffer: Vec::new(),
            buffer_size: self.buffer_size,
            buffer_start: start,
            buffer_len: 0,
            buffer_pos: 0,
            is_clone: true,
            closed: Arc::new(AtomicBool::new(false)),
            origin_closed: Some(self.origin_flag()),
        }
    }

    #[inline]
    fn available(&self) -> usize {
        self.buffer_len - self.buffer_pos
    }

    fn refill(&mut self) -> Result<()> {
        self.ensure_open()?;
        let start = self.buffer_start + self.buffer_pos as u64;
        let length = self.raw.length();
        if start >= length {
            return Err(StoreError::eof(self.description.clone()));
        }
        let n = (length - start).min(self.buffer_size as u64) as usize;
        if self.buffer.len() < self.buffer_size {
            self.buffer = vec![0u8; self.buffer_size];
        }
        self.raw.read_at(start, &mut self.buffer[..n])?;
        self.buffer_start = start;
        self.buffer_len = n;
        self.buffer_pos = 0;
        Ok(())
    }
}

impl<R: RawInput> DataInput for BufferedInput<R> {
    fn read_byte(&mut self) -> Result<u8> {
        if self.buffer_pos >= self.buffer_len {
            self.refill()?;
        } else {
            self.ensure_open()?;
        }
        let b = self.buffer[self.buffer_pos];
        self.buffer_pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ensure_open()?;
        let available = self.available();
        if buf.len() <= available {
            buf.copy_from_slice(&self.buffer[self.buffer_pos..self.buffer_pos + buf.len()]);
            self.buffer_pos += buf.len();
            return Ok(());
        }

        if available > 0 {
            buf[..available].copy_from_slice(&self.buffer[self.buffer_pos..self.buffer_len]);
            self.buffer_pos += available;
        }
        let rest = &mut buf[available..];

        if rest.len() < self.buffer_size {
            self.refill()?;
            if rest.len() > self.buffer_len {
                self.buffer_pos = self.buffer_len;
                return Err(StoreError::eof(self.description.clone()));
            }
            rest.copy_from_slice(&self.buffer[..rest.len()]);
            self.buffer_pos = rest.len();
        } else {
            // large span goes straight to the backend, bypassing the buffer
            let start = self.buffer_start + self.buffer_pos as u64;
            if start + rest.len() as u64 > self.raw.length() {
                return Err(StoreError::eof(self.description.clone()));
            }
            self.raw.read_at(start, rest)?;
            self.buffer_start = start + rest.len() as u64;
            self.buffer_pos = 0;
            self.buffer_len = 0;
        }
        Ok(())
    }

    fn resource(&self) -> &str {
        &self.description
    }

    fn read_i16(&mut self) -> Result<i16> {
        if self.available() >= 2 {
            self.ensure_open()?;
            let p = self.buffer_pos;
            self.buffer_pos += 2;
            return Ok(i16::from_be_bytes([self.buffer[p], self.buffer[p + 1]]));
        }
        let mut b = [0u8; 2];
        self.read_bytes(&mut b)?;
        Ok(i16::from_be_bytes(b))
    }

    fn read_i32(&mut self) -> Result<i32> {
        if self.available() >= 4 {
            self.ensure_open()?;
            let p = self.buffer_pos;
            let mut b = [0u8; 4];
            b.copy_from_slice(&self.buffer[p..p + 4]);
            self.buffer_pos += 4;
            return Ok(i32::from_be_bytes(b));
        }
        let mut b = [0u8; 4];
        self.read_bytes(&mut b)?;
        Ok(i32::from_be_bytes(b))
    }

    fn read_i64(&mut self) -> Result<i64> {
        if self.available() >= 8 {
            self.ensure_open()?;
            let p = self.buffer_pos;
            let mut b = [0u8; 8];
            b.copy_from_slice(&self.buffer[p..p + 8]);
            self.buffer_pos += 8;
            return Ok(i64::from_be_bytes(b));
        }
        let mut b = [0u8; 8];
        self.read_bytes(&mut b)?;
        Ok(i64::from_be_bytes(b))
    }

    fn read_vint(&mut self) -> Result<u32> {
        let decoded = if self.available() >= 5 {
            self.ensure_open()?;
            let buffer = &self.buffer;
            let mut p = self.buffer_pos;
            let decoded = decode_vint(|| {
                let b = buffer[p];
                p += 1;
                Ok(b)
            })?;
            self.buffer_pos = p;
            decoded
        } else {
            decode_vint(|| self.read_byte())?
        };
        decoded.ok_or_else(|| invalid_vint(&self.description))
    }

    fn read_vlong(&mut self) -> Result<u64> {
        let decoded = if self.available() >= 9 {
            self.ensure_open()?;
            let buffer = &self.buffer;
            let mut p = self.buffer_pos;
            let decoded = decode_vlong(|| {
                let b = buffer[p];
                p += 1;
                Ok(b)
            })?;
            self.buffer_pos = p;
            decoded
        } else {
            decode_vlong(|| self.read_byte())?
        };
        decoded.ok_or_else(|| invalid_vlong(&self.description))
    }

    fn skip_bytes(&mut self, num_bytes: u64) -> Result<()> {
        let target = self.file_pointer() + num_bytes;
        self.seek(target)
    }
}

impl<R: RawInput> IndexInput for BufferedInput<R> {
    fn description(&self) -> &str {
        &self.description
    }

    fn file_pointer(&self) -> u64 {
        self.buffer_start + self.buffer_pos as u64
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.ensure_open()?;
        if pos >= self.buffer_start && pos < self.buffer_start + self.buffer_len as u64 {
            self.buffer_pos = (pos - self.buffer_start) as usize;
            return Ok(());
        }
        if pos > self.raw.length() {
            return Err(StoreError::eof(format!(
                "{}: seek to {} past length {}",
                self.description,
                pos,
                self.raw.length()
            )));
        }
        self.buffer_start = pos;
        self.buffer_pos = 0;
        self.buffer_len = 0;
        Ok(())
    }

    fn length(&self) -> u64 {
        self.raw.length()
    }

    fn clone_input(&self) -> Result<Box<dyn IndexInput>> {
        self.ensure_open()?;
        Ok(Box::new(self.derive(
            self.description.clone(),
            self.raw.clone(),
            self.file_pointer(),
        )))
    }

    fn slice(&self, description: &str, offset: u64, length: u64) -> Result<Box<dyn IndexInput>> {
        self.ensure_open()?;
        if self.is_clone {
            return Err(StoreError::IllegalState(format!(
                "cannot slice {}: it is already a clone or slice",
                self.description
            )));
        }
        let end = offset.checked_add(length);
        if end.map_or(true, |end| end > self.raw.length()) {
            return Err(StoreError::InvalidArgument(format!(
                "slice offset={} length={} is out of bounds for {} (length {})",
                offset,
                length,
                self.description,
                self.raw.length()
            )));
        }
        Ok(Box::new(self.derive(
            format!("{} in {}", description, self.description),
            self.raw.slice(offset, length),
            0,
        )))
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.buffer = Vec::new();
        self.buffer_start += self.buffer_pos as u64;
        self.buffer_pos = 0;
        self.buffer_len = 0;
        Ok(())
    }
}

pub struct BufferedOutput<W: RawOutput> {
    name: String,
    sink: W,
    buffer: Vec<u8>,
    buffer_size: usize,
    /// Bytes already handed to the sink
    flushed: u64,
    crc: crc32fast::Hasher,
    closed: bool,
}

impl<W: RawOutput> BufferedOutput<W> {
    pub fn new(name: impl Into<String>, sink: W, buffer_size: usize) -> Result<Self> {
        check_buffer_size(buffer_size)?;
        Ok(Self::unchecked(name.into(), sink, buffer_size))
    }

    /// Buffer sized for the declared intent; never fails
    pub fn with_context(name: impl Into<String>, sink: W, context: &IoContext) -> Self {
        Self::unchecked(name.into(), sink, context.buffer_size())
    }

    fn unchecked(name: String, sink: W, buffer_size: usize) -> Self {
        Self {
            name,
            sink,
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
            flushed: 0,
            crc: crc32fast::Hasher::new(),
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StoreError::AlreadyClosed(self.name.clone()));
        }
        Ok(())
    }

    fn write_to_sink(&mut self, bytes: &[u8]) -> Result<()> {
        self.crc.update(bytes);
        self.sink.write_all(bytes)?;
        self.flushed += bytes.len() as u64;
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let buffer = std::mem::take(&mut self.buffer);
        let result = self.write_to_sink(&buffer);
        self.buffer = buffer;
        self.buffer.clear();
        result
    }
}

impl<W: RawOutput> DataOutput for BufferedOutput<W> {
    fn write_byte(&mut self, b: u8) -> Result<()> {
        self.ensure_open()?;
        if self.buffer.len() >= self.buffer_size {
            self.flush_buffer()?;
        }
        self.buffer.push(b);
        Ok(())
    }

    fn write_bytes(&mut self, b: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let left = self.buffer_size - self.buffer.len();
        if b.len() <= left {
            self.buffer.extend_from_slice(b);
        } else if b.len() > self.buffer_size {
            self.flush_buffer()?;
            self.write_to_sink(b)?;
        } else {
            self.buffer.extend_from_slice(&b[..left]);
            self.flush_buffer()?;
            self.buffer.extend_from_slice(&b[left..]);
        }
        Ok(())
    }

    fn copy_bytes(&mut self, input: &mut dyn DataInput, num_bytes: u64) -> Result<()> {
        self.ensure_open()?;
        let mut remaining = num_bytes;
        while remaining > 0 {
            if self.buffer.len() >= self.buffer_size {
                self.flush_buffer()?;
            }
            let start = self.buffer.len();
            let step = remaining.min((self.buffer_size - start) as u64) as usize;
            self.buffer.resize(start + step, 0);
            if let Err(e) = input.read_bytes(&mut self.buffer[start..]) {
                self.buffer.truncate(start);
                return Err(e);
            }
            remaining -= step as u64;
        }
        Ok(())
    }
}

impl<W: RawOutput> IndexOutput for BufferedOutput<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn file_pointer(&self) -> u64 {
        self.flushed + self.buffer.len() as u64
    }

    fn length(&self) -> u64 {
        self.file_pointer()
    }

    fn checksum(&mut self) -> Result<u64> {
        self.flush_buffer()?;
        Ok(self.crc.clone().finalize() as u64)
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.flush_buffer()?;
        self.sink.flush()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let flushed = self.flush_buffer();
        let closed = self.sink.close();
        flushed.and(closed)
    }
}

impl<W: RawOutput> Drop for BufferedOutput<W> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = IndexOutput::close(self) {
                warn!(output = %self.name, error = %e, "failed to close dropped output");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Window over shared bytes that counts backend reads
    #[derive(Clone)]
    pub(crate) struct CountingRaw {
        data: Arc<Vec<u8>>,
        offset: u64,
        len: u64,
        reads: Arc<AtomicUsize>,
    }

    impl CountingRaw {
        pub(crate) fn new(data: Vec<u8>) -> Self {
            let len = data.len() as u64;
            Self {
                data: Arc::new(data),
                offset: 0,
                len,
                reads: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl RawInput for CountingRaw {
        fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
            if pos + buf.len() as u64 > self.len {
                return Err(StoreError::eof("counting"));
            }
            self.reads.fetch_add(1, Ordering::SeqCst);
            let start = (self.offset + pos) as usize;
            buf.copy_from_slice(&self.data[start..start + buf.len()]);
            Ok(())
        }

        fn length(&self) -> u64 {
            self.len
        }

        fn slice(&self, offset: u64, length: u64) -> Self {
            Self {
                data: Arc::clone(&self.data),
                offset: self.offset + offset,
                len: length,
                reads: Arc::clone(&self.reads),
            }
        }
    }

    struct VecSink {
        data: Arc<parking_lot::Mutex<Vec<u8>>>,
        closes: Arc<AtomicUsize>,
    }

    impl RawOutput for VecSink {
        fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
            self.data.lock().extend_from_slice(bytes);
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pattern(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i * 7 % 253) as u8).collect()
    }

    fn input(data: Vec<u8>, buffer_size: usize) -> (BufferedInput<CountingRaw>, CountingRaw) {
        let raw = CountingRaw::new(data);
        let input = BufferedInput::with_buffer_size("test", raw.clone(), buffer_size).unwrap();
        (input, raw)
    }

    #[test]
    fn test_rejects_tiny_buffer() {
        let raw = CountingRaw::new(vec![1, 2, 3]);
        assert!(matches!(
            BufferedInput::with_buffer_size("t", raw, 4),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_seek_inside_buffer_does_no_io() {
        let (mut input, raw) = input(pattern(100), 32);
        input.read_byte().unwrap();
        assert_eq!(raw.reads(), 1);
        input.seek(20).unwrap();
        assert_eq!(input.read_byte().unwrap(), pattern(100)[20]);
        input.seek(3).unwrap();
        assert_eq!(raw.reads(), 1);

        input.seek(70).unwrap();
        assert_eq!(input.read_byte().unwrap(), pattern(100)[70]);
        assert_eq!(raw.reads(), 2);
    }

    #[test]
    fn test_large_read_bypasses_buffer() {
        let data = pattern(1000);
        let (mut input, raw) = input(data.clone(), 64);
        let mut head = [0u8; 10];
        input.read_bytes(&mut head).unwrap();
        assert_eq!(raw.reads(), 1);

        let mut big = vec![0u8; 500];
        input.read_bytes(&mut big).unwrap();
        // remainder of the window, then one direct backend read
        assert_eq!(raw.reads(), 2);
        assert_eq!(&big[..], &data[10..510]);
        assert_eq!(input.file_pointer(), 510);
        assert_eq!(input.read_byte().unwrap(), data[510]);
    }

    #[test]
    fn test_typed_reads_across_buffer_edges() {
        let mut out: Vec<u8> = Vec::new();
        for i in 0..200u32 {
            out.write_vint(i * 1_000_003).unwrap();
            out.write_i64(-(i as i64)).unwrap();
            out.write_vlong((i as u64) << 40).unwrap();
            out.write_i16(i as i16).unwrap();
        }
        let (mut input, _) = input(out, 13);
        for i in 0..200u32 {
            assert_eq!(input.read_vint().unwrap(), i * 1_000_003);
            assert_eq!(input.read_i64().unwrap(), -(i as i64));
            assert_eq!(input.read_vlong().unwrap(), (i as u64) << 40);
            assert_eq!(input.read_i16().unwrap(), i as i16);
        }
        assert!(matches!(input.read_byte(), Err(StoreError::EndOfFile { .. })));
    }

    #[test]
    fn test_seek_bounds() {
        let (mut input, _) = input(pattern(50), 16);
        input.seek(50).unwrap();
        assert!(matches!(input.read_byte(), Err(StoreError::EndOfFile { .. })));
        assert!(matches!(input.seek(51), Err(StoreError::EndOfFile { .. })));
    }

    #[test]
    fn test_clones_have_independent_cursors() {
        let data = pattern(300);
        let (mut input, _) = input(data.clone(), 16);
        input.seek(40).unwrap();
        let mut a = input.clone_input().unwrap();
        let mut b = input.clone_input().unwrap();
        assert_eq!(a.file_pointer(), 40);

        a.seek(5).unwrap();
        b.seek(250).unwrap();
        assert_eq!(a.read_byte().unwrap(), data[5]);
        assert_eq!(b.read_byte().unwrap(), data[250]);
        assert_eq!(input.read_byte().unwrap(), data[40]);
        assert_eq!(a.file_pointer(), 6);
        assert_eq!(b.file_pointer(), 251);
    }

    #[test]
    fn test_slice_rules() {
        let data = pattern(200);
        let (input, _) = input(data.clone(), 16);
        let mut slice = input.slice("part", 50, 30).unwrap();
        assert_eq!(slice.length(), 30);
        assert_eq!(slice.read_byte().unwrap(), data[50]);
        slice.seek(29).unwrap();
        assert_eq!(slice.read_byte().unwrap(), data[79]);
        assert!(slice.read_byte().is_err());

        assert!(matches!(
            slice.slice("nested", 0, 1),
            Err(StoreError::IllegalState(_))
        ));
        let clone = input.clone_input().unwrap();
        assert!(matches!(
            clone.slice("nested", 0, 1),
            Err(StoreError::IllegalState(_))
        ));
        assert!(matches!(
            input.slice("oob", 190, 11),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_close_propagates_from_original_only() {
        let (mut input, _) = input(pattern(64), 16);
        let mut clone = input.clone_input().unwrap();
        let mut other = input.clone_input().unwrap();

        clone.close().unwrap();
        clone.close().unwrap();
        assert!(matches!(clone.read_byte(), Err(StoreError::AlreadyClosed(_))));
        assert!(other.read_byte().is_ok());
        assert!(input.read_byte().is_ok());

        input.close().unwrap();
        input.close().unwrap();
        assert!(matches!(input.read_byte(), Err(StoreError::AlreadyClosed(_))));
        assert!(matches!(other.read_byte(), Err(StoreError::AlreadyClosed(_))));
    }

    #[test]
    fn test_output_buffers_and_checksums() {
        let data = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let closes = Arc::new(AtomicUsize::new(0));
        let sink = VecSink {
            data: Arc::clone(&data),
            closes: Arc::clone(&closes),
        };
        let mut out = BufferedOutput::new("out", sink, 16).unwrap();
        let payload = pattern(100);
        out.write_bytes(&payload[..5]).unwrap();
        out.write_bytes(&payload[5..20]).unwrap();
        out.write_bytes(&payload[20..]).unwrap();
        assert_eq!(out.file_pointer(), 100);

        let mut expected = crc32fast::Hasher::new();
        expected.update(&payload);
        assert_eq!(out.checksum().unwrap(), expected.finalize() as u64);

        out.close().unwrap();
        out.close().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(&*data.lock(), &payload);
        assert!(matches!(out.write_byte(1), Err(StoreError::AlreadyClosed(_))));
    }

    #[test]
    fn test_output_copy_bytes_from_input() {
        let data = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = VecSink {
            data: Arc::clone(&data),
            closes: Arc::new(AtomicUsize::new(0)),
        };
        let source = pattern(333);
        let (mut input, _) = input(source.clone(), 32);
        let mut out = BufferedOutput::new("copy", sink, 64).unwrap();
        out.write_byte(9).unwrap();
        out.copy_bytes(&mut input, 333).unwrap();
        out.close().unwrap();

        let written = data.lock();
        assert_eq!(written[0], 9);
        assert_eq!(&written[1..], &source[..]);
    }

    #[test]
    fn test_dropped_output_is_closed() {
        let closes = Arc::new(AtomicUsize::new(0));
        let sink = VecSink {
            data: Arc::new(parking_lot::Mutex::new(Vec::new())),
            closes: Arc::clone(&closes),
        };
        {
            let mut out = BufferedOutput::new("dropped", sink, 16).unwrap();
            out.write_byte(1).unwrap();
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
