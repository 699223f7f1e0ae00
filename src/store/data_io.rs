//! Typed primitive encoding shared by every reader and writer
//!
//! Wire format:
//! - fixed-width integers are big-endian
//! - `vint`/`vlong` carry 7 payload bits per byte, high bit set when more
//!   bytes follow; a vint spans at most 5 bytes, a vlong at most 9
//! - strings are a vint byte length followed by raw UTF-8
//! - string maps and sets are an `i32` count followed by the strings

use std::collections::{BTreeMap, BTreeSet};

use crate::error::StoreError;
use crate::Result;

/// Scratch size used by `copy_bytes` and `skip_bytes`
pub const COPY_BUFFER_SIZE: usize = 16 * 1024;

const SKIP_BUFFER_SIZE: usize = 1024;

/// Sequential typed reads
pub trait DataInput {
    fn read_byte(&mut self) -> Result<u8>;

    /// Fill `buf` completely or fail with `EndOfFile`
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Name used in corruption reports
    fn resource(&self) -> &str {
        "DataInput"
    }

    fn read_i16(&mut self) -> Result<i16> {
        let mut b = [0u8; 2];
        self.read_bytes(&mut b)?;
        Ok(i16::from_be_bytes(b))
    }

    fn read_i32(&mut self) -> Result<i32> {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b)?;
        Ok(i32::from_be_bytes(b))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b)?;
        Ok(i64::from_be_bytes(b))
    }

    fn read_vint(&mut self) -> Result<u32> {
        match decode_vint(|| self.read_byte())? {
            Some(v) => Ok(v),
            None => Err(invalid_vint(self.resource())),
        }
    }

    fn read_vlong(&mut self) -> Result<u64> {
        match decode_vlong(|| self.read_byte())? {
            Some(v) => Ok(v),
            None => Err(invalid_vlong(self.resource())),
        }
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_vint()? as usize;
        let mut bytes = vec![0u8; len];
        self.read_bytes(&mut bytes)?;
        String::from_utf8(bytes).map_err(|e| {
            StoreError::corrupt(format!("invalid UTF-8 in string: {}", e), self.resource())
        })
    }

    fn read_string_string_map(&mut self) -> Result<BTreeMap<String, String>> {
        let count = self.read_count()?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = self.read_string()?;
            let value = self.read_string()?;
            map.insert(key, value);
        }
        Ok(map)
    }

    fn read_string_set(&mut self) -> Result<BTreeSet<String>> {
        let count = self.read_count()?;
        let mut set = BTreeSet::new();
        for _ in 0..count {
            set.insert(self.read_string()?);
        }
        Ok(set)
    }

    /// Fixed-width collection count; negative counts are corrupt
    fn read_count(&mut self) -> Result<usize> {
        let count = self.read_i32()?;
        if count < 0 {
            return Err(StoreError::corrupt(
                format!("negative collection count: {}", count),
                self.resource(),
            ));
        }
        Ok(count as usize)
    }

    fn skip_bytes(&mut self, num_bytes: u64) -> Result<()> {
        let mut scratch = [0u8; SKIP_BUFFER_SIZE];
        let mut remaining = num_bytes;
        while remaining > 0 {
            let step = remaining.min(SKIP_BUFFER_SIZE as u64) as usize;
            self.read_bytes(&mut scratch[..step])?;
            remaining -= step as u64;
        }
        Ok(())
    }
}

/// Sequential typed writes
pub trait DataOutput {
    fn write_byte(&mut self, b: u8) -> Result<()>;

    fn write_bytes(&mut self, b: &[u8]) -> Result<()>;

    fn write_i16(&mut self, v: i16) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    fn write_i32(&mut self, v: i32) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    fn write_i64(&mut self, v: i64) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    fn write_vint(&mut self, v: u32) -> Result<()> {
        let mut buf = [0u8; 5];
        let len = encode_vint(v, &mut buf);
        self.write_bytes(&buf[..len])
    }

    /// Values above `i64::MAX` do not fit the 9-byte encoding
    fn write_vlong(&mut self, v: u64) -> Result<()> {
        if v > i64::MAX as u64 {
            return Err(StoreError::InvalidArgument(format!(
                "cannot write vLong larger than 2^63-1: {}",
                v
            )));
        }
        let mut buf = [0u8; 9];
        let len = encode_vlong(v, &mut buf);
        self.write_bytes(&buf[..len])
    }

    fn write_string(&mut self, s: &str) -> Result<()> {
        if s.len() > i32::MAX as usize {
            return Err(StoreError::InvalidArgument(format!(
                "string of {} bytes is too long to encode",
                s.len()
            )));
        }
        self.write_vint(s.len() as u32)?;
        self.write_bytes(s.as_bytes())
    }

    fn write_string_string_map(&mut self, map: &BTreeMap<String, String>) -> Result<()> {
        self.write_count(map.len())?;
        for (key, value) in map {
            self.write_string(key)?;
            self.write_string(value)?;
        }
        Ok(())
    }

    fn write_string_set(&mut self, set: &BTreeSet<String>) -> Result<()> {
        self.write_count(set.len())?;
        for value in set {
            self.write_string(value)?;
        }
        Ok(())
    }

    fn write_count(&mut self, count: usize) -> Result<()> {
        let count = i32::try_from(count).map_err(|_| {
            StoreError::InvalidArgument(format!("collection of {} entries is too large", count))
        })?;
        self.write_i32(count)
    }

    /// Copy exactly `num_bytes` from `input` through a stack scratch buffer
    fn copy_bytes(&mut self, input: &mut dyn DataInput, num_bytes: u64) -> Result<()> {
        let mut scratch = [0u8; COPY_BUFFER_SIZE];
        let mut remaining = num_bytes;
        while remaining > 0 {
            let step = remaining.min(COPY_BUFFER_SIZE as u64) as usize;
            input.read_bytes(&mut scratch[..step])?;
            self.write_bytes(&scratch[..step])?;
            remaining -= step as u64;
        }
        Ok(())
    }
}

/// Decode a vint from a byte source; `None` when the encoding is malformed
pub(crate) fn decode_vint(mut next: impl FnMut() -> Result<u8>) -> Result<Option<u32>> {
    let mut value = 0u32;
    for shift in [0u32, 7, 14, 21] {
        let b = next()?;
        value |= ((b & 0x7F) as u32) << shift;
        if b & 0x80 == 0 {
            return Ok(Some(value));
        }
    }
    // fifth byte may only carry the top four bits
    let b = next()?;
    if b & 0xF0 != 0 {
        return Ok(None);
    }
    Ok(Some(value | ((b as u32) << 28)))
}

pub(crate) fn decode_vlong(mut next: impl FnMut() -> Result<u8>) -> Result<Option<u64>> {
    let mut value = 0u64;
    for shift in (0u32..56).step_by(7) {
        let b = next()?;
        value |= ((b & 0x7F) as u64) << shift;
        if b & 0x80 == 0 {
            return Ok(Some(value));
        }
    }
    let b = next()?;
    if b & 0x80 != 0 {
        return Ok(None);
    }
    Ok(Some(value | ((b as u64) << 56)))
}

pub(crate) fn invalid_vint(resource: &str) -> StoreError {
    StoreError::corrupt("Invalid vInt detected (too many bits)", resource)
}

pub(crate) fn invalid_vlong(resource: &str) -> StoreError {
    StoreError::corrupt("Invalid vLong detected (negative values disallowed)", resource)
}

/// Encode `v` into `buf`, returning the number of bytes used
pub fn encode_vint(mut v: u32, buf: &mut [u8; 5]) -> usize {
    let mut i = 0;
    while v & !0x7F != 0 {
        buf[i] = ((v & 0x7F) | 0x80) as u8;
        v >>= 7;
        i += 1;
    }
    buf[i] = v as u8;
    i + 1
}

pub fn encode_vlong(mut v: u64, buf: &mut [u8; 9]) -> usize {
    let mut i = 0;
    while v & !0x7F != 0 {
        buf[i] = ((v & 0x7F) | 0x80) as u8;
        v >>= 7;
        i += 1;
    }
    buf[i] = v as u8;
    i + 1
}

/// Number of bytes `v` occupies as a vint
pub fn vint_len(v: u32) -> usize {
    let bits = 32 - v.leading_zeros().min(31);
    ((bits + 6) / 7) as usize
}

impl<T: DataInput + ?Sized> DataInput for Box<T> {
    fn read_byte(&mut self) -> Result<u8> {
        (**self).read_byte()
    }
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).read_bytes(buf)
    }
    fn resource(&self) -> &str {
        (**self).resource()
    }
    fn read_i16(&mut self) -> Result<i16> {
        (**self).read_i16()
    }
    fn read_i32(&mut self) -> Result<i32> {
        (**self).read_i32()
    }
    fn read_i64(&mut self) -> Result<i64> {
        (**self).read_i64()
    }
    fn read_vint(&mut self) -> Result<u32> {
        (**self).read_vint()
    }
    fn read_vlong(&mut self) -> Result<u64> {
        (**self).read_vlong()
    }
    fn skip_bytes(&mut self, num_bytes: u64) -> Result<()> {
        (**self).skip_bytes(num_bytes)
    }
}

impl<T: DataOutput + ?Sized> DataOutput for Box<T> {
    fn write_byte(&mut self, b: u8) -> Result<()> {
        (**self).write_byte(b)
    }
    fn write_bytes(&mut self, b: &[u8]) -> Result<()> {
        (**self).write_bytes(b)
    }
    fn write_i16(&mut self, v: i16) -> Result<()> {
        (**self).write_i16(v)
    }
    fn write_i32(&mut self, v: i32) -> Result<()> {
        (**self).write_i32(v)
    }
    fn write_i64(&mut self, v: i64) -> Result<()> {
        (**self).write_i64(v)
    }
    fn write_vint(&mut self, v: u32) -> Result<()> {
        (**self).write_vint(v)
    }
    fn write_vlong(&mut self, v: u64) -> Result<()> {
        (**self).write_vlong(v)
    }
    fn copy_bytes(&mut self, input: &mut dyn DataInput, num_bytes: u64) -> Result<()> {
        (**self).copy_bytes(input, num_bytes)
    }
}

impl DataOutput for Vec<u8> {
    fn write_byte(&mut self, b: u8) -> Result<()> {
        self.push(b);
        Ok(())
    }

    fn write_bytes(&mut self, b: &[u8]) -> Result<()> {
        self.extend_from_slice(b);
        Ok(())
    }
}

/// Reads typed values out of a borrowed byte slice
#[derive(Clone, Debug)]
pub struct ByteArrayDataInput<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteArrayDataInput<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.bytes.len() {
            return Err(StoreError::eof("ByteArrayDataInput"));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn eof(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

impl DataInput for ByteArrayDataInput<'_> {
    fn read_byte(&mut self) -> Result<u8> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| StoreError::eof("ByteArrayDataInput"))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let end = self.pos + buf.len();
        if end > self.bytes.len() {
            return Err(StoreError::eof("ByteArrayDataInput"));
        }
        buf.copy_from_slice(&self.bytes[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    fn resource(&self) -> &str {
        "ByteArrayDataInput"
    }

    fn skip_bytes(&mut self, num_bytes: u64) -> Result<()> {
        let target = self.pos as u64 + num_bytes;
        if target > self.bytes.len() as u64 {
            return Err(StoreError::eof("ByteArrayDataInput"));
        }
        self.pos = target as usize;
        Ok(())
    }
}
