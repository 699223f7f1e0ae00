//! Versioned headers and checksummed footers for persisted files
//!
//! Header: `i32 CODEC_MAGIC`, codec name string, `i32 version`.
//! Footer: `i32 FOOTER_MAGIC`, `i32 algorithm id` (0 = CRC32), `i64 checksum`.

use super::checksum_input::ChecksumIndexInput;
use super::data_io::{vint_len, DataInput, DataOutput};
use super::index_io::{IndexInput, IndexOutput};
use crate::error::StoreError;
use crate::Result;

pub const CODEC_MAGIC: i32 = 0x3fd7_6c17;
pub const FOOTER_MAGIC: i32 = !CODEC_MAGIC;
pub const FOOTER_LENGTH: u64 = 16;

const CRC32_ALGORITHM: i32 = 0;
const MAX_CODEC_NAME_LEN: usize = 127;

pub fn write_header<O: DataOutput + ?Sized>(out: &mut O, codec: &str, version: i32) -> Result<()> {
    if codec.len() > MAX_CODEC_NAME_LEN || !codec.is_ascii() {
        return Err(StoreError::InvalidArgument(format!(
            "codec name must be simple ASCII, less than 128 characters in length [got {}]",
            codec
        )));
    }
    out.write_i32(CODEC_MAGIC)?;
    out.write_string(codec)?;
    out.write_i32(version)
}

/// Bytes written by `write_header` for `codec`
pub fn header_length(codec: &str) -> u64 {
    (8 + vint_len(codec.len() as u32) + codec.len()) as u64
}

/// Validate a header and return its version
pub fn check_header<I: DataInput + ?Sized>(
    input: &mut I,
    codec: &str,
    min: i32,
    max: i32,
) -> Result<i32> {
    let actual = input.read_i32()?;
    if actual != CODEC_MAGIC {
        return Err(StoreError::corrupt(
            format!(
                "codec header mismatch: actual header={:#x} vs expected header={:#x}",
                actual, CODEC_MAGIC
            ),
            input.resource(),
        ));
    }
    check_header_no_magic(input, codec, min, max)
}

/// Like `check_header`, for callers that already consumed the magic
pub fn check_header_no_magic<I: DataInput + ?Sized>(
    input: &mut I,
    codec: &str,
    min: i32,
    max: i32,
) -> Result<i32> {
    let actual_codec = input.read_string()?;
    if actual_codec != codec {
        return Err(StoreError::corrupt(
            format!(
                "codec mismatch: actual codec={} vs expected codec={}",
                actual_codec, codec
            ),
            input.resource(),
        ));
    }
    let version = input.read_i32()?;
    if version < min {
        return Err(StoreError::IndexFormatTooOld {
            resource: input.resource().to_string(),
            version,
            min,
            max,
        });
    }
    if version > max {
        return Err(StoreError::IndexFormatTooNew {
            resource: input.resource().to_string(),
            version,
            min,
            max,
        });
    }
    Ok(version)
}

/// Append the footer carrying the output's running checksum
pub fn write_footer<O: IndexOutput + ?Sized>(out: &mut O) -> Result<()> {
    out.write_i32(FOOTER_MAGIC)?;
    out.write_i32(CRC32_ALGORITHM)?;
    let checksum = out.checksum()?;
    out.write_i64(checksum as i64)
}

fn validate_footer<I: DataInput + ?Sized>(input: &mut I) -> Result<()> {
    let magic = input.read_i32()?;
    if magic != FOOTER_MAGIC {
        return Err(StoreError::corrupt(
            format!(
                "codec footer mismatch: actual footer={:#x} vs expected footer={:#x}",
                magic, FOOTER_MAGIC
            ),
            input.resource(),
        ));
    }
    let algorithm = input.read_i32()?;
    if algorithm != CRC32_ALGORITHM {
        return Err(StoreError::corrupt(
            format!("codec footer mismatch: unknown algorithmID: {}", algorithm),
            input.resource(),
        ));
    }
    Ok(())
}

/// Validate the footer at the current position against the running checksum
pub fn check_footer(input: &mut ChecksumIndexInput) -> Result<u64> {
    let remaining = input.length().saturating_sub(input.file_pointer());
    if remaining != FOOTER_LENGTH {
        return Err(StoreError::corrupt(
            format!(
                "did not read all bytes from file: read {} vs size {}",
                input.file_pointer(),
                input.length()
            ),
            input.description(),
        ));
    }
    validate_footer(input)?;
    let actual = input.checksum();
    let expected = input.read_i64()? as u64;
    if expected != actual {
        return Err(StoreError::corrupt(
            format!(
                "checksum failed (hardware problem?) : expected={:x} actual={:x}",
                expected, actual
            ),
            input.description(),
        ));
    }
    if input.file_pointer() != input.length() {
        return Err(StoreError::corrupt(
            "did not read all bytes from file",
            input.description(),
        ));
    }
    Ok(actual)
}

/// Read the stored checksum without verifying the file body
pub fn retrieve_checksum<I: IndexInput + ?Sized>(input: &mut I) -> Result<u64> {
    if input.length() < FOOTER_LENGTH {
        return Err(StoreError::corrupt(
            format!("file is too short to contain a footer: {}", input.length()),
            input.description(),
        ));
    }
    input.seek(input.length() - FOOTER_LENGTH)?;
    validate_footer(input)?;
    Ok(input.read_i64()? as u64)
}

/// Assert every byte of the input was consumed
pub fn check_eof(input: &ChecksumIndexInput) -> Result<()> {
    if input.file_pointer() != input.length() {
        return Err(StoreError::corrupt(
            format!(
                "did not read all bytes from file: read {} vs size {}",
                input.file_pointer(),
                input.length()
            ),
            input.description(),
        ));
    }
    Ok(())
}

/// Recompute the checksum of the whole file and compare it with its footer
pub fn checksum_entire_file(input: Box<dyn IndexInput>) -> Result<u64> {
    let mut input = ChecksumIndexInput::new(input);
    if input.length() < FOOTER_LENGTH {
        return Err(StoreError::corrupt(
            format!("file is too short to contain a footer: {}", input.length()),
            input.description(),
        ));
    }
    input.seek(input.length() - FOOTER_LENGTH)?;
    let checksum = check_footer(&mut input)?;
    input.close()?;
    Ok(checksum)
}
