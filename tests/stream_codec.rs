use squidstore::store::checksum::{BufferedChecksum, Checksum, Crc32};
use squidstore::store::data_io::{vint_len, ByteArrayDataInput};
use squidstore::{DataInput, DataOutput, StoreError};
use std::collections::{BTreeMap, BTreeSet};

#[test]
fn test_varint_extremes() {
    let vints = [0u32, 1, 127, 128, 16_383, 16_384, u32::MAX >> 1, u32::MAX];
    let vlongs = [0u64, 127, 128, 1 << 35, (1 << 56) - 1, i64::MAX as u64];

    let mut buf: Vec<u8> = Vec::new();
    for &v in &vints {
        buf.write_vint(v).unwrap();
    }
    for &v in &vlongs {
        buf.write_vlong(v).unwrap();
    }

    let mut input = ByteArrayDataInput::new(&buf);
    for &v in &vints {
        let before = input.position();
        assert_eq!(input.read_vint().unwrap(), v);
        assert_eq!(input.position() - before, vint_len(v));
    }
    for &v in &vlongs {
        assert_eq!(input.read_vlong().unwrap(), v);
    }
    assert!(input.eof());
}

#[test]
fn test_encoded_sizes() {
    let mut buf: Vec<u8> = Vec::new();
    buf.write_vint(u32::MAX).unwrap();
    assert_eq!(buf.len(), 5);

    let mut buf: Vec<u8> = Vec::new();
    buf.write_vlong(i64::MAX as u64).unwrap();
    assert_eq!(buf.len(), 9);

    let mut buf: Vec<u8> = Vec::new();
    assert!(buf.write_vlong(u64::MAX).is_err());
}

#[test]
fn test_malformed_varints_are_corrupt() {
    // six continuation bytes
    let too_long = [0xffu8, 0xff, 0xff, 0xff, 0xff, 0x01];
    let err = ByteArrayDataInput::new(&too_long).read_vint().unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { .. }), "{}", err);

    // fifth byte carries bits beyond 32
    let overflow = [0xffu8, 0xff, 0xff, 0xff, 0x1f];
    assert!(ByteArrayDataInput::new(&overflow).read_vint().unwrap_err().is_corruption());

    let vlong = [0xffu8; 10];
    assert!(ByteArrayDataInput::new(&vlong).read_vlong().unwrap_err().is_corruption());

    // truncated mid-value
    let truncated = [0x80u8, 0x80];
    assert!(ByteArrayDataInput::new(&truncated).read_vint().unwrap_err().is_corruption());
}

#[test]
fn test_strings_use_utf8_byte_length() {
    let s = "naïve café 日本語 🦀";
    let mut buf: Vec<u8> = Vec::new();
    buf.write_string(s).unwrap();
    assert_eq!(buf[0] as usize, s.len());
    assert_eq!(ByteArrayDataInput::new(&buf).read_string().unwrap(), s);

    let mut bad: Vec<u8> = Vec::new();
    bad.write_vint(2).unwrap();
    bad.extend_from_slice(&[0xc3, 0x28]);
    assert!(ByteArrayDataInput::new(&bad).read_string().is_err());
}

#[test]
fn test_maps_and_sets() {
    let map: BTreeMap<String, String> = [("codec", "Lucene41"), ("os", "linux"), ("", "empty key")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let set: BTreeSet<String> = ["_0.fdt", "_0.fdx"].into_iter().map(String::from).collect();

    let mut buf: Vec<u8> = Vec::new();
    buf.write_string_string_map(&map).unwrap();
    buf.write_string_set(&set).unwrap();
    buf.write_string_set(&BTreeSet::new()).unwrap();
    assert_eq!(&buf[..4], &[0, 0, 0, 3]);

    let mut input = ByteArrayDataInput::new(&buf);
    assert_eq!(input.read_string_string_map().unwrap(), map);
    assert_eq!(input.read_string_set().unwrap(), set);
    assert!(input.read_string_set().unwrap().is_empty());

    let negative = (-1i32).to_be_bytes();
    assert!(ByteArrayDataInput::new(&negative).read_string_set().unwrap_err().is_corruption());
}

#[test]
fn test_fixed_width_is_big_endian() {
    let mut buf: Vec<u8> = Vec::new();
    buf.write_i16(0x0102).unwrap();
    buf.write_i32(0x0304_0506).unwrap();
    buf.write_i64(-2).unwrap();
    assert_eq!(&buf[..6], &[1, 2, 3, 4, 5, 6]);
    assert_eq!(&buf[6..], &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe]);

    let mut input = ByteArrayDataInput::new(&buf);
    input.skip_bytes(2).unwrap();
    assert_eq!(input.read_i32().unwrap(), 0x0304_0506);
    assert_eq!(input.read_i64().unwrap(), -2);
    assert!(input.read_byte().unwrap_err().is_corruption());
}

#[test]
fn test_checksum_incremental_matches_bulk() {
    let bytes: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 256) as u8).collect();

    let mut bulk = Crc32::new();
    bulk.update(&bytes);

    let mut byte_at_a_time = BufferedChecksum::new(Crc32::new());
    for &b in &bytes {
        byte_at_a_time.update_byte(b);
    }
    assert_eq!(byte_at_a_time.value(), bulk.value());

    let mut mixed = BufferedChecksum::with_capacity(Crc32::new(), 16);
    for chunk in bytes.chunks(333) {
        mixed.update(chunk);
        // reading the value mid-stream must not disturb later updates
        let _ = mixed.value();
    }
    assert_eq!(mixed.value(), bulk.value());

    mixed.reset();
    assert_eq!(mixed.value(), Crc32::new().value());
}

#[test]
fn test_copy_bytes_between_streams() {
    let source: Vec<u8> = (0..40_000u32).map(|i| (i % 199) as u8).collect();
    let mut input = ByteArrayDataInput::new(&source);
    input.skip_bytes(100).unwrap();

    let mut out: Vec<u8> = Vec::new();
    out.copy_bytes(&mut input, 39_000).unwrap();
    assert_eq!(out, &source[100..39_100]);
    assert!(out.copy_bytes(&mut input, 1_000).is_err());
}
