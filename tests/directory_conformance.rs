//! Behaviour every directory implementation has to share

use squidstore::store::io_context::BUFFER_SIZE;
use squidstore::{
    DataInput, DataOutput, Directory, FsDirectory, FsDirectoryConfig, IndexInput, IndexOutput,
    IoContext, MemoryDirectory, NrtCachingDirectory, RateLimitedDirectory, ReadStrategy,
    StoreError, TrackingDirectory,
};
use squidstore::store::IoContextKind;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _temp: Option<TempDir>,
    name: &'static str,
    dir: Box<dyn Directory>,
}

fn fs_dir(temp: &TempDir, strategy: ReadStrategy) -> FsDirectory {
    let config = FsDirectoryConfig::default().with_read_strategy(strategy);
    FsDirectory::open_with_config(temp.path(), &config).unwrap()
}

fn fixtures() -> Vec<Fixture> {
    let mut all = vec![Fixture {
        _temp: None,
        name: "memory",
        dir: Box::new(MemoryDirectory::new()),
    }];
    for (name, strategy) in [
        ("fs-simple", ReadStrategy::Simple),
        ("fs-nio", ReadStrategy::Nio),
        ("fs-mmap", ReadStrategy::Mmap),
    ] {
        let temp = TempDir::new().unwrap();
        let dir = fs_dir(&temp, strategy);
        all.push(Fixture {
            _temp: Some(temp),
            name,
            dir: Box::new(dir),
        });
    }

    let temp = TempDir::new().unwrap();
    let nrt = NrtCachingDirectory::new(Arc::new(fs_dir(&temp, ReadStrategy::Nio)), 1.0, 4.0)
        .unwrap();
    all.push(Fixture {
        _temp: Some(temp),
        name: "nrt-caching",
        dir: Box::new(nrt),
    });

    let limited = RateLimitedDirectory::new(Arc::new(MemoryDirectory::new()));
    limited
        .set_max_write_mb_per_sec(Some(512.0), IoContextKind::Default)
        .unwrap();
    all.push(Fixture {
        _temp: None,
        name: "rate-limited",
        dir: Box::new(limited),
    });

    all.push(Fixture {
        _temp: None,
        name: "tracking",
        dir: Box::new(TrackingDirectory::new(Arc::new(MemoryDirectory::new()))),
    });
    all
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[test]
fn test_round_trip_across_buffer_boundaries() {
    let sizes = [
        0,
        1,
        BUFFER_SIZE - 1,
        BUFFER_SIZE,
        BUFFER_SIZE + 1,
        10 * BUFFER_SIZE,
    ];
    for fixture in fixtures() {
        let dir = &*fixture.dir;
        for &size in &sizes {
            let name = format!("file_{}", size);
            let payload = pattern(size);
            let mut out = dir.create_output(&name, &IoContext::DEFAULT).unwrap();
            out.write_bytes(&payload).unwrap();
            assert_eq!(out.file_pointer(), size as u64, "{}", fixture.name);
            out.close().unwrap();

            assert_eq!(dir.file_length(&name).unwrap(), size as u64, "{}", fixture.name);
            let mut input = dir.open_input(&name, &IoContext::DEFAULT).unwrap();
            let mut read = vec![0u8; size];
            input.read_bytes(&mut read).unwrap();
            assert_eq!(read, payload, "{} size {}", fixture.name, size);
            assert!(input.read_byte().is_err(), "{} size {}", fixture.name, size);
            input.close().unwrap();
        }
    }
}

#[test]
fn test_clones_do_not_share_position() {
    for fixture in fixtures() {
        let dir = &*fixture.dir;
        let payload = pattern(4 * BUFFER_SIZE);
        let mut out = dir.create_output("clones", &IoContext::DEFAULT).unwrap();
        out.write_bytes(&payload).unwrap();
        out.close().unwrap();

        let mut input = dir.open_input("clones", &IoContext::DEFAULT).unwrap();
        input.seek(10).unwrap();
        let mut a = input.clone_input().unwrap();
        let mut b = input.clone_input().unwrap();
        assert_eq!(a.file_pointer(), 10, "{}", fixture.name);

        a.seek(3000).unwrap();
        b.seek(5).unwrap();
        assert_eq!(a.read_byte().unwrap(), payload[3000], "{}", fixture.name);
        assert_eq!(b.read_byte().unwrap(), payload[5], "{}", fixture.name);
        assert_eq!(input.read_byte().unwrap(), payload[10], "{}", fixture.name);
        assert_eq!(a.file_pointer(), 3001);
        assert_eq!(b.file_pointer(), 6);
        assert_eq!(input.file_pointer(), 11);

        // closing the original invalidates its clones
        input.close().unwrap();
        assert!(matches!(a.read_byte(), Err(StoreError::AlreadyClosed(_))));
    }
}

#[test]
fn test_missing_files_are_not_found() {
    for fixture in fixtures() {
        let dir = &*fixture.dir;
        assert!(!dir.file_exists("missing").unwrap(), "{}", fixture.name);
        assert!(dir
            .open_input("missing", &IoContext::DEFAULT)
            .unwrap_err()
            .is_not_found());
        assert!(dir.delete_file("missing").unwrap_err().is_not_found());
        assert!(dir.file_length("missing").unwrap_err().is_not_found());
    }
}

#[test]
fn test_create_output_replaces_file() {
    for fixture in fixtures() {
        let dir = &*fixture.dir;
        let mut out = dir.create_output("replace", &IoContext::DEFAULT).unwrap();
        out.write_bytes(&pattern(5000)).unwrap();
        out.close().unwrap();

        let mut out = dir.create_output("replace", &IoContext::DEFAULT).unwrap();
        out.write_string("short").unwrap();
        out.close().unwrap();

        assert_eq!(dir.file_length("replace").unwrap(), 6, "{}", fixture.name);
        let mut input = dir.open_input("replace", &IoContext::DEFAULT).unwrap();
        assert_eq!(input.read_string().unwrap(), "short");
    }
}

#[test]
fn test_typed_values_and_checksum() {
    for fixture in fixtures() {
        let dir = &*fixture.dir;
        let mut out = dir.create_output("typed", &IoContext::DEFAULT).unwrap();
        out.write_i16(-2).unwrap();
        out.write_i32(i32::MIN).unwrap();
        out.write_i64(i64::MAX).unwrap();
        out.write_vint(u32::MAX).unwrap();
        out.write_vlong(i64::MAX as u64).unwrap();
        out.write_string("grüße, 世界").unwrap();
        let checksum = out.checksum().unwrap();
        out.close().unwrap();

        let mut input = dir.open_checksum_input("typed", &IoContext::DEFAULT).unwrap();
        assert_eq!(input.read_i16().unwrap(), -2);
        assert_eq!(input.read_i32().unwrap(), i32::MIN);
        assert_eq!(input.read_i64().unwrap(), i64::MAX);
        assert_eq!(input.read_vint().unwrap(), u32::MAX);
        assert_eq!(input.read_vlong().unwrap(), i64::MAX as u64);
        assert_eq!(input.read_string().unwrap(), "grüße, 世界");
        assert_eq!(input.checksum(), checksum, "{}", fixture.name);
    }
}

#[test]
fn test_close_is_idempotent() {
    for fixture in fixtures() {
        let dir = &*fixture.dir;
        let mut out = dir.create_output("idem", &IoContext::DEFAULT).unwrap();
        out.write_byte(9).unwrap();
        out.close().unwrap();
        out.close().unwrap();
        assert!(out.write_byte(1).is_err(), "{}", fixture.name);

        let mut input = dir.open_input("idem", &IoContext::DEFAULT).unwrap();
        input.close().unwrap();
        input.close().unwrap();

        dir.sync(&["idem".to_string()]).unwrap();
        dir.close().unwrap();
        dir.close().unwrap();
        assert!(matches!(
            dir.list_all(),
            Err(StoreError::AlreadyClosed(_))
        ), "{}", fixture.name);
    }
}
