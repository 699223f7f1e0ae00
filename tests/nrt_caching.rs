use squidstore::{
    DataInput, DataOutput, Directory, FsDirectory, IndexInput, IndexOutput, IoContext,
    NrtCachingConfig, NrtCachingDirectory, StoreError,
};
use std::sync::Arc;
use tempfile::TempDir;

const MB: u64 = 1024 * 1024;

fn setup(temp: &TempDir) -> (Arc<dyn Directory>, NrtCachingDirectory) {
    let fs: Arc<dyn Directory> = Arc::new(FsDirectory::open(temp.path()).unwrap());
    let config = NrtCachingConfig::new(1.0, 2.0);
    let nrt = NrtCachingDirectory::with_config(Arc::clone(&fs), &config).unwrap();
    (fs, nrt)
}

fn write(dir: &dyn Directory, name: &str, context: &IoContext, bytes: &[u8]) {
    let mut out = dir.create_output(name, context).unwrap();
    out.write_bytes(bytes).unwrap();
    out.close().unwrap();
}

#[test]
fn test_flush_larger_than_budget_bypasses_cache() {
    let temp = TempDir::new().unwrap();
    let (fs, nrt) = setup(&temp);
    write(&nrt, "_0.fdt", &IoContext::flush(100, 3 * MB), b"big segment");

    assert!(!nrt.list_cached_files().unwrap().contains(&"_0.fdt".to_string()));
    assert!(fs.file_exists("_0.fdt").unwrap());
    assert!(temp.path().join("_0.fdt").exists());
}

#[test]
fn test_budget_counts_cached_bytes() {
    let temp = TempDir::new().unwrap();
    let (fs, nrt) = setup(&temp);
    let chunk = vec![1u8; 900 * 1024];
    write(&nrt, "_1.a", &IoContext::flush(1, 900 * 1024), &chunk);
    write(&nrt, "_1.b", &IoContext::flush(1, 900 * 1024), &chunk);
    assert_eq!(nrt.list_cached_files().unwrap().len(), 2);

    // a third estimate would push the cache past 2 MB
    write(&nrt, "_1.c", &IoContext::flush(1, 900 * 1024), &chunk);
    assert!(fs.file_exists("_1.c").unwrap());
    assert_eq!(nrt.list_cached_files().unwrap().len(), 2);
}

#[test]
fn test_sync_persists_byte_identical_copy() {
    let temp = TempDir::new().unwrap();
    let (fs, nrt) = setup(&temp);
    let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 253) as u8).collect();
    write(&nrt, "_2.doc", &IoContext::DEFAULT, &payload);
    assert!(!temp.path().join("_2.doc").exists());

    nrt.sync(&["_2.doc".to_string()]).unwrap();
    assert!(nrt.list_cached_files().unwrap().is_empty());
    assert_eq!(std::fs::read(temp.path().join("_2.doc")).unwrap(), payload);

    let mut input = nrt.open_input("_2.doc", &IoContext::DEFAULT).unwrap();
    let mut read = vec![0u8; payload.len()];
    input.read_bytes(&mut read).unwrap();
    assert_eq!(read, payload);
    assert_eq!(fs.file_length("_2.doc").unwrap(), payload.len() as u64);
}

#[test]
fn test_concurrent_sync_of_same_file() {
    let temp = TempDir::new().unwrap();
    let (fs, nrt) = setup(&temp);
    let nrt = Arc::new(nrt);
    for i in 0..4 {
        let mut out = nrt
            .create_output(&format!("_3.f{}", i), &IoContext::DEFAULT)
            .unwrap();
        out.write_string(&format!("file {}", i)).unwrap();
        out.close().unwrap();
    }
    let names: Vec<String> = (0..4).map(|i| format!("_3.f{}", i)).collect();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let nrt = Arc::clone(&nrt);
            let names = names.clone();
            std::thread::spawn(move || nrt.sync(&names))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert!(nrt.list_cached_files().unwrap().is_empty());
    for (i, name) in names.iter().enumerate() {
        let mut input = fs.open_input(name, &IoContext::DEFAULT).unwrap();
        assert_eq!(input.read_string().unwrap(), format!("file {}", i));
    }
}

#[test]
fn test_missing_delegate_path_tolerated_when_cache_has_files() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("later");
    std::fs::create_dir(&path).unwrap();
    let fs: Arc<dyn Directory> = Arc::new(FsDirectory::open(&path).unwrap());
    std::fs::remove_dir(&path).unwrap();

    let nrt = NrtCachingDirectory::new(fs, 1.0, 2.0).unwrap();
    assert!(matches!(
        nrt.list_all(),
        Err(StoreError::NoSuchDirectory(_))
    ));
    write(&nrt, "_4.si", &IoContext::DEFAULT, b"x");
    assert_eq!(nrt.list_all().unwrap(), vec!["_4.si".to_string()]);
}

#[test]
fn test_lock_goes_to_delegate() {
    let temp = TempDir::new().unwrap();
    let (fs, nrt) = setup(&temp);
    assert_eq!(nrt.lock_id(), fs.lock_id());
    let mut lock = nrt.make_lock("write.lock").unwrap();
    assert!(lock.obtain().unwrap());
    lock.close().unwrap();
}
