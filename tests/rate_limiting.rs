use squidstore::store::IoContextKind;
use squidstore::{
    DataOutput, Directory, IndexOutput, IoContext, MemoryDirectory, RateLimitConfig,
    RateLimitedDirectory,
};
use squidstore::store::SimpleRateLimiter;
use std::sync::Arc;
use std::time::{Duration, Instant};

const MB: f64 = 1024.0 * 1024.0;

#[test]
fn test_pause_lower_bound() {
    let rate = 2.0;
    let limiter = SimpleRateLimiter::new(rate).unwrap();
    let total: u64 = 256 * 1024;
    let start = Instant::now();
    let mut written = 0;
    while written < total {
        limiter.pause(8192);
        written += 8192;
    }
    let expected = Duration::from_secs_f64(total as f64 / (rate * MB));
    // the cursor starts at construction, allow a little slack for that
    assert!(start.elapsed() + Duration::from_millis(10) >= expected);
}

#[test]
fn test_merge_writes_are_throttled() {
    let config = RateLimitConfig::default().with_merge_mb_per_sec(1.0);
    let dir = RateLimitedDirectory::with_config(Arc::new(MemoryDirectory::new()), &config).unwrap();
    assert_eq!(dir.max_write_mb_per_sec(IoContextKind::Merge), Some(1.0));
    assert_eq!(dir.max_write_mb_per_sec(IoContextKind::Flush), None);

    let payload = vec![3u8; 128 * 1024];
    let start = Instant::now();
    let mut out = dir
        .create_output("_0.merged", &IoContext::merge(100, payload.len() as u64, false, 1))
        .unwrap();
    out.write_bytes(&payload).unwrap();
    out.close().unwrap();
    // 128 KiB at 1 MB/sec is 125ms
    assert!(start.elapsed() >= Duration::from_millis(110));
    assert_eq!(dir.file_length("_0.merged").unwrap(), payload.len() as u64);
}

#[test]
fn test_unthrottled_kind_is_fast() {
    let config = RateLimitConfig::default().with_merge_mb_per_sec(0.01);
    let dir = RateLimitedDirectory::with_config(Arc::new(MemoryDirectory::new()), &config).unwrap();
    let start = Instant::now();
    let mut out = dir.create_output("_1.fdt", &IoContext::flush(1, 1024)).unwrap();
    out.write_bytes(&vec![1u8; 64 * 1024]).unwrap();
    out.close().unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_retune_applies_to_open_output() {
    let dir = RateLimitedDirectory::new(Arc::new(MemoryDirectory::new()));
    dir.set_max_write_mb_per_sec(Some(1000.0), IoContextKind::Default)
        .unwrap();
    let mut out = dir.create_output("_2.si", &IoContext::DEFAULT).unwrap();
    out.write_bytes(&vec![0u8; 4096]).unwrap();

    dir.set_max_write_mb_per_sec(Some(0.5), IoContextKind::Default)
        .unwrap();
    let start = Instant::now();
    // 32 KiB at 0.5 MB/sec is 62.5ms
    out.write_bytes(&vec![0u8; 32 * 1024]).unwrap();
    out.close().unwrap();
    assert!(start.elapsed() >= Duration::from_millis(50));
}
