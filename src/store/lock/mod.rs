//! Exclusive locks scoped to a directory and a lock name
//!
//! Strategies:
//! - `native`: OS advisory lock on a backing file, released by the OS if the
//!   holder dies; the file itself is never deleted
//! - `simple`: marker file created atomically, deleted on release
//! - `single_instance`: in-process lock table
//! - `NoLockFactory`: never contends

mod native;
mod simple;
mod single_instance;

pub use native::*;
pub use simple::*;
pub use single_instance::*;

use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::StoreError;
use crate::Result;

/// Default pause between attempts in `obtain_with_timeout`
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(1000);

pub trait Lock: Send {
    /// Try once; `false` means someone else holds it
    fn obtain(&mut self) -> Result<bool>;

    /// Release if held by this instance; releasing twice is a no-op
    fn close(&mut self) -> Result<()>;

    fn is_locked(&mut self) -> Result<bool>;

    /// Why the last `obtain` returned false, when known
    fn failure_reason(&self) -> Option<&str>;

    fn description(&self) -> &str;

    /// Retry `obtain` every `poll_interval` until `timeout` has elapsed
    fn obtain_with_timeout(&mut self, timeout: Duration, poll_interval: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.obtain()? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(lock = %self.description(), "lock obtain timed out");
                return Err(StoreError::LockObtainFailed {
                    lock: self.description().to_string(),
                    reason: self.failure_reason().map(str::to_string),
                });
            }
            thread::sleep(poll_interval.min(deadline - now));
        }
    }
}

pub trait LockFactory: Send + Sync {
    fn make_lock(&self, name: &str) -> Box<dyn Lock>;

    /// Forcibly remove any lock state for `name`
    fn clear_lock(&self, name: &str) -> Result<()>;
}

/// `prefix-name`, or `name` alone when the lock lives inside the directory
pub(crate) fn prefixed_name(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}-{}", prefix, name),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obtain_with_timeout_reports_reason() {
        let factory = SingleInstanceLockFactory::new();
        let mut first = factory.make_lock("write.lock");
        let mut second = factory.make_lock("write.lock");
        assert!(first.obtain().unwrap());

        let start = Instant::now();
        let err = second
            .obtain_with_timeout(Duration::from_millis(50), Duration::from_millis(10))
            .unwrap_err();
        assert!(start.elapsed() >= Duration::from_millis(50));
        match err {
            StoreError::LockObtainFailed { reason, .. } => assert!(reason.is_some()),
            other => panic!("unexpected error: {}", other),
        }

        first.close().unwrap();
        second
            .obtain_with_timeout(Duration::from_millis(50), Duration::from_millis(10))
            .unwrap();
        assert!(second.is_locked().unwrap());
    }

    #[test]
    fn test_prefixed_name() {
        assert_eq!(prefixed_name(None, "write.lock"), "write.lock");
        assert_eq!(
            prefixed_name(Some("lucene-1a2b"), "write.lock"),
            "lucene-1a2b-write.lock"
        );
    }
}
