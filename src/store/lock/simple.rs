use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{prefixed_name, Lock, LockFactory};
use crate::error::StoreError;
use crate::Result;

/// Locks represented by the existence of a marker file
///
/// A marker left behind by a crashed holder blocks every later obtain until
/// it is removed with `clear_lock`.
#[derive(Debug, Clone)]
pub struct SimpleFsLockFactory {
    lock_dir: PathBuf,
    lock_prefix: Option<String>,
}

impl SimpleFsLockFactory {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
            lock_prefix: None,
        }
    }

    pub fn with_lock_prefix(mut self, prefix: Option<String>) -> Self {
        self.lock_prefix = prefix;
        self
    }

    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }
}

impl LockFactory for SimpleFsLockFactory {
    fn make_lock(&self, name: &str) -> Box<dyn Lock> {
        let name = prefixed_name(self.lock_prefix.as_deref(), name);
        Box::new(SimpleFsLock {
            description: format!("SimpleFSLock@{}", self.lock_dir.join(&name).display()),
            path: self.lock_dir.join(name),
            lock_dir: self.lock_dir.clone(),
            held: false,
            failure_reason: None,
        })
    }

    fn clear_lock(&self, name: &str) -> Result<()> {
        let path = self
            .lock_dir
            .join(prefixed_name(self.lock_prefix.as_deref(), name));
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(lock = %path.display(), "cleared lock marker");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(io::Error::new(
                e.kind(),
                format!("Cannot delete {}: {}", path.display(), e),
            ))),
        }
    }
}

pub struct SimpleFsLock {
    lock_dir: PathBuf,
    path: PathBuf,
    description: String,
    held: bool,
    failure_reason: Option<String>,
}

impl Lock for SimpleFsLock {
    fn obtain(&mut self) -> Result<bool> {
        self.failure_reason = None;
        if self.lock_dir.is_file() {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!(
                    "Found regular file where directory expected: {}",
                    self.lock_dir.display()
                ),
            )));
        }
        fs::create_dir_all(&self.lock_dir)?;
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(_) => {
                self.held = true;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                self.failure_reason = Some(format!(
                    "lock marker {} already exists",
                    self.path.display()
                ));
                Ok(false)
            }
            Err(e) => {
                self.failure_reason = Some(e.to_string());
                Ok(false)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StoreError::LockReleaseFailed {
                    lock: self.description.clone(),
                    reason: e.to_string(),
                })
            }
        }
        self.held = false;
        Ok(())
    }

    fn is_locked(&mut self) -> Result<bool> {
        if self.held {
            return Ok(true);
        }
        let obtained = self.obtain()?;
        if obtained {
            self.close()?;
        }
        Ok(!obtained)
    }

    fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    fn description(&self) -> &str {
        &self.description
    }
}

impl Drop for SimpleFsLock {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(lock = %self.description, error = %e, "failed to release lock marker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_obtain_close_obtain() {
        let temp = TempDir::new().unwrap();
        let factory = SimpleFsLockFactory::new(temp.path());
        let mut a = factory.make_lock("write.lock");
        let mut b = factory.make_lock("write.lock");

        assert!(a.obtain().unwrap());
        assert!(temp.path().join("write.lock").exists());
        assert!(!b.obtain().unwrap());
        assert!(b.failure_reason().unwrap().contains("already exists"));
        assert!(b.is_locked().unwrap());

        a.close().unwrap();
        a.close().unwrap();
        assert!(!temp.path().join("write.lock").exists());
        assert!(!b.is_locked().unwrap());
        assert!(b.obtain().unwrap());
        b.close().unwrap();
    }

    #[test]
    fn test_non_holder_close_keeps_marker() {
        let temp = TempDir::new().unwrap();
        let factory = SimpleFsLockFactory::new(temp.path());
        let mut holder = factory.make_lock("write.lock");
        let mut other = factory.make_lock("write.lock");
        assert!(holder.obtain().unwrap());
        other.close().unwrap();
        assert!(temp.path().join("write.lock").exists());
        holder.close().unwrap();
    }

    #[test]
    fn test_clear_lock_removes_stale_marker() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("write.lock"), b"").unwrap();
        let factory = SimpleFsLockFactory::new(temp.path());
        let mut lock = factory.make_lock("write.lock");
        assert!(!lock.obtain().unwrap());

        factory.clear_lock("write.lock").unwrap();
        factory.clear_lock("write.lock").unwrap();
        assert!(lock.obtain().unwrap());
        lock.close().unwrap();
    }

    #[test]
    fn test_creates_missing_lock_dir() {
        let temp = TempDir::new().unwrap();
        let factory = SimpleFsLockFactory::new(temp.path().join("nested").join("locks"));
        let mut lock = factory.make_lock("write.lock");
        assert!(lock.obtain().unwrap());
        lock.close().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_delete_is_release_failure() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let lock_dir = temp.path().join("locks");
        let factory = SimpleFsLockFactory::new(&lock_dir);
        let mut lock = factory.make_lock("write.lock");
        assert!(lock.obtain().unwrap());

        fs::set_permissions(&lock_dir, fs::Permissions::from_mode(0o500)).unwrap();
        let result = lock.close();
        fs::set_permissions(&lock_dir, fs::Permissions::from_mode(0o700)).unwrap();

        // root ignores directory permissions
        if let Err(e) = result {
            assert!(matches!(e, StoreError::LockReleaseFailed { .. }));
            lock.close().unwrap();
        }
    }
}
