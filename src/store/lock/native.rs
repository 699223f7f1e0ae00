use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{prefixed_name, Lock, LockFactory};
use crate::Result;

/// Locks backed by OS advisory file locks
#[derive(Debug, Clone)]
pub struct NativeFsLockFactory {
    lock_dir: PathBuf,
    lock_prefix: Option<String>,
}

impl NativeFsLockFactory {
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

impl LockFactory for NativeFsLockFactory {
    fn make_lock(&self, name: &str) -> Box<dyn Lock> {
        let name = prefixed_name(self.lock_prefix.as_deref(), name);
        Box::new(NativeFsLock::new(self.lock_dir.clone(), &name))
    }

    fn clear_lock(&self, _name: &str) -> Result<()> {
        // lock state lives in the OS, not in the backing file
        Ok(())
    }
}

pub struct NativeFsLock {
    lock_dir: PathBuf,
    path: PathBuf,
    description: String,
    file: Option<File>,
    failure_reason: Option<String>,
}

impl NativeFsLock {
    fn new(lock_dir: PathBuf, name: &str) -> Self {
        let path = lock_dir.join(name);
        Self {
            description: format!("NativeFSLock@{}", path.display()),
            lock_dir,
            path,
            file: None,
            failure_reason: None,
        }
    }

    fn open_backing_file(&self) -> io::Result<File> {
        fs::create_dir_all(&self.lock_dir)?;
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor stays valid for the duration of the call
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: as above
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> io::Result<bool> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "native file locks are only available on unix",
    ))
}

#[cfg(not(unix))]
fn unlock(_file: &File) -> io::Result<()> {
    Ok(())
}

impl Lock for NativeFsLock {
    fn obtain(&mut self) -> Result<bool> {
        if self.file.is_some() {
            // already held through this instance
            return Ok(false);
        }
        self.failure_reason = None;
        let file = match self.open_backing_file() {
            Ok(file) => file,
            Err(e) => {
                self.failure_reason = Some(e.to_string());
                return Ok(false);
            }
        };
        match try_lock_exclusive(&file) {
            Ok(true) => {
                self.file = Some(file);
                Ok(true)
            }
            Ok(false) => {
                self.failure_reason = Some(format!(
                    "{} is held by another process or instance",
                    self.path.display()
                ));
                debug!(lock = %self.path.display(), "native lock is held elsewhere");
                Ok(false)
            }
            Err(e) => {
                debug!(lock = %self.path.display(), error = %e, "native lock attempt failed");
                self.failure_reason = Some(e.to_string());
                Ok(false)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            unlock(&file)?;
        }
        Ok(())
    }

    fn is_locked(&mut self) -> Result<bool> {
        if self.file.is_some() {
            return Ok(true);
        }
        if !self.path.exists() {
            return Ok(false);
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

impl Drop for NativeFsLock {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(lock = %self.description, error = %e, "failed to release native lock");
        }
    }
}
