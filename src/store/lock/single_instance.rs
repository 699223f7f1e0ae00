use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Lock, LockFactory};
use crate::Result;

/// In-process lock table, for directories that live in one process only
#[derive(Debug, Clone, Default)]
pub struct SingleInstanceLockFactory {
    locks: Arc<Mutex<HashSet<String>>>,
}

impl SingleInstanceLockFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockFactory for SingleInstanceLockFactory {
    fn make_lock(&self, name: &str) -> Box<dyn Lock> {
        Box::new(SingleInstanceLock {
            name: name.to_string(),
            locks: Arc::clone(&self.locks),
            held: false,
            failure_reason: None,
        })
    }

    fn clear_lock(&self, name: &str) -> Result<()> {
        self.locks.lock().remove(name);
        Ok(())
    }
}

pub struct SingleInstanceLock {
    name: String,
    locks: Arc<Mutex<HashSet<String>>>,
    held: bool,
    failure_reason: Option<String>,
}

impl Lock for SingleInstanceLock {
    fn obtain(&mut self) -> Result<bool> {
        let inserted = self.locks.lock().insert(self.name.clone());
        if inserted {
            self.held = true;
            self.failure_reason = None;
        } else {
            self.failure_reason = Some(format!("{} is held in this process", self.name));
        }
        Ok(inserted)
    }

    fn close(&mut self) -> Result<()> {
        if self.held {
            self.locks.lock().remove(&self.name);
            self.held = false;
        }
        Ok(())
    }

    fn is_locked(&mut self) -> Result<bool> {
        Ok(self.held || self.locks.lock().contains(&self.name))
    }

    fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    fn description(&self) -> &str {
        &self.name
    }
}

impl Drop for SingleInstanceLock {
    fn drop(&mut self) {
        if self.held {
            self.locks.lock().remove(&self.name);
        }
    }
}

/// Every obtain succeeds; for callers that coordinate access themselves
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLockFactory;

impl LockFactory for NoLockFactory {
    fn make_lock(&self, name: &str) -> Box<dyn Lock> {
        Box::new(NoLock {
            name: name.to_string(),
        })
    }

    fn clear_lock(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

pub struct NoLock {
    name: String,
}

impl Lock for NoLock {
    fn obtain(&mut self) -> Result<bool> {
        Ok(true)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_locked(&mut self) -> Result<bool> {
        Ok(false)
    }

    fn failure_reason(&self) -> Option<&str> {
        None
    }

    fn description(&self) -> &str {
        &self.name
    }
}
