//! Directory wrapper recording which files were written through it

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashSet;

use super::directory::Directory;
use super::index_io::{IndexInput, IndexInputSlicer, IndexOutput};
use super::io_context::IoContext;
use super::lock::Lock;
use crate::Result;

pub struct TrackingDirectory {
    delegate: Arc<dyn Directory>,
    created: DashSet<String>,
}

impl TrackingDirectory {
    pub fn new(delegate: Arc<dyn Directory>) -> Self {
        Self {
            delegate,
            created: DashSet::new(),
        }
    }

    /// Files created through this wrapper and not deleted since
    pub fn created_files(&self) -> HashSet<String> {
        self.created.iter().map(|name| name.key().clone()).collect()
    }

    pub fn delegate(&self) -> &Arc<dyn Directory> {
        &self.delegate
    }
}

impl Directory for TrackingDirectory {
    fn list_all(&self) -> Result<Vec<String>> {
        self.delegate.list_all()
    }

    fn file_exists(&self, name: &str) -> Result<bool> {
        self.delegate.file_exists(name)
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        self.delegate.file_length(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.delegate.delete_file(name)?;
        self.created.remove(name);
        Ok(())
    }

    fn create_output(&self, name: &str, context: &IoContext) -> Result<Box<dyn IndexOutput>> {
        let out = self.delegate.create_output(name, context)?;
        self.created.insert(name.to_string());
        Ok(out)
    }

    fn open_input(&self, name: &str, context: &IoContext) -> Result<Box<dyn IndexInput>> {
        self.delegate.open_input(name, context)
    }

    fn sync(&self, names: &[String]) -> Result<()> {
        self.delegate.sync(names)
    }

    fn make_lock(&self, name: &str) -> Result<Box<dyn Lock>> {
        self.delegate.make_lock(name)
    }

    fn clear_lock(&self, name: &str) -> Result<()> {
        self.delegate.clear_lock(name)
    }

    fn lock_id(&self) -> String {
        self.delegate.lock_id()
    }

    fn create_slicer(&self, name: &str, context: &IoContext) -> Result<Box<dyn IndexInputSlicer>> {
        self.delegate.create_slicer(name, context)
    }

    fn close(&self) -> Result<()> {
        self.delegate.close()
    }
}
