//! Directory wrapper throttling writes per I/O context kind

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::debug;

use super::buffered::{BufferedOutput, RawOutput};
use super::data_io::DataOutput;
use super::directory::Directory;
use super::index_io::{IndexInput, IndexInputSlicer, IndexOutput};
use super::io_context::{IoContext, IoContextKind};
use super::lock::Lock;
use super::rate_limiter::SimpleRateLimiter;
use crate::config::RateLimitConfig;
use crate::Result;

pub struct RateLimitedDirectory {
    delegate: Arc<dyn Directory>,
    /// Indexed by `IoContextKind::index`
    limiters: [ArcSwapOption<SimpleRateLimiter>; 4],
}

impl RateLimitedDirectory {
    pub fn new(delegate: Arc<dyn Directory>) -> Self {
        Self {
            delegate,
            limiters: Default::default(),
        }
    }

    pub fn with_config(delegate: Arc<dyn Directory>, config: &RateLimitConfig) -> Result<Self> {
        config.validate()?;
        let dir = Self::new(delegate);
        dir.set_max_write_mb_per_sec(config.merge_mb_per_sec, IoContextKind::Merge)?;
        dir.set_max_write_mb_per_sec(config.flush_mb_per_sec, IoContextKind::Flush)?;
        dir.set_max_write_mb_per_sec(config.default_mb_per_sec, IoContextKind::Default)?;
        Ok(dir)
    }

    pub fn delegate(&self) -> &Arc<dyn Directory> {
        &self.delegate
    }

    /// Create, retune or (with `None`) remove the limiter for `kind`
    ///
    /// Retuning an installed limiter also paces outputs already open.
    pub fn set_max_write_mb_per_sec(
        &self,
        mb_per_sec: Option<f64>,
        kind: IoContextKind,
    ) -> Result<()> {
        let slot = &self.limiters[kind.index()];
        match mb_per_sec {
            None => slot.store(None),
            Some(mb) => match slot.load_full() {
                Some(limiter) => limiter.set_mb_per_sec(mb)?,
                None => slot.store(Some(Arc::new(SimpleRateLimiter::new(mb)?))),
            },
        }
        debug!(?kind, ?mb_per_sec, "write rate limit changed");
        Ok(())
    }

    /// Install a limiter, possibly shared with other directories
    pub fn set_rate_limiter(&self, limiter: Option<Arc<SimpleRateLimiter>>, kind: IoContextKind) {
        self.limiters[kind.index()].store(limiter);
    }

    pub fn rate_limiter(&self, kind: IoContextKind) -> Option<Arc<SimpleRateLimiter>> {
        self.limiters[kind.index()].load_full()
    }

    pub fn max_write_mb_per_sec(&self, kind: IoContextKind) -> Option<f64> {
        self.rate_limiter(kind).map(|l| l.mb_per_sec())
    }
}

impl Directory for RateLimitedDirectory {
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
        self.delegate.delete_file(name)
    }

    fn create_output(&self, name: &str, context: &IoContext) -> Result<Box<dyn IndexOutput>> {
        let out = self.delegate.create_output(name, context)?;
        match self.rate_limiter(context.kind()) {
            Some(limiter) => {
                let sink = RateLimitedSink { inner: out, limiter };
                Ok(Box::new(BufferedOutput::with_context(name, sink, context)))
            }
            None => Ok(out),
        }
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

/// Pauses on the limiter before every flushed chunk reaches the real output
struct RateLimitedSink {
    inner: Box<dyn IndexOutput>,
    limiter: Arc<SimpleRateLimiter>,
}

impl RawOutput for RateLimitedSink {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.limiter.pause(bytes.len() as u64);
        self.inner.write_bytes(bytes)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}
