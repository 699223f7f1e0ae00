//! Write pacing
//!
//! A limiter keeps a cursor in time. Every pause pushes the cursor forward
//! by the cost of the bytes about to be written and sleeps until the clock
//! catches up with it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::Result;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Paces callers to a target rate in MB/sec
#[derive(Debug)]
pub struct SimpleRateLimiter {
    /// f64 bits of the target rate
    mb_per_sec: AtomicU64,
    /// f64 bits of the derived cost per byte
    nanos_per_byte: AtomicU64,
    last: Mutex<Instant>,
}

impl SimpleRateLimiter {
    pub fn new(mb_per_sec: f64) -> Result<Self> {
        let limiter = Self {
            mb_per_sec: AtomicU64::new(0),
            nanos_per_byte: AtomicU64::new(0),
            last: Mutex::new(Instant::now()),
        };
        limiter.set_mb_per_sec(mb_per_sec)?;
        Ok(limiter)
    }

    /// Retune the rate; backlog already accumulated on the cursor is kept
    pub fn set_mb_per_sec(&self, mb_per_sec: f64) -> Result<()> {
        if !mb_per_sec.is_finite() || mb_per_sec <= 0.0 {
            return Err(StoreError::InvalidArgument(format!(
                "mb_per_sec must be a positive number (got {})",
                mb_per_sec
            )));
        }
        let nanos_per_byte = NANOS_PER_SEC / (mb_per_sec * BYTES_PER_MB);
        self.mb_per_sec.store(mb_per_sec.to_bits(), Ordering::Release);
        self.nanos_per_byte
            .store(nanos_per_byte.to_bits(), Ordering::Release);
        debug!(mb_per_sec, "rate limiter retuned");
        Ok(())
    }

    pub fn mb_per_sec(&self) -> f64 {
        f64::from_bits(self.mb_per_sec.load(Ordering::Acquire))
    }

    fn nanos_per_byte(&self) -> f64 {
        f64::from_bits(self.nanos_per_byte.load(Ordering::Acquire))
    }

    /// Block until writing `bytes` more stays within the rate; returns the
    /// time actually spent sleeping
    pub fn pause(&self, bytes: u64) -> Duration {
        if bytes <= 1 {
            return Duration::ZERO;
        }
        let cost = Duration::from_nanos((bytes as f64 * self.nanos_per_byte()) as u64);

        let target = {
            let mut last = self.last.lock();
            let target = *last + cost;
            // idle time is not banked: the cursor never trails the clock
            *last = target.max(Instant::now());
            target
        };

        let start = Instant::now();
        let mut now = start;
        // sleep may return early
        while now < target {
            thread::sleep(target - now);
            now = Instant::now();
        }
        now - start
    }
}
