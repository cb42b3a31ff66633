//! Construction options.

use crate::error::{Error, Result};

pub const DEFAULT_BUCKETS: usize = 16;
pub const DEFAULT_MAX_LOAD_FACTOR: f32 = 1.0;

/// Initial sizing and growth threshold for a map.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MapOptions {
    /// Size of the first bucket array. `0` defers allocation to the first
    /// insert.
    pub buckets: usize,
    /// Growth happens before `len / bucket_count` would exceed this.
    pub max_load_factor: f32,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            buckets: DEFAULT_BUCKETS,
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
        }
    }
}

impl MapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buckets(mut self, n: usize) -> Self {
        self.buckets = n;
        self
    }

    pub fn max_load_factor(mut self, f: f32) -> Self {
        self.max_load_factor = f;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_load_factor(self.max_load_factor)
    }
}

pub(crate) fn check_load_factor(f: f32) -> Result<()> {
    if f.is_finite() && f > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidLoadFactor(f))
    }
}

/// Smallest bucket count keeping `len` entries within `max_load_factor`.
pub(crate) fn buckets_for(len: usize, max_load_factor: f32) -> usize {
    if len == 0 {
        return 0;
    }
    // Float-to-int casts saturate, so absurd ratios clamp to usize::MAX.
    ((len as f64) / f64::from(max_load_factor)).ceil() as usize
}

/// Whether `len` entries over `buckets` buckets respect `max_load_factor`.
pub(crate) fn within_load(len: usize, buckets: usize, max_load_factor: f32) -> bool {
    len as f64 <= f64::from(max_load_factor) * buckets as f64
}
