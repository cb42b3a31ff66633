//! Error type shared by the sequence and the map.

use thiserror::Error;

/// Failures reported by fallible map and sequence operations.
///
/// Every variant except [`Error::InvariantViolation`] leaves the container
/// exactly as it was before the call.
#[derive(Error, Debug)]
pub enum Error {
    /// The allocation strategy refused to grant a block.
    #[error("allocation failed: requested {size} bytes (align {align})")]
    AllocationFailure {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment.
        align: usize,
    },

    /// The constructor of a new entry failed.
    #[error("entry construction failed: {0}")]
    ConstructionFailure(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// `at`/`at_mut` was called with a key that is not present.
    #[error("key not found")]
    KeyNotFound,

    /// A load factor that is not finite and strictly positive.
    #[error("invalid max load factor: {0}")]
    InvalidLoadFactor(f32),

    /// Reported by `validate()` when a structural invariant is broken.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

/// Result alias used across the crate.
pub type Result<T> = core::result::Result<T, Error>;

impl From<crate::allocator::AllocError> for Error {
    fn from(e: crate::allocator::AllocError) -> Self {
        Error::AllocationFailure {
            size: e.layout.size(),
            align: e.layout.align(),
        }
    }
}

/// Panic on allocation failure, mirroring `std::alloc::handle_alloc_error`.
/// Used by the infallible convenience wrappers.
#[track_caller]
pub(crate) fn or_alloc_panic<T>(r: Result<T>) -> T {
    match r {
        Ok(v) => v,
        Err(e) => panic!("{e}"),
    }
}
