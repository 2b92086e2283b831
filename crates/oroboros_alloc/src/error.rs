//! # Allocator Error Types
//!
//! Diagnostic reasons behind an empty [`MemoryHandle`](crate::MemoryHandle).
//!
//! The plain allocation path never surfaces these: it returns an empty handle.
//! The `try_*` variants of the contract return them so callers and tests can
//! tell exhaustion apart from misuse.

use thiserror::Error;

use crate::handle::AllocatorId;

/// Errors that can occur while allocating or configuring allocators.
#[must_use = "errors should be handled"]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// No instance can satisfy the request and growth failed or is disallowed.
    #[error("out of capacity: {size} bytes aligned to {align}")]
    OutOfCapacity {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// The request is larger than any single instance could ever provide.
    #[error("capacity exceeded: requested {requested} bytes, one instance provides at most {max}")]
    CapacityExceeded {
        /// Requested size in bytes.
        requested: usize,
        /// Largest request a fresh instance can serve.
        max: usize,
    },

    /// The strategy cannot honour the requested alignment.
    #[error("alignment violation: {align} is not supported (max {max})")]
    AlignmentViolation {
        /// Requested alignment in bytes.
        align: usize,
        /// Largest alignment the strategy supports.
        max: usize,
    },

    /// A handle was presented to an allocator that did not produce it.
    #[error("invalid ownership: handle owned by {owner:?}")]
    InvalidOwnership {
        /// Identity recorded in the offending handle.
        owner: Option<AllocatorId>,
    },

    /// Zero-sized requests are rejected.
    #[error("zero-sized allocation request")]
    ZeroSize,

    /// Strategy or arena configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AllocError {
    /// Stable category string for logs and metrics.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::OutOfCapacity { .. } => "ALLOC:CAPACITY:OUT",
            Self::CapacityExceeded { .. } => "ALLOC:CAPACITY:EXCEEDED",
            Self::AlignmentViolation { .. } => "ALLOC:ALIGN",
            Self::InvalidOwnership { .. } => "ALLOC:OWNERSHIP",
            Self::ZeroSize => "ALLOC:ZERO_SIZE",
            Self::InvalidConfig(_) => "ALLOC:CONFIG",
        }
    }

    /// Whether the same request could succeed later, after frees.
    ///
    /// Retry policy belongs to the caller; the allocators never retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::OutOfCapacity { .. })
    }

    /// Shorthand for an [`AllocError::InvalidConfig`] built from any message.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }
}

/// Result type for allocator operations.
pub type AllocResult<T> = Result<T, AllocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AllocError::CapacityExceeded {
            requested: 128,
            max: 64,
        };
        let message = error.to_string();
        assert!(message.contains("128"));
        assert!(message.contains("64"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AllocError::OutOfCapacity { size: 1, align: 1 }.code(),
            "ALLOC:CAPACITY:OUT"
        );
        assert_eq!(AllocError::ZeroSize.code(), "ALLOC:ZERO_SIZE");
        assert_eq!(AllocError::invalid_config("x").code(), "ALLOC:CONFIG");
    }

    #[test]
    fn test_retryable() {
        assert!(AllocError::OutOfCapacity { size: 8, align: 8 }.is_retryable());
        assert!(!AllocError::AlignmentViolation { align: 128, max: 64 }.is_retryable());
        assert!(!AllocError::CapacityExceeded { requested: 2, max: 1 }.is_retryable());
    }
}
