//! Error types for densemm operations.
//!
//! Every failure that stops a multiplication is reported through
//! [`MatmulError`]. Numeric disagreement between two results is not an
//! error: it is a [`crate::ComparisonResult`] with `all_close == false`.

use thiserror::Error;

/// Errors that can occur while configuring or running a multiplication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatmulError {
    /// Invalid configuration or an unmapped (algorithm, mode) pair.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Human-readable error message.
        message: String,
    },
    /// Operand shapes do not fit the requested operation.
    #[error(
        "Shape mismatch in {}: left is {}x{}, right is {}x{}",
        .operation, .left.0, .left.1, .right.0, .right.1
    )]
    ShapeMismatch {
        /// The operation that rejected its operands.
        operation: &'static str,
        /// Shape of the left operand as (rows, cols).
        left: (usize, usize),
        /// Shape of the right operand as (rows, cols).
        right: (usize, usize),
    },
    /// A collective operation could not complete on this worker.
    #[error("Communication error on worker {rank}: {message}")]
    Communication {
        /// Rank of the worker that observed the failure.
        rank: usize,
        /// Human-readable error message.
        message: String,
    },
    /// Another worker failed and the whole run was torn down.
    #[error("Worker {rank} aborted: worker {origin} failed with: {reason}")]
    Aborted {
        /// Rank of the worker that received the abort.
        rank: usize,
        /// Rank of the worker whose failure caused the abort.
        origin: usize,
        /// The failure reported by the originating worker.
        reason: String,
    },
    /// The shared-memory thread pool could not be created.
    #[error("Thread pool error: {message}")]
    ThreadPool {
        /// Human-readable error message.
        message: String,
    },
}

impl MatmulError {
    /// Whether this error was caused by bad input rather than by the runtime.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MatmulError::Configuration { .. } | MatmulError::ShapeMismatch { .. }
        )
    }
}

/// Result type alias for densemm operations.
pub type Result<T> = std::result::Result<T, MatmulError>;

/// Creates a configuration error.
pub fn configuration_error(message: impl Into<String>) -> MatmulError {
    MatmulError::Configuration {
        message: message.into(),
    }
}

/// Creates a shape mismatch error.
pub fn shape_mismatch(
    operation: &'static str,
    left: (usize, usize),
    right: (usize, usize),
) -> MatmulError {
    MatmulError::ShapeMismatch {
        operation,
        left,
        right,
    }
}

/// Creates a communication error.
pub fn communication_error(rank: usize, message: impl Into<String>) -> MatmulError {
    MatmulError::Communication {
        rank,
        message: message.into(),
    }
}

/// Creates a thread pool error.
pub fn thread_pool_error(message: impl Into<String>) -> MatmulError {
    MatmulError::ThreadPool {
        message: message.into(),
    }
}
