//! Error types for netfilter netlink operations.

use std::io;

/// Result type for netfilter netlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during netfilter netlink operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Kernel rejected a request.
    #[error("kernel error: {message} (errno {errno})")]
    Kernel {
        /// The (positive) errno value from the kernel.
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// Kernel error with operation context.
    #[error("{operation}: {message} (errno {errno})")]
    KernelWithContext {
        /// The operation that failed.
        operation: String,
        /// The (positive) errno value from the kernel.
        errno: i32,
        /// Human-readable error message.
        message: String,
    },

    /// Buffer too short to hold the expected header.
    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected message length.
        expected: usize,
        /// Actual bytes available.
        actual: usize,
    },

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Invalid attribute format.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    /// Parse error.
    #[error("parse error: {0}")]
    Parse(String),

    /// The kernel dropped notifications because the socket receive buffer overflowed.
    #[error("no buffer space: kernel dropped messages")]
    NoBuffers,

    /// The handle has no open socket (not opened yet, or already closed).
    #[error("no socket open")]
    NotOpen,
}

impl Error {
    /// Create a kernel error from a netlink ack code (negative errno).
    pub fn from_errno(errno: i32) -> Self {
        let errno = errno.saturating_abs();
        let message = io::Error::from_raw_os_error(errno).to_string();
        Self::Kernel { errno, message }
    }

    /// Create a kernel error with operation context.
    pub fn from_errno_with_context(errno: i32, operation: impl Into<String>) -> Self {
        Self::from_errno(errno).with_context(operation)
    }

    /// Classify an I/O error coming off the socket.
    ///
    /// ENOBUFS on receive means the kernel dropped messages; it is reported
    /// as [`Error::NoBuffers`] so callers can keep reading.
    pub fn from_recv(err: io::Error) -> Self {
        if err.raw_os_error() == Some(libc::ENOBUFS) {
            Self::NoBuffers
        } else {
            Self::Io(err)
        }
    }

    /// Add context to this error.
    ///
    /// Wraps kernel errors with operation context. Other errors are returned unchanged.
    pub fn with_context(self, operation: impl Into<String>) -> Self {
        match self {
            Self::Kernel { errno, message } => Self::KernelWithContext {
                operation: operation.into(),
                errno,
                message,
            },
            other => other,
        }
    }

    /// Check if this is a "not found" error (ENOENT, ENODEV).
    pub fn is_not_found(&self) -> bool {
        matches!(self.errno(), Some(libc::ENOENT | libc::ENODEV))
    }

    /// Check if this is a permission error (EPERM, EACCES).
    pub fn is_permission_denied(&self) -> bool {
        matches!(self.errno(), Some(libc::EPERM | libc::EACCES))
    }

    /// Check if this is an "already exists" error (EEXIST).
    pub fn is_already_exists(&self) -> bool {
        self.errno() == Some(libc::EEXIST)
    }

    /// Check if this is a "device busy" error (EBUSY).
    ///
    /// Binding a queue number that another process owns fails this way.
    pub fn is_busy(&self) -> bool {
        self.errno() == Some(libc::EBUSY)
    }

    /// Check if this is a backpressure error.
    pub fn is_no_buffers(&self) -> bool {
        match self {
            Self::NoBuffers => true,
            Self::Io(e) => e.raw_os_error() == Some(libc::ENOBUFS),
            _ => false,
        }
    }

    /// Check if this error comes from using a closed or unopened handle.
    pub fn is_not_open(&self) -> bool {
        matches!(self, Self::NotOpen)
    }

    /// Get the errno value if this is a kernel error.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Kernel { errno, .. } | Self::KernelWithContext { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}
