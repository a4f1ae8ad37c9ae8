//! Error types for the Ember Vulkan renderer core
//!
//! This module defines the error types used throughout the renderer core,
//! covering device initialization, layout transitions, and resource lookup.

use std::fmt;

use crate::transition::ImageLayout;

/// Result type for renderer core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Renderer core errors
#[derive(Debug, Clone)]
pub enum Error {
    /// Initialization failed (instance, device, allocator, pipeline construction).
    /// Construction failures are not retried; they propagate to whoever owns the
    /// application lifecycle.
    InitializationFailed(String),

    /// A layout transition was requested through a pair outside the supported
    /// table. This is a logic error in the caller and is never swallowed: the
    /// image's tracked layout is left untouched.
    UnsupportedLayoutTransition {
        old: ImageLayout,
        new: ImageLayout,
    },

    /// A named resource was never loaded. Recoverable: the caller may fall back
    /// to a default resource.
    ResourceNotFound(String),

    /// Vulkan call failed outside of construction (submission, recording,
    /// memory binding), or a shared lock was poisoned.
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// A resource was used in a way its current state does not allow
    /// (malformed bytecode, upload outside transfer-dst layout, empty data).
    InvalidResource(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::UnsupportedLayoutTransition { old, new } => {
                write!(f, "Unsupported layout transition: {:?} -> {:?}", old, new)
            }
            Error::ResourceNotFound(msg) => write!(f, "Resource not found: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
