//! Error types and status codes for the hostsys platform layer
//!
//! Recoverable failures travel as [`SysError`]. Caller bugs (a non-owner
//! releasing a monitor, a thread inspecting itself) never show up here;
//! they go through [`crate::fatal`] instead.

use core::fmt;

/// Result type for platform operations
pub type SysResult<T> = Result<T, SysError>;

/// Status code the embedding runtime receives on success
pub const STATUS_OK: i32 = 0;

/// Errors that can occur in platform operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SysError {
    /// The OS refused to create a primitive
    ResourceExhausted(ResourceError),

    /// A fault handler is already registered with the OS
    AlreadyInstalled,

    /// No fault handler is registered
    NotInstalled,

    /// Target thread has already run to completion
    ThreadFinished,

    /// Could not stop the target thread for inspection (errno)
    SuspendFailed(i32),

    /// Operation is not available on this platform/architecture
    Unsupported(&'static str),

    /// Caller passed an argument the operation cannot accept
    InvalidArgument(&'static str),

    /// Configuration rejected by validation
    Config(&'static str),
}

impl SysError {
    /// Numeric status for the runtime's factory surface (never zero)
    pub fn status(&self) -> i32 {
        match self {
            SysError::ResourceExhausted(_) => 1,
            SysError::AlreadyInstalled => 2,
            SysError::NotInstalled => 3,
            SysError::ThreadFinished => 4,
            SysError::SuspendFailed(_) => 5,
            SysError::Unsupported(_) => 6,
            SysError::InvalidArgument(_) => 7,
            SysError::Config(_) => 8,
        }
    }
}

/// Collapse a result into the status-code convention (0 = success)
pub fn status_of<T>(result: &SysResult<T>) -> i32 {
    match result {
        Ok(_) => STATUS_OK,
        Err(e) => e.status(),
    }
}

impl fmt::Display for SysError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SysError::ResourceExhausted(e) => write!(f, "resource exhausted: {}", e),
            SysError::AlreadyInstalled => write!(f, "fault handler already installed"),
            SysError::NotInstalled => write!(f, "fault handler not installed"),
            SysError::ThreadFinished => write!(f, "thread has finished"),
            SysError::SuspendFailed(errno) => write!(f, "failed to suspend thread (errno {})", errno),
            SysError::Unsupported(what) => write!(f, "unsupported: {}", what),
            SysError::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            SysError::Config(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for SysError {}

/// Which OS resource could not be created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Lock,
    Event,
    Thread,
    Memory,
    SignalHandler,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Lock => "lock",
            Resource::Event => "event",
            Resource::Thread => "thread",
            Resource::Memory => "memory",
            Resource::SignalHandler => "signal handler",
        };
        f.write_str(name)
    }
}

/// OS resource creation failure with the errno that caused it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceError {
    pub resource: Resource,
    pub errno: i32,
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to create {} (errno {})", self.resource, self.errno)
    }
}

impl SysError {
    /// Shorthand for a resource-exhaustion error
    #[inline]
    pub fn exhausted(resource: Resource, errno: i32) -> Self {
        SysError::ResourceExhausted(ResourceError { resource, errno })
    }
}

impl From<ResourceError> for SysError {
    fn from(e: ResourceError) -> Self {
        SysError::ResourceExhausted(e)
    }
}
