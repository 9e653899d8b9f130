// Domain errors - Error types for the domain layer

use std::fmt;

/// How a failure affects the recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Request arrived at the wrong time; nothing changed
    Precondition,
    /// A file, writer or reader could not be acquired; the operation is abandoned
    Resource,
    /// The encoder stopped producing output; handled as end of stream
    Stall,
    /// The encoder instance is unusable and must be recreated
    Fatal,
}

/// Domain-specific error types
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Invalid arguments provided
    BadArgs(String),
    /// Encoder warm-up incomplete (output format not yet known)
    NotReady(String),
    /// Request does not match an edge of the phase machine
    InvalidTransition(String),
    /// Operation refused while a segment is being captured
    Busy(String),
    /// File not found
    FileNotFound(String),
    /// File system failure
    FsFail(String),
    /// Container writer failure
    MuxFail(String),
    /// Container reader failure
    DemuxFail(String),
    /// Encoder failure
    EncoderFail(String),
    /// Encoder produced no output within the poll window
    Stalled(String),
    /// Resource not available
    ResourceUnavailable(String),
    /// Processing error
    ProcessingError(String),
    /// Internal error
    InternalError(String),
}

impl DomainError {
    /// Classify the error for the session's recovery policy
    pub fn class(&self) -> ErrorClass {
        match self {
            DomainError::BadArgs(_)
            | DomainError::NotReady(_)
            | DomainError::InvalidTransition(_)
            | DomainError::Busy(_) => ErrorClass::Precondition,
            DomainError::FileNotFound(_)
            | DomainError::FsFail(_)
            | DomainError::MuxFail(_)
            | DomainError::DemuxFail(_)
            | DomainError::ResourceUnavailable(_)
            | DomainError::ProcessingError(_) => ErrorClass::Resource,
            DomainError::Stalled(_) => ErrorClass::Stall,
            DomainError::EncoderFail(_) | DomainError::InternalError(_) => ErrorClass::Fatal,
        }
    }

    /// True when the session can carry on after this error
    pub fn is_recoverable(&self) -> bool {
        self.class() != ErrorClass::Fatal
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::BadArgs(msg) => write!(f, "Bad arguments: {}", msg),
            DomainError::NotReady(msg) => write!(f, "Not ready: {}", msg),
            DomainError::InvalidTransition(msg) => write!(f, "Invalid transition: {}", msg),
            DomainError::Busy(msg) => write!(f, "Busy: {}", msg),
            DomainError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            DomainError::FsFail(msg) => write!(f, "File system error: {}", msg),
            DomainError::MuxFail(msg) => write!(f, "Container writer error: {}", msg),
            DomainError::DemuxFail(msg) => write!(f, "Container reader error: {}", msg),
            DomainError::EncoderFail(msg) => write!(f, "Encoder error: {}", msg),
            DomainError::Stalled(msg) => write!(f, "Encoder stalled: {}", msg),
            DomainError::ResourceUnavailable(msg) => write!(f, "Resource unavailable: {}", msg),
            DomainError::ProcessingError(msg) => write!(f, "Processing error: {}", msg),
            DomainError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for DomainError {}
