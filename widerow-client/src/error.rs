/// Error types for the widerow client
use crate::chunk::Violation;
use crate::retry;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;
use tonic::{Code, Status};

#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("Protocol violation: {0}")]
    ProtocolViolation(#[from] Violation),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Server unavailable: {0}")]
    Unavailable(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Data loss: {0}")]
    DataLoss(String),

    #[error("Request aborted: {0}")]
    Aborted(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("{0}")]
    PartialFailure(PartialFailure),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Returns a stable error code for this error variant.
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::ProtocolViolation(_) => "PROTOCOL_VIOLATION",
            ClientError::NotFound(_) => "NOT_FOUND",
            ClientError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ClientError::FailedPrecondition(_) => "FAILED_PRECONDITION",
            ClientError::ConnectionError(_) => "CONNECTION_ERROR",
            ClientError::InvalidConfig(_) => "INVALID_CONFIG",
            ClientError::Unavailable(_) => "UNAVAILABLE",
            ClientError::Timeout(_) => "DEADLINE_EXCEEDED",
            ClientError::Internal(_) => "INTERNAL",
            ClientError::DataLoss(_) => "DATA_LOSS",
            ClientError::Aborted(_) => "ABORTED",
            ClientError::AlreadyExists(_) => "ALREADY_EXISTS",
            ClientError::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            ClientError::OutOfRange(_) => "OUT_OF_RANGE",
            ClientError::Unimplemented(_) => "UNIMPLEMENTED",
            ClientError::PermissionDenied(_) => "PERMISSION_DENIED",
            ClientError::Unauthenticated(_) => "UNAUTHENTICATED",
            ClientError::Cancelled(_) => "CANCELLED",
            ClientError::PartialFailure(_) => "PARTIAL_FAILURE",
            ClientError::Unknown(_) => "UNKNOWN",
        }
    }

    /// Returns true if the failed RPC attempt may be retried.
    ///
    /// Deadline, resource-exhaustion, aborted and unavailable statuses are
    /// transient. An internal error is transient only when it reports a
    /// mid-stream HTTP/2 reset. Protocol violations are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Timeout(_)
            | ClientError::ResourceExhausted(_)
            | ClientError::Aborted(_)
            | ClientError::Unavailable(_) => true,
            ClientError::Internal(msg) => retry::is_rst_stream_message(msg),
            _ => false,
        }
    }
}

/// Convert gRPC Status to ClientError
impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        let msg = status.message().to_string();

        match status.code() {
            Code::NotFound => ClientError::NotFound(msg),
            Code::InvalidArgument => ClientError::InvalidArgument(msg),
            Code::FailedPrecondition => ClientError::FailedPrecondition(msg),
            Code::Unavailable => ClientError::Unavailable(msg),
            Code::DeadlineExceeded => ClientError::Timeout(msg),
            Code::Internal => ClientError::Internal(msg),
            Code::DataLoss => ClientError::DataLoss(msg),
            Code::Aborted => ClientError::Aborted(msg),
            Code::AlreadyExists => ClientError::AlreadyExists(msg),
            Code::ResourceExhausted => ClientError::ResourceExhausted(msg),
            Code::OutOfRange => ClientError::OutOfRange(msg),
            Code::Unimplemented => ClientError::Unimplemented(msg),
            Code::PermissionDenied => ClientError::PermissionDenied(msg),
            Code::Unauthenticated => ClientError::Unauthenticated(msg),
            Code::Cancelled => ClientError::Cancelled(msg),
            _ => ClientError::Unknown(msg),
        }
    }
}

/// The final failure of one mutation entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryFailure {
    /// Position of the entry in the caller's list.
    pub index: usize,
    pub row_key: Bytes,
    pub code: Code,
    pub message: String,
}

impl fmt::Display for EntryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entry {} (row {:?}): {:?}: {}",
            self.index,
            String::from_utf8_lossy(&self.row_key),
            self.code,
            self.message
        )
    }
}

/// Entries of a mutation batch that never reached success.
///
/// Entries not listed here were applied. Rows are independent, so the caller
/// can resubmit exactly the listed entries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PartialFailure {
    pub failures: Vec<EntryFailure>,
}

impl PartialFailure {
    /// Indices, in the caller's entry list, of the failed entries.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.index).collect()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failures.as_slice() {
            [] => write!(f, "Partial failure with no failed entries"),
            [only] => write!(f, "Partial failure: {}", only),
            many => {
                writeln!(f, "Partial failure: {} entries failed", many.len())?;
                for (i, failure) in many.iter().enumerate() {
                    writeln!(f, "    {}. {}", i + 1, failure)?;
                }
                Ok(())
            }
        }
    }
}
