use crate::models::Stage;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Destination for stage {stage} does not exist: {location}")]
    DestinationNotFound { stage: Stage, location: String },

    #[error("Artifact '{key}' not found in stage {stage}")]
    SourceNotFound { stage: Stage, key: String },

    #[error("An error occurred ({status}) when calling the {operation} operation: Not Found")]
    NotFound { operation: &'static str, status: u16 },

    #[error("Access denied when calling the {operation} operation: {message}")]
    AccessDenied {
        operation: &'static str,
        message: String,
    },

    #[error("Transfer failed when calling the {operation} operation: {message}")]
    TransferFailure {
        operation: &'static str,
        message: String,
    },

    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("Source and destination are both {stage}")]
    SameStage { stage: Stage },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn transfer(operation: &'static str, message: impl Into<String>) -> Self {
        StorageError::TransferFailure {
            operation,
            message: message.into(),
        }
    }

    /// HTTP-equivalent status code, when the failure carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            StorageError::NotFound { status, .. } => Some(*status),
            StorageError::AccessDenied { .. } => Some(403),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::SourceNotFound { .. }
            | StorageError::DestinationNotFound { .. }
            | StorageError::NotFound { .. } => true,
            StorageError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
