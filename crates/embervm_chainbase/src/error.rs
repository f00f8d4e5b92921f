use embervm_serialization::{ReadError, WriteError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainbaseError {
    #[error("item not found")]
    NotFound,
    #[error("item already exists")]
    AlreadyExists,
    #[error("invalid data provided")]
    InvalidData,
    #[error("error reading data")]
    ReadError,
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<ReadError> for ChainbaseError {
    fn from(_: ReadError) -> Self {
        ChainbaseError::ReadError
    }
}

impl From<WriteError> for ChainbaseError {
    fn from(e: WriteError) -> Self {
        ChainbaseError::InternalError(format!("failed to serialize object: {}", e))
    }
}
