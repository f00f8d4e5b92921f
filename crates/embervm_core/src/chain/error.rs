use embervm_chainbase::ChainbaseError;
use embervm_serialization::{ReadError, WriteError};
use thiserror::Error;

use super::Name;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("internal error: {0:?}")]
    InternalError(Option<String>),
    #[error("database error: {0}")]
    DatabaseError(String),
    #[error("transaction error: {0}")]
    TransactionError(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("serialization error: {0}")]
    SerializationError(String),
    #[error("authorizing account '{0}' has insufficient cpu resources for this transaction")]
    TxCpuUsageExceeded(Name),
    #[error("authorizing account '{0}' has insufficient net resources for this transaction")]
    TxNetUsageExceeded(Name),
    #[error("block has insufficient {0} resources")]
    BlockResourceExhausted(String),
    #[error("account '{0}' has insufficient ram; needs {1} bytes has {2} bytes")]
    RamUsageExceeded(Name, u64, u64),
}

impl From<ReadError> for ChainError {
    fn from(e: ReadError) -> Self {
        ChainError::SerializationError(e.to_string())
    }
}

impl From<WriteError> for ChainError {
    fn from(e: WriteError) -> Self {
        ChainError::SerializationError(e.to_string())
    }
}

impl From<ChainbaseError> for ChainError {
    fn from(e: ChainbaseError) -> Self {
        ChainError::DatabaseError(e.to_string())
    }
}
