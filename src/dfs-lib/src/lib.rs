use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

pub mod checksum;
pub mod config;
pub mod path;
pub mod rpc;
pub mod wire;

pub use checksum::crc32;
pub use rpc::{RpcClient, RpcHandler, RpcRequest, RpcResponse, RpcResult, RpcServer};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DfsError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid argument: {0}")]
    InvalidParam(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("integrity error: {0}")]
    IntegrityError(String),
    #[error("not empty: {0}")]
    NotEmpty(String),
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("remote error: {0}")]
    RemoteError(String),
    #[error("db error: {0}")]
    DbError(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type DfsResult<T> = Result<T, DfsError>;

impl DfsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DfsError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DfsError::Conflict(_))
    }
}

/// Collapse the errors of a multi-step pass into a single error so one
/// bad entry does not hide the rest. `None` when every step succeeded.
pub fn join_errors(errors: Vec<DfsError>) -> Option<DfsError> {
    if errors.is_empty() {
        return None;
    }
    if errors.len() == 1 {
        return errors.into_iter().next();
    }
    let joined = errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    Some(DfsError::Internal(format!(
        "{} errors: {}",
        errors.len(),
        joined
    )))
}

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn unix_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
