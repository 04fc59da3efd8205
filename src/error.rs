//! Error types for the sync engine.

use crate::subscriptions::SubscriptionId;
use crate::types::RecordRef;
use thiserror::Error;

/// Main error type for engine operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A selection names a formatter that is not registered, or is otherwise unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Record not found: {0}")]
    NotFound(RecordRef),

    #[error("Subscription not found: {0:?}")]
    SubscriptionNotFound(SubscriptionId),

    /// A compare-and-swap write lost against a concurrent writer.
    #[error("Concurrency conflict: {0}")]
    Concurrency(String),

    /// The store rejected a write.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Registry is locked by another process")]
    Locked,

    #[error("Task dispatch failed: {0}")]
    Dispatch(String),
}

/// Coarse classification of a [`SyncError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    NotFound,
    Concurrency,
    Persistence,
    Internal,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Configuration(_) => ErrorKind::Configuration,
            SyncError::NotFound(_) | SyncError::SubscriptionNotFound(_) => ErrorKind::NotFound,
            SyncError::Concurrency(_) | SyncError::Locked => ErrorKind::Concurrency,
            SyncError::Persistence(_) | SyncError::Io(_) => ErrorKind::Persistence,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for SyncError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SyncError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        SyncError::Deserialization(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;
