//! FILENAME: core/pivot-engine/src/error.rs

use std::time::Duration;
use thiserror::Error;

/// Backend bring-up failed. Shared with every caller waiting on the same
/// initialization attempt, so it must stay cheap to clone.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InitializationError {
    #[error("backend initialization timed out after {0:?}")]
    TimedOut(Duration),

    #[error("backend initialization failed: {0}")]
    Backend(String),

    #[error("dataset load failed: {0}")]
    Load(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// A single steady-state backend call failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("{operation} failed: {message}")]
    Fault { operation: String, message: String },

    #[error("{operation} timed out after {timeout:?}")]
    TimedOut { operation: String, timeout: Duration },

    #[error("backend worker disconnected")]
    Disconnected,

    #[error("{operation} received unexpected response '{received}'")]
    UnexpectedResponse { operation: String, received: String },
}

/// Error surfaced at the data access boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error(transparent)]
    Initialization(#[from] InitializationError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Pivot configuration that cannot be rendered. The engine reports these
/// through the log and degrades to empty output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("dimension '{0}' is not present in the dataset")]
    UnknownDimension(String),

    #[error("duplicate table id '{0}'")]
    DuplicateTableId(String),
}

pub type Result<T> = std::result::Result<T, SourceError>;
