//! Error types for workflow operations

use docflow_common::JsonStoreError;
use thiserror::Error;

use crate::models::StepId;

/// Errors that can occur during workflow operations
///
/// Every variant is a typed outcome the caller can map to a precise response;
/// none of them leave engine state half-updated.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Invalid budget, batch size or pipeline declaration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Step gating violation
    #[error("Step {step} cannot start, unfinished predecessors: {missing:?}")]
    DependencyNotMet {
        /// Step that was requested
        step: StepId,
        /// Predecessors that are neither completed nor saved
        missing: Vec<StepId>,
    },

    /// Step is already running
    #[error("Step {0} is already running")]
    AlreadyRunning(StepId),

    /// Unknown workflow, step or task
    #[error("Not found: {0}")]
    NotFound(String),

    /// Task belongs to a queue that was discarded by a reset or replaced
    #[error("Stale task: {0}")]
    StaleTask(String),

    /// Status change not allowed from the current status
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// External processor reported a failure
    #[error("Processing failed: {0}")]
    Processing(String),

    /// Snapshot state is inconsistent with the pipeline
    #[error("State error: {0}")]
    StateError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<docflow_config::ConfigError> for WorkflowError {
    fn from(err: docflow_config::ConfigError) -> Self {
        WorkflowError::ConfigurationError(err.to_string())
    }
}

impl From<JsonStoreError> for WorkflowError {
    fn from(err: JsonStoreError) -> Self {
        match err {
            JsonStoreError::Io(e) => WorkflowError::IoError(e),
            JsonStoreError::Serialize(e) => WorkflowError::SerializationError(e),
            JsonStoreError::NotFound { path } => {
                WorkflowError::NotFound(format!("Snapshot not found: {}", path))
            }
        }
    }
}

/// Result type for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
