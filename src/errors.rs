// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaseError {
    /// Bad input, including completion requested on a non-completable stage.
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// The requested transition is not allowed from the current state.
    #[error(
        "Illegal state: cannot {operation} '{plan_item}' in state {current} (required: {required})"
    )]
    IllegalState {
        plan_item: String,
        current: String,
        required: String,
        operation: String,
    },

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Another cycle committed the same case first. Retryable.
    #[error("Optimistic lock conflict on case {case_id}: expected version {expected}, found {actual}")]
    OptimisticLockConflict {
        case_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Delegate '{delegate}' failed: {source}")]
    DelegateFailure {
        delegate: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Agenda exceeded {0} operations in a single cycle")]
    AgendaLimitExceeded(usize),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in stage hierarchy: {0}")]
    ModelCycle(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CaseError {
    pub fn illegal_state(
        plan_item: impl Into<String>,
        current: impl ToString,
        required: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        CaseError::IllegalState {
            plan_item: plan_item.into(),
            current: current.to_string(),
            required: required.into(),
            operation: operation.into(),
        }
    }

    /// Errors a caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CaseError::OptimisticLockConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, CaseError>;
