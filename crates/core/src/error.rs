//! Error types for the script execution engine.
//!
//! [`EngineError`] is what callers of the engine see. [`ContextError`] is
//! raised by individual execution contexts and mapped into an
//! [`EngineError`] at the engine boundary. [`ConfigError`] covers invalid
//! engine configuration.

use std::path::PathBuf;

/// Errors surfaced by [`Engine`](crate::scripting::engine::Engine) operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Script engine is not initialized")]
    NotInitialized,

    #[error("Script not found: {}", .0.display())]
    ScriptNotFound(PathBuf),

    #[error("Failed to read script {}: {source}", .path.display())]
    ScriptReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Script execution error: {message}")]
    ScriptExecutionError { message: String },

    #[error("Failed to initialize context pool: {0}")]
    PoolInitializationError(#[source] ContextError),

    #[error("Script timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Script run aborted: engine was stopped")]
    Aborted,

    #[error("Execution context fault: {0}")]
    ContextFault(#[source] ContextError),
}

/// Errors raised by an execution context while creating or running.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Interpreter not found: {0}")]
    InterpreterNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run exceeded its time limit after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Run cancelled")]
    Cancelled,
}

/// Invalid engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid context bounds: min {min}, max {max} (need 1 <= max and min <= max)")]
    InvalidBounds { min: usize, max: usize },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

impl From<ContextError> for EngineError {
    /// Map a context-level failure that happened during a run.
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Timeout { elapsed_ms } => Self::Timeout { elapsed_ms },
            ContextError::Cancelled => Self::Aborted,
            other => Self::ContextFault(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
