//! Error types for Vuelta

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A user-supplied configuration or hook violates the loop contract.
    /// Always fatal.
    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Hook `{hook}` failed: {message}")]
    Hook { hook: String, message: String },

    #[error("Batch loop failed: {0}")]
    BatchLoop(String),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Invalid step output: {0}")]
    InvalidOutput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl Error {
    /// Wrap a failure raised inside a user hook
    pub fn hook(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hook {
            hook: hook.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
