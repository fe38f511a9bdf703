//! Error types for the decision core

use std::path::PathBuf;

/// Errors raised by the decision core and its stores
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("persistence failed for {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt state in {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("collaborator call failed ({operation}): {reason}")]
    Collaborator { operation: String, reason: String },

    #[error("invalid trade parameters: {0}")]
    InvalidTrade(String),

    #[error("unknown trading mode: {0}")]
    UnknownMode(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BotError {
    pub fn collaborator(operation: &str, reason: impl std::fmt::Display) -> Self {
        Self::Collaborator {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for decision-core operations
pub type Result<T> = std::result::Result<T, BotError>;
