//! Error types for parsing the shared vocabulary
//!
//! Using thiserror, same as the rest of the workspace.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid pair: {0}")]
    InvalidPair(String),

    #[error("unknown category: {0}")]
    UnknownCategory(String),

    #[error("malformed topic: {0}")]
    MalformedTopic(String),

    #[error("invalid account id: {0}")]
    InvalidAccountId(String),
}
