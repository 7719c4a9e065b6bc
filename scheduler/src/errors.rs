// Error types for the trigger scheduler core

use thiserror::Error;

/// Trigger document (de)serialization errors. A malformed date or time
/// string is fatal to the parse and is never silently defaulted.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("malformed trigger document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Trigger evaluation errors.
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("trigger callback failed for '{tag}': {source}")]
    Callback {
        tag: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
