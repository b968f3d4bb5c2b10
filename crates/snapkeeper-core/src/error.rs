use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Cannot open store at '{path}': {reason}")]
    StorageOpen { path: String, reason: String },

    #[error("Store integrity check failed: {0}")]
    StorageIntegrity(String),

    #[error("Hash algorithm '{0}' is not available")]
    HashUnavailable(String),

    #[error("Verification mismatch for '{path}': expected {expected}, got {actual}")]
    VerificationMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid pipeline transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for the terminal-outcome case that is not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
