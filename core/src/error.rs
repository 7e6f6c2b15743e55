use thiserror::Error;

/// Error taxonomy for the LP metadata codec and layout editor.
///
/// Each variant names a stable failure kind rather than carrying a free-form
/// message only: callers (and tests) match on the kind, not on formatted text.
#[derive(Debug, Error)]
pub enum LpError {
    #[error("invalid data at offset {offset}: {reason}")]
    InvalidData { offset: u64, reason: String },

    #[error("checksum mismatch in {region} (offset {offset})")]
    Checksum { region: &'static str, offset: u64 },

    #[error("capacity exceeded: {reason}")]
    Capacity { reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type LpResult<T> = Result<T, LpError>;
