use thiserror::Error;

use crate::view::ViewKey;

#[derive(Error, Debug)]
pub enum MvregError {
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Corrupt archive entry {path}: {reason}")]
    CorruptEntry { path: String, reason: String },

    #[error("No {what} stored under {key}")]
    NotFound { what: &'static str, key: ViewKey },

    #[error("A view is already stored under {0}")]
    DuplicateKey(ViewKey),

    #[error("Cannot add a transform for {0}: no registered view exists at that key")]
    MissingRegisteredView(ViewKey),

    #[error("Archive has been closed")]
    ClosedArchive,

    #[error("Unknown similarity metric: {0}")]
    UnknownMetric(String),

    #[error("Registration failed to converge: {0}")]
    Convergence(String),

    #[error("No registration result available yet; run execute() first")]
    NotReady,

    #[error("Unreadable image {path}: {reason}")]
    UnreadableImage { path: String, reason: String },

    #[error("Invalid image dimensions: {0:?}")]
    InvalidDimensions(Vec<usize>),

    #[error("Invalid transform: {0}")]
    InvalidTransform(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, MvregError>;
