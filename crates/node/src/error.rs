//! Error types of the node binary.

/// Result type alias carrying [Error].
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong outside the core crates.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Decode error.")]
    DecodeError,
    #[error("Encode error.")]
    EncodeError,
    #[error("Invalid logging level: {0}")]
    InvalidLoggingLevel(String),
    #[error("Create File Error: {0}")]
    CreateFileError(String),
    #[error("Open File Error: {0}")]
    OpenFileError(String),
    #[error("Cannot find home directory")]
    HomeDirError,
    #[error("Cannot find parent directory")]
    ParentDirError,
    #[error("Serde yaml error: {0}")]
    SerdeYamlError(#[from] serde_yaml::Error),
    #[error("Core error: {0}")]
    CoreError(#[from] backchannel_core::error::Error),
}
