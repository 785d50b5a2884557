use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Copy failed: {0}")]
    CopyFailed(String),

    #[error("Backup corrupt: {0}")]
    BackupCorrupt(String),

    #[error("No device found for UUID {0}")]
    NoSuchUuid(String),

    #[error("Source does not exist: {0}")]
    NoSuchSource(String),

    #[error("Device lookup by UUID is not implemented for platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BackupError>;
