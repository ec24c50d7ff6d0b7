use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArrayError>;

#[derive(Debug, Error)]
pub enum ArrayError {
    #[error("cannot open file: {0}")]
    CannotOpenFile(#[source] io::Error),
    #[error("not a huge array file")]
    NotAHugeArray,
    #[error("incompatible format version {0}")]
    IncompatibleVersion(u32),
    #[error("file truncated below header and root node")]
    Truncated,
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("write failed: {0}")]
    WriteFailure(#[source] io::Error),
    #[error("update callback failed: {0}")]
    BadUpdateResponse(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("corruption detected: {0}")]
    Corruption(String),
    #[error("file size limit of 4 GiB reached")]
    Full,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
