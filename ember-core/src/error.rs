use std::path::PathBuf;
use thiserror::Error;

/// The main result type for ember-core operations.
pub type EmberResult<T> = Result<T, EmberError>;

/// Enum representing possible errors within the ember-core library.
#[derive(Error, Debug)]
pub enum EmberError {
    #[error("the key is empty")]
    EmptyKey,

    #[error("key exceeded the max length")]
    KeyTooLarge,

    #[error("value exceeded the max length")]
    ValueTooLarge,

    #[error("extra contains the separator \\0")]
    ExtraContainsSeparator,

    #[error("invalid ttl")]
    InvalidTtl,

    #[error("key not exist")]
    KeyNotExist,

    #[error("key is expired")]
    KeyExpired,

    #[error("db is closed, reopen it")]
    DbClosed,

    #[error("active file is missing")]
    ActiveFileMissing,

    #[error("a reclaim is already running")]
    Reclaiming,

    #[error("archived files have not reached the reclaim threshold")]
    ReclaimUnreached,

    #[error("transaction is finished, create a new one")]
    TxFinished,

    #[error("the config file not exist")]
    ConfigNotExist,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid entry")]
    InvalidEntry,

    #[error("entry or the key of entry is empty")]
    EmptyEntry,

    #[error("invalid crc")]
    InvalidCrc,

    #[error("end of data file")]
    Eof,

    #[error("i/o error accessing path {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EmberError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EmberError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<std::io::Error> for EmberError {
    fn from(err: std::io::Error) -> Self {
        EmberError::Io {
            path: PathBuf::from("<unknown_io_source>"),
            source: err,
        }
    }
}
