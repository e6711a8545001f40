use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemKvServerError {
    #[error("failed to bind or serve")]
    Serve(#[from] io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum MemKvClientError {
    #[error("request failed")]
    Request(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors raised while loading initial data at startup. These are fatal: the
/// server refuses to start on a partially loaded database.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to read startup file {path}")]
    StartupRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed snapshot document")]
    SnapshotParse(#[from] serde_json::Error),
}
