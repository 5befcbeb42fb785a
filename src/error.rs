use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{backend} rejected `{method}`: {reason}")]
    Rpc {
        backend: &'static str,
        method: &'static str,
        reason: String,
    },

    #[error("Timeout while connecting to {0}")]
    Timeout(&'static str),

    #[error("I/O error on {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Download backend not configured")]
    NotConfigured,

    #[error("Unable to start the async runtime: {0}")]
    Runtime(io::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
