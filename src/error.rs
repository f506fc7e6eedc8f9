use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    BadArgs(&'static str),
    #[error("connect to {url} failed: {source}")]
    ConnectFailed { url: String, source: io::Error },
    #[error("open {path:?} failed: {source}")]
    OpenFailed { path: PathBuf, source: io::Error },
    #[error("subscribe to {pattern} failed: {source}")]
    SubscribeFailed { pattern: String, source: io::Error },
    #[error("thread spawn failed: {0}")]
    TaskSpawnFailed(io::Error),
    #[error("bad capture format: {0}")]
    BadFormat(&'static str),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
