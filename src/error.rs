//! Error types for mirroring operations.
//!
//! Every failure is mapped onto one of a handful of kinds so callers can decide
//! whether a failure should degrade a single link, fail a page, or abort the run.

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The HTTP request could not be sent or its body could not be read.
    #[error("HTTP GET {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with something other than 200 OK.
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: StatusCode },

    #[error("could not parse URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("filesystem error on {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The failure ledger for the current run could not be created.
    #[error("could not create file {path:?} in which to log failed downloads: {source}")]
    LedgerCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid page range specification: {0}")]
    InvalidPageRange(String),

    #[error("no range of forum topic pages specified and no failed downloads to reattempt")]
    NoPagesSelected,
}

/// Broad failure categories used for logging and recovery decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Parse,
    Filesystem,
    Usage,
}

impl Error {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } | Self::Status { .. } => ErrorKind::Transport,
            Self::InvalidUrl { .. } => ErrorKind::Parse,
            Self::Filesystem { .. } | Self::LedgerCreation { .. } => ErrorKind::Filesystem,
            Self::InvalidPageRange(_) | Self::NoPagesSelected => ErrorKind::Usage,
        }
    }

    /// Fatal errors abort the whole run instead of a single page.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LedgerCreation { .. } | Self::InvalidPageRange(_) | Self::NoPagesSelected
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
