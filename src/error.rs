use std::io;

use thiserror::Error;

use crate::schedule::models::Field;

/// Failure of the remote fetcher
#[derive(Debug, Error)]
pub enum FetchError {
    /// The portal session didn't come up before the deadline
    #[error("portal session did not start in time: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("portal error: {0}")]
    Portal(String),
}

impl FetchError {
    /// Only a session-initialization timeout is worth another try
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Failure of the schedule extraction
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("{course}: malformed {field} {text:?}")]
    MalformedField {
        course: String,
        field: Field,
        text: String,
    },

    #[error("course {caption:?} has no meeting times table")]
    MissingMeetings { caption: String },

    #[error("meeting times table #{position} has no course before it")]
    MissingDetails { position: usize },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("can't download the schedule: {0}")]
    Fetch(#[source] FetchError),

    #[error("portal still failing after {attempts} attempts: {source}")]
    RetriesExhausted { attempts: u32, source: FetchError },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    #[error("cache error: {0}")]
    Storage(#[from] io::Error),

    #[error("invalid identity {0:?}")]
    InvalidIdentity(String),

    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("can't read the schedule: {0}")]
    Parse(#[from] ParseError),
}

pub type Result<T> = std::result::Result<T, Error>;
