//! Error types shared by every step of issuing a purchase order.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The config file could not be read or parsed.
    #[error("failed to load configuration from {path}: {message}")]
    ConfigLoad { path: PathBuf, message: String },

    /// An order draft file could not be parsed.
    #[error("failed to read order draft {path}: {message}")]
    DraftLoad { path: PathBuf, message: String },

    /// The counter file holds something other than `<year>-<number>` or `<number>`.
    #[error("malformed PO counter content: {0:?}")]
    CounterFormat(String),

    /// Another process holds the counter lock.
    #[error("PO counter is locked by another run ({path})")]
    CounterLocked { path: PathBuf },

    /// One or more problems with the order draft.
    #[error("invalid order: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The drive API answered with a non-success status.
    #[error("drive API error {status}: {body}")]
    DriveApi { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("register error: {0}")]
    Register(#[from] rusqlite::Error),

    /// The register already holds this PO ID; two runs raced on the counter.
    #[error("PO ID {0} has already been issued")]
    DuplicatePoId(String),

    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<yup_oauth2::Error> for Error {
    fn from(err: yup_oauth2::Error) -> Self {
        Self::OAuth(err.to_string())
    }
}
