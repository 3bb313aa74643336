use std::path::PathBuf;

use thiserror::Error;

/// Why an inbound record could not be classified as an event or a reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolParseError {
    #[error("record is not valid UTF-8: {0}")]
    InvalidUtf8(String),
    #[error("record is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record carries neither an event type nor a reply id")]
    Unclassified,
}

#[derive(Debug, Error)]
pub enum TablesError {
    #[error("failed to read binding tables from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid binding tables document: {0}")]
    Parse(#[from] toml::de::Error),
}
