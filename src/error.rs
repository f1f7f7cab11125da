use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("request to {url} failed after {attempts} attempt(s): {cause}")]
    TransportExhausted {
        url: String,
        attempts: usize,
        cause: String,
    },

    #[error("{url} returned status {status}: {message}")]
    HttpStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("invalid catalog response: {0}")]
    MetadataInvalid(String),

    #[error("no usable run found: {0}")]
    NotFound(String),

    #[error("malformed input: {0}")]
    Decode(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("invalid run accession: {0}")]
    InvalidRunAccession(String),

    #[error("invalid subsample target: {0}")]
    InvalidTarget(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl KiraError {
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            KiraError::TransportExhausted { .. } | KiraError::HttpStatus { .. }
        )
    }
}
