use crate::parser::ParseError;
use crate::recovery::CheckError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Check failed: {0}")]
    Check(#[from] CheckError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Could not move output into place at {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PdfError>;

impl PdfError {
    /// Byte offset in the input, for errors that carry one
    pub fn position(&self) -> Option<usize> {
        match self {
            PdfError::Parse(e) => e.position(),
            PdfError::Check(CheckError::Fatal(anomaly)) => anomaly.location.position,
            _ => None,
        }
    }
}
