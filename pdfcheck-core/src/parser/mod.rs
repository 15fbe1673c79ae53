//! PDF Parser Module
//!
//! Turns the bytes of a PDF file into an arena of indirect objects. The
//! pipeline runs header → cross-reference resolution → object loading →
//! trailer/catalog resolution, see [`reader::PdfReader`].

pub mod filter_impls;
pub mod filters;
pub mod header;
pub mod lexer;
pub mod object_stream;
pub mod objects;
pub mod reader;
pub mod trailer;
pub mod xref;
pub mod xref_stream;
pub mod xref_types;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use self::header::{PdfHeader, PdfVersion};
pub use self::lexer::{Lexer, SpannedToken, Token};
pub use self::objects::{
    Correction, IndirectObject, LengthResolver, ObjectId, ObjectParser, PdfArray, PdfDictionary, PdfName,
    PdfObject, PdfStream, PdfString, StringFormat,
};
pub use self::reader::PdfReader;
pub use self::trailer::PdfTrailer;
pub use self::xref::XRefTable;
pub use self::xref_types::{XRefAnomaly, XRefEntry};

/// Result type for parser operations
pub type ParseResult<T> = Result<T, ParseError>;

/// PDF Parser errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid PDF header")]
    InvalidHeader,

    #[error("Lexical error at byte {position}: {message}")]
    LexError { position: usize, message: String },

    #[error("Unexpected token at byte {position}: expected {expected}, found {found}")]
    UnexpectedToken {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("Malformed dictionary at byte {position}: {message}")]
    MalformedDictionary { position: usize, message: String },

    #[error("Stream length mismatch at byte {position}: declared {declared:?}, endstream found after {found:?} bytes")]
    StreamLengthMismatch {
        position: usize,
        declared: Option<usize>,
        found: Option<usize>,
    },

    #[error("Missing or invalid document root: {0}")]
    MissingRoot(String),

    #[error("Invalid cross-reference data at byte {position}: {message}")]
    InvalidXRef { position: usize, message: String },

    #[error("Missing required key: {0}")]
    MissingKey(String),

    #[error("Stream decode error: {0}")]
    StreamDecodeError(String),

    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    #[error("Objects nested deeper than {0} levels")]
    NestingTooDeep(usize),
}

impl ParseError {
    /// Byte offset the error refers to, when it has one
    pub fn position(&self) -> Option<usize> {
        match self {
            ParseError::LexError { position, .. }
            | ParseError::UnexpectedToken { position, .. }
            | ParseError::MalformedDictionary { position, .. }
            | ParseError::StreamLengthMismatch { position, .. }
            | ParseError::InvalidXRef { position, .. } => Some(*position),
            _ => None,
        }
    }

    /// True for errors a linear scan or lenient re-parse may get past
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ParseError::Io(_) | ParseError::MissingRoot(_))
    }
}

/// Options for parsing PDF files
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Apply every recoverable correction instead of failing
    pub fix: bool,
    /// Log each correction at info level
    pub verbose: bool,
    /// How far past a declared stream end to look for `endstream`
    pub max_recovery_bytes: usize,
    /// Maximum array/dictionary nesting
    pub max_nesting_depth: usize,
}

/// Default nesting bound for arrays and dictionaries
pub const MAX_NESTING_DEPTH: usize = 256;

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            fix: false,
            verbose: false,
            max_recovery_bytes: usize::MAX,
            max_nesting_depth: MAX_NESTING_DEPTH,
        }
    }
}

impl ParseOptions {
    /// Fail on the first structural defect
    pub fn strict() -> Self {
        Self::default()
    }

    /// Repair whatever can be repaired
    pub fn lenient() -> Self {
        Self {
            fix: true,
            ..Self::default()
        }
    }

    pub fn new(verbose: bool, fix: bool) -> Self {
        Self {
            fix,
            verbose,
            ..Self::default()
        }
    }

    pub fn with_fix(mut self, fix: bool) -> Self {
        self.fix = fix;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_max_recovery_bytes(mut self, bytes: usize) -> Self {
        self.max_recovery_bytes = bytes;
        self
    }

    /// Record a correction the parser applied
    pub(crate) fn note_fix(&self, position: usize, message: &str) {
        if self.verbose {
            tracing::info!(position, "fix: {message}");
        } else {
            tracing::debug!(position, "fix: {message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options_presets() {
        let strict = ParseOptions::strict();
        assert!(!strict.fix);
        assert!(!strict.verbose);
        assert_eq!(strict.max_nesting_depth, MAX_NESTING_DEPTH);

        let lenient = ParseOptions::lenient().with_verbose(true);
        assert!(lenient.fix);
        assert!(lenient.verbose);
    }

    #[test]
    fn test_parse_error_position() {
        let err = ParseError::LexError {
            position: 42,
            message: "bad byte".to_string(),
        };
        assert_eq!(err.position(), Some(42));
        assert_eq!(err.to_string(), "Lexical error at byte 42: bad byte");
        assert_eq!(ParseError::InvalidHeader.position(), None);
    }

    #[test]
    fn test_missing_root_is_not_recoverable() {
        assert!(!ParseError::MissingRoot("no trailer".into()).is_recoverable());
        assert!(ParseError::MalformedDictionary {
            position: 0,
            message: String::new()
        }
        .is_recoverable());
    }

    #[test]
    fn test_stream_length_mismatch_display() {
        let err = ParseError::StreamLengthMismatch {
            position: 10,
            declared: Some(5),
            found: None,
        };
        assert!(err.to_string().contains("declared Some(5)"));
    }
}
