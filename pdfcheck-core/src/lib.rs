//! # pdfcheck
//!
//! A pure Rust engine that parses PDF files, validates their structure,
//! repairs what can be repaired and writes a fresh, self-consistent file.
//!
//! ## Features
//!
//! - **Tolerant parsing**: classic xref tables, xref streams and object
//!   streams, with a linear scan when the cross-reference data is damaged
//! - **Structural validation**: reference integrity, catalog and page tree
//!   checks, types of well-known keys
//! - **Stream checks**: every filter chain is decoded; JPEG payloads are
//!   checked marker by marker and repaired in fix mode
//! - **Rewriting**: output with a rebuilt xref table or stream, persisted
//!   atomically
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfcheck::{parse, CheckOptions, ParseOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut document = parse("input.pdf", &ParseOptions::lenient())?;
//! println!("PDF {}, {} objects", document.version(), document.object_count());
//!
//! let report = document.check(&CheckOptions::new(false, true))?;
//! for anomaly in &report.anomalies {
//!     println!("{anomaly}");
//! }
//! document.serialize("output.pdf")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`parser`] - tokenizer, object parser, cross-reference resolution and filters
//! - [`recovery`] - scan-based recovery, validation, stream checks and repairs
//! - [`writer`] - serialization
//! - [`document`] - the parsed document and its accessors

pub mod document;
pub mod error;
pub mod parser;
pub mod recovery;
pub mod writer;

pub use document::{CatalogSummary, Document, DocumentInfo};
pub use error::{PdfError, Result};
pub use parser::{ObjectId, ParseError, ParseOptions, PdfObject};
pub use recovery::{Anomaly, AnomalyKind, CheckError, CheckOptions, Resolution, Severity, ValidationReport};
pub use writer::{WriterConfig, XRefStyle};

use std::path::Path;

/// Current version of pdfcheck
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parse the PDF file at `path`
pub fn parse(path: impl AsRef<Path>, options: &ParseOptions) -> std::result::Result<Document, ParseError> {
    Document::open(path, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_helpers::create_minimal_pdf;
    use std::io::Write;

    #[test]
    fn test_version_string() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_parse_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&create_minimal_pdf()).unwrap();

        let document = parse(file.path(), &ParseOptions::default()).unwrap();
        assert_eq!(document.path(), Some(file.path()));
        assert_eq!(document.object_count(), 2);
    }

    #[test]
    fn test_parse_missing_file() {
        let error = parse("/nonexistent/input.pdf", &ParseOptions::default()).unwrap_err();
        assert!(matches!(error, ParseError::Io(_)));
    }
}
