//! PDF checking, recovery and repair
//!
//! Parse-time recovery rebuilds object locations when the cross-reference
//! data cannot be trusted ([`scanner`], [`xref_recovery`]). After parsing,
//! [`validator`] and [`stream_processor`] inspect the document and describe
//! every correction they can make; [`repair`] commits those corrections.
//!
//! # Example
//!
//! ```rust,no_run
//! use pdfcheck::{parse, CheckOptions, ParseOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut document = parse("damaged.pdf", &ParseOptions::lenient())?;
//! let report = document.check(&CheckOptions::new(true, true))?;
//! println!("{report}");
//! document.serialize("repaired.pdf")?;
//! # Ok(())
//! # }
//! ```

pub mod corruption;
pub mod repair;
pub mod scanner;
pub mod stream_processor;
pub mod validator;
pub mod xref_recovery;

pub use corruption::{Anomaly, AnomalyKind, CheckError, Location, Resolution, Severity, ValidationReport};
pub use repair::{commit, Finding, FixAction, PathStep, Target};
pub use scanner::{ObjectScanner, ObjectType, ScanResult, ScannedObject};
pub use stream_processor::{check_streams, StreamReport};
pub use validator::StructureValidator;
pub use xref_recovery::XRefMode;

/// Options for [`Document::check`](crate::Document::check)
#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// Log each correction at info level
    pub verbose: bool,
    /// Apply corrections to the document
    pub fix: bool,
    /// Fail when fixable anomalies remain unresolved
    pub strict: bool,
    /// Treat unsupported filters as fatal
    pub validate_content: bool,
    /// Check streams on the rayon pool
    pub parallel: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            fix: false,
            strict: false,
            validate_content: false,
            parallel: true,
        }
    }
}

impl CheckOptions {
    pub fn new(verbose: bool, fix: bool) -> Self {
        Self {
            verbose,
            fix,
            ..Self::default()
        }
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_validate_content(mut self, validate: bool) -> Self {
        self.validate_content = validate;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}
