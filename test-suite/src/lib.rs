//! Test suite support for pdfcheck
//!
//! Byte-level generators for well-formed and deliberately broken PDFs. The
//! generators do not depend on the engine, so both the library and the CLI
//! can use them from their integration tests.

pub mod generators;

pub use generators::{BuiltPdf, PdfVersion, TestPdfBuilder};

/// Common test utilities
pub mod utils {
    use std::fs;
    use std::path::{Path, PathBuf};

    /// Write `bytes` to `dir/name` and return the path
    pub fn write_fixture<P: AsRef<Path>>(dir: P, name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
        let path = dir.as_ref().join(name);
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Count non-overlapping occurrences of `needle` in `haystack`
    pub fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
        if needle.is_empty() || haystack.len() < needle.len() {
            return 0;
        }
        let mut count = 0;
        let mut i = 0;
        while i + needle.len() <= haystack.len() {
            if &haystack[i..i + needle.len()] == needle {
                count += 1;
                i += needle.len();
            } else {
                i += 1;
            }
        }
        count
    }
}
