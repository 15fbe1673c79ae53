//! Generate Test PDFs
//!
//! Writes the generated fixture corpus to `fixtures/` for manual runs of the
//! command-line tool.

use anyhow::Result;
use pdfcheck_test_suite::generators::{invalid_pdfs, minimal_pdfs};
use std::path::PathBuf;

fn main() -> Result<()> {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let fixtures_dir = PathBuf::from(manifest_dir).join("fixtures");

    let valid_dir = fixtures_dir.join("valid");
    println!("Generating well-formed PDFs in {valid_dir:?}...");
    minimal_pdfs::generate_all(&valid_dir)?;

    let invalid_dir = fixtures_dir.join("invalid");
    println!("Generating broken PDFs in {invalid_dir:?}...");
    invalid_pdfs::generate_all(&invalid_dir)?;

    println!("Test PDF generation complete!");
    Ok(())
}
