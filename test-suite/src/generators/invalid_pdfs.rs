//! Invalid PDF Generators
//!
//! Deliberately broken documents for the recovery paths. Each generator
//! starts from a well-formed build so the damage is the only defect.

use super::jpeg::{sample_jpeg, strip_eoi};
use super::test_pdf_builder::{BuiltPdf, TestPdfBuilder};
use anyhow::Result;
use std::fs;
use std::path::Path;

/// Remove the `startxref` keyword and its offset
pub fn without_startxref(pdf: &[u8]) -> Vec<u8> {
    match rfind(pdf, b"startxref") {
        Some(pos) => {
            let mut out = pdf[..pos].to_vec();
            out.extend_from_slice(b"%%EOF\n");
            out
        }
        None => pdf.to_vec(),
    }
}

/// Remove everything from the classic `xref` keyword to the end of file
pub fn without_xref_section(pdf: &BuiltPdf) -> Vec<u8> {
    pdf.bytes[..pdf.xref_offset].to_vec()
}

/// Every in-use classic xref entry points seven bytes past its object
pub fn shifted_xref() -> BuiltPdf {
    TestPdfBuilder::minimal()
        .with_title("Shifted")
        .with_xref_offset_shift(7)
        .build_parts()
}

/// The classic xref table stops after its second entry
pub fn truncated_xref() -> BuiltPdf {
    let mut builder = TestPdfBuilder::new().with_title("Truncated");
    builder.add_text_page("one", 12.0);
    builder.add_text_page("two", 12.0);
    builder.with_truncated_xref(2).build_parts()
}

/// Page content streams declare a length ten bytes too long
pub fn wrong_stream_length() -> BuiltPdf {
    let mut builder = TestPdfBuilder::new().with_stream_length_delta(10);
    builder.add_text_page("length", 12.0);
    builder.build_parts()
}

/// The catalog points at an outline object that does not exist
pub fn dangling_reference() -> BuiltPdf {
    TestPdfBuilder::minimal()
        .with_catalog_entry("Outlines", "99 0 R")
        .build_parts()
}

/// Dictionary with a key that never receives its value
pub fn malformed_dictionary() -> BuiltPdf {
    TestPdfBuilder::minimal()
        .with_catalog_entry("Broken", "1 /Dangling")
        .build_parts()
}

/// Image stream whose JPEG payload lost its EOI marker
pub fn jpeg_missing_eoi() -> BuiltPdf {
    let mut builder = TestPdfBuilder::new();
    builder.add_image_page(strip_eoi(&sample_jpeg(16, 16)), 16, 16);
    builder.add_text_page("unaffected", 12.0);
    builder.build_parts()
}

/// Overwrite `len` bytes at `offset` with `fill`
pub fn overwrite(pdf: &[u8], offset: usize, len: usize, fill: u8) -> Vec<u8> {
    let mut out = pdf.to_vec();
    let end = (offset + len).min(out.len());
    for byte in &mut out[offset.min(end)..end] {
        *byte = fill;
    }
    out
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| &haystack[i..i + needle.len()] == needle)
}

/// Generate all invalid test PDFs
pub fn generate_all<P: AsRef<Path>>(output_dir: P) -> Result<()> {
    let output_dir = output_dir.as_ref();
    fs::create_dir_all(output_dir)?;

    let minimal = TestPdfBuilder::minimal().build();
    fs::write(output_dir.join("no_startxref.pdf"), without_startxref(&minimal))?;
    fs::write(output_dir.join("shifted_xref.pdf"), shifted_xref().bytes)?;
    fs::write(output_dir.join("truncated_xref.pdf"), truncated_xref().bytes)?;
    fs::write(output_dir.join("wrong_stream_length.pdf"), wrong_stream_length().bytes)?;
    fs::write(output_dir.join("dangling_reference.pdf"), dangling_reference().bytes)?;
    fs::write(output_dir.join("malformed_dictionary.pdf"), malformed_dictionary().bytes)?;
    fs::write(output_dir.join("jpeg_missing_eoi.pdf"), jpeg_missing_eoi().bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_without_startxref_keeps_trailer() {
        let out = without_startxref(&TestPdfBuilder::minimal().build());
        let text = String::from_utf8_lossy(&out);
        assert!(!text.contains("startxref"));
        assert!(text.contains("trailer"));
        assert!(text.ends_with("%%EOF\n"));
    }

    #[test]
    fn test_overwrite_clamps_to_length() {
        assert_eq!(overwrite(b"abcdef", 4, 10, b'x'), b"abcdxx".to_vec());
    }
}
