//! Minimal PDF Generators
//!
//! Well-formed documents covering the structural variants the parser has to
//! handle: classic tables, xref streams, object streams and incremental
//! updates.

use super::jpeg::sample_jpeg;
use super::test_pdf_builder::{BuiltPdf, TestPdfBuilder};
use anyhow::Result;
use std::fs;
use std::path::Path;

/// One empty page, classic xref table
pub fn minimal() -> Vec<u8> {
    TestPdfBuilder::minimal().build()
}

/// Text page plus a populated Info dictionary and file ID
pub fn with_info() -> BuiltPdf {
    let mut builder = TestPdfBuilder::new()
        .with_title("Quarterly Report")
        .with_author("Records Office")
        .with_info("CreationDate", "D:20240131120000+01'00'")
        .with_file_id(*b"0123456789abcdef");
    builder.add_text_page("Hello (world)", 12.0);
    builder.build_parts()
}

/// `pages` text pages with compressed content streams
pub fn multi_page(pages: usize) -> BuiltPdf {
    let mut builder = TestPdfBuilder::new().with_compression(true);
    for i in 0..pages {
        builder.add_text_page(&format!("Page {}", i + 1), 14.0);
    }
    builder.build_parts()
}

/// Compressed xref stream with the page tree inside an object stream
pub fn with_object_streams() -> BuiltPdf {
    let mut builder = TestPdfBuilder::new()
        .with_title("Packed")
        .with_compression(true)
        .with_object_streams(true);
    builder.add_text_page("packed", 10.0);
    builder.add_empty_page(300.0, 300.0);
    builder.build_parts()
}

/// A page showing a DCT image
pub fn with_jpeg(jpeg: Vec<u8>) -> BuiltPdf {
    let mut builder = TestPdfBuilder::new();
    builder.add_image_page(jpeg, 16, 16);
    builder.build_parts()
}

/// `base` followed by one incremental update that replaces the Info object
pub fn incremental_update() -> BuiltPdf {
    let base = TestPdfBuilder::minimal().with_title("Original").build_parts();
    let info = base.info.unwrap_or(base.size);

    let mut bytes = base.bytes.clone();
    let object_offset = bytes.len();
    bytes.extend_from_slice(format!("{info} 0 obj\n<< /Title (Updated) >>\nendobj\n").as_bytes());
    let xref_offset = bytes.len();
    bytes.extend_from_slice(
        format!(
            "xref\n0 1\n0000000000 65535 f \n{info} 1\n{object_offset:010} 00000 n \ntrailer\n<< /Size {} /Root {} 0 R /Info {info} 0 R /Prev {} >>\nstartxref\n{xref_offset}\n%%EOF\n",
            base.size, base.catalog, base.xref_offset
        )
        .as_bytes(),
    );

    let mut offsets = base.offsets.clone();
    offsets.insert(info, object_offset);
    BuiltPdf {
        bytes,
        offsets,
        xref_offset,
        info: Some(info),
        ..base
    }
}

/// Generate all minimal test PDFs
pub fn generate_all<P: AsRef<Path>>(output_dir: P) -> Result<()> {
    let output_dir = output_dir.as_ref();
    fs::create_dir_all(output_dir)?;

    fs::write(output_dir.join("minimal.pdf"), minimal())?;
    fs::write(output_dir.join("with_info.pdf"), with_info().bytes)?;
    fs::write(output_dir.join("multi_page.pdf"), multi_page(3).bytes)?;
    fs::write(output_dir.join("object_streams.pdf"), with_object_streams().bytes)?;
    fs::write(output_dir.join("jpeg_image.pdf"), with_jpeg(sample_jpeg(16, 16)).bytes)?;
    fs::write(output_dir.join("incremental.pdf"), incremental_update().bytes)?;
    Ok(())
}
