//! PDF writing functionality
//!
//! Serializes a [`Document`](crate::Document) into a fresh file with a
//! rebuilt cross-reference section. [`write_file_atomic`] stages the output
//! in a temporary file next to the target and renames it into place.

mod pdf_writer;
mod xref_stream_writer;

pub use pdf_writer::{format_real, to_pdf_syntax, write_value, PdfWriter};
pub use xref_stream_writer::XRefStreamWriter;

use crate::document::Document;
use crate::error::{PdfError, Result};
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Form of the cross-reference section in the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XRefStyle {
    /// Classic `xref` table and `trailer` dictionary
    #[default]
    Table,
    /// Compressed cross-reference stream (PDF 1.5)
    Stream,
}

#[derive(Debug, Clone, Default)]
pub struct WriterConfig {
    pub xref_style: XRefStyle,
}

impl WriterConfig {
    pub fn with_xref_style(mut self, style: XRefStyle) -> Self {
        self.xref_style = style;
        self
    }
}

/// Serialize `document` to memory
pub fn write_to_vec(document: &Document, config: &WriterConfig) -> Result<Vec<u8>> {
    let mut writer = PdfWriter::new(Vec::new(), config.clone());
    writer.write_document(document)?;
    Ok(writer.into_inner())
}

/// Serialize `document` to `path`. Either the complete file appears at
/// `path` or nothing changes there.
pub fn write_file_atomic(document: &Document, path: &Path, config: &WriterConfig) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir)?;
    {
        let mut writer = PdfWriter::new(BufWriter::new(staged.as_file_mut()), config.clone());
        writer.write_document(document)?;
        writer.into_inner().flush()?;
    }
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| PdfError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    tracing::debug!(path = %path.display(), "output persisted");
    Ok(())
}
