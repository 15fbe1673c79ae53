//! Cross-reference stream support for PDF 1.5+
//!
//! This module implements cross-reference streams according to
//! ISO 32000-1:2008 Section 7.5.8 (Cross-Reference Streams).

use super::objects::{PdfDictionary, PdfObject, PdfStream};
use super::xref_types::XRefEntry;
use super::{ParseError, ParseResult};

/// A decoded cross-reference stream
#[derive(Debug, Clone)]
pub struct XRefStream {
    /// Stream dictionary; doubles as the trailer
    pub dict: PdfDictionary,
    /// Decoded rows
    pub data: Vec<u8>,
    /// Field widths from W array
    pub widths: [usize; 3],
    /// Index array (pairs of [first_object_number, count])
    pub index: Vec<(u32, u32)>,
}

impl XRefStream {
    /// Decode a `Type XRef` stream
    pub fn parse(stream: &PdfStream) -> ParseResult<Self> {
        let dict = stream.dict.clone();
        let invalid = |message: String| ParseError::InvalidXRef { position: 0, message };

        let w = dict
            .get("W")
            .and_then(PdfObject::as_array)
            .ok_or_else(|| ParseError::MissingKey("W array in xref stream".to_string()))?;
        if w.len() != 3 {
            return Err(invalid(format!("W array must have 3 elements, found {}", w.len())));
        }
        let mut widths = [0usize; 3];
        for (slot, obj) in widths.iter_mut().zip(w.iter()) {
            *slot = obj
                .as_integer()
                .and_then(|n| usize::try_from(n).ok())
                .filter(|&n| n <= 8)
                .ok_or_else(|| invalid("invalid width in W array".to_string()))?;
        }

        let index = match dict.get("Index").and_then(PdfObject::as_array) {
            Some(array) => {
                let numbers = array
                    .iter()
                    .map(|obj| {
                        obj.as_integer()
                            .and_then(|n| u32::try_from(n).ok())
                            .ok_or_else(|| invalid("invalid number in Index".to_string()))
                    })
                    .collect::<ParseResult<Vec<u32>>>()?;
                numbers.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect()
            }
            None => {
                let size = dict
                    .get("Size")
                    .and_then(PdfObject::as_integer)
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| ParseError::MissingKey("Size in xref stream".to_string()))?;
                vec![(0, size)]
            }
        };

        let data = stream.decode()?.to_vec();

        Ok(XRefStream {
            dict,
            data,
            widths,
            index,
        })
    }

    /// Rows in file order. A short final row ends the list instead of failing.
    pub fn to_xref_entries(&self) -> ParseResult<Vec<(u32, XRefEntry)>> {
        let entry_size: usize = self.widths.iter().sum();
        if entry_size == 0 {
            return Err(ParseError::InvalidXRef {
                position: 0,
                message: "xref stream rows are zero bytes wide".to_string(),
            });
        }

        let mut rows = self.data.chunks_exact(entry_size);
        let mut entries = Vec::new();

        for &(first, count) in &self.index {
            for i in 0..count {
                let Some(row) = rows.next() else {
                    tracing::debug!(
                        "xref stream holds fewer rows than its Index declares ({} read)",
                        entries.len()
                    );
                    return Ok(entries);
                };
                let (kind_bytes, rest) = row.split_at(self.widths[0]);
                let (field2, field3) = rest.split_at(self.widths[1]);
                // A zero-width type field defaults to type 1
                let kind = if self.widths[0] == 0 { 1 } else { read_field(kind_bytes) };

                if let Some(entry) =
                    XRefEntry::from_stream_fields(kind, read_field(field2), read_field(field3))
                {
                    entries.push((first.saturating_add(i), entry));
                }
            }
        }

        Ok(entries)
    }

    /// Get the previous xref offset
    pub fn prev_offset(&self) -> Option<usize> {
        self.dict
            .get("Prev")
            .and_then(PdfObject::as_integer)
            .and_then(|n| usize::try_from(n).ok())
    }
}

/// Read a big-endian field
fn read_field(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}
