//! XRef Stream Writer for PDF 1.5+
//!
//! This module implements writing cross-reference streams according to
//! ISO 32000-1:2008 Section 7.5.8.

use super::pdf_writer::write_value;
use crate::error::Result;
use crate::parser::objects::{ObjectId, PdfArray, PdfDictionary, PdfName, PdfObject, PdfStream};
use crate::parser::xref_types::XRefEntry;

/// Writer for XRef streams
pub struct XRefStreamWriter {
    /// Entries to be written, one per object number from 0
    entries: Vec<XRefEntry>,
    /// Field widths [type, field2, field3]
    widths: [usize; 3],
    /// Object ID for this XRef stream
    stream_id: ObjectId,
}

impl XRefStreamWriter {
    pub fn new(stream_id: ObjectId) -> Self {
        Self {
            entries: Vec::new(),
            // 1 byte for type, 3 bytes for offsets, 2 bytes for generation
            widths: [1, 3, 2],
            stream_id,
        }
    }

    pub fn add_free_entry(&mut self, next_free: u32, generation: u16) {
        self.entries.push(XRefEntry::Free {
            next: next_free,
            generation,
        });
    }

    pub fn add_in_use_entry(&mut self, offset: u64, generation: u16) {
        self.entries.push(XRefEntry::InUse {
            offset: offset as usize,
            generation,
        });
        self.widths[1] = self.widths[1].max(Self::bytes_needed(offset));
    }

    /// Calculate minimum bytes needed to represent a value
    fn bytes_needed(value: u64) -> usize {
        if value == 0 {
            1
        } else {
            ((value.ilog2() / 8) + 1) as usize
        }
    }

    /// Encode entries into binary rows
    pub fn encode_entries(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.entries.len() * self.widths.iter().sum::<usize>());
        for entry in &self.entries {
            let (kind, field2, field3) = match *entry {
                XRefEntry::Free { next, generation } => (0, next as u64, generation as u64),
                XRefEntry::InUse { offset, generation } => (1, offset as u64, generation as u64),
                XRefEntry::Compressed {
                    stream_number,
                    index,
                } => (2, stream_number as u64, index as u64),
            };
            Self::write_field(&mut data, kind, self.widths[0]);
            Self::write_field(&mut data, field2, self.widths[1]);
            Self::write_field(&mut data, field3, self.widths[2]);
        }
        data
    }

    /// Write a big-endian field with the specified width
    fn write_field(data: &mut Vec<u8>, value: u64, width: usize) {
        for i in (0..width).rev() {
            data.push(((value >> (i * 8)) & 0xFF) as u8);
        }
    }

    /// The stream dictionary: XRef keys followed by the trailer entries
    pub fn create_dictionary(&self, trailer: &PdfDictionary) -> PdfDictionary {
        let mut dict = PdfDictionary::new();
        dict.insert("Type", PdfObject::Name(PdfName::new("XRef")));
        for (key, value) in trailer.iter() {
            dict.insert(key.as_str(), value.clone());
        }
        dict.insert("Size", PdfObject::Integer(self.entries.len() as i64));
        dict.insert(
            "W",
            PdfObject::Array(PdfArray(
                self.widths
                    .iter()
                    .map(|&w| PdfObject::Integer(w as i64))
                    .collect(),
            )),
        );
        dict
    }

    /// Write the complete XRef stream object
    pub fn write_xref_stream(&self, out: &mut Vec<u8>, trailer: &PdfDictionary) -> Result<()> {
        let rows = self.encode_entries();
        let mut dict = self.create_dictionary(trailer);

        #[cfg(feature = "compression")]
        let data = {
            use crate::parser::filters::{encode, Filter};
            dict.insert("Filter", PdfObject::Name(PdfName::new("FlateDecode")));
            encode(&rows, Filter::FlateDecode)?
        };
        #[cfg(not(feature = "compression"))]
        let data = rows;

        dict.insert("Length", PdfObject::Integer(data.len() as i64));
        out.extend_from_slice(
            format!("{} {} obj\n", self.stream_id.number, self.stream_id.generation).as_bytes(),
        );
        write_value(out, &PdfObject::Stream(PdfStream::new(dict, data)));
        out.extend_from_slice(b"\nendobj\n");
        Ok(())
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}
