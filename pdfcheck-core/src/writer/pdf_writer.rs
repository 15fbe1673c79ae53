use super::xref_stream_writer::XRefStreamWriter;
use super::{WriterConfig, XRefStyle};
use crate::document::Document;
use crate::error::{PdfError, Result};
use crate::parser::lexer::is_regular;
use crate::parser::objects::{ObjectId, PdfDictionary, PdfObject, PdfString, StringFormat};
use crate::parser::PdfVersion;
use std::collections::BTreeMap;
use std::io::Write;

/// Oldest version that knows cross-reference streams
const XREF_STREAM_VERSION: PdfVersion = PdfVersion { major: 1, minor: 5 };

pub struct PdfWriter<W: Write> {
    writer: W,
    config: WriterConfig,
    current_position: u64,
}

impl<W: Write> PdfWriter<W> {
    pub fn new(writer: W, config: WriterConfig) -> Self {
        Self {
            writer,
            config,
            current_position: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Write `document` as a complete file: header, every object in
    /// ascending number order, a rebuilt cross-reference section and trailer
    pub fn write_document(&mut self, document: &Document) -> Result<()> {
        let root = document.root();
        if document.get(root).is_none() {
            return Err(PdfError::Serialize(format!("Root {root} is not in the document")));
        }

        let mut version = document.header().version;
        if self.config.xref_style == XRefStyle::Stream && version < XREF_STREAM_VERSION {
            version = XREF_STREAM_VERSION;
        }

        // The body is rendered first so a generated ID can hash it
        let mut body = Vec::new();
        body.extend_from_slice(format!("%PDF-{version}\n").as_bytes());
        body.extend_from_slice(&[b'%', 0xE2, 0xE3, 0xCF, 0xD3, b'\n']);

        let mut offsets: BTreeMap<u32, (u64, u16)> = BTreeMap::new();
        for (&number, object) in document.objects() {
            offsets.insert(number, (body.len() as u64, object.id.generation));
            body.extend_from_slice(format!("{} {} obj\n", number, object.id.generation).as_bytes());
            write_value(&mut body, &object.object);
            body.extend_from_slice(b"\nendobj\n");
        }

        let id = match document.file_ids_object() {
            Some(ids) => ids.clone(),
            None => {
                let digest = md5::compute(&body);
                let half = PdfObject::String(PdfString::hex(digest.0.to_vec()));
                PdfObject::Array(crate::parser::objects::PdfArray(vec![half.clone(), half]))
            }
        };

        self.write_bytes(&body)?;
        let xref_position = self.current_position;
        let max_number = offsets.keys().next_back().copied().unwrap_or(0);

        match self.config.xref_style {
            XRefStyle::Table => {
                let size = max_number + 1;
                self.write_xref_table(&offsets, size)?;
                let trailer = trailer_dict(document, size, id);
                self.write_bytes(b"trailer\n")?;
                let mut rendered = Vec::new();
                write_dict(&mut rendered, &trailer, None);
                self.write_bytes(&rendered)?;
                self.write_bytes(b"\n")?;
            }
            XRefStyle::Stream => {
                let stream_number = max_number + 1;
                let size = stream_number + 1;
                offsets.insert(stream_number, (xref_position, 0));

                let mut xref = XRefStreamWriter::new(ObjectId::new(stream_number, 0));
                for (number, next, generation) in free_chain(&offsets, size) {
                    match offsets.get(&number) {
                        Some(&(offset, generation)) => xref.add_in_use_entry(offset, generation),
                        None => xref.add_free_entry(next, generation),
                    }
                }
                let trailer = trailer_dict(document, size, id);
                let mut rendered = Vec::new();
                xref.write_xref_stream(&mut rendered, &trailer)?;
                self.write_bytes(&rendered)?;
            }
        }

        self.write_bytes(format!("startxref\n{xref_position}\n%%EOF\n").as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    fn write_xref_table(&mut self, offsets: &BTreeMap<u32, (u64, u16)>, size: u32) -> Result<()> {
        self.write_bytes(format!("xref\n0 {size}\n").as_bytes())?;
        for (number, next, generation) in free_chain(offsets, size) {
            let entry = match offsets.get(&number) {
                Some((offset, generation)) => format!("{offset:010} {generation:05} n \n"),
                None => format!("{next:010} {generation:05} f \n"),
            };
            self.write_bytes(entry.as_bytes())?;
        }
        Ok(())
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.current_position += data.len() as u64;
        Ok(())
    }
}

/// Every number `0..size` with the next free number after it and the
/// generation of its entry. Free entries form a chain starting at 0.
fn free_chain(offsets: &BTreeMap<u32, (u64, u16)>, size: u32) -> Vec<(u32, u32, u16)> {
    let free: Vec<u32> = (0..size).filter(|n| !offsets.contains_key(n)).collect();
    (0..size)
        .map(|number| match free.binary_search(&number) {
            Ok(index) => {
                let next = free.get(index + 1).copied().unwrap_or(0);
                let generation = if number == 0 { 65535 } else { 0 };
                (number, next, generation)
            }
            Err(_) => (number, 0, 0),
        })
        .collect()
}

fn trailer_dict(document: &Document, size: u32, id: PdfObject) -> PdfDictionary {
    let mut trailer = PdfDictionary::new();
    trailer.insert("Size", PdfObject::Integer(size as i64));
    trailer.insert("Root", PdfObject::Reference(document.root()));
    match (document.info_id(), document.trailer().dict.get("Info")) {
        (Some(info), _) => trailer.insert("Info", PdfObject::Reference(info)),
        (None, Some(direct @ PdfObject::Dictionary(_))) => trailer.insert("Info", direct.clone()),
        _ => {}
    }
    if document.is_encrypted() {
        if let Some(encrypt) = document.trailer().encrypt() {
            trailer.insert("Encrypt", encrypt.clone());
        }
    }
    trailer.insert("ID", id);
    trailer
}

/// Render a value in PDF syntax. Streams are written with their actual
/// length.
pub fn write_value(out: &mut Vec<u8>, value: &PdfObject) {
    write_value_with(out, value, true);
}

/// Render a value for display; stream data is replaced by its size
pub fn to_pdf_syntax(value: &PdfObject) -> String {
    let mut out = Vec::new();
    write_value_with(&mut out, value, false);
    String::from_utf8_lossy(&out).into_owned()
}

fn write_value_with(out: &mut Vec<u8>, value: &PdfObject, stream_data: bool) {
    match value {
        PdfObject::Null => out.extend_from_slice(b"null"),
        PdfObject::Boolean(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
        PdfObject::Integer(i) => out.extend_from_slice(i.to_string().as_bytes()),
        PdfObject::Real(f) => out.extend_from_slice(format_real(*f).as_bytes()),
        PdfObject::String(s) => write_string(out, s),
        PdfObject::Name(name) => write_name(out, name.as_str()),
        PdfObject::Array(array) => {
            out.push(b'[');
            for (i, item) in array.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                write_value_with(out, item, stream_data);
            }
            out.push(b']');
        }
        PdfObject::Dictionary(dict) => write_dict(out, dict, None),
        PdfObject::Stream(stream) => {
            let data = stream.raw_data();
            write_dict(out, &stream.dict, Some(data.len()));
            out.extend_from_slice(b"\nstream\n");
            if stream_data {
                out.extend_from_slice(data);
            } else {
                out.extend_from_slice(format!("% {} bytes", data.len()).as_bytes());
            }
            out.extend_from_slice(b"\nendstream");
        }
        PdfObject::Reference(id) => {
            out.extend_from_slice(format!("{} {} R", id.number, id.generation).as_bytes())
        }
    }
}

/// `length` replaces the dictionary's `Length`, which is added if absent
pub(crate) fn write_dict(out: &mut Vec<u8>, dict: &PdfDictionary, length: Option<usize>) {
    out.extend_from_slice(b"<<");
    let mut length_written = false;
    for (key, value) in dict.iter() {
        out.push(b' ');
        write_name(out, key.as_str());
        out.push(b' ');
        match length {
            Some(length) if key.as_str() == "Length" => {
                out.extend_from_slice(length.to_string().as_bytes());
                length_written = true;
            }
            _ => write_value(out, value),
        }
    }
    if let (Some(length), false) = (length, length_written) {
        out.extend_from_slice(format!(" /Length {length}").as_bytes());
    }
    out.extend_from_slice(b" >>");
}

/// Parsed names hold one char per source byte; chars past U+00FF only
/// come from names built in code and are written as their UTF-8 bytes.
fn write_name(out: &mut Vec<u8>, name: &str) {
    out.push(b'/');
    let mut utf8 = [0u8; 4];
    for ch in name.chars() {
        let bytes = match u8::try_from(ch) {
            Ok(byte) => {
                utf8[0] = byte;
                &utf8[..1]
            }
            Err(_) => ch.encode_utf8(&mut utf8).as_bytes(),
        };
        for &byte in bytes {
            if is_regular(byte) && byte != b'#' && (0x21..=0x7E).contains(&byte) {
                out.push(byte);
            } else {
                out.extend_from_slice(format!("#{byte:02X}").as_bytes());
            }
        }
    }
}

fn write_string(out: &mut Vec<u8>, string: &PdfString) {
    match string.format {
        StringFormat::Hex => {
            out.push(b'<');
            out.extend_from_slice(hex::encode_upper(&string.bytes).as_bytes());
            out.push(b'>');
        }
        StringFormat::Literal => {
            out.push(b'(');
            for &byte in &string.bytes {
                match byte {
                    b'(' | b')' | b'\\' => {
                        out.push(b'\\');
                        out.push(byte);
                    }
                    // A bare CR would be read back as a newline
                    b'\r' => out.extend_from_slice(b"\\r"),
                    _ => out.push(byte),
                }
            }
            out.push(b')');
        }
    }
}

/// Shortest decimal that reads back as the same value, never with an
/// exponent
pub fn format_real(value: f64) -> String {
    if !value.is_finite() || value == 0.0 {
        return "0".to_string();
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::objects::{PdfArray, PdfName, PdfStream};

    fn render(value: &PdfObject) -> String {
        let mut out = Vec::new();
        write_value(&mut out, value);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_format_real() {
        assert_eq!(format_real(1.5), "1.5");
        assert_eq!(format_real(2.0), "2");
        assert_eq!(format_real(-0.0000001), "-0.0000001");
        assert_eq!(format_real(0.333333333), "0.333333333");
        assert_eq!(format_real(1e10), "10000000000");
        assert_eq!(format_real(-0.0), "0");
        assert_eq!(format_real(f64::NAN), "0");
    }

    #[test]
    fn test_small_reals_survive_rewrite() {
        for value in [1e-7, -3.5e-9, 0.1 + 0.2, 123456.789012345] {
            let rendered = render(&PdfObject::Real(value));
            assert!(!rendered.contains('e'), "{rendered}");
            assert_eq!(PdfObject::parse_bytes(rendered.as_bytes()).unwrap(), PdfObject::Real(value));
        }
    }

    #[test]
    fn test_name_escaping() {
        let name = PdfObject::Name(PdfName::new("A B#(c)"));
        assert_eq!(render(&name), "/A#20B#23#28c#29");
    }

    #[test]
    fn test_high_byte_names_round_trip() {
        for source in [&b"/Caf#E9"[..], &b"/Caf\xE9"[..]] {
            let parsed = PdfObject::parse_bytes(source).unwrap();
            assert_eq!(parsed, PdfObject::Name(PdfName::new("Caf\u{E9}")));
            let mut out = Vec::new();
            write_value(&mut out, &parsed);
            assert_eq!(out, b"/Caf#E9");
            assert_eq!(PdfObject::parse_bytes(&out).unwrap(), parsed);
        }

        let built = PdfObject::Name(PdfName::new("\u{20AC}"));
        assert_eq!(render(&built), "/#E2#82#AC");
    }

    #[test]
    fn test_literal_string_escaping() {
        let string = PdfObject::String(PdfString::new(b"a(b)\\c\rd\n".to_vec()));
        assert_eq!(render(&string), "(a\\(b\\)\\\\c\\rd\n)");
    }

    #[test]
    fn test_hex_string_stays_hex() {
        let string = PdfObject::String(PdfString::hex(vec![0xAB, 0x01]));
        assert_eq!(render(&string), "<AB01>");
    }

    #[test]
    fn test_dictionary_keeps_order() {
        let mut dict = PdfDictionary::new();
        dict.insert("Type", PdfObject::Name(PdfName::new("Page")));
        dict.insert("Kids", PdfObject::Array(PdfArray(vec![PdfObject::Reference(ObjectId::new(3, 0)), PdfObject::Null])));
        assert_eq!(render(&PdfObject::Dictionary(dict)), "<< /Type /Page /Kids [3 0 R null] >>");
        assert_eq!(render(&PdfObject::Dictionary(PdfDictionary::new())), "<< >>");
    }

    #[test]
    fn test_stream_length_is_actual() {
        let mut dict = PdfDictionary::new();
        dict.insert("Length", PdfObject::Integer(999));
        dict.insert("Filter", PdfObject::Name(PdfName::new("FlateDecode")));
        let stream = PdfObject::Stream(PdfStream::new(dict, b"xyz".to_vec()));
        assert_eq!(
            render(&stream),
            "<< /Length 3 /Filter /FlateDecode >>\nstream\nxyz\nendstream"
        );

        let bare = PdfObject::Stream(PdfStream::new(PdfDictionary::new(), b"ab".to_vec()));
        assert_eq!(render(&bare), "<< /Length 2 >>\nstream\nab\nendstream");
        assert_eq!(to_pdf_syntax(&bare), "<< /Length 2 >>\nstream\n% 2 bytes\nendstream");
    }

    #[test]
    fn test_free_chain() {
        let mut offsets = BTreeMap::new();
        offsets.insert(1, (15, 0));
        offsets.insert(4, (80, 0));
        let chain = free_chain(&offsets, 5);
        assert_eq!(
            chain,
            vec![(0, 2, 65535), (1, 0, 0), (2, 3, 0), (3, 0, 0), (4, 0, 0)]
        );
    }

    #[test]
    fn test_rendered_values_parse_back() {
        let mut dict = PdfDictionary::new();
        dict.insert("Real", PdfObject::Real(-12.25));
        dict.insert("Text", PdfObject::String(PdfString::new(b"x)y(".to_vec())));
        dict.insert("Odd Name", PdfObject::Boolean(true));
        let value = PdfObject::Dictionary(dict);
        let rendered = render(&value);
        assert_eq!(PdfObject::parse_bytes(rendered.as_bytes()).unwrap(), value);
    }
}
