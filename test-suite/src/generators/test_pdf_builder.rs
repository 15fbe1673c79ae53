//! Test PDF Builder
//!
//! A builder for creating test PDFs with specific characteristics. Offsets in
//! the generated cross-reference data are always computed from the emitted
//! bytes; the `with_*` corruption knobs are the only way to get them wrong.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::Write;

/// PDF version to generate
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub enum PdfVersion {
    V1_0,
    V1_1,
    V1_2,
    V1_3,
    V1_4,
    V1_5,
    V1_6,
    V1_7,
    V2_0,
}

impl std::fmt::Display for PdfVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let version = match self {
            PdfVersion::V1_0 => "1.0",
            PdfVersion::V1_1 => "1.1",
            PdfVersion::V1_2 => "1.2",
            PdfVersion::V1_3 => "1.3",
            PdfVersion::V1_4 => "1.4",
            PdfVersion::V1_5 => "1.5",
            PdfVersion::V1_6 => "1.6",
            PdfVersion::V1_7 => "1.7",
            PdfVersion::V2_0 => "2.0",
        };
        write!(f, "{version}")
    }
}

/// A generated PDF together with the layout facts tests need
#[derive(Debug, Clone)]
pub struct BuiltPdf {
    pub bytes: Vec<u8>,
    /// Byte offset of every top-level `N G obj`
    pub offsets: BTreeMap<u32, usize>,
    /// Byte offset of the xref table or xref stream object
    pub xref_offset: usize,
    pub catalog: u32,
    pub pages_root: u32,
    pub page_objects: Vec<u32>,
    pub info: Option<u32>,
    /// Object number of the object stream, when one was written
    pub object_stream: Option<u32>,
    /// Trailer `Size`
    pub size: u32,
}

/// Builder for creating test PDFs
pub struct TestPdfBuilder {
    version: PdfVersion,
    objects: Vec<RawObject>,
    pages: Vec<PageContent>,
    info: Vec<(String, String)>,
    catalog_entries: Vec<(String, String)>,
    file_id: Option<[u8; 16]>,
    include_binary_marker: bool,
    compress_streams: bool,
    use_xref_stream: bool,
    use_object_streams: bool,
    stream_length_delta: i64,
    xref_offset_shift: i64,
    truncate_xref_after: Option<usize>,
}

#[derive(Clone)]
struct RawObject {
    number: u32,
    generation: u16,
    body: Vec<u8>,
    is_stream: bool,
}

#[derive(Clone)]
struct PageContent {
    width: f32,
    height: f32,
    content_stream: String,
    image: Option<ImageContent>,
}

#[derive(Clone)]
struct ImageContent {
    jpeg: Vec<u8>,
    width: u32,
    height: u32,
}

impl TestPdfBuilder {
    /// Create a new PDF builder with default settings
    pub fn new() -> Self {
        Self {
            version: PdfVersion::V1_4,
            objects: Vec::new(),
            pages: Vec::new(),
            info: Vec::new(),
            catalog_entries: Vec::new(),
            file_id: None,
            include_binary_marker: true,
            compress_streams: false,
            use_xref_stream: false,
            use_object_streams: false,
            stream_length_delta: 0,
            xref_offset_shift: 0,
            truncate_xref_after: None,
        }
    }

    /// Create a minimal valid PDF with one empty page
    pub fn minimal() -> Self {
        let mut builder = Self::new();
        builder.add_empty_page(612.0, 792.0);
        builder
    }

    pub fn with_version(mut self, version: PdfVersion) -> Self {
        self.version = version;
        self
    }

    /// Add document info
    pub fn with_info(mut self, key: &str, value: &str) -> Self {
        self.info.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_title(self, title: &str) -> Self {
        self.with_info("Title", title)
    }

    pub fn with_author(self, author: &str) -> Self {
        self.with_info("Author", author)
    }

    pub fn with_producer(self, producer: &str) -> Self {
        self.with_info("Producer", producer)
    }

    /// Add a raw `/Key value` pair to the catalog dictionary
    pub fn with_catalog_entry(mut self, key: &str, value: &str) -> Self {
        self.catalog_entries
            .push((key.to_string(), value.to_string()));
        self
    }

    /// Write `/ID [<id> <id>]` into the trailer
    pub fn with_file_id(mut self, id: [u8; 16]) -> Self {
        self.file_id = Some(id);
        self
    }

    /// Add an empty page
    pub fn add_empty_page(&mut self, width: f32, height: f32) -> &mut Self {
        self.pages.push(PageContent {
            width,
            height,
            content_stream: String::new(),
            image: None,
        });
        self
    }

    /// Add a page with text
    pub fn add_text_page(&mut self, text: &str, font_size: f32) -> &mut Self {
        let content = format!(
            "BT\n/F1 {} Tf\n100 700 Td\n({}) Tj\nET",
            font_size,
            escape_pdf_string(text)
        );
        self.pages.push(PageContent {
            width: 612.0,
            height: 792.0,
            content_stream: content,
            image: None,
        });
        self
    }

    /// Add a page that draws a DCT-encoded image XObject
    pub fn add_image_page(&mut self, jpeg: Vec<u8>, width: u32, height: u32) -> &mut Self {
        let content = format!("q\n{width} 0 0 {height} 0 0 cm\n/Im1 Do\nQ");
        self.pages.push(PageContent {
            width: width as f32,
            height: height as f32,
            content_stream: content,
            image: Some(ImageContent {
                jpeg,
                width,
                height,
            }),
        });
        self
    }

    /// Add an arbitrary non-stream object
    pub fn with_object(mut self, number: u32, generation: u16, content: &str) -> Self {
        self.objects.push(RawObject {
            number,
            generation,
            body: content.as_bytes().to_vec(),
            is_stream: false,
        });
        self
    }

    /// Add an arbitrary stream object; `/Length` is appended to `dict_entries`
    pub fn with_stream_object(mut self, number: u32, dict_entries: &str, data: &[u8]) -> Self {
        let mut body = format!("<< {} /Length {} >>\nstream\n", dict_entries, data.len()).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.objects.push(RawObject {
            number,
            generation: 0,
            body,
            is_stream: true,
        });
        self
    }

    /// Enable Flate compression of page content streams
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress_streams = compress;
        self
    }

    /// Use cross-reference streams (PDF 1.5+)
    pub fn with_xref_stream(mut self, use_xref: bool) -> Self {
        self.use_xref_stream = use_xref;
        if use_xref && self.version < PdfVersion::V1_5 {
            self.version = PdfVersion::V1_5;
        }
        self
    }

    /// Pack non-stream objects (other than the catalog) into one object stream
    pub fn with_object_streams(mut self, enabled: bool) -> Self {
        self.use_object_streams = enabled;
        if enabled {
            self = self.with_xref_stream(true);
        }
        self
    }

    /// Declare content stream lengths off by `delta` bytes
    pub fn with_stream_length_delta(mut self, delta: i64) -> Self {
        self.stream_length_delta = delta;
        self
    }

    /// Shift every in-use classic xref offset by `shift` bytes
    pub fn with_xref_offset_shift(mut self, shift: i64) -> Self {
        self.xref_offset_shift = shift;
        self
    }

    /// Stop writing classic xref entries after `entries` lines
    pub fn with_truncated_xref(mut self, entries: usize) -> Self {
        self.truncate_xref_after = Some(entries);
        self
    }

    /// Build the PDF bytes
    pub fn build(&self) -> Vec<u8> {
        self.build_parts().bytes
    }

    /// Build the PDF and report where everything landed
    pub fn build_parts(&self) -> BuiltPdf {
        let catalog = 1u32;
        let pages_root = 2u32;
        let mut next = 3u32;

        let page_objects: Vec<u32> = (0..self.pages.len())
            .map(|_| {
                let n = next;
                next += 1;
                n
            })
            .collect();

        let mut objects: Vec<RawObject> = Vec::new();

        let mut catalog_dict = format!("<< /Type /Catalog /Pages {pages_root} 0 R");
        for (key, value) in &self.catalog_entries {
            catalog_dict.push_str(&format!(" /{key} {value}"));
        }
        catalog_dict.push_str(" >>");
        objects.push(plain(catalog, catalog_dict));

        let kids: Vec<String> = page_objects.iter().map(|n| format!("{n} 0 R")).collect();
        objects.push(plain(
            pages_root,
            format!(
                "<< /Type /Pages /Kids [{}] /Count {} >>",
                kids.join(" "),
                self.pages.len()
            ),
        ));

        for (page, &page_number) in self.pages.iter().zip(&page_objects) {
            let mut page_dict = format!(
                "<< /Type /Page /Parent {} 0 R /MediaBox [0 0 {} {}]",
                pages_root, page.width, page.height
            );

            if let Some(image) = &page.image {
                let image_number = next;
                next += 1;
                let mut body = format!(
                    "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceRGB /BitsPerComponent 8 /Filter /DCTDecode /Length {} >>\nstream\n",
                    image.width,
                    image.height,
                    image.jpeg.len()
                )
                .into_bytes();
                body.extend_from_slice(&image.jpeg);
                body.extend_from_slice(b"\nendstream");
                objects.push(RawObject {
                    number: image_number,
                    generation: 0,
                    body,
                    is_stream: true,
                });
                page_dict.push_str(&format!(
                    " /Resources << /XObject << /Im1 {image_number} 0 R >> >>"
                ));
            } else if !page.content_stream.is_empty() {
                page_dict.push_str(
                    " /Resources << /Font << /F1 << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> >> >>",
                );
            }

            if !page.content_stream.is_empty() {
                let content_number = next;
                next += 1;
                objects.push(self.content_stream(content_number, &page.content_stream));
                page_dict.push_str(&format!(" /Contents {content_number} 0 R"));
            }

            page_dict.push_str(" >>");
            objects.push(plain(page_number, page_dict));
        }

        let info = if self.info.is_empty() {
            None
        } else {
            let info_number = next;
            next += 1;
            let mut info_dict = "<< ".to_string();
            for (key, value) in &self.info {
                info_dict.push_str(&format!("/{} ({}) ", key, escape_pdf_string(value)));
            }
            info_dict.push_str(">>");
            objects.push(plain(info_number, info_dict));
            Some(info_number)
        };

        objects.extend(self.objects.iter().cloned());
        objects.sort_by_key(|o| o.number);

        let max_number = objects.iter().map(|o| o.number).max().unwrap_or(0);
        let mut compressed: BTreeMap<u32, (u32, u32)> = BTreeMap::new();
        let mut object_stream = None;

        if self.use_object_streams {
            let stream_number = max_number.max(next - 1) + 1;
            let (members, top_level): (Vec<RawObject>, Vec<RawObject>) = objects
                .into_iter()
                .partition(|o| !o.is_stream && o.number != catalog && o.generation == 0);
            objects = top_level;

            let mut header = String::new();
            let mut payload = Vec::new();
            for (index, member) in members.iter().enumerate() {
                header.push_str(&format!("{} {} ", member.number, payload.len()));
                payload.extend_from_slice(&member.body);
                payload.push(b'\n');
                compressed.insert(member.number, (stream_number, index as u32));
            }
            let first = header.len();
            let mut data = header.into_bytes();
            data.extend_from_slice(&payload);
            let (data, filter) = self.maybe_compress(data);
            let mut body = format!(
                "<< /Type /ObjStm /N {} /First {}{} /Length {} >>\nstream\n",
                members.len(),
                first,
                filter,
                data.len()
            )
            .into_bytes();
            body.extend_from_slice(&data);
            body.extend_from_slice(b"\nendstream");
            objects.push(RawObject {
                number: stream_number,
                generation: 0,
                body,
                is_stream: true,
            });
            object_stream = Some(stream_number);
        }

        let mut pdf = Vec::new();
        pdf.extend_from_slice(format!("%PDF-{}\n", self.version).as_bytes());
        if self.include_binary_marker {
            pdf.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");
        }

        let mut offsets = BTreeMap::new();
        let mut generations = BTreeMap::new();
        for object in &objects {
            offsets.insert(object.number, pdf.len());
            generations.insert(object.number, object.generation);
            pdf.extend_from_slice(format!("{} {} obj\n", object.number, object.generation).as_bytes());
            pdf.extend_from_slice(&object.body);
            pdf.extend_from_slice(b"\nendobj\n");
        }

        let highest = offsets
            .keys()
            .chain(compressed.keys())
            .copied()
            .max()
            .unwrap_or(0);

        let trailer_extras = {
            let mut extras = format!(" /Root {catalog} 0 R");
            if let Some(info_number) = info {
                extras.push_str(&format!(" /Info {info_number} 0 R"));
            }
            if let Some(id) = self.file_id {
                let hex: String = id.iter().map(|b| format!("{b:02X}")).collect();
                extras.push_str(&format!(" /ID [<{hex}> <{hex}>]"));
            }
            extras
        };

        let xref_offset = pdf.len();
        let size;
        if self.use_xref_stream {
            let xref_number = highest + 1;
            size = xref_number + 1;
            offsets.insert(xref_number, xref_offset);

            let mut data = Vec::new();
            for number in 0..size {
                let (kind, field2, field3): (u8, u32, u16) = if number == 0 {
                    (0, 0, 65535)
                } else if let Some(&offset) = offsets.get(&number) {
                    (1, offset as u32, generations.get(&number).copied().unwrap_or(0))
                } else if let Some(&(stream, index)) = compressed.get(&number) {
                    (2, stream, index as u16)
                } else {
                    (0, 0, 0)
                };
                data.push(kind);
                data.extend_from_slice(&field2.to_be_bytes());
                data.extend_from_slice(&field3.to_be_bytes());
            }
            let (data, filter) = self.maybe_compress(data);
            pdf.extend_from_slice(
                format!(
                    "{xref_number} 0 obj\n<< /Type /XRef /Size {size} /W [1 4 2]{trailer_extras}{filter} /Length {} >>\nstream\n",
                    data.len()
                )
                .as_bytes(),
            );
            pdf.extend_from_slice(&data);
            pdf.extend_from_slice(b"\nendstream\nendobj\n");
            pdf.extend_from_slice(format!("startxref\n{xref_offset}\n%%EOF\n").as_bytes());
        } else {
            size = highest + 1;
            pdf.extend_from_slice(format!("xref\n0 {size}\n").as_bytes());
            pdf.extend_from_slice(b"0000000000 65535 f \n");
            for number in 1..size {
                if let Some(limit) = self.truncate_xref_after {
                    if number as usize > limit {
                        break;
                    }
                }
                match offsets.get(&number) {
                    Some(&offset) => {
                        let shifted = (offset as i64 + self.xref_offset_shift).max(0);
                        let generation = generations.get(&number).copied().unwrap_or(0);
                        pdf.extend_from_slice(format!("{shifted:010} {generation:05} n \n").as_bytes());
                    }
                    None => pdf.extend_from_slice(b"0000000000 00000 f \n"),
                }
            }
            pdf.extend_from_slice(
                format!("trailer\n<< /Size {size}{trailer_extras} >>\nstartxref\n{xref_offset}\n%%EOF\n")
                    .as_bytes(),
            );
        }

        BuiltPdf {
            bytes: pdf,
            offsets,
            xref_offset,
            catalog,
            pages_root,
            page_objects,
            info,
            object_stream,
            size,
        }
    }

    fn content_stream(&self, number: u32, content: &str) -> RawObject {
        let (data, filter) = self.maybe_compress(content.as_bytes().to_vec());
        let declared = (data.len() as i64 + self.stream_length_delta).max(0);
        let mut body = format!("<<{filter} /Length {declared} >>\nstream\n").into_bytes();
        body.extend_from_slice(&data);
        body.extend_from_slice(b"\nendstream");
        RawObject {
            number,
            generation: 0,
            body,
            is_stream: true,
        }
    }

    fn maybe_compress(&self, data: Vec<u8>) -> (Vec<u8>, &'static str) {
        if !self.compress_streams {
            return (data, "");
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        match encoder.write_all(&data).and_then(|_| encoder.finish()) {
            Ok(compressed) => (compressed, " /Filter /FlateDecode"),
            Err(_) => (data, ""),
        }
    }
}

fn plain(number: u32, dict: String) -> RawObject {
    RawObject {
        number,
        generation: 0,
        body: dict.into_bytes(),
        is_stream: false,
    }
}

/// Escape special characters in PDF strings
pub fn escape_pdf_string(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '(' => "\\(".to_string(),
            ')' => "\\)".to_string(),
            '\\' => "\\\\".to_string(),
            '\n' => "\\n".to_string(),
            '\r' => "\\r".to_string(),
            '\t' => "\\t".to_string(),
            _ => c.to_string(),
        })
        .collect()
}

impl Default for TestPdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}
