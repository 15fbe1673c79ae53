//! PDF Cross-Reference Table Parser
//!
//! Parses xref tables according to ISO 32000-1 Section 7.5.4, cross-reference
//! streams (7.5.8) and the `Prev`/`XRefStm` chains of updated files.

use super::lexer::{find_bytes, is_whitespace, rfind_bytes, Lexer, Token};
use super::objects::{LengthResolver, ObjectId, ObjectParser, PdfDictionary, PdfObject};
use super::trailer::{offset_entry, PdfTrailer};
use super::xref_stream::XRefStream;
use super::xref_types::{XRefAnomaly, XRefEntry};
use super::{ParseError, ParseOptions, ParseResult};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// `startxref` must appear this close to the end of a well-formed file
const STARTXREF_WINDOW: usize = 1024;

/// Offset named by the last `startxref`. Fix mode searches the whole file.
pub fn find_startxref(data: &[u8], options: &ParseOptions) -> Option<usize> {
    let tail_start = data.len().saturating_sub(STARTXREF_WINDOW);
    let found = rfind_bytes(&data[tail_start..], b"startxref")
        .map(|i| tail_start + i)
        .or_else(|| {
            if options.fix {
                rfind_bytes(data, b"startxref")
            } else {
                None
            }
        })?;

    let mut lexer = Lexer::new_at(data, found + b"startxref".len());
    match lexer.next_token() {
        Ok(Token::Integer(offset)) => usize::try_from(offset).ok(),
        _ => None,
    }
}

/// Whether an xref section was a classic table or a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Table,
    Stream,
}

/// One parsed xref section with its trailer
#[derive(Debug, Clone)]
pub struct XRefSection {
    pub kind: SectionKind,
    pub entries: Vec<(u32, XRefEntry)>,
    pub trailer: PdfDictionary,
    /// Object number of the xref stream itself
    pub stream_object: Option<u32>,
    /// Damage found while reading the section
    pub problems: Vec<XRefAnomaly>,
}

/// Cross-reference table merged over the whole section chain
#[derive(Debug, Clone, Default)]
pub struct XRefTable {
    entries: BTreeMap<u32, XRefEntry>,
    trailer: Option<PdfTrailer>,
    xref_streams: BTreeSet<u32>,
    problems: Vec<XRefAnomaly>,
}

impl XRefTable {
    /// Create a new empty xref table
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the section at `startxref` and everything its `Prev` chain names.
    /// Newer sections shadow older ones.
    pub fn load(data: &[u8], startxref: usize, options: &ParseOptions) -> ParseResult<Self> {
        let mut table = Self::new();
        let mut visited = HashSet::new();
        let mut next = Some(startxref);

        while let Some(offset) = next.take() {
            if !visited.insert(offset) {
                table
                    .problems
                    .push(XRefAnomaly::new("Prev chain loops back to an earlier section").at(offset));
                break;
            }

            let section = match Self::parse_section(data, offset, options) {
                Ok(section) => section,
                Err(e) if table.trailer.is_some() => {
                    table
                        .problems
                        .push(XRefAnomaly::new(format!("unreadable older xref section: {e}")).at(offset));
                    break;
                }
                Err(e) => return Err(e),
            };
            tracing::debug!(
                offset,
                kind = ?section.kind,
                entries = section.entries.len(),
                "loaded xref section"
            );

            let hybrid = offset_entry(&section.trailer, "XRefStm");
            next = offset_entry(&section.trailer, "Prev");
            table.absorb(section, offset, false);

            // Hybrid files: the stream fills what the table leaves free
            if let Some(stm) = hybrid {
                if visited.insert(stm) {
                    match Self::parse_section(data, stm, options) {
                        Ok(stream_section) => table.absorb(stream_section, stm, true),
                        Err(e) => table
                            .problems
                            .push(XRefAnomaly::new(format!("unreadable XRefStm section: {e}")).at(stm)),
                    }
                }
            }
        }

        Ok(table)
    }

    fn absorb(&mut self, section: XRefSection, offset: usize, fill_free: bool) {
        for (number, entry) in section.entries {
            match self.entries.get(&number) {
                None => {
                    self.entries.insert(number, entry);
                }
                Some(XRefEntry::Free { .. }) if fill_free && entry.is_in_use() => {
                    self.entries.insert(number, entry);
                }
                Some(_) => {}
            }
        }
        if let Some(n) = section.stream_object {
            self.xref_streams.insert(n);
        }
        self.problems.extend(section.problems);
        match &mut self.trailer {
            None => self.trailer = Some(PdfTrailer::from_dict(section.trailer, Some(offset))),
            Some(trailer) => trailer.merge_older(&section.trailer),
        }
    }

    /// Parse the single section at `offset`
    pub fn parse_section(data: &[u8], offset: usize, options: &ParseOptions) -> ParseResult<XRefSection> {
        if offset >= data.len() {
            return Err(ParseError::InvalidXRef {
                position: offset,
                message: "xref offset lies past the end of the file".to_string(),
            });
        }
        let mut lexer = Lexer::new_at(data, offset);
        let start = offset + lexer.skip_whitespace();

        if lexer.keyword_at(start, b"xref") {
            parse_table(data, start + b"xref".len(), options)
        } else {
            parse_stream_section(data, start, options)
        }
    }

    pub fn get(&self, number: u32) -> Option<&XRefEntry> {
        self.entries.get(&number)
    }

    pub fn entries(&self) -> &BTreeMap<u32, XRefEntry> {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &XRefEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The newest trailer, with older trailers' keys filled in
    pub fn trailer(&self) -> Option<&PdfTrailer> {
        self.trailer.as_ref()
    }

    pub fn take_trailer(&mut self) -> Option<PdfTrailer> {
        self.trailer.take()
    }

    /// Object numbers of the xref streams met along the chain
    pub fn xref_streams(&self) -> &BTreeSet<u32> {
        &self.xref_streams
    }

    /// Damage recorded while loading
    pub fn problems(&self) -> &[XRefAnomaly] {
        &self.problems
    }
}

/// True when `N G obj` for `id` starts at `offset`
pub fn verify_offset(data: &[u8], offset: usize, id: ObjectId) -> bool {
    if offset >= data.len() {
        return false;
    }
    let mut lexer = Lexer::new_at(data, offset);
    matches!(
        (lexer.next_token(), lexer.next_token(), lexer.next_token()),
        (Ok(Token::Integer(n)), Ok(Token::Integer(g)), Ok(Token::Obj))
            if n == id.number as i64 && g == id.generation as i64
    )
}

/// Minimal byte cursor for the fixed-format table rows
struct RowCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RowCursor<'a> {
    fn skip_whitespace(&mut self) {
        while self.pos < self.data.len() && is_whitespace(self.data[self.pos]) {
            self.pos += 1;
        }
    }

    fn read_uint(&mut self) -> Option<u64> {
        self.skip_whitespace();
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        if start == self.pos {
            return None;
        }
        std::str::from_utf8(&self.data[start..self.pos]).ok()?.parse().ok()
    }

    fn read_flag(&mut self) -> Option<u8> {
        self.skip_whitespace();
        let flag = *self.data.get(self.pos)?;
        if matches!(flag, b'n' | b'f') {
            self.pos += 1;
            Some(flag)
        } else {
            None
        }
    }

    fn at_keyword(&mut self, keyword: &[u8]) -> bool {
        self.skip_whitespace();
        self.data[self.pos..].starts_with(keyword)
    }
}

/// Parse subsections after the `xref` keyword, then the trailer dictionary
fn parse_table(data: &[u8], body: usize, options: &ParseOptions) -> ParseResult<XRefSection> {
    let mut cursor = RowCursor { data, pos: body };
    let mut entries = Vec::new();
    let mut problems = Vec::new();

    'subsections: loop {
        if cursor.at_keyword(b"trailer") || cursor.pos >= data.len() {
            break;
        }
        let header_pos = cursor.pos;
        let (Some(first), Some(count)) = (cursor.read_uint(), cursor.read_uint()) else {
            problems.push(XRefAnomaly::new("unreadable xref subsection header").at(header_pos));
            break;
        };
        let (Ok(mut first), Ok(count)) = (u32::try_from(first), u32::try_from(count)) else {
            problems.push(XRefAnomaly::new("xref subsection header out of range").at(header_pos));
            break;
        };

        for i in 0..count {
            let row_pos = cursor.pos;
            let row = (cursor.read_uint(), cursor.read_uint(), cursor.read_flag());
            let (Some(field1), Some(generation), Some(flag)) = row else {
                problems.push(
                    XRefAnomaly::new(format!(
                        "xref subsection starting at {first} ends after {i} of {count} entries"
                    ))
                    .at(row_pos),
                );
                break 'subsections;
            };

            // A subsection declared from 1 that begins with the head of the free list is off by one
            if i == 0 && first == 1 && flag == b'f' && generation == 65535 {
                first = 0;
            }

            let generation = generation.min(u16::MAX as u64) as u16;
            let entry = if flag == b'n' {
                XRefEntry::InUse {
                    offset: field1 as usize,
                    generation,
                }
            } else {
                XRefEntry::Free {
                    next: field1 as u32,
                    generation,
                }
            };
            entries.push((first.saturating_add(i), entry));
        }
    }

    let trailer_pos = find_bytes(&data[cursor.pos..], b"trailer")
        .map(|i| cursor.pos + i)
        .ok_or_else(|| ParseError::InvalidXRef {
            position: cursor.pos,
            message: "xref table has no trailer".to_string(),
        })?;

    let mut parser = ObjectParser::new(data, trailer_pos + b"trailer".len(), options);
    let trailer = match parser.parse_object()? {
        PdfObject::Dictionary(dict) => dict,
        other => {
            return Err(ParseError::InvalidXRef {
                position: trailer_pos,
                message: format!("trailer is a {}, not a dictionary", other.type_name()),
            })
        }
    };

    Ok(XRefSection {
        kind: SectionKind::Table,
        entries,
        trailer,
        stream_object: None,
        problems,
    })
}

/// Resolves an indirect `/Length` by locating the object in the raw bytes
pub(crate) struct SearchingLengthResolver<'a> {
    pub(crate) data: &'a [u8],
}

impl LengthResolver for SearchingLengthResolver<'_> {
    fn resolve_length(&self, id: ObjectId) -> Option<i64> {
        let header = format!("{} {} obj", id.number, id.generation);
        let mut from = 0;
        while let Some(i) = find_bytes(&self.data[from..], header.as_bytes()) {
            let at = from + i;
            if at == 0 || !self.data[at - 1].is_ascii_digit() {
                let mut lexer = Lexer::new_at(self.data, at + header.len());
                if let Ok(Token::Integer(n)) = lexer.next_token() {
                    return Some(n);
                }
            }
            from = at + header.len();
        }
        None
    }
}

fn parse_stream_section(data: &[u8], start: usize, options: &ParseOptions) -> ParseResult<XRefSection> {
    let resolver = SearchingLengthResolver { data };
    let mut parser = ObjectParser::new(data, start, options).with_length_resolver(&resolver);
    let (id, object) = parser.parse_indirect().map_err(|e| ParseError::InvalidXRef {
        position: start,
        message: format!("neither an xref table nor an xref stream: {e}"),
    })?;

    let stream = match object {
        PdfObject::Stream(stream) if stream.dict.get_type() == Some("XRef") => stream,
        other => {
            return Err(ParseError::InvalidXRef {
                position: start,
                message: format!("object {id} is a {} but not an xref stream", other.type_name()),
            })
        }
    };

    let xref = XRefStream::parse(&stream)?;
    let entries = xref.to_xref_entries()?;

    Ok(XRefSection {
        kind: SectionKind::Stream,
        entries,
        trailer: xref.dict,
        stream_object: Some(id.number),
        problems: Vec::new(),
    })
}
