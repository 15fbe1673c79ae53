//! PDF Object Parser
//!
//! Parses PDF objects from tokens according to ISO 32000-1 Section 7.3

use super::lexer::{is_whitespace, Lexer, SpannedToken, Token};
use super::{ParseError, ParseOptions, ParseResult};
use indexmap::IndexMap;
use std::borrow::Borrow;
use std::fmt;
use std::sync::OnceLock;

/// Identity of an indirect object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ObjectId {
    pub number: u32,
    pub generation: u16,
}

impl ObjectId {
    pub fn new(number: u32, generation: u16) -> Self {
        Self { number, generation }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.number, self.generation)
    }
}

impl From<(u32, u16)> for ObjectId {
    fn from((number, generation): (u32, u16)) -> Self {
        Self { number, generation }
    }
}

/// PDF Name object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PdfName(pub String);

impl Borrow<str> for PdfName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// How a string was spelled in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFormat {
    Literal,
    Hex,
}

/// PDF String object
#[derive(Debug, Clone, PartialEq)]
pub struct PdfString {
    pub bytes: Vec<u8>,
    pub format: StringFormat,
}

/// PDF Array object
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PdfArray(pub Vec<PdfObject>);

/// PDF Dictionary object; keys keep their source order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PdfDictionary(pub IndexMap<PdfName, PdfObject>);

/// PDF Stream object
#[derive(Debug, Clone)]
pub struct PdfStream {
    pub dict: PdfDictionary,
    data: Vec<u8>,
    decoded: OnceLock<Vec<u8>>,
}

impl PartialEq for PdfStream {
    fn eq(&self, other: &Self) -> bool {
        self.dict == other.dict && self.data == other.data
    }
}

impl PdfStream {
    pub fn new(dict: PdfDictionary, data: Vec<u8>) -> Self {
        Self {
            dict,
            data,
            decoded: OnceLock::new(),
        }
    }

    /// Get the raw (possibly compressed) stream data
    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }

    /// Replace the raw bytes, update `Length` and drop the decoded cache
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.dict
            .insert("Length", PdfObject::Integer(data.len() as i64));
        self.data = data;
        self.decoded = OnceLock::new();
    }

    /// Decode through the whole filter chain. The result is cached.
    pub fn decode(&self) -> ParseResult<&[u8]> {
        if let Some(decoded) = self.decoded.get() {
            return Ok(decoded);
        }
        let decoded = super::filters::decode_stream(&self.data, &self.dict)?;
        Ok(self.decoded.get_or_init(|| decoded))
    }

    /// Declared `Length`, when it is a direct non-negative integer
    pub fn declared_length(&self) -> Option<usize> {
        self.dict
            .get("Length")
            .and_then(PdfObject::as_integer)
            .and_then(|n| usize::try_from(n).ok())
    }
}

/// PDF Object types
#[derive(Debug, Clone, PartialEq)]
pub enum PdfObject {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    String(PdfString),
    Name(PdfName),
    Array(PdfArray),
    Dictionary(PdfDictionary),
    Stream(PdfStream),
    Reference(ObjectId),
}

/// An object of the document arena
#[derive(Debug, Clone, PartialEq)]
pub struct IndirectObject {
    pub id: ObjectId,
    pub object: PdfObject,
}

impl IndirectObject {
    pub fn new(id: ObjectId, object: PdfObject) -> Self {
        Self { id, object }
    }
}

/// Resolves an indirect `/Length` while a stream is being captured
pub trait LengthResolver {
    fn resolve_length(&self, id: ObjectId) -> Option<i64>;
}

/// A correction applied while parsing in fix mode
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub position: usize,
    pub message: String,
}

/// Builds objects from the token stream of an in-memory file
pub struct ObjectParser<'a, 'r> {
    lexer: Lexer<'a>,
    options: &'r ParseOptions,
    resolver: Option<&'r dyn LengthResolver>,
    corrections: Vec<Correction>,
}

impl<'a, 'r> ObjectParser<'a, 'r> {
    pub fn new(data: &'a [u8], position: usize, options: &'r ParseOptions) -> Self {
        Self {
            lexer: Lexer::new_at(data, position).with_lenient(options.fix),
            options,
            resolver: None,
            corrections: Vec::new(),
        }
    }

    pub fn with_length_resolver(mut self, resolver: &'r dyn LengthResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn lexer(&mut self) -> &mut Lexer<'a> {
        &mut self.lexer
    }

    pub fn position(&self) -> usize {
        self.lexer.position()
    }

    /// Corrections applied so far
    pub fn corrections(&self) -> &[Correction] {
        &self.corrections
    }

    pub fn into_corrections(self) -> Vec<Correction> {
        self.corrections
    }

    fn note(&mut self, position: usize, message: String) {
        self.options.note_fix(position, &message);
        self.corrections.push(Correction { position, message });
    }

    fn next_non_comment(&mut self) -> ParseResult<SpannedToken> {
        loop {
            let spanned = self.lexer.next_spanned()?;
            if !matches!(spanned.token, Token::Comment(_)) {
                return Ok(spanned);
            }
        }
    }

    /// Parse one value
    pub fn parse_object(&mut self) -> ParseResult<PdfObject> {
        let token = self.next_non_comment()?;
        self.parse_from_token(token, 0)
    }

    /// Parse `N G obj <value> endobj`
    pub fn parse_indirect(&mut self) -> ParseResult<(ObjectId, PdfObject)> {
        let number = self.next_non_comment()?;
        let generation = self.next_non_comment()?;
        let keyword = self.next_non_comment()?;

        let id = match (&number.token, &generation.token, &keyword.token) {
            (Token::Integer(n), Token::Integer(g), Token::Obj) => {
                match (u32::try_from(*n), u16::try_from(*g)) {
                    (Ok(n), Ok(g)) => ObjectId::new(n, g),
                    _ => {
                        return Err(ParseError::UnexpectedToken {
                            position: number.span.start,
                            expected: "object number and generation".to_string(),
                            found: format!("{n} {g}"),
                        })
                    }
                }
            }
            _ => {
                return Err(ParseError::UnexpectedToken {
                    position: number.span.start,
                    expected: "N G obj".to_string(),
                    found: format!(
                        "{:?} {:?} {:?}",
                        number.token, generation.token, keyword.token
                    ),
                })
            }
        };

        let body_start = self.lexer.position();
        let object = match self.parse_object() {
            Ok(object) => object,
            Err(e) if self.options.fix && e.is_recoverable() => {
                return self.skip_unreadable_body(id, body_start, e)
            }
            Err(e) => return Err(e),
        };

        let before_end = self.lexer.position();
        let end = match self.next_non_comment() {
            Ok(end) => end,
            Err(_) if self.options.fix => {
                self.note(before_end, format!("object {id}: missing endobj"));
                self.lexer.seek(before_end);
                return Ok((id, object));
            }
            Err(e) => return Err(e),
        };
        if end.token != Token::EndObj {
            if self.options.fix {
                self.note(end.span.start, format!("object {id}: missing endobj"));
                self.lexer.push_token(end);
            } else {
                return Err(ParseError::UnexpectedToken {
                    position: end.span.start,
                    expected: "endobj".to_string(),
                    found: format!("{:?}", end.token),
                });
            }
        }

        Ok((id, object))
    }

    /// Replace a body that fails to tokenize with null when its `endobj`
    /// is the next anchor keyword
    fn skip_unreadable_body(
        &mut self,
        id: ObjectId,
        body_start: usize,
        error: ParseError,
    ) -> ParseResult<(ObjectId, PdfObject)> {
        self.lexer.seek(body_start);
        match self.lexer.resync() {
            Some(at) if self.lexer.keyword_at(at, b"endobj") => {
                self.note(body_start, format!("object {id}: unreadable body ({error}) replaced by null"));
                self.lexer.seek(at + b"endobj".len());
                Ok((id, PdfObject::Null))
            }
            _ => Err(error),
        }
    }

    /// Parse a PDF object starting from a specific token
    fn parse_from_token(&mut self, spanned: SpannedToken, depth: usize) -> ParseResult<PdfObject> {
        if depth > self.options.max_nesting_depth {
            return Err(ParseError::NestingTooDeep(self.options.max_nesting_depth));
        }
        match spanned.token {
            Token::Null => Ok(PdfObject::Null),
            Token::Boolean(b) => Ok(PdfObject::Boolean(b)),
            Token::Integer(i) => self.integer_or_reference(i, spanned.span.end),
            Token::Real(r) => Ok(PdfObject::Real(r)),
            Token::String(s) => Ok(PdfObject::String(PdfString::new(s))),
            Token::HexString(s) => Ok(PdfObject::String(PdfString::hex(s))),
            Token::Name(n) => Ok(PdfObject::Name(PdfName(n))),
            Token::ArrayStart => self.parse_array(spanned.span.start, depth + 1),
            Token::DictStart => self.parse_dictionary_or_stream(spanned.span.start, depth + 1),
            Token::Eof => Err(ParseError::UnexpectedToken {
                position: spanned.span.start,
                expected: "PDF object".to_string(),
                found: "end of input".to_string(),
            }),
            other => Err(ParseError::UnexpectedToken {
                position: spanned.span.start,
                expected: "PDF object".to_string(),
                found: format!("{other:?}"),
            }),
        }
    }

    /// `N G R` triples become references; anything else leaves the integer alone
    fn integer_or_reference(&mut self, value: i64, end: usize) -> ParseResult<PdfObject> {
        let Ok(number) = u32::try_from(value) else {
            return Ok(PdfObject::Integer(value));
        };

        let second = match self.next_non_comment() {
            Ok(t) => t,
            Err(_) => {
                self.lexer.seek(end);
                return Ok(PdfObject::Integer(value));
            }
        };
        if let Token::Integer(g) = second.token {
            if let Ok(generation) = u16::try_from(g) {
                match self.next_non_comment() {
                    Ok(third) if third.token == Token::R => {
                        return Ok(PdfObject::Reference(ObjectId::new(number, generation)));
                    }
                    Ok(third) => {
                        self.lexer.push_token(third);
                        self.lexer.push_token(second);
                    }
                    Err(_) => self.lexer.seek(end),
                }
                return Ok(PdfObject::Integer(value));
            }
        }
        self.lexer.push_token(second);
        Ok(PdfObject::Integer(value))
    }

    /// Parse a PDF array
    fn parse_array(&mut self, start: usize, depth: usize) -> ParseResult<PdfObject> {
        let mut elements = Vec::new();

        loop {
            let spanned = self.next_non_comment()?;
            match spanned.token {
                Token::ArrayEnd => break,
                Token::Eof | Token::EndObj | Token::Stream | Token::EndStream
                    if self.options.fix =>
                {
                    self.note(start, "unterminated array closed".to_string());
                    self.lexer.push_token(spanned);
                    break;
                }
                _ => elements.push(self.parse_from_token(spanned, depth)?),
            }
        }

        Ok(PdfObject::Array(PdfArray(elements)))
    }

    /// Parse a PDF dictionary and check if it's followed by a stream
    fn parse_dictionary_or_stream(&mut self, start: usize, depth: usize) -> ParseResult<PdfObject> {
        let mut dict = self.parse_dictionary_inner(start, depth)?;

        let next = self.next_non_comment()?;
        if next.token == Token::Stream {
            let data = self.parse_stream_data(&mut dict, next.span.end)?;
            return Ok(PdfObject::Stream(PdfStream::new(dict, data)));
        }

        // Not a stream, just a dictionary
        self.lexer.push_token(next);
        Ok(PdfObject::Dictionary(dict))
    }

    /// Parse the inner dictionary
    fn parse_dictionary_inner(&mut self, start: usize, depth: usize) -> ParseResult<PdfDictionary> {
        let mut dict = PdfDictionary::new();

        loop {
            let spanned = self.next_non_comment()?;
            match spanned.token {
                Token::DictEnd => break,
                Token::Name(key) => {
                    let value = self.next_non_comment()?;
                    match value.token {
                        Token::DictEnd if self.options.fix => {
                            self.note(spanned.span.start, format!("dropped key /{key} without a value"));
                            break;
                        }
                        Token::DictEnd => {
                            return Err(ParseError::MalformedDictionary {
                                position: spanned.span.start,
                                message: format!("key /{key} has no value"),
                            })
                        }
                        _ => {
                            let value = self.parse_from_token(value, depth)?;
                            dict.insert(key, value);
                        }
                    }
                }
                Token::Eof | Token::EndObj | Token::Stream | Token::EndStream | Token::Obj
                    if self.options.fix =>
                {
                    self.note(start, "unterminated dictionary closed".to_string());
                    self.lexer.push_token(spanned);
                    break;
                }
                Token::Eof => {
                    return Err(ParseError::MalformedDictionary {
                        position: start,
                        message: "unterminated dictionary".to_string(),
                    })
                }
                other if self.options.fix => {
                    let position = spanned.span.start;
                    // Consume the stray value so the next key lines up
                    self.parse_from_token(SpannedToken { token: other, span: spanned.span }, depth)?;
                    self.note(position, "dropped entry with a non-name key".to_string());
                }
                other => {
                    return Err(ParseError::MalformedDictionary {
                        position: spanned.span.start,
                        message: format!("expected a name key or >>, found {other:?}"),
                    })
                }
            }
        }

        Ok(dict)
    }

    /// Capture raw stream bytes after the `stream` keyword
    fn parse_stream_data(&mut self, dict: &mut PdfDictionary, keyword_end: usize) -> ParseResult<Vec<u8>> {
        let data = self.lexer.data();
        let start = stream_data_start(data, keyword_end);

        let declared = match dict.get("Length") {
            Some(PdfObject::Integer(n)) => usize::try_from(*n).ok(),
            Some(PdfObject::Reference(id)) => self
                .resolver
                .and_then(|r| r.resolve_length(*id))
                .and_then(|n| usize::try_from(n).ok()),
            _ => None,
        };

        if let Some(length) = declared {
            if let Some(end) = start.checked_add(length).filter(|&end| end <= data.len()) {
                let mut after = end;
                while after < data.len() && is_whitespace(data[after]) {
                    after += 1;
                }
                if self.lexer.keyword_at(after, b"endstream") {
                    self.lexer.seek(after + b"endstream".len());
                    return Ok(data[start..end].to_vec());
                }
            }
        }

        // The hint did not land on endstream: look for the keyword itself
        self.lexer.seek(start);
        let found = self
            .lexer
            .find_keyword_ahead(b"endstream", self.options.max_recovery_bytes)
            .map(|keyword| (keyword, trim_eol_before(data, start, keyword)));

        match found {
            Some((keyword, end)) if self.options.fix => {
                let actual = end - start;
                self.note(
                    start,
                    format!("stream length corrected from {declared:?} to {actual}"),
                );
                dict.insert("Length", PdfObject::Integer(actual as i64));
                self.lexer.seek(keyword + b"endstream".len());
                Ok(data[start..end].to_vec())
            }
            found => Err(ParseError::StreamLengthMismatch {
                position: start,
                declared,
                found: found.map(|(_, end)| end - start),
            }),
        }
    }
}

/// First byte of stream data: after `stream`, optional padding and one EOL
fn stream_data_start(data: &[u8], keyword_end: usize) -> usize {
    let mut pos = keyword_end;
    while pos < data.len() && data[pos] == b' ' {
        pos += 1;
    }
    match data.get(pos..pos + 2) {
        Some(b"\r\n") => pos + 2,
        _ => match data.get(pos) {
            Some(b'\n') | Some(b'\r') => pos + 1,
            _ => keyword_end,
        },
    }
}

/// Strip the single EOL that precedes `endstream`
fn trim_eol_before(data: &[u8], start: usize, keyword: usize) -> usize {
    if keyword >= start + 2 && &data[keyword - 2..keyword] == b"\r\n" {
        keyword - 2
    } else if keyword > start && matches!(data[keyword - 1], b'\n' | b'\r') {
        keyword - 1
    } else {
        keyword
    }
}

impl PdfObject {
    /// Parse a single value from `data` with default options
    pub fn parse_bytes(data: &[u8]) -> ParseResult<Self> {
        let options = ParseOptions::default();
        ObjectParser::new(data, 0, &options).parse_object()
    }

    /// Check if this object is null
    pub fn is_null(&self) -> bool {
        matches!(self, PdfObject::Null)
    }

    /// Short name of the variant for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            PdfObject::Null => "null",
            PdfObject::Boolean(_) => "boolean",
            PdfObject::Integer(_) => "integer",
            PdfObject::Real(_) => "real",
            PdfObject::String(_) => "string",
            PdfObject::Name(_) => "name",
            PdfObject::Array(_) => "array",
            PdfObject::Dictionary(_) => "dictionary",
            PdfObject::Stream(_) => "stream",
            PdfObject::Reference(_) => "reference",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PdfObject::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PdfObject::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as real number; integers widen
    pub fn as_real(&self) -> Option<f64> {
        match self {
            PdfObject::Real(r) => Some(*r),
            PdfObject::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&PdfString> {
        match self {
            PdfObject::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&PdfName> {
        match self {
            PdfObject::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&PdfArray> {
        match self {
            PdfObject::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut PdfArray> {
        match self {
            PdfObject::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get as dictionary; a stream yields its dictionary
    pub fn as_dict(&self) -> Option<&PdfDictionary> {
        match self {
            PdfObject::Dictionary(d) => Some(d),
            PdfObject::Stream(s) => Some(&s.dict),
            _ => None,
        }
    }

    pub fn as_dict_mut(&mut self) -> Option<&mut PdfDictionary> {
        match self {
            PdfObject::Dictionary(d) => Some(d),
            PdfObject::Stream(s) => Some(&mut s.dict),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&PdfStream> {
        match self {
            PdfObject::Stream(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_stream_mut(&mut self) -> Option<&mut PdfStream> {
        match self {
            PdfObject::Stream(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<ObjectId> {
        match self {
            PdfObject::Reference(id) => Some(*id),
            _ => None,
        }
    }
}

impl PdfDictionary {
    /// Create a new empty dictionary
    pub fn new() -> Self {
        PdfDictionary(IndexMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&PdfObject> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut PdfObject> {
        self.0.get_mut(key)
    }

    /// Insert a key-value pair; an existing key keeps its position
    pub fn insert(&mut self, key: impl Into<String>, value: PdfObject) {
        self.0.insert(PdfName(key.into()), value);
    }

    /// Remove a key, keeping the order of the others
    pub fn remove(&mut self, key: &str) -> Option<PdfObject> {
        self.0.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Get the dictionary type (value of /Type key)
    pub fn get_type(&self) -> Option<&str> {
        self.get("Type").and_then(|obj| obj.as_name()).map(|n| n.0.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PdfName, &PdfObject)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PdfArray {
    pub fn new() -> Self {
        PdfArray(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PdfObject> {
        self.0.get(index)
    }

    pub fn push(&mut self, obj: PdfObject) {
        self.0.push(obj);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PdfObject> {
        self.0.iter()
    }
}

impl PdfString {
    /// A literal `( ... )` string
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            format: StringFormat::Literal,
        }
    }

    /// A hexadecimal `< ... >` string
    pub fn hex(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            format: StringFormat::Hex,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decode a text string: UTF-16BE with BOM, UTF-8 with BOM, otherwise
    /// bytes are taken as Latin-1 (close enough to PDFDocEncoding for display)
    pub fn to_text(&self) -> String {
        match self.bytes.as_slice() {
            [0xFE, 0xFF, rest @ ..] => {
                let units: Vec<u16> = rest
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
            [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
            bytes => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

impl PdfName {
    pub fn new(name: impl Into<String>) -> Self {
        PdfName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
