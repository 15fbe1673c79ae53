//! PDF Lexer
//!
//! Tokenizes PDF syntax according to ISO 32000-1 Section 7.2. The lexer works
//! on the whole file held in memory; every token carries the byte range it was
//! read from so recovery code can tell exactly where the syntax broke.

use super::{ParseError, ParseResult};
use std::ops::Range;

/// PDF Token types
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Boolean: true or false
    Boolean(bool),

    /// Integer number
    Integer(i64),

    /// Real number
    Real(f64),

    /// Literal string `( ... )`
    String(Vec<u8>),

    /// Hexadecimal string `< ... >`
    HexString(Vec<u8>),

    /// Name object (e.g., /Type), `#xx` escapes already decoded
    Name(String),

    /// Left square bracket [
    ArrayStart,

    /// Right square bracket ]
    ArrayEnd,

    /// Dictionary start <<
    DictStart,

    /// Dictionary end >>
    DictEnd,

    /// stream keyword
    Stream,

    /// endstream keyword
    EndStream,

    /// obj keyword
    Obj,

    /// endobj keyword
    EndObj,

    /// xref keyword
    XRef,

    /// trailer keyword
    Trailer,

    /// startxref keyword
    StartXRef,

    /// R keyword of an indirect reference
    R,

    /// Null object
    Null,

    /// Comment without the leading `%`
    Comment(Vec<u8>),

    /// End of input
    Eof,
}

/// A token with the byte range it occupies in the input
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Range<usize>,
}

/// PDF whitespace (ISO 32000-1 Table 1)
pub fn is_whitespace(ch: u8) -> bool {
    matches!(ch, b'\0' | b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

/// PDF delimiters (ISO 32000-1 Table 2)
pub fn is_delimiter(ch: u8) -> bool {
    matches!(
        ch,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

pub fn is_regular(ch: u8) -> bool {
    !is_whitespace(ch) && !is_delimiter(ch)
}

const ANCHORS: [&[u8]; 5] = [b"endobj", b"obj", b"trailer", b"startxref", b"xref"];

/// PDF Lexer over an in-memory buffer
pub struct Lexer<'a> {
    data: &'a [u8],
    position: usize,
    lenient: bool,
    failed: bool,
    token_buffer: Vec<SpannedToken>,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self::new_at(data, 0)
    }

    /// Create a new lexer starting at byte `position`
    pub fn new_at(data: &'a [u8], position: usize) -> Self {
        Self {
            data,
            position: position.min(data.len()),
            lenient: false,
            failed: false,
            token_buffer: Vec::new(),
        }
    }

    /// Accept malformed numbers, names and hex strings instead of failing
    pub fn with_lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    /// The whole input
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Get current position
    pub fn position(&self) -> usize {
        self.token_buffer
            .last()
            .map(|t| t.span.start)
            .unwrap_or(self.position)
    }

    /// Restart tokenizing at `position`
    pub fn seek(&mut self, position: usize) {
        self.position = position.min(self.data.len());
        self.token_buffer.clear();
        self.failed = false;
    }

    /// Get the next token, skipping comments
    pub fn next_token(&mut self) -> ParseResult<Token> {
        loop {
            let spanned = self.next_spanned()?;
            if !matches!(spanned.token, Token::Comment(_)) {
                return Ok(spanned.token);
            }
        }
    }

    /// Get the next token together with its byte span
    pub fn next_spanned(&mut self) -> ParseResult<SpannedToken> {
        // Check if we have a pushed-back token
        if let Some(token) = self.token_buffer.pop() {
            return Ok(token);
        }

        self.skip_whitespace();
        let start = self.position;

        let ch = match self.peek_char() {
            Some(ch) => ch,
            None => {
                return Ok(SpannedToken {
                    token: Token::Eof,
                    span: start..start,
                })
            }
        };

        let token = match ch {
            b'%' => self.read_comment(),
            b'/' => self.read_name(),
            b'(' => self.read_literal_string(),
            b'<' => self.read_angle_bracket(),
            b'>' => {
                self.consume_char();
                if self.peek_char() == Some(b'>') {
                    self.consume_char();
                    Ok(Token::DictEnd)
                } else {
                    Err(self.error(start, "expected '>' after '>'"))
                }
            }
            b'[' => {
                self.consume_char();
                Ok(Token::ArrayStart)
            }
            b']' => {
                self.consume_char();
                Ok(Token::ArrayEnd)
            }
            b'+' | b'-' | b'0'..=b'9' | b'.' => self.read_number(),
            _ if is_regular(ch) => self.read_keyword(),
            _ => {
                self.consume_char();
                Err(self.error(start, &format!("unexpected character 0x{ch:02X}")))
            }
        }?;

        Ok(SpannedToken {
            token,
            span: start..self.position,
        })
    }

    /// Push back a token to be returned by the next call to next_token
    pub fn push_token(&mut self, token: SpannedToken) {
        self.token_buffer.push(token);
    }

    fn peek_char(&self) -> Option<u8> {
        self.data.get(self.position).copied()
    }

    fn consume_char(&mut self) -> Option<u8> {
        let ch = self.peek_char();
        if ch.is_some() {
            self.position += 1;
        }
        ch
    }

    fn error(&self, position: usize, message: &str) -> ParseError {
        ParseError::LexError {
            position,
            message: message.to_string(),
        }
    }

    /// Skip whitespace and return the number of bytes skipped
    pub fn skip_whitespace(&mut self) -> usize {
        let start = self.position;
        while let Some(ch) = self.peek_char() {
            if !is_whitespace(ch) {
                break;
            }
            self.position += 1;
        }
        self.position - start
    }

    /// Read a comment (from % to end of line)
    fn read_comment(&mut self) -> ParseResult<Token> {
        self.consume_char(); // consume '%'
        let start = self.position;
        while let Some(ch) = self.peek_char() {
            if ch == b'\n' || ch == b'\r' {
                break;
            }
            self.position += 1;
        }
        Ok(Token::Comment(self.data[start..self.position].to_vec()))
    }

    /// Read a name object (e.g., /Type)
    fn read_name(&mut self) -> ParseResult<Token> {
        self.consume_char(); // consume '/'
        let mut name = String::new();

        while let Some(ch) = self.peek_char() {
            if !is_regular(ch) {
                break;
            }
            self.consume_char();

            // Handle hex codes in names (e.g., /A#20B means /A B)
            if ch == b'#' {
                let escape_at = self.position - 1;
                let digits = self
                    .data
                    .get(self.position..self.position + 2)
                    .filter(|d| d.iter().all(u8::is_ascii_hexdigit));
                match digits {
                    Some(d) => {
                        let value = (hex_value(d[0]) << 4) | hex_value(d[1]);
                        self.position += 2;
                        name.push(value as char);
                    }
                    None if self.lenient => name.push('#'),
                    None => return Err(self.error(escape_at, "invalid #xx escape in name")),
                }
            } else {
                // Bytes map one to one onto chars so names round-trip
                name.push(ch as char);
            }
        }

        Ok(Token::Name(name))
    }

    /// Read a literal string (parentheses)
    fn read_literal_string(&mut self) -> ParseResult<Token> {
        let start = self.position;
        self.consume_char(); // consume '('
        let mut string = Vec::new();
        let mut paren_depth = 1;

        while paren_depth > 0 {
            let ch = self
                .consume_char()
                .ok_or_else(|| self.error(start, "unterminated literal string"))?;

            match ch {
                b'\\' => {
                    let Some(next) = self.consume_char() else {
                        return Err(self.error(start, "unterminated literal string"));
                    };
                    match next {
                        b'n' => string.push(b'\n'),
                        b'r' => string.push(b'\r'),
                        b't' => string.push(b'\t'),
                        b'b' => string.push(b'\x08'),
                        b'f' => string.push(b'\x0C'),
                        b'(' | b')' | b'\\' => string.push(next),
                        b'0'..=b'7' => {
                            // Octal escape sequence
                            let mut value = u32::from(next - b'0');
                            for _ in 0..2 {
                                match self.peek_char() {
                                    Some(d @ b'0'..=b'7') => {
                                        self.consume_char();
                                        value = value * 8 + u32::from(d - b'0');
                                    }
                                    _ => break,
                                }
                            }
                            string.push((value & 0xFF) as u8);
                        }
                        // Line continuation
                        b'\r' => {
                            if self.peek_char() == Some(b'\n') {
                                self.consume_char();
                            }
                        }
                        b'\n' => {}
                        // Unknown escape, use literal
                        _ => string.push(next),
                    }
                }
                b'(' => {
                    string.push(ch);
                    paren_depth += 1;
                }
                b')' => {
                    paren_depth -= 1;
                    if paren_depth > 0 {
                        string.push(ch);
                    }
                }
                b'\r' => {
                    // End-of-line markers inside strings read as a single LF
                    if self.peek_char() == Some(b'\n') {
                        self.consume_char();
                    }
                    string.push(b'\n');
                }
                _ => string.push(ch),
            }
        }

        Ok(Token::String(string))
    }

    /// Read angle bracket tokens (hex strings or dict markers)
    fn read_angle_bracket(&mut self) -> ParseResult<Token> {
        let start = self.position;
        self.consume_char(); // consume '<'

        if self.peek_char() == Some(b'<') {
            self.consume_char();
            return Ok(Token::DictStart);
        }

        let mut digits = Vec::new();
        loop {
            let Some(ch) = self.consume_char() else {
                return Err(self.error(start, "unterminated hex string"));
            };
            match ch {
                b'>' => break,
                _ if ch.is_ascii_hexdigit() => digits.push(hex_value(ch)),
                _ if is_whitespace(ch) => {}
                _ if self.lenient => {}
                _ => {
                    return Err(self.error(
                        self.position - 1,
                        &format!("invalid character 0x{ch:02X} in hex string"),
                    ))
                }
            }
        }

        // Pad with 0 if odd number of digits
        if digits.len() % 2 != 0 {
            digits.push(0);
        }

        let bytes = digits
            .chunks(2)
            .map(|pair| (pair[0] << 4) | pair[1])
            .collect();
        Ok(Token::HexString(bytes))
    }

    /// Read a number (integer or real)
    fn read_number(&mut self) -> ParseResult<Token> {
        let start = self.position;
        let mut number_str = String::new();
        let mut has_dot = false;
        let mut has_digits = false;

        // Handle sign; repeated signs only make it through in lenient mode
        if let Some(sign @ (b'+' | b'-')) = self.peek_char() {
            self.consume_char();
            if sign == b'-' {
                number_str.push('-');
            }
            while let Some(b'+' | b'-') = self.peek_char() {
                if !self.lenient {
                    return Err(self.error(start, "repeated sign in number"));
                }
                self.consume_char();
            }
        }

        while let Some(ch) = self.peek_char() {
            match ch {
                b'0'..=b'9' => {
                    self.consume_char();
                    number_str.push(ch as char);
                    has_digits = true;
                }
                b'.' if !has_dot => {
                    self.consume_char();
                    number_str.push('.');
                    has_dot = true;
                }
                b'.' if self.lenient => {
                    // 1.2.3 reads as 1.2
                    while let Some(b'0'..=b'9' | b'.') = self.peek_char() {
                        self.consume_char();
                    }
                }
                b'.' => return Err(self.error(start, "second decimal point in number")),
                _ => break,
            }
        }

        // Scientific notation is not PDF syntax but some writers emit it
        if has_digits {
            if let Some(b'e' | b'E') = self.peek_char() {
                let mark = self.position;
                let mut exponent = String::from("e");
                self.consume_char();
                if let Some(sign @ (b'+' | b'-')) = self.peek_char() {
                    self.consume_char();
                    exponent.push(sign as char);
                }
                let mut exponent_digits = false;
                while let Some(d @ b'0'..=b'9') = self.peek_char() {
                    self.consume_char();
                    exponent.push(d as char);
                    exponent_digits = true;
                }
                if exponent_digits {
                    number_str.push_str(&exponent);
                    has_dot = true;
                } else {
                    self.position = mark;
                }
            }
        }

        if !has_digits {
            if self.lenient {
                return Ok(Token::Integer(0));
            }
            return Err(self.error(start, "number without digits"));
        }

        if let Some(ch) = self.peek_char() {
            if is_regular(ch) && !self.lenient {
                return Err(self.error(start, "malformed number"));
            }
        }

        if !has_dot {
            if let Ok(value) = number_str.parse::<i64>() {
                return Ok(Token::Integer(value));
            }
        }
        number_str
            .parse::<f64>()
            .map(Token::Real)
            .map_err(|_| self.error(start, &format!("invalid number '{number_str}'")))
    }

    /// Read a keyword
    fn read_keyword(&mut self) -> ParseResult<Token> {
        let start = self.position;
        while let Some(ch) = self.peek_char() {
            if !is_regular(ch) {
                break;
            }
            self.position += 1;
        }
        let word = &self.data[start..self.position];
        match word {
            b"true" => Ok(Token::Boolean(true)),
            b"false" => Ok(Token::Boolean(false)),
            b"null" => Ok(Token::Null),
            b"obj" => Ok(Token::Obj),
            b"endobj" => Ok(Token::EndObj),
            b"stream" => Ok(Token::Stream),
            b"endstream" => Ok(Token::EndStream),
            b"xref" => Ok(Token::XRef),
            b"trailer" => Ok(Token::Trailer),
            b"startxref" => Ok(Token::StartXRef),
            b"R" => Ok(Token::R),
            _ => Err(self.error(
                start,
                &format!("unknown keyword '{}'", String::from_utf8_lossy(word)),
            )),
        }
    }

    /// Find a keyword ahead without consuming bytes.
    /// Returns the absolute offset of the keyword.
    pub fn find_keyword_ahead(&self, keyword: &[u8], max_bytes: usize) -> Option<usize> {
        let end = self
            .position
            .saturating_add(max_bytes)
            .saturating_add(keyword.len())
            .min(self.data.len());
        find_bytes(&self.data[self.position..end], keyword).map(|i| self.position + i)
    }

    /// True when `keyword` starts at `position` and ends on a token boundary
    pub fn keyword_at(&self, position: usize, keyword: &[u8]) -> bool {
        self.data
            .get(position..position + keyword.len())
            .is_some_and(|w| w == keyword)
            && self
                .data
                .get(position + keyword.len())
                .map_or(true, |&ch| !is_regular(ch))
    }

    /// Skip forward to the next anchor keyword (`obj`, `endobj`, `xref`,
    /// `trailer`, `startxref`) and position the lexer on it.
    /// Returns the keyword's offset, or `None` at end of input.
    pub fn resync(&mut self) -> Option<usize> {
        self.token_buffer.clear();
        self.failed = false;
        let mut i = self.position;
        while i < self.data.len() {
            let at_boundary = i == 0 || !is_regular(self.data[i - 1]);
            if at_boundary {
                if let Some(anchor) = ANCHORS.iter().find(|a| self.keyword_at(i, a)) {
                    tracing::debug!(position = i, "lexer resynchronized on '{}'", String::from_utf8_lossy(anchor));
                    self.position = i;
                    return Some(i);
                }
            }
            i += 1;
        }
        self.position = self.data.len();
        None
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = ParseResult<SpannedToken>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_spanned() {
            Ok(SpannedToken {
                token: Token::Eof, ..
            }) => None,
            Ok(token) => Some(Ok(token)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

fn hex_value(ch: u8) -> u8 {
    match ch {
        b'0'..=b'9' => ch - b'0',
        b'a'..=b'f' => ch - b'a' + 10,
        b'A'..=b'F' => ch - b'A' + 10,
        _ => 0,
    }
}

/// Position of the first occurrence of `needle` in `haystack`
pub fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Position of the last occurrence of `needle` in `haystack`
pub fn rfind_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
