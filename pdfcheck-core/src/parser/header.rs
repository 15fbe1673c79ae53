//! PDF Header Parser
//!
//! Parses PDF header and version according to ISO 32000-1 Section 7.5.2

use super::lexer::find_bytes;
use super::{ParseError, ParseOptions, ParseResult};
use std::str::FromStr;

/// How far into the file the `%PDF-` marker may start
const HEADER_SEARCH_WINDOW: usize = 1024;

/// PDF Version information
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PdfVersion {
    pub major: u8,
    pub minor: u8,
}

impl PdfVersion {
    /// Create a new PDF version
    pub fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Check if this version is one ISO 32000 knows about
    pub fn is_supported(&self) -> bool {
        matches!((self.major, self.minor), (1, 0..=7) | (2, 0))
    }
}

impl Default for PdfVersion {
    fn default() -> Self {
        Self::new(1, 4)
    }
}

impl std::fmt::Display for PdfVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for PdfVersion {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        let (major, minor) = s.trim().split_once('.').ok_or(ParseError::InvalidHeader)?;
        let major = major.parse::<u8>().map_err(|_| ParseError::InvalidHeader)?;
        // Some writers append junk after the minor digit ("1.4a"); keep the leading digits
        let digits: String = minor.chars().take_while(char::is_ascii_digit).collect();
        let minor = digits.parse::<u8>().map_err(|_| ParseError::InvalidHeader)?;
        Ok(Self::new(major, minor))
    }
}

/// PDF Header information
#[derive(Debug, Clone, PartialEq)]
pub struct PdfHeader {
    pub version: PdfVersion,
    pub has_binary_marker: bool,
    /// Byte offset of `%PDF-`; junk before it shifts every xref offset
    pub offset: usize,
    /// The version could not be read and 1.4 was assumed
    pub assumed_version: bool,
}

impl PdfHeader {
    /// Parse the header at the start of `data`
    pub fn parse(data: &[u8], options: &ParseOptions) -> ParseResult<Self> {
        let window = &data[..data.len().min(HEADER_SEARCH_WINDOW)];
        let Some(offset) = find_bytes(window, b"%PDF-") else {
            if options.fix {
                options.note_fix(0, "no %PDF- header, assuming version 1.4");
                return Ok(Self {
                    version: PdfVersion::default(),
                    has_binary_marker: false,
                    offset: 0,
                    assumed_version: true,
                });
            }
            return Err(ParseError::InvalidHeader);
        };

        let line_start = offset + 5;
        let line_end = data[line_start..]
            .iter()
            .position(|&b| b == b'\r' || b == b'\n')
            .map_or(data.len(), |p| line_start + p);
        let line = String::from_utf8_lossy(&data[line_start..line_end]);

        let mut assumed_version = false;
        let version = match line.parse::<PdfVersion>() {
            Ok(version) => version,
            Err(_) if options.fix => {
                options.note_fix(offset, &format!("unreadable version '{line}', assuming 1.4"));
                assumed_version = true;
                PdfVersion::default()
            }
            Err(e) => return Err(e),
        };
        if !version.is_supported() {
            tracing::warn!("PDF version {version} is outside 1.0-2.0");
        }

        Ok(Self {
            version,
            has_binary_marker: Self::check_binary_marker(&data[line_end..]),
            offset,
            assumed_version,
        })
    }

    /// The second line should be a comment with at least four bytes >= 128
    fn check_binary_marker(rest: &[u8]) -> bool {
        let rest = match rest {
            [b'\r', b'\n', tail @ ..] | [b'\r' | b'\n', tail @ ..] => tail,
            tail => tail,
        };
        let line = rest
            .iter()
            .position(|&b| b == b'\r' || b == b'\n')
            .map_or(rest, |end| &rest[..end]);

        match line.split_first() {
            Some((b'%', body)) => body.iter().filter(|&&b| b >= 128).count() >= 4,
            _ => false,
        }
    }
}
