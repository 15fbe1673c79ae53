//! PDF Object Stream Parser
//!
//! Handles compressed objects stored in object streams (PDF 1.5+)

use super::lexer::{Lexer, Token};
use super::objects::{ObjectParser, PdfObject, PdfStream};
use super::{ParseError, ParseOptions, ParseResult};

/// The members of an object stream, in index order. A member that could
/// not be parsed keeps its slot so indexes stay aligned with the xref.
#[derive(Debug, Clone)]
pub struct ObjectStream {
    members: Vec<(u32, Option<PdfObject>)>,
}

impl ObjectStream {
    /// Decode the stream and parse every member eagerly
    pub fn parse(stream: &PdfStream, options: &ParseOptions) -> ParseResult<Self> {
        let dict = &stream.dict;
        if dict.get_type() != Some("ObjStm") {
            return Err(ParseError::MissingKey("Type ObjStm".to_string()));
        }

        let count = dict
            .get("N")
            .and_then(PdfObject::as_integer)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| ParseError::MissingKey("N".to_string()))?;
        let first = dict
            .get("First")
            .and_then(PdfObject::as_integer)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| ParseError::MissingKey("First".to_string()))?;

        let data = stream.decode()?;
        let header = read_header(data, count, first)?;

        let mut members = Vec::with_capacity(header.len());
        for (number, offset) in header {
            let position = first.saturating_add(offset);
            let mut parser = ObjectParser::new(data, position, options);
            match parser.parse_object() {
                Ok(object) => members.push((number, Some(object))),
                Err(e) if options.fix => {
                    options.note_fix(position, &format!("skipped compressed object {number}: {e}"));
                    members.push((number, None));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Self { members })
    }

    /// Object stored at `index` and its number
    pub fn get(&self, index: usize) -> Option<(u32, &PdfObject)> {
        let (number, object) = self.members.get(index)?;
        Some((*number, object.as_ref()?))
    }

    /// Get an object by its object number
    pub fn get_object(&self, number: u32) -> Option<&PdfObject> {
        self.members
            .iter()
            .find(|(n, _)| *n == number)
            .and_then(|(_, obj)| obj.as_ref())
    }

    /// Object numbers named by the header, in index order
    pub fn numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.members.iter().map(|(n, _)| *n)
    }

    /// Number of header slots, parsed or not
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn into_objects(self) -> Vec<(u32, PdfObject)> {
        self.members
            .into_iter()
            .filter_map(|(n, obj)| obj.map(|obj| (n, obj)))
            .collect()
    }
}

/// `count` pairs of (object number, offset relative to `First`)
fn read_header(data: &[u8], count: usize, first: usize) -> ParseResult<Vec<(u32, usize)>> {
    let mut lexer = Lexer::new(&data[..first.min(data.len())]);
    let mut pairs = Vec::with_capacity(count.min(4096));

    for _ in 0..count {
        let number = lexer.next_token()?;
        let offset = lexer.next_token()?;
        match (number, offset) {
            (Token::Integer(n), Token::Integer(o)) => {
                let (Ok(n), Ok(o)) = (u32::try_from(n), usize::try_from(o)) else {
                    return Err(ParseError::InvalidXRef {
                        position: lexer.position(),
                        message: "negative number in object stream header".to_string(),
                    });
                };
                pairs.push((n, o));
            }
            (Token::Eof, _) | (_, Token::Eof) => break,
            (a, b) => {
                return Err(ParseError::UnexpectedToken {
                    position: lexer.position(),
                    expected: "object number and offset".to_string(),
                    found: format!("{a:?} {b:?}"),
                })
            }
        }
    }

    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::objects::{PdfDictionary, PdfName};

    fn object_stream(header: &str, body: &str, n: i64) -> PdfStream {
        let mut dict = PdfDictionary::new();
        dict.insert("Type", PdfObject::Name(PdfName::new("ObjStm")));
        dict.insert("N", PdfObject::Integer(n));
        dict.insert("First", PdfObject::Integer(header.len() as i64));
        PdfStream::new(dict, format!("{header}{body}").into_bytes())
    }

    #[test]
    fn test_parse_members() {
        let stream = object_stream("10 0 11 6 ", "(one) << /Two 2 >>", 2);
        let objstm = ObjectStream::parse(&stream, &ParseOptions::default()).unwrap();

        assert_eq!(objstm.len(), 2);
        assert_eq!(objstm.get(0).unwrap().0, 10);
        let two = objstm.get_object(11).unwrap().as_dict().unwrap();
        assert_eq!(two.get("Two"), Some(&PdfObject::Integer(2)));
        assert!(objstm.get_object(12).is_none());
    }

    #[test]
    fn test_header_shorter_than_n() {
        let stream = object_stream("10 0 ", "null", 3);
        let objstm = ObjectStream::parse(&stream, &ParseOptions::default()).unwrap();
        assert_eq!(objstm.len(), 1);
    }

    #[test]
    fn test_bad_member_skipped_in_fix_mode() {
        let stream = object_stream("10 0 11 2 ", "1 ) ", 2);
        assert!(ObjectStream::parse(&stream, &ParseOptions::default()).is_err());

        let objstm = ObjectStream::parse(&stream, &ParseOptions::lenient()).unwrap();
        assert_eq!(objstm.len(), 2);
        assert_eq!(objstm.get_object(10), Some(&PdfObject::Integer(1)));
        assert!(objstm.get(1).is_none());
        assert_eq!(objstm.numbers().collect::<Vec<_>>(), vec![10, 11]);
        assert_eq!(objstm.into_objects().len(), 1);
    }

    #[test]
    fn test_not_an_object_stream() {
        let stream = PdfStream::new(PdfDictionary::new(), Vec::new());
        assert!(ObjectStream::parse(&stream, &ParseOptions::default()).is_err());
    }
}
