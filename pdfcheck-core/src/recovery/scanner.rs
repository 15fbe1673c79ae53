//! PDF object scanner for recovery operations
//!
//! Walks the whole file looking for `N G obj` headers, parses every
//! candidate and keeps the ones that parse as complete indirect objects.
//! The result stands in for a cross-reference table that is missing or
//! cannot be trusted.

use crate::parser::lexer::is_regular;
use crate::parser::objects::{ObjectId, ObjectParser, PdfDictionary, PdfObject};
use crate::parser::xref::SearchingLengthResolver;
use crate::parser::ParseOptions;
use lazy_static::lazy_static;
use regex::bytes::Regex;
use std::collections::BTreeMap;
use std::time::Instant;

lazy_static! {
    static ref OBJ_HEADER: Regex = Regex::new(r"(?-u)(\d{1,10})[ \t\r\n\x0C\x00]+(\d{1,5})[ \t\r\n\x0C\x00]+obj\b")
        .expect("object header pattern is valid");
    static ref TRAILER_START: Regex =
        Regex::new(r"(?-u)trailer[ \t\r\n\x0C\x00]*<<").expect("trailer pattern is valid");
}

/// One object found by the scan
#[derive(Debug, Clone)]
pub struct ScannedObject {
    pub id: ObjectId,
    /// Offset of the object number
    pub offset: usize,
    /// Offset just past the object's last token
    pub end: usize,
    /// Object type if detected
    pub object_type: ObjectType,
}

/// Coarse classification used for recovery decisions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectType {
    Catalog,
    Pages,
    Page,
    ObjectStream,
    XRefStream,
    Stream,
    Dictionary,
    Other,
}

impl ObjectType {
    fn classify(object: &PdfObject) -> Self {
        let (dict, is_stream) = match object {
            PdfObject::Stream(stream) => (&stream.dict, true),
            PdfObject::Dictionary(dict) => (dict, false),
            _ => return ObjectType::Other,
        };
        match (dict.get_type(), is_stream) {
            (Some("ObjStm"), true) => ObjectType::ObjectStream,
            (Some("XRef"), true) => ObjectType::XRefStream,
            (_, true) => ObjectType::Stream,
            (Some("Catalog"), false) => ObjectType::Catalog,
            (Some("Pages"), false) => ObjectType::Pages,
            (Some("Page"), false) => ObjectType::Page,
            _ => ObjectType::Dictionary,
        }
    }
}

/// Scan statistics
#[derive(Debug, Default, Clone)]
pub struct ScanStats {
    /// Header matches examined
    pub candidates: usize,
    /// Candidates that did not parse
    pub rejected: usize,
    /// Objects superseded by a later definition of the same number
    pub superseded: usize,
    /// Scan duration in milliseconds
    pub duration_ms: u64,
}

/// Result of scanning operation
#[derive(Debug, Default, Clone)]
pub struct ScanResult {
    /// Latest definition of every object number
    pub objects: BTreeMap<u32, ScannedObject>,
    /// `trailer` dictionaries in file order, with their offsets
    pub trailers: Vec<(usize, PdfDictionary)>,
    pub stats: ScanStats,
}

impl ScanResult {
    pub fn get(&self, number: u32) -> Option<&ScannedObject> {
        self.objects.get(&number)
    }

    /// The last scanned trailer carrying a `Root` entry
    pub fn last_trailer_with_root(&self) -> Option<&PdfDictionary> {
        self.trailers
            .iter()
            .rev()
            .map(|(_, dict)| dict)
            .find(|dict| dict.get("Root").and_then(PdfObject::as_reference).is_some())
    }

    /// The `Info` reference of the last trailer that has one
    pub fn last_info(&self) -> Option<ObjectId> {
        self.trailers
            .iter()
            .rev()
            .find_map(|(_, dict)| dict.get("Info").and_then(PdfObject::as_reference))
    }

    /// Object streams found by the scan, in ascending number order
    pub fn object_streams(&self) -> impl Iterator<Item = &ScannedObject> {
        self.objects
            .values()
            .filter(|o| o.object_type == ObjectType::ObjectStream)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Scanner for finding valid PDF objects
pub struct ObjectScanner<'a> {
    data: &'a [u8],
    options: ParseOptions,
}

impl<'a> ObjectScanner<'a> {
    /// Candidates are parsed leniently whatever the caller's mode; the
    /// scan only decides where objects live.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            options: ParseOptions::lenient(),
        }
    }

    pub fn scan(&self) -> ScanResult {
        let started = Instant::now();
        let mut result = ScanResult::default();
        let resolver = SearchingLengthResolver { data: self.data };

        let mut search_from = 0;
        while let Some(caps) = OBJ_HEADER.captures_at(self.data, search_from) {
            let Some(whole) = caps.get(0) else { break };
            let offset = whole.start();
            search_from = whole.end();

            if offset > 0 && is_regular(self.data[offset - 1]) {
                continue;
            }
            result.stats.candidates += 1;

            let mut parser =
                ObjectParser::new(self.data, offset, &self.options).with_length_resolver(&resolver);
            let (id, object) = match parser.parse_indirect() {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::debug!(offset, error = %e, "scan candidate rejected");
                    result.stats.rejected += 1;
                    continue;
                }
            };
            let mut end = parser.position();
            if !parser.corrections().is_empty() {
                // A repaired body can run over the next object's header
                if let Some(nested) = self.header_within(whole.end(), end) {
                    tracing::debug!(offset, nested, "object body cut at a nested header");
                    end = nested;
                }
            }
            // Objects never overlap; skip what was just consumed
            search_from = end.max(search_from);

            let scanned = ScannedObject {
                id,
                offset,
                end,
                object_type: ObjectType::classify(&object),
            };
            if result.objects.insert(id.number, scanned).is_some() {
                result.stats.superseded += 1;
            }
        }

        result.trailers = self.scan_trailers();
        result.stats.duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            objects = result.objects.len(),
            trailers = result.trailers.len(),
            rejected = result.stats.rejected,
            "linear scan finished"
        );
        result
    }

    /// First `N G obj` header starting in `from..to` on a token boundary
    fn header_within(&self, from: usize, to: usize) -> Option<usize> {
        let mut at = from;
        while let Some(found) = OBJ_HEADER.find_at(self.data, at) {
            if found.start() >= to {
                break;
            }
            if !is_regular(self.data[found.start() - 1]) {
                return Some(found.start());
            }
            at = found.end();
        }
        None
    }

    fn scan_trailers(&self) -> Vec<(usize, PdfDictionary)> {
        let mut trailers = Vec::new();
        for found in TRAILER_START.find_iter(self.data) {
            let offset = found.start();
            if offset > 0 && is_regular(self.data[offset - 1]) {
                continue;
            }
            let dict_start = offset + b"trailer".len();
            let mut parser = ObjectParser::new(self.data, dict_start, &self.options);
            if let Ok(PdfObject::Dictionary(dict)) = parser.parse_object() {
                trailers.push((offset, dict));
            }
        }
        trailers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_helpers::{assemble, create_minimal_pdf};

    #[test]
    fn test_scan_finds_every_object() {
        let (pdf, offsets) = assemble(
            "1.4",
            &[
                (1, "<< /Type /Catalog /Pages 2 0 R >>"),
                (2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>"),
                (3, "<< /Type /Page /Parent 2 0 R >>"),
            ],
            "",
        );
        let result = ObjectScanner::new(&pdf).scan();

        assert_eq!(result.len(), 3);
        for (number, offset) in offsets {
            assert_eq!(result.get(number).unwrap().offset, offset);
        }
        assert_eq!(result.get(2).unwrap().object_type, ObjectType::Pages);
        assert_eq!(result.get(1).unwrap().object_type, ObjectType::Catalog);
        assert_eq!(result.trailers.len(), 1);
    }

    #[test]
    fn test_later_definition_wins() {
        let pdf = b"%PDF-1.4\n1 0 obj\n(old)\nendobj\n1 0 obj\n(new)\nendobj\n";
        let result = ObjectScanner::new(pdf).scan();

        assert_eq!(result.len(), 1);
        assert_eq!(result.get(1).unwrap().offset, 30);
        assert_eq!(result.stats.superseded, 1);
    }

    #[test]
    fn test_header_inside_number_is_ignored() {
        // "11 0 obj" must not also match as "1 0 obj"
        let pdf = b"%PDF-1.4\n11 0 obj\nnull\nendobj\n";
        let result = ObjectScanner::new(pdf).scan();
        assert_eq!(result.len(), 1);
        assert!(result.get(11).is_some());
        assert!(result.get(1).is_none());
    }

    #[test]
    fn test_object_mentioned_in_string_is_skipped() {
        let pdf = b"%PDF-1.4\n1 0 obj\n(2 0 obj)\nendobj\n";
        let result = ObjectScanner::new(pdf).scan();
        assert_eq!(result.len(), 1);
        assert!(result.get(2).is_none());
    }

    #[test]
    fn test_stream_with_wrong_length_survives_scan() {
        let pdf =
            b"%PDF-1.4\n4 0 obj\n<< /Length 99 >>\nstream\nabc\nendstream\nendobj\n5 0 obj\n7\nendobj\n";
        let result = ObjectScanner::new(pdf).scan();
        assert_eq!(result.get(4).unwrap().object_type, ObjectType::Stream);
        assert!(result.get(5).is_some());
    }

    #[test]
    fn test_truncated_object_keeps_following_header() {
        let pdf = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
5 0 obj\n<< /A 1\n2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n";
        let result = ObjectScanner::new(pdf).scan();

        let numbers: Vec<u32> = result.objects.keys().copied().collect();
        assert_eq!(numbers, vec![1, 2, 5]);
        assert_eq!(result.get(2).unwrap().object_type, ObjectType::Pages);
        let truncated = result.get(5).unwrap();
        assert_eq!(truncated.end, result.get(2).unwrap().offset);
    }

    #[test]
    fn test_trailer_helpers() {
        let pdf = create_minimal_pdf();
        let result = ObjectScanner::new(&pdf).scan();
        let trailer = result.last_trailer_with_root().unwrap();
        assert_eq!(
            trailer.get("Root").and_then(PdfObject::as_reference),
            Some(ObjectId::new(1, 0))
        );
        assert_eq!(result.last_info(), None);
    }

    #[test]
    fn test_garbage_rejected() {
        let pdf = b"%PDF-1.4\n3 0 obj << /A ";
        let result = ObjectScanner::new(pdf).scan();
        // lenient parsing closes the dictionary at end of input
        assert!(result.stats.candidates >= 1);
        assert!(result.len() <= 1);
    }
}
