//! PDF Trailer Parser
//!
//! Parses PDF trailer according to ISO 32000-1 Section 7.5.5

use super::objects::{ObjectId, PdfDictionary, PdfObject, PdfString};
use super::{ParseError, ParseResult};

/// Keys that describe an xref stream rather than the document
const XREF_STREAM_KEYS: [&str; 7] = ["Type", "W", "Index", "Length", "Filter", "DecodeParms", "DL"];

/// Keys that only make sense for the section they were read from
const SECTION_KEYS: [&str; 2] = ["Prev", "XRefStm"];

/// PDF Trailer information
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PdfTrailer {
    /// The trailer dictionary
    pub dict: PdfDictionary,
    /// Byte offset of the newest xref section, `None` for a synthesized trailer
    pub xref_offset: Option<usize>,
}

impl PdfTrailer {
    /// Wrap a trailer dictionary. Xref stream dictionaries lose their stream keys.
    pub fn from_dict(mut dict: PdfDictionary, xref_offset: Option<usize>) -> Self {
        if dict.get_type() == Some("XRef") {
            for key in XREF_STREAM_KEYS {
                dict.remove(key);
            }
        }
        PdfTrailer { dict, xref_offset }
    }

    /// Build a trailer from scratch after the original was lost
    pub fn synthesize(root: ObjectId, info: Option<ObjectId>, size: u32) -> Self {
        let mut dict = PdfDictionary::new();
        dict.insert("Size", PdfObject::Integer(size as i64));
        dict.insert("Root", PdfObject::Reference(root));
        if let Some(info) = info {
            dict.insert("Info", PdfObject::Reference(info));
        }
        PdfTrailer {
            dict,
            xref_offset: None,
        }
    }

    /// Fill keys missing here from an older section's trailer
    pub fn merge_older(&mut self, older: &PdfDictionary) {
        for (key, value) in older.iter() {
            let key = key.as_str();
            if SECTION_KEYS.contains(&key) || XREF_STREAM_KEYS.contains(&key) {
                continue;
            }
            if !self.dict.contains_key(key) {
                self.dict.insert(key, value.clone());
            }
        }
    }

    /// Get the size (number of entries in xref table)
    pub fn size(&self) -> ParseResult<u32> {
        self.dict
            .get("Size")
            .and_then(PdfObject::as_integer)
            .and_then(|i| u32::try_from(i).ok())
            .ok_or_else(|| ParseError::MissingKey("Size".to_string()))
    }

    /// Get the root object reference (document catalog)
    pub fn root(&self) -> ParseResult<ObjectId> {
        match self.dict.get("Root") {
            Some(PdfObject::Reference(id)) => Ok(*id),
            Some(other) => Err(ParseError::MissingRoot(format!(
                "trailer Root is a {}, not a reference",
                other.type_name()
            ))),
            None => Err(ParseError::MissingRoot("trailer has no Root entry".to_string())),
        }
    }

    pub fn set_root(&mut self, id: ObjectId) {
        self.dict.insert("Root", PdfObject::Reference(id));
    }

    /// Get the info object reference (document information dictionary)
    pub fn info(&self) -> Option<ObjectId> {
        self.dict.get("Info").and_then(PdfObject::as_reference)
    }

    pub fn set_info(&mut self, id: Option<ObjectId>) {
        match id {
            Some(id) => self.dict.insert("Info", PdfObject::Reference(id)),
            None => {
                self.dict.remove("Info");
            }
        }
    }

    /// Byte offset of the previous xref section
    pub fn prev(&self) -> Option<usize> {
        offset_entry(&self.dict, "Prev")
    }

    /// Get the ID array (file identifiers)
    pub fn id(&self) -> Option<&PdfObject> {
        self.dict.get("ID")
    }

    /// Both halves of a well-formed `ID` array
    pub fn file_ids(&self) -> Option<(&PdfString, &PdfString)> {
        let array = self.id()?.as_array()?;
        match (array.get(0)?, array.get(1)?) {
            (PdfObject::String(a), PdfObject::String(b)) => Some((a, b)),
            _ => None,
        }
    }

    /// Check if this PDF is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.dict.contains_key("Encrypt")
    }

    /// Get the encryption dictionary, direct or by reference
    pub fn encrypt(&self) -> Option<&PdfObject> {
        self.dict.get("Encrypt")
    }
}

/// A non-negative integer entry used as a byte offset
pub(crate) fn offset_entry(dict: &PdfDictionary, key: &str) -> Option<usize> {
    dict.get(key)
        .and_then(PdfObject::as_integer)
        .and_then(|n| usize::try_from(n).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::objects::{PdfArray, PdfName};

    fn trailer(entries: Vec<(&str, PdfObject)>) -> PdfTrailer {
        let mut dict = PdfDictionary::new();
        for (key, value) in entries {
            dict.insert(key, value);
        }
        PdfTrailer::from_dict(dict, Some(1000))
    }

    #[test]
    fn test_trailer_basic() {
        let trailer = trailer(vec![
            ("Size", PdfObject::Integer(100)),
            ("Root", PdfObject::Reference(ObjectId::new(1, 0))),
        ]);

        assert_eq!(trailer.size().unwrap(), 100);
        assert_eq!(trailer.root().unwrap(), ObjectId::new(1, 0));
        assert!(trailer.info().is_none());
        assert!(!trailer.is_encrypted());
        assert_eq!(trailer.xref_offset, Some(1000));
    }

    #[test]
    fn test_trailer_root_missing_or_mistyped() {
        let missing = trailer(vec![("Size", PdfObject::Integer(100))]);
        assert!(matches!(missing.root(), Err(ParseError::MissingRoot(_))));

        let mistyped = trailer(vec![("Root", PdfObject::Integer(1))]);
        match mistyped.root() {
            Err(ParseError::MissingRoot(msg)) => assert!(msg.contains("integer")),
            other => panic!("expected MissingRoot, got {other:?}"),
        }
    }

    #[test]
    fn test_trailer_size_missing() {
        let trailer = trailer(vec![("Root", PdfObject::Reference(ObjectId::new(1, 0)))]);
        match trailer.size() {
            Err(ParseError::MissingKey(key)) => assert_eq!(key, "Size"),
            _ => panic!("Expected MissingKey error for Size"),
        }
    }

    #[test]
    fn test_trailer_prev_as_float_is_ignored() {
        let trailer = trailer(vec![("Prev", PdfObject::Real(5000.0))]);
        assert_eq!(trailer.prev(), None);
    }

    #[test]
    fn test_trailer_file_ids() {
        let mut ids = PdfArray::new();
        ids.push(PdfObject::String(PdfString::hex(b"FirstID".to_vec())));
        ids.push(PdfObject::String(PdfString::hex(b"SecondID".to_vec())));
        let trailer = trailer(vec![("ID", PdfObject::Array(ids))]);

        let (first, second) = trailer.file_ids().unwrap();
        assert_eq!(first.as_bytes(), b"FirstID");
        assert_eq!(second.as_bytes(), b"SecondID");
    }

    #[test]
    fn test_xref_stream_dict_loses_stream_keys() {
        let mut dict = PdfDictionary::new();
        dict.insert("Type", PdfObject::Name(PdfName::new("XRef")));
        dict.insert("W", PdfObject::Array(PdfArray::new()));
        dict.insert("Length", PdfObject::Integer(40));
        dict.insert("Root", PdfObject::Reference(ObjectId::new(1, 0)));
        let trailer = PdfTrailer::from_dict(dict, Some(10));

        assert!(!trailer.dict.contains_key("W"));
        assert!(!trailer.dict.contains_key("Length"));
        assert!(trailer.dict.contains_key("Root"));
    }

    #[test]
    fn test_merge_older_fills_gaps_only() {
        let mut newest = trailer(vec![
            ("Size", PdfObject::Integer(12)),
            ("Prev", PdfObject::Integer(500)),
        ]);
        let mut older = PdfDictionary::new();
        older.insert("Size", PdfObject::Integer(10));
        older.insert("Info", PdfObject::Reference(ObjectId::new(9, 0)));
        older.insert("Prev", PdfObject::Integer(100));
        newest.merge_older(&older);

        assert_eq!(newest.size().unwrap(), 12);
        assert_eq!(newest.info(), Some(ObjectId::new(9, 0)));
        assert_eq!(newest.prev(), Some(500));
    }

    #[test]
    fn test_synthesize() {
        let trailer = PdfTrailer::synthesize(ObjectId::new(3, 0), None, 8);
        assert_eq!(trailer.root().unwrap(), ObjectId::new(3, 0));
        assert_eq!(trailer.size().unwrap(), 8);
        assert_eq!(trailer.xref_offset, None);
    }

    #[test]
    fn test_trailer_encrypt_reference() {
        let trailer = trailer(vec![("Encrypt", PdfObject::Reference(ObjectId::new(5, 0)))]);
        assert!(trailer.is_encrypted());
        assert_eq!(
            trailer.encrypt().and_then(PdfObject::as_reference),
            Some(ObjectId::new(5, 0))
        );
    }
}
