//! High-level PDF Reader
//!
//! Drives the parse pipeline over an in-memory file: header, cross-reference
//! resolution (falling back to a linear scan), object loading, then the
//! trailer and its Root/Info references.

use super::header::PdfHeader;
use super::object_stream::ObjectStream;
use super::objects::{
    Correction, IndirectObject, LengthResolver, ObjectId, ObjectParser, PdfDictionary, PdfObject,
};
use super::trailer::PdfTrailer;
use super::xref::{find_startxref, SearchingLengthResolver, XRefTable};
use super::xref_types::{XRefAnomaly, XRefEntry};
use super::{ParseError, ParseOptions, ParseResult};
use crate::recovery::scanner::{ObjectScanner, ScanResult};
use crate::recovery::xref_recovery::{corroborate, scan_authoritative, unverified_entries, XRefMode};
use std::collections::{BTreeMap, HashMap};

/// Everything a successful parse produced
#[derive(Debug, Clone)]
pub struct ParsedPdf {
    pub header: PdfHeader,
    pub objects: BTreeMap<u32, IndirectObject>,
    pub trailer: PdfTrailer,
    pub root: ObjectId,
    /// Info dictionary, when the trailer names one that exists
    pub info: Option<ObjectId>,
    pub encrypted: bool,
    pub xref_mode: XRefMode,
    /// Disagreements between the xref data and the file
    pub anomalies: Vec<XRefAnomaly>,
    /// Corrections applied while parsing (fix mode only)
    pub corrections: Vec<Correction>,
}

/// Locations of every object, however they were established
struct ResolvedXRef {
    entries: BTreeMap<u32, XRefEntry>,
    trailer: Option<PdfTrailer>,
    mode: XRefMode,
    anomalies: Vec<XRefAnomaly>,
    scan: Option<ScanResult>,
}

/// Reads one PDF file held in memory
pub struct PdfReader<'a> {
    data: &'a [u8],
    options: ParseOptions,
    corrections: Vec<Correction>,
    object_streams: HashMap<u32, Option<ObjectStream>>,
}

impl<'a> PdfReader<'a> {
    pub fn new(data: &'a [u8], options: &ParseOptions) -> Self {
        Self {
            data,
            options: options.clone(),
            corrections: Vec::new(),
            object_streams: HashMap::new(),
        }
    }

    /// Get parsing options
    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Run the whole pipeline
    pub fn read(mut self) -> ParseResult<ParsedPdf> {
        let header = PdfHeader::parse(self.data, &self.options)?;
        if header.assumed_version {
            self.note(header.offset, "header version unreadable, assumed 1.4".to_string());
        }
        tracing::debug!(version = %header.version, "header parsed");

        let resolved = self.resolve_xref()?;
        tracing::debug!(
            mode = %resolved.mode,
            entries = resolved.entries.len(),
            anomalies = resolved.anomalies.len(),
            "cross-reference resolved"
        );

        let mut anomalies = resolved.anomalies;
        let objects = self.load_objects(&resolved.entries, &mut anomalies)?;

        let mut trailer = match resolved.trailer {
            Some(trailer) => trailer,
            None => self.synthesize_trailer(&objects, resolved.scan.as_ref())?,
        };

        let root = match resolve_root(&trailer, &objects) {
            Ok(root) => root,
            Err(e) if self.options.fix => {
                let found = find_catalog(&objects).ok_or(e)?;
                self.note(0, format!("Root replaced by catalog object {found}"));
                trailer.set_root(found);
                found
            }
            Err(e) => return Err(e),
        };

        let info = match trailer.info() {
            Some(id) if is_live_dict(&objects, id) => Some(id),
            Some(id) if self.options.fix => {
                self.note(0, format!("removed dangling Info reference {id}"));
                trailer.set_info(None);
                None
            }
            _ => None,
        };

        let encrypted = trailer.is_encrypted();
        if encrypted {
            tracing::warn!("document is encrypted; stream contents will not be decoded");
        }

        Ok(ParsedPdf {
            header,
            objects,
            trailer,
            root,
            info,
            encrypted,
            xref_mode: resolved.mode,
            anomalies,
            corrections: self.corrections,
        })
    }

    fn note(&mut self, position: usize, message: String) {
        self.options.note_fix(position, &message);
        self.corrections.push(Correction { position, message });
    }

    fn resolve_xref(&mut self) -> ParseResult<ResolvedXRef> {
        let fix = self.options.fix;
        let table = match find_startxref(self.data, &self.options) {
            None if !fix => {
                return Err(ParseError::MissingRoot(
                    "no startxref; the cross-reference data cannot be located".to_string(),
                ))
            }
            None => {
                self.note(self.data.len(), "no startxref, rebuilding from a full scan".to_string());
                None
            }
            Some(offset) => match XRefTable::load(self.data, offset, &self.options) {
                Ok(table) => Some(table),
                Err(e) if fix => {
                    self.note(offset, format!("unreadable xref ({e}), rebuilding from a full scan"));
                    None
                }
                Err(e) => return self.recover_unreadable_xref(offset, e),
            },
        };

        let Some(mut table) = table else {
            let scan = ObjectScanner::new(self.data).scan();
            return Ok(ResolvedXRef {
                entries: scan_authoritative(self.data, &scan),
                trailer: None,
                mode: XRefMode::ScanAuthoritative,
                anomalies: vec![XRefAnomaly::new("cross-reference data missing or unreadable")],
                scan: Some(scan),
            });
        };

        let unverified = unverified_entries(self.data, &table);
        let orphaned_members = table.iter().any(|(_, entry)| match entry {
            XRefEntry::Compressed { stream_number, .. } => {
                !table.get(*stream_number).is_some_and(|e| e.offset().is_some())
            }
            _ => false,
        });

        if table.problems().is_empty() && unverified.is_empty() && !orphaned_members {
            let trailer = table.take_trailer();
            return Ok(ResolvedXRef {
                entries: table.entries().clone(),
                trailer,
                mode: XRefMode::Trusted,
                anomalies: Vec::new(),
                scan: None,
            });
        }

        tracing::warn!(
            problems = table.problems().len(),
            unverified = unverified.len(),
            "cross-reference table is damaged, scanning the file"
        );
        let scan = ObjectScanner::new(self.data).scan();
        let (corroborated, anomalies) = corroborate(self.data, &table, &scan);

        let (entries, mode) = if fix && !scan.is_empty() {
            self.note(0, "object locations rebuilt from a full scan".to_string());
            (scan_authoritative(self.data, &scan), XRefMode::ScanAuthoritative)
        } else {
            (corroborated, XRefMode::Corroborated)
        };

        Ok(ResolvedXRef {
            entries,
            trailer: table.take_trailer(),
            mode,
            anomalies,
            scan: Some(scan),
        })
    }

    /// Non-fix mode with a `startxref` that leads nowhere: the scan may
    /// still find a trailer naming the catalog.
    fn recover_unreadable_xref(&mut self, offset: usize, error: ParseError) -> ParseResult<ResolvedXRef> {
        let scan = ObjectScanner::new(self.data).scan();
        let Some(dict) = scan.last_trailer_with_root().cloned() else {
            return Err(error);
        };
        tracing::warn!(offset, error = %error, "startxref does not lead to an xref section");

        Ok(ResolvedXRef {
            entries: scan_authoritative(self.data, &scan),
            trailer: Some(PdfTrailer::from_dict(dict, None)),
            mode: XRefMode::Corroborated,
            anomalies: vec![XRefAnomaly::new(format!(
                "startxref does not point at an xref section: {error}"
            ))
            .at(offset)],
            scan: Some(scan),
        })
    }

    fn load_objects(
        &mut self,
        entries: &BTreeMap<u32, XRefEntry>,
        anomalies: &mut Vec<XRefAnomaly>,
    ) -> ParseResult<BTreeMap<u32, IndirectObject>> {
        let mut objects = BTreeMap::new();

        for (&number, entry) in entries {
            let XRefEntry::InUse { offset, generation } = *entry else {
                continue;
            };
            let expected = ObjectId::new(number, generation);
            match self.parse_at(offset, entries) {
                Ok((id, object)) if id == expected => {
                    objects.insert(number, IndirectObject::new(id, object));
                }
                Ok((id, _)) => {
                    let message = format!("expected object {expected} at byte {offset}, found {id}");
                    if self.options.fix {
                        self.note(offset, message);
                    } else {
                        anomalies.push(XRefAnomaly::new(message).for_object(expected).at(offset));
                    }
                }
                Err(e) if self.options.fix => {
                    self.note(offset, format!("dropped unreadable object {expected}: {e}"));
                }
                Err(e) => return Err(e),
            }
        }

        for (&number, entry) in entries {
            let XRefEntry::Compressed { stream_number, index } = *entry else {
                continue;
            };
            match self.compressed_object(&objects, stream_number, index as usize, number) {
                Some(object) => {
                    objects.insert(number, IndirectObject::new(ObjectId::new(number, 0), object));
                }
                None => {
                    let message = format!("object {number} not found in object stream {stream_number}");
                    if self.options.fix {
                        self.note(0, message);
                    } else {
                        anomalies.push(XRefAnomaly::new(message).for_object(ObjectId::new(number, 0)));
                    }
                }
            }
        }

        // Containers are an encoding detail; their members are already loaded
        objects.retain(|_, indirect| !is_container(&indirect.object));
        Ok(objects)
    }

    fn parse_at(
        &mut self,
        offset: usize,
        entries: &BTreeMap<u32, XRefEntry>,
    ) -> ParseResult<(ObjectId, PdfObject)> {
        let resolver = EntryLengthResolver {
            data: self.data,
            entries,
        };
        let mut parser = ObjectParser::new(self.data, offset, &self.options).with_length_resolver(&resolver);
        let parsed = parser.parse_indirect();
        self.corrections.extend(parser.into_corrections());
        parsed
    }

    fn compressed_object(
        &mut self,
        objects: &BTreeMap<u32, IndirectObject>,
        stream_number: u32,
        index: usize,
        number: u32,
    ) -> Option<PdfObject> {
        if !self.object_streams.contains_key(&stream_number) {
            let parsed = match objects.get(&stream_number).map(|o| &o.object) {
                Some(PdfObject::Stream(stream)) => match ObjectStream::parse(stream, &self.options) {
                    Ok(objstm) => Some(objstm),
                    Err(e) => {
                        tracing::warn!(stream = stream_number, error = %e, "object stream unreadable");
                        None
                    }
                },
                _ => None,
            };
            self.object_streams.insert(stream_number, parsed);
        }

        let objstm = self.object_streams.get(&stream_number)?.as_ref()?;
        match objstm.get(index) {
            Some((n, object)) if n == number => Some(object.clone()),
            _ => {
                tracing::debug!(number, stream = stream_number, index, "object not at its xref index");
                objstm.get_object(number).cloned()
            }
        }
    }

    /// Fix mode without any usable trailer
    fn synthesize_trailer(
        &mut self,
        objects: &BTreeMap<u32, IndirectObject>,
        scan: Option<&ScanResult>,
    ) -> ParseResult<PdfTrailer> {
        let root = find_catalog(objects)
            .ok_or_else(|| ParseError::MissingRoot("no trailer and no catalog object found".to_string()))?;
        let info = scan
            .and_then(ScanResult::last_info)
            .filter(|id| is_live_dict(objects, *id));
        let size = objects.keys().next_back().map_or(1, |n| n + 1);

        self.note(
            self.data.len(),
            format!("synthesized trailer with Root {root}"),
        );
        Ok(PdfTrailer::synthesize(root, info, size))
    }
}

/// Follows xref entries to resolve an indirect stream `/Length`
struct EntryLengthResolver<'a> {
    data: &'a [u8],
    entries: &'a BTreeMap<u32, XRefEntry>,
}

impl LengthResolver for EntryLengthResolver<'_> {
    fn resolve_length(&self, id: ObjectId) -> Option<i64> {
        let direct = match self.entries.get(&id.number) {
            Some(XRefEntry::InUse { offset, .. }) => {
                let options = ParseOptions::strict();
                let mut parser = ObjectParser::new(self.data, *offset, &options);
                match parser.parse_indirect() {
                    Ok((found, PdfObject::Integer(n))) if found == id => Some(n),
                    _ => None,
                }
            }
            _ => None,
        };
        direct.or_else(|| SearchingLengthResolver { data: self.data }.resolve_length(id))
    }
}

/// A catalog has `Type Catalog`, or no `Type` and a `Pages` entry
pub fn is_catalog(dict: &PdfDictionary) -> bool {
    match dict.get_type() {
        Some(kind) => kind == "Catalog",
        None => dict.contains_key("Pages"),
    }
}

fn resolve_root(trailer: &PdfTrailer, objects: &BTreeMap<u32, IndirectObject>) -> ParseResult<ObjectId> {
    let root = trailer.root()?;
    let Some(indirect) = objects.get(&root.number).filter(|o| o.id == root) else {
        return Err(ParseError::MissingRoot(format!("Root {root} does not exist")));
    };
    match &indirect.object {
        PdfObject::Dictionary(dict) if is_catalog(dict) => Ok(root),
        other => Err(ParseError::MissingRoot(format!(
            "Root {root} is a {}, not a catalog",
            other.type_name()
        ))),
    }
}

/// The catalog with the highest object number
fn find_catalog(objects: &BTreeMap<u32, IndirectObject>) -> Option<ObjectId> {
    objects
        .values()
        .rev()
        .find(|o| matches!(&o.object, PdfObject::Dictionary(d) if d.get_type() == Some("Catalog")))
        .map(|o| o.id)
}

fn is_live_dict(objects: &BTreeMap<u32, IndirectObject>, id: ObjectId) -> bool {
    objects
        .get(&id.number)
        .is_some_and(|o| o.id == id && matches!(o.object, PdfObject::Dictionary(_)))
}

fn is_container(object: &PdfObject) -> bool {
    matches!(object, PdfObject::Stream(s) if matches!(s.dict.get_type(), Some("ObjStm" | "XRef")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_helpers::{assemble, create_minimal_pdf, create_pdf_with_info};

    fn read(data: &[u8], options: &ParseOptions) -> ParseResult<ParsedPdf> {
        PdfReader::new(data, options).read()
    }

    #[test]
    fn test_reader_minimal() {
        let parsed = read(&create_minimal_pdf(), &ParseOptions::default()).unwrap();
        assert_eq!(parsed.xref_mode, XRefMode::Trusted);
        assert_eq!(parsed.root, ObjectId::new(1, 0));
        assert_eq!(parsed.objects.len(), 2);
        assert!(parsed.info.is_none());
        assert!(parsed.anomalies.is_empty());
        assert!(parsed.corrections.is_empty());
        assert!(!parsed.encrypted);
    }

    #[test]
    fn test_reader_info_present() {
        let parsed = read(&create_pdf_with_info(), &ParseOptions::default()).unwrap();
        assert_eq!(parsed.info, Some(ObjectId::new(4, 0)));
        assert_eq!(parsed.header.version.to_string(), "1.6");
    }

    #[test]
    fn test_reader_missing_startxref() {
        let pdf = create_minimal_pdf();
        let cut = crate::parser::lexer::rfind_bytes(&pdf, b"startxref").unwrap();
        let truncated = &pdf[..cut];

        assert!(matches!(
            read(truncated, &ParseOptions::default()),
            Err(ParseError::MissingRoot(_))
        ));

        let parsed = read(truncated, &ParseOptions::lenient()).unwrap();
        assert_eq!(parsed.xref_mode, XRefMode::ScanAuthoritative);
        assert_eq!(parsed.root, ObjectId::new(1, 0));
        assert_eq!(parsed.objects.len(), 2);
        assert!(!parsed.corrections.is_empty());
    }

    #[test]
    fn test_reader_shifted_offsets_corroborated() {
        let pdf = create_minimal_pdf();
        let startxref = find_startxref(&pdf, &ParseOptions::default()).unwrap();
        let marker = crate::parser::lexer::rfind_bytes(&pdf, b"startxref").unwrap();

        // Shift the objects by twelve bytes but leave the xref rows untouched
        let mut shifted = pdf[..9].to_vec();
        shifted.extend_from_slice(b"% junk line\n");
        shifted.extend_from_slice(&pdf[9..marker]);
        shifted.extend_from_slice(format!("startxref\n{}\n%%EOF\n", startxref + 12).as_bytes());

        let parsed = read(&shifted, &ParseOptions::default()).unwrap();
        assert_eq!(parsed.xref_mode, XRefMode::Corroborated);
        assert_eq!(parsed.objects.len(), 2);
        assert_eq!(parsed.anomalies.len(), 2);

        let fixed = read(&shifted, &ParseOptions::lenient()).unwrap();
        assert_eq!(fixed.xref_mode, XRefMode::ScanAuthoritative);
        assert_eq!(fixed.objects.len(), 2);
    }

    #[test]
    fn test_reader_stream_length_mismatch() {
        let (pdf, _) = assemble(
            "1.4",
            &[
                (1, "<< /Type /Catalog /Pages 2 0 R >>"),
                (2, "<< /Type /Pages /Kids [] /Count 0 >>"),
                (3, "<< /Length 3 >>\nstream\nhello\nendstream"),
            ],
            "",
        );
        assert!(matches!(
            read(&pdf, &ParseOptions::default()),
            Err(ParseError::StreamLengthMismatch { .. })
        ));

        let parsed = read(&pdf, &ParseOptions::lenient()).unwrap();
        let stream = parsed.objects[&3].object.as_stream().unwrap();
        assert_eq!(stream.raw_data(), b"hello");
        assert_eq!(parsed.corrections.len(), 1);
    }

    #[test]
    fn test_reader_root_not_a_catalog() {
        let (pdf, _) = assemble(
            "1.4",
            &[
                (1, "<< /Type /Pages /Kids [] /Count 0 >>"),
                (2, "<< /Type /Catalog /Pages 1 0 R >>"),
            ],
            "",
        );
        assert!(matches!(
            read(&pdf, &ParseOptions::default()),
            Err(ParseError::MissingRoot(_))
        ));

        let parsed = read(&pdf, &ParseOptions::lenient()).unwrap();
        assert_eq!(parsed.root, ObjectId::new(2, 0));
        assert_eq!(parsed.trailer.root().unwrap(), ObjectId::new(2, 0));
    }

    #[test]
    fn test_reader_dangling_info() {
        let (pdf, _) = assemble("1.4", &[(1, "<< /Type /Catalog /Pages 1 0 R >>")], "/Info 9 0 R ");
        let strict = read(&pdf, &ParseOptions::default()).unwrap();
        assert_eq!(strict.info, None);
        assert!(strict.trailer.info().is_some());

        let fixed = read(&pdf, &ParseOptions::lenient()).unwrap();
        assert!(fixed.trailer.info().is_none());
    }

    #[test]
    fn test_reader_encrypted_flag() {
        let (pdf, _) = assemble(
            "1.4",
            &[
                (1, "<< /Type /Catalog /Pages 2 0 R >>"),
                (2, "<< /Type /Pages /Kids [] /Count 0 >>"),
                (3, "<< /Filter /Standard /V 1 /R 2 >>"),
            ],
            "/Encrypt 3 0 R ",
        );
        assert!(read(&pdf, &ParseOptions::default()).unwrap().encrypted);
    }

    /// Catalog in the clear, page tree inside an object stream, xref stream
    fn xref_stream_pdf() -> Vec<u8> {
        let mut pdf = b"%PDF-1.5\n".to_vec();
        let catalog = pdf.len();
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");

        let header = "2 0 ";
        let content = format!("{header}<< /Type /Pages /Kids [] /Count 0 >>");
        let objstm = pdf.len();
        pdf.extend_from_slice(
            format!(
                "3 0 obj\n<< /Type /ObjStm /N 1 /First {} /Length {} >>\nstream\n{content}\nendstream\nendobj\n",
                header.len(),
                content.len()
            )
            .as_bytes(),
        );

        let xref = pdf.len();
        let mut rows = Vec::new();
        for (kind, field2, field3) in [
            (0u8, 0u16, 255u8),
            (1, catalog as u16, 0),
            (2, 3, 0),
            (1, objstm as u16, 0),
            (1, xref as u16, 0),
        ] {
            rows.push(kind);
            rows.extend_from_slice(&field2.to_be_bytes());
            rows.push(field3);
        }
        pdf.extend_from_slice(
            format!(
                "4 0 obj\n<< /Type /XRef /Size 5 /W [1 2 1] /Root 1 0 R /Length {} >>\nstream\n",
                rows.len()
            )
            .as_bytes(),
        );
        pdf.extend_from_slice(&rows);
        pdf.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{xref}\n%%EOF\n").as_bytes());
        pdf
    }

    #[test]
    fn test_reader_xref_stream_and_object_stream() {
        let parsed = read(&xref_stream_pdf(), &ParseOptions::default()).unwrap();
        assert_eq!(parsed.xref_mode, XRefMode::Trusted);
        // containers 3 and 4 are not part of the arena
        assert_eq!(parsed.objects.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(
            parsed.objects[&2].object.as_dict().unwrap().get_type(),
            Some("Pages")
        );
        assert!(!parsed.trailer.dict.contains_key("W"));
    }

    #[test]
    fn test_reader_rejects_non_pdf() {
        assert!(matches!(
            read(b"hello world", &ParseOptions::default()),
            Err(ParseError::InvalidHeader)
        ));
    }
}
