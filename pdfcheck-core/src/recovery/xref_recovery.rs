//! XRef recovery for corrupted PDF files
//!
//! Reconciles a parsed cross-reference table with the result of a linear
//! scan. In non-fix mode the scan only fills holes ([`corroborate`]); in fix
//! mode it replaces the table outright ([`scan_authoritative`]).

use super::scanner::{ObjectType, ScanResult};
use crate::parser::object_stream::ObjectStream;
use crate::parser::objects::{ObjectId, ObjectParser, PdfObject};
use crate::parser::xref::{verify_offset, SearchingLengthResolver, XRefTable};
use crate::parser::xref_types::{XRefAnomaly, XRefEntry};
use crate::parser::ParseOptions;
use std::collections::BTreeMap;
use std::fmt;

/// How object locations were established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum XRefMode {
    /// Every structured entry verified; no scan
    Trusted,
    /// Structured entries kept where verified, gaps filled from the scan
    Corroborated,
    /// Locations taken from the scan alone
    ScanAuthoritative,
}

impl fmt::Display for XRefMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            XRefMode::Trusted => "trusted",
            XRefMode::Corroborated => "corroborated",
            XRefMode::ScanAuthoritative => "scan-authoritative",
        };
        f.write_str(name)
    }
}

/// In-use entries whose offset does not land on the matching `N G obj`
pub fn unverified_entries(data: &[u8], table: &XRefTable) -> Vec<ObjectId> {
    table
        .iter()
        .filter_map(|(&number, entry)| match *entry {
            XRefEntry::InUse { offset, generation } => {
                let id = ObjectId::new(number, generation);
                (!verify_offset(data, offset, id)).then_some(id)
            }
            _ => None,
        })
        .collect()
}

/// Keep verified structured entries and serve the rest from the scan.
/// Every disagreement between the two becomes an anomaly.
pub fn corroborate(
    data: &[u8],
    table: &XRefTable,
    scan: &ScanResult,
) -> (BTreeMap<u32, XRefEntry>, Vec<XRefAnomaly>) {
    let mut entries = BTreeMap::new();
    let mut anomalies: Vec<XRefAnomaly> = table.problems().to_vec();

    for (&number, entry) in table.iter() {
        match *entry {
            XRefEntry::InUse { offset, generation } => {
                let id = ObjectId::new(number, generation);
                if verify_offset(data, offset, id) {
                    entries.insert(number, *entry);
                    continue;
                }
                match scan.get(number) {
                    Some(found) => {
                        anomalies.push(
                            XRefAnomaly::new(format!(
                                "xref offset {offset} does not point at the object; found by scan at byte {}",
                                found.offset
                            ))
                            .for_object(id)
                            .at(offset),
                        );
                        entries.insert(
                            number,
                            XRefEntry::InUse {
                                offset: found.offset,
                                generation: found.id.generation,
                            },
                        );
                    }
                    None => anomalies.push(
                        XRefAnomaly::new(format!(
                            "xref offset {offset} does not point at the object and the scan did not find it"
                        ))
                        .for_object(id)
                        .at(offset),
                    ),
                }
            }
            XRefEntry::Compressed { stream_number, .. } => {
                let container_ok = match table.get(stream_number) {
                    Some(XRefEntry::InUse { offset, generation }) => {
                        verify_offset(data, *offset, ObjectId::new(stream_number, *generation))
                    }
                    _ => false,
                } || scan
                    .get(stream_number)
                    .is_some_and(|o| o.object_type == ObjectType::ObjectStream);

                match (container_ok, scan.get(number)) {
                    (true, _) => {
                        entries.insert(number, *entry);
                    }
                    (false, Some(found)) => {
                        anomalies.push(
                            XRefAnomaly::new(format!(
                                "object stream {stream_number} is missing; object found by scan at byte {}",
                                found.offset
                            ))
                            .for_object(found.id),
                        );
                        entries.insert(
                            number,
                            XRefEntry::InUse {
                                offset: found.offset,
                                generation: found.id.generation,
                            },
                        );
                    }
                    (false, None) => {
                        anomalies.push(
                            XRefAnomaly::new(format!("object stream {stream_number} is missing"))
                                .for_object(ObjectId::new(number, 0)),
                        );
                    }
                }
            }
            XRefEntry::Free { .. } => {
                entries.insert(number, *entry);
            }
        }
    }

    for (&number, found) in &scan.objects {
        let listed = table.get(number).is_some_and(XRefEntry::is_in_use)
            || table.xref_streams().contains(&number);
        if listed || found.object_type == ObjectType::XRefStream {
            continue;
        }
        if matches!(table.get(number), Some(XRefEntry::Free { .. })) {
            // Deleted by an update; the old bytes are still in the file
            continue;
        }
        anomalies.push(
            XRefAnomaly::new("object missing from the xref table, recovered by scan")
                .for_object(found.id)
                .at(found.offset),
        );
        entries.insert(
            number,
            XRefEntry::InUse {
                offset: found.offset,
                generation: found.id.generation,
            },
        );
    }

    (entries, anomalies)
}

/// Build the whole table from the scan. Members of scanned object streams
/// become compressed entries unless the scan also found them directly.
pub fn scan_authoritative(data: &[u8], scan: &ScanResult) -> BTreeMap<u32, XRefEntry> {
    let mut entries: BTreeMap<u32, XRefEntry> = scan
        .objects
        .iter()
        .filter(|(_, found)| found.object_type != ObjectType::XRefStream)
        .map(|(&number, found)| {
            (
                number,
                XRefEntry::InUse {
                    offset: found.offset,
                    generation: found.id.generation,
                },
            )
        })
        .collect();

    let options = ParseOptions::lenient();
    let resolver = SearchingLengthResolver { data };
    let mut containers: Vec<_> = scan.object_streams().collect();
    containers.sort_by_key(|o| o.offset);

    for container in containers {
        let mut parser =
            ObjectParser::new(data, container.offset, &options).with_length_resolver(&resolver);
        let objstm = match parser.parse_indirect() {
            Ok((_, PdfObject::Stream(stream))) => ObjectStream::parse(&stream, &options),
            Ok(_) => continue,
            Err(e) => Err(e),
        };
        let objstm = match objstm {
            Ok(objstm) => objstm,
            Err(e) => {
                tracing::debug!(stream = container.id.number, error = %e, "object stream unreadable");
                continue;
            }
        };

        for (index, number) in objstm.numbers().enumerate() {
            let direct = matches!(entries.get(&number), Some(XRefEntry::InUse { .. }));
            if !direct && number != container.id.number {
                entries.insert(
                    number,
                    XRefEntry::Compressed {
                        stream_number: container.id.number,
                        index: index as u32,
                    },
                );
            }
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_helpers::assemble;
    use crate::recovery::scanner::ObjectScanner;

    fn shifted_pdf() -> Vec<u8> {
        let (pdf, _) = assemble(
            "1.4",
            &[
                (1, "<< /Type /Catalog /Pages 2 0 R >>"),
                (2, "<< /Type /Pages /Kids [] /Count 0 >>"),
            ],
            "",
        );
        // Ten bytes of junk after the header push every object off its xref offset
        let mut shifted = pdf[..9].to_vec();
        shifted.extend_from_slice(b"%padding!\n");
        shifted.extend_from_slice(&pdf[9..]);
        shifted
    }

    fn load(data: &[u8]) -> XRefTable {
        let startxref = crate::parser::xref::find_startxref(data, &ParseOptions::default()).unwrap();
        // startxref still names the original position, now ten bytes early
        XRefTable::load(data, startxref + 10, &ParseOptions::default()).unwrap()
    }

    #[test]
    fn test_intact_table_verifies() {
        let (pdf, _) = assemble("1.4", &[(1, "<< /Type /Catalog >>")], "");
        let startxref = crate::parser::xref::find_startxref(&pdf, &ParseOptions::default()).unwrap();
        let table = XRefTable::load(&pdf, startxref, &ParseOptions::default()).unwrap();
        assert!(unverified_entries(&pdf, &table).is_empty());
    }

    #[test]
    fn test_corroborate_replaces_unverified_offsets() {
        let pdf = shifted_pdf();
        let table = load(&pdf);
        assert_eq!(unverified_entries(&pdf, &table).len(), 2);

        let scan = ObjectScanner::new(&pdf).scan();
        let (entries, anomalies) = corroborate(&pdf, &table, &scan);

        assert_eq!(anomalies.len(), 2);
        assert_eq!(entries[&1].offset(), Some(scan.get(1).unwrap().offset));
        assert!(anomalies
            .iter()
            .all(|a| a.message.contains("does not point at the object")));
    }

    #[test]
    fn test_corroborate_never_overrides_verified_entry() {
        // Object 1 appears twice; the table points at the first copy
        let body = b"%PDF-1.4\n1 0 obj\n(first)\nendobj\n1 0 obj\n(second)\nendobj\n";
        let mut pdf = body.to_vec();
        let xref = pdf.len();
        pdf.extend_from_slice(
            format!(
                "xref\n0 2\n0000000000 65535 f \n0000000009 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R >>\nstartxref\n{xref}\n%%EOF\n"
            )
            .as_bytes(),
        );
        let table = XRefTable::load(&pdf, xref, &ParseOptions::default()).unwrap();
        let scan = ObjectScanner::new(&pdf).scan();
        assert_ne!(scan.get(1).unwrap().offset, 9);

        let (entries, anomalies) = corroborate(&pdf, &table, &scan);
        assert_eq!(entries[&1].offset(), Some(9));
        assert!(anomalies.is_empty());
    }

    #[test]
    fn test_corroborate_adds_objects_missing_from_table() {
        let (mut pdf, _) = assemble("1.4", &[(1, "<< /Type /Catalog >>")], "");
        let startxref = crate::parser::xref::find_startxref(&pdf, &ParseOptions::default()).unwrap();
        // An object appended after the xref without a table update
        pdf.extend_from_slice(b"5 0 obj\n(late)\nendobj\n");
        let table = XRefTable::load(&pdf, startxref, &ParseOptions::default()).unwrap();
        let scan = ObjectScanner::new(&pdf).scan();

        let (entries, anomalies) = corroborate(&pdf, &table, &scan);
        assert!(entries[&5].is_in_use());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].object, Some(ObjectId::new(5, 0)));
    }

    #[test]
    fn test_scan_authoritative_uses_scan_offsets() {
        let pdf = shifted_pdf();
        let scan = ObjectScanner::new(&pdf).scan();
        let entries = scan_authoritative(&pdf, &scan);

        assert_eq!(entries.len(), 2);
        for (number, entry) in &entries {
            assert_eq!(entry.offset(), Some(scan.get(*number).unwrap().offset));
        }
    }

    #[test]
    fn test_scan_authoritative_expands_object_streams() {
        let header = "7 0 8 5 ";
        let members = "(a)  (b)";
        let content = format!("{header}{members}");
        let objstm = format!(
            "<< /Type /ObjStm /N 2 /First {} /Length {} >>\nstream\n{content}\nendstream",
            header.len(),
            content.len()
        );
        let (pdf, _) = assemble(
            "1.5",
            &[(1, "<< /Type /Catalog >>"), (4, &objstm), (8, "(direct)")],
            "",
        );
        let scan = ObjectScanner::new(&pdf).scan();
        let entries = scan_authoritative(&pdf, &scan);

        assert_eq!(
            entries[&7],
            XRefEntry::Compressed {
                stream_number: 4,
                index: 0
            }
        );
        // found directly, so the direct copy wins
        assert!(matches!(entries[&8], XRefEntry::InUse { .. }));
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(XRefMode::ScanAuthoritative.to_string(), "scan-authoritative");
    }
}
