//! Recovery of damaged files: xref reconstruction, structural repairs and
//! stream repairs, end to end

use pdfcheck::parser::{ObjectId, ParseError, ParseOptions, PdfObject};
use pdfcheck::recovery::XRefMode;
use pdfcheck::{AnomalyKind, CheckOptions, Document, Resolution};
use pdfcheck_test_suite::generators::jpeg::{sample_jpeg, with_leading_garbage};
use pdfcheck_test_suite::generators::{invalid_pdfs, minimal_pdfs};
use pdfcheck_test_suite::utils::count_occurrences;
use pretty_assertions::assert_eq;

fn strict_parse(bytes: &[u8]) -> Result<Document, ParseError> {
    Document::from_bytes(bytes, &ParseOptions::default())
}

fn lenient_parse(bytes: &[u8]) -> Document {
    Document::from_bytes(bytes, &ParseOptions::lenient()).expect("fix mode should recover the file")
}

fn image_objects(document: &Document) -> Vec<ObjectId> {
    document
        .objects()
        .values()
        .filter(|o| {
            o.object
                .as_dict()
                .and_then(|d| d.get("Subtype"))
                .and_then(PdfObject::as_name)
                .is_some_and(|name| name.as_str() == "Image")
        })
        .map(|o| o.id)
        .collect()
}

#[test]
fn test_truncated_xref_is_corroborated_by_scan() {
    let built = invalid_pdfs::truncated_xref();
    let mut document = strict_parse(&built.bytes).unwrap();

    assert_eq!(document.xref_mode(), XRefMode::Corroborated);
    assert!(!document.parse_anomalies().is_empty());
    for number in built.offsets.keys() {
        assert!(
            document.objects().contains_key(number),
            "object {number} should be served from the scan"
        );
    }

    let report = document.check(&CheckOptions::default()).unwrap();
    assert!(report.count(AnomalyKind::XRefCorruption) > 0);
    assert_eq!(report.count(AnomalyKind::DanglingReference), 0);
    assert!(report.has_outstanding());
}

#[test]
fn test_shifted_offsets_are_relocated() {
    let built = invalid_pdfs::shifted_xref();
    let document = strict_parse(&built.bytes).unwrap();
    assert_eq!(document.xref_mode(), XRefMode::Corroborated);
    assert_eq!(document.object_count(), built.offsets.len());
    assert_eq!(document.info().title.as_deref(), Some("Shifted"));

    let fixed = lenient_parse(&built.bytes);
    assert_eq!(fixed.xref_mode(), XRefMode::ScanAuthoritative);
    assert!(!fixed.corrections().is_empty());
}

#[test]
fn test_xref_anomalies_are_fixed_by_rewrite() {
    let built = invalid_pdfs::truncated_xref();
    let mut document = strict_parse(&built.bytes).unwrap();
    let report = document.check(&CheckOptions::new(false, true)).unwrap();
    assert!(report
        .of_kind(AnomalyKind::XRefCorruption)
        .all(|a| a.resolution == Resolution::Fixed));

    let rewritten = strict_parse(&document.to_bytes().unwrap()).unwrap();
    assert_eq!(rewritten.xref_mode(), XRefMode::Trusted);
    assert_eq!(rewritten.object_count(), document.object_count());
}

#[test]
fn test_missing_startxref() {
    let built = minimal_pdfs::with_info();
    let damaged = invalid_pdfs::without_startxref(&built.bytes);

    match strict_parse(&damaged) {
        Err(ParseError::MissingRoot(_)) => {}
        other => panic!("expected MissingRoot, got {other:?}"),
    }

    let document = lenient_parse(&damaged);
    assert_eq!(document.xref_mode(), XRefMode::ScanAuthoritative);
    assert_eq!(document.object_count(), built.offsets.len());
    assert_eq!(document.root(), ObjectId::new(built.catalog, 0));

    let rewritten = strict_parse(&document.to_bytes().unwrap()).unwrap();
    assert_eq!(rewritten.root(), ObjectId::new(built.catalog, 0));
    assert_eq!(rewritten.info().title.as_deref(), Some("Quarterly Report"));
    assert_eq!(rewritten.declared_size(), Some(built.size));
}

#[test]
fn test_missing_xref_section_rebuilt() {
    let built = minimal_pdfs::multi_page(2);
    let damaged = invalid_pdfs::without_xref_section(&built);

    let document = lenient_parse(&damaged);
    assert_eq!(document.object_count(), built.offsets.len());
    assert_eq!(document.catalog_summary().page_count, Some(2));
}

#[test]
fn test_dangling_reference_reported_once_and_removed() {
    let built = invalid_pdfs::dangling_reference();
    let mut document = strict_parse(&built.bytes).unwrap();

    let report = document.check(&CheckOptions::default()).unwrap();
    assert_eq!(report.count(AnomalyKind::DanglingReference), 1);
    let anomaly = report.of_kind(AnomalyKind::DanglingReference).next().unwrap();
    assert_eq!(anomaly.location.object, Some(ObjectId::new(built.catalog, 0)));

    let report = document.check(&CheckOptions::new(false, true)).unwrap();
    assert!(!report.has_outstanding());

    let written = document.to_bytes().unwrap();
    assert_eq!(count_occurrences(&written, b"99 0 R"), 0);
    let mut reread = strict_parse(&written).unwrap();
    assert!(reread.check(&CheckOptions::default()).unwrap().is_clean());
}

#[test]
fn test_malformed_dictionary_needs_fix() {
    let built = invalid_pdfs::malformed_dictionary();
    assert!(strict_parse(&built.bytes).is_err());

    let document = lenient_parse(&built.bytes);
    let catalog = document.get(document.root()).and_then(PdfObject::as_dict).unwrap();
    assert!(catalog.contains_key("Pages"));
    assert!(!catalog.contains_key("Dangling"));
}

#[test]
fn test_jpeg_missing_eoi() {
    let built = invalid_pdfs::jpeg_missing_eoi();
    let mut document = strict_parse(&built.bytes).unwrap();
    let images = image_objects(&document);
    assert_eq!(images.len(), 1);
    let image = images[0];

    let report = document.check(&CheckOptions::default()).unwrap();
    let errors: Vec<_> = report.of_kind(AnomalyKind::StreamDecodeError).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].location.object, Some(image));
    assert_eq!(report.streams_checked, 3);

    let report = document.check(&CheckOptions::new(true, true)).unwrap();
    assert!(!report.has_outstanding());

    let rewritten = strict_parse(&document.to_bytes().unwrap()).unwrap();
    let stream = rewritten.get(image).and_then(PdfObject::as_stream).unwrap();
    let jpeg = stream.decode().unwrap();
    assert!(jpeg.ends_with(&[0xFF, 0xD9]));
    let decoded = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (16, 16));
    assert_eq!(stream.declared_length(), Some(stream.raw_data().len()));
}

#[test]
fn test_jpeg_leading_garbage_repaired() {
    let built = minimal_pdfs::with_jpeg(with_leading_garbage(&sample_jpeg(16, 16)));
    let mut document = strict_parse(&built.bytes).unwrap();
    let image = image_objects(&document)[0];

    let report = document.check(&CheckOptions::new(false, true).with_parallel(false)).unwrap();
    assert_eq!(report.fixed_count(), 1);

    let stream = document.get(image).and_then(PdfObject::as_stream).unwrap();
    assert!(stream.raw_data().starts_with(&[0xFF, 0xD8]));
    assert!(image::load_from_memory(stream.raw_data()).is_ok());
}

#[test]
fn test_wrong_stream_length_corrected_in_fix_mode() {
    let built = invalid_pdfs::wrong_stream_length();
    match strict_parse(&built.bytes) {
        Err(ParseError::StreamLengthMismatch { declared, found, .. }) => {
            assert_eq!(declared.zip(found).map(|(d, f)| d - f), Some(10));
        }
        other => panic!("expected StreamLengthMismatch, got {other:?}"),
    }

    let mut document = lenient_parse(&built.bytes);
    assert!(document
        .corrections()
        .iter()
        .any(|c| c.message.contains("stream length corrected")));
    assert!(document.check(&CheckOptions::default()).unwrap().is_clean());
}

#[test]
fn test_unlisted_page_is_an_orphan() {
    let built = pdfcheck_test_suite::TestPdfBuilder::minimal()
        .with_object(7, 0, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 10 10] >>")
        .build_parts();
    // Object 7 claims page tree membership but is not listed in Kids
    let mut document = strict_parse(&built.bytes).unwrap();
    let report = document.check(&CheckOptions::default()).unwrap();
    assert_eq!(report.count(AnomalyKind::OrphanObject), 1);
    assert!(report.is_clean());
}

#[test]
fn test_truncated_object_does_not_hide_the_next_one() {
    // No xref at all; object 5 loses its end and runs into object 2
    let bytes = b"%PDF-1.4\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
5 0 obj\n<< /A 1\n\
2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n\
trailer\n<< /Root 1 0 R /Size 6 >>\n%%EOF\n";
    let document = lenient_parse(bytes);

    assert!(document.objects().contains_key(&5));
    let pages = document
        .objects()
        .get(&2)
        .and_then(|o| o.object.as_dict())
        .and_then(|d| d.get("Type"))
        .and_then(PdfObject::as_name)
        .map(|name| name.as_str().to_string());
    assert_eq!(pages.as_deref(), Some("Pages"));
}
