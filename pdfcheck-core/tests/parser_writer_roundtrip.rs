//! Parse → serialize → parse round trips over generated documents

use pdfcheck::parser::ParseOptions;
use pdfcheck::recovery::XRefMode;
use pdfcheck::{CheckOptions, Document, WriterConfig, XRefStyle};
use pdfcheck_test_suite::generators::jpeg::sample_jpeg;
use pdfcheck_test_suite::generators::minimal_pdfs;
use pretty_assertions::assert_eq;

fn parse(bytes: &[u8]) -> Document {
    Document::from_bytes(bytes, &ParseOptions::default()).expect("document should parse")
}

fn well_formed() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("minimal", minimal_pdfs::minimal()),
        ("with_info", minimal_pdfs::with_info().bytes),
        ("multi_page", minimal_pdfs::multi_page(3).bytes),
        ("object_streams", minimal_pdfs::with_object_streams().bytes),
        ("jpeg", minimal_pdfs::with_jpeg(sample_jpeg(16, 16)).bytes),
        ("incremental", minimal_pdfs::incremental_update().bytes),
    ]
}

#[test]
fn test_serialized_output_is_equivalent() {
    for (name, bytes) in well_formed() {
        let original = parse(&bytes);
        let written = original.to_bytes().unwrap();
        let mut reparsed = parse(&written);

        assert_eq!(reparsed.xref_mode(), XRefMode::Trusted, "{name}");
        assert!(reparsed.parse_anomalies().is_empty(), "{name}");
        assert_eq!(reparsed.object_count(), original.object_count(), "{name}");
        assert_eq!(reparsed.root(), original.root(), "{name}");
        assert_eq!(
            reparsed.get(reparsed.root()),
            original.get(original.root()),
            "{name}: catalog changed"
        );
        assert_eq!(reparsed.info(), original.info(), "{name}");
        assert_eq!(reparsed.version(), original.version(), "{name}");

        let report = reparsed.check(&CheckOptions::default()).unwrap();
        assert!(report.is_clean(), "{name}: {report}");
    }
}

#[test]
fn test_serialization_is_byte_idempotent() {
    for (name, bytes) in well_formed() {
        let first = parse(&bytes).to_bytes().unwrap();
        let second = parse(&first).to_bytes().unwrap();
        assert!(first == second, "{name}: second rewrite differs");
    }
}

#[test]
fn test_object_streams_are_expanded() {
    let built = minimal_pdfs::with_object_streams();
    let document = parse(&built.bytes);
    let written = String::from_utf8_lossy(&document.to_bytes().unwrap()).into_owned();

    assert!(!written.contains("/ObjStm"));
    assert!(!written.contains("/Type /XRef"));
    assert!(written.contains(&format!("{} 0 obj\n<< /Type /Pages", built.pages_root)));
}

#[test]
fn test_file_id_is_kept_or_generated() {
    let with_id = parse(&minimal_pdfs::with_info().bytes);
    let written = parse(&with_id.to_bytes().unwrap());
    assert_eq!(written.file_ids(), with_id.file_ids());

    let without_id = parse(&minimal_pdfs::minimal());
    assert!(without_id.file_ids().is_none());
    let (first, second) = parse(&without_id.to_bytes().unwrap()).file_ids().unwrap();
    assert_eq!(first.len(), 32);
    assert_eq!(first, second);
}

#[test]
fn test_xref_stream_output_round_trips() {
    let original = parse(&minimal_pdfs::multi_page(2).bytes);
    let config = WriterConfig::default().with_xref_style(XRefStyle::Stream);
    let written = original.to_bytes_with(&config).unwrap();
    assert!(written.starts_with(b"%PDF-1.5\n"));

    let reparsed = parse(&written);
    assert_eq!(reparsed.xref_mode(), XRefMode::Trusted);
    assert_eq!(reparsed.object_count(), original.object_count());
    assert_eq!(reparsed.catalog_summary().page_count, Some(2));
}

#[test]
fn test_serialize_to_disk_replaces_target() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.pdf");
    std::fs::write(&target, b"old contents").unwrap();

    let document = parse(&minimal_pdfs::with_info().bytes);
    document.serialize(&target).unwrap();

    let on_disk = std::fs::read(&target).unwrap();
    assert_eq!(on_disk, document.to_bytes().unwrap());
    // Only the target remains; the staging file was renamed over it
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn test_serialize_into_missing_directory_fails() {
    let document = parse(&minimal_pdfs::minimal());
    let error = document
        .serialize("/nonexistent-dir/for/sure/out.pdf")
        .unwrap_err();
    assert!(matches!(error, pdfcheck::PdfError::Io(_)));
}

#[test]
fn test_high_byte_names_survive_rewrite() {
    let bytes = pdfcheck_test_suite::TestPdfBuilder::minimal()
        .with_catalog_entry("Label", "/Caf#E9")
        .build();
    let original = parse(&bytes);
    let first = original.to_bytes().unwrap();
    assert!(pdfcheck_test_suite::utils::count_occurrences(&first, b"/Label /Caf#E9") == 1);

    let reparsed = parse(&first);
    assert_eq!(reparsed.get(reparsed.root()), original.get(original.root()));
    assert!(reparsed.to_bytes().unwrap() == first);
}
